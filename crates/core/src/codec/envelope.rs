//! Reference envelope codec.
//!
//! An envelope is a small self-describing container:
//!
//! ```text
//! DICMENV1\n
//! {"dataset":{...},"frame_length":N,"number_of_frames":F,"transfer_syntax_uid":"..."}\n
//! <F frames of N raw 8-bit samples, back to back>
//! ```
//!
//! The header is compact JSON with sorted keys, so encoding is deterministic and frames sit at
//! fixed offsets that can be served with ranged reads.

use super::{CodecError, CodecResult, DicomCodec, InstanceUids, Renderer};
use crate::constants::{
    EXPLICIT_VR_BIG_ENDIAN, EXPLICIT_VR_LITTLE_ENDIAN, IMPLICIT_VR_LITTLE_ENDIAN, PGM_MEDIA_TYPE,
    SERIES_INSTANCE_UID, SOP_INSTANCE_UID, STUDY_INSTANCE_UID,
};
use dicomstore_files::ByteRange;
use dicomstore_types::DicomUid;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const MAGIC: &[u8] = b"DICMENV1\n";

/// Attributes that describe the pixel data layout and may not be edited.
const PROTECTED_KEYWORDS: &[&str] = &[
    STUDY_INSTANCE_UID,
    SERIES_INSTANCE_UID,
    SOP_INSTANCE_UID,
    "Rows",
    "Columns",
    "NumberOfFrames",
    "TransferSyntaxUID",
];

/// Uncompressed syntaxes. Samples are 8-bit, so these differ only in their label.
const UNCOMPRESSED: &[&str] = &[
    IMPLICIT_VR_LITTLE_ENDIAN,
    EXPLICIT_VR_LITTLE_ENDIAN,
    EXPLICIT_VR_BIG_ENDIAN,
];

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EnvelopeHeader {
    dataset: Map<String, Value>,
    frame_length: u64,
    number_of_frames: u32,
    transfer_syntax_uid: String,
}

struct Envelope<'a> {
    header: EnvelopeHeader,
    /// Offset of the first frame
    data_offset: usize,
    content: &'a [u8],
}

impl<'a> Envelope<'a> {
    fn parse(content: &'a [u8]) -> CodecResult<Self> {
        let rest = content
            .strip_prefix(MAGIC)
            .ok_or_else(|| CodecError::Malformed("missing envelope signature".into()))?;
        let header_len = rest
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| CodecError::Malformed("unterminated envelope header".into()))?;
        let header: EnvelopeHeader = serde_json::from_slice(&rest[..header_len])
            .map_err(|e| CodecError::Malformed(format!("invalid envelope header: {}", e)))?;

        let data_offset = MAGIC.len() + header_len + 1;
        let expected = header
            .frame_length
            .checked_mul(u64::from(header.number_of_frames))
            .ok_or_else(|| CodecError::Malformed("frame layout overflows".into()))?;
        let actual = (content.len() - data_offset) as u64;
        if actual != expected {
            return Err(CodecError::Malformed(format!(
                "pixel data is {} bytes, header describes {}",
                actual, expected
            )));
        }

        Ok(Self {
            header,
            data_offset,
            content,
        })
    }

    fn pixel_data(&self) -> &'a [u8] {
        &self.content[self.data_offset..]
    }

    fn frame_range(&self, frame: u32) -> CodecResult<ByteRange> {
        if frame == 0 || frame > self.header.number_of_frames {
            return Err(CodecError::FrameOutOfRange {
                requested: frame,
                frame_count: self.header.number_of_frames,
            });
        }
        let offset =
            self.data_offset as u64 + u64::from(frame - 1) * self.header.frame_length;
        Ok(ByteRange::new(offset, self.header.frame_length))
    }

    fn frame(&self, frame: u32) -> CodecResult<&'a [u8]> {
        let range = self.frame_range(frame)?;
        Ok(&self.content[range.offset as usize..range.end() as usize])
    }

    fn uid(&self, keyword: &str) -> CodecResult<DicomUid> {
        let value = self
            .header
            .dataset
            .get(keyword)
            .and_then(Value::as_str)
            .ok_or_else(|| CodecError::Malformed(format!("missing {}", keyword)))?;
        DicomUid::new(value).map_err(|e| CodecError::Malformed(format!("{}: {}", keyword, e)))
    }

    fn dimension(&self, keyword: &str) -> Option<u64> {
        self.header.dataset.get(keyword).and_then(Value::as_u64)
    }
}

fn encode(header: &EnvelopeHeader, pixel_data: &[u8]) -> CodecResult<Vec<u8>> {
    let header_bytes = serde_json::to_vec(header)
        .map_err(|e| CodecError::Malformed(format!("cannot encode header: {}", e)))?;

    let mut out = Vec::with_capacity(MAGIC.len() + header_bytes.len() + 1 + pixel_data.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&header_bytes);
    out.push(b'\n');
    out.extend_from_slice(pixel_data);
    Ok(out)
}

/// Codec and renderer for the envelope container.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeCodec;

impl EnvelopeCodec {
    pub fn new() -> Self {
        Self
    }

    /// Builds an envelope from a dataset and equally sized frames.
    pub fn encode(
        &self,
        transfer_syntax_uid: &str,
        dataset: Map<String, Value>,
        frames: &[Vec<u8>],
    ) -> CodecResult<Vec<u8>> {
        let frame_length = frames.first().map(|f| f.len()).unwrap_or(0);
        if frames.iter().any(|f| f.len() != frame_length) {
            return Err(CodecError::Malformed(
                "all frames must have the same length".into(),
            ));
        }
        let number_of_frames = u32::try_from(frames.len())
            .map_err(|_| CodecError::Malformed("too many frames".into()))?;

        let header = EnvelopeHeader {
            dataset,
            frame_length: frame_length as u64,
            number_of_frames,
            transfer_syntax_uid: transfer_syntax_uid.to_string(),
        };
        encode(&header, &frames.concat())
    }
}

impl DicomCodec for EnvelopeCodec {
    fn read_instance_uids(&self, content: &[u8]) -> CodecResult<InstanceUids> {
        let envelope = Envelope::parse(content)?;
        Ok(InstanceUids {
            study_instance_uid: envelope.uid(STUDY_INSTANCE_UID)?,
            series_instance_uid: envelope.uid(SERIES_INSTANCE_UID)?,
            sop_instance_uid: envelope.uid(SOP_INSTANCE_UID)?,
        })
    }

    fn transfer_syntax(&self, content: &[u8]) -> CodecResult<String> {
        Ok(Envelope::parse(content)?.header.transfer_syntax_uid)
    }

    fn transcode(&self, content: &[u8], target_uid: &str) -> CodecResult<Vec<u8>> {
        let envelope = Envelope::parse(content)?;
        let source_uid = envelope.header.transfer_syntax_uid.as_str();
        if source_uid == target_uid {
            return Ok(content.to_vec());
        }
        if !(UNCOMPRESSED.contains(&source_uid) && UNCOMPRESSED.contains(&target_uid)) {
            return Err(CodecError::UnsupportedTransferSyntax {
                source_uid: source_uid.to_string(),
                target_uid: target_uid.to_string(),
            });
        }

        let mut header = envelope.header.clone();
        header.transfer_syntax_uid = target_uid.to_string();
        encode(&header, envelope.pixel_data())
    }

    fn frame_count(&self, content: &[u8]) -> CodecResult<u32> {
        Ok(Envelope::parse(content)?.header.number_of_frames)
    }

    fn extract_frame(&self, content: &[u8], frame: u32) -> CodecResult<Vec<u8>> {
        Ok(Envelope::parse(content)?.frame(frame)?.to_vec())
    }

    fn frame_ranges(&self, content: &[u8]) -> CodecResult<Vec<ByteRange>> {
        let envelope = Envelope::parse(content)?;
        (1..=envelope.header.number_of_frames)
            .map(|frame| envelope.frame_range(frame))
            .collect()
    }

    fn read_metadata(&self, content: &[u8]) -> CodecResult<Value> {
        let envelope = Envelope::parse(content)?;
        let mut dataset = envelope.header.dataset;
        dataset.insert(
            "TransferSyntaxUID".into(),
            Value::String(envelope.header.transfer_syntax_uid),
        );
        dataset.insert(
            "NumberOfFrames".into(),
            Value::from(envelope.header.number_of_frames),
        );
        Ok(Value::Object(dataset))
    }

    fn apply_changes(&self, content: &[u8], changes: &Map<String, Value>) -> CodecResult<Vec<u8>> {
        let envelope = Envelope::parse(content)?;

        if let Some(keyword) = changes
            .keys()
            .find(|k| PROTECTED_KEYWORDS.contains(&k.as_str()))
        {
            return Err(CodecError::InvalidChange(format!(
                "{} cannot be changed by an update",
                keyword
            )));
        }

        let mut dataset = envelope.header.dataset.clone();
        for (keyword, value) in changes {
            if value.is_null() {
                dataset.remove(keyword);
            } else {
                dataset.insert(keyword.clone(), value.clone());
            }
        }

        if dataset == envelope.header.dataset {
            return Ok(content.to_vec());
        }

        let mut header = envelope.header.clone();
        header.dataset = dataset;
        encode(&header, envelope.pixel_data())
    }
}

impl Renderer for EnvelopeCodec {
    fn supported_media_types(&self) -> &[&'static str] {
        &[PGM_MEDIA_TYPE]
    }

    /// Renders a binary greymap. `quality` has no effect on this lossless format.
    fn render(
        &self,
        content: &[u8],
        frame: u32,
        media_type: &str,
        _quality: u8,
    ) -> CodecResult<Vec<u8>> {
        if !media_type.eq_ignore_ascii_case(PGM_MEDIA_TYPE) {
            return Err(CodecError::UnsupportedMediaType(media_type.to_string()));
        }

        let envelope = Envelope::parse(content)?;
        let (rows, columns) = match (envelope.dimension("Rows"), envelope.dimension("Columns")) {
            (Some(rows), Some(columns)) => (rows, columns),
            _ => return Err(CodecError::Render("instance has no image dimensions".into())),
        };
        if rows.checked_mul(columns) != Some(envelope.header.frame_length) {
            return Err(CodecError::Render(format!(
                "{}x{} does not match frame length {}",
                columns, rows, envelope.header.frame_length
            )));
        }

        let pixels = envelope.frame(frame)?;
        let mut out = format!("P5\n{} {}\n255\n", columns, rows).into_bytes();
        out.extend_from_slice(pixels);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::JPEG_2000_LOSSLESS;
    use serde_json::json;

    fn dataset() -> Map<String, Value> {
        let Value::Object(map) = json!({
            "StudyInstanceUID": "1.2.3",
            "SeriesInstanceUID": "1.2.3.4",
            "SOPInstanceUID": "1.2.3.4.5",
            "PatientName": "Doe^Jane",
            "Rows": 2,
            "Columns": 2,
        }) else {
            unreachable!()
        };
        map
    }

    fn two_frames() -> Vec<u8> {
        EnvelopeCodec
            .encode(
                EXPLICIT_VR_LITTLE_ENDIAN,
                dataset(),
                &[vec![1, 2, 3, 4], vec![5, 6, 7, 8]],
            )
            .unwrap()
    }

    #[test]
    fn test_reads_identity_and_layout() {
        let content = two_frames();
        let uids = EnvelopeCodec.read_instance_uids(&content).unwrap();
        assert_eq!(uids.sop_instance_uid.as_str(), "1.2.3.4.5");
        assert_eq!(EnvelopeCodec.frame_count(&content).unwrap(), 2);
        assert_eq!(
            EnvelopeCodec.transfer_syntax(&content).unwrap(),
            EXPLICIT_VR_LITTLE_ENDIAN
        );
    }

    #[test]
    fn test_frame_ranges_match_extracted_frames() {
        let content = two_frames();
        let ranges = EnvelopeCodec.frame_ranges(&content).unwrap();
        assert_eq!(ranges.len(), 2);

        for (i, range) in ranges.iter().enumerate() {
            let slice = &content[range.offset as usize..range.end() as usize];
            let frame = EnvelopeCodec.extract_frame(&content, i as u32 + 1).unwrap();
            assert_eq!(slice, frame.as_slice());
        }
    }

    #[test]
    fn test_extract_frame_out_of_range() {
        let content = two_frames();
        assert!(matches!(
            EnvelopeCodec.extract_frame(&content, 0),
            Err(CodecError::FrameOutOfRange { requested: 0, .. })
        ));
        assert!(matches!(
            EnvelopeCodec.extract_frame(&content, 3),
            Err(CodecError::FrameOutOfRange {
                requested: 3,
                frame_count: 2
            })
        ));
    }

    #[test]
    fn test_apply_changes_keeps_pixel_data() {
        let content = two_frames();
        let Value::Object(changes) = json!({"PatientName": "New^PatientName", "PatientID": null})
        else {
            unreachable!()
        };

        let updated = EnvelopeCodec.apply_changes(&content, &changes).unwrap();
        let metadata = EnvelopeCodec.read_metadata(&updated).unwrap();
        assert_eq!(metadata["PatientName"], "New^PatientName");
        assert_eq!(
            EnvelopeCodec.extract_frame(&updated, 2).unwrap(),
            vec![5, 6, 7, 8]
        );

        let again = EnvelopeCodec.apply_changes(&updated, &changes).unwrap();
        assert_eq!(again, updated);
    }

    #[test]
    fn test_apply_changes_rejects_identity_edits() {
        let content = two_frames();
        let Value::Object(changes) = json!({"SOPInstanceUID": "9.9"}) else {
            unreachable!()
        };
        assert!(matches!(
            EnvelopeCodec.apply_changes(&content, &changes),
            Err(CodecError::InvalidChange(_))
        ));
    }

    #[test]
    fn test_transcode_between_uncompressed_syntaxes() {
        let content = two_frames();
        let implicit = EnvelopeCodec
            .transcode(&content, IMPLICIT_VR_LITTLE_ENDIAN)
            .unwrap();
        assert_eq!(
            EnvelopeCodec.transfer_syntax(&implicit).unwrap(),
            IMPLICIT_VR_LITTLE_ENDIAN
        );
        assert_eq!(
            EnvelopeCodec.extract_frame(&implicit, 1).unwrap(),
            vec![1, 2, 3, 4]
        );

        let same = EnvelopeCodec
            .transcode(&content, EXPLICIT_VR_LITTLE_ENDIAN)
            .unwrap();
        assert_eq!(same, content);

        assert!(matches!(
            EnvelopeCodec.transcode(&content, JPEG_2000_LOSSLESS),
            Err(CodecError::UnsupportedTransferSyntax { .. })
        ));
    }

    #[test]
    fn test_render_greymap() {
        let content = two_frames();
        let rendered = EnvelopeCodec.render(&content, 2, PGM_MEDIA_TYPE, 90).unwrap();
        assert_eq!(rendered, b"P5\n2 2\n255\n\x05\x06\x07\x08".to_vec());

        assert!(matches!(
            EnvelopeCodec.render(&content, 1, "image/jpeg", 90),
            Err(CodecError::UnsupportedMediaType(_))
        ));
    }

    #[test]
    fn test_malformed_content_is_rejected() {
        assert!(matches!(
            EnvelopeCodec.frame_count(b"not an envelope"),
            Err(CodecError::Malformed(_))
        ));
    }
}
