//! Accept header parsing and content negotiation.

use crate::constants::WILDCARD_TRANSFER_SYNTAX;

/// Which encoding a retrieve should return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferSyntaxRequest {
    /// Return the bytes as stored.
    AsStored,
    Uid(String),
}

impl TransferSyntaxRequest {
    /// `*` (or an empty value) means "as stored".
    pub fn parse(value: &str) -> Self {
        let value = value.trim().trim_matches('"');
        if value.is_empty() || value == WILDCARD_TRANSFER_SYNTAX {
            TransferSyntaxRequest::AsStored
        } else {
            TransferSyntaxRequest::Uid(value.to_string())
        }
    }

    /// The target syntax if it differs from `stored_uid`.
    pub fn target_if_different(&self, stored_uid: &str) -> Option<&str> {
        match self {
            TransferSyntaxRequest::Uid(uid) if uid != stored_uid => Some(uid.as_str()),
            _ => None,
        }
    }
}

/// One entry of an `Accept` list.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptHeader {
    pub media_type: String,
    pub quality: f32,
    pub transfer_syntax: Option<String>,
}

impl AcceptHeader {
    pub fn new(media_type: impl Into<String>) -> Self {
        Self {
            media_type: media_type.into(),
            quality: 1.0,
            transfer_syntax: None,
        }
    }

    /// Parses a comma separated `Accept` value.
    ///
    /// Malformed quality values count as `1.0`; empty entries are skipped.
    pub fn parse_list(value: &str) -> Vec<AcceptHeader> {
        value
            .split(',')
            .filter_map(|entry| {
                let mut parts = entry.split(';');
                let media_type = parts.next()?.trim().to_ascii_lowercase();
                if media_type.is_empty() {
                    return None;
                }

                let mut header = AcceptHeader::new(media_type);
                for param in parts {
                    let Some((name, value)) = param.split_once('=') else {
                        continue;
                    };
                    match name.trim().to_ascii_lowercase().as_str() {
                        "q" => {
                            header.quality = value
                                .trim()
                                .parse::<f32>()
                                .ok()
                                .filter(|q| (0.0..=1.0).contains(q))
                                .unwrap_or(1.0);
                        }
                        "transfer-syntax" => {
                            header.transfer_syntax =
                                Some(value.trim().trim_matches('"').to_string());
                        }
                        _ => {}
                    }
                }
                Some(header)
            })
            .collect()
    }

    fn matches(&self, supported: &str) -> bool {
        if self.media_type == "*/*" || self.media_type.eq_ignore_ascii_case(supported) {
            return true;
        }
        match self.media_type.strip_suffix("/*") {
            Some(prefix) => supported
                .split_once('/')
                .map(|(kind, _)| kind.eq_ignore_ascii_case(prefix))
                .unwrap_or(false),
            None => false,
        }
    }
}

/// Picks the media type to produce.
///
/// Entries are tried in descending quality, ties broken by their position in the list; the
/// first entry matching a supported type wins. Entries with quality `0` are never chosen.
pub fn negotiate(accepts: &[AcceptHeader], supported: &[&str]) -> Option<String> {
    let mut ordered: Vec<&AcceptHeader> = accepts.iter().filter(|a| a.quality > 0.0).collect();
    ordered.sort_by(|a, b| b.quality.total_cmp(&a.quality));

    ordered.into_iter().find_map(|accept| {
        supported
            .iter()
            .find(|s| accept.matches(s))
            .map(|s| s.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUPPORTED: &[&str] = &["image/jpeg", "image/x-portable-graymap"];

    #[test]
    fn test_parse_list_reads_quality_and_transfer_syntax() {
        let parsed = AcceptHeader::parse_list(
            "application/dicom; transfer-syntax=1.2.840.10008.1.2.1, image/png;q=0.5",
        );
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].media_type, "application/dicom");
        assert_eq!(
            parsed[0].transfer_syntax.as_deref(),
            Some("1.2.840.10008.1.2.1")
        );
        assert_eq!(parsed[1].quality, 0.5);
    }

    #[test]
    fn test_negotiate_prefers_quality_then_position() {
        let accepts = AcceptHeader::parse_list(
            "image/png, image/jpeg;q=0.4, image/x-portable-graymap;q=0.9",
        );
        assert_eq!(
            negotiate(&accepts, SUPPORTED).as_deref(),
            Some("image/x-portable-graymap")
        );

        let accepts = AcceptHeader::parse_list("image/x-portable-graymap, image/jpeg");
        assert_eq!(
            negotiate(&accepts, SUPPORTED).as_deref(),
            Some("image/x-portable-graymap")
        );
    }

    #[test]
    fn test_negotiate_wildcards_and_rejections() {
        let accepts = AcceptHeader::parse_list("image/*");
        assert_eq!(negotiate(&accepts, SUPPORTED).as_deref(), Some("image/jpeg"));

        let accepts = AcceptHeader::parse_list("image/jpeg;q=0, image/png");
        assert_eq!(negotiate(&accepts, SUPPORTED), None);
    }

    #[test]
    fn test_transfer_syntax_request() {
        assert_eq!(TransferSyntaxRequest::parse("*"), TransferSyntaxRequest::AsStored);
        assert_eq!(TransferSyntaxRequest::parse(""), TransferSyntaxRequest::AsStored);

        let request = TransferSyntaxRequest::parse("\"1.2.840.10008.1.2\"");
        assert_eq!(request.target_if_different("1.2.840.10008.1.2"), None);
        assert_eq!(
            request.target_if_different("1.2.840.10008.1.2.1"),
            Some("1.2.840.10008.1.2")
        );
    }
}
