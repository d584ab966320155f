//! # API REST
//!
//! REST API implementation for dicomstore.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI documentation served at `/api-docs/openapi.json`
//! - REST-specific concerns (Accept negotiation, multipart frame bodies, JSON error bodies, CORS)
//!
//! All behaviour lives in `dicomstore-core`; handlers only translate between HTTP and the
//! core service methods.

#![warn(rust_2018_idioms)]

mod dto;
mod error;

pub use dto::{
    BulkUpdateReq, HealthRes, OperationAcceptedRes, OperationRes, StoredInstanceRes,
    StudyProgressRes,
};
pub use error::{ApiError, ErrorRes};

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use dicomstore_core::codec::{AcceptHeader, TransferSyntaxRequest};
use dicomstore_core::constants::{
    DICOM_JSON_MEDIA_TYPE, DICOM_MEDIA_TYPE, EXPLICIT_VR_LITTLE_ENDIAN, OCTET_STREAM_MEDIA_TYPE,
    WILDCARD_TRANSFER_SYNTAX,
};
use dicomstore_core::retrieve::{
    RetrieveFramesRequest, RetrieveInstanceRequest, RetrieveRenderedRequest,
};
use dicomstore_core::update::{ChangeDataset, UpdateOperationInput};
use dicomstore_core::{CoreError, Services};
use dicomstore_types::{DicomUid, InstanceIdentifier, OperationId, PartitionKey};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use utoipa::{IntoParams, OpenApi};

/// Application state shared across REST API handlers
#[derive(Clone)]
struct AppState {
    services: Services,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        store_instance,
        bulk_update,
        study_metadata,
        retrieve_instance,
        instance_metadata,
        retrieve_frames,
        retrieve_rendered,
        operation_status,
        cancel_operation,
    ),
    components(schemas(
        HealthRes,
        StoredInstanceRes,
        BulkUpdateReq,
        OperationAcceptedRes,
        OperationRes,
        StudyProgressRes,
        ErrorRes,
    ))
)]
struct ApiDoc;

/// The OpenAPI document describing every route.
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

/// Builds the REST router over `services`.
///
/// `max_body_bytes` bounds uploaded instance payloads.
pub fn router(services: Services, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/studies", post(store_instance))
        .route("/studies/$bulkUpdate", post(bulk_update))
        .route("/studies/:study/metadata", get(study_metadata))
        .route(
            "/studies/:study/series/:series/instances/:sop",
            get(retrieve_instance),
        )
        .route(
            "/studies/:study/series/:series/instances/:sop/metadata",
            get(instance_metadata),
        )
        .route(
            "/studies/:study/series/:series/instances/:sop/frames/:frames",
            get(retrieve_frames),
        )
        .route(
            "/studies/:study/series/:series/instances/:sop/rendered",
            get(retrieve_rendered),
        )
        .route("/operations/:id", get(operation_status))
        .route("/operations/:id/cancel", post(cancel_operation))
        .route("/api-docs/openapi.json", get(openapi_json))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(CorsLayer::permissive())
        .with_state(AppState { services })
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct PartitionQuery {
    /// Data partition (default 1)
    partition: Option<i64>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct RetrieveQuery {
    /// Data partition (default 1)
    partition: Option<i64>,
    /// Read the version from before the first update
    original: Option<bool>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct RenderedQuery {
    /// Data partition (default 1)
    partition: Option<i64>,
    /// 1-based frame to render (default 1)
    frame: Option<u32>,
    /// Rendering quality, 1-100
    quality: Option<u8>,
}

fn partition(value: Option<i64>) -> Result<PartitionKey, ApiError> {
    Ok(value.map(PartitionKey::new).transpose()?.unwrap_or_default())
}

fn instance_id(
    partition_key: PartitionKey,
    study: &str,
    series: &str,
    sop: &str,
) -> Result<InstanceIdentifier, ApiError> {
    Ok(InstanceIdentifier::parse(partition_key, study, series, sop)?)
}

/// Transfer syntax requested through `Accept` for `media_type`.
///
/// Without an `Accept` header, or when the matching entry names no transfer syntax,
/// `default` applies.
fn requested_transfer_syntax(
    headers: &HeaderMap,
    media_type: &str,
    default: &str,
) -> Result<TransferSyntaxRequest, ApiError> {
    let Some(accept) = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
    else {
        return Ok(TransferSyntaxRequest::parse(default));
    };

    let entries = AcceptHeader::parse_list(accept);
    let matching = entries
        .iter()
        .find(|a| a.media_type == media_type || a.media_type == "*/*")
        .ok_or_else(|| CoreError::UnsupportedAcceptType(accept.to_string()))?;

    Ok(TransferSyntaxRequest::parse(
        matching.transfer_syntax.as_deref().unwrap_or(default),
    ))
}

fn parse_frames(frames: &str) -> Result<Vec<u32>, ApiError> {
    frames
        .split(',')
        .map(|f| {
            f.trim().parse::<u32>().map_err(|_| {
                ApiError(CoreError::InvalidInput(format!(
                    "invalid frame number '{}'",
                    f
                )))
            })
        })
        .collect()
}

fn multipart_frames(frames: Vec<Vec<u8>>, transfer_syntax_uid: &str) -> Response {
    let boundary = uuid::Uuid::new_v4().simple().to_string();
    let mut body = Vec::new();
    for frame in frames {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Type: {}; transfer-syntax={}\r\n\r\n",
                boundary, OCTET_STREAM_MEDIA_TYPE, transfer_syntax_uid
            )
            .as_bytes(),
        );
        body.extend_from_slice(&frame);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());

    (
        [(
            header::CONTENT_TYPE,
            format!(
                "multipart/related; type=\"{}\"; boundary={}",
                OCTET_STREAM_MEDIA_TYPE, boundary
            ),
        )],
        body,
    )
        .into_response()
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint for the REST API
async fn health() -> Json<HealthRes> {
    Json(HealthRes {
        ok: true,
        message: "dicomstore REST API is alive".into(),
    })
}

#[utoipa::path(
    post,
    path = "/studies",
    params(PartitionQuery),
    request_body(content = Vec<u8>, content_type = "application/dicom"),
    responses(
        (status = 201, description = "Instance stored", body = StoredInstanceRes),
        (status = 409, description = "Instance already stored", body = ErrorRes),
        (status = 422, description = "Payload could not be decoded", body = ErrorRes)
    )
)]
/// Store a new instance
///
/// The instance is written as version 1 and indexed under the UIDs read from its payload.
async fn store_instance(
    State(state): State<AppState>,
    Query(query): Query<PartitionQuery>,
    body: Bytes,
) -> Result<(StatusCode, Json<StoredInstanceRes>), ApiError> {
    let partition_key = partition(query.partition)?;
    let metadata = state.services.store.store(partition_key, &body).await?;
    Ok((StatusCode::CREATED, Json(StoredInstanceRes::from(&metadata))))
}

#[utoipa::path(
    post,
    path = "/studies/$bulkUpdate",
    params(PartitionQuery),
    request_body = BulkUpdateReq,
    responses(
        (status = 202, description = "Update operation accepted", body = OperationAcceptedRes),
        (status = 400, description = "Invalid update request", body = ErrorRes)
    )
)]
/// Submit a bulk metadata update
///
/// The operation runs in the background; poll `/operations/{id}` for progress.
async fn bulk_update(
    State(state): State<AppState>,
    Query(query): Query<PartitionQuery>,
    Json(req): Json<BulkUpdateReq>,
) -> Result<(StatusCode, Json<OperationAcceptedRes>), ApiError> {
    let partition_key = partition(query.partition)?;
    let studies = req
        .study_instance_uids
        .iter()
        .map(DicomUid::new)
        .collect::<Result<Vec<_>, _>>()?;
    let changes = match req.change_dataset {
        serde_json::Value::Object(map) => ChangeDataset::new(map)?,
        _ => {
            return Err(ApiError(CoreError::InvalidInput(
                "change_dataset must be a JSON object".into(),
            )))
        }
    };

    let input = UpdateOperationInput::new(partition_key, studies, changes)?;
    let operation_id = state.services.operations.submit_update(input).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(OperationAcceptedRes::new(operation_id)),
    ))
}

#[utoipa::path(
    get,
    path = "/studies/{study}/metadata",
    params(("study" = String, Path, description = "Study instance UID"), RetrieveQuery),
    responses(
        (status = 200, description = "Metadata of every instance in the study", body = Vec<Object>),
        (status = 404, description = "Study not found", body = ErrorRes)
    )
)]
/// Retrieve decoded metadata of every instance in a study
async fn study_metadata(
    State(state): State<AppState>,
    Path(study): Path<String>,
    Query(query): Query<RetrieveQuery>,
) -> Result<Response, ApiError> {
    let partition_key = partition(query.partition)?;
    let study = DicomUid::new(&study)?;
    let metadata = state
        .services
        .retrieve
        .retrieve_study_metadata(partition_key, &study, query.original.unwrap_or(false))
        .await?;
    Ok(([(header::CONTENT_TYPE, DICOM_JSON_MEDIA_TYPE)], Json(metadata)).into_response())
}

#[utoipa::path(
    get,
    path = "/studies/{study}/series/{series}/instances/{sop}",
    params(
        ("study" = String, Path, description = "Study instance UID"),
        ("series" = String, Path, description = "Series instance UID"),
        ("sop" = String, Path, description = "SOP instance UID"),
        RetrieveQuery
    ),
    responses(
        (status = 200, description = "Instance payload", content_type = "application/dicom"),
        (status = 404, description = "Instance not found", body = ErrorRes),
        (status = 406, description = "Too large or transfer syntax not supported", body = ErrorRes)
    )
)]
/// Retrieve a whole instance
///
/// `Accept: application/dicom; transfer-syntax=<uid>` selects the encoding; `*` returns the
/// stored bytes. Without a transfer syntax, explicit VR little endian is returned.
async fn retrieve_instance(
    State(state): State<AppState>,
    Path((study, series, sop)): Path<(String, String, String)>,
    Query(query): Query<RetrieveQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let instance = instance_id(partition(query.partition)?, &study, &series, &sop)?;
    let transfer_syntax =
        requested_transfer_syntax(&headers, DICOM_MEDIA_TYPE, EXPLICIT_VR_LITTLE_ENDIAN)?;

    let response = state
        .services
        .retrieve
        .retrieve_instance(&RetrieveInstanceRequest {
            instance,
            transfer_syntax,
            want_original: query.original.unwrap_or(false),
        })
        .await?;

    Ok((
        [(
            header::CONTENT_TYPE,
            format!(
                "{}; transfer-syntax={}",
                response.media_type, response.transfer_syntax_uid
            ),
        )],
        response.content,
    )
        .into_response())
}

#[utoipa::path(
    get,
    path = "/studies/{study}/series/{series}/instances/{sop}/metadata",
    params(
        ("study" = String, Path, description = "Study instance UID"),
        ("series" = String, Path, description = "Series instance UID"),
        ("sop" = String, Path, description = "SOP instance UID"),
        RetrieveQuery
    ),
    responses(
        (status = 200, description = "Decoded instance metadata", body = Object),
        (status = 404, description = "Instance not found", body = ErrorRes)
    )
)]
/// Retrieve decoded metadata of one instance
async fn instance_metadata(
    State(state): State<AppState>,
    Path((study, series, sop)): Path<(String, String, String)>,
    Query(query): Query<RetrieveQuery>,
) -> Result<Response, ApiError> {
    let instance = instance_id(partition(query.partition)?, &study, &series, &sop)?;
    let metadata = state
        .services
        .retrieve
        .retrieve_instance_metadata(&instance, query.original.unwrap_or(false))
        .await?;
    Ok(([(header::CONTENT_TYPE, DICOM_JSON_MEDIA_TYPE)], Json(metadata)).into_response())
}

#[utoipa::path(
    get,
    path = "/studies/{study}/series/{series}/instances/{sop}/frames/{frames}",
    params(
        ("study" = String, Path, description = "Study instance UID"),
        ("series" = String, Path, description = "Series instance UID"),
        ("sop" = String, Path, description = "SOP instance UID"),
        ("frames" = String, Path, description = "Comma separated 1-based frame numbers"),
        RetrieveQuery
    ),
    responses(
        (status = 200, description = "Frame bytes; multipart/related for several frames"),
        (status = 404, description = "Instance or frame not found", body = ErrorRes),
        (status = 406, description = "Too large or transfer syntax not supported", body = ErrorRes)
    )
)]
/// Retrieve one or more frames
async fn retrieve_frames(
    State(state): State<AppState>,
    Path((study, series, sop, frames)): Path<(String, String, String, String)>,
    Query(query): Query<RetrieveQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let instance = instance_id(partition(query.partition)?, &study, &series, &sop)?;
    let transfer_syntax =
        requested_transfer_syntax(&headers, OCTET_STREAM_MEDIA_TYPE, WILDCARD_TRANSFER_SYNTAX)?;

    let mut response = state
        .services
        .retrieve
        .retrieve_frames(&RetrieveFramesRequest {
            instance,
            frames: parse_frames(&frames)?,
            transfer_syntax,
            want_original: query.original.unwrap_or(false),
        })
        .await?;

    if response.frames.len() == 1 {
        let frame = response.frames.remove(0);
        return Ok((
            [(
                header::CONTENT_TYPE,
                format!(
                    "{}; transfer-syntax={}",
                    OCTET_STREAM_MEDIA_TYPE, response.transfer_syntax_uid
                ),
            )],
            frame,
        )
            .into_response());
    }
    Ok(multipart_frames(response.frames, &response.transfer_syntax_uid))
}

#[utoipa::path(
    get,
    path = "/studies/{study}/series/{series}/instances/{sop}/rendered",
    params(
        ("study" = String, Path, description = "Study instance UID"),
        ("series" = String, Path, description = "Series instance UID"),
        ("sop" = String, Path, description = "SOP instance UID"),
        RenderedQuery
    ),
    responses(
        (status = 200, description = "Rendered image in the negotiated media type"),
        (status = 404, description = "Instance not found", body = ErrorRes),
        (status = 406, description = "Too large to render or no acceptable media type", body = ErrorRes)
    )
)]
/// Render a frame of the current version
async fn retrieve_rendered(
    State(state): State<AppState>,
    Path((study, series, sop)): Path<(String, String, String)>,
    Query(query): Query<RenderedQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let instance = instance_id(partition(query.partition)?, &study, &series, &sop)?;
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("*/*");

    let response = state
        .services
        .retrieve
        .retrieve_rendered(&RetrieveRenderedRequest {
            instance,
            accept: AcceptHeader::parse_list(accept),
            frame: query.frame,
            quality: query.quality,
        })
        .await?;

    Ok(([(header::CONTENT_TYPE, response.media_type)], response.content).into_response())
}

#[utoipa::path(
    get,
    path = "/operations/{id}",
    params(("id" = String, Path, description = "Operation id")),
    responses(
        (status = 200, description = "Operation status", body = OperationRes),
        (status = 404, description = "Operation not found", body = ErrorRes)
    )
)]
/// Get the status of an update operation
async fn operation_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OperationRes>, ApiError> {
    let id = OperationId::parse(&id)?;
    let job = state.services.operations.get_operation_status(id).await?;
    Ok(Json(OperationRes::from(&job)))
}

#[utoipa::path(
    post,
    path = "/operations/{id}/cancel",
    params(("id" = String, Path, description = "Operation id")),
    responses(
        (status = 200, description = "Cancellation requested", body = OperationRes),
        (status = 404, description = "Operation not found", body = ErrorRes),
        (status = 409, description = "Operation already finished", body = ErrorRes)
    )
)]
/// Cancel an update operation
async fn cancel_operation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OperationRes>, ApiError> {
    let id = OperationId::parse(&id)?;
    let job = state.services.operations.cancel_operation(id).await?;
    Ok(Json(OperationRes::from(&job)))
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(openapi())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use dicomstore_core::codec::EnvelopeCodec;
    use dicomstore_core::CoreConfig;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_router() -> (TempDir, Router) {
        let temp_dir = TempDir::new().unwrap();
        let cfg = CoreConfig::with_defaults(temp_dir.path().to_path_buf()).unwrap();
        let services = Services::open(&cfg).unwrap();
        (temp_dir, router(services, 1024 * 1024))
    }

    fn instance_body() -> Vec<u8> {
        let Value::Object(dataset) = json!({
            "StudyInstanceUID": "1.2.3",
            "SeriesInstanceUID": "1.2.3.4",
            "SOPInstanceUID": "1.2.3.4.5",
            "PatientName": "Doe^John",
            "Rows": 1,
            "Columns": 2,
        }) else {
            unreachable!()
        };
        EnvelopeCodec::new()
            .encode(EXPLICIT_VR_LITTLE_ENDIAN, dataset, &[vec![9, 8], vec![7, 6]])
            .unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes().to_vec();
        (status, headers, body)
    }

    async fn store(app: &Router) {
        let (status, _, _) = send(
            app,
            Request::post("/studies")
                .header(header::CONTENT_TYPE, DICOM_MEDIA_TYPE)
                .body(Body::from(instance_body()))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_health() {
        let (_tmp, app) = test_router();
        let (status, _, body) = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn test_store_and_retrieve_instance() {
        let (_tmp, app) = test_router();
        store(&app).await;

        let (status, headers, body) = send(
            &app,
            Request::get("/studies/1.2.3/series/1.2.3.4/instances/1.2.3.4.5")
                .header(header::ACCEPT, "application/dicom; transfer-syntax=*")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, instance_body());
        assert!(headers[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with(DICOM_MEDIA_TYPE));

        let (status, _, _) = send(
            &app,
            Request::post("/studies")
                .body(Body::from(instance_body()))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_unsupported_transfer_syntax_is_not_acceptable() {
        let (_tmp, app) = test_router();
        store(&app).await;

        let (status, _, body) = send(
            &app,
            Request::get("/studies/1.2.3/series/1.2.3.4/instances/1.2.3.4.5")
                .header(
                    header::ACCEPT,
                    "application/dicom; transfer-syntax=1.2.840.10008.1.2.4.90",
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_ACCEPTABLE);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "unsupported_transfer_syntax");
    }

    #[tokio::test]
    async fn test_frames_single_and_multipart() {
        let (_tmp, app) = test_router();
        store(&app).await;

        let (status, _, body) = send(
            &app,
            Request::get("/studies/1.2.3/series/1.2.3.4/instances/1.2.3.4.5/frames/2")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, vec![7, 6]);

        let (status, headers, _) = send(
            &app,
            Request::get("/studies/1.2.3/series/1.2.3.4/instances/1.2.3.4.5/frames/1,2")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("multipart/related"));

        let (status, _, _) = send(
            &app,
            Request::get("/studies/1.2.3/series/1.2.3.4/instances/1.2.3.4.5/frames/3")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_rendered_negotiation() {
        let (_tmp, app) = test_router();
        store(&app).await;

        let (status, headers, _) = send(
            &app,
            Request::get("/studies/1.2.3/series/1.2.3.4/instances/1.2.3.4.5/rendered")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "image/x-portable-graymap");

        let (status, _, _) = send(
            &app,
            Request::get("/studies/1.2.3/series/1.2.3.4/instances/1.2.3.4.5/rendered")
                .header(header::ACCEPT, "image/jpeg")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_ACCEPTABLE);
    }

    #[tokio::test]
    async fn test_bulk_update_and_operation_status() {
        let (_tmp, app) = test_router();
        store(&app).await;

        let (status, _, body) = send(
            &app,
            Request::post("/studies/$bulkUpdate")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({
                        "study_instance_uids": ["1.2.3"],
                        "change_dataset": {"PatientName": "New^PatientName"}
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let accepted: Value = serde_json::from_slice(&body).unwrap();
        let id = accepted["operation_id"].as_str().unwrap().to_string();

        let (status, _, body) = send(
            &app,
            Request::get(format!("/operations/{}", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let operation: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(operation["status"], "not_started");
        assert_eq!(operation["studies"][0]["state"], "pending");

        let (status, _, body) = send(
            &app,
            Request::post(format!("/operations/{}/cancel", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let operation: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(operation["status"], "canceled");
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let (_tmp, app) = test_router();

        let (status, _, _) = send(
            &app,
            Request::get("/studies/not-a-uid/metadata")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = send(
            &app,
            Request::get("/operations/not-an-id")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = send(
            &app,
            Request::get("/studies/1.2.3/metadata")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_openapi_lists_routes() {
        let doc = serde_json::to_value(openapi()).unwrap();
        assert!(doc["paths"]["/studies/$bulkUpdate"].is_object());
        assert!(doc["paths"]["/operations/{id}"].is_object());
    }
}
