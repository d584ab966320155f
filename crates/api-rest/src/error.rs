use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use dicomstore_core::CoreError;
use dicomstore_types::UidError;
use serde::Serialize;
use utoipa::ToSchema;

/// Error body returned by every failing endpoint.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorRes {
    /// Stable machine-readable error kind
    pub error: String,
    /// Human-readable description
    pub message: String,
}

/// Handler error: a core error rendered as a status code plus [`ErrorRes`].
#[derive(Debug)]
pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(error: CoreError) -> Self {
        ApiError(error)
    }
}

impl From<UidError> for ApiError {
    fn from(error: UidError) -> Self {
        ApiError(CoreError::Uid(error))
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            CoreError::InvalidInput(_) | CoreError::Uid(_) => StatusCode::BAD_REQUEST,
            CoreError::PayloadTooLarge { .. }
            | CoreError::UnsupportedTransferSyntax { .. }
            | CoreError::UnsupportedAcceptType(_) => StatusCode::NOT_ACCEPTABLE,
            CoreError::InstanceNotFound(_)
            | CoreError::StudyNotFound { .. }
            | CoreError::VersionNotFound(_)
            | CoreError::FrameOutOfRange { .. }
            | CoreError::OperationNotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::Codec(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CoreError::IndexUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::OrchestrationFailed(_)
            | CoreError::Files(_)
            | CoreError::Io(_)
            | CoreError::Serialization(_)
            | CoreError::Deserialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match &self.0 {
            CoreError::InvalidInput(_) => "invalid_input",
            CoreError::Uid(_) => "invalid_identifier",
            CoreError::PayloadTooLarge { .. } => "payload_too_large",
            CoreError::UnsupportedTransferSyntax { .. } => "unsupported_transfer_syntax",
            CoreError::UnsupportedAcceptType(_) => "unsupported_accept_type",
            CoreError::InstanceNotFound(_) => "instance_not_found",
            CoreError::StudyNotFound { .. } => "study_not_found",
            CoreError::VersionNotFound(_) => "version_not_found",
            CoreError::FrameOutOfRange { .. } => "frame_out_of_range",
            CoreError::OperationNotFound(_) => "operation_not_found",
            CoreError::Conflict(_) => "conflict",
            CoreError::Codec(_) => "codec_error",
            CoreError::IndexUnavailable(_) => "index_unavailable",
            _ => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            tracing::error!("request failed: {:?}", self.0);
            "Internal error".to_string()
        } else {
            tracing::debug!("request rejected: {}", self.0);
            self.0.to_string()
        };

        (
            status,
            Json(ErrorRes {
                error: self.kind().to_string(),
                message,
            }),
        )
            .into_response()
    }
}
