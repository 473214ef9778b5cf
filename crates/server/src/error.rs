//! Application error handling

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ehr_core::{FhirError, IssueType, OperationOutcome};

/// Application error type
#[derive(Debug)]
pub enum AppError {
    /// Error raised by the core (ledger, search, patch)
    Fhir(FhirError),
    BadRequest(String),
    UnsupportedMediaType(String),
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Fhir(err) => fhir_status(err),
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn fhir_status(err: &FhirError) -> StatusCode {
    match err {
        FhirError::NotFound(_) => StatusCode::NOT_FOUND,
        FhirError::Gone(_) => StatusCode::GONE,
        FhirError::VersionConflict { .. } | FhirError::AlreadyExists(_) => StatusCode::CONFLICT,
        FhirError::MalformedPatch { .. }
        | FhirError::InvalidSearchParam { .. }
        | FhirError::Invalid(_) => StatusCode::BAD_REQUEST,
        FhirError::PathNotFound { .. }
        | FhirError::TestFailed { .. }
        | FhirError::TypeMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        FhirError::Cancelled(_) => StatusCode::SERVICE_UNAVAILABLE,
        FhirError::StorageUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let outcome = match &self {
            AppError::Fhir(err) => OperationOutcome::from(err),
            AppError::BadRequest(msg) => OperationOutcome::invalid(msg).with_error_code("invalid"),
            AppError::UnsupportedMediaType(msg) => {
                OperationOutcome::error(IssueType::NotSupported, msg)
                    .with_error_code("unsupported-media-type")
            }
            AppError::Internal(msg) => OperationOutcome::error(IssueType::Exception, msg)
                .with_error_code("storage-unavailable"),
        };

        let code = outcome.error_code().unwrap_or("-");
        if status.is_server_error() {
            tracing::error!(status = %status, code, error = ?self, "Request failed");
        } else {
            tracing::debug!(status = %status, code, "Request rejected");
        }

        (status, Json(outcome)).into_response()
    }
}

impl From<FhirError> for AppError {
    fn from(err: FhirError) -> Self {
        AppError::Fhir(err)
    }
}

impl From<deadpool_postgres::PoolError> for AppError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        AppError::Internal(format!("Database pool error: {}", err))
    }
}

impl From<tokio_postgres::Error> for AppError {
    fn from(err: tokio_postgres::Error) -> Self {
        AppError::Internal(format!("Database error: {}", err))
    }
}
