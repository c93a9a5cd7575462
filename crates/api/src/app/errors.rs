use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use imagegen_infra::{IntakeError, LookupError};

pub fn intake_error_to_response(err: IntakeError) -> axum::response::Response {
    match err {
        IntakeError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_input", msg),
        IntakeError::Create(ref source) => {
            tracing::error!(error = %source, "generation intake failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", err.to_string())
        }
    }
}

pub fn lookup_error_to_response(err: LookupError) -> axum::response::Response {
    match err {
        LookupError::InvalidInput(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_input", msg),
        LookupError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", err.to_string()),
        LookupError::Store(e) => {
            tracing::error!(error = %e, "generation lookup failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
