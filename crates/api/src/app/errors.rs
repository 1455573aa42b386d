use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use animforge_processing::ProcessingError;

pub fn processing_error_to_response(err: ProcessingError) -> axum::response::Response {
    let status = match &err {
        ProcessingError::InvalidSettings(_) => StatusCode::BAD_REQUEST,
        ProcessingError::InvalidReference(_) => StatusCode::NOT_FOUND,
        ProcessingError::AssetMissing(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ProcessingError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        ProcessingError::NotFound(_) => StatusCode::NOT_FOUND,
        ProcessingError::NotReady { .. } => StatusCode::CONFLICT,
        ProcessingError::Gone(_) => StatusCode::GONE,
        ProcessingError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    json_error(status, err.code(), err.to_string())
}

/// Malformed request bodies get the same `{error, message}` shape as every
/// other failure.
pub fn json_rejection_to_response(rejection: JsonRejection) -> axum::response::Response {
    let status = match &rejection {
        JsonRejection::MissingJsonContentType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        _ => StatusCode::BAD_REQUEST,
    };
    json_error(status, "invalid_request", rejection.body_text())
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
