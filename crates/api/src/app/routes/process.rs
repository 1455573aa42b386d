use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, rejection::JsonRejection},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};

use animforge_core::JobId;
use animforge_infra::jobs::JobState;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::CallerContext;

pub fn router() -> Router {
    Router::new()
        .route("/apply-animation", post(apply_animation))
        .route("/status/:job_id", get(get_status))
        .route("/:job_id/cancel", post(cancel_job))
        .route("/download/:job_id", get(get_download))
        .route("/download/:job_id/content", get(get_download_content))
        .route("/jobs", get(list_jobs))
}

fn parse_job_id(raw: &str) -> Result<JobId, axum::response::Response> {
    raw.parse::<JobId>().map_err(|_| {
        errors::json_error(StatusCode::NOT_FOUND, "not_found", format!("job not found: {raw}"))
    })
}

pub async fn apply_animation(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    body: Result<Json<dto::ApplyAnimationRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::json_rejection_to_response(rejection),
    };
    let settings = match body.settings() {
        Ok(settings) => settings,
        Err(e) => return errors::processing_error_to_response(e),
    };

    match services.processing().submit_with_priority(
        &body.character_id,
        &body.animation_id,
        settings,
        body.priority,
        caller.caller_id(),
    ) {
        Ok(job_id) => (
            StatusCode::ACCEPTED,
            Json(dto::SubmittedResponse {
                job_id,
                state: JobState::Queued,
            }),
        )
            .into_response(),
        Err(e) => errors::processing_error_to_response(e),
    }
}

pub async fn get_status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let job_id = match parse_job_id(&job_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.processing().status(job_id, caller.caller_id()) {
        Ok(status) => Json(status).into_response(),
        Err(e) => errors::processing_error_to_response(e),
    }
}

pub async fn cancel_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let job_id = match parse_job_id(&job_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.processing().cancel(job_id, caller.caller_id()) {
        Ok(status) => Json(status).into_response(),
        Err(e) => errors::processing_error_to_response(e),
    }
}

pub async fn get_download(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let job_id = match parse_job_id(&job_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.processing().fetch_result(job_id, caller.caller_id()) {
        Ok(locator) => Json(locator).into_response(),
        Err(e) => errors::processing_error_to_response(e),
    }
}

pub async fn get_download_content(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let job_id = match parse_job_id(&job_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let processing = services.processing();
    let locator = match processing.fetch_result(job_id, caller.caller_id()) {
        Ok(locator) => locator,
        Err(e) => return errors::processing_error_to_response(e),
    };

    // Filesystem reads stay off the async workers.
    let service = processing.clone();
    let caller_id = caller.caller_id().clone();
    let bytes = match tokio::task::spawn_blocking(move || service.open_result(job_id, &caller_id)).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => return errors::processing_error_to_response(e),
        Err(e) => {
            return errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", e.to_string());
        }
    };

    (
        [
            (header::CONTENT_TYPE, locator.content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", locator.filename),
            ),
        ],
        bytes,
    )
        .into_response()
}

pub async fn list_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
) -> axum::response::Response {
    Json(services.processing().list_jobs(caller.caller_id())).into_response()
}
