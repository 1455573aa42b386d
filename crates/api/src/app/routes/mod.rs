use axum::{Router, routing::get};

pub mod process;
pub mod system;

/// Router for all caller-scoped endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/process", process::router())
}
