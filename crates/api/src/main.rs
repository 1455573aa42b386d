use std::sync::Arc;

use anyhow::Context;

use animforge_infra::config::PipelineConfig;

const BIND_VAR: &str = "ANIMFORGE_BIND";
const DEFAULT_BIND: &str = "0.0.0.0:8080";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    animforge_observability::init();

    let config = PipelineConfig::load().context("loading pipeline configuration")?;
    tracing::info!(
        workers = config.workers,
        caller_quota = config.caller_quota,
        job_timeout_ms = config.job_timeout_ms,
        "pipeline configured"
    );

    let services = Arc::new(animforge_api::app::services::build_services(&config)?);
    let app = animforge_api::app::build_app(services.clone());

    let bind = std::env::var(BIND_VAR).unwrap_or_else(|_| DEFAULT_BIND.to_string());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    // Joining worker threads blocks; keep it off the runtime.
    tokio::task::spawn_blocking(move || services.shutdown()).await?;
    Ok(())
}
