use std::sync::{Arc, Mutex};

use anyhow::Context;
use tracing::info;

use animforge_infra::artifacts::{ArtifactStore, FsArtifactStore, InMemoryArtifactStore};
use animforge_infra::catalog::{InMemoryAssetCatalog, seed_demo_catalog};
use animforge_infra::config::PipelineConfig;
use animforge_infra::jobs::{JanitorConfig, WorkerHandle};
use animforge_processing::ProcessingService;

/// Everything the handlers need, plus the background janitor.
pub struct AppServices {
    processing: ProcessingService,
    janitor: Mutex<Option<WorkerHandle>>,
}

impl AppServices {
    pub fn processing(&self) -> &ProcessingService {
        &self.processing
    }

    /// Stop the janitor and the worker pool.
    pub fn shutdown(&self) {
        if let Some(janitor) = self.janitor.lock().unwrap().take() {
            janitor.shutdown();
        }
        self.processing.shutdown();
    }
}

/// Wire the pipeline described by `config` over the demo catalog.
pub fn build_services(config: &PipelineConfig) -> anyhow::Result<AppServices> {
    let store: Arc<dyn ArtifactStore> = match &config.artifact_root {
        Some(root) => {
            info!(root = %root.display(), "using filesystem artifact store");
            Arc::new(
                FsArtifactStore::open(root)
                    .with_context(|| format!("opening artifact store at {}", root.display()))?,
            )
        }
        None => {
            info!("using in-memory artifact store");
            InMemoryArtifactStore::arc()
        }
    };

    let catalog = Arc::new(InMemoryAssetCatalog::new());
    seed_demo_catalog(&catalog, store.as_ref()).context("seeding demo catalog")?;

    let processing = ProcessingService::start(config, catalog, store)?;
    let janitor = processing
        .spawn_janitor(JanitorConfig::from_pipeline(config))
        .context("spawning janitor")?;

    Ok(AppServices {
        processing,
        janitor: Mutex::new(Some(janitor)),
    })
}
