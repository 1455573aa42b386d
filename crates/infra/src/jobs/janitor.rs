//! Periodic housekeeping: expired leases, old job records, stale outputs.

use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::artifacts::ArtifactStore;
use crate::config::PipelineConfig;

use super::scheduler::JobScheduler;

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

#[derive(Debug, Clone)]
pub struct JanitorConfig {
    pub interval: Duration,
    /// Terminal records older than this are purged.
    pub job_retention: Duration,
    /// Unpinned outputs older than this are swept.
    pub output_ttl: Duration,
}

impl JanitorConfig {
    pub fn from_pipeline(config: &PipelineConfig) -> Self {
        Self {
            interval: config.janitor_interval(),
            job_retention: config.job_retention(),
            output_ttl: config.output_ttl(),
        }
    }
}

/// What one pass cleaned up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JanitorReport {
    pub reclaimed: usize,
    pub purged: usize,
    pub swept: usize,
}

impl JanitorReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub struct Janitor {
    scheduler: JobScheduler,
    store: Arc<dyn ArtifactStore>,
    config: JanitorConfig,
}

impl Janitor {
    pub fn new(scheduler: JobScheduler, store: Arc<dyn ArtifactStore>, config: JanitorConfig) -> Self {
        Self {
            scheduler,
            store,
            config,
        }
    }

    /// Run a single housekeeping pass.
    pub fn run_once(&self) -> JanitorReport {
        let reclaimed = self.scheduler.reclaim_expired_leases();

        let now = Utc::now();
        let purged = match chrono::Duration::from_std(self.config.job_retention) {
            Ok(retention) => self.scheduler.purge_finished(now - retention).len(),
            Err(_) => 0,
        };

        let swept = match self.store.sweep(now, self.config.output_ttl) {
            Ok(swept) => swept.len(),
            Err(err) => {
                warn!(error = %err, "artifact sweep failed");
                0
            }
        };

        JanitorReport {
            reclaimed,
            purged,
            swept,
        }
    }

    /// Run passes every `config.interval` on a background thread.
    pub fn spawn(self) -> std::io::Result<WorkerHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let join = thread::Builder::new()
            .name("janitor".to_string())
            .spawn(move || self.run(shutdown_rx))?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }

    fn run(self, shutdown_rx: mpsc::Receiver<()>) {
        debug!(interval_ms = self.config.interval.as_millis() as u64, "janitor started");
        loop {
            match shutdown_rx.recv_timeout(self.config.interval) {
                Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                Err(mpsc::RecvTimeoutError::Timeout) => {}
            }

            let report = self.run_once();
            if !report.is_empty() {
                info!(
                    reclaimed = report.reclaimed,
                    purged = report.purged,
                    swept = report.swept,
                    "janitor pass"
                );
            }
        }
        debug!("janitor stopped");
    }
}
