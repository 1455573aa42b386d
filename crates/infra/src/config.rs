//! Pipeline configuration.
//!
//! Loaded from an optional TOML file (`ANIMFORGE_CONFIG`, default
//! `animforge.toml`); every field has a default. `ANIMFORGE_*` environment
//! variables take precedence over the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::jobs::RetryPolicy;

pub const CONFIG_PATH_VAR: &str = "ANIMFORGE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "animforge.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Worker pool size.
    pub workers: usize,
    /// Retries after the first attempt for transient failures.
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    /// Wall-clock limit of a single attempt.
    pub job_timeout_ms: u64,
    /// Concurrent non-terminal jobs allowed per caller.
    pub caller_quota: usize,
    /// How long terminal job records (and their outputs) stay retrievable.
    pub job_retention_secs: u64,
    /// Minimum age before an unpinned output may be swept.
    pub output_ttl_secs: u64,
    pub janitor_interval_ms: u64,
    /// Share of required humanoid roles allowed to go unmapped.
    pub skeleton_tolerance: f32,
    /// Reuse outputs of identical requests.
    pub output_cache: bool,
    /// Filesystem artifact store root; in-memory store when unset.
    pub artifact_root: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_retries: 3,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 30_000,
            job_timeout_ms: 120_000,
            caller_quota: 3,
            job_retention_secs: 86_400,
            output_ttl_secs: 86_400,
            janitor_interval_ms: 1_000,
            skeleton_tolerance: 0.15,
            output_cache: true,
            artifact_root: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("workers must be at least 1")]
    NoWorkers,
    #[error("caller_quota must be at least 1")]
    NoQuota,
    #[error("skeleton_tolerance must be within [0, 1], got {0}")]
    Tolerance(f32),
    #[error("backoff_cap_ms ({cap}) must not be below backoff_base_ms ({base})")]
    BackoffCap { base: u64, cap: u64 },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

impl PipelineConfig {
    /// Load from the file named by `ANIMFORGE_CONFIG` (or `animforge.toml` if
    /// present), then apply environment overrides and validate.
    pub fn load() -> Result<Self> {
        let explicit = std::env::var(CONFIG_PATH_VAR).ok().filter(|p| !p.is_empty());
        let mut config = match explicit {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => {
                let path = Path::new(DEFAULT_CONFIG_PATH);
                if path.exists() {
                    Self::from_file(path)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_toml_str(&contents).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply `ANIMFORGE_<FIELD>` overrides using `lookup` for variable access.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T>
        where
            T::Err: std::error::Error + Send + Sync + 'static,
        {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("invalid value for {key}: {raw:?}"))
        }

        let get = |field: &str| {
            let key = format!("ANIMFORGE_{}", field.to_ascii_uppercase());
            lookup(&key).filter(|v| !v.trim().is_empty()).map(|v| (key, v))
        };

        if let Some((k, v)) = get("workers") {
            self.workers = parse(&k, &v)?;
        }
        if let Some((k, v)) = get("max_retries") {
            self.max_retries = parse(&k, &v)?;
        }
        if let Some((k, v)) = get("backoff_base_ms") {
            self.backoff_base_ms = parse(&k, &v)?;
        }
        if let Some((k, v)) = get("backoff_cap_ms") {
            self.backoff_cap_ms = parse(&k, &v)?;
        }
        if let Some((k, v)) = get("job_timeout_ms") {
            self.job_timeout_ms = parse(&k, &v)?;
        }
        if let Some((k, v)) = get("caller_quota") {
            self.caller_quota = parse(&k, &v)?;
        }
        if let Some((k, v)) = get("job_retention_secs") {
            self.job_retention_secs = parse(&k, &v)?;
        }
        if let Some((k, v)) = get("output_ttl_secs") {
            self.output_ttl_secs = parse(&k, &v)?;
        }
        if let Some((k, v)) = get("janitor_interval_ms") {
            self.janitor_interval_ms = parse(&k, &v)?;
        }
        if let Some((k, v)) = get("skeleton_tolerance") {
            self.skeleton_tolerance = parse(&k, &v)?;
        }
        if let Some((k, v)) = get("output_cache") {
            self.output_cache = parse(&k, &v)?;
        }
        if let Some((_, v)) = get("artifact_root") {
            self.artifact_root = Some(PathBuf::from(v.trim()));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.caller_quota == 0 {
            return Err(ConfigError::NoQuota);
        }
        if !(0.0..=1.0).contains(&self.skeleton_tolerance) {
            return Err(ConfigError::Tolerance(self.skeleton_tolerance));
        }
        if self.backoff_cap_ms < self.backoff_base_ms {
            return Err(ConfigError::BackoffCap {
                base: self.backoff_base_ms,
                cap: self.backoff_cap_ms,
            });
        }
        if self.job_timeout_ms == 0 {
            return Err(ConfigError::Zero("job_timeout_ms"));
        }
        if self.janitor_interval_ms == 0 {
            return Err(ConfigError::Zero("janitor_interval_ms"));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            self.max_retries,
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_cap_ms),
        )
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms)
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }

    pub fn output_ttl(&self) -> Duration {
        Duration::from_secs(self.output_ttl_secs)
    }

    pub fn janitor_interval(&self) -> Duration {
        Duration::from_millis(self.janitor_interval_ms)
    }
}
