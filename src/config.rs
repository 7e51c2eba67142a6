use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::store::Store;

#[derive(Clone, Default, Debug, Deserialize)]
#[serde(default)]
pub(crate) struct Config {
    pub(crate) server: ServerConfig,
    pub(crate) activity_pub: ActivityPubConfig,
    pub(crate) apply: ApplyConfig,
    pub(crate) scheduler: SchedulerConfig,
    pub(crate) delivery: DeliveryConfig,
    pub(crate) reputation: ReputationConfig,
}

impl Config {
    pub(crate) fn load(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        toml::from_str(&text).context("unable to parse config file")
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub(crate) struct ServerConfig {
    pub(crate) http_port: u16,
    pub(crate) data_dir: PathBuf,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub(crate) struct ActivityPubConfig {
    /// Public base url of this node, e.g. `https://videos.example.com`.
    pub(crate) base_url: String,
    /// Local accounts created on startup besides the application actor.
    pub(crate) accounts: Vec<String>,
}

impl ActivityPubConfig {
    pub(crate) fn host(&self) -> &str {
        host_of(&self.base_url)
    }
    /// Application actor, used to sign forwarded activities.
    pub(crate) fn application_actor(&self) -> String {
        self.account_url("peertube")
    }
    pub(crate) fn account_url(&self, name: &str) -> String {
        format!("{}/accounts/{name}", self.base_url)
    }
    pub(crate) fn is_local(&self, url: &str) -> bool {
        host_of(url) == self.host()
    }
}

/// Host and port part of an absolute url, or the input itself.
pub(crate) fn host_of(url: &str) -> &str {
    let rest = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    rest.split(['/', '?', '#']).next().unwrap_or(rest)
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub(crate) struct ApplyConfig {
    /// Attempts of a transactional unit before it is reported as fatal.
    pub(crate) max_attempts: u32,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub(crate) struct SchedulerConfig {
    pub(crate) sweep_interval_ms: u64,
    pub(crate) max_attempts: u32,
    pub(crate) base_backoff_secs: u64,
    pub(crate) max_backoff_secs: u64,
    /// Jobs claimed in one sweep.
    pub(crate) batch_size: usize,
    /// Succeeded and expired jobs older than this are purged.
    pub(crate) retention_secs: u64,
}

impl SchedulerConfig {
    pub(crate) fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
    /// Exponential back-off after the given failed attempt.
    pub(crate) fn backoff(&self, attempt: u32) -> Duration {
        let pow = attempt.saturating_sub(1).min(20);
        let secs = self
            .base_backoff_secs
            .saturating_mul(1u64 << pow)
            .min(self.max_backoff_secs);
        Duration::from_secs(secs)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub(crate) struct DeliveryConfig {
    /// Concurrent requests of one broadcast.
    pub(crate) concurrency: usize,
    pub(crate) timeout_secs: u64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub(crate) struct ReputationConfig {
    pub(crate) enabled: bool,
    pub(crate) interval_secs: u64,
    pub(crate) initial_score: i64,
    pub(crate) bonus: i64,
    pub(crate) malus: i64,
    pub(crate) floor: i64,
    /// Base urls of the peers registered on startup.
    pub(crate) peers: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 9000,
            data_dir: PathBuf::from("data"),
        }
    }
}

impl Default for ActivityPubConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9000".to_string(),
            accounts: vec![],
        }
    }
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self { max_attempts: 5 }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: 30_000,
            max_attempts: 5,
            base_backoff_secs: 30,
            max_backoff_secs: 3600,
            batch_size: 20,
            retention_secs: 7 * 24 * 60 * 60,
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            timeout_secs: 10,
        }
    }
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 60,
            initial_score: 100,
            bonus: 10,
            malus: -10,
            floor: 0,
            peers: vec![],
        }
    }
}

/// Loaded configuration plus the opened store, shared by every worker.
#[derive(Clone)]
pub(crate) struct RuntimeConfig {
    pub(crate) init: Config,
    pub(crate) store: Store,
}
