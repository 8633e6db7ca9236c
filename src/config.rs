use std::time::Duration;

use anyhow::Context;
use tracing::trace;

use crate::util::{consul_addr_from_env, consul_token_from_env};

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub consul: ConsulConfig,

    #[serde(default)]
    pub watch: WatchConfig,
}

/// Connection settings for the Consul HTTP API
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ConsulConfig {
    #[serde(default = "default_address")]
    pub address: String,

    /// Datacenter to watch; asked from the local agent when absent
    pub datacenter: Option<String>,

    pub token: Option<String>,

    /// Maximum time a blocking query waits for a change
    #[serde(default = "default_wait_secs")]
    pub wait_secs: u64,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            datacenter: None,
            token: None,
            wait_secs: default_wait_secs(),
        }
    }
}

/// Behaviour of the watcher itself
#[derive(Debug, Clone, serde::Deserialize)]
pub struct WatchConfig {
    /// Capacity of the output channel; a full channel blocks every watcher
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Delay before retrying a failed fetch
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,

    /// Emit events even when neither the status nor any check changed
    #[serde(default = "default_emit_unchanged")]
    pub emit_unchanged: bool,
}

impl WatchConfig {
    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            error_backoff_ms: default_error_backoff_ms(),
            emit_unchanged: default_emit_unchanged(),
        }
    }
}

fn default_address() -> String {
    String::from("http://127.0.0.1:8500")
}

fn default_wait_secs() -> u64 {
    300
}

fn default_buffer_size() -> usize {
    100
}

fn default_error_backoff_ms() -> u64 {
    5000
}

fn default_emit_unchanged() -> bool {
    true
}

impl Config {
    /// Let `CONSUL_HTTP_ADDR` and `CONSUL_HTTP_TOKEN` override the file
    pub fn apply_env(&mut self) {
        if let Some(address) = consul_addr_from_env() {
            self.consul.address = address;
        }
        if let Some(token) = consul_token_from_env() {
            self.consul.token = Some(token);
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.watch.buffer_size == 0 {
            anyhow::bail!("watch.buffer_size must be greater than 0");
        }
        if !self.consul.address.starts_with("http://") && !self.consul.address.starts_with("https://") {
            anyhow::bail!(
                "consul.address must start with http:// or https://, got {}",
                self.consul.address
            );
        }
        Ok(())
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
