//! Manager configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::Config;

/// Manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Time a query waits for replies, in milliseconds
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    /// Channel buffer size for manager requests
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer: usize,

    /// Completed query outcomes kept for late waiters
    #[serde(default = "default_outcome_history")]
    pub outcome_history: usize,
}

fn default_query_timeout_ms() -> u64 {
    debug!("default_query_timeout_ms: called");
    15_000
}

fn default_channel_buffer() -> usize {
    debug!("default_channel_buffer: called");
    1000
}

fn default_outcome_history() -> usize {
    debug!("default_outcome_history: called");
    16
}

impl Default for ManagerConfig {
    fn default() -> Self {
        debug!("ManagerConfig::default: called");
        Self {
            query_timeout_ms: default_query_timeout_ms(),
            channel_buffer: default_channel_buffer(),
            outcome_history: default_outcome_history(),
        }
    }
}

impl ManagerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            query_timeout_ms: config.query.timeout_ms,
            ..Default::default()
        }
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}
