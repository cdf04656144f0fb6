//! Runtime configuration for a VASP node's core protocol state.

use serde::{Deserialize, Serialize};

/// Tunables for one VASP node's channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::Args))]
#[serde(rename_all = "snake_case")]
pub struct CoreConfig {
    /// Filesystem path to the durable storage tree.
    #[cfg_attr(feature = "cli", arg(long, env = "STORAGE_PATH", default_value = "./vasp-data"))]
    pub storage_path: String,
    /// How often a channel's retransmission ticker should fire, in
    /// seconds.
    #[serde(default = "default_retransmit_interval_secs")]
    #[cfg_attr(feature = "cli", arg(long, env = "RETRANSMIT_INTERVAL_SECS", default_value_t = default_retransmit_interval_secs()))]
    pub retransmit_interval_secs: u64,
    /// How many attempts to retransmit a request before giving up and
    /// surfacing the stalled request to the operator.
    #[serde(default = "default_max_retransmit_attempts")]
    #[cfg_attr(feature = "cli", arg(long, env = "MAX_RETRANSMIT_ATTEMPTS", default_value_t = default_max_retransmit_attempts()))]
    pub max_retransmit_attempts: u32,
}

const fn default_retransmit_interval_secs() -> u64 {
    5
}

const fn default_max_retransmit_attempts() -> u32 {
    12
}

impl CoreConfig {
    /// Builds a configuration pointing at `storage_path` with default
    /// retransmission tunables.
    #[must_use]
    pub fn new(storage_path: impl Into<String>) -> Self {
        Self {
            storage_path: storage_path.into(),
            retransmit_interval_secs: default_retransmit_interval_secs(),
            max_retransmit_attempts: default_max_retransmit_attempts(),
        }
    }
}
