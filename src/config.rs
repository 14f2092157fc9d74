//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the automation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Timeout for opening a transport session, in seconds.
    pub connect_timeout_secs: u64,
    /// Shell command used by connectivity probes.
    pub probe_command: String,
    /// Remote path used by file management probes.
    pub probe_file_path: String,
    /// Length of generated log labels.
    pub log_label_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 60,
            probe_command: "uname -a".to_string(),
            probe_file_path: "/tmp/flightdeck_test_connection.txt".to_string(),
            log_label_len: 10,
        }
    }
}

impl EngineConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
