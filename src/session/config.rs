use std::time::Duration;

use crate::encoder::EncodingChoice;

/// Tuning for a recording session controller.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// How often the encoder emits buffered data as a fragment
    pub fragment_interval: Duration,
    /// Hard cap on artifact size before the session is failed
    pub max_artifact_bytes: usize,
    /// How often the live level feed is re-sampled (display refresh rate)
    pub level_poll_interval: Duration,
    /// Encoding override; the probe's preference order applies when unset
    pub encoding: Option<EncodingChoice>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            fragment_interval: Duration::from_millis(1000),
            max_artifact_bytes: 512 * 1024 * 1024,
            level_poll_interval: Duration::from_millis(16),
            encoding: None,
        }
    }
}
