use crate::config::{default_poll_interval_ms, default_timeout_secs};

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// How the host waits for an asynchronous save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveMode {
    /// Await the background-save channel.
    #[default]
    Background,
    /// Poll progress at a fixed interval.
    Poll,
    /// Block on the completion descriptor.
    Descriptor,
}

/// Where and how recordings are saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveConfig {
    /// Directory recordings are written to.
    pub output_dir: PathBuf,
    /// Waiting strategy.
    #[serde(default)]
    pub mode: SaveMode,
    /// Give up waiting after this many seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Interval between polls in [`SaveMode::Poll`].
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl SaveConfig {
    pub(crate) fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub(crate) fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}
