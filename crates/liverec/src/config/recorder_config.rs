use crate::config::default_include_symbol_files;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Engine settings applied before recording starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Maximum event log size in bytes; engine default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_log_size: Option<u64>,
    /// Whether saved recordings embed symbol files.
    #[serde(default = "default_include_symbol_files")]
    pub include_symbol_files: bool,
    /// Shared memory access log; must end in `.shmem`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shmem_log_path: Option<PathBuf>,
    /// Maximum shared memory access log size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shmem_log_size: Option<u64>,
    /// Where to save if the process exits while still recording.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_on_termination: Option<PathBuf>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            event_log_size: None,
            include_symbol_files: default_include_symbol_files(),
            shmem_log_path: None,
            shmem_log_size: None,
            save_on_termination: None,
        }
    }
}
