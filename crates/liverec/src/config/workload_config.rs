use crate::config::default_iterations;

use serde::{Deserialize, Serialize};

/// The demo workload recorded by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// Number of workload steps between start and stop.
    #[serde(default = "default_iterations")]
    pub iterations: u32,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
        }
    }
}
