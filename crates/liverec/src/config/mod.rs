#[allow(clippy::module_inception)]
mod config;
mod recorder_config;
mod save_config;
mod workload_config;

pub(crate) use {
    config::Config,
    recorder_config::RecorderConfig,
    save_config::{SaveConfig, SaveMode},
    workload_config::WorkloadConfig,
};

pub(crate) const DEFAULT_INCLUDE_SYMBOL_FILES: bool = true;
pub(crate) const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub(crate) const DEFAULT_POLL_INTERVAL_MS: u64 = 20;
pub(crate) const DEFAULT_ITERATIONS: u32 = 10_000;

pub(crate) fn default_include_symbol_files() -> bool {
    DEFAULT_INCLUDE_SYMBOL_FILES
}

pub(crate) fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

pub(crate) fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

pub(crate) fn default_iterations() -> u32 {
    DEFAULT_ITERATIONS
}
