//! LiveRec: records its own execution and saves the recording.

mod app;
mod config;
mod error;

pub(crate) use {
    app::{App, RunSummary},
    error::{AppError, Result as AppResult},
};

use crate::config::Config;

use liverec_core::Recorder;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "liverec=debug,liverec_core=debug";

/// Application entry point.
fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load config: {:?}", e);
            std::process::exit(1);
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create tokio runtime: {:?}", e);
            std::process::exit(1);
        }
    };

    #[cfg(feature = "native")]
    let recorder = Recorder::global();
    #[cfg(not(feature = "native"))]
    let simulated = Recorder::new(liverec_core::SimulatedEngine::new());
    #[cfg(not(feature = "native"))]
    let recorder = &simulated;

    match rt.block_on(App::new(recorder, config).run()) {
        Ok(RunSummary {
            session_id,
            path,
            bytes,
            checksum,
        }) => {
            info!(session_id = %session_id, path = ?path, bytes, checksum, "Done");
        }
        Err(e) => {
            error!(error = ?e, "App error");
            std::process::exit(1);
        }
    }
}
