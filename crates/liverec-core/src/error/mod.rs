mod mapper;

pub use mapper::{EngineErrorCategory, map_failure};

use error_location::ErrorLocation;
use thiserror::Error;

/// Recorder errors with source location tracking.
#[derive(Error, Debug)]
pub enum RecorderError {
    /// Start was called while a session is already being recorded.
    #[error("Process is already being recorded {location}")]
    AlreadyRecording {
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// An operation that needs an active session was called while idle.
    #[error("Process is not being recorded {location}")]
    NotRecording {
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// The engine stopped recording but did not hand back a recording context.
    #[error("Stop failed to create a recording context {location}")]
    StopFailed {
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// The handle was already released.
    #[error("{resource} already released {location}")]
    Released {
        /// Kind of handle that was used after release.
        resource: &'static str,
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// An asynchronous save is still running on this handle.
    #[error("Save already in progress {location}")]
    SaveInProgress {
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// Polled a handle on which no asynchronous save was ever started.
    #[error("Saving not yet started {location}")]
    SaveNotStarted {
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// The engine reported completion of a save with a non-zero result.
    #[error("Save completed with result code {code} {location}")]
    SaveFailed {
        /// Result code reported by the engine.
        code: i32,
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// The completion descriptor did not yield the single completion byte.
    #[error("Failed to read when waiting for save: got {read} bytes {location}")]
    ShortRead {
        /// Number of bytes actually read.
        read: usize,
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// The background save waiter could not be set up or vanished.
    #[error("Background save waiter unavailable: {reason} {location}")]
    WaiterUnavailable {
        /// Description of what went wrong.
        reason: String,
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// A test annotation operation needs a non-empty detail.
    #[error("Annotation detail must not be empty {location}")]
    MissingDetail {
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// The engine reported a categorised failure.
    #[error("{category} (engine code {code}, errno {errno}) {location}")]
    Engine {
        /// Human-readable category of the failure.
        category: EngineErrorCategory,
        /// Raw engine error code, kept for diagnostics.
        code: u32,
        /// OS error number observed alongside the failure.
        errno: i32,
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// The engine call failed without a specific engine error code.
    #[error("OS error: {source} {location}")]
    Os {
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
        /// Source location where error occurred.
        location: ErrorLocation,
    },
}

impl RecorderError {
    /// Raw OS error number, if this error wraps one.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            RecorderError::Os { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

/// Result type alias using [`RecorderError`].
pub type Result<T> = std::result::Result<T, RecorderError>;
