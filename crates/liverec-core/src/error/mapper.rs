use crate::{RecorderError, engine::EngineFailure};

use std::{fmt, io, panic::Location};

use error_location::ErrorLocation;

/// Category of a failure reported by the recording engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorCategory {
    /// Attaching was refused by `/proc/sys/kernel/yama/ptrace_scope`.
    AttachPermissionDenied,
    /// Attaching to the process failed.
    AttachFailed,
    /// The dynamic libraries used by the process could not be located.
    LibrarySearchFailed,
    /// Miscellaneous capture failure without a more specific code.
    CaptureError,
    /// Thread information for the process could not be found.
    MissingThreadInfo,
    /// The process uses memory protection keys, which cannot be recorded.
    ProtectionKeysInUse,
    /// A code this layer does not know about.
    Unknown,
}

impl EngineErrorCategory {
    /// Categorise a raw engine error code. Never fails.
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => Self::AttachPermissionDenied,
            2 => Self::AttachFailed,
            3 => Self::LibrarySearchFailed,
            4 => Self::CaptureError,
            5 => Self::MissingThreadInfo,
            6 => Self::ProtectionKeysInUse,
            _ => Self::Unknown,
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Self::AttachPermissionDenied => {
                "Cannot attach to the process: denied by /proc/sys/kernel/yama/ptrace_scope"
            }
            Self::AttachFailed => "Cannot attach to the process",
            Self::LibrarySearchFailed => "Cannot find the dynamic libraries used by the process",
            Self::CaptureError => "Recording error",
            Self::MissingThreadInfo => "Cannot find information about the process threads",
            Self::ProtectionKeysInUse => "Memory protection keys are in use and cannot be recorded",
            Self::Unknown => "Unknown recorder error",
        }
    }
}

impl fmt::Display for EngineErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Translate a failed engine call into a [`RecorderError`].
///
/// Without an engine error code the raw OS error is surfaced: `-rc` when the
/// engine returned a negated errno, otherwise the errno captured after the call
/// (`EIO` if the engine left errno unset).
#[track_caller]
pub fn map_failure(failure: EngineFailure) -> RecorderError {
    let location = ErrorLocation::from(Location::caller());

    if failure.code == 0 {
        let errno = match (failure.rc, failure.errno) {
            (rc, _) if rc < 0 => -rc,
            (_, 0) => libc::EIO,
            (_, errno) => errno,
        };
        return RecorderError::Os {
            source: io::Error::from_raw_os_error(errno),
            location,
        };
    }

    RecorderError::Engine {
        category: EngineErrorCategory::from_code(failure.code),
        code: failure.code,
        errno: failure.errno,
        location,
    }
}
