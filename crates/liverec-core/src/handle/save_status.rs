use crate::engine::RawSaveStatus;

/// How far an asynchronous save has got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveProgress {
    /// The engine has not reported a percentage yet.
    Unknown,
    /// Percentage complete, `0..=100`.
    Percent(u8),
}

impl SaveProgress {
    pub(crate) fn from_raw(progress: i32) -> Self {
        match u8::try_from(progress.min(100)) {
            Ok(percent) => SaveProgress::Percent(percent),
            Err(_) => SaveProgress::Unknown,
        }
    }
}

/// Outcome of polling an asynchronous save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStatus {
    /// Still writing.
    InProgress {
        /// Progress reported by the engine.
        progress: SaveProgress,
    },
    /// Finished. A zero `result` means the recording was written.
    Complete {
        /// Result code reported by the engine.
        result: i32,
    },
}

impl SaveStatus {
    pub(crate) fn from_raw(raw: RawSaveStatus) -> Self {
        if raw.complete {
            SaveStatus::Complete { result: raw.result }
        } else {
            SaveStatus::InProgress {
                progress: SaveProgress::from_raw(raw.progress),
            }
        }
    }

    /// Whether the save has finished, successfully or not.
    pub fn is_complete(&self) -> bool {
        matches!(self, SaveStatus::Complete { .. })
    }

    /// Whether the save finished and wrote the recording.
    pub fn succeeded(&self) -> bool {
        matches!(self, SaveStatus::Complete { result: 0 })
    }
}
