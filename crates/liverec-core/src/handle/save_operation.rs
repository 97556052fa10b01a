use crate::handle::SaveProgress;

use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SaveState {
    Pending,
    Complete { result: i32 },
}

/// The save currently attached to a handle.
#[derive(Debug)]
pub(crate) struct SaveOperation {
    pub(crate) path: PathBuf,
    pub(crate) state: SaveState,
    pub(crate) progress: SaveProgress,
}

impl SaveOperation {
    pub(crate) fn pending(path: PathBuf) -> Self {
        Self {
            path,
            state: SaveState::Pending,
            progress: SaveProgress::Unknown,
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.state == SaveState::Pending
    }
}
