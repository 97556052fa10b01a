use std::time::Instant;

use uuid::Uuid;

/// Whether the process is currently being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Not recording.
    #[default]
    Idle,
    /// A recording session is active.
    Recording {
        /// Unique session ID for log correlation.
        session_id: Uuid,
        /// When recording started.
        started_at: Instant,
    },
}

impl SessionState {
    /// Whether a session is active.
    pub fn is_recording(&self) -> bool {
        matches!(self, SessionState::Recording { .. })
    }

    /// ID of the active session, if any.
    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            SessionState::Idle => None,
            SessionState::Recording { session_id, .. } => Some(*session_id),
        }
    }
}
