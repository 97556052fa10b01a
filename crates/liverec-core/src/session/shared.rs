use crate::{engine::Engine, session::SessionState};

use std::sync::{Mutex, MutexGuard};

use tracing::error;

/// State reachable only through the recorder lock.
///
/// The engine lives here so that every engine call is serialized with the
/// session flag by construction.
pub(crate) struct Guarded {
    pub(crate) session: SessionState,
    pub(crate) engine: Box<dyn Engine>,
}

/// Lock shared by a [`Recorder`](crate::Recorder) and every handle it creates.
pub(crate) struct Shared {
    state: Mutex<Guarded>,
}

impl Shared {
    pub(crate) fn new(engine: Box<dyn Engine>) -> Self {
        Self {
            state: Mutex::new(Guarded {
                session: SessionState::Idle,
                engine,
            }),
        }
    }

    /// Acquire the recorder lock, recovering from poison.
    ///
    /// A poisoned lock only means a previous holder panicked; the session
    /// flag and engine are still consistent because every mutation is a
    /// single assignment after the engine call returns.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Guarded> {
        self.state.lock().unwrap_or_else(|e| {
            error!("Recorder lock poisoned, recovering: {}", e);
            e.into_inner()
        })
    }
}
