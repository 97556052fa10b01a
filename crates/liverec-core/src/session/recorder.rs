use crate::{
    CoreResult, RecorderError, RecordingHandle, TestAnnotation,
    engine::{AnnotationPayload, Engine},
    error::map_failure,
    session::{SessionState, shared::Shared},
};

use std::{
    panic::Location,
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use error_location::ErrorLocation;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Single point of control over the recording engine.
///
/// Owns the session state machine and the engine behind one lock. At most
/// one session is active at a time: [`Recorder::start`] fails while
/// recording and [`Recorder::stop`] fails while idle. Every operation takes
/// the lock for its whole duration, so concurrent callers block rather than
/// fail.
///
/// A process has exactly one real recorder, obtained with
/// `Recorder::global()` when built with the `native` feature. Tests and
/// hosts without the vendor libraries construct their own with
/// [`Recorder::new`] over a [`SimulatedEngine`](crate::SimulatedEngine).
pub struct Recorder {
    pub(crate) shared: Arc<Shared>,
}

impl Recorder {
    /// Create a recorder driving `engine`.
    pub fn new(engine: impl Engine + 'static) -> Self {
        Self {
            shared: Arc::new(Shared::new(Box::new(engine))),
        }
    }

    /// The process-wide recorder backed by the vendor engine.
    #[cfg(feature = "native")]
    pub fn global() -> &'static Recorder {
        use std::sync::OnceLock;

        static GLOBAL: OnceLock<Recorder> = OnceLock::new();
        GLOBAL.get_or_init(|| Recorder::new(crate::engine::NativeEngine::new()))
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.shared.lock().session
    }

    /// Whether a session is active.
    pub fn is_recording(&self) -> bool {
        self.state().is_recording()
    }

    /// Version string of the underlying engine.
    pub fn version(&self) -> String {
        self.shared.lock().engine.version()
    }

    /// Start recording the current process.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::AlreadyRecording`] if a session is active, or
    /// the mapped engine error if attaching fails.
    #[track_caller]
    #[instrument(skip(self))]
    pub fn start(&self) -> CoreResult<()> {
        let mut guarded = self.shared.lock();

        if guarded.session.is_recording() {
            return Err(RecorderError::AlreadyRecording {
                location: ErrorLocation::from(Location::caller()),
            });
        }

        guarded.engine.start().map_err(map_failure)?;

        let session_id = Uuid::new_v4();
        guarded.session = SessionState::Recording {
            session_id,
            started_at: Instant::now(),
        };

        info!(session_id = %session_id, "Recording started");

        Ok(())
    }

    /// Stop recording, keeping the history in memory.
    ///
    /// The returned handle must be released with
    /// [`RecordingHandle::release`]; dropping it unreleased is reported as a
    /// leak pointing at the caller of this method.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::NotRecording`] when idle, or
    /// [`RecorderError::StopFailed`] when the engine does not hand back the
    /// history. The session stays active after a failed stop.
    #[track_caller]
    #[instrument(skip(self))]
    pub fn stop(&self) -> CoreResult<RecordingHandle> {
        let mut guarded = self.shared.lock();

        let SessionState::Recording {
            session_id,
            started_at,
        } = guarded.session
        else {
            return Err(RecorderError::NotRecording {
                location: ErrorLocation::from(Location::caller()),
            });
        };

        let context = match guarded.engine.stop(true) {
            Ok(Some(context)) => context,
            Ok(None) => {
                warn!(session_id = %session_id, "Engine stopped without a recording context");
                return Err(RecorderError::StopFailed {
                    location: ErrorLocation::from(Location::caller()),
                });
            }
            Err(failure) => {
                warn!(
                    session_id = %session_id,
                    error = %map_failure(failure),
                    "Engine failed to stop"
                );
                return Err(RecorderError::StopFailed {
                    location: ErrorLocation::from(Location::caller()),
                });
            }
        };

        guarded.session = SessionState::Idle;
        drop(guarded);

        info!(
            session_id = %session_id,
            duration_ms = started_at.elapsed().as_millis(),
            "Recording stopped, history retained"
        );

        Ok(RecordingHandle::new(
            Arc::clone(&self.shared),
            context,
            session_id,
        ))
    }

    /// Stop recording and throw the history away.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::NotRecording`] when idle, or the mapped engine
    /// error.
    #[track_caller]
    #[instrument(skip(self))]
    pub fn stop_and_discard(&self) -> CoreResult<()> {
        let mut guarded = self.shared.lock();

        let Some(session_id) = guarded.session.session_id() else {
            return Err(RecorderError::NotRecording {
                location: ErrorLocation::from(Location::caller()),
            });
        };

        guarded.engine.stop(false).map_err(map_failure)?;
        guarded.session = SessionState::Idle;

        info!(session_id = %session_id, "Recording stopped and discarded");

        Ok(())
    }

    /// Write the history recorded so far to `path` without stopping.
    ///
    /// Blocks until the file is complete. May be called any number of times
    /// during a session; later saves contain later history.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::NotRecording`] when idle, or the mapped engine
    /// error.
    #[track_caller]
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn save<P: AsRef<Path>>(&self, path: P) -> CoreResult<()> {
        let mut guarded = self.shared.lock();

        let Some(session_id) = guarded.session.session_id() else {
            return Err(RecorderError::NotRecording {
                location: ErrorLocation::from(Location::caller()),
            });
        };

        let start = Instant::now();
        guarded.engine.save(path.as_ref()).map_err(map_failure)?;

        info!(
            session_id = %session_id,
            duration_ms = start.elapsed().as_millis(),
            "Recording saved"
        );

        Ok(())
    }

    /// Save to `path` if the process terminates while still being recorded.
    ///
    /// Stopping the session cancels the request.
    #[track_caller]
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn save_on_termination<P: AsRef<Path>>(&self, path: P) -> CoreResult<()> {
        self.shared
            .lock()
            .engine
            .save_on_termination(path.as_ref())
            .map_err(map_failure)?;
        debug!("Save on termination armed");
        Ok(())
    }

    /// Cancel a previous [`Recorder::save_on_termination`].
    #[track_caller]
    #[instrument(skip(self))]
    pub fn cancel_save_on_termination(&self) -> CoreResult<()> {
        self.shared
            .lock()
            .engine
            .cancel_save_on_termination()
            .map_err(map_failure)?;
        debug!("Save on termination cancelled");
        Ok(())
    }

    /// Maximum size of the event log in bytes.
    #[track_caller]
    pub fn event_log_size(&self) -> CoreResult<u64> {
        self.shared
            .lock()
            .engine
            .event_log_size()
            .map_err(map_failure)
    }

    /// Set the maximum size of the event log in bytes.
    ///
    /// Larger logs keep more history but use more memory.
    #[track_caller]
    #[instrument(skip(self))]
    pub fn set_event_log_size(&self, bytes: u64) -> CoreResult<()> {
        self.shared
            .lock()
            .engine
            .set_event_log_size(bytes)
            .map_err(map_failure)?;
        debug!(bytes, "Event log size set");
        Ok(())
    }

    /// Whether symbol files are embedded in saved recordings.
    ///
    /// Leaving them out makes recordings smaller but they can then only be
    /// replayed where the same binaries are available.
    #[track_caller]
    #[instrument(skip(self))]
    pub fn include_symbol_files(&self, include: bool) -> CoreResult<()> {
        self.shared
            .lock()
            .engine
            .include_symbol_files(include)
            .map_err(map_failure)
    }

    /// Path of the shared memory access log, if configured.
    #[track_caller]
    pub fn shmem_log_path(&self) -> CoreResult<Option<PathBuf>> {
        self.shared
            .lock()
            .engine
            .shmem_log_path()
            .map_err(map_failure)
    }

    /// Log shared memory accesses to `path`. Must be called before
    /// [`Recorder::start`]; the engine rejects it with `EINVAL` otherwise.
    #[track_caller]
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn set_shmem_log_path<P: AsRef<Path>>(&self, path: P) -> CoreResult<()> {
        self.shared
            .lock()
            .engine
            .set_shmem_log_path(Some(path.as_ref()))
            .map_err(map_failure)
    }

    /// Stop logging shared memory accesses.
    #[track_caller]
    #[instrument(skip(self))]
    pub fn clear_shmem_log_path(&self) -> CoreResult<()> {
        self.shared
            .lock()
            .engine
            .set_shmem_log_path(None)
            .map_err(map_failure)
    }

    /// Maximum size of the shared memory access log in bytes.
    #[track_caller]
    pub fn shmem_log_size(&self) -> CoreResult<u64> {
        self.shared
            .lock()
            .engine
            .shmem_log_size()
            .map_err(map_failure)
    }

    /// Set the maximum size of the shared memory access log in bytes.
    #[track_caller]
    #[instrument(skip(self))]
    pub fn set_shmem_log_size(&self, bytes: u64) -> CoreResult<()> {
        self.shared
            .lock()
            .engine
            .set_shmem_log_size(bytes)
            .map_err(map_failure)
    }

    /// Store an annotation at the current execution point.
    ///
    /// `detail` distinguishes related annotations sharing a `name`.
    #[track_caller]
    #[instrument(skip(self, payload))]
    pub fn annotate(
        &self,
        name: &str,
        detail: Option<&str>,
        payload: AnnotationPayload<'_>,
    ) -> CoreResult<()> {
        self.shared
            .lock()
            .engine
            .annotate(name, detail, payload)
            .map_err(map_failure)
    }

    /// Create a test annotation for a run of `base_name`.
    ///
    /// With `add_run_suffix` the engine appends a suffix so repeated runs of
    /// the same test stay distinguishable. The returned value must be
    /// released with [`TestAnnotation::release`].
    #[track_caller]
    #[instrument(skip(self))]
    pub fn test_annotation(
        &self,
        base_name: &str,
        add_run_suffix: bool,
    ) -> CoreResult<TestAnnotation> {
        let raw = self
            .shared
            .lock()
            .engine
            .test_annotation_new(base_name, add_run_suffix)
            .map_err(map_failure)?;

        debug!(base_name, "Test annotation created");

        Ok(TestAnnotation::new(Arc::clone(&self.shared), raw))
    }
}
