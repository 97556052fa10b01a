use crate::{
    CoreResult, LeakGuard, RecorderError,
    engine::RawContext,
    error::map_failure,
    handle::{
        CompletionDescriptor, SaveProgress, SaveReceiver, SaveStatus,
        background::{self, BackgroundWait, Waiter},
        completion,
        save_operation::{SaveOperation, SaveState},
    },
    session::shared::Shared,
};

use std::{
    fmt, io,
    os::fd::{AsFd, BorrowedFd, OwnedFd},
    panic::Location,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use error_location::ErrorLocation;
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const RESOURCE: &str = "RecordingHandle";

/// Recording history retained in memory after [`Recorder::stop`](crate::Recorder::stop).
///
/// The history can be written out with the asynchronous save protocol:
/// start with [`save_async`](Self::save_async), then either
/// [`poll`](Self::poll), block on the
/// [`completion_descriptor`](Self::completion_descriptor), or use
/// [`save_background`](Self::save_background) to get a channel instead.
///
/// # Release
///
/// The history holds native memory until [`release`](Self::release) is
/// called. Every other operation fails with [`RecorderError::Released`]
/// afterwards. Dropping a handle that was never released discards the
/// history and then panics with the location of the `stop()` call that
/// created it.
///
/// # Saves
///
/// Only one save runs at a time. A running save cannot be cancelled, and
/// the handle cannot be released until it has completed.
pub struct RecordingHandle {
    shared: Arc<Shared>,
    context: RawContext,
    session_id: Uuid,
    // Written only while holding the recorder lock so the background waiter
    // never polls a discarded context.
    released: Arc<AtomicBool>,
    save: Option<SaveOperation>,
    waiter: Option<Waiter>,
    guard: LeakGuard,
}

impl RecordingHandle {
    #[track_caller]
    pub(crate) fn new(shared: Arc<Shared>, context: RawContext, session_id: Uuid) -> Self {
        Self {
            shared,
            context,
            session_id,
            released: Arc::new(AtomicBool::new(false)),
            save: None,
            waiter: None,
            guard: LeakGuard::new(RESOURCE),
        }
    }

    /// ID of the session this history was recorded in.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Where this handle was created.
    pub fn origin(&self) -> &'static Location<'static> {
        self.guard.origin()
    }

    /// Whether [`release`](Self::release) has been called.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Whether a save was started and has not yet been observed to complete.
    pub fn is_saving(&self) -> bool {
        self.save.as_ref().is_some_and(SaveOperation::is_pending)
    }

    /// Progress last observed by [`poll`](Self::poll), if a save was started.
    pub fn progress(&self) -> Option<SaveProgress> {
        self.save.as_ref().map(|op| match op.state {
            SaveState::Pending => op.progress,
            SaveState::Complete { .. } => SaveProgress::Percent(100),
        })
    }

    /// Start writing the history to `path` in the background.
    ///
    /// Returns as soon as the save has started.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Released`] after release,
    /// [`RecorderError::SaveInProgress`] while an earlier save is still
    /// running, or the mapped engine error.
    #[track_caller]
    #[instrument(
        skip(self, path),
        fields(session_id = %self.session_id, path = %path.as_ref().display())
    )]
    pub fn save_async<P: AsRef<Path>>(&mut self, path: P) -> CoreResult<()> {
        self.ensure_live()?;

        if self.observe_completion()? {
            return Err(RecorderError::SaveInProgress {
                location: ErrorLocation::from(Location::caller()),
            });
        }

        // The previous save is complete, so its waiter is about to read the
        // completion byte. Let it, before draining what is left over.
        if let Some(waiter) = self.waiter.take() {
            waiter.join();
        }

        let mut guarded = self.shared.lock();

        if self.save.is_some() {
            let fd = guarded
                .engine
                .select_descriptor(self.context)
                .map_err(map_failure)?;
            let drained = completion::drain_stale(borrow_descriptor(fd)?)?;
            if drained > 0 {
                debug!(drained, "Discarded unread completion signals");
            }
        }

        guarded
            .engine
            .save_async(self.context, path.as_ref())
            .map_err(map_failure)?;
        drop(guarded);

        self.save = Some(SaveOperation::pending(path.as_ref().to_path_buf()));

        info!("Asynchronous save started");

        Ok(())
    }

    /// Report the progress of the current save.
    ///
    /// Once a poll has reported [`SaveStatus::Complete`], later polls of the
    /// same save report it again without asking the engine.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Released`] after release,
    /// [`RecorderError::SaveNotStarted`] if no save was ever started, or the
    /// mapped engine error.
    #[track_caller]
    #[instrument(skip(self), fields(session_id = %self.session_id))]
    pub fn poll(&mut self) -> CoreResult<SaveStatus> {
        self.ensure_live()?;

        let Some(operation) = self.save.as_mut() else {
            return Err(RecorderError::SaveNotStarted {
                location: ErrorLocation::from(Location::caller()),
            });
        };

        if let SaveState::Complete { result } = operation.state {
            return Ok(SaveStatus::Complete { result });
        }

        let raw = self
            .shared
            .lock()
            .engine
            .poll_saving_progress(self.context)
            .map_err(map_failure)?;

        let status = SaveStatus::from_raw(raw);
        match status {
            SaveStatus::Complete { result } => {
                operation.state = SaveState::Complete { result };
                if let Some(waiter) = &self.waiter {
                    waiter.settle(result);
                }
                info!(path = %operation.path.display(), result, "Asynchronous save complete");
            }
            SaveStatus::InProgress { progress } => {
                operation.progress = progress;
                debug!(progress = ?progress, "Asynchronous save in progress");
            }
        }

        Ok(status)
    }

    /// Descriptor that becomes readable when the current save completes.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Released`] after release, or the mapped engine
    /// error.
    #[track_caller]
    pub fn completion_descriptor(&self) -> CoreResult<CompletionDescriptor<'_>> {
        self.ensure_live()?;

        let fd = self
            .shared
            .lock()
            .engine
            .select_descriptor(self.context)
            .map_err(map_failure)?;

        Ok(CompletionDescriptor::new(borrow_descriptor(fd)?))
    }

    /// Save to `path` and report the outcome on a channel.
    ///
    /// Exactly one message is delivered: `Ok(())` once the recording has been
    /// written, or the error that stopped it (failure to start, a failed
    /// read of the completion descriptor, or a non-zero engine result).
    /// A dedicated thread waits for completion; the recorder lock is not held
    /// while it waits.
    #[track_caller]
    #[instrument(
        skip(self, path),
        fields(session_id = %self.session_id, path = %path.as_ref().display())
    )]
    pub fn save_background<P: AsRef<Path>>(&mut self, path: P) -> SaveReceiver {
        let (tx, rx) = oneshot::channel();

        match self.begin_background(path.as_ref()) {
            Ok(fd) => {
                self.waiter = background::spawn_waiter(
                    BackgroundWait {
                        fd,
                        shared: Arc::clone(&self.shared),
                        context: self.context,
                        released: Arc::clone(&self.released),
                        session_id: self.session_id,
                    },
                    tx,
                );
            }
            Err(e) => {
                warn!(error = %e, "Background save could not start");
                background::deliver_now(tx, Err(e));
            }
        }

        rx
    }

    /// Free the retained history.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Released`] if already released,
    /// [`RecorderError::SaveInProgress`] while a save is still running, or the
    /// mapped engine error. A handle whose discard failed still counts as
    /// released.
    #[track_caller]
    #[instrument(skip(self), fields(session_id = %self.session_id))]
    pub fn release(&mut self) -> CoreResult<()> {
        self.ensure_live()?;

        if self.observe_completion()? {
            return Err(RecorderError::SaveInProgress {
                location: ErrorLocation::from(Location::caller()),
            });
        }

        let mut guarded = self.shared.lock();
        self.released.store(true, Ordering::Release);
        self.guard.disarm();
        self.save = None;
        let discarded = guarded.engine.discard(self.context);
        drop(guarded);

        discarded.map_err(map_failure)?;

        info!("Recording handle released");

        Ok(())
    }

    #[track_caller]
    fn ensure_live(&self) -> CoreResult<()> {
        if self.is_released() {
            return Err(RecorderError::Released {
                resource: RESOURCE,
                location: ErrorLocation::from(Location::caller()),
            });
        }
        Ok(())
    }

    /// Ask the engine once whether a pending save has finished, recording the
    /// result if so. Returns whether a save is still pending.
    #[track_caller]
    fn observe_completion(&mut self) -> CoreResult<bool> {
        let Some(operation) = self.save.as_mut().filter(|op| op.is_pending()) else {
            return Ok(false);
        };

        let raw = self
            .shared
            .lock()
            .engine
            .poll_saving_progress(self.context)
            .map_err(map_failure)?;

        if raw.complete {
            operation.state = SaveState::Complete { result: raw.result };
            if let Some(waiter) = &self.waiter {
                waiter.settle(raw.result);
            }
            debug!(result = raw.result, "Observed save completion");
            return Ok(false);
        }

        Ok(true)
    }

    #[track_caller]
    fn begin_background(&mut self, path: &Path) -> CoreResult<OwnedFd> {
        let fd = self
            .completion_descriptor()?
            .as_fd()
            .try_clone_to_owned()
            .map_err(|e| RecorderError::Os {
                source: e,
                location: ErrorLocation::from(Location::caller()),
            })?;

        self.save_async(path)?;

        Ok(fd)
    }
}

/// Borrow an engine-owned descriptor.
///
/// The engine keeps the descriptor open until the context is discarded,
/// which needs `&mut` access to the handle, so any borrow tied to `&self`
/// outlives nothing it should not.
#[track_caller]
fn borrow_descriptor<'a>(fd: i32) -> CoreResult<BorrowedFd<'a>> {
    if fd < 0 {
        return Err(RecorderError::Os {
            source: io::Error::from_raw_os_error(libc::EBADF),
            location: ErrorLocation::from(Location::caller()),
        });
    }

    // SAFETY: `fd` is non-negative and open for as long as the context lives.
    Ok(unsafe { BorrowedFd::borrow_raw(fd) })
}

impl fmt::Debug for RecordingHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingHandle")
            .field("session_id", &self.session_id)
            .field("released", &self.is_released())
            .field("saving", &self.is_saving())
            .field("origin", &self.guard.origin())
            .finish_non_exhaustive()
    }
}

impl Drop for RecordingHandle {
    fn drop(&mut self) {
        let shared = &self.shared;
        let released = &self.released;
        let context = self.context;
        let session_id = self.session_id;

        self.guard.check(|| {
            let mut guarded = shared.lock();
            released.store(true, Ordering::Release);
            if let Err(failure) = guarded.engine.discard(context) {
                warn!(
                    session_id = %session_id,
                    error = %map_failure(failure),
                    "Forced discard failed"
                );
            }
        });
    }
}
