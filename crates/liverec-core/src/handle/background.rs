use crate::{
    CoreResult, RecorderError,
    engine::RawContext,
    error::map_failure,
    handle::completion::read_completion_byte,
    session::shared::Shared,
};

use std::{
    os::fd::{AsFd, OwnedFd},
    panic::Location,
    sync::{
        Arc, Mutex, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
};

use error_location::ErrorLocation;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Receives the single outcome of a background save.
///
/// Await it from async code, or call `blocking_recv` from a plain thread.
/// Race it against `tokio::time::timeout` to bound the wait.
pub type SaveReceiver = oneshot::Receiver<CoreResult<()>>;

type SenderSlot = Arc<Mutex<Option<oneshot::Sender<CoreResult<()>>>>>;

/// Everything the waiter thread needs once the save has been started.
pub(crate) struct BackgroundWait {
    pub(crate) fd: OwnedFd,
    pub(crate) shared: Arc<Shared>,
    pub(crate) context: RawContext,
    pub(crate) released: Arc<AtomicBool>,
    pub(crate) session_id: Uuid,
}

/// A running waiter thread and the result its handle observed for the save.
pub(crate) struct Waiter {
    thread: JoinHandle<()>,
    settled: Arc<OnceLock<i32>>,
}

impl Waiter {
    /// Record the engine result of the save, as seen by the handle.
    pub(crate) fn settle(&self, result: i32) {
        if self.settled.set(result).is_err() {
            debug!(result, "Save result already recorded");
        }
    }

    /// Wait for the thread to deliver its outcome and exit.
    ///
    /// Only call once the save is known to be complete; until then the
    /// thread is blocked on the completion byte.
    pub(crate) fn join(self) {
        if self.thread.join().is_err() {
            warn!("Background save waiter panicked");
        }
    }
}

/// Deliver `outcome` through the slot unless something already has.
fn deliver(slot: &SenderSlot, outcome: CoreResult<()>) {
    let sender = slot.lock().unwrap_or_else(|e| e.into_inner()).take();
    match sender {
        Some(tx) => {
            if tx.send(outcome).is_err() {
                debug!("Background save receiver dropped before completion");
            }
        }
        None => warn!("Background save outcome already delivered"),
    }
}

/// Send an outcome that was known before any waiter started.
pub(crate) fn deliver_now(tx: oneshot::Sender<CoreResult<()>>, outcome: CoreResult<()>) {
    if tx.send(outcome).is_err() {
        debug!("Background save receiver dropped before completion");
    }
}

/// Block on the completion descriptor on a dedicated thread and report the
/// outcome through `tx`.
///
/// Returns `None` if the thread could not be spawned; the failure has been
/// delivered through `tx` already.
#[track_caller]
pub(crate) fn spawn_waiter(
    wait: BackgroundWait,
    tx: oneshot::Sender<CoreResult<()>>,
) -> Option<Waiter> {
    let slot: SenderSlot = Arc::new(Mutex::new(Some(tx)));
    let waiter_slot = Arc::clone(&slot);
    let session_id = wait.session_id;
    let settled = Arc::new(OnceLock::new());
    let waiter_settled = Arc::clone(&settled);

    let spawned = thread::Builder::new()
        .name("liverec-save-wait".into())
        .spawn(move || {
            let outcome = wait_for_completion(&wait, &waiter_settled);
            deliver(&waiter_slot, outcome);
        });

    match spawned {
        Ok(thread) => Some(Waiter { thread, settled }),
        Err(e) => {
            error!(session_id = %session_id, error = %e, "Failed to spawn background save waiter");
            deliver(
                &slot,
                Err(RecorderError::WaiterUnavailable {
                    reason: format!("Failed to spawn waiter thread: {}", e),
                    location: ErrorLocation::from(Location::caller()),
                }),
            );
            None
        }
    }
}

fn wait_for_completion(wait: &BackgroundWait, settled: &OnceLock<i32>) -> CoreResult<()> {
    read_completion_byte(wait.fd.as_fd())?;

    let mut guarded = wait.shared.lock();

    // A released handle no longer owns the context. It can only have been
    // released after observing completion, which settled the result.
    if wait.released.load(Ordering::Acquire) {
        debug!(session_id = %wait.session_id, "Background save completed after release");
        return match settled.get() {
            Some(0) => Ok(()),
            Some(&code) => Err(RecorderError::SaveFailed {
                code,
                location: ErrorLocation::from(Location::caller()),
            }),
            // Dropped unreleased mid-save; the result was never observed.
            None => Err(RecorderError::Released {
                resource: "RecordingHandle",
                location: ErrorLocation::from(Location::caller()),
            }),
        };
    }

    let raw = guarded
        .engine
        .poll_saving_progress(wait.context)
        .map_err(map_failure)?;

    if raw.complete && raw.result != 0 {
        warn!(session_id = %wait.session_id, result = raw.result, "Background save failed");
        return Err(RecorderError::SaveFailed {
            code: raw.result,
            location: ErrorLocation::from(Location::caller()),
        });
    }

    debug!(session_id = %wait.session_id, "Background save completed");
    Ok(())
}
