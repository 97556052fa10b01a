mod completion;
mod passthrough;
mod recording_handle;

use crate::{Recorder, RecordingHandle, SaveStatus, SimulatedEngine, SimulatedProbe};

use std::{
    any::Any,
    thread::sleep,
    time::{Duration, Instant},
};

/// Chunk pace that keeps a simulated save running for about a second.
pub(crate) const SLOW_SAVE: Duration = Duration::from_millis(50);

/// Upper bound for anything that is expected to finish.
pub(crate) const DEADLINE: Duration = Duration::from_secs(30);

/// Recorder over `engine`, plus a probe into the engine.
pub(crate) fn recorder_with(engine: SimulatedEngine) -> (Recorder, SimulatedProbe) {
    let probe = engine.probe();
    (Recorder::new(engine), probe)
}

/// Poll until the save completes, returning every status observed.
#[allow(clippy::unwrap_used, clippy::panic)]
pub(crate) fn poll_to_completion(handle: &mut RecordingHandle) -> Vec<SaveStatus> {
    let started = Instant::now();
    let mut seen = Vec::new();

    loop {
        let status = handle.poll().unwrap();
        seen.push(status);
        if status.is_complete() {
            return seen;
        }
        if started.elapsed() > DEADLINE {
            panic!("save did not complete within {:?}", DEADLINE);
        }
        sleep(Duration::from_millis(5));
    }
}

/// Text of a panic payload produced by `panic!("{}", ..)` or `panic!("literal")`.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| payload.downcast_ref::<&str>().map(|s| s.to_string()))
        .unwrap_or_default()
}
