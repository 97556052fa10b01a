use crate::{
    RecorderError, SaveStatus, SimulatedEngine,
    handle::completion::read_completion_byte,
    tests::{DEADLINE, SLOW_SAVE, poll_to_completion, recorder_with},
};

use std::{
    os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd},
    time::{Duration, Instant},
};

/// WHAT: The descriptor delivers exactly one byte, and only after completion
/// WHY: Select-based callers rely on one readiness event per save
#[test]
#[allow(clippy::unwrap_used)]
fn given_running_save_when_waiting_on_descriptor_then_one_byte_after_completion() {
    // Given: A slow save in flight
    let dir = tempfile::tempdir().unwrap();
    let (recorder, _probe) = recorder_with(SimulatedEngine::new().with_save_pace(SLOW_SAVE));
    recorder.start().unwrap();
    let mut handle = recorder.stop().unwrap();
    handle.save_async(dir.path().join("select.undo")).unwrap();

    // When: Checking readiness before, at and after completion
    let early = handle
        .completion_descriptor()
        .unwrap()
        .wait_timeout(Duration::from_millis(10))
        .unwrap();
    let on_completion = handle
        .completion_descriptor()
        .unwrap()
        .wait_timeout(DEADLINE)
        .unwrap();
    let again = handle
        .completion_descriptor()
        .unwrap()
        .wait_timeout(Duration::from_millis(50))
        .unwrap();

    // Then: Not ready early, ready once, never again for the same save
    assert!(!early);
    assert!(on_completion);
    assert!(!again);
    assert!(handle.poll().unwrap().is_complete());

    handle.release().unwrap();
}

/// WHAT: Each save on a handle produces its own completion event
/// WHY: Leftover signals from earlier saves must not complete later ones early
#[test]
#[allow(clippy::unwrap_used)]
fn given_unread_signal_from_previous_save_when_saving_again_then_no_early_completion() {
    // Given: A fast save completed by polling only, leaving its byte unread
    let dir = tempfile::tempdir().unwrap();
    let (recorder, _probe) = recorder_with(SimulatedEngine::new());
    recorder.start().unwrap();
    let mut handle = recorder.stop().unwrap();
    handle.save_async(dir.path().join("one.undo")).unwrap();
    poll_to_completion(&mut handle);
    std::thread::sleep(Duration::from_millis(20));

    // When: Starting another save and waiting on the descriptor
    handle.save_async(dir.path().join("two.undo")).unwrap();
    handle.completion_descriptor().unwrap().wait().unwrap();

    // Then: The wait ended because the second save completed
    assert_eq!(handle.poll().unwrap(), SaveStatus::Complete { result: 0 });
    assert!(dir.path().join("two.undo").exists());

    handle.release().unwrap();
}

/// WHAT: The descriptor is a real, stable file descriptor
/// WHY: Callers register it with their own select/poll loops
#[test]
#[allow(clippy::unwrap_used)]
fn given_handle_when_getting_descriptor_twice_then_same_fd() {
    // Given: A stopped recording
    let (recorder, _probe) = recorder_with(SimulatedEngine::new());
    recorder.start().unwrap();
    let mut handle = recorder.stop().unwrap();

    // When: Fetching the descriptor twice
    let first = handle.completion_descriptor().unwrap().as_raw_fd();
    let second = handle.completion_descriptor().unwrap().as_raw_fd();

    // Then: Same open descriptor
    assert!(first >= 0);
    assert_eq!(first, second);

    handle.release().unwrap();
}

/// WHAT: A descriptor closed before the completion byte is a short read
/// WHY: A vanished writer must not be mistaken for a completed save
#[test]
#[allow(clippy::unwrap_used)]
fn given_closed_writer_when_reading_completion_then_short_read() {
    // Given: A pipe whose write end is already closed
    let mut fds = [0; 2];
    // SAFETY: `fds` has room for both ends.
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
    // SAFETY: both descriptors were just returned by pipe() and are owned here.
    let (reader, writer) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    drop(writer);

    // When: Reading the completion byte
    let result = read_completion_byte(reader.as_fd());

    // Then: ShortRead with nothing read
    assert!(matches!(result, Err(RecorderError::ShortRead { read: 0, .. })));
}

/// WHAT: A sub-millisecond timeout is waited out rather than skipped
/// WHY: Rounding the remaining time down would report a timeout before the deadline
#[test]
#[allow(clippy::unwrap_used)]
fn given_sub_millisecond_timeout_when_waiting_on_running_save_then_waits_full_timeout() {
    // Given: A slow save in flight
    let dir = tempfile::tempdir().unwrap();
    let (recorder, _probe) = recorder_with(SimulatedEngine::new().with_save_pace(SLOW_SAVE));
    recorder.start().unwrap();
    let mut handle = recorder.stop().unwrap();
    handle.save_async(dir.path().join("short-wait.undo")).unwrap();
    let timeout = Duration::from_micros(900);

    // When: Waiting for less than a millisecond
    let started = Instant::now();
    let completed = handle.completion_descriptor().unwrap().wait_timeout(timeout).unwrap();
    let waited = started.elapsed();

    // Then: Not complete, but only after the full timeout
    assert!(!completed);
    assert!(waited >= timeout, "returned after {waited:?}");

    poll_to_completion(&mut handle);
    handle.release().unwrap();
}
