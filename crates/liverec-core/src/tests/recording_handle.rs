use crate::{
    RECORDING_MAGIC, RecorderError, SaveProgress, SaveStatus, SimulatedEngine,
    tests::{SLOW_SAVE, poll_to_completion, recorder_with},
};

use std::fs;

/// WHAT: Full async save lifecycle on one handle
/// WHY: Covers the overlap guard, completion, release and use-after-release in one flow
#[test]
#[allow(clippy::unwrap_used)]
fn given_stopped_recording_when_saving_twice_then_second_rejected_until_released() {
    // Given: A stopped recording whose saves take a while
    let dir = tempfile::tempdir().unwrap();
    let (recorder, probe) = recorder_with(SimulatedEngine::new().with_save_pace(SLOW_SAVE));
    recorder.start().unwrap();
    let mut handle = recorder.stop().unwrap();
    let a = dir.path().join("a.undo");
    let b = dir.path().join("b.undo");

    // When: Starting a save and immediately starting another
    handle.save_async(&a).unwrap();
    let overlapping = handle.save_async(&b);

    // Then: The second is rejected and the first runs to completion
    assert!(matches!(overlapping, Err(RecorderError::SaveInProgress { .. })));
    assert!(handle.is_saving());

    let statuses = poll_to_completion(&mut handle);
    assert_eq!(statuses.last(), Some(&SaveStatus::Complete { result: 0 }));
    assert!(!handle.is_saving());
    assert!(fs::read(&a).unwrap().starts_with(RECORDING_MAGIC));
    assert!(!b.exists());

    handle.release().unwrap();
    assert!(handle.is_released());
    assert_eq!(probe.live_contexts(), 0);

    let after_release = handle.save_async(&b);
    assert!(matches!(
        after_release,
        Err(RecorderError::Released {
            resource: "RecordingHandle",
            ..
        })
    ));
}

/// WHAT: Polling a handle that never started a save fails
/// WHY: There is no progress to report before save_async
#[test]
#[allow(clippy::unwrap_used)]
fn given_no_save_started_when_polling_then_save_not_started() {
    // Given: A fresh handle
    let (recorder, _probe) = recorder_with(SimulatedEngine::new());
    recorder.start().unwrap();
    let mut handle = recorder.stop().unwrap();

    // When: Polling
    let result = handle.poll();

    // Then: SaveNotStarted
    assert!(matches!(result, Err(RecorderError::SaveNotStarted { .. })));
    assert_eq!(handle.progress(), None);

    handle.release().unwrap();
}

/// WHAT: Progress never goes backwards across polls
/// WHY: Callers render progress bars from successive polls
#[test]
#[allow(clippy::unwrap_used)]
fn given_running_save_when_polling_repeatedly_then_progress_never_decreases() {
    // Given: A slow save
    let dir = tempfile::tempdir().unwrap();
    let (recorder, _probe) = recorder_with(SimulatedEngine::new().with_save_pace(SLOW_SAVE));
    recorder.start().unwrap();
    let mut handle = recorder.stop().unwrap();
    handle.save_async(dir.path().join("progress.undo")).unwrap();

    // When: Polling until complete
    let statuses = poll_to_completion(&mut handle);

    // Then: Percentages are monotonic and at least one in-progress report was seen
    let percentages: Vec<i32> = statuses
        .iter()
        .filter_map(|s| match s {
            SaveStatus::InProgress {
                progress: SaveProgress::Percent(p),
            } => Some(i32::from(*p)),
            SaveStatus::InProgress {
                progress: SaveProgress::Unknown,
            } => Some(-1),
            SaveStatus::Complete { .. } => None,
        })
        .collect();
    assert!(!percentages.is_empty());
    assert!(percentages.windows(2).all(|w| w[0] <= w[1]));
    assert!(percentages.iter().all(|p| *p <= 100));

    handle.release().unwrap();
}

/// WHAT: A completed poll result is reported again without asking the engine
/// WHY: Completion is terminal for a save
#[test]
#[allow(clippy::unwrap_used)]
fn given_completed_save_when_polling_again_then_same_result() {
    // Given: A save that completed with a non-zero engine result
    let dir = tempfile::tempdir().unwrap();
    let (recorder, _probe) = recorder_with(SimulatedEngine::new().with_save_result(28));
    recorder.start().unwrap();
    let mut handle = recorder.stop().unwrap();
    handle.save_async(dir.path().join("full.undo")).unwrap();
    poll_to_completion(&mut handle);

    // When: Polling twice more
    let first = handle.poll().unwrap();
    let second = handle.poll().unwrap();

    // Then: The same completion is reported and it is not a success
    assert_eq!(first, SaveStatus::Complete { result: 28 });
    assert_eq!(second, first);
    assert!(!first.succeeded());
    assert_eq!(handle.progress(), Some(SaveProgress::Percent(100)));

    handle.release().unwrap();
}

/// WHAT: Release is refused while a save is still running
/// WHY: Discarding the history under a running save would race the engine
#[test]
#[allow(clippy::unwrap_used)]
fn given_running_save_when_releasing_then_save_in_progress() {
    // Given: A slow save in flight
    let dir = tempfile::tempdir().unwrap();
    let (recorder, probe) = recorder_with(SimulatedEngine::new().with_save_pace(SLOW_SAVE));
    recorder.start().unwrap();
    let mut handle = recorder.stop().unwrap();
    handle.save_async(dir.path().join("busy.undo")).unwrap();

    // When: Releasing immediately
    let result = handle.release();

    // Then: Refused; the handle stays live and can be released once done
    assert!(matches!(result, Err(RecorderError::SaveInProgress { .. })));
    assert!(!handle.is_released());
    assert_eq!(probe.live_contexts(), 1);

    handle.completion_descriptor().unwrap().wait().unwrap();
    handle.release().unwrap();
    assert_eq!(probe.live_contexts(), 0);
}

/// WHAT: Release after waiting on the descriptor needs no poll
/// WHY: A caller that only waited still observes completion through release
#[test]
#[allow(clippy::unwrap_used)]
fn given_descriptor_waited_when_releasing_then_succeeds_without_poll() {
    // Given: A save whose completion was observed only through the descriptor
    let dir = tempfile::tempdir().unwrap();
    let (recorder, _probe) = recorder_with(SimulatedEngine::new());
    recorder.start().unwrap();
    let mut handle = recorder.stop().unwrap();
    handle.save_async(dir.path().join("waited.undo")).unwrap();
    handle.completion_descriptor().unwrap().wait().unwrap();

    // When: Releasing
    let result = handle.release();

    // Then: Succeeds
    assert!(result.is_ok());
}

/// WHAT: Every operation fails after release, including a second release
/// WHY: A released handle no longer refers to any history
#[test]
#[allow(clippy::unwrap_used)]
fn given_released_handle_when_operating_then_released_errors() {
    // Given: A released handle
    let dir = tempfile::tempdir().unwrap();
    let (recorder, _probe) = recorder_with(SimulatedEngine::new());
    recorder.start().unwrap();
    let mut handle = recorder.stop().unwrap();
    handle.release().unwrap();

    // When / Then: Each operation reports Released
    assert!(matches!(handle.release(), Err(RecorderError::Released { .. })));
    assert!(matches!(handle.poll(), Err(RecorderError::Released { .. })));
    assert!(matches!(
        handle.completion_descriptor(),
        Err(RecorderError::Released { .. })
    ));
    assert!(matches!(
        handle.save_async(dir.path().join("late.undo")),
        Err(RecorderError::Released { .. })
    ));
}

/// WHAT: A handle can save again after its first save completed
/// WHY: The overlap guard only applies to saves still in flight
#[test]
#[allow(clippy::unwrap_used)]
fn given_completed_save_when_saving_again_then_second_save_runs() {
    // Given: A handle whose first save has completed
    let dir = tempfile::tempdir().unwrap();
    let (recorder, _probe) = recorder_with(SimulatedEngine::new());
    recorder.start().unwrap();
    let mut handle = recorder.stop().unwrap();
    handle.save_async(dir.path().join("first.undo")).unwrap();
    poll_to_completion(&mut handle);

    // When: Saving to a second file
    handle.save_async(dir.path().join("second.undo")).unwrap();
    let statuses = poll_to_completion(&mut handle);

    // Then: Both files are identical recordings of the same history
    assert_eq!(statuses.last(), Some(&SaveStatus::Complete { result: 0 }));
    let first = fs::read(dir.path().join("first.undo")).unwrap();
    let second = fs::read(dir.path().join("second.undo")).unwrap();
    assert_eq!(first, second);

    handle.release().unwrap();
}

/// WHAT: A handle from an earlier session can be saved while a new session records
/// WHY: Retained history is independent of the live session
#[test]
#[allow(clippy::unwrap_used)]
fn given_new_session_started_when_saving_old_handle_then_allowed() {
    // Given: A handle from a finished session and a new active session
    let dir = tempfile::tempdir().unwrap();
    let (recorder, _probe) = recorder_with(SimulatedEngine::new());
    recorder.start().unwrap();
    let mut handle = recorder.stop().unwrap();
    recorder.start().unwrap();

    // When: Saving the old handle
    handle.save_async(dir.path().join("old.undo")).unwrap();
    let statuses = poll_to_completion(&mut handle);

    // Then: The save completes and the new session is unaffected
    assert_eq!(statuses.last(), Some(&SaveStatus::Complete { result: 0 }));
    assert!(recorder.is_recording());

    handle.release().unwrap();
    recorder.stop_and_discard().unwrap();
}

/// WHAT: A save to an unwritable location reports the OS error as its result
/// WHY: Engine-side write failures surface through completion, not through save_async
#[test]
#[allow(clippy::unwrap_used)]
fn given_missing_directory_when_saving_then_completes_with_error_result() {
    // Given: A target inside a directory that does not exist
    let dir = tempfile::tempdir().unwrap();
    let (recorder, _probe) = recorder_with(SimulatedEngine::new());
    recorder.start().unwrap();
    let mut handle = recorder.stop().unwrap();

    // When: Saving there
    handle
        .save_async(dir.path().join("missing").join("out.undo"))
        .unwrap();
    let statuses = poll_to_completion(&mut handle);

    // Then: Completion carries ENOENT
    assert_eq!(
        statuses.last(),
        Some(&SaveStatus::Complete {
            result: libc::ENOENT
        })
    );

    handle.release().unwrap();
}
