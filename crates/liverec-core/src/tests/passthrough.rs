use crate::{RECORDING_MAGIC, SHMEM_LOG_MAGIC, SimulatedEngine, tests::recorder_with};

use std::fs;

/// WHAT: Event log size reads back what was set, including after doubling
/// WHY: Configuration must round-trip through the engine unchanged
#[test]
#[allow(clippy::unwrap_used)]
fn given_event_log_size_when_set_and_doubled_then_reads_back() {
    // Given: A recorder
    let (recorder, _probe) = recorder_with(SimulatedEngine::new());
    let n = 16 * 1024 * 1024;

    // When: Setting N, then 2N
    recorder.set_event_log_size(n).unwrap();
    let first = recorder.event_log_size().unwrap();
    recorder.set_event_log_size(first * 2).unwrap();
    let second = recorder.event_log_size().unwrap();

    // Then: Each read matches the write
    assert_eq!(first, n);
    assert_eq!(second, 2 * n);
}

/// WHAT: A zero-sized event log is rejected with EINVAL
/// WHY: Engine argument errors surface as OS errors
#[test]
fn given_zero_event_log_size_when_setting_then_einval() {
    // Given: A recorder
    let (recorder, _probe) = recorder_with(SimulatedEngine::new());

    // When: Setting zero
    let result = recorder.set_event_log_size(0);

    // Then: EINVAL
    assert_eq!(result.err().and_then(|e| e.raw_os_error()), Some(libc::EINVAL));
}

/// WHAT: Recordings without symbol files are smaller
/// WHY: Leaving symbols out is the documented way to shrink recordings
#[test]
#[allow(clippy::unwrap_used)]
fn given_symbols_excluded_when_saving_then_recording_smaller() {
    // Given: A recording session
    let dir = tempfile::tempdir().unwrap();
    let (recorder, _probe) = recorder_with(SimulatedEngine::new());
    let with_symbols = dir.path().join("with.undo");
    let without_symbols = dir.path().join("without.undo");
    recorder.start().unwrap();

    // When: Saving with and without symbol files
    recorder.include_symbol_files(true).unwrap();
    recorder.save(&with_symbols).unwrap();
    recorder.include_symbol_files(false).unwrap();
    recorder.save(&without_symbols).unwrap();
    recorder.stop_and_discard().unwrap();

    // Then: Both are recordings and the one without symbols is smaller
    let with_len = fs::metadata(&with_symbols).unwrap().len();
    let without_len = fs::metadata(&without_symbols).unwrap().len();
    assert!(fs::read(&without_symbols).unwrap().starts_with(RECORDING_MAGIC));
    assert!(without_len < with_len);
}

/// WHAT: The shared memory log is created with its header when recording starts
/// WHY: The log must be configured up front and exist for the whole session
#[test]
#[allow(clippy::unwrap_used)]
fn given_shmem_log_configured_when_starting_then_log_created() {
    // Given: A configured shmem log path and size
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("accesses.shmem");
    let (recorder, _probe) = recorder_with(SimulatedEngine::new());
    recorder.set_shmem_log_path(&path).unwrap();
    recorder.set_shmem_log_size(1 << 20).unwrap();

    // When: Starting
    recorder.start().unwrap();

    // Then: The log exists with its header and the settings read back
    assert!(fs::read(&path).unwrap().starts_with(SHMEM_LOG_MAGIC));
    assert_eq!(recorder.shmem_log_path().unwrap(), Some(path));
    assert_eq!(recorder.shmem_log_size().unwrap(), 1 << 20);

    recorder.stop_and_discard().unwrap();
}

/// WHAT: Configuring the shmem log during a session is rejected with EINVAL
/// WHY: The engine only picks up the log when attaching
#[test]
#[allow(clippy::unwrap_used)]
fn given_recording_when_setting_shmem_log_then_einval() {
    // Given: An active session
    let dir = tempfile::tempdir().unwrap();
    let (recorder, _probe) = recorder_with(SimulatedEngine::new());
    recorder.start().unwrap();

    // When: Setting the shmem log path
    let result = recorder.set_shmem_log_path(dir.path().join("late.shmem"));

    // Then: EINVAL and nothing configured
    assert_eq!(result.err().and_then(|e| e.raw_os_error()), Some(libc::EINVAL));
    recorder.stop_and_discard().unwrap();
    assert_eq!(recorder.shmem_log_path().unwrap(), None);
}

/// WHAT: A shmem log path without the .shmem extension is rejected
/// WHY: The engine only accepts files it can recognise as shmem logs
#[test]
#[allow(clippy::unwrap_used)]
fn given_wrong_extension_when_setting_shmem_log_then_einval() {
    // Given: A path ending in .log
    let dir = tempfile::tempdir().unwrap();
    let (recorder, _probe) = recorder_with(SimulatedEngine::new());

    // When: Setting it, then clearing
    let result = recorder.set_shmem_log_path(dir.path().join("accesses.log"));
    let cleared = recorder.clear_shmem_log_path();

    // Then: Rejected; clearing is always allowed while idle
    assert_eq!(result.err().and_then(|e| e.raw_os_error()), Some(libc::EINVAL));
    assert!(cleared.is_ok());
}

/// WHAT: Save-on-termination writes a recording when the recorder goes away mid-session
/// WHY: Crashing or exiting programs still leave a recording behind
#[test]
#[allow(clippy::unwrap_used)]
fn given_save_on_termination_when_recorder_dropped_while_recording_then_recording_written() {
    // Given: An armed termination save during a session
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("exit.undo");
    let (recorder, _probe) = recorder_with(SimulatedEngine::new());
    recorder.start().unwrap();
    recorder.save_on_termination(&path).unwrap();

    // When: The recorder (and its engine) goes away
    drop(recorder);

    // Then: A recording was written
    assert!(fs::read(&path).unwrap().starts_with(RECORDING_MAGIC));
}

/// WHAT: Cancelling, or stopping the session, disarms save-on-termination
/// WHY: Only sessions still recording at exit should be saved
#[test]
#[allow(clippy::unwrap_used)]
fn given_cancelled_or_stopped_when_recorder_dropped_then_nothing_written() {
    // Given: One recorder cancelled, another stopped
    let dir = tempfile::tempdir().unwrap();
    let cancelled_path = dir.path().join("cancelled.undo");
    let stopped_path = dir.path().join("stopped.undo");

    let (cancelled, _probe) = recorder_with(SimulatedEngine::new());
    cancelled.start().unwrap();
    cancelled.save_on_termination(&cancelled_path).unwrap();
    cancelled.cancel_save_on_termination().unwrap();

    let (stopped, _probe) = recorder_with(SimulatedEngine::new());
    stopped.start().unwrap();
    stopped.save_on_termination(&stopped_path).unwrap();
    stopped.stop_and_discard().unwrap();

    // When: Both go away
    drop(cancelled);
    drop(stopped);

    // Then: Neither wrote a recording
    assert!(!cancelled_path.exists());
    assert!(!stopped_path.exists());
}

/// WHAT: The engine version is exposed
/// WHY: Hosts log which engine they run against
#[test]
fn given_recorder_when_asking_version_then_non_empty() {
    // Given: A recorder
    let (recorder, _probe) = recorder_with(SimulatedEngine::new());

    // When: Asking the version
    let version = recorder.version();

    // Then: Simulated engine version
    assert!(version.starts_with("simulated-"));
}
