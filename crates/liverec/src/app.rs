use crate::{
    AppError, AppResult,
    config::{Config, SaveMode},
};

use std::{
    fs,
    panic::Location,
    path::{Path, PathBuf},
    time::Instant,
};

use error_location::ErrorLocation;
use liverec_core::{
    AnnotationPayload, ContentType, Recorder, RecorderError, RecordingHandle, SaveStatus,
    TestAnnotation, TestResult,
};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Workload steps between progress annotations.
const ANNOTATION_STRIDE: u32 = 1_000;

/// Outcome of one recorded run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Session the recording belongs to.
    pub session_id: Uuid,
    /// Recording file.
    pub path: PathBuf,
    /// Size of the recording file.
    pub bytes: u64,
    /// Result of the recorded workload.
    pub checksum: u64,
}

/// Records its own workload and saves the recording.
pub struct App<'r> {
    pub(crate) recorder: &'r Recorder,
    pub(crate) config: Config,
}

impl<'r> App<'r> {
    /// Create an app driving `recorder`.
    pub fn new(recorder: &'r Recorder, config: Config) -> Self {
        Self { recorder, config }
    }

    /// Configure, record the workload, save and release.
    #[instrument(skip(self))]
    pub async fn run(self) -> AppResult<RunSummary> {
        info!(engine = %self.recorder.version(), "LiveRec starting");

        self.apply_settings()?;
        fs::create_dir_all(&self.config.save.output_dir)?;

        self.recorder.start()?;
        let checksum = match self.run_workload() {
            Ok(checksum) => checksum,
            Err(e) => {
                if let Err(discard) = self.recorder.stop_and_discard() {
                    error!(error = %discard, "Failed to discard after workload error");
                }
                return Err(e);
            }
        };

        let mut handle = self.recorder.stop()?;
        let session_id = handle.session_id();
        let path = self
            .config
            .save
            .output_dir
            .join(format!("liverec-{}.undo", session_id));

        let started = Instant::now();
        let saved = self.save(&mut handle, &path).await;
        let released = self.finish(&mut handle).await;
        saved?;
        released?;

        let bytes = fs::metadata(&path)?.len();

        info!(
            session_id = %session_id,
            path = ?path,
            bytes,
            duration_ms = started.elapsed().as_millis(),
            "Recording saved"
        );

        Ok(RunSummary {
            session_id,
            path,
            bytes,
            checksum,
        })
    }

    /// Push recorder settings to the engine. Must run before `start`.
    #[track_caller]
    #[instrument(skip(self))]
    pub(crate) fn apply_settings(&self) -> AppResult<()> {
        let settings = &self.config.recorder;

        if let Some(bytes) = settings.event_log_size {
            self.recorder.set_event_log_size(bytes)?;
        }
        self.recorder
            .include_symbol_files(settings.include_symbol_files)?;
        if let Some(path) = &settings.shmem_log_path {
            self.recorder.set_shmem_log_path(path)?;
        }
        if let Some(bytes) = settings.shmem_log_size {
            self.recorder.set_shmem_log_size(bytes)?;
        }
        if let Some(path) = &settings.save_on_termination {
            self.recorder.save_on_termination(path)?;
        }

        debug!(
            event_log_size = self.recorder.event_log_size()?,
            include_symbol_files = settings.include_symbol_files,
            "Recorder configured"
        );

        Ok(())
    }

    /// Record the workload under a test annotation, marking it failed on error.
    fn run_workload(&self) -> AppResult<u64> {
        let mut test = self.recorder.test_annotation("workload", true)?;

        let outcome = self.record_workload(&mut test);
        if outcome.is_err()
            && let Err(e) = test.set_result(TestResult::Failure)
        {
            warn!(error = %e, "Failed to mark workload as failed");
        }
        test.release()?;

        outcome
    }

    /// Something worth recording: Collatz step counts, annotated as it goes.
    fn record_workload(&self, test: &mut TestAnnotation) -> AppResult<u64> {
        let iterations = self.config.workload.iterations;

        test.start()?;
        test.add_int("iterations", i64::from(iterations))?;

        let mut checksum = 0u64;
        for i in 1..=iterations {
            checksum = checksum.wrapping_add(collatz_steps(u64::from(i)));
            if i % ANNOTATION_STRIDE == 0 {
                self.recorder.annotate(
                    "workload",
                    Some("progress"),
                    AnnotationPayload::Int(i64::from(i)),
                )?;
            }
        }

        test.set_output(ContentType::UnstructuredText, &format!("checksum {}", checksum))?;
        test.set_result(TestResult::Success)?;
        test.end()?;

        Ok(checksum)
    }

    async fn save(&self, handle: &mut RecordingHandle, path: &Path) -> AppResult<()> {
        let save = &self.config.save;

        match save.mode {
            SaveMode::Background => {
                let rx = handle.save_background(path);
                match timeout(save.timeout(), rx).await {
                    Ok(Ok(outcome)) => outcome.map_err(AppError::from),
                    Ok(Err(_)) => Err(AppError::ChannelClosed {
                        location: ErrorLocation::from(Location::caller()),
                    }),
                    Err(_) => Err(AppError::SaveTimedOut {
                        timeout_secs: save.timeout_secs,
                        location: ErrorLocation::from(Location::caller()),
                    }),
                }
            }
            SaveMode::Poll => {
                handle.save_async(path)?;
                let started = Instant::now();
                loop {
                    match handle.poll()? {
                        SaveStatus::Complete { result } => return check_result(result),
                        SaveStatus::InProgress { progress } => {
                            debug!(progress = ?progress, "Saving");
                        }
                    }
                    if started.elapsed() >= save.timeout() {
                        return Err(AppError::SaveTimedOut {
                            timeout_secs: save.timeout_secs,
                            location: ErrorLocation::from(Location::caller()),
                        });
                    }
                    sleep(save.poll_interval()).await;
                }
            }
            SaveMode::Descriptor => {
                handle.save_async(path)?;
                let completed = tokio::task::block_in_place(|| {
                    handle
                        .completion_descriptor()
                        .and_then(|fd| fd.wait_timeout(save.timeout()))
                })?;
                if !completed {
                    return Err(AppError::SaveTimedOut {
                        timeout_secs: save.timeout_secs,
                        location: ErrorLocation::from(Location::caller()),
                    });
                }
                match handle.poll()? {
                    SaveStatus::Complete { result } => check_result(result),
                    SaveStatus::InProgress { .. } => Err(AppError::from(
                        RecorderError::SaveInProgress {
                            location: ErrorLocation::from(Location::caller()),
                        },
                    )),
                }
            }
        }
    }

    /// Release the handle, first letting any save still running finish.
    async fn finish(&self, handle: &mut RecordingHandle) -> AppResult<()> {
        while handle.is_saving() {
            if handle.poll()?.is_complete() {
                break;
            }
            sleep(self.config.save.poll_interval()).await;
        }

        handle.release()?;
        Ok(())
    }
}

#[track_caller]
fn check_result(result: i32) -> AppResult<()> {
    if result == 0 {
        return Ok(());
    }
    Err(AppError::from(RecorderError::SaveFailed {
        code: result,
        location: ErrorLocation::from(Location::caller()),
    }))
}

/// Number of Collatz steps from `n` down to 1.
pub(crate) fn collatz_steps(mut n: u64) -> u64 {
    let mut steps = 0;
    while n > 1 {
        n = if n % 2 == 0 { n / 2 } else { 3 * n + 1 };
        steps += 1;
    }
    steps
}
