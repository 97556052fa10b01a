//! In-process stand-in for the recording engine.
//!
//! Produces files with the engine's recording header, runs asynchronous saves
//! on a worker thread and signals completion through a pipe, so every code path
//! of the recorder can be exercised without the vendor library.

use crate::engine::{
    AnnotationPayload, Engine, EngineFailure, EngineResult, RawAnnotation, RawContext,
    RawSaveStatus, TestAnnotationEvent,
};

use std::{
    collections::HashMap,
    fs::{self, File, OpenOptions},
    io::{self, Write},
    os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::{debug, warn};

/// Header every recording file starts with.
pub const RECORDING_MAGIC: &[u8] = b"HD\x10\x00\x00\x00UndoDB recording";

/// Header of the shared memory access log.
pub const SHMEM_LOG_MAGIC: &[u8] = b"UndoDB shmem log";

const DEFAULT_EVENT_LOG_SIZE: u64 = 64 * 1024 * 1024;
const HISTORY_BYTES: u64 = 32 * 1024;
const SYMBOL_BYTES: usize = 64 * 1024;
const SAVE_CHUNKS: usize = 20;
const DEFAULT_SAVE_PACE: Duration = Duration::from_millis(2);

/// Counters shared between a [`SimulatedEngine`] and whoever inspects it.
#[derive(Debug, Default)]
struct ProbeCounters {
    starts: AtomicUsize,
    live_contexts: AtomicUsize,
    discarded: AtomicUsize,
    live_test_annotations: AtomicUsize,
    annotations: AtomicUsize,
}

/// Read-only view of a [`SimulatedEngine`] that outlives moving the engine
/// into a [`Recorder`](crate::Recorder).
#[derive(Debug, Clone, Default)]
pub struct SimulatedProbe {
    counters: Arc<ProbeCounters>,
}

impl SimulatedProbe {
    /// Number of successful starts.
    pub fn starts(&self) -> usize {
        self.counters.starts.load(Ordering::SeqCst)
    }

    /// Retained contexts not yet discarded.
    pub fn live_contexts(&self) -> usize {
        self.counters.live_contexts.load(Ordering::SeqCst)
    }

    /// Contexts discarded so far.
    pub fn discarded(&self) -> usize {
        self.counters.discarded.load(Ordering::SeqCst)
    }

    /// Test annotation contexts not yet freed.
    pub fn live_test_annotations(&self) -> usize {
        self.counters.live_test_annotations.load(Ordering::SeqCst)
    }

    /// Annotations recorded so far, including test annotation events.
    pub fn annotations(&self) -> usize {
        self.counters.annotations.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct JobState {
    progress: AtomicI32,
    complete: AtomicBool,
    result: AtomicI32,
}

struct SaveJob {
    state: Arc<JobState>,
    worker: Option<JoinHandle<()>>,
}

struct SimContext {
    snapshot: Arc<Vec<u8>>,
    notify_read: OwnedFd,
    notify_write: Arc<File>,
    job: Option<SaveJob>,
}

impl SimContext {
    fn join_worker(&mut self) {
        if let Some(worker) = self.job.as_mut().and_then(|job| job.worker.take())
            && worker.join().is_err()
        {
            warn!("Simulated save worker panicked");
        }
    }
}

struct SimTestAnnotation {
    name: String,
}

/// In-process recording engine.
pub struct SimulatedEngine {
    recording: bool,
    event_log_size: u64,
    include_symbols: bool,
    shmem_log_path: Option<PathBuf>,
    shmem_log_size: u64,
    save_on_termination: Option<PathBuf>,
    annotations: Vec<String>,
    contexts: HashMap<usize, SimContext>,
    test_annotations: HashMap<usize, SimTestAnnotation>,
    test_runs: HashMap<String, u32>,
    next_id: usize,
    save_pace: Duration,
    save_result: i32,
    start_failure: Option<EngineFailure>,
    stop_failure: bool,
    probe: SimulatedProbe,
}

impl SimulatedEngine {
    /// Create an idle engine with default settings.
    pub fn new() -> Self {
        Self {
            recording: false,
            event_log_size: DEFAULT_EVENT_LOG_SIZE,
            include_symbols: true,
            shmem_log_path: None,
            shmem_log_size: 0,
            save_on_termination: None,
            annotations: Vec::new(),
            contexts: HashMap::new(),
            test_annotations: HashMap::new(),
            test_runs: HashMap::new(),
            next_id: 1,
            save_pace: DEFAULT_SAVE_PACE,
            save_result: 0,
            start_failure: None,
            stop_failure: false,
            probe: SimulatedProbe::default(),
        }
    }

    /// Delay between the chunks written by an asynchronous save.
    pub fn with_save_pace(mut self, pace: Duration) -> Self {
        self.save_pace = pace;
        self
    }

    /// Make the next start fail with `failure`.
    pub fn with_start_failure(mut self, failure: EngineFailure) -> Self {
        self.start_failure = Some(failure);
        self
    }

    /// Make the next stop fail to produce a context.
    pub fn with_stop_failure(mut self) -> Self {
        self.stop_failure = true;
        self
    }

    /// Result code reported by every completed asynchronous save.
    pub fn with_save_result(mut self, code: i32) -> Self {
        self.save_result = code;
        self
    }

    /// Handle for inspecting this engine after it has been moved.
    pub fn probe(&self) -> SimulatedProbe {
        self.probe.clone()
    }

    fn snapshot(&self) -> Vec<u8> {
        let history = self.event_log_size.min(HISTORY_BYTES) as usize;
        let mut out = Vec::with_capacity(RECORDING_MAGIC.len() + history + SYMBOL_BYTES);

        out.extend_from_slice(RECORDING_MAGIC);
        out.extend((0..history).map(|i| (i % 251) as u8));
        for line in &self.annotations {
            out.extend_from_slice(line.as_bytes());
            out.push(b'\n');
        }
        if self.include_symbols {
            out.extend(std::iter::repeat_n(0x5a, SYMBOL_BYTES));
        }

        out
    }

    fn context_mut(&mut self, context: RawContext) -> EngineResult<&mut SimContext> {
        self.contexts
            .get_mut(&context.into_raw())
            .ok_or(EngineFailure::os(libc::EINVAL))
    }

    fn open_shmem_log(path: &Path) -> io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        if file.metadata()?.len() == 0 {
            file.write_all(SHMEM_LOG_MAGIC)?;
        }
        Ok(())
    }

    fn record_annotation(&mut self, line: String) {
        self.annotations.push(line);
        self.probe.counters.annotations.fetch_add(1, Ordering::SeqCst);
    }
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for SimulatedEngine {
    fn version(&mut self) -> String {
        format!("simulated-{}", env!("CARGO_PKG_VERSION"))
    }

    fn start(&mut self) -> EngineResult<()> {
        if let Some(failure) = self.start_failure.take() {
            return Err(failure);
        }
        if self.recording {
            return Err(EngineFailure::os(libc::EBUSY));
        }

        if let Some(path) = &self.shmem_log_path {
            Self::open_shmem_log(path).map_err(os_failure)?;
        }

        self.recording = true;
        self.annotations.clear();
        self.probe.counters.starts.fetch_add(1, Ordering::SeqCst);
        debug!("Simulated engine attached");

        Ok(())
    }

    fn stop(&mut self, keep: bool) -> EngineResult<Option<RawContext>> {
        if !self.recording {
            return Err(EngineFailure::os(libc::EINVAL));
        }
        if std::mem::take(&mut self.stop_failure) {
            return Err(EngineFailure::engine(4, 0));
        }

        self.recording = false;
        self.save_on_termination = None;

        if !keep {
            debug!("Simulated engine detached, history discarded");
            return Ok(None);
        }

        let (notify_read, notify_write) = notify_pipe().map_err(os_failure)?;
        let id = self.next_id;
        self.next_id += 1;
        self.contexts.insert(
            id,
            SimContext {
                snapshot: Arc::new(self.snapshot()),
                notify_read,
                notify_write: Arc::new(notify_write),
                job: None,
            },
        );
        self.probe.counters.live_contexts.fetch_add(1, Ordering::SeqCst);
        debug!(context = id, "Simulated engine detached, history retained");

        Ok(Some(RawContext::from_raw(id)))
    }

    fn save(&mut self, path: &Path) -> EngineResult<()> {
        if !self.recording {
            return Err(EngineFailure::os(libc::EINVAL));
        }
        fs::write(path, self.snapshot()).map_err(os_failure)
    }

    fn save_async(&mut self, context: RawContext, path: &Path) -> EngineResult<()> {
        let pace = self.save_pace;
        let result_code = self.save_result;
        let ctx = self.context_mut(context)?;

        if let Some(job) = &ctx.job
            && !job.state.complete.load(Ordering::SeqCst)
        {
            return Err(EngineFailure::os(libc::EBUSY));
        }
        ctx.join_worker();

        let state = Arc::new(JobState {
            progress: AtomicI32::new(-1),
            complete: AtomicBool::new(false),
            result: AtomicI32::new(0),
        });
        let snapshot = Arc::clone(&ctx.snapshot);
        let notify = Arc::clone(&ctx.notify_write);
        let worker_state = Arc::clone(&state);
        let path = path.to_path_buf();

        let worker = thread::Builder::new()
            .name("liverec-sim-save".into())
            .spawn(move || {
                let result = match write_chunked(&path, &snapshot, pace, &worker_state) {
                    Ok(()) => result_code,
                    Err(e) => e.raw_os_error().unwrap_or(libc::EIO),
                };
                worker_state.result.store(result, Ordering::SeqCst);
                worker_state.complete.store(true, Ordering::SeqCst);
                if let Err(e) = (&*notify).write_all(&[1]) {
                    warn!(error = %e, "Failed to signal save completion");
                }
            })
            .map_err(os_failure)?;

        ctx.job = Some(SaveJob {
            state,
            worker: Some(worker),
        });

        Ok(())
    }

    fn poll_saving_progress(&mut self, context: RawContext) -> EngineResult<RawSaveStatus> {
        let ctx = self.context_mut(context)?;
        let job = ctx.job.as_ref().ok_or(EngineFailure::os(libc::EINVAL))?;

        // Complete is read first so a finished save never reports stale progress.
        let complete = job.state.complete.load(Ordering::SeqCst);
        Ok(RawSaveStatus {
            complete,
            progress: job.state.progress.load(Ordering::SeqCst),
            result: job.state.result.load(Ordering::SeqCst),
        })
    }

    fn select_descriptor(&mut self, context: RawContext) -> EngineResult<RawFd> {
        Ok(self.context_mut(context)?.notify_read.as_raw_fd())
    }

    fn discard(&mut self, context: RawContext) -> EngineResult<()> {
        let mut ctx = self
            .contexts
            .remove(&context.into_raw())
            .ok_or(EngineFailure::os(libc::EINVAL))?;
        ctx.join_worker();

        self.probe.counters.live_contexts.fetch_sub(1, Ordering::SeqCst);
        self.probe.counters.discarded.fetch_add(1, Ordering::SeqCst);
        debug!(context = context.into_raw(), "Simulated context discarded");

        Ok(())
    }

    fn save_on_termination(&mut self, path: &Path) -> EngineResult<()> {
        self.save_on_termination = Some(path.to_path_buf());
        Ok(())
    }

    fn cancel_save_on_termination(&mut self) -> EngineResult<()> {
        self.save_on_termination = None;
        Ok(())
    }

    fn event_log_size(&mut self) -> EngineResult<u64> {
        Ok(self.event_log_size)
    }

    fn set_event_log_size(&mut self, bytes: u64) -> EngineResult<()> {
        if bytes == 0 {
            return Err(EngineFailure::os(libc::EINVAL));
        }
        self.event_log_size = bytes;
        Ok(())
    }

    fn include_symbol_files(&mut self, include: bool) -> EngineResult<()> {
        self.include_symbols = include;
        Ok(())
    }

    fn shmem_log_path(&mut self) -> EngineResult<Option<PathBuf>> {
        Ok(self.shmem_log_path.clone())
    }

    fn set_shmem_log_path(&mut self, path: Option<&Path>) -> EngineResult<()> {
        if self.recording {
            return Err(EngineFailure::os(libc::EINVAL));
        }
        if let Some(path) = path
            && path.extension().is_none_or(|ext| ext != "shmem")
        {
            return Err(EngineFailure::os(libc::EINVAL));
        }
        self.shmem_log_path = path.map(Path::to_path_buf);
        Ok(())
    }

    fn shmem_log_size(&mut self) -> EngineResult<u64> {
        Ok(self.shmem_log_size)
    }

    fn set_shmem_log_size(&mut self, bytes: u64) -> EngineResult<()> {
        self.shmem_log_size = bytes;
        Ok(())
    }

    fn annotate(
        &mut self,
        name: &str,
        detail: Option<&str>,
        payload: AnnotationPayload<'_>,
    ) -> EngineResult<()> {
        if name.is_empty() {
            return Err(EngineFailure::os(libc::EINVAL));
        }
        let line = format!("{name}\t{}\t{}", detail.unwrap_or(""), describe(payload));
        self.record_annotation(line);
        Ok(())
    }

    fn test_annotation_new(
        &mut self,
        base_name: &str,
        add_run_suffix: bool,
    ) -> EngineResult<RawAnnotation> {
        if base_name.is_empty() {
            return Err(EngineFailure::os(libc::EINVAL));
        }

        let name = if add_run_suffix {
            let run = self.test_runs.entry(base_name.to_string()).or_insert(0);
            *run += 1;
            format!("{base_name}-run{run}")
        } else {
            base_name.to_string()
        };

        let id = self.next_id;
        self.next_id += 1;
        self.test_annotations.insert(id, SimTestAnnotation { name });
        self.probe
            .counters
            .live_test_annotations
            .fetch_add(1, Ordering::SeqCst);

        Ok(RawAnnotation::from_raw(id))
    }

    fn test_annotation_record(
        &mut self,
        annotation: RawAnnotation,
        event: TestAnnotationEvent<'_>,
    ) -> EngineResult<()> {
        let name = self
            .test_annotations
            .get(&annotation.into_raw())
            .map(|a| a.name.clone())
            .ok_or(EngineFailure::os(libc::EINVAL))?;

        let line = match event {
            TestAnnotationEvent::Start => format!("{name}\tu-test-start\t"),
            TestAnnotationEvent::End => format!("{name}\tu-test-end\t"),
            TestAnnotationEvent::Result(result) => {
                format!("{name}\tu-test-result\t{}", result.as_raw())
            }
            TestAnnotationEvent::Output(content_type, text) => format!(
                "{name}\tu-test-output\t{}",
                describe(AnnotationPayload::Text(content_type, text))
            ),
            TestAnnotationEvent::Add { detail, payload } => {
                format!("{name}\t{detail}\t{}", describe(payload))
            }
        };
        self.record_annotation(line);

        Ok(())
    }

    fn test_annotation_free(&mut self, annotation: RawAnnotation) {
        if self.test_annotations.remove(&annotation.into_raw()).is_some() {
            self.probe
                .counters
                .live_test_annotations
                .fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for SimulatedEngine {
    fn drop(&mut self) {
        if self.recording
            && let Some(path) = self.save_on_termination.take()
        {
            match fs::write(&path, self.snapshot()) {
                Ok(()) => debug!(path = ?path, "Saved recording on termination"),
                Err(e) => warn!(path = ?path, error = %e, "Failed to save on termination"),
            }
        }
        for ctx in self.contexts.values_mut() {
            ctx.join_worker();
        }
    }
}

fn describe(payload: AnnotationPayload<'_>) -> String {
    match payload {
        AnnotationPayload::Raw(bytes) => format!("raw:{}", bytes.len()),
        AnnotationPayload::Text(content_type, text) => {
            format!("text/{}:{}", content_type.as_raw(), text)
        }
        AnnotationPayload::Int(value) => format!("int:{value}"),
    }
}

fn os_failure(e: io::Error) -> EngineFailure {
    EngineFailure::os(e.raw_os_error().unwrap_or(libc::EIO))
}

fn notify_pipe() -> io::Result<(OwnedFd, File)> {
    let mut fds: [libc::c_int; 2] = [-1; 2];

    // SAFETY: `fds` is a valid two-element array for pipe() to fill.
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: pipe() succeeded, so both descriptors are open and owned by nobody else.
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };

    Ok((read, File::from(write)))
}

fn write_chunked(path: &Path, data: &[u8], pace: Duration, state: &JobState) -> io::Result<()> {
    let mut file = File::create(path)?;
    let chunk = data.len().div_ceil(SAVE_CHUNKS).max(1);
    let mut written = 0usize;

    state.progress.store(0, Ordering::SeqCst);
    for piece in data.chunks(chunk) {
        file.write_all(piece)?;
        written += piece.len();
        let percent = (written * 100 / data.len().max(1)).min(100) as i32;
        state.progress.store(percent, Ordering::SeqCst);
        thread::sleep(pace);
    }
    file.sync_all()?;

    Ok(())
}
