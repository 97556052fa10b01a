//! Boundary with the external recording engine.
//!
//! Everything the recorder needs from the engine goes through [`Engine`].
//! Implementations are only ever called with the recorder's global lock held,
//! so they never see concurrent calls.

#[cfg(feature = "native")]
mod native;
mod simulated;

#[cfg(feature = "native")]
pub(crate) use native::NativeEngine;
pub use simulated::{RECORDING_MAGIC, SHMEM_LOG_MAGIC, SimulatedEngine, SimulatedProbe};

use crate::annotations::{ContentType, TestResult};

use std::{
    os::fd::RawFd,
    path::{Path, PathBuf},
};

/// Result of a single engine call.
pub type EngineResult<T> = std::result::Result<T, EngineFailure>;

/// Failure indicator of an engine call plus its out-of-band error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineFailure {
    /// Return code of the call. Negative values may carry a negated errno.
    pub rc: i32,
    /// OS error number observed after the call.
    pub errno: i32,
    /// Engine error code; 0 means the engine gave no specific category.
    pub code: u32,
}

impl EngineFailure {
    /// A failure described only by an OS error number.
    pub fn os(errno: i32) -> Self {
        Self {
            rc: -errno,
            errno,
            code: 0,
        }
    }

    /// A failure carrying an engine error code.
    pub fn engine(code: u32, errno: i32) -> Self {
        Self {
            rc: -1,
            errno,
            code,
        }
    }
}

/// Opaque engine reference to retained recording history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawContext(usize);

impl RawContext {
    /// Wrap an engine-provided reference.
    pub fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    /// The engine-provided reference.
    pub fn into_raw(self) -> usize {
        self.0
    }
}

/// Opaque engine reference to a test annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawAnnotation(usize);

impl RawAnnotation {
    /// Wrap an engine-provided reference.
    pub fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    /// The engine-provided reference.
    pub fn into_raw(self) -> usize {
        self.0
    }
}

/// Progress report of an asynchronous save, as returned by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSaveStatus {
    /// Whether the save has finished.
    pub complete: bool,
    /// Percentage complete, or negative when unknown.
    pub progress: i32,
    /// Result code of the save; only meaningful once complete.
    pub result: i32,
}

/// Content attached to an annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationPayload<'a> {
    /// Arbitrary bytes, including NUL.
    Raw(&'a [u8]),
    /// Text in a declared format.
    Text(ContentType, &'a str),
    /// A signed integer.
    Int(i64),
}

/// Something recorded against a test annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestAnnotationEvent<'a> {
    /// The test started.
    Start,
    /// The test finished.
    End,
    /// The test verdict.
    Result(TestResult),
    /// Textual output of the test.
    Output(ContentType, &'a str),
    /// Free-form data under a detail label.
    Add {
        /// Label distinguishing related annotations.
        detail: &'a str,
        /// Attached content.
        payload: AnnotationPayload<'a>,
    },
}

/// Entry points of the recording engine.
pub trait Engine: Send {
    /// Version string of the engine.
    fn version(&mut self) -> String;

    /// Attach to the process and start recording.
    fn start(&mut self) -> EngineResult<()>;

    /// Stop recording. With `keep` the history is retained and a context is
    /// returned; without it the history is discarded immediately.
    fn stop(&mut self, keep: bool) -> EngineResult<Option<RawContext>>;

    /// Write the history recorded so far while still recording.
    fn save(&mut self, path: &Path) -> EngineResult<()>;

    /// Begin writing a retained context in the background.
    fn save_async(&mut self, context: RawContext, path: &Path) -> EngineResult<()>;

    /// Progress of the background save of `context`.
    fn poll_saving_progress(&mut self, context: RawContext) -> EngineResult<RawSaveStatus>;

    /// Descriptor that becomes readable (one byte) when a save of `context`
    /// completes. Owned by the engine and closed by [`Engine::discard`].
    fn select_descriptor(&mut self, context: RawContext) -> EngineResult<RawFd>;

    /// Free a retained context. The reference is invalid afterwards.
    fn discard(&mut self, context: RawContext) -> EngineResult<()>;

    /// Save to `path` if the process terminates while being recorded.
    fn save_on_termination(&mut self, path: &Path) -> EngineResult<()>;

    /// Cancel a previous [`Engine::save_on_termination`].
    fn cancel_save_on_termination(&mut self) -> EngineResult<()>;

    /// Maximum size of the event log in bytes.
    fn event_log_size(&mut self) -> EngineResult<u64>;

    /// Set the maximum size of the event log in bytes.
    fn set_event_log_size(&mut self, bytes: u64) -> EngineResult<()>;

    /// Whether symbol files are embedded in saved recordings.
    fn include_symbol_files(&mut self, include: bool) -> EngineResult<()>;

    /// Path of the shared memory access log, if configured.
    fn shmem_log_path(&mut self) -> EngineResult<Option<PathBuf>>;

    /// Set or clear the path of the shared memory access log.
    fn set_shmem_log_path(&mut self, path: Option<&Path>) -> EngineResult<()>;

    /// Maximum size of the shared memory access log in bytes.
    fn shmem_log_size(&mut self) -> EngineResult<u64>;

    /// Set the maximum size of the shared memory access log in bytes.
    fn set_shmem_log_size(&mut self, bytes: u64) -> EngineResult<()>;

    /// Insert an annotation at the current execution point.
    fn annotate(
        &mut self,
        name: &str,
        detail: Option<&str>,
        payload: AnnotationPayload<'_>,
    ) -> EngineResult<()>;

    /// Allocate a test annotation context.
    fn test_annotation_new(
        &mut self,
        base_name: &str,
        add_run_suffix: bool,
    ) -> EngineResult<RawAnnotation>;

    /// Record an event against a test annotation context.
    fn test_annotation_record(
        &mut self,
        annotation: RawAnnotation,
        event: TestAnnotationEvent<'_>,
    ) -> EngineResult<()>;

    /// Free a test annotation context.
    fn test_annotation_free(&mut self, annotation: RawAnnotation);
}
