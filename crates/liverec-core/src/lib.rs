//! LiveRec Core Library
//!
//! Safe control layer over a process recording engine: a single-slot
//! session state machine, handles to stopped recordings that must be
//! released explicitly, and an asynchronous save protocol usable by polling,
//! by blocking on a completion descriptor, or through a channel.
//!
//! # Example
//!
//! ```no_run
//! use liverec_core::{CoreResult, Recorder, SaveStatus, SimulatedEngine};
//!
//! use std::{thread::sleep, time::Duration};
//!
//! fn main() -> CoreResult<()> {
//!     let recorder = Recorder::new(SimulatedEngine::new());
//!
//!     recorder.start()?;
//!     // ... the code being recorded ...
//!     let mut handle = recorder.stop()?;
//!
//!     handle.save_async("run.undo")?;
//!     while let SaveStatus::InProgress { progress } = handle.poll()? {
//!         println!("Saving: {:?}", progress);
//!         sleep(Duration::from_millis(20));
//!     }
//!
//!     handle.release()
//! }
//! ```

mod annotations;
mod engine;
mod error;
mod handle;
mod leak_guard;
mod session;

pub use {
    annotations::{ContentType, TestAnnotation, TestResult},
    engine::{
        AnnotationPayload, Engine, EngineFailure, EngineResult, RECORDING_MAGIC, RawAnnotation,
        RawContext, RawSaveStatus, SHMEM_LOG_MAGIC, SimulatedEngine, SimulatedProbe,
        TestAnnotationEvent,
    },
    error::{EngineErrorCategory, RecorderError, Result as CoreResult, map_failure},
    handle::{CompletionDescriptor, RecordingHandle, SaveProgress, SaveReceiver, SaveStatus},
    leak_guard::LeakGuard,
    session::{Recorder, SessionState},
};

#[cfg(test)]
mod tests;
