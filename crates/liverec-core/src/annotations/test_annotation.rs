use crate::{
    CoreResult, LeakGuard, RecorderError,
    annotations::{ContentType, TestResult},
    engine::{AnnotationPayload, RawAnnotation, TestAnnotationEvent},
    error::map_failure,
    session::shared::Shared,
};

use std::{fmt, panic::Location, sync::Arc};

use error_location::ErrorLocation;
use tracing::{debug, instrument};

const RESOURCE: &str = "TestAnnotation";

/// Annotations describing one run of a test.
///
/// Created with [`Recorder::test_annotation`](crate::Recorder::test_annotation).
/// Like [`RecordingHandle`](crate::RecordingHandle), it must be released
/// explicitly; dropping it unreleased frees it and panics with the location
/// where it was created.
pub struct TestAnnotation {
    shared: Arc<Shared>,
    raw: RawAnnotation,
    released: bool,
    guard: LeakGuard,
}

impl TestAnnotation {
    #[track_caller]
    pub(crate) fn new(shared: Arc<Shared>, raw: RawAnnotation) -> Self {
        Self {
            shared,
            raw,
            released: false,
            guard: LeakGuard::new(RESOURCE),
        }
    }

    /// Where this annotation was created.
    pub fn origin(&self) -> &'static Location<'static> {
        self.guard.origin()
    }

    /// Whether [`release`](Self::release) has been called.
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Mark the start of the test at the current execution point.
    #[track_caller]
    pub fn start(&mut self) -> CoreResult<()> {
        self.record(TestAnnotationEvent::Start)
    }

    /// Mark the end of the test at the current execution point.
    #[track_caller]
    pub fn end(&mut self) -> CoreResult<()> {
        self.record(TestAnnotationEvent::End)
    }

    /// Record the verdict of the test.
    #[track_caller]
    pub fn set_result(&mut self, result: TestResult) -> CoreResult<()> {
        self.record(TestAnnotationEvent::Result(result))
    }

    /// Record the output of the test.
    #[track_caller]
    pub fn set_output(&mut self, content_type: ContentType, output: &str) -> CoreResult<()> {
        self.record(TestAnnotationEvent::Output(content_type, output))
    }

    /// Attach raw bytes under `detail`.
    #[track_caller]
    pub fn add_raw(&mut self, detail: &str, data: &[u8]) -> CoreResult<()> {
        self.add(detail, AnnotationPayload::Raw(data))
    }

    /// Attach text in the given format under `detail`.
    #[track_caller]
    pub fn add_text(
        &mut self,
        detail: &str,
        content_type: ContentType,
        text: &str,
    ) -> CoreResult<()> {
        self.add(detail, AnnotationPayload::Text(content_type, text))
    }

    /// Attach an integer under `detail`.
    #[track_caller]
    pub fn add_int(&mut self, detail: &str, value: i64) -> CoreResult<()> {
        self.add(detail, AnnotationPayload::Int(value))
    }

    /// Free the annotation context.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Released`] if already released.
    #[track_caller]
    #[instrument(skip(self))]
    pub fn release(&mut self) -> CoreResult<()> {
        self.ensure_live()?;

        self.shared.lock().engine.test_annotation_free(self.raw);
        self.released = true;
        self.guard.disarm();

        debug!("Test annotation released");

        Ok(())
    }

    #[track_caller]
    fn add(&mut self, detail: &str, payload: AnnotationPayload<'_>) -> CoreResult<()> {
        self.ensure_live()?;

        if detail.is_empty() {
            return Err(RecorderError::MissingDetail {
                location: ErrorLocation::from(Location::caller()),
            });
        }
        self.record(TestAnnotationEvent::Add { detail, payload })
    }

    #[track_caller]
    fn record(&mut self, event: TestAnnotationEvent<'_>) -> CoreResult<()> {
        self.ensure_live()?;

        self.shared
            .lock()
            .engine
            .test_annotation_record(self.raw, event)
            .map_err(map_failure)
    }

    #[track_caller]
    fn ensure_live(&self) -> CoreResult<()> {
        if self.released {
            return Err(RecorderError::Released {
                resource: RESOURCE,
                location: ErrorLocation::from(Location::caller()),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for TestAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestAnnotation")
            .field("released", &self.released)
            .field("origin", &self.guard.origin())
            .finish_non_exhaustive()
    }
}

impl Drop for TestAnnotation {
    fn drop(&mut self) {
        let shared = &self.shared;
        let raw = self.raw;

        self.guard
            .check(|| shared.lock().engine.test_annotation_free(raw));
    }
}
