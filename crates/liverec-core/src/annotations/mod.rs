//! Annotations stored in the recording at the current execution point.
//!
//! Annotations are identified by a name and an optional detail; names starting
//! with `u-` are reserved for the engine. [`TestAnnotation`] wraps the engine's
//! test-run helpers and follows the same release discipline as
//! [`RecordingHandle`](crate::RecordingHandle).

mod test_annotation;

pub use test_annotation::TestAnnotation;

/// Format of textual annotation content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    /// Plain text not matching any other format.
    UnstructuredText,
    /// JSON text.
    Json,
    /// XML text.
    Xml,
}

impl ContentType {
    /// Value understood by the engine.
    pub fn as_raw(self) -> i32 {
        match self {
            ContentType::UnstructuredText => 100,
            ContentType::Json => 101,
            ContentType::Xml => 102,
        }
    }
}

/// Verdict of a test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestResult {
    /// Not known, maybe an error occurred.
    Unknown,
    /// The test passed.
    Success,
    /// The test failed.
    Failure,
    /// The test was skipped.
    Skipped,
    /// Not representable by the other variants.
    Other,
}

impl TestResult {
    /// Value understood by the engine.
    pub fn as_raw(self) -> i32 {
        match self {
            TestResult::Unknown => 0,
            TestResult::Success => 1,
            TestResult::Failure => 2,
            TestResult::Skipped => 3,
            TestResult::Other => 4,
        }
    }
}
