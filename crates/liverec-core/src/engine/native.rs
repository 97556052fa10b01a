//! Bindings to the vendor recording libraries.
//!
//! Only reachable through [`Recorder::global`](crate::Recorder::global): the
//! vendor engine is process-wide and must be driven from a single place.

use crate::engine::{
    AnnotationPayload, Engine, EngineFailure, EngineResult, RawAnnotation, RawContext,
    RawSaveStatus, TestAnnotationEvent,
};

use std::{
    ffi::{CStr, CString, c_char, c_int, c_long, c_ulong, c_void},
    io,
    os::{fd::RawFd, unix::ffi::OsStrExt},
    path::{Path, PathBuf},
    ptr,
};

type RecordingContextPtr = *mut c_void;
type TestAnnotationPtr = *mut c_void;

#[cfg_attr(target_arch = "x86_64", link(name = "undolr_pic_x64"))]
#[cfg_attr(target_arch = "x86", link(name = "undolr_pic_x32"))]
#[cfg_attr(target_arch = "aarch64", link(name = "undolr_pic_arm64"))]
unsafe extern "C" {
    fn undolr_start(error: *mut c_int) -> c_int;
    fn undolr_get_version_string() -> *const c_char;
    fn undolr_stop(context: *mut RecordingContextPtr) -> c_int;
    fn undolr_save(filename: *const c_char) -> c_int;
    fn undolr_save_async(context: RecordingContextPtr, filename: *const c_char) -> c_int;
    fn undolr_poll_saving_progress(
        context: RecordingContextPtr,
        complete: *mut c_int,
        progress: *mut c_int,
        result: *mut c_int,
    ) -> c_int;
    fn undolr_get_select_descriptor(context: RecordingContextPtr, fd: *mut c_int) -> c_int;
    fn undolr_discard(context: RecordingContextPtr) -> c_int;
    fn undolr_save_on_termination(filename: *const c_char) -> c_int;
    fn undolr_save_on_termination_cancel() -> c_int;
    fn undolr_event_log_size_get(bytes: *mut c_long) -> c_int;
    fn undolr_event_log_size_set(bytes: c_long) -> c_int;
    fn undolr_include_symbol_files(include: c_int) -> c_int;
    fn undolr_shmem_log_filename_set(filename: *const c_char) -> c_int;
    fn undolr_shmem_log_filename_get(filename: *mut *const c_char) -> c_int;
    fn undolr_shmem_log_size_set(max_size: c_ulong) -> c_int;
    fn undolr_shmem_log_size_get(max_size: *mut c_ulong) -> c_int;
}

#[cfg_attr(target_arch = "x86_64", link(name = "undoex_x64"))]
#[cfg_attr(target_arch = "x86", link(name = "undoex_x32"))]
#[cfg_attr(target_arch = "aarch64", link(name = "undoex_arm64"))]
unsafe extern "C" {
    fn undoex_annotation_add_raw_data(
        name: *const c_char,
        detail: *const c_char,
        raw_data: *const u8,
        raw_data_len: usize,
    ) -> c_int;
    fn undoex_annotation_add_text(
        name: *const c_char,
        detail: *const c_char,
        content_type: c_int,
        text: *const c_char,
    ) -> c_int;
    fn undoex_annotation_add_int(name: *const c_char, detail: *const c_char, value: i64) -> c_int;

    fn undoex_test_annotation_new(base_test_name: *const c_char, add_run_suffix: bool)
    -> TestAnnotationPtr;
    fn undoex_test_annotation_free(test_annotation: TestAnnotationPtr);
    fn undoex_test_annotation_start(test_annotation: TestAnnotationPtr) -> c_int;
    fn undoex_test_annotation_end(test_annotation: TestAnnotationPtr) -> c_int;
    fn undoex_test_annotation_set_result(test_annotation: TestAnnotationPtr, result: c_int)
    -> c_int;
    fn undoex_test_annotation_set_output(
        test_annotation: TestAnnotationPtr,
        content_type: c_int,
        output: *const c_char,
    ) -> c_int;
    fn undoex_test_annotation_add_raw_data(
        test_annotation: TestAnnotationPtr,
        detail: *const c_char,
        raw_data: *const u8,
        raw_data_len: usize,
    ) -> c_int;
    fn undoex_test_annotation_add_text(
        test_annotation: TestAnnotationPtr,
        detail: *const c_char,
        content_type: c_int,
        text: *const c_char,
    ) -> c_int;
    fn undoex_test_annotation_add_int(
        test_annotation: TestAnnotationPtr,
        detail: *const c_char,
        value: i64,
    ) -> c_int;
}

/// The vendor engine. Zero-sized: all state lives inside the vendor library.
pub(crate) struct NativeEngine {
    _private: (),
}

impl NativeEngine {
    pub(crate) fn new() -> Self {
        Self { _private: () }
    }
}

fn errno() -> i32 {
    io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// Turn a C return code into a result, capturing errno on failure.
fn check(rc: c_int) -> EngineResult<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(EngineFailure {
            rc,
            errno: errno(),
            code: 0,
        })
    }
}

fn c_string(value: &str) -> EngineResult<CString> {
    CString::new(value).map_err(|_| EngineFailure::os(libc::EINVAL))
}

fn c_path(path: &Path) -> EngineResult<CString> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| EngineFailure::os(libc::EINVAL))
}

fn optional_c_string(value: Option<&str>) -> EngineResult<Option<CString>> {
    value.filter(|v| !v.is_empty()).map(c_string).transpose()
}

fn as_ptr_or_null(value: &Option<CString>) -> *const c_char {
    value.as_ref().map_or(ptr::null(), |v| v.as_ptr())
}

fn context_ptr(context: RawContext) -> RecordingContextPtr {
    context.into_raw() as RecordingContextPtr
}

fn annotation_ptr(annotation: RawAnnotation) -> TestAnnotationPtr {
    annotation.into_raw() as TestAnnotationPtr
}

impl Engine for NativeEngine {
    fn version(&mut self) -> String {
        // SAFETY: the library returns a pointer to a static NUL-terminated string.
        unsafe {
            let raw = undolr_get_version_string();
            if raw.is_null() {
                return String::new();
            }
            CStr::from_ptr(raw).to_string_lossy().into_owned()
        }
    }

    fn start(&mut self) -> EngineResult<()> {
        let mut code: c_int = 0;
        // SAFETY: `code` is a valid out-pointer for the duration of the call.
        let rc = unsafe { undolr_start(&mut code) };
        if rc == 0 {
            return Ok(());
        }
        Err(EngineFailure {
            rc,
            errno: errno(),
            code: u32::try_from(code).unwrap_or(u32::MAX),
        })
    }

    fn stop(&mut self, keep: bool) -> EngineResult<Option<RawContext>> {
        if !keep {
            // SAFETY: a null out-pointer asks the library to discard the history.
            return check(unsafe { undolr_stop(ptr::null_mut()) }).map(|()| None);
        }

        let mut context: RecordingContextPtr = ptr::null_mut();
        // SAFETY: `context` is a valid out-pointer for the duration of the call.
        check(unsafe { undolr_stop(&mut context) })?;
        if context.is_null() {
            return Ok(None);
        }
        Ok(Some(RawContext::from_raw(context as usize)))
    }

    fn save(&mut self, path: &Path) -> EngineResult<()> {
        let filename = c_path(path)?;
        // SAFETY: `filename` outlives the call.
        check(unsafe { undolr_save(filename.as_ptr()) })
    }

    fn save_async(&mut self, context: RawContext, path: &Path) -> EngineResult<()> {
        let filename = c_path(path)?;
        // SAFETY: the context came from undolr_stop and has not been discarded.
        check(unsafe { undolr_save_async(context_ptr(context), filename.as_ptr()) })
    }

    fn poll_saving_progress(&mut self, context: RawContext) -> EngineResult<RawSaveStatus> {
        let (mut complete, mut progress, mut result): (c_int, c_int, c_int) = (0, 0, 0);
        // SAFETY: live context and valid out-pointers.
        check(unsafe {
            undolr_poll_saving_progress(
                context_ptr(context),
                &mut complete,
                &mut progress,
                &mut result,
            )
        })?;
        Ok(RawSaveStatus {
            complete: complete != 0,
            progress,
            result,
        })
    }

    fn select_descriptor(&mut self, context: RawContext) -> EngineResult<RawFd> {
        let mut fd: c_int = -1;
        // SAFETY: live context and valid out-pointer.
        check(unsafe { undolr_get_select_descriptor(context_ptr(context), &mut fd) })?;
        Ok(fd)
    }

    fn discard(&mut self, context: RawContext) -> EngineResult<()> {
        // SAFETY: the context is live; the caller never uses it again.
        check(unsafe { undolr_discard(context_ptr(context)) })
    }

    fn save_on_termination(&mut self, path: &Path) -> EngineResult<()> {
        let filename = c_path(path)?;
        // SAFETY: `filename` outlives the call; the library copies it.
        check(unsafe { undolr_save_on_termination(filename.as_ptr()) })
    }

    fn cancel_save_on_termination(&mut self) -> EngineResult<()> {
        // SAFETY: no arguments.
        check(unsafe { undolr_save_on_termination_cancel() })
    }

    fn event_log_size(&mut self) -> EngineResult<u64> {
        let mut bytes: c_long = 0;
        // SAFETY: valid out-pointer.
        check(unsafe { undolr_event_log_size_get(&mut bytes) })?;
        u64::try_from(bytes).map_err(|_| EngineFailure::os(libc::ERANGE))
    }

    fn set_event_log_size(&mut self, bytes: u64) -> EngineResult<()> {
        let bytes = c_long::try_from(bytes).map_err(|_| EngineFailure::os(libc::EINVAL))?;
        // SAFETY: plain value argument.
        check(unsafe { undolr_event_log_size_set(bytes) })
    }

    fn include_symbol_files(&mut self, include: bool) -> EngineResult<()> {
        // SAFETY: plain value argument.
        check(unsafe { undolr_include_symbol_files(c_int::from(include)) })
    }

    fn shmem_log_path(&mut self) -> EngineResult<Option<PathBuf>> {
        let mut raw: *const c_char = ptr::null();
        // SAFETY: valid out-pointer; the returned string is owned by the library.
        check(unsafe { undolr_shmem_log_filename_get(&mut raw) })?;
        if raw.is_null() {
            return Ok(None);
        }
        // SAFETY: non-null, NUL-terminated, valid until the next set call which
        // cannot happen while we hold the recorder lock.
        let bytes = unsafe { CStr::from_ptr(raw) }.to_bytes();
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(PathBuf::from(std::ffi::OsStr::from_bytes(bytes))))
    }

    fn set_shmem_log_path(&mut self, path: Option<&Path>) -> EngineResult<()> {
        let filename = path.map(c_path).transpose()?;
        // SAFETY: null clears the log; otherwise `filename` outlives the call.
        check(unsafe { undolr_shmem_log_filename_set(as_ptr_or_null(&filename)) })
    }

    fn shmem_log_size(&mut self) -> EngineResult<u64> {
        let mut bytes: c_ulong = 0;
        // SAFETY: valid out-pointer.
        check(unsafe { undolr_shmem_log_size_get(&mut bytes) })?;
        Ok(u64::from(bytes))
    }

    fn set_shmem_log_size(&mut self, bytes: u64) -> EngineResult<()> {
        let bytes = c_ulong::try_from(bytes).map_err(|_| EngineFailure::os(libc::EINVAL))?;
        // SAFETY: plain value argument.
        check(unsafe { undolr_shmem_log_size_set(bytes) })
    }

    fn annotate(
        &mut self,
        name: &str,
        detail: Option<&str>,
        payload: AnnotationPayload<'_>,
    ) -> EngineResult<()> {
        let name = c_string(name)?;
        let detail = optional_c_string(detail)?;
        let detail_ptr = as_ptr_or_null(&detail);

        // SAFETY: every pointer refers to data that outlives the call.
        let rc = unsafe {
            match payload {
                AnnotationPayload::Raw(bytes) => undoex_annotation_add_raw_data(
                    name.as_ptr(),
                    detail_ptr,
                    bytes.as_ptr(),
                    bytes.len(),
                ),
                AnnotationPayload::Text(content_type, text) => {
                    let text = c_string(text)?;
                    undoex_annotation_add_text(
                        name.as_ptr(),
                        detail_ptr,
                        content_type.as_raw(),
                        text.as_ptr(),
                    )
                }
                AnnotationPayload::Int(value) => {
                    undoex_annotation_add_int(name.as_ptr(), detail_ptr, value)
                }
            }
        };
        check(rc)
    }

    fn test_annotation_new(
        &mut self,
        base_name: &str,
        add_run_suffix: bool,
    ) -> EngineResult<RawAnnotation> {
        let name = c_string(base_name)?;
        // SAFETY: `name` outlives the call; the library copies it.
        let raw = unsafe { undoex_test_annotation_new(name.as_ptr(), add_run_suffix) };
        if raw.is_null() {
            return Err(EngineFailure::os(match errno() {
                0 => libc::ENOMEM,
                e => e,
            }));
        }
        Ok(RawAnnotation::from_raw(raw as usize))
    }

    fn test_annotation_record(
        &mut self,
        annotation: RawAnnotation,
        event: TestAnnotationEvent<'_>,
    ) -> EngineResult<()> {
        let ptr = annotation_ptr(annotation);

        // SAFETY: the annotation is live and every pointer outlives the call.
        let rc = unsafe {
            match event {
                TestAnnotationEvent::Start => undoex_test_annotation_start(ptr),
                TestAnnotationEvent::End => undoex_test_annotation_end(ptr),
                TestAnnotationEvent::Result(result) => {
                    undoex_test_annotation_set_result(ptr, result.as_raw())
                }
                TestAnnotationEvent::Output(content_type, text) => {
                    let text = c_string(text)?;
                    undoex_test_annotation_set_output(ptr, content_type.as_raw(), text.as_ptr())
                }
                TestAnnotationEvent::Add { detail, payload } => {
                    let detail = c_string(detail)?;
                    match payload {
                        AnnotationPayload::Raw(bytes) => {
                            let data = if bytes.is_empty() {
                                ptr::null()
                            } else {
                                bytes.as_ptr()
                            };
                            undoex_test_annotation_add_raw_data(
                                ptr,
                                detail.as_ptr(),
                                data,
                                bytes.len(),
                            )
                        }
                        AnnotationPayload::Text(content_type, text) => {
                            let text = c_string(text)?;
                            undoex_test_annotation_add_text(
                                ptr,
                                detail.as_ptr(),
                                content_type.as_raw(),
                                text.as_ptr(),
                            )
                        }
                        AnnotationPayload::Int(value) => {
                            undoex_test_annotation_add_int(ptr, detail.as_ptr(), value)
                        }
                    }
                }
            }
        };
        check(rc)
    }

    fn test_annotation_free(&mut self, annotation: RawAnnotation) {
        // SAFETY: the annotation is live; the caller never uses it again.
        unsafe { undoex_test_annotation_free(annotation_ptr(annotation)) }
    }
}
