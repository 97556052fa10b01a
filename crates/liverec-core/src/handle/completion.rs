use crate::{CoreResult, RecorderError};

use std::{
    io,
    os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd},
    panic::Location,
    time::{Duration, Instant},
};

use error_location::ErrorLocation;

/// Descriptor that becomes readable once when a save completes.
///
/// Borrowed from its [`RecordingHandle`](crate::RecordingHandle), so it
/// cannot be used after the handle is released. Exactly one byte is written
/// per completed save; consuming it with [`CompletionDescriptor::wait`] or
/// [`CompletionDescriptor::wait_timeout`] resets the descriptor for the next
/// save. Callers using their own `select`/`poll` loop should consume the byte
/// with `wait` once the descriptor reports readable.
#[derive(Debug, Clone, Copy)]
pub struct CompletionDescriptor<'a> {
    fd: BorrowedFd<'a>,
}

impl<'a> CompletionDescriptor<'a> {
    pub(crate) fn new(fd: BorrowedFd<'a>) -> Self {
        Self { fd }
    }

    /// Block until the save completes.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::ShortRead`] if the descriptor was closed
    /// without delivering the completion byte.
    #[track_caller]
    pub fn wait(&self) -> CoreResult<()> {
        read_completion_byte(self.fd)
    }

    /// Wait up to `timeout` for the save to complete.
    ///
    /// Returns `Ok(false)` if it did not complete in time; that says nothing
    /// about whether the save will succeed.
    #[track_caller]
    pub fn wait_timeout(&self, timeout: Duration) -> CoreResult<bool> {
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            // Rounded up so a sub-millisecond remainder still waits.
            let millis = libc::c_int::try_from(remaining.as_micros().div_ceil(1_000))
                .unwrap_or(libc::c_int::MAX);
            let mut pollfd = libc::pollfd {
                fd: self.fd.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            };

            // SAFETY: `pollfd` is a single valid entry and the descriptor is
            // kept open by the borrow.
            let rc = unsafe { libc::poll(&mut pollfd, 1, millis) };
            match rc {
                0 => return Ok(false),
                rc if rc > 0 => break,
                _ => {
                    let err = io::Error::last_os_error();
                    if err.kind() != io::ErrorKind::Interrupted {
                        return Err(RecorderError::Os {
                            source: err,
                            location: ErrorLocation::from(Location::caller()),
                        });
                    }
                }
            }
        }

        read_completion_byte(self.fd)?;
        Ok(true)
    }
}

impl AsFd for CompletionDescriptor<'_> {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd
    }
}

impl AsRawFd for CompletionDescriptor<'_> {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Read the single completion byte from `fd`, retrying on interruption.
#[track_caller]
pub(crate) fn read_completion_byte(fd: BorrowedFd<'_>) -> CoreResult<()> {
    let mut byte = [0u8; 1];

    loop {
        // SAFETY: `byte` is a valid one-byte buffer and `fd` is open for the
        // lifetime of the borrow.
        let n = unsafe { libc::read(fd.as_raw_fd(), byte.as_mut_ptr().cast(), 1) };
        match n {
            1 => return Ok(()),
            0 => {
                return Err(RecorderError::ShortRead {
                    read: 0,
                    location: ErrorLocation::from(Location::caller()),
                });
            }
            _ => {
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::Interrupted {
                    return Err(RecorderError::Os {
                        source: err,
                        location: ErrorLocation::from(Location::caller()),
                    });
                }
            }
        }
    }
}

/// Consume completion bytes left over from earlier saves without blocking.
#[track_caller]
pub(crate) fn drain_stale(fd: BorrowedFd<'_>) -> CoreResult<usize> {
    let mut drained = 0;

    loop {
        let mut pollfd = libc::pollfd {
            fd: fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };

        // SAFETY: single valid entry, zero timeout, descriptor kept open by the borrow.
        let rc = unsafe { libc::poll(&mut pollfd, 1, 0) };
        if rc == 0 {
            return Ok(drained);
        }
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(RecorderError::Os {
                source: err,
                location: ErrorLocation::from(Location::caller()),
            });
        }
        if pollfd.revents & libc::POLLIN == 0 {
            return Ok(drained);
        }

        read_completion_byte(fd)?;
        drained += 1;
    }
}
