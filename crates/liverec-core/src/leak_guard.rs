use std::panic::Location;

use tracing::error;

/// Detects handles that are dropped without an explicit release.
///
/// The guard remembers where its resource was created. Owners disarm it on a
/// successful release; if the owner is dropped while the guard is still armed,
/// [`LeakGuard::check`] reclaims the resource and then fails loudly, naming
/// the creation site.
///
/// When the thread is already unwinding the failure is logged instead, so a
/// leaked handle never turns a panic into an abort.
#[derive(Debug)]
pub struct LeakGuard {
    resource: &'static str,
    origin: &'static Location<'static>,
    armed: bool,
}

impl LeakGuard {
    /// Arm a guard for `resource`, recording the caller as its origin.
    #[track_caller]
    pub fn new(resource: &'static str) -> Self {
        Self {
            resource,
            origin: Location::caller(),
            armed: true,
        }
    }

    /// Mark the resource as released. Idempotent.
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    /// Whether the resource still awaits release.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Where the guarded resource was created.
    pub fn origin(&self) -> &'static Location<'static> {
        self.origin
    }

    /// Kind of resource being guarded.
    pub fn resource(&self) -> &'static str {
        self.resource
    }

    /// Called from the owner's `Drop`. Does nothing when disarmed; otherwise
    /// runs `reclaim` and reports the leak.
    ///
    /// # Panics
    ///
    /// Panics with `"<file>:<line>:<column>: <resource> dropped without being released"`
    /// when the guard is still armed and the thread is not already panicking.
    #[allow(clippy::panic)]
    pub fn check(&mut self, reclaim: impl FnOnce()) {
        if !self.armed {
            return;
        }
        self.armed = false;

        reclaim();

        let message = format!(
            "{}:{}:{}: {} dropped without being released",
            self.origin.file(),
            self.origin.line(),
            self.origin.column(),
            self.resource
        );

        if std::thread::panicking() {
            error!(resource = self.resource, "{}", message);
            return;
        }

        panic!("{}", message);
    }
}
