use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// How long teardown waits between "still busy" warnings.
pub const STALL_WARNING_INTERVAL: Duration = Duration::from_secs(1);

/// Count of hook callbacks currently executing engine code.
///
/// Every callback holds a [`UsageGuard`] for its whole duration. Teardown
/// waits on [`UsageCounter::wait_idle`] so it never frees state a callback
/// is still using.
#[derive(Default)]
pub struct UsageCounter {
    active: Mutex<usize>,
    idle: Condvar,
}

impl UsageCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self) -> UsageGuard<'_> {
        *self.active.lock() += 1;
        UsageGuard { counter: self }
    }

    pub fn active(&self) -> usize {
        *self.active.lock()
    }

    /// Block until no callback is in flight. There is no timeout: a host
    /// thread stuck inside a callback keeps teardown waiting, with a warning
    /// logged every [`STALL_WARNING_INTERVAL`].
    pub fn wait_idle(&self) {
        let mut active = self.active.lock();
        while *active > 0 {
            if self.idle.wait_for(&mut active, STALL_WARNING_INTERVAL).timed_out() && *active > 0 {
                log::warn!("Teardown waiting on {} in-flight hook call(s)", *active);
            }
        }
    }

    fn leave(&self) {
        let mut active = self.active.lock();
        *active -= 1;
        if *active == 0 {
            self.idle.notify_all();
        }
    }
}

/// Keeps the usage count raised until dropped, on every exit path.
pub struct UsageGuard<'a> {
    counter: &'a UsageCounter,
}

impl Drop for UsageGuard<'_> {
    fn drop(&mut self) {
        self.counter.leave();
    }
}
