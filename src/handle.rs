use std::os::unix::io::RawFd;
use std::sync::Arc;

use crate::interest::Interest;

/// Readiness reported for a single dispatch step, already normalized out of
/// whichever platform event struct produced it.
///
/// The original C callback receives the raw `epoll_events`/`kevent.filter`
/// bits directly; this crate's callbacks see this instead so `Socket`,
/// `Accept` and `Timer` never touch `libc` themselves.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReadySet {
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
    pub hup: bool,
    /// Set only by the BSD `EVFILT_TIMER` path, where a tick has no
    /// associated descriptor to be "readable" on.
    pub timer: bool,
}

impl ReadySet {
    pub const NONE: ReadySet = ReadySet {
        readable: false,
        writable: false,
        error: false,
        hup: false,
        timer: false,
    };
}

/// The Rust expression of the C struct's `(void *ptr, aio_onEvent, aio_onDel)`
/// pair: a single trait object captures the user pointer as its own fields
/// instead of threading one through every call.
///
/// `on_release` fires exactly once, when the handle leaves the reactor's
/// registry (on `DONE`, on explicit `remove`, or on `Reactor` teardown) —
/// never more, never less, matching the release-exactly-once invariant
/// `spec.md` §4.2 lays out.
pub trait HandleCallbacks: Send + Sync {
    /// The descriptor wait should multiplex on. Read once, at registration.
    fn fd(&self) -> RawFd;

    /// A readiness transition arrived. `prior` is the interest mask this
    /// handle was last registered with; the return value becomes the new
    /// mask, or tears the handle down if it contains `DONE`/`ABORT`.
    fn on_event(&self, prior: Interest, ready: ReadySet) -> Interest;

    /// Called exactly once as the handle leaves the registry.
    fn on_release(&self);
}

/// A registration: a descriptor, the interest last armed for it, and the
/// callbacks that own its state. `Reactor::add` consumes one of these.
pub struct Handle {
    pub(crate) interest: Interest,
    pub(crate) callbacks: Arc<dyn HandleCallbacks>,
    /// `Some` only for a BSD timer, which has no descriptor of its own and
    /// is registered against the `kqueue` directly via `EVFILT_TIMER`
    /// instead of through the normal descriptor-based `register`/`reregister`.
    /// Always `None` on Linux, where a timer is an ordinary `timerfd`.
    pub(crate) timer_interval: Option<std::time::Duration>,
}

impl Handle {
    pub fn new(interest: Interest, callbacks: Arc<dyn HandleCallbacks>) -> Handle {
        Handle {
            interest,
            callbacks,
            timer_interval: None,
        }
    }

    pub fn timer(interval: std::time::Duration, callbacks: Arc<dyn HandleCallbacks>) -> Handle {
        Handle {
            interest: Interest::TIMER,
            callbacks,
            timer_interval: Some(interval),
        }
    }

    pub fn fd(&self) -> RawFd {
        self.callbacks.fd()
    }
}
