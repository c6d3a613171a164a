//! Platform selector backends.
//!
//! Exactly two real backends exist, mirroring the platform split the
//! original C source encodes with `#if defined __BSD_OS` / `#elif defined
//! __LINUX_OS`. Anything else gets `shell`, a stub that refuses to run,
//! matching `mio`'s own `sys/shell` fallback.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::interest::Interest;

#[cfg(target_os = "linux")]
pub(crate) use unix::epoll::{read_siginfo, Events, RawEvent, Selector};
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub(crate) use unix::kqueue::{Events, RawEvent, Selector};

#[cfg(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub(crate) mod unix;

#[cfg(not(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
)))]
pub(crate) mod shell;
#[cfg(not(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
)))]
pub(crate) use shell::{Events, RawEvent, Selector};

/// `signo -> Interest` lookup table shared between the selector's signal
/// arming and the dispatch step that resolves a bare signal number (the
/// kqueue `EVFILT_SIGNAL` path) back to a mask. Sized for the 32 standard
/// POSIX signals, matching `cape_aio_context_t.smap[32]`.
pub struct SignalMap([AtomicU32; 32]);

impl SignalMap {
    pub fn new() -> SignalMap {
        SignalMap(std::array::from_fn(|_| AtomicU32::new(0)))
    }

    /// Stores `mask` for `signo`. Returns `false` without effect if `signo`
    /// is outside `0 < signo < 32`, matching `cape_aio_context_signal_map`'s
    /// documented boundary (signal 0 and 32 are rejected).
    #[must_use]
    pub fn set(&self, signo: i32, mask: Interest) -> bool {
        match self.slot(signo) {
            Some(slot) => {
                slot.store(mask.bits(), Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, signo: i32) -> Interest {
        match self.slot(signo) {
            Some(slot) => Interest::from_bits(slot.load(Ordering::Relaxed)),
            None => Interest::NONE,
        }
    }

    fn slot(&self, signo: i32) -> Option<&AtomicU32> {
        if signo <= 0 || signo >= 32 {
            return None;
        }
        self.0.get(usize::try_from(signo).ok()?)
    }
}
