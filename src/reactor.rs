use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{trace, warn};

use crate::error::{Error, Kind, Result};
use crate::handle::{Handle, HandleCallbacks, ReadySet};
use crate::interest::Interest;
use crate::slab::Slab;
use crate::sys::{self, SignalMap};
use crate::token::Token;

/// Outcome of a single [`Reactor::next`] step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// A handle was dispatched, or nothing happened worth stopping for
    /// (an ignored signal, a race with a concurrent `remove`).
    Continue,
    /// `select` returned with no ready descriptor before its deadline.
    Timeout,
    /// A handle (or a signal) resolved to `ABORT`; the wait loop should
    /// stop.
    Stop,
}

struct RegEntry {
    fd: RawFd,
    interest: Interest,
    timer_interval: Option<Duration>,
    callbacks: Arc<dyn HandleCallbacks>,
}

struct ReactorInner {
    selector: sys::Selector,
    registry: Mutex<Slab<RegEntry>>,
    signal_map: Arc<SignalMap>,
    events_capacity: usize,
}

/// A single-threaded, callback-driven I/O reactor.
///
/// `Reactor` is cheap to clone (an `Arc` around its selector and registry)
/// so the same reactor can be handed to every `Socket`/`Accept`/`Timer` it
/// drives, and its registry may be mutated from any thread while another
/// thread is blocked in [`Reactor::next`] — only dispatch itself runs on a
/// single thread at a time.
#[derive(Clone)]
pub struct Reactor {
    inner: Arc<ReactorInner>,
}

impl Reactor {
    /// Opens a reactor with room for a single event per `next()` step,
    /// matching the original's `epoll_wait`/`kevent` calls with
    /// `maxevents`/`nevents` of 1.
    pub fn new() -> Result<Reactor> {
        Reactor::with_capacity(1)
    }

    pub fn with_capacity(events_capacity: usize) -> Result<Reactor> {
        Ok(Reactor {
            inner: Arc::new(ReactorInner {
                selector: sys::Selector::new()?,
                registry: Mutex::new(Slab::new()),
                signal_map: Arc::new(SignalMap::new()),
                events_capacity: events_capacity.max(1),
            }),
        })
    }

    /// Registers a handle and arms its initial interest. On failure the
    /// handle is never inserted into the registry, so its `on_release`
    /// does not fire.
    pub fn add(&self, handle: Handle) -> Result<Token> {
        let Handle {
            interest,
            callbacks,
            timer_interval,
        } = handle;
        let fd = callbacks.fd();
        let mut registry = self.inner.registry.lock().unwrap();
        let token = registry.insert(RegEntry {
            fd,
            interest,
            timer_interval,
            callbacks,
        });
        match self.register_entry(fd, token, interest, timer_interval) {
            Ok(()) => {
                trace!("registered token {:?} interest {:?}", token, interest);
                Ok(token)
            }
            Err(err) => {
                registry.remove(token);
                Err(err)
            }
        }
    }

    /// Replaces a registration's interest mask, re-arming it with the
    /// platform selector.
    pub fn modify(&self, token: Token, interest: Interest) -> Result<()> {
        let (fd, timer_interval) = {
            let mut registry = self.inner.registry.lock().unwrap();
            let entry = registry
                .get_mut(token)
                .ok_or_else(|| Error::new(Kind::NotFound, "no such registration"))?;
            entry.interest = interest;
            (entry.fd, entry.timer_interval)
        };
        self.reregister_entry(fd, token, interest, timer_interval)
    }

    /// Deregisters a handle and releases it. Idempotent: removing a token
    /// twice, or one that was never registered, is a no-op.
    pub fn remove(&self, token: Token) -> Result<()> {
        let entry = {
            let mut registry = self.inner.registry.lock().unwrap();
            registry.remove(token)
        };
        match entry {
            Some(entry) => {
                let result = self.deregister_entry(entry.fd, entry.timer_interval, token);
                entry.callbacks.on_release();
                result
            }
            None => Ok(()),
        }
    }

    /// Tears every registration down, invoking each one's `on_release`
    /// exactly once. Safe to call more than once; the second call finds
    /// an empty registry.
    pub fn close(&self) -> Result<()> {
        let entries = {
            let mut registry = self.inner.registry.lock().unwrap();
            registry.drain()
        };
        for (token, entry) in entries {
            if let Err(err) = self.deregister_entry(entry.fd, entry.timer_interval, token) {
                warn!("error deregistering handle {:?} during close: {}", token, err);
            }
            entry.callbacks.on_release();
        }
        Ok(())
    }

    /// Associates a signal number with an interest mask. Signals mapped to
    /// a mask containing `ABORT` or `DONE` stop the wait loop the next
    /// time they are observed; anything else is logged and ignored.
    /// Rejects `signo` outside `0 < signo < 32`, matching
    /// `cape_aio_context_signal_map`.
    pub fn signal_map(&self, signo: i32, mask: Interest) -> Result<()> {
        if self.inner.signal_map.set(signo, mask) {
            Ok(())
        } else {
            warn!("signal_map: signal number {} is out of range (0 < signo < 32)", signo);
            Err(Error::new(
                Kind::MissingParam,
                format!("signal number {} is out of range", signo),
            ))
        }
    }

    /// Routes `SIGINT`/`SIGTERM` through the reactor instead of their
    /// default disposition. On Linux this registers an internal `signalfd`
    /// handle; on BSD it arms `EVFILT_SIGNAL` kevents directly. Matches
    /// `cape_aio_context_set_interupts`.
    pub fn set_interrupts(&self, sigint: bool, sigterm: bool) -> Result<()> {
        let extra_fd = self
            .inner
            .selector
            .arm_signals(sigint, sigterm, &self.inner.signal_map)?;
        if let Some(fd) = extra_fd {
            self.add_signalfd(fd)?;
        }
        Ok(())
    }

    #[cfg(target_os = "linux")]
    fn add_signalfd(&self, fd: std::os::unix::io::OwnedFd) -> Result<Token> {
        let callbacks: Arc<dyn HandleCallbacks> = Arc::new(SignalFdHandle {
            fd,
            map: self.inner.signal_map.clone(),
        });
        self.add(Handle::new(Interest::READ, callbacks))
    }

    #[cfg(not(target_os = "linux"))]
    fn add_signalfd(&self, _fd: std::os::unix::io::OwnedFd) -> Result<Token> {
        unreachable!("only the epoll backend returns an extra descriptor from arm_signals")
    }

    /// Runs a single dispatch step: waits (up to `timeout`, or forever if
    /// `None`) for one readiness transition and resolves it, exactly one
    /// event per call, matching the original's `maxevents`/`nevents` of 1.
    pub fn next(&self, timeout: Option<Duration>) -> Result<Status> {
        let mut events = sys::Events::with_capacity(self.inner.events_capacity);
        if let Err(err) = self.inner.selector.select(&mut events, timeout) {
            if err.is_continue() {
                return Ok(Status::Continue);
            }
            return Err(err);
        }

        let raw = match events.iter().next() {
            Some(raw) => raw,
            None => return Ok(Status::Timeout),
        };

        if let Some(signo) = raw.signal {
            let mask = self.inner.signal_map.get(signo);
            return Ok(self.resolve_signal(signo, mask));
        }

        let token = match raw.token {
            Some(token) => token,
            None => return Ok(Status::Continue),
        };

        self.dispatch(token, raw.ready)
    }

    fn resolve_signal(&self, signo: i32, mask: Interest) -> Status {
        if mask.is_done() || mask.is_abort() {
            trace!("signal {} resolved to a stop mask", signo);
            Status::Stop
        } else {
            trace!("signal {} observed with no stop mapping", signo);
            Status::Continue
        }
    }

    fn dispatch(&self, token: Token, ready: ReadySet) -> Result<Status> {
        let (fd, prior, timer_interval, callbacks) = {
            let registry = self.inner.registry.lock().unwrap();
            match registry.get(token) {
                Some(entry) => (
                    entry.fd,
                    entry.interest,
                    entry.timer_interval,
                    entry.callbacks.clone(),
                ),
                // Raced with a concurrent `remove`; nothing to dispatch.
                None => return Ok(Status::Continue),
            }
        };

        let result = callbacks.on_event(prior, ready);

        if result.is_done() {
            self.remove(token)?;
            return Ok(if result.is_abort() {
                Status::Stop
            } else {
                Status::Continue
            });
        }
        if result.is_abort() {
            return Ok(Status::Stop);
        }

        let next_interest = if result.is_none() { prior } else { result };
        {
            let mut registry = self.inner.registry.lock().unwrap();
            if let Some(entry) = registry.get_mut(token) {
                entry.interest = next_interest;
            }
        }
        self.reregister_entry(fd, token, next_interest, timer_interval)?;
        Ok(Status::Continue)
    }

    /// Drives [`Reactor::next`] until a handle or signal resolves to a
    /// stop mask. Matches `cape_aio_context_wait`.
    pub fn wait(&self) -> Result<()> {
        loop {
            if self.next(None)? == Status::Stop {
                return Ok(());
            }
        }
    }

    #[cfg(target_os = "linux")]
    fn register_entry(
        &self,
        fd: RawFd,
        token: Token,
        interest: Interest,
        _timer_interval: Option<Duration>,
    ) -> Result<()> {
        self.inner.selector.register(fd, token, interest)
    }

    #[cfg(not(target_os = "linux"))]
    fn register_entry(
        &self,
        fd: RawFd,
        token: Token,
        interest: Interest,
        timer_interval: Option<Duration>,
    ) -> Result<()> {
        match timer_interval {
            Some(interval) => self
                .inner
                .selector
                .register_timer(token, interval.as_millis() as u64),
            None => self.inner.selector.register(fd, token, interest),
        }
    }

    #[cfg(target_os = "linux")]
    fn reregister_entry(
        &self,
        fd: RawFd,
        token: Token,
        interest: Interest,
        _timer_interval: Option<Duration>,
    ) -> Result<()> {
        self.inner.selector.reregister(fd, token, interest)
    }

    #[cfg(not(target_os = "linux"))]
    fn reregister_entry(
        &self,
        fd: RawFd,
        token: Token,
        interest: Interest,
        timer_interval: Option<Duration>,
    ) -> Result<()> {
        match timer_interval {
            // EVFILT_TIMER re-fires on its own; nothing to rearm.
            Some(_) => Ok(()),
            None => self.inner.selector.reregister(fd, token, interest),
        }
    }

    #[cfg(target_os = "linux")]
    fn deregister_entry(
        &self,
        fd: RawFd,
        _timer_interval: Option<Duration>,
        _token: Token,
    ) -> Result<()> {
        self.inner.selector.deregister(fd)
    }

    #[cfg(not(target_os = "linux"))]
    fn deregister_entry(
        &self,
        fd: RawFd,
        timer_interval: Option<Duration>,
        token: Token,
    ) -> Result<()> {
        match timer_interval {
            Some(_) => self.inner.selector.deregister_timer(token),
            None => self.inner.selector.deregister(fd),
        }
    }
}

/// Internal handle wrapping the Linux `signalfd`: reads one
/// `signalfd_siginfo`, re-raises the signal with `kill()` so any
/// process-level handler still observes it, then resolves it through the
/// shared signal map, exactly as `cape_aio_context_signal_onEvent` does.
#[cfg(target_os = "linux")]
struct SignalFdHandle {
    fd: std::os::unix::io::OwnedFd,
    map: Arc<SignalMap>,
}

#[cfg(target_os = "linux")]
impl HandleCallbacks for SignalFdHandle {
    fn fd(&self) -> RawFd {
        use std::os::unix::io::AsRawFd;
        self.fd.as_raw_fd()
    }

    fn on_event(&self, _prior: Interest, ready: ReadySet) -> Interest {
        if !ready.readable {
            return Interest::READ;
        }
        match sys::read_siginfo(self.fd()) {
            Ok(signo) => {
                unsafe { libc::kill(libc::getpid(), signo) };
                let mask = self.map.get(signo);
                if mask.is_done() || mask.is_abort() {
                    Interest::READ | Interest::DONE | Interest::ABORT
                } else {
                    Interest::READ
                }
            }
            Err(err) => {
                warn!("failed to read signalfd: {}", err);
                Interest::READ
            }
        }
    }

    fn on_release(&self) {
        trace!("signalfd handle released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::FromRawFd;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pipe() -> (std::os::unix::io::OwnedFd, std::os::unix::io::OwnedFd) {
        let mut fds = [0; 2];
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(rc, 0, "pipe(2) should succeed in a test process");
        unsafe {
            (
                std::os::unix::io::OwnedFd::from_raw_fd(fds[0]),
                std::os::unix::io::OwnedFd::from_raw_fd(fds[1]),
            )
        }
    }

    struct CountingHandle {
        fd: std::os::unix::io::OwnedFd,
        releases: Arc<AtomicUsize>,
        reply: Interest,
    }

    impl HandleCallbacks for CountingHandle {
        fn fd(&self) -> RawFd {
            use std::os::unix::io::AsRawFd;
            self.fd.as_raw_fd()
        }
        fn on_event(&self, _prior: Interest, _ready: ReadySet) -> Interest {
            self.reply
        }
        fn on_release(&self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn close_releases_every_handle_exactly_once() {
        let reactor = Reactor::new().expect("reactor should open");
        let releases = Arc::new(AtomicUsize::new(0));
        let (read_end, write_end) = pipe();
        let callbacks: Arc<dyn HandleCallbacks> = Arc::new(CountingHandle {
            fd: read_end,
            releases: releases.clone(),
            reply: Interest::NONE,
        });
        reactor
            .add(Handle::new(Interest::READ, callbacks))
            .expect("registering a pipe read end should succeed");
        drop(write_end);

        reactor.close().expect("close should succeed");
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        reactor.close().expect("double close should be a no-op");
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn done_tears_down_and_releases() {
        let reactor = Reactor::new().expect("reactor should open");
        let releases = Arc::new(AtomicUsize::new(0));
        let (read_end, write_end) = pipe();
        let callbacks: Arc<dyn HandleCallbacks> = Arc::new(CountingHandle {
            fd: read_end,
            releases: releases.clone(),
            reply: Interest::DONE,
        });
        let token = reactor
            .add(Handle::new(Interest::READ, callbacks))
            .expect("registering a pipe read end should succeed");

        let one = [0u8; 1];
        let rc = unsafe {
            use std::os::unix::io::AsRawFd;
            libc::write(write_end.as_raw_fd(), one.as_ptr() as *const _, 1)
        };
        assert_eq!(rc, 1);

        let status = reactor.next(Some(Duration::from_secs(1))).expect("next should succeed");
        assert_eq!(status, Status::Continue);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(reactor.modify(token, Interest::READ).is_err());
    }

    #[test]
    fn signal_map_rejects_out_of_range_signal_numbers() {
        let reactor = Reactor::new().expect("reactor should open");
        assert!(reactor.signal_map(0, Interest::ABORT).is_err());
        assert!(reactor.signal_map(32, Interest::ABORT).is_err());
        assert!(reactor.signal_map(libc::SIGINT, Interest::ABORT).is_ok());
    }
}
