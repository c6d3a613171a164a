use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;
use std::time::Duration;

use log::trace;

use crate::error::{Error, Result};
use crate::handle::ReadySet;
use crate::interest::Interest;
use crate::sys::SignalMap;
use crate::token::Token;

#[cfg(any(target_os = "freebsd", target_os = "openbsd"))]
type Filter = libc::c_short;
#[cfg(any(target_os = "macos", target_os = "ios"))]
type Filter = i16;
#[cfg(any(target_os = "netbsd", target_os = "dragonfly"))]
type Filter = i32;

macro_rules! kevent {
    ($id:expr, $filter:expr, $flags:expr, $udata:expr) => {
        libc::kevent {
            ident: $id as libc::uintptr_t,
            filter: $filter as Filter,
            flags: $flags,
            fflags: 0,
            data: 0,
            udata: $udata as *mut libc::c_void,
        }
    };
}

/// BSD/macOS backend: `kqueue` + `kevent`, one-shot via `EV_ADD | EV_ENABLE |
/// EV_ONESHOT` on `EVFILT_READ`/`EVFILT_WRITE`, exactly as
/// `cape_aio_update_events` arms them on this platform.
#[derive(Debug)]
pub struct Selector {
    kq: OwnedFd,
}

impl Selector {
    pub fn new() -> Result<Selector> {
        let kq = unsafe { libc::kqueue() };
        if kq < 0 {
            return Err(Error::last_os_error());
        }
        let rc = unsafe { libc::fcntl(kq, libc::F_SETFD, libc::FD_CLOEXEC) };
        if rc < 0 {
            return Err(Error::last_os_error());
        }
        Ok(Selector {
            kq: unsafe { OwnedFd::from_raw_fd(kq) },
        })
    }

    pub fn select(&self, events: &mut Events, timeout: Option<Duration>) -> Result<()> {
        let ts = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs() as libc::time_t,
            tv_nsec: d.subsec_nanos() as libc::c_long,
        });
        let ts_ptr = ts.as_ref().map(|t| t as *const _).unwrap_or(ptr::null());

        events.buf.clear();
        let n = unsafe {
            libc::kevent(
                self.kq.as_raw_fd(),
                ptr::null(),
                0,
                events.buf.as_mut_ptr(),
                events.buf.capacity() as libc::c_int,
                ts_ptr,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                trace!("kevent interrupted");
                return Ok(());
            }
            return Err(err.into());
        }
        unsafe { events.buf.set_len(n as usize) };
        Ok(())
    }

    pub fn register(&self, fd: RawFd, token: Token, interest: Interest) -> Result<()> {
        let flags = libc::EV_ADD | libc::EV_ENABLE | libc::EV_ONESHOT;
        let mut changes = Vec::with_capacity(2);
        if interest.is_readable() {
            changes.push(kevent!(fd, libc::EVFILT_READ, flags, token.0));
        }
        if interest.is_writable() {
            changes.push(kevent!(fd, libc::EVFILT_WRITE, flags, token.0));
        }
        self.submit(&mut changes)
    }

    pub fn reregister(&self, fd: RawFd, token: Token, interest: Interest) -> Result<()> {
        self.register(fd, token, interest)
    }

    pub fn deregister(&self, fd: RawFd) -> Result<()> {
        let flags = libc::EV_DELETE;
        let mut changes = vec![
            kevent!(fd, libc::EVFILT_READ, flags, 0),
            kevent!(fd, libc::EVFILT_WRITE, flags, 0),
        ];
        // A one-shot filter that already fired is implicitly gone; ENOENT
        // on delete is expected and not an error.
        for change in &mut changes {
            let rc = unsafe { libc::kevent(self.kq.as_raw_fd(), change, 1, ptr::null_mut(), 0, ptr::null()) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::ENOENT) {
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }

    fn submit(&self, changes: &mut [libc::kevent]) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let rc = unsafe {
            libc::kevent(
                self.kq.as_raw_fd(),
                changes.as_ptr(),
                changes.len() as libc::c_int,
                ptr::null_mut(),
                0,
                ptr::null(),
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            // Registering a descriptor whose peer already vanished can
            // surface EPIPE on some BSDs; the kqueue still reports events
            // for it afterwards, so treat this as benign (tokio-rs/mio#582).
            if err.raw_os_error() != Some(libc::EPIPE) {
                return Err(err.into());
            }
        }
        Ok(())
    }

    /// `EVFILT_TIMER` plays the role `timerfd` plays on Linux: registered
    /// without `EV_ONESHOT` it keeps re-firing every `interval_ms` on its
    /// own, so unlike read/write interest it is armed once and never
    /// rearmed. There is no real descriptor backing it, so `ident` is the
    /// handle's own token.
    pub fn register_timer(&self, token: Token, interval_ms: u64) -> Result<()> {
        let mut kev = kevent!(
            token.0,
            libc::EVFILT_TIMER,
            libc::EV_ADD | libc::EV_ENABLE,
            token.0
        );
        kev.data = interval_ms as _;
        self.submit(&mut [kev])
    }

    pub fn deregister_timer(&self, token: Token) -> Result<()> {
        let mut kev = kevent!(token.0, libc::EVFILT_TIMER, libc::EV_DELETE, 0);
        let rc = unsafe {
            libc::kevent(self.kq.as_raw_fd(), &mut kev, 1, ptr::null_mut(), 0, ptr::null())
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ENOENT) {
                return Err(err.into());
            }
        }
        Ok(())
    }

    /// Signals have no `signalfd` equivalent here: `EVFILT_SIGNAL` kevents
    /// are registered directly against the `kqueue` descriptor and carry no
    /// token, so the dispatch step resolves them by `ident` (the signal
    /// number) instead of through the registry.
    pub fn arm_signals(
        &self,
        sigint: bool,
        sigterm: bool,
        map: &SignalMap,
    ) -> Result<Option<OwnedFd>> {
        let mut changes = Vec::with_capacity(2);
        let flags = libc::EV_ADD | libc::EV_ENABLE;
        if sigint {
            unsafe { libc::signal(libc::SIGINT, libc::SIG_IGN) };
            let _ = map.set(libc::SIGINT, Interest::ABORT);
            changes.push(kevent!(libc::SIGINT, libc::EVFILT_SIGNAL, flags, 0));
        }
        if sigterm {
            unsafe { libc::signal(libc::SIGTERM, libc::SIG_IGN) };
            let _ = map.set(libc::SIGTERM, Interest::ABORT);
            changes.push(kevent!(libc::SIGTERM, libc::EVFILT_SIGNAL, flags, 0));
        }
        self.submit(&mut changes)?;
        // No separate descriptor: signal kevents are resolved by `ident`
        // directly against the `kqueue` fd, not through the registry.
        Ok(None)
    }
}

impl AsRawFd for Selector {
    fn as_raw_fd(&self) -> RawFd {
        self.kq.as_raw_fd()
    }
}

pub struct Events {
    buf: Vec<libc::kevent>,
}

impl Events {
    pub fn with_capacity(cap: usize) -> Events {
        Events {
            buf: Vec::with_capacity(cap),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = RawEvent> + '_ {
        self.buf.iter().map(|e| {
            let is_signal = e.filter as i32 == libc::EVFILT_SIGNAL;
            RawEvent {
                token: (!is_signal).then(|| Token(e.udata as usize)),
                signal: is_signal.then_some(e.ident as i32),
                ready: ReadySet {
                    readable: e.filter as i32 == libc::EVFILT_READ,
                    writable: e.filter as i32 == libc::EVFILT_WRITE,
                    error: (e.flags & libc::EV_ERROR) != 0,
                    hup: (e.flags & libc::EV_EOF) != 0,
                    timer: e.filter as i32 == libc::EVFILT_TIMER,
                },
            }
        })
    }
}

pub struct RawEvent {
    pub token: Option<Token>,
    pub signal: Option<i32>,
    pub ready: ReadySet,
}
