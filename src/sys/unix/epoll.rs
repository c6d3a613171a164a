use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use log::trace;

use crate::error::{Error, Result};
use crate::handle::ReadySet;
use crate::interest::Interest;
use crate::sys::SignalMap;
use crate::token::Token;

/// Linux backend: `epoll_create1` + `epoll_ctl` + `epoll_wait`, one-shot via
/// `EPOLLONESHOT | EPOLLET` exactly as `cape_aio_update_events` arms them.
#[derive(Debug)]
pub struct Selector {
    ep: OwnedFd,
}

impl Selector {
    pub fn new() -> Result<Selector> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(Error::last_os_error());
        }
        Ok(Selector {
            ep: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    pub fn select(&self, events: &mut Events, timeout: Option<Duration>) -> Result<()> {
        let timeout_ms = timeout
            .map(|d| d.as_millis().min(i32::MAX as u128) as libc::c_int)
            .unwrap_or(-1);

        events.buf.clear();
        let n = unsafe {
            libc::epoll_wait(
                self.ep.as_raw_fd(),
                events.buf.as_mut_ptr(),
                events.buf.capacity() as i32,
                timeout_ms,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                trace!("epoll_wait interrupted");
                return Ok(());
            }
            return Err(err.into());
        }
        unsafe { events.buf.set_len(n as usize) };
        Ok(())
    }

    pub fn register(&self, fd: RawFd, token: Token, interest: Interest) -> Result<()> {
        let mut event = libc::epoll_event {
            events: interest_to_epoll(interest),
            u64: usize::from(token) as u64,
        };
        let rc = unsafe {
            libc::epoll_ctl(self.ep.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &mut event)
        };
        if rc < 0 {
            return Err(Error::last_os_error());
        }
        Ok(())
    }

    pub fn reregister(&self, fd: RawFd, token: Token, interest: Interest) -> Result<()> {
        let mut event = libc::epoll_event {
            events: interest_to_epoll(interest),
            u64: usize::from(token) as u64,
        };
        let rc = unsafe {
            libc::epoll_ctl(self.ep.as_raw_fd(), libc::EPOLL_CTL_MOD, fd, &mut event)
        };
        if rc < 0 {
            return Err(Error::last_os_error());
        }
        Ok(())
    }

    pub fn deregister(&self, fd: RawFd) -> Result<()> {
        let rc = unsafe {
            libc::epoll_ctl(
                self.ep.as_raw_fd(),
                libc::EPOLL_CTL_DEL,
                fd,
                std::ptr::null_mut(),
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            // The fd may already be gone (closed before deregister); that's
            // fine, it can't still be pending in the epoll set.
            if err.raw_os_error() != Some(libc::EBADF) && err.raw_os_error() != Some(libc::ENOENT)
            {
                return Err(err.into());
            }
        }
        Ok(())
    }

    /// Blocks `sigint`/`sigterm` from their default disposition and routes
    /// them through a `signalfd`, returned so the caller can register it as
    /// an ordinary read-interest handle (`cape_aio_context_set_interupts`).
    pub fn arm_signals(
        &self,
        sigint: bool,
        sigterm: bool,
        map: &SignalMap,
    ) -> Result<Option<OwnedFd>> {
        if !sigint && !sigterm {
            return Ok(None);
        }
        unsafe {
            let mut set: libc::sigset_t = mem::zeroed();
            libc::sigemptyset(&mut set);
            if sigint {
                libc::sigaddset(&mut set, libc::SIGINT);
                let _ = map.set(libc::SIGINT, Interest::ABORT);
            }
            if sigterm {
                libc::sigaddset(&mut set, libc::SIGTERM);
                let _ = map.set(libc::SIGTERM, Interest::ABORT);
            }
            if libc::sigprocmask(libc::SIG_BLOCK, &set, std::ptr::null_mut()) < 0 {
                return Err(Error::last_os_error());
            }
            let fd = libc::signalfd(-1, &set, libc::SFD_NONBLOCK | libc::SFD_CLOEXEC);
            if fd < 0 {
                return Err(Error::last_os_error());
            }
            Ok(Some(OwnedFd::from_raw_fd(fd)))
        }
    }
}

impl AsRawFd for Selector {
    fn as_raw_fd(&self) -> RawFd {
        self.ep.as_raw_fd()
    }
}

fn interest_to_epoll(interest: Interest) -> u32 {
    let mut bits = libc::EPOLLONESHOT | libc::EPOLLET;
    if interest.is_readable() {
        bits |= libc::EPOLLIN | libc::EPOLLRDHUP;
    }
    if interest.is_writable() {
        bits |= libc::EPOLLOUT;
    }
    bits as u32
}

pub struct Events {
    buf: Vec<libc::epoll_event>,
}

impl Events {
    pub fn with_capacity(cap: usize) -> Events {
        Events {
            buf: Vec::with_capacity(cap),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = RawEvent> + '_ {
        self.buf.iter().map(|e| RawEvent {
            token: Some(Token(e.u64 as usize)),
            signal: None,
            ready: ReadySet {
                readable: (e.events & (libc::EPOLLIN as u32 | libc::EPOLLPRI as u32)) != 0,
                writable: (e.events & libc::EPOLLOUT as u32) != 0,
                error: (e.events & libc::EPOLLERR as u32) != 0,
                hup: (e.events & (libc::EPOLLHUP as u32 | libc::EPOLLRDHUP as u32)) != 0,
                timer: false,
            },
        })
    }
}

/// A single readiness event, normalized out of the platform's native
/// representation. `token` is `None` only for a signal event with no
/// associated handle (the BSD path; epoll always carries a token because its
/// signal source is itself a registered handle).
pub struct RawEvent {
    pub token: Option<Token>,
    pub signal: Option<i32>,
    pub ready: ReadySet,
}

/// Reads and discards one `signalfd_siginfo`, returning the signal number.
/// Used by the internal signalfd handle's `on_event`.
pub fn read_siginfo(fd: RawFd) -> Result<i32> {
    let mut info: libc::signalfd_siginfo = unsafe { mem::zeroed() };
    let ptr = &mut info as *mut _ as *mut libc::c_void;
    let n = unsafe { libc::read(fd, ptr, mem::size_of::<libc::signalfd_siginfo>()) };
    if n < 0 {
        return Err(Error::last_os_error());
    }
    Ok(info.ssi_signo as i32)
}
