//! Fallback backend for platforms with neither `epoll` nor `kqueue`
//! (Windows, wasm, …). Every method fails with [`Kind::Os`] wrapping
//! `io::ErrorKind::Unsupported`, matching `mio`'s own `sys/shell` module.
//! Full IOCP support is out of scope; see `SPEC_FULL.md` §3.

use std::io;
use std::os::unix::io::{OwnedFd, RawFd};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::handle::ReadySet;
use crate::interest::Interest;
use crate::sys::SignalMap;
use crate::token::Token;

fn unsupported() -> Error {
    io::Error::from(io::ErrorKind::Unsupported).into()
}

#[derive(Debug)]
pub struct Selector;

impl Selector {
    pub fn new() -> Result<Selector> {
        Err(unsupported())
    }

    pub fn select(&self, _events: &mut Events, _timeout: Option<Duration>) -> Result<()> {
        Err(unsupported())
    }

    pub fn register(&self, _fd: RawFd, _token: Token, _interest: Interest) -> Result<()> {
        Err(unsupported())
    }

    pub fn reregister(&self, _fd: RawFd, _token: Token, _interest: Interest) -> Result<()> {
        Err(unsupported())
    }

    pub fn deregister(&self, _fd: RawFd) -> Result<()> {
        Err(unsupported())
    }

    pub fn register_timer(&self, _token: Token, _interval_ms: u64) -> Result<()> {
        Err(unsupported())
    }

    pub fn deregister_timer(&self, _token: Token) -> Result<()> {
        Err(unsupported())
    }

    pub fn arm_signals(
        &self,
        _sigint: bool,
        _sigterm: bool,
        _map: &SignalMap,
    ) -> Result<Option<OwnedFd>> {
        Err(unsupported())
    }
}

pub struct Events;

impl Events {
    pub fn with_capacity(_cap: usize) -> Events {
        Events
    }

    pub fn iter(&self) -> impl Iterator<Item = RawEvent> {
        std::iter::empty()
    }
}

pub struct RawEvent {
    pub token: Option<Token>,
    pub signal: Option<i32>,
    pub ready: ReadySet,
}
