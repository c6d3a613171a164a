use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex};

use log::{error, trace};

use crate::error::Result;
use crate::handle::{Handle, HandleCallbacks, ReadySet};
use crate::interest::Interest;
use crate::reactor::Reactor;
use crate::socket::would_block;
use crate::token::Token;

/// Callbacks an [`Accept`] drives. The Rust expression of
/// `cape_aio_accept_callback`'s two function pointers.
pub trait AcceptCallbacks: Send + Sync {
    /// A connection was accepted and configured non-blocking. Matches
    /// `self->onConnect (self->ptr, (void*)sock, remoteAddr)`; the peer
    /// address is a real `SocketAddr` here rather than an `inet_ntoa`
    /// string.
    fn on_connect(&self, stream: TcpStream, peer: SocketAddr);
    fn on_done(&self);
}

struct Inner {
    listener: TcpListener,
    callbacks: Arc<dyn AcceptCallbacks>,
    token: Mutex<Option<Token>>,
}

/// A passive listening endpoint. Grounded on `cape_aio_sock.c`'s
/// `CapeAioAccept`.
#[derive(Clone)]
pub struct Accept(Arc<Inner>);

impl Accept {
    pub fn new(listener: TcpListener, callbacks: Arc<dyn AcceptCallbacks>) -> Result<Accept> {
        listener.set_nonblocking(true)?;
        Ok(Accept(Arc::new(Inner {
            listener,
            callbacks,
            token: Mutex::new(None),
        })))
    }

    /// Registers for read interest. Matches `cape_aio_accept_add`.
    pub fn add(&self, reactor: &Reactor) -> Result<()> {
        let mut token = self.0.token.lock().unwrap();
        if token.is_some() {
            return Ok(());
        }
        let callbacks: Arc<dyn HandleCallbacks> = self.0.clone();
        *token = Some(reactor.add(Handle::new(Interest::READ, callbacks))?);
        Ok(())
    }

    /// Requests teardown via `DONE`.
    pub fn close(&self, reactor: &Reactor) -> Result<()> {
        let token = *self.0.token.lock().unwrap();
        match token {
            Some(token) => reactor.modify(token, Interest::DONE),
            None => Ok(()),
        }
    }
}

impl HandleCallbacks for Inner {
    fn fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }

    fn on_event(&self, prior: Interest, _ready: ReadySet) -> Interest {
        // A single `accept()` per dispatch step, exactly as
        // `cape_aio_accept_onEvent` does — edge-triggered, one-shot
        // readiness means any further backlog is picked up on the next
        // notification, not drained in a loop here.
        match self.listener.accept() {
            Ok((stream, peer)) => {
                if let Err(err) = stream.set_nonblocking(true) {
                    error!("accept: failed to set nonblocking: {}", err);
                }
                self.callbacks.on_connect(stream, peer);
                prior
            }
            Err(err) if would_block(&err) => prior,
            Err(err) => {
                trace!("accept: hard error, dropping interest: {}", err);
                Interest::NONE
            }
        }
    }

    fn on_release(&self) {
        self.callbacks.on_done();
    }
}
