use std::collections::VecDeque;
use std::net::TcpStream;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use log::{error, trace};

use crate::error::{Error, Kind, Result};
use crate::reactor::Reactor;
use crate::socket::{Socket, SocketCallbacks};
use crate::timer::{Timer, TimerCallbacks};

/// 10 second auto-reconnect delay, matching
/// `cape_aio_socket_cache__on_done`'s `timeout_in_ms = 10000`.
const RETRY_DELAY: Duration = Duration::from_secs(10);

/// Callbacks a [`SocketCache`] drives.
pub trait CacheCallbacks: Send + Sync {
    /// Data arrived on the current connection.
    fn on_recv(&self, data: &[u8]);
    /// The 10 s reconnect timer fired after a disconnect with
    /// auto-reconnect armed. Matches `cape_aio_socket_cache__on_timer`
    /// calling `self->on_retry`.
    fn on_retry(&self);
    /// The first outbound buffer was acknowledged, confirming the
    /// non-blocking connect succeeded. Matches the `first_on_sent` branch
    /// of `cape_aio_socket_cache__on_sent`.
    fn on_connect(&self);
}

struct State {
    socket: Option<Socket>,
    queue: VecDeque<Vec<u8>>,
    auto_reconnect: bool,
}

struct CacheInner {
    self_weak: Weak<CacheInner>,
    reactor: Reactor,
    callbacks: Arc<dyn CacheCallbacks>,
    state: Mutex<State>,
}

/// A FIFO send queue layered over a [`Socket`], with optional
/// auto-reconnect. Grounded on `cape_aio_sock.c`'s `CapeAioSocketCache`.
///
/// Unlike [`Socket`], this type does hold a reference to the [`Reactor`]
/// directly (a field, not a per-call parameter) because it outlives any
/// single connection: `set` tears the old connection down and drives a new
/// one without the caller re-supplying the reactor each time.
#[derive(Clone)]
pub struct SocketCache(Arc<CacheInner>);

impl SocketCache {
    pub fn new(reactor: Reactor, callbacks: Arc<dyn CacheCallbacks>) -> SocketCache {
        let inner = Arc::new_cyclic(|self_weak| CacheInner {
            self_weak: self_weak.clone(),
            reactor,
            callbacks,
            state: Mutex::new(State {
                socket: None,
                queue: VecDeque::new(),
                auto_reconnect: false,
            }),
        });
        SocketCache(inner)
    }

    /// Whether a connection has been acknowledged as writable (the first
    /// `on_sent`). Matches `cape_aio_socket_cache_active`.
    pub fn is_active(&self) -> bool {
        self.0.state.lock().unwrap().socket.is_some()
    }

    /// Replaces the current connection (if any) with `stream` and starts
    /// driving it. Matches `cape_aio_socket_cache_set`; the original's
    /// separate `listen` + `markSent` calls (its own `TODO: provide a
    /// method which can do both`) are kept as two calls here too, since
    /// they leave the socket armed for `READ | WRITE` either way.
    pub fn set(&self, stream: TcpStream) -> Result<()> {
        self.close_current();

        let callbacks: Arc<dyn SocketCallbacks> = Arc::new(CacheSocketCallbacks {
            cache: self.0.self_weak.clone(),
        });
        let socket = Socket::new(stream, callbacks)?;

        {
            let mut state = self.0.state.lock().unwrap();
            state.socket = None;
            state.auto_reconnect = false;
        }

        socket.listen(&self.0.reactor)?;
        socket.mark_write(&self.0.reactor)?;
        Ok(())
    }

    /// Arms or disarms auto-reconnect. Matches `cape_aio_socket_cache_retry`.
    pub fn retry(&self, auto_reconnect: bool) {
        self.0.state.lock().unwrap().auto_reconnect = auto_reconnect;
    }

    /// Tears the current connection down and drops anything queued.
    /// Matches `cape_aio_socket_cache_clr`.
    pub fn clr(&self) {
        self.close_current();
        self.0.state.lock().unwrap().queue.clear();
    }

    /// Queues `data` and ensures write interest is armed. Fails with
    /// [`Kind::NoObject`] if there is no active connection, matching
    /// `cape_aio_socket_cache_send_s`'s `"socket is not connected"`.
    pub fn send_s(&self, data: Vec<u8>) -> Result<()> {
        let socket = {
            let mut state = self.0.state.lock().unwrap();
            match &state.socket {
                Some(socket) => {
                    state.queue.push_back(data);
                    socket.clone()
                }
                None => {
                    return Err(Error::new(Kind::NoObject, "socket is not connected"));
                }
            }
        };
        socket.mark_write(&self.0.reactor)
    }

    fn close_current(&self) {
        let socket = self.0.state.lock().unwrap().socket.take();
        if let Some(socket) = socket {
            trace!("aio_cache close: close connection process initiated");
            let _ = socket.close(&self.0.reactor);
        }
    }
}

impl CacheInner {
    fn on_sent(&self, socket: &Socket) {
        let mut first = false;
        {
            let mut state = self.state.lock().unwrap();
            if state.socket.is_none() {
                state.socket = Some(socket.clone());
                first = true;
            }
        }
        if first {
            trace!("aio_cache sent: *** CONNECTED ***");
            self.callbacks.on_connect();
        }

        let next = self.state.lock().unwrap().queue.pop_front();
        if let Some(buf) = next {
            if let Err(err) = socket.send(&self.reactor, buf) {
                error!("aio_cache sent: failed to send queued buffer: {}", err);
            }
        }
    }

    fn on_recv(&self, data: &[u8]) {
        self.callbacks.on_recv(data);
    }

    fn on_done(&self) {
        let (had_socket, retry) = {
            let mut state = self.state.lock().unwrap();
            let had_socket = state.socket.is_some();
            let retry = had_socket && state.auto_reconnect;
            state.socket = None;
            state.queue.clear();
            (had_socket, retry)
        };
        trace!(
            "aio_cache done: *** CONNECTION LOST *** (had_socket={}, retry={})",
            had_socket, retry
        );

        if retry {
            trace!("aio_cache set: start retry timer [{}ms]", RETRY_DELAY.as_millis());
            let callbacks: Arc<dyn TimerCallbacks> = Arc::new(RetryTimer {
                cache: self.self_weak.clone(),
            });
            match Timer::new(RETRY_DELAY, callbacks) {
                Ok(timer) => {
                    // The reactor's registry holds its own clone of the
                    // handle's callbacks once `add` returns, so `timer`
                    // itself doesn't need to outlive this call.
                    if let Err(err) = timer.add(&self.reactor) {
                        trace!("aio socket: can't create reconnect timer: {}", err);
                    }
                }
                Err(err) => trace!("aio socket: can't create reconnect timer: {}", err),
            }
        }
    }
}

struct CacheSocketCallbacks {
    cache: Weak<CacheInner>,
}

impl SocketCallbacks for CacheSocketCallbacks {
    fn on_sent(&self, socket: &Socket) {
        if let Some(cache) = self.cache.upgrade() {
            cache.on_sent(socket);
        }
    }

    fn on_recv(&self, _socket: &Socket, data: &[u8]) {
        if let Some(cache) = self.cache.upgrade() {
            cache.on_recv(data);
        }
    }

    fn on_done(&self) {
        if let Some(cache) = self.cache.upgrade() {
            cache.on_done();
        }
    }
}

struct RetryTimer {
    cache: Weak<CacheInner>,
}

impl TimerCallbacks for RetryTimer {
    fn on_tick(&self) -> bool {
        if let Some(cache) = self.cache.upgrade() {
            cache.callbacks.on_retry();
        }
        // One-shot: the original's on_timer always returns FALSE.
        false
    }

    fn on_done(&self) {}
}
