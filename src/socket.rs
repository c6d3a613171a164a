use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex, Weak};

use log::{error, trace, warn};

use crate::error::Result;
use crate::handle::{Handle, HandleCallbacks, ReadySet};
use crate::interest::Interest;
use crate::reactor::Reactor;
use crate::token::Token;

const DEFAULT_RECV_CAPACITY: usize = 1024;

/// Callbacks a [`Socket`] drives. The Rust expression of
/// `cape_aio_socket_callback`'s three function pointers.
pub trait SocketCallbacks: Send + Sync {
    /// The outstanding buffer handed to [`Socket::send`] has been fully
    /// written.
    fn on_sent(&self, socket: &Socket);
    /// `data` borrows the socket's receive scratch buffer; it is not valid
    /// beyond this call (`spec.md`'s "scratch buffer not retainable past
    /// the call" resolution).
    fn on_recv(&self, socket: &Socket, data: &[u8]);
    /// The socket has torn down and left the reactor's registry.
    fn on_done(&self);
}

struct SendState {
    buf: Vec<u8>,
    sent: usize,
}

struct State {
    send: Option<SendState>,
    recv: Vec<u8>,
    token: Option<Token>,
}

struct Inner {
    self_weak: Weak<Inner>,
    stream: TcpStream,
    callbacks: Arc<dyn SocketCallbacks>,
    recv_capacity: usize,
    state: Mutex<State>,
    /// Mirrors the original's dual-purpose `self->mask`: `None` outside of
    /// `on_event`, `Some(accumulated)` for the duration of a dispatch. A
    /// reentrant `arm` call (a callback calling `send`/`mark_write` from
    /// inside its own `on_event`) ORs into this instead of touching the
    /// reactor directly, since the registration is about to be rewritten
    /// wholesale by `on_event`'s own return value anyway.
    inflight: Mutex<Option<Interest>>,
}

/// A reference-counted, non-blocking stream socket with a single
/// outstanding send buffer. Grounded on `cape_aio_sock.c`'s
/// `CapeAioSocket`; the manual `inref`/`unref` counter there is replaced
/// by `Arc`'s own strong count — cloning this handle where the original
/// calls `cape_aio_socket_inref`, dropping a clone where it calls
/// `cape_aio_socket_unref`, reproduces the same lifetime exactly.
#[derive(Clone)]
pub struct Socket(Arc<Inner>);

impl Socket {
    pub fn new(stream: TcpStream, callbacks: Arc<dyn SocketCallbacks>) -> Result<Socket> {
        stream.set_nonblocking(true)?;
        let inner = Arc::new_cyclic(|self_weak| Inner {
            self_weak: self_weak.clone(),
            stream,
            callbacks,
            recv_capacity: DEFAULT_RECV_CAPACITY,
            state: Mutex::new(State {
                send: None,
                recv: Vec::new(),
                token: None,
            }),
            inflight: Mutex::new(None),
        });
        Ok(Socket(inner))
    }

    pub fn with_recv_capacity(mut self, capacity: usize) -> Socket {
        Arc::get_mut(&mut self.0)
            .expect("recv capacity must be set before the socket is registered")
            .recv_capacity = capacity;
        self
    }

    pub fn is_active(&self) -> bool {
        self.0.state.lock().unwrap().token.is_some()
    }

    /// Registers the socket for read interest, or re-arms it if already
    /// registered. Matches `cape_aio_socket_listen`.
    pub fn listen(&self, reactor: &Reactor) -> Result<()> {
        self.arm(reactor, Interest::READ)
    }

    /// Arms write interest alongside whatever is already armed. Used after
    /// issuing a non-blocking `connect()` to learn when it completes.
    /// Matches `cape_aio_socket_markSent`.
    pub fn mark_write(&self, reactor: &Reactor) -> Result<()> {
        self.arm(reactor, Interest::READ | Interest::WRITE)
    }

    fn arm(&self, reactor: &Reactor, interest: Interest) -> Result<()> {
        let mut inflight = self.0.inflight.lock().unwrap();
        if let Some(accumulated) = inflight.as_mut() {
            *accumulated = accumulated.with(interest);
            return Ok(());
        }
        drop(inflight);

        let token = self.0.state.lock().unwrap().token;
        match token {
            Some(token) => reactor.modify(token, interest),
            None => {
                let callbacks: Arc<dyn HandleCallbacks> = self.0.clone();
                let token = reactor.add(Handle::new(interest, callbacks))?;
                self.0.state.lock().unwrap().token = Some(token);
                Ok(())
            }
        }
    }

    /// Queues `data` to be written. Only one buffer may be outstanding at
    /// a time; a second call before `on_sent` fires is a programmer error
    /// and is rejected (logged, matching the original's
    /// `"socket has already a buffer to send"`).
    pub fn send(&self, reactor: &Reactor, data: Vec<u8>) -> Result<()> {
        if data.is_empty() {
            warn!("socket send: refusing to send a zero-length buffer");
            self.0.callbacks.on_sent(self);
            return Ok(());
        }

        let mut state = self.0.state.lock().unwrap();
        if state.send.is_some() {
            error!("socket send: a buffer is already outstanding");
            return Ok(());
        }
        state.send = Some(SendState { buf: data, sent: 0 });
        drop(state);

        self.arm(reactor, Interest::READ | Interest::WRITE)
    }

    /// Requests teardown via `DONE`; the socket is released once the
    /// reactor processes it. Matches `cape_aio_socket_close`.
    pub fn close(&self, reactor: &Reactor) -> Result<()> {
        let token = self.0.state.lock().unwrap().token;
        match token {
            Some(token) => reactor.modify(token, Interest::DONE),
            None => Ok(()),
        }
    }

    fn upgrade(inner: &Arc<Inner>) -> Socket {
        Socket(inner.clone())
    }

    fn do_read(&self, mut mask: Interest) -> Interest {
        loop {
            let mut state = self.0.state.lock().unwrap();
            if state.recv.is_empty() {
                state.recv = vec![0u8; self.0.recv_capacity];
            }
            let mut buf = std::mem::take(&mut state.recv);
            drop(state);

            let result = (&self.0.stream).read(&mut buf);
            match result {
                Ok(0) => {
                    trace!("socket read: peer closed");
                    self.0.state.lock().unwrap().recv = buf;
                    return Interest::DONE;
                }
                Ok(n) => {
                    self.0.callbacks.on_recv(self, &buf[..n]);
                    self.0.state.lock().unwrap().recv = buf;
                }
                Err(err) if would_block(&err) => {
                    self.0.state.lock().unwrap().recv = buf;
                    return mask;
                }
                Err(err) => {
                    error!("socket read: {}", err);
                    self.0.state.lock().unwrap().recv = buf;
                    mask = mask.with(Interest::DONE);
                    return mask;
                }
            }
        }
    }

    fn do_write(&self, mut mask: Interest) -> Interest {
        loop {
            let mut state = self.0.state.lock().unwrap();
            let Some(mut send) = state.send.take() else {
                drop(state);
                mask = mask.without(Interest::WRITE);
                self.0.callbacks.on_sent(self);
                return mask;
            };
            drop(state);

            match (&self.0.stream).write(&send.buf[send.sent..]) {
                Ok(0) => {
                    trace!("socket write: peer closed");
                    return Interest::DONE;
                }
                Ok(n) => {
                    send.sent += n;
                    if send.sent == send.buf.len() {
                        mask = mask.without(Interest::WRITE);
                        self.0.callbacks.on_sent(self);
                        return mask;
                    }
                    self.0.state.lock().unwrap().send = Some(send);
                }
                Err(err) if would_block(&err) => {
                    self.0.state.lock().unwrap().send = Some(send);
                    std::thread::yield_now();
                }
                Err(err) => {
                    error!("socket write: {}", err);
                    return mask.with(Interest::DONE);
                }
            }
        }
    }
}

pub(crate) fn would_block(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    ) || err.raw_os_error() == Some(libc::EINPROGRESS)
}

impl HandleCallbacks for Inner {
    fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    fn on_event(&self, prior: Interest, ready: ReadySet) -> Interest {
        let inner = self
            .self_weak
            .upgrade()
            .expect("Inner is alive for the duration of its own callback");
        let socket = Socket::upgrade(&inner);

        *self.inflight.lock().unwrap() = Some(Interest::NONE);

        if let Ok(Some(err)) = self.stream.take_error() {
            error!("socket on_event: {}", err);
            let accumulated = self.inflight.lock().unwrap().take().unwrap_or(Interest::NONE);
            return prior.with(accumulated).with(Interest::DONE);
        }

        let mut mask = prior;
        if ready.readable {
            mask = socket.do_read(mask);
        }
        if !mask.is_done() && ready.writable {
            mask = socket.do_write(mask);
        }

        let accumulated = self.inflight.lock().unwrap().take().unwrap_or(Interest::NONE);
        mask.with(accumulated)
    }

    fn on_release(&self) {
        self.callbacks.on_done();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct Recorder {
        sent: AtomicUsize,
        recv: StdMutex<Vec<u8>>,
        done: AtomicUsize,
    }

    impl SocketCallbacks for Recorder {
        fn on_sent(&self, _socket: &Socket) {
            self.sent.fetch_add(1, Ordering::SeqCst);
        }
        fn on_recv(&self, _socket: &Socket, data: &[u8]) {
            self.recv.lock().unwrap().extend_from_slice(data);
        }
        fn on_done(&self) {
            self.done.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).expect("connect should succeed");
        let (server, _) = listener.accept().expect("accept should succeed");
        (client, server)
    }

    #[test]
    fn new_socket_is_nonblocking_and_inactive() {
        let (client, _server) = loopback_pair();
        let recorder = Arc::new(Recorder {
            sent: AtomicUsize::new(0),
            recv: StdMutex::new(Vec::new()),
            done: AtomicUsize::new(0),
        });
        let socket = Socket::new(client, recorder).expect("socket should construct");
        assert!(!socket.is_active());
    }

    #[test]
    fn send_rejects_empty_buffer_immediately() {
        let (client, _server) = loopback_pair();
        let recorder = Arc::new(Recorder {
            sent: AtomicUsize::new(0),
            recv: StdMutex::new(Vec::new()),
            done: AtomicUsize::new(0),
        });
        let socket = Socket::new(client, recorder.clone()).expect("socket should construct");
        let reactor = Reactor::new().expect("reactor should open");
        socket.send(&reactor, Vec::new()).expect("empty send should be accepted");
        assert_eq!(recorder.sent.load(Ordering::SeqCst), 1);
        assert!(!socket.is_active());
    }
}
