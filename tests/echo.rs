use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use evio::{Accept, AcceptCallbacks, Reactor, Socket, SocketCallbacks};

mod util;
use util::init;

struct EchoSocket {
    reactor: Reactor,
}

impl SocketCallbacks for EchoSocket {
    fn on_sent(&self, _socket: &Socket) {}

    fn on_recv(&self, socket: &Socket, data: &[u8]) {
        if !data.is_empty() {
            let _ = socket.send(&self.reactor, data.to_vec());
        }
    }

    fn on_done(&self) {}
}

struct EchoAccept {
    reactor: Reactor,
}

impl AcceptCallbacks for EchoAccept {
    fn on_connect(&self, stream: TcpStream, _peer: SocketAddr) {
        let callbacks = Arc::new(EchoSocket {
            reactor: self.reactor.clone(),
        });
        let socket = Socket::new(stream, callbacks).expect("socket should construct");
        socket.listen(&self.reactor).expect("socket should register");
    }

    fn on_done(&self) {}
}

fn spawn_pump(reactor: Reactor, stop: Arc<AtomicBool>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while !stop.load(Ordering::SeqCst) {
            let _ = reactor.next(Some(Duration::from_millis(20)));
        }
    })
}

#[test]
fn echoes_data_back_to_the_client() {
    init();
    let reactor = Reactor::new().expect("reactor should open");
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
    let addr = listener.local_addr().expect("listener should have a local addr");

    let accept_callbacks = Arc::new(EchoAccept {
        reactor: reactor.clone(),
    });
    let accept = Accept::new(listener, accept_callbacks).expect("accept should construct");
    accept.add(&reactor).expect("accept should register");

    let stop = Arc::new(AtomicBool::new(false));
    let pump = spawn_pump(reactor.clone(), stop.clone());

    let mut client = TcpStream::connect(addr).expect("connect should succeed");
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("setting a read timeout should succeed");
    client
        .write_all(b"hello reactor")
        .expect("write should succeed");

    let mut buf = [0u8; 32];
    let n = client.read(&mut buf).expect("read should succeed");
    assert_eq!(&buf[..n], b"hello reactor");

    stop.store(true, Ordering::SeqCst);
    pump.join().expect("pump thread should not panic");
}

#[test]
fn multiple_sends_are_each_echoed_in_order() {
    init();
    let reactor = Reactor::new().expect("reactor should open");
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
    let addr = listener.local_addr().expect("listener should have a local addr");

    let accept_callbacks = Arc::new(EchoAccept {
        reactor: reactor.clone(),
    });
    let accept = Accept::new(listener, accept_callbacks).expect("accept should construct");
    accept.add(&reactor).expect("accept should register");

    let stop = Arc::new(AtomicBool::new(false));
    let pump = spawn_pump(reactor.clone(), stop.clone());

    let mut client = TcpStream::connect(addr).expect("connect should succeed");
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("setting a read timeout should succeed");

    for chunk in [&b"first"[..], &b"second"[..], &b"third"[..]] {
        client.write_all(chunk).expect("write should succeed");

        let mut buf = vec![0u8; chunk.len()];
        client
            .read_exact(&mut buf)
            .expect("read_exact should succeed");
        assert_eq!(buf, chunk);
    }

    stop.store(true, Ordering::SeqCst);
    pump.join().expect("pump thread should not panic");
}
