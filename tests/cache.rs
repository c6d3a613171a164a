use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use evio::{CacheCallbacks, Kind, Reactor, SocketCache};

mod util;
use util::init;

struct Recorder {
    recv: Mutex<Vec<u8>>,
    connects: AtomicUsize,
    retries: AtomicUsize,
}

impl Recorder {
    fn new() -> Recorder {
        Recorder {
            recv: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
            retries: AtomicUsize::new(0),
        }
    }
}

impl CacheCallbacks for Recorder {
    fn on_recv(&self, data: &[u8]) {
        self.recv.lock().unwrap().extend_from_slice(data);
    }

    fn on_retry(&self) {
        self.retries.fetch_add(1, Ordering::SeqCst);
    }

    fn on_connect(&self) {
        self.connects.fetch_add(1, Ordering::SeqCst);
    }
}

fn spawn_pump(reactor: Reactor, stop: Arc<AtomicBool>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while !stop.load(Ordering::SeqCst) {
            let _ = reactor.next(Some(Duration::from_millis(20)));
        }
    })
}

fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn send_before_any_connection_is_rejected() {
    init();
    let reactor = Reactor::new().expect("reactor should open");
    let recorder = Arc::new(Recorder::new());
    let cache = SocketCache::new(reactor, recorder);

    let err = cache
        .send_s(b"too early".to_vec())
        .expect_err("send before set() should fail");
    assert_eq!(err.kind(), Kind::NoObject);
    assert!(!cache.is_active());
}

#[test]
fn becomes_active_on_first_write_ack_and_delivers_queued_sends_in_order() {
    init();
    let reactor = Reactor::new().expect("reactor should open");
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
    let addr = listener.local_addr().expect("listener should have a local addr");

    let expected: &[u8] = b"onetwothree";
    let echo = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept should succeed");
        let mut received = 0usize;
        let mut buf = [0u8; 64];
        while received < expected.len() {
            let n = stream.read(&mut buf).expect("read should succeed");
            assert_ne!(n, 0, "peer closed before sending everything");
            stream
                .write_all(&buf[..n])
                .expect("echo write should succeed");
            received += n;
        }
    });

    let client = TcpStream::connect(addr).expect("connect should succeed");
    let recorder = Arc::new(Recorder::new());
    let cache = SocketCache::new(reactor.clone(), recorder.clone());

    let stop = Arc::new(AtomicBool::new(false));
    let pump = spawn_pump(reactor.clone(), stop.clone());

    cache.set(client).expect("cache should accept the stream");
    assert!(
        wait_until(Duration::from_secs(5), || cache.is_active()),
        "cache should become active once the connect is write-acknowledged"
    );
    assert_eq!(recorder.connects.load(Ordering::SeqCst), 1);

    cache
        .send_s(b"one".to_vec())
        .expect("send should queue once active");
    cache
        .send_s(b"two".to_vec())
        .expect("send should queue once active");
    cache
        .send_s(b"three".to_vec())
        .expect("send should queue once active");

    assert!(
        wait_until(Duration::from_secs(5), || {
            recorder.recv.lock().unwrap().as_slice() == expected
        }),
        "expected echoed bytes to arrive back in order"
    );

    stop.store(true, Ordering::SeqCst);
    pump.join().expect("pump thread should not panic");
    echo.join().expect("echo thread should not panic");
}
