use std::thread;
use std::time::Duration;

use evio::Reactor;

mod util;
use util::init;

// Blocking SIGINT process-wide is what makes this work at all (the signal
// reaches the reactor's signalfd/EVFILT_SIGNAL path instead of the default
// handler), but a test binary runs many tests on many threads at once and
// `kill()` targets the whole process — another thread that hasn't blocked
// the signal could take the default disposition and end the run. Safe only
// with `cargo test -- --test-threads=1` or in isolation, matching the
// teacher's own precedent for a test with an unavoidable environmental
// caveat (`tests/tcp_stream.rs`'s `#[ignore]`'d flaky shutdown test).
#[test]
#[ignore = "sends a real SIGINT to this process; only safe run alone, not alongside parallel test threads"]
fn set_interrupts_stops_the_wait_loop() {
    init();
    let reactor = Reactor::new().expect("reactor should open");
    reactor
        .set_interrupts(true, false)
        .expect("sigint should arm");

    let waiter = reactor.clone();
    let handle = thread::spawn(move || waiter.wait());

    thread::sleep(Duration::from_millis(100));
    unsafe {
        libc::kill(libc::getpid(), libc::SIGINT);
    }

    handle
        .join()
        .expect("wait thread should not panic")
        .expect("wait should return Ok once the signal resolves to ABORT");
}
