use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use evio::{Reactor, Timer, TimerCallbacks};

mod util;
use util::init;

struct Counter {
    ticks: AtomicUsize,
    done: AtomicUsize,
}

impl TimerCallbacks for Counter {
    fn on_tick(&self) -> bool {
        self.ticks.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn on_done(&self) {
        self.done.fetch_add(1, Ordering::SeqCst);
    }
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
fn fires_periodically_until_closed() {
    init();
    let reactor = Reactor::new().expect("reactor should open");
    let counter = Arc::new(Counter {
        ticks: AtomicUsize::new(0),
        done: AtomicUsize::new(0),
    });
    let timer = Timer::new(Duration::from_millis(20), counter.clone())
        .expect("timer should construct");
    timer.add(&reactor).expect("timer should register");

    let stop = Arc::new(AtomicBool::new(false));
    let pump_reactor = reactor.clone();
    let pump_stop = stop.clone();
    let pump = thread::spawn(move || {
        while !pump_stop.load(Ordering::SeqCst) {
            let _ = pump_reactor.next(Some(Duration::from_millis(20)));
        }
    });

    assert!(
        wait_until(Duration::from_secs(5), || counter.ticks.load(Ordering::SeqCst) >= 3),
        "expected at least 3 ticks from a 20ms periodic timer"
    );

    timer.close(&reactor).expect("close should succeed");
    assert!(
        wait_until(Duration::from_secs(5), || counter.done.load(Ordering::SeqCst) == 1),
        "expected on_done to fire exactly once after close"
    );

    stop.store(true, Ordering::SeqCst);
    pump.join().expect("pump thread should not panic");
}
