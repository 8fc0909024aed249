//! Cross-thread behavior: settles from other threads, racing settlers, and
//! FIFO dispatch under contention.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use common::{init_test_logging, Recorder};
use parking_lot::Mutex;
use thenable::{new_promise, Defer};

#[test]
fn continuation_runs_on_the_settling_thread() {
    init_test_logging();
    let parked: Arc<Mutex<Option<Defer>>> = Arc::new(Mutex::new(None));
    let park = Arc::clone(&parked);
    let (tx, rx) = mpsc::channel();

    let chain = new_promise(move |defer| {
        *park.lock() = Some(defer);
    });
    let sender = tx.clone();
    chain.then(move |v: i32| {
        sender.send((v, thread::current().id())).unwrap();
    });

    let defer = parked.lock().take().expect("executor ran");
    let settler = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        defer.resolve(7_i32);
        thread::current().id()
    });
    let settler_id = settler.join().unwrap();

    let (value, ran_on) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(value, 7);
    // No scheduler: whoever settles performs the continuation work.
    assert_eq!(ran_on, settler_id);
    assert_ne!(ran_on, thread::current().id());
}

#[test]
fn racing_settlers_produce_exactly_one_settlement() {
    init_test_logging();
    let parked: Arc<Mutex<Option<Defer>>> = Arc::new(Mutex::new(None));
    let park = Arc::clone(&parked);
    let runs = Arc::new(AtomicUsize::new(0));

    let chain = new_promise(move |defer| {
        *park.lock() = Some(defer);
    });
    let on_resolved = Arc::clone(&runs);
    let on_rejected = Arc::clone(&runs);
    chain.then_or(
        move |_: usize| {
            on_resolved.fetch_add(1, Ordering::SeqCst);
        },
        move |_: &str| {
            on_rejected.fetch_add(1, Ordering::SeqCst);
        },
    );

    let defer = parked.lock().take().expect("executor ran");
    let threads: Vec<_> = (0..8_usize)
        .map(|i| {
            let defer = defer.clone();
            thread::spawn(move || {
                if i % 2 == 0 {
                    defer.resolve(i);
                } else {
                    defer.reject("lost the race");
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    assert_eq!(runs.load(Ordering::SeqCst), 1, "exactly one settlement observed");
}

#[test]
fn dispatch_order_holds_while_attach_and_settle_race() {
    init_test_logging();
    let recorder = Recorder::new();
    let parked: Arc<Mutex<Option<Defer>>> = Arc::new(Mutex::new(None));
    let park = Arc::clone(&parked);

    let chain = new_promise(move |defer| {
        *park.lock() = Some(defer);
    });

    // Settle from another thread while the main thread is still attaching.
    let defer = parked.lock().take().expect("executor ran");
    let settler = thread::spawn(move || {
        thread::sleep(Duration::from_millis(5));
        defer.resolve(0_i32);
    });

    const TASKS: usize = 100;
    for index in 0..TASKS {
        let rec = recorder.clone();
        chain.then(move |v: i32| {
            rec.push(format!("{index}"));
            v
        });
    }
    settler.join().unwrap();

    let expected: Vec<String> = (0..TASKS).map(|i| i.to_string()).collect();
    assert_eq!(recorder.entries(), expected);
}

#[test]
fn chains_on_different_threads_progress_independently() {
    init_test_logging();
    let totals = Arc::new(AtomicUsize::new(0));
    let threads: Vec<_> = (0..4_usize)
        .map(|seed| {
            let totals = Arc::clone(&totals);
            thread::spawn(move || {
                let out = Arc::new(AtomicUsize::new(0));
                let sink = Arc::clone(&out);
                new_promise(move |defer| defer.resolve(seed))
                    .then(|v: usize| v + 1)
                    .then(move |v: usize| sink.store(v, Ordering::SeqCst));
                totals.fetch_add(out.load(Ordering::SeqCst), Ordering::SeqCst);
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }
    // seeds 0..4, each incremented once: 1 + 2 + 3 + 4
    assert_eq!(totals.load(Ordering::SeqCst), 10);
}
