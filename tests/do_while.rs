//! Loop primitive behavior: break with a value, reject, and rescheduling.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{init_test_logging, Recorder};
use parking_lot::Mutex;
use thenable::{do_while, DeferLoop};

#[test]
fn break_resolves_with_the_break_value() {
    init_test_logging();
    let iterations = Arc::new(AtomicUsize::new(0));
    let recorder = Recorder::new();

    let counter = Arc::clone(&iterations);
    let rec = recorder.clone();
    do_while(move |looper| {
        let i = counter.fetch_add(1, Ordering::SeqCst) + 1;
        if i >= 3 {
            looper.break_(i);
        } else {
            looper.continue_();
        }
    })
    .then(move |v: usize| {
        rec.push(format!("broke with {v}"));
    });

    assert_eq!(iterations.load(Ordering::SeqCst), 3);
    assert_eq!(recorder.entries(), vec!["broke with 3"]);
}

#[test]
fn reject_propagates_out_of_the_loop() {
    init_test_logging();
    let recorder = Recorder::new();
    let rec = recorder.clone();
    do_while(|looper| looper.reject("loop failure")).fail(move |e: &str| {
        rec.push(e);
    });
    assert_eq!(recorder.entries(), vec!["loop failure"]);
}

#[test]
fn body_panic_rejects_the_loop() {
    init_test_logging();
    let recorder = Recorder::new();
    let rec = recorder.clone();
    do_while(|_looper: DeferLoop| panic!("body exploded")).fail(
        move |p: thenable::PanicPayload| {
            rec.push(p.message().to_string());
        },
    );
    assert_eq!(recorder.entries(), vec!["body exploded"]);
}

#[test]
fn deferred_continue_reschedules_the_body() {
    init_test_logging();
    let recorder = Recorder::new();
    let parked: Arc<Mutex<Option<DeferLoop>>> = Arc::new(Mutex::new(None));
    let rounds = Arc::new(AtomicUsize::new(0));

    let park = Arc::clone(&parked);
    let counter = Arc::clone(&rounds);
    let rec = recorder.clone();
    do_while(move |looper| {
        let i = counter.fetch_add(1, Ordering::SeqCst) + 1;
        if i >= 2 {
            looper.break_(i);
        } else {
            // Park the loop handle; the test continues it later, the way an
            // event loop would.
            *park.lock() = Some(looper);
        }
    })
    .then(move |v: usize| {
        rec.push(format!("broke with {v}"));
    });

    // First round parked itself: nothing has settled yet.
    assert_eq!(rounds.load(Ordering::SeqCst), 1);
    assert!(recorder.entries().is_empty());

    let looper = parked.lock().take().expect("body parked the loop handle");
    looper.continue_();
    assert_eq!(rounds.load(Ordering::SeqCst), 2);
    assert_eq!(recorder.entries(), vec!["broke with 2"]);
}
