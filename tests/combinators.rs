//! Combinator behavior: aggregate ordering, first-rejection-wins, races,
//! and forced settlement of race losers.

mod common;

use std::sync::Arc;

use common::{init_test_logging, Recorder};
use parking_lot::Mutex;
use thenable::{all, new_promise, race, race_and_reject, race_and_resolve, rejected, resolved};
use thenable::{AnyValue, Defer, Promise};

/// Creates `n` pending promises and hands back their defers.
fn pending(n: usize) -> (Vec<Promise>, Vec<Defer>) {
    let defers: Arc<Mutex<Vec<Defer>>> = Arc::new(Mutex::new(Vec::new()));
    let promises = (0..n)
        .map(|_| {
            let defers = Arc::clone(&defers);
            new_promise(move |defer| defers.lock().push(defer))
        })
        .collect();
    let defers = std::mem::take(&mut *defers.lock());
    (promises, defers)
}

#[test]
fn all_preserves_input_order() {
    init_test_logging();
    let recorder = Recorder::new();
    let (promises, defers) = pending(3);

    let rec = recorder.clone();
    all(promises).then(move |values: Vec<AnyValue>| {
        let ints: Vec<i32> = values.iter().map(|v| v.cast::<i32>().unwrap()).collect();
        rec.push(format!("{ints:?}"));
    });

    // Settle out of order; the aggregate must stay positional.
    defers[2].resolve(20_i32);
    defers[0].resolve(0_i32);
    assert!(recorder.entries().is_empty());
    defers[1].resolve(10_i32);
    assert_eq!(recorder.entries(), vec!["[0, 10, 20]"]);
}

#[test]
fn all_rejects_on_first_failure() {
    init_test_logging();
    let recorder = Recorder::new();
    let rec = recorder.clone();
    let err = recorder.clone();
    all([resolved(1_i32), resolved("a"), rejected("err")])
        .then(move |_: Vec<AnyValue>| rec.push("resolved"))
        .fail(move |e: &str| err.push(format!("rejected {e}")));
    assert_eq!(recorder.entries(), vec!["rejected err"]);
}

#[test]
fn all_ignores_settles_after_rejection() {
    init_test_logging();
    let recorder = Recorder::new();
    let (promises, defers) = pending(2);

    let rec = recorder.clone();
    let err = recorder.clone();
    all(promises)
        .then(move |_: Vec<AnyValue>| rec.push("resolved"))
        .fail(move |e: &str| err.push(format!("rejected {e}")));

    defers[0].reject("boom");
    defers[1].resolve(5_i32);
    assert_eq!(recorder.entries(), vec!["rejected boom"]);
}

#[test]
fn all_of_nothing_resolves_immediately() {
    init_test_logging();
    let recorder = Recorder::new();
    let rec = recorder.clone();
    all([]).then(move |values: Vec<AnyValue>| {
        rec.push(format!("len {}", values.len()));
    });
    assert_eq!(recorder.entries(), vec!["len 0"]);
}

#[test]
fn race_settles_with_the_first_winner() {
    init_test_logging();
    let recorder = Recorder::new();
    let (promises, defers) = pending(3);

    let rec = recorder.clone();
    race(promises).then(move |v: i32| {
        rec.push(format!("won {v}"));
    });

    defers[1].resolve(11_i32);
    defers[0].resolve(99_i32);
    assert_eq!(recorder.entries(), vec!["won 11"]);
}

#[test]
fn race_propagates_a_winning_rejection() {
    init_test_logging();
    let recorder = Recorder::new();
    let (promises, defers) = pending(2);

    let rec = recorder.clone();
    race(promises).fail(move |e: &str| {
        rec.push(format!("lost {e}"));
    });

    defers[0].reject("fast failure");
    defers[1].resolve(1_i32);
    assert_eq!(recorder.entries(), vec!["lost fast failure"]);
}

#[test]
fn race_and_resolve_settles_the_losers() {
    init_test_logging();
    let recorder = Recorder::new();
    let (promises, defers) = pending(3);

    // Observe every input chain, passing the value through untouched.
    for (index, promise) in promises.iter().enumerate() {
        let rec = recorder.clone();
        promise.always(move |v: AnyValue| {
            rec.push(format!("input {index} settled"));
            v
        });
    }

    let rec = recorder.clone();
    race_and_resolve(promises.clone()).then(move |v: i32| {
        rec.push(format!("won {v}"));
    });

    defers[1].resolve(7_i32);
    let entries = recorder.entries();
    assert!(entries.contains(&"won 7".to_string()));
    for index in 0..3 {
        assert_eq!(recorder.count(&format!("input {index} settled")), 1);
    }
}

#[test]
fn race_and_reject_rejects_the_losers() {
    init_test_logging();
    let recorder = Recorder::new();
    let (promises, defers) = pending(2);

    for (index, promise) in promises.iter().enumerate() {
        let rec = recorder.clone();
        promise.fail(move |_: AnyValue| rec.push(format!("input {index} rejected")));
    }

    let rec = recorder.clone();
    race_and_reject(promises.clone()).then(move |v: i32| {
        rec.push(format!("won {v}"));
    });

    defers[0].resolve(3_i32);
    let entries = recorder.entries();
    assert!(entries.contains(&"won 3".to_string()));
    assert_eq!(recorder.count("input 1 rejected"), 1);
    assert_eq!(recorder.count("input 0 rejected"), 0);
}
