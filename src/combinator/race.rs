//! First settle wins.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::any_value::AnyValue;
use crate::callstack::Loc;
use crate::handler::Handler;
use crate::promise::{new_promise_at, Promise};

/// Index value meaning "no input has settled yet".
const NO_WINNER: usize = usize::MAX;

/// Settles the output with whichever input settles first, on that input's
/// path. Later settles of the remaining inputs are ignored by the output.
#[track_caller]
pub fn race<I>(promises: I) -> Promise
where
    I: IntoIterator<Item = Promise>,
{
    let winner = Arc::new(AtomicUsize::new(NO_WINNER));
    race_at(Loc::caller(), promises.into_iter().collect(), &winner)
}

/// Races the inputs, then force-resolves every non-winner so that no input
/// chain is left pending.
#[track_caller]
pub fn race_and_resolve<I>(promises: I) -> Promise
where
    I: IntoIterator<Item = Promise>,
{
    let loc = Loc::caller();
    let list: Vec<Promise> = promises.into_iter().collect();
    let winner = Arc::new(AtomicUsize::new(NO_WINNER));
    let raced = race_at(loc, list.clone(), &winner);
    raced.finally_at(loc, move |_: AnyValue| {
        for (index, promise) in list.iter().enumerate() {
            if index != winner.load(Ordering::SeqCst) {
                promise.resolve_head_any(AnyValue::nothing(), loc);
            }
        }
    })
}

/// Races the inputs, then force-rejects every non-winner.
#[track_caller]
pub fn race_and_reject<I>(promises: I) -> Promise
where
    I: IntoIterator<Item = Promise>,
{
    let loc = Loc::caller();
    let list: Vec<Promise> = promises.into_iter().collect();
    let winner = Arc::new(AtomicUsize::new(NO_WINNER));
    let raced = race_at(loc, list.clone(), &winner);
    raced.finally_at(loc, move |_: AnyValue| {
        for (index, promise) in list.iter().enumerate() {
            if index != winner.load(Ordering::SeqCst) {
                promise.reject_head_any(AnyValue::nothing(), loc);
            }
        }
    })
}

fn race_at(loc: Loc, list: Vec<Promise>, winner: &Arc<AtomicUsize>) -> Promise {
    let winner = Arc::clone(winner);
    new_promise_at(loc, move |defer| {
        for (index, promise) in list.iter().enumerate() {
            let on_resolved = {
                let defer = defer.clone();
                let winner = Arc::clone(&winner);
                move |value: AnyValue| {
                    let _ = winner.compare_exchange(
                        NO_WINNER,
                        index,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    );
                    defer.resolve_any(value.clone(), loc);
                    value
                }
            };
            let on_rejected = {
                let defer = defer.clone();
                let winner = Arc::clone(&winner);
                move |error: AnyValue| {
                    let _ = winner.compare_exchange(
                        NO_WINNER,
                        index,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    );
                    defer.reject_any(error.clone(), loc);
                    error
                }
            };
            promise.then_with(loc, Handler::wrap(on_resolved), Handler::wrap(on_rejected));
        }
    })
}
