//! Wait for every input to resolve.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::any_value::AnyValue;
use crate::callstack::Loc;
use crate::handler::Handler;
use crate::promise::{new_promise_at, resolved_at, Promise};

struct AllState {
    results: Vec<AnyValue>,
    finished: usize,
}

/// Resolves once every input has resolved, with a `Vec<AnyValue>` aggregate
/// indexed in input order regardless of completion order. The first input
/// rejection rejects the output with that error; later settles of other
/// inputs are ignored.
///
/// An empty input list resolves immediately with an empty aggregate.
#[track_caller]
pub fn all<I>(promises: I) -> Promise
where
    I: IntoIterator<Item = Promise>,
{
    let loc = Loc::caller();
    let list: Vec<Promise> = promises.into_iter().collect();
    if list.is_empty() {
        return resolved_at(loc, AnyValue::of(Vec::<AnyValue>::new()));
    }

    let size = list.len();
    new_promise_at(loc, move |defer| {
        let state = Arc::new(Mutex::new(AllState {
            results: vec![AnyValue::nothing(); size],
            finished: 0,
        }));
        for (index, promise) in list.iter().enumerate() {
            let on_resolved = {
                let defer = defer.clone();
                let state = Arc::clone(&state);
                move |value: AnyValue| {
                    let aggregate = {
                        let mut state = state.lock();
                        state.results[index] = value;
                        state.finished += 1;
                        (state.finished == size).then(|| state.results.clone())
                    };
                    if let Some(aggregate) = aggregate {
                        defer.resolve_any(AnyValue::of(aggregate), loc);
                    }
                }
            };
            let on_rejected = {
                let defer = defer.clone();
                move |error: AnyValue| defer.reject_any(error, loc)
            };
            promise.then_with(loc, Handler::wrap(on_resolved), Handler::wrap(on_rejected));
        }
    })
}
