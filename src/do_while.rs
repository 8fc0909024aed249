//! Iteration expressed through the state engine.
//!
//! [`do_while`] runs `body` with a [`DeferLoop`]. Each call to
//! [`DeferLoop::continue_`] resolves the iteration's promise, which chains
//! into a fresh invocation of the body; [`DeferLoop::break_`] rejects it with
//! a private sentinel carrying the break value, which the outer chain
//! translates back into a resolution; [`DeferLoop::reject`] rejects the loop
//! outright. Every iteration runs on a fresh promise, so the loop advances
//! through the engine rather than through unbounded mutual recursion on one
//! holder.

use std::sync::Arc;

use crate::any_value::AnyValue;
use crate::callstack::{CallStack, Loc};
use crate::handler::{Handler, Step, StepKind};
use crate::promise::{new_promise_at, Defer, Promise};

/// The sentinel a breaking iteration rejects with. Recognized only by the
/// loop's own rejection handler and never observable from user code.
#[derive(Clone)]
pub(crate) struct BreakSignal {
    value: AnyValue,
}

/// The settling handle passed to a loop body.
#[derive(Clone)]
pub struct DeferLoop {
    defer: Defer,
}

impl std::fmt::Debug for DeferLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferLoop").finish_non_exhaustive()
    }
}

impl DeferLoop {
    pub(crate) fn new(defer: Defer) -> Self {
        Self { defer }
    }

    /// Schedules the next iteration of the loop body.
    #[track_caller]
    pub fn continue_(&self) {
        self.continue_at(Loc::caller());
    }

    pub(crate) fn continue_at(&self, loc: Loc) {
        self.defer.resolve_any(AnyValue::nothing(), loc);
    }

    /// Terminates the loop; the loop's promise resolves with `value`.
    #[track_caller]
    pub fn break_<T: Send + Sync + 'static>(&self, value: T) {
        self.defer.reject_any(
            AnyValue::of(BreakSignal {
                value: AnyValue::of(value),
            }),
            Loc::caller(),
        );
    }

    /// Rejects the loop's promise with `error`.
    #[track_caller]
    pub fn reject<T: Send + Sync + 'static>(&self, error: T) {
        self.reject_any(AnyValue::of(error), Loc::caller());
    }

    pub(crate) fn reject_any(&self, error: AnyValue, loc: Loc) {
        self.defer.reject_any(error, loc);
    }

    /// A promise view onto the current iteration.
    #[must_use]
    pub fn promise(&self) -> Promise {
        self.defer.promise()
    }

    /// Snapshot of the iteration's debug trail.
    #[must_use]
    pub fn call_stack(&self) -> CallStack {
        self.defer.call_stack()
    }
}

/// Runs `body` repeatedly until it breaks or rejects.
///
/// The returned promise resolves with the value passed to
/// [`DeferLoop::break_`] or rejects with the error passed to
/// [`DeferLoop::reject`] (or produced by a panicking body).
#[track_caller]
pub fn do_while<F>(body: F) -> Promise
where
    F: Fn(DeferLoop) + Send + Sync + 'static,
{
    do_while_at(Loc::caller(), Arc::new(body))
}

pub(crate) fn do_while_at(loc: Loc, body: Arc<dyn Fn(DeferLoop) + Send + Sync>) -> Promise {
    let run = Arc::clone(&body);
    let iteration = new_promise_at(loc, move |defer| run(DeferLoop::new(defer)));
    iteration.then_with(
        loc,
        Handler::wrap(move |_: AnyValue| Step::chain(do_while_at(loc, body))),
        Handler::wrap(move |error: AnyValue| match error.cast::<BreakSignal>() {
            Ok(signal) => Step {
                kind: StepKind::Value(signal.value),
            },
            Err(_) => Step {
                kind: StepKind::Reject(error),
            },
        }),
    )
}
