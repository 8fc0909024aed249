//! The chaining engine: single-task dispatch and promise adoption.
//!
//! [`call`] advances a chain one task at a time. Each iteration locks the
//! task's holder, waits for the task to reach the head of the FIFO queue,
//! dispatches the matching handler with the lock fully released, applies the
//! outcome, and then walks to the next queued task, following the holder the
//! chain may have been adopted into.
//!
//! [`join`] merges two holders when a continuation returns a promise: the
//! waiting tasks of the old holder migrate to the adopted one, every view of
//! the old holder is rewired, and the old holder is emptied and marked
//! resolved so its destruction stays silent.

use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::any_value::{AnyValue, PanicPayload};
use crate::callstack::{CallRecord, CallStack, Loc, MAX_CALL_RECORDS};
use crate::handler::{Fired, Handler, StepKind};
use crate::holder::{Holder, PromiseState};
use crate::promise::Promise;
use crate::sync::UnlockGuard;
use crate::task::Task;

thread_local! {
    /// Holders whose continuations are executing on this thread, innermost
    /// last. Gives `call_stack()` something to answer with while the engine
    /// has its locks released.
    static CURRENT_HOLDERS: RefCell<Vec<Arc<Holder>>> = const { RefCell::new(Vec::new()) };
}

/// Debug trail of the innermost chain currently dispatching on this thread.
pub(crate) fn current_call_stack() -> CallStack {
    CURRENT_HOLDERS.with(|stack| {
        stack
            .borrow()
            .last()
            .map(|holder| holder.snapshot_call_stack())
            .unwrap_or_default()
    })
}

/// What a handler produced, normalized for the engine.
enum HandlerOutcome {
    /// Plain value; the holder resolves with it.
    Value(AnyValue),
    /// Explicit rejection via [`crate::Step::reject`].
    Reject(AnyValue),
    /// The declared input type did not match the stored payload.
    InputMismatch(crate::any_value::CastError),
    /// The handler panicked.
    Panicked(PanicPayload),
    /// The handler returned a promise; its holder arrives chain-locked.
    Adopt(Arc<Holder>),
}

/// Result of one dispatch attempt.
enum Stage {
    /// Nothing further to do for this task.
    Finished,
    /// The task was migrated to another holder mid-wait; re-derive and retry.
    Restart,
    /// Dispatch happened; continue with the queue of this holder.
    Continue(Arc<Holder>),
}

/// Drives the chain starting at `task` until the queue empties or the head
/// must wait for an unsettled holder.
pub(crate) fn call(loc: Loc, task: Arc<Task>) {
    let mut task = task;
    loop {
        let Some(holder) = task.parent() else { return };
        holder.chain.lock();
        let stage = dispatch_one(loc, &holder, &task);
        holder.chain.unlock();
        match stage {
            Stage::Finished => return,
            Stage::Restart => {}
            Stage::Continue(next) => {
                next.chain.lock();
                let head = next.lock_inner().pending_tasks.front().cloned();
                next.chain.unlock();
                match head {
                    Some(head) => task = head,
                    None => return,
                }
            }
        }
    }
}

/// One engine iteration. The chain lock of `holder` is held on entry and on
/// exit; a returned [`Stage::Continue`] holder is handed back unlocked.
fn dispatch_one(loc: Loc, holder: &Arc<Holder>, task: &Arc<Task>) -> Stage {
    let settled;
    let handler;
    let value;
    {
        let mut inner = holder.lock_inner();
        if task.state() != PromiseState::Pending {
            return Stage::Finished;
        }
        if inner.state == PromiseState::Pending {
            // Not settled yet; the task stays queued and a future
            // resolve/reject re-enters here.
            return Stage::Finished;
        }

        // FIFO: only the head task may dispatch. Another thread may be about
        // to dispatch a predecessor; park until the head changes.
        loop {
            match inner.pending_tasks.front() {
                Some(front) if Arc::ptr_eq(front, task) => break,
                _ => {
                    drop(inner);
                    match task.parent() {
                        Some(parent) if Arc::ptr_eq(&parent, holder) => {}
                        Some(_) => return Stage::Restart,
                        None => return Stage::Finished,
                    }
                    if task.state() != PromiseState::Pending {
                        return Stage::Finished;
                    }
                    holder.chain.wait_turn();
                    inner = holder.lock_inner();
                    if inner.state == PromiseState::Pending {
                        // A predecessor's continuation is running; its
                        // dispatcher will walk the queue onward.
                        return Stage::Finished;
                    }
                }
            }
        }
        inner.pending_tasks.pop_front();
        holder.chain.notify_turn();

        inner.push_record(CallRecord::new(loc));
        inner.push_record(CallRecord::new(task.loc()));

        settled = inner.state;
        task.set_state(settled);
        handler = task.take_handler(settled);
        if handler.is_inert() {
            // Pass through: value and state travel to the next task as-is.
            return Stage::Continue(Arc::clone(holder));
        }
        // Block recursive settles from the continuation we are about to run.
        inner.state = PromiseState::Pending;
        value = inner.value.clone();
    }

    let Handler::Run(run) = handler else {
        unreachable!("inert handlers returned above");
    };
    let outcome = run_handler(holder, run, value);
    Stage::Continue(apply_outcome(holder, settled, outcome))
}

/// Invokes a continuation with the chain lock fully released, catching
/// panics and normalizing the result.
fn run_handler(
    holder: &Arc<Holder>,
    run: Box<dyn FnOnce(AnyValue) -> Fired + Send>,
    value: AnyValue,
) -> HandlerOutcome {
    let unlocked = UnlockGuard::new(&holder.chain);
    CURRENT_HOLDERS.with(|stack| stack.borrow_mut().push(Arc::clone(holder)));
    let fired = catch_unwind(AssertUnwindSafe(move || run(value)));
    CURRENT_HOLDERS.with(|stack| {
        stack.borrow_mut().pop();
    });
    // Interpretation happens before `unlocked` drops so that an adopted
    // promise's chain lock is taken ahead of re-acquiring our own, matching
    // the two-lock order used everywhere else.
    let outcome = match fired {
        Err(payload) => HandlerOutcome::Panicked(PanicPayload::from_panic(payload)),
        Ok(Fired::InputMismatch(cast)) => HandlerOutcome::InputMismatch(cast),
        Ok(Fired::Returned(returned)) => interpret_return(returned),
    };
    drop(unlocked);
    outcome
}

/// Runtime interpretation of a continuation's boxed return value.
fn interpret_return(returned: AnyValue) -> HandlerOutcome {
    if let Some(step) = returned.downcast_ref::<crate::handler::Step>() {
        return match step.kind.clone() {
            StepKind::Value(value) => HandlerOutcome::Value(value),
            StepKind::Reject(error) => HandlerOutcome::Reject(error),
            StepKind::Chain(promise) => HandlerOutcome::Adopt(promise.core().obtain_lock()),
        };
    }
    if let Some(promise) = returned.downcast_ref::<Promise>() {
        return HandlerOutcome::Adopt(promise.core().obtain_lock());
    }
    HandlerOutcome::Value(returned)
}

/// Applies a handler outcome to the holder, returning the holder the chain
/// continues on.
fn apply_outcome(
    holder: &Arc<Holder>,
    path: PromiseState,
    outcome: HandlerOutcome,
) -> Arc<Holder> {
    match outcome {
        HandlerOutcome::Value(value) => {
            let mut inner = holder.lock_inner();
            inner.value = value;
            inner.state = PromiseState::Resolved;
            Arc::clone(holder)
        }
        HandlerOutcome::Reject(error) => {
            let mut inner = holder.lock_inner();
            inner.value = error;
            inner.state = PromiseState::Rejected;
            Arc::clone(holder)
        }
        HandlerOutcome::Panicked(payload) => {
            let mut inner = holder.lock_inner();
            inner.value = AnyValue::of(payload);
            inner.state = PromiseState::Rejected;
            Arc::clone(holder)
        }
        HandlerOutcome::InputMismatch(cast) => {
            let mut inner = holder.lock_inner();
            if path == PromiseState::Resolved {
                tracing::warn!(cast = %cast, "resolved continuation input type mismatch");
                inner.value = AnyValue::of(cast);
            }
            // Rejected path keeps the original error: typed failure handlers
            // only catch their declared type.
            inner.state = PromiseState::Rejected;
            Arc::clone(holder)
        }
        HandlerOutcome::Adopt(adopted) => {
            join(&adopted, holder);
            adopted.chain.unlock();
            adopted
        }
    }
}

/// Merges `right` into `left`: continuations waiting on `right` now wait on
/// `left`. Both chain locks must be held by the caller.
pub(crate) fn join(left: &Arc<Holder>, right: &Arc<Holder>) {
    if Arc::ptr_eq(left, right) {
        return;
    }
    healthy_check(left);
    healthy_check(right);

    let (tasks, owners, trail) = {
        let mut inner = right.lock_inner();
        let tasks: Vec<Arc<Task>> = inner.pending_tasks.drain(..).collect();
        let owners = std::mem::take(&mut inner.owners);
        let trail = std::mem::take(&mut inner.call_stack);
        // A joined holder must not report an uncaught rejection when it dies.
        inner.state = PromiseState::Resolved;
        inner.value = AnyValue::nothing();
        (tasks, owners, trail)
    };

    for task in &tasks {
        task.set_parent(left);
    }
    {
        let mut inner = left.lock_inner();
        for record in trail.into_iter().rev() {
            inner.call_stack.push_front(record);
        }
        while inner.call_stack.len() > MAX_CALL_RECORDS {
            inner.call_stack.pop_front();
        }
        inner.pending_tasks.extend(tasks);
    }

    let live: Vec<_> = owners.iter().filter_map(std::sync::Weak::upgrade).collect();
    if live.len() > 100 {
        tracing::warn!(
            owners = live.len(),
            "possible promise leak: join is migrating an unusual number of owners"
        );
    }
    for owner in live {
        let held = owner.obtain_lock();
        owner.store_holder(left);
        left.lock_inner().owners.push(Arc::downgrade(&owner));
        held.chain.unlock();
    }

    right.chain.notify_turn();
    left.chain.notify_turn();
    healthy_check(left);
    healthy_check(right);
}

/// Debug-build structural invariant check: every live owner points back at
/// the holder, every queued task is pending and parented here.
#[cfg(debug_assertions)]
fn healthy_check(holder: &Arc<Holder>) {
    let inner = holder.lock_inner();
    for owner in &inner.owners {
        if let Some(owner) = owner.upgrade() {
            debug_assert!(
                Arc::ptr_eq(&owner.holder(), holder),
                "owner view names a different holder"
            );
        }
    }
    for task in &inner.pending_tasks {
        debug_assert_eq!(
            task.state(),
            PromiseState::Pending,
            "settled task left in pending queue"
        );
        debug_assert!(
            task.parent().is_some_and(|parent| Arc::ptr_eq(&parent, holder)),
            "queued task parented elsewhere"
        );
    }
}

#[cfg(not(debug_assertions))]
fn healthy_check(_holder: &Arc<Holder>) {}
