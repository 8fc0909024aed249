//! Public promise handles and chain operations.
//!
//! A [`Promise`] is a view: a shared handle naming a holder. Several views
//! may name the same holder once chains have been adopted into one another;
//! the holder keeps weak back-references to its views so that adoption can
//! rewire every view atomically. A [`Defer`] is a view plus a strong
//! reference to the root task of a freshly created promise; the executor
//! settles it exactly once, and later settles are no-ops.
//!
//! Chaining appends a task to the holder's FIFO queue and immediately drives
//! the engine, so continuations attached to an already-settled chain run
//! synchronously on the attaching thread.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::any_value::{AnyValue, PanicPayload};
use crate::callstack::{CallStack, Loc};
use crate::do_while::DeferLoop;
use crate::engine;
use crate::handler::{FromAny, Handler, Step};
use crate::holder::{Holder, PromiseState};
use crate::task::Task;

/// The shared view record behind every [`Promise`] and [`Defer`].
///
/// The view-to-holder pointer is swapped by `join`; readers lock the
/// holder's chain lock and re-validate the pointer, retrying when a join
/// rewired it in between.
pub(crate) struct ViewCore {
    holder: Mutex<Arc<Holder>>,
}

impl ViewCore {
    fn new(holder: &Arc<Holder>) -> Arc<Self> {
        Arc::new(Self {
            holder: Mutex::new(Arc::clone(holder)),
        })
    }

    pub(crate) fn holder(&self) -> Arc<Holder> {
        Arc::clone(&self.holder.lock())
    }

    pub(crate) fn store_holder(&self, holder: &Arc<Holder>) {
        *self.holder.lock() = Arc::clone(holder);
    }

    /// Locks the current holder's chain lock, retrying if a join swapped the
    /// holder between the pointer load and the acquire.
    pub(crate) fn obtain_lock(&self) -> Arc<Holder> {
        loop {
            let holder = self.holder();
            holder.chain.lock();
            if Arc::ptr_eq(&holder, &self.holder()) {
                return holder;
            }
            holder.chain.unlock();
        }
    }
}

/// A handle to a future value that will settle exactly once.
///
/// Cloning shares the view; dropping the last view of a rejected holder
/// fires the uncaught-rejection sink.
#[derive(Clone)]
pub struct Promise {
    core: Arc<ViewCore>,
}

impl std::fmt::Debug for Promise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise").finish_non_exhaustive()
    }
}

/// The settling half of a freshly created promise.
///
/// Handed to the executor of [`new_promise`]; the first call to
/// [`Defer::resolve`] or [`Defer::reject`] settles the chain, every later
/// call is a no-op.
#[derive(Clone)]
pub struct Defer {
    core: Arc<ViewCore>,
    task: Arc<Task>,
}

impl std::fmt::Debug for Defer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Defer").finish_non_exhaustive()
    }
}

impl Promise {
    pub(crate) fn core(&self) -> &Arc<ViewCore> {
        &self.core
    }

    /// Creates a pending holder with a registered view and a pass-through
    /// root task already queued.
    pub(crate) fn new_pending(loc: Loc) -> (Promise, Arc<Task>) {
        let holder = Holder::new();
        let core = ViewCore::new(&holder);
        let root = Task::new(loc, &holder, Handler::PassThrough, Handler::PassThrough);
        {
            let mut inner = holder.lock_inner();
            inner.owners.push(Arc::downgrade(&core));
            inner.pending_tasks.push_back(Arc::clone(&root));
        }
        (Promise { core }, root)
    }

    /// Appends a continuation task and drives the engine.
    pub(crate) fn then_with(&self, loc: Loc, on_resolved: Handler, on_rejected: Handler) -> Promise {
        let task = {
            let holder = self.core.obtain_lock();
            let task = Task::new(loc, &holder, on_resolved, on_rejected);
            holder.lock_inner().pending_tasks.push_back(Arc::clone(&task));
            holder.chain.unlock();
            task
        };
        engine::call(loc, task);
        self.clone()
    }

    /// Appends a continuation for the resolved path.
    ///
    /// The continuation's declared input type is downcast from the chain's
    /// value; declare [`AnyValue`] to accept anything. Its return value is
    /// interpreted by the engine: a [`crate::Step`] is obeyed, a returned
    /// `Promise` is adopted, anything else resolves the chain.
    ///
    /// Returns the same view, positioned at the forward edge of the chain.
    #[track_caller]
    pub fn then<A, R, F>(&self, on_resolved: F) -> Promise
    where
        A: FromAny,
        R: Send + Sync + 'static,
        F: FnOnce(A) -> R + Send + 'static,
    {
        self.then_with(Loc::caller(), Handler::wrap(on_resolved), Handler::Empty)
    }

    /// Appends continuations for both paths.
    #[track_caller]
    pub fn then_or<A, R, F, B, S, G>(&self, on_resolved: F, on_rejected: G) -> Promise
    where
        A: FromAny,
        R: Send + Sync + 'static,
        F: FnOnce(A) -> R + Send + 'static,
        B: FromAny,
        S: Send + Sync + 'static,
        G: FnOnce(B) -> S + Send + 'static,
    {
        self.then_with(
            Loc::caller(),
            Handler::wrap(on_resolved),
            Handler::wrap(on_rejected),
        )
    }

    /// Appends a continuation for the rejected path only.
    ///
    /// A typed handler catches exactly its declared error type; rejections of
    /// any other type pass through to the next rejection handler.
    #[track_caller]
    pub fn fail<B, S, G>(&self, on_rejected: G) -> Promise
    where
        B: FromAny,
        S: Send + Sync + 'static,
        G: FnOnce(B) -> S + Send + 'static,
    {
        self.then_with(Loc::caller(), Handler::Empty, Handler::wrap(on_rejected))
    }

    /// Appends one continuation that runs on either path.
    #[track_caller]
    pub fn always<A, R, F>(&self, handler: F) -> Promise
    where
        A: FromAny,
        R: Send + Sync + 'static,
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        let shared = Arc::new(handler);
        self.then_with(
            Loc::caller(),
            Handler::wrap_shared::<A, R, F>(Arc::clone(&shared)),
            Handler::wrap_shared::<A, R, F>(shared),
        )
    }

    /// Runs `handler` on either path, then restores the upstream value and
    /// state. The handler's return value is discarded, and a declared-type
    /// mismatch or a panic inside it is swallowed.
    #[track_caller]
    pub fn finally<A, R, F>(&self, handler: F) -> Promise
    where
        A: FromAny,
        R: 'static,
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        self.finally_at(Loc::caller(), handler)
    }

    pub(crate) fn finally_at<A, R, F>(&self, loc: Loc, handler: F) -> Promise
    where
        A: FromAny,
        R: 'static,
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        let shared = Arc::new(handler);
        let on_resolved = {
            let shared = Arc::clone(&shared);
            move |value: AnyValue| -> Step {
                let shared = Arc::clone(&shared);
                Step::chain(new_promise_at(loc, move |defer| {
                    run_swallowed(&*shared, value.clone());
                    defer.resolve_any(value, loc);
                }))
            }
        };
        let on_rejected = move |error: AnyValue| -> Step {
            let shared = Arc::clone(&shared);
            Step::chain(new_promise_at(loc, move |defer| {
                run_swallowed(&*shared, error.clone());
                defer.reject_any(error, loc);
            }))
        };
        self.then_with(loc, Handler::wrap(on_resolved), Handler::wrap(on_rejected))
    }

    /// Joins this chain with `other` and drives whatever became dispatchable.
    ///
    /// Continuations waiting on `other` are appended to this chain's queue;
    /// afterwards both views name the same holder.
    #[track_caller]
    pub fn then_promise(&self, other: &Promise) -> Promise {
        let loc = Loc::caller();
        // Same two-lock order as the engine's adoption path: the promise
        // being absorbed first, then our own.
        let right = other.core.obtain_lock();
        let left = self.core.obtain_lock();
        engine::join(&left, &right);
        let head = left.lock_inner().pending_tasks.front().cloned();
        left.chain.unlock();
        right.chain.unlock();
        if let Some(task) = head {
            engine::call(loc, task);
        }
        self.clone()
    }

    /// Forwards this chain's settlement into `defer`'s promise.
    ///
    /// Returns the continuation view; once `defer`'s own chain settles, the
    /// returned view's pending head is rejected, handing control back to the
    /// forwarding chain.
    #[track_caller]
    pub fn then_defer(&self, defer: &Defer) -> Promise {
        let loc = Loc::caller();
        let forward = defer.promise();
        let resolve_to = defer.clone();
        let reject_to = defer.clone();
        let ret = self.then_with(
            loc,
            Handler::wrap(move |value: AnyValue| resolve_to.resolve_any(value, loc)),
            Handler::wrap(move |error: AnyValue| reject_to.reject_any(error, loc)),
        );
        let chained = ret.clone();
        forward.finally_at(loc, move |_: AnyValue| {
            chained.reject_head_any(AnyValue::nothing(), loc);
        });
        ret
    }

    /// Forwards this chain's settlement into a loop body's defer: a resolve
    /// continues the loop, a rejection propagates into it.
    #[track_caller]
    pub fn then_loop(&self, looper: &DeferLoop) -> Promise {
        let loc = Loc::caller();
        let forward = looper.promise();
        let continue_to = looper.clone();
        let reject_to = looper.clone();
        let ret = self.then_with(
            loc,
            Handler::wrap(move |_: AnyValue| continue_to.continue_at(loc)),
            Handler::wrap(move |error: AnyValue| reject_to.reject_any(error, loc)),
        );
        let chained = ret.clone();
        forward.finally_at(loc, move |_: AnyValue| {
            chained.reject_head_any(AnyValue::nothing(), loc);
        });
        ret
    }

    /// Settles the head pending task of this chain resolved with `value`.
    ///
    /// A no-op when the chain has no pending continuation.
    #[track_caller]
    pub fn resolve<T: Send + Sync + 'static>(&self, value: T) {
        self.resolve_head_any(AnyValue::of(value), Loc::caller());
    }

    /// Settles the head pending task of this chain rejected with `error`.
    #[track_caller]
    pub fn reject<T: Send + Sync + 'static>(&self, error: T) {
        self.reject_head_any(AnyValue::of(error), Loc::caller());
    }

    pub(crate) fn resolve_head_any(&self, value: AnyValue, loc: Loc) {
        if let Some(defer) = self.head_defer() {
            defer.resolve_any(value, loc);
        }
    }

    pub(crate) fn reject_head_any(&self, error: AnyValue, loc: Loc) {
        if let Some(defer) = self.head_defer() {
            defer.reject_any(error, loc);
        }
    }

    fn head_defer(&self) -> Option<Defer> {
        let holder = self.core.obtain_lock();
        let head = holder.lock_inner().pending_tasks.front().cloned();
        holder.chain.unlock();
        let task = head?;
        let parent = task.parent()?;
        Some(Defer::from_task(task, &parent))
    }

    /// Snapshot of this chain's debug trail.
    #[must_use]
    pub fn call_stack(&self) -> CallStack {
        self.core.holder().snapshot_call_stack()
    }
}

impl Defer {
    /// Builds a defer for `task`, registering a fresh view on `holder`.
    pub(crate) fn from_task(task: Arc<Task>, holder: &Arc<Holder>) -> Defer {
        let core = ViewCore::new(holder);
        holder.chain.lock();
        holder.lock_inner().owners.push(Arc::downgrade(&core));
        holder.chain.unlock();
        Defer { core, task }
    }

    /// Settles the chain resolved with `value`. No-op if already settled.
    #[track_caller]
    pub fn resolve<T: Send + Sync + 'static>(&self, value: T) {
        self.resolve_any(AnyValue::of(value), Loc::caller());
    }

    /// Settles the chain rejected with `error`. No-op if already settled.
    #[track_caller]
    pub fn reject<T: Send + Sync + 'static>(&self, error: T) {
        self.reject_any(AnyValue::of(error), Loc::caller());
    }

    pub(crate) fn resolve_any(&self, value: AnyValue, loc: Loc) {
        self.settle(PromiseState::Resolved, value, loc);
    }

    pub(crate) fn reject_any(&self, error: AnyValue, loc: Loc) {
        self.settle(PromiseState::Rejected, error, loc);
    }

    fn settle(&self, state: PromiseState, value: AnyValue, loc: Loc) {
        let holder = self.core.obtain_lock();
        if self.task.state() != PromiseState::Pending {
            holder.chain.unlock();
            return;
        }
        {
            let mut inner = holder.lock_inner();
            inner.state = state;
            inner.value = value;
        }
        engine::call(loc, Arc::clone(&self.task));
        holder.chain.unlock();
    }

    /// A promise view onto the chain this defer settles.
    #[must_use]
    pub fn promise(&self) -> Promise {
        Promise {
            core: Arc::clone(&self.core),
        }
    }

    /// Snapshot of the chain's debug trail.
    #[must_use]
    pub fn call_stack(&self) -> CallStack {
        self.promise().call_stack()
    }
}

fn run_swallowed<A, R, F>(handler: &F, value: AnyValue)
where
    A: FromAny,
    F: Fn(A) -> R,
{
    if let Ok(input) = A::from_any(value) {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _ = handler(input);
        }));
    }
}

/// Creates a pending promise and synchronously invokes `executor` with its
/// [`Defer`].
///
/// A panic inside the executor rejects the promise with a
/// [`PanicPayload`].
#[track_caller]
pub fn new_promise<F: FnOnce(Defer)>(executor: F) -> Promise {
    new_promise_at(Loc::caller(), executor)
}

pub(crate) fn new_promise_at<F: FnOnce(Defer)>(loc: Loc, executor: F) -> Promise {
    let (promise, root) = Promise::new_pending(loc);
    let holder = promise.core.holder();
    let defer = Defer::from_task(root, &holder);
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| executor(defer.clone()))) {
        defer.reject_any(AnyValue::of(PanicPayload::from_panic(payload)), loc);
    }
    promise
}

/// A promise already resolved with `value`.
#[track_caller]
pub fn resolved<T: Send + Sync + 'static>(value: T) -> Promise {
    resolved_at(Loc::caller(), AnyValue::of(value))
}

pub(crate) fn resolved_at(loc: Loc, value: AnyValue) -> Promise {
    new_promise_at(loc, move |defer| defer.resolve_any(value, loc))
}

/// A promise already rejected with `error`.
#[track_caller]
pub fn rejected<T: Send + Sync + 'static>(error: T) -> Promise {
    rejected_at(Loc::caller(), AnyValue::of(error))
}

pub(crate) fn rejected_at(loc: Loc, error: AnyValue) -> Promise {
    new_promise_at(loc, move |defer| defer.reject_any(error, loc))
}

/// The debug trail of the chain whose continuation is currently executing on
/// this thread, or an empty snapshot when none is.
#[must_use]
pub fn call_stack() -> CallStack {
    engine::current_call_stack()
}
