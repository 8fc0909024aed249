//! The continuation node queued on a holder.
//!
//! A task records how its own dispatch completed (mirroring the holder's
//! state at dispatch time), a weak back-reference to the holder that will
//! fire it, and the two handler slots. The back-reference is weak so that a
//! chain never keeps itself alive; the holder's queue owns the task, not the
//! other way round.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::callstack::Loc;
use crate::handler::Handler;
use crate::holder::{Holder, PromiseState};

struct TaskInner {
    state: PromiseState,
    parent: Weak<Holder>,
    on_resolved: Handler,
    on_rejected: Handler,
}

/// One continuation node.
pub(crate) struct Task {
    loc: Loc,
    inner: Mutex<TaskInner>,
}

impl Task {
    pub(crate) fn new(
        loc: Loc,
        parent: &Arc<Holder>,
        on_resolved: Handler,
        on_rejected: Handler,
    ) -> Arc<Self> {
        Arc::new(Self {
            loc,
            inner: Mutex::new(TaskInner {
                state: PromiseState::Pending,
                parent: Arc::downgrade(parent),
                on_resolved,
                on_rejected,
            }),
        })
    }

    /// The call site that registered this continuation.
    pub(crate) fn loc(&self) -> Loc {
        self.loc
    }

    /// How this task's own dispatch completed.
    pub(crate) fn state(&self) -> PromiseState {
        self.inner.lock().state
    }

    pub(crate) fn set_state(&self, state: PromiseState) {
        self.inner.lock().state = state;
    }

    /// Resolves the weak back-reference to the holder that will fire this task.
    pub(crate) fn parent(&self) -> Option<Arc<Holder>> {
        self.inner.lock().parent.upgrade()
    }

    /// Rewires the back-reference after a join migrates the task.
    pub(crate) fn set_parent(&self, parent: &Arc<Holder>) {
        self.inner.lock().parent = Arc::downgrade(parent);
    }

    /// Takes the handler for the given settlement path and clears both slots,
    /// breaking any reference cycles the closures may have captured.
    pub(crate) fn take_handler(&self, state: PromiseState) -> Handler {
        let mut inner = self.inner.lock();
        let on_resolved = std::mem::replace(&mut inner.on_resolved, Handler::Empty);
        let on_rejected = std::mem::replace(&mut inner.on_rejected, Handler::Empty);
        match state {
            PromiseState::Resolved => on_resolved,
            PromiseState::Rejected => on_rejected,
            PromiseState::Pending => Handler::Empty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_link_is_weak() {
        let holder = Holder::new();
        let task = Task::new(Loc::caller(), &holder, Handler::Empty, Handler::Empty);
        assert!(task.parent().is_some());
        drop(holder);
        assert!(task.parent().is_none());
    }

    #[test]
    fn take_handler_clears_both_slots() {
        let holder = Holder::new();
        let task = Task::new(
            Loc::caller(),
            &holder,
            Handler::wrap(|v: i32| v),
            Handler::wrap(|v: i32| v),
        );
        let taken = task.take_handler(PromiseState::Resolved);
        assert!(!taken.is_inert());
        assert!(task.take_handler(PromiseState::Resolved).is_inert());
        assert!(task.take_handler(PromiseState::Rejected).is_inert());
    }
}
