//! The holder: the authoritative state of one logical promise identity.
//!
//! A holder stores the settled state and value, the FIFO queue of waiting
//! continuations, weak back-references to every view that currently names it,
//! and the bounded debug trail. Everything mutable sits behind a short-lived
//! data mutex; chain-level mutual exclusion (dispatch ordering, callback
//! re-entry) is the [`ChainLock`]'s job, and no code path holds the data
//! mutex across a user callback or another holder's data mutex.
//!
//! Destruction is where unhandled rejections surface: dropping the last
//! strong reference to a holder that is still rejected hands the stored
//! value to the process-wide sink.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};

use crate::any_value::AnyValue;
use crate::callstack::{CallRecord, CallStack, MAX_CALL_RECORDS};
use crate::promise::ViewCore;
use crate::sink;
use crate::sync::ChainLock;
use crate::task::Task;

/// Settlement state of a holder or a dispatched task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PromiseState {
    Pending,
    Resolved,
    Rejected,
}

pub(crate) struct HolderInner {
    pub(crate) state: PromiseState,
    pub(crate) value: AnyValue,
    pub(crate) pending_tasks: VecDeque<Arc<Task>>,
    pub(crate) owners: Vec<Weak<ViewCore>>,
    pub(crate) call_stack: VecDeque<CallRecord>,
}

impl HolderInner {
    /// Appends a debug record, truncating to the bounded size.
    pub(crate) fn push_record(&mut self, record: CallRecord) {
        self.call_stack.push_back(record);
        while self.call_stack.len() > MAX_CALL_RECORDS {
            self.call_stack.pop_front();
        }
    }
}

/// The unit of identity and storage behind one or more views.
pub(crate) struct Holder {
    pub(crate) chain: ChainLock,
    inner: Mutex<HolderInner>,
}

impl Holder {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            chain: ChainLock::new(),
            inner: Mutex::new(HolderInner {
                state: PromiseState::Pending,
                value: AnyValue::nothing(),
                pending_tasks: VecDeque::new(),
                owners: Vec::new(),
                call_stack: VecDeque::new(),
            }),
        })
    }

    pub(crate) fn lock_inner(&self) -> MutexGuard<'_, HolderInner> {
        self.inner.lock()
    }

    /// Clones the debug trail out of the holder.
    pub(crate) fn snapshot_call_stack(&self) -> CallStack {
        let inner = self.inner.lock();
        CallStack::from_records(inner.call_stack.iter().cloned().collect())
    }
}

impl Drop for Holder {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if inner.state == PromiseState::Rejected {
            let value = std::mem::replace(&mut inner.value, AnyValue::nothing());
            let stack = CallStack::from_records(inner.call_stack.iter().cloned().collect());
            sink::dispatch_uncaught(value, &stack);
        }
    }
}
