//! The per-holder recursive chain lock.
//!
//! Each holder owns one [`ChainLock`]. The engine drives dispatch with the
//! lock held and may re-enter it on the same thread (`Defer::resolve` holds
//! the lock when it invokes the engine, which locks again). Two operations
//! distinguish this lock from a plain recursive mutex:
//!
//! - [`UnlockGuard`] releases the *entire* recursion depth before a user
//!   continuation runs and restores it afterwards, so continuations never
//!   observe an engine lock.
//! - [`ChainLock::wait_turn`] parks a dispatcher whose task is not yet at
//!   the head of the FIFO queue, releasing the lock while parked. This is
//!   what keeps per-holder dispatch strictly FIFO under concurrent settles.
//!
//! The lock carries no data; holder state lives behind its own short-lived
//! mutex and every engine stage re-validates after re-acquiring.

use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
struct LockState {
    owner: Option<ThreadId>,
    depth: usize,
}

/// A recursive mutual-exclusion lock scoped to one holder.
#[derive(Debug)]
pub(crate) struct ChainLock {
    state: Mutex<LockState>,
    released: Condvar,
    turn: Condvar,
}

impl ChainLock {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(LockState {
                owner: None,
                depth: 0,
            }),
            released: Condvar::new(),
            turn: Condvar::new(),
        }
    }

    /// Acquires the lock, recursively if the caller already holds it.
    pub(crate) fn lock(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.owner == Some(me) {
            state.depth += 1;
            return;
        }
        while state.owner.is_some() {
            self.released.wait(&mut state);
        }
        state.owner = Some(me);
        state.depth = 1;
    }

    /// Releases one level of recursion.
    pub(crate) fn unlock(&self) {
        let mut state = self.state.lock();
        debug_assert_eq!(state.owner, Some(thread::current().id()));
        state.depth = state.depth.saturating_sub(1);
        if state.depth == 0 {
            state.owner = None;
            drop(state);
            self.released.notify_one();
        }
    }

    /// Releases the full recursion depth, returning it for [`Self::lock_many`].
    pub(crate) fn release_all(&self) -> usize {
        let mut state = self.state.lock();
        debug_assert_eq!(state.owner, Some(thread::current().id()));
        let depth = state.depth;
        state.owner = None;
        state.depth = 0;
        drop(state);
        self.released.notify_one();
        depth
    }

    /// Re-acquires the lock at the given recursion depth.
    pub(crate) fn lock_many(&self, depth: usize) {
        if depth == 0 {
            return;
        }
        let me = thread::current().id();
        let mut state = self.state.lock();
        while state.owner.is_some() && state.owner != Some(me) {
            self.released.wait(&mut state);
        }
        state.owner = Some(me);
        state.depth += depth;
    }

    /// Parks the caller until [`Self::notify_turn`], releasing the full
    /// recursion depth while parked and restoring it before returning.
    ///
    /// Wakeups are advisory; callers re-check their condition in a loop.
    pub(crate) fn wait_turn(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        debug_assert_eq!(state.owner, Some(me));
        let depth = state.depth;
        state.owner = None;
        state.depth = 0;
        self.released.notify_one();
        self.turn.wait(&mut state);
        while state.owner.is_some() {
            self.released.wait(&mut state);
        }
        state.owner = Some(me);
        state.depth = depth;
    }

    /// Wakes every dispatcher parked in [`Self::wait_turn`].
    pub(crate) fn notify_turn(&self) {
        self.turn.notify_all();
    }
}

/// Guard that releases a [`ChainLock`] entirely for the duration of a user
/// continuation and restores the saved recursion depth on drop.
pub(crate) struct UnlockGuard<'a> {
    lock: &'a ChainLock,
    depth: usize,
}

impl<'a> UnlockGuard<'a> {
    pub(crate) fn new(lock: &'a ChainLock) -> Self {
        let depth = lock.release_all();
        Self { lock, depth }
    }
}

impl Drop for UnlockGuard<'_> {
    fn drop(&mut self) {
        self.lock.lock_many(self.depth);
    }
}
