//! The process-wide uncaught-rejection sink.
//!
//! When the last view of a rejected holder is dropped without any rejection
//! continuation having consumed the failure, the stored value is handed to
//! the sink. The sink is replaceable and defaults to logging the unwrapped
//! payload. A thread-local guard suppresses re-entry: holders dropped while
//! the sink itself runs do not fire it again, so a sink that schedules
//! promise work cannot recurse into itself.

use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::any_value::{AnyValue, CastError, PanicPayload};
use crate::callstack::CallStack;

type Sink = dyn Fn(AnyValue) + Send + Sync;

static UNCAUGHT: RwLock<Option<Arc<Sink>>> = RwLock::new(None);

thread_local! {
    static IN_SINK: Cell<bool> = const { Cell::new(false) };
}

/// Installs the process-wide uncaught-rejection handler.
///
/// The handler receives the rejection payload of every rejected holder that
/// is destroyed without its rejection being consumed. It runs on whatever
/// thread drops the last reference, may inspect the payload with
/// [`AnyValue::cast`], and may schedule new promise work.
pub fn set_uncaught_handler<F>(handler: F)
where
    F: Fn(AnyValue) + Send + Sync + 'static,
{
    *UNCAUGHT.write() = Some(Arc::new(handler));
}

/// Renders a rejection payload for logging, unwrapping the error markers the
/// engine itself produces.
#[must_use]
pub fn describe(value: &AnyValue) -> String {
    if let Some(panic) = value.downcast_ref::<PanicPayload>() {
        return panic.to_string();
    }
    if let Some(cast) = value.downcast_ref::<CastError>() {
        return cast.to_string();
    }
    if let Some(message) = value.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = value.downcast_ref::<String>() {
        return message.clone();
    }
    format!("value of type {}", value.type_name())
}

struct ReentryGuard;

impl Drop for ReentryGuard {
    fn drop(&mut self) {
        IN_SINK.with(|flag| flag.set(false));
    }
}

pub(crate) fn dispatch_uncaught(value: AnyValue, stack: &CallStack) {
    if IN_SINK.with(Cell::get) {
        return;
    }
    IN_SINK.with(|flag| flag.set(true));
    let _guard = ReentryGuard;

    if !stack.is_empty() {
        tracing::debug!(trail = %stack, "rejected holder destroyed");
    }

    let installed = UNCAUGHT.read().clone();
    match installed {
        Some(sink) => {
            if catch_unwind(AssertUnwindSafe(|| sink(value))).is_err() {
                tracing::error!("uncaught-rejection handler panicked");
            }
        }
        None => {
            tracing::error!(payload = %describe(&value), "uncaught promise rejection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_unwraps_markers() {
        assert_eq!(
            describe(&AnyValue::of(PanicPayload::new("boom"))),
            "panic: boom"
        );
        assert_eq!(describe(&AnyValue::of("plain")), "plain");
        assert_eq!(describe(&AnyValue::of(String::from("owned"))), "owned");
        assert!(describe(&AnyValue::of(12_u16)).contains("u16"));
    }
}
