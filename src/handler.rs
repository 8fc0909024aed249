//! Continuation storage and the values a continuation may hand back.
//!
//! A task carries two handler slots, one per settlement path. A slot is
//! either *empty* (nothing registered), an explicit *pass-through* marker, or
//! a boxed closure. Typed closures are wrapped at registration time: the
//! wrapper downcasts the incoming value box to the declared input type and
//! boxes the closure's output, reporting a declared-type mismatch without
//! running the closure.
//!
//! A continuation's return value is interpreted at runtime by the engine:
//! a [`Step`] is obeyed directly, a returned [`Promise`] is adopted, and any
//! other value resolves the chain with that value.

use std::sync::Arc;

use crate::any_value::{AnyValue, CastError};
use crate::promise::Promise;

/// Conversion from the chain's value box to a continuation's input type.
///
/// Implemented for every `T: Clone + Send + Sync + 'static` via exact-type
/// downcast; taking [`AnyValue`] itself always succeeds and receives the box
/// as-is.
pub trait FromAny: Sized {
    /// Extracts `Self` from the value box.
    ///
    /// # Errors
    ///
    /// Returns [`CastError`] when the stored payload is not `Self`.
    fn from_any(value: AnyValue) -> Result<Self, CastError>;
}

impl<T: Clone + Send + Sync + 'static> FromAny for T {
    fn from_any(value: AnyValue) -> Result<T, CastError> {
        value.cast::<T>()
    }
}

/// Explicit control value a continuation may return.
///
/// Most continuations just return a plain value. `Step` is for the cases
/// where the continuation needs to choose a path at runtime: settle with a
/// value, chain into another promise, or reject.
#[derive(Clone)]
#[must_use]
pub struct Step {
    pub(crate) kind: StepKind,
}

#[derive(Clone)]
pub(crate) enum StepKind {
    Value(AnyValue),
    Chain(Promise),
    Reject(AnyValue),
}

impl Step {
    /// Settle the chain resolved with `value`.
    pub fn value<T: Send + Sync + 'static>(value: T) -> Self {
        Self {
            kind: StepKind::Value(AnyValue::of(value)),
        }
    }

    /// Settle the chain resolved with no value.
    pub fn nothing() -> Self {
        Self {
            kind: StepKind::Value(AnyValue::nothing()),
        }
    }

    /// Adopt `promise`: the chain settles however `promise` settles.
    pub fn chain(promise: Promise) -> Self {
        Self {
            kind: StepKind::Chain(promise),
        }
    }

    /// Settle the chain rejected with `error`.
    pub fn reject<T: Send + Sync + 'static>(error: T) -> Self {
        Self {
            kind: StepKind::Reject(AnyValue::of(error)),
        }
    }
}

impl From<Promise> for Step {
    fn from(promise: Promise) -> Self {
        Self::chain(promise)
    }
}

/// Result of invoking a handler closure.
pub(crate) enum Fired {
    /// The closure ran; its boxed return value awaits engine interpretation.
    Returned(AnyValue),
    /// The declared input type did not match the stored payload; the closure
    /// did not run.
    InputMismatch(CastError),
}

type HandlerFn = Box<dyn FnOnce(AnyValue) -> Fired + Send>;

/// One handler slot on a task.
pub(crate) enum Handler {
    /// Nothing registered for this path.
    Empty,
    /// Explicit pass-through marker; behaves like [`Handler::Empty`].
    PassThrough,
    /// A registered continuation.
    Run(HandlerFn),
}

impl Handler {
    /// Wraps a typed one-shot closure.
    pub(crate) fn wrap<A, R, F>(f: F) -> Self
    where
        A: FromAny,
        R: Send + Sync + 'static,
        F: FnOnce(A) -> R + Send + 'static,
    {
        Handler::Run(Box::new(move |value| match A::from_any(value) {
            Ok(input) => Fired::Returned(AnyValue::of(f(input))),
            Err(cast) => Fired::InputMismatch(cast),
        }))
    }

    /// Wraps a shared closure; used when one closure fills both slots.
    pub(crate) fn wrap_shared<A, R, F>(f: Arc<F>) -> Self
    where
        A: FromAny,
        R: Send + Sync + 'static,
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        Handler::Run(Box::new(move |value| match A::from_any(value) {
            Ok(input) => Fired::Returned(AnyValue::of(f(input))),
            Err(cast) => Fired::InputMismatch(cast),
        }))
    }

    /// Returns true for the two do-nothing variants.
    pub(crate) fn is_inert(&self) -> bool {
        matches!(self, Handler::Empty | Handler::PassThrough)
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Handler::Empty => write!(f, "Handler::Empty"),
            Handler::PassThrough => write!(f, "Handler::PassThrough"),
            Handler::Run(_) => write!(f, "Handler::Run(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_downcasts_and_boxes() {
        let handler = Handler::wrap(|v: i32| v + 1);
        let Handler::Run(f) = handler else {
            panic!("expected a closure slot");
        };
        match f(AnyValue::of(41_i32)) {
            Fired::Returned(v) => assert_eq!(v.cast::<i32>().unwrap(), 42),
            Fired::InputMismatch(_) => panic!("types matched"),
        }
    }

    #[test]
    fn wrap_reports_mismatch_without_running() {
        let handler = Handler::wrap(|v: i32| v + 1);
        let Handler::Run(f) = handler else {
            panic!("expected a closure slot");
        };
        match f(AnyValue::of("not an i32")) {
            Fired::Returned(_) => panic!("closure must not run"),
            Fired::InputMismatch(cast) => assert!(cast.to.contains("i32")),
        }
    }

    #[test]
    fn any_value_input_always_matches() {
        let handler = Handler::wrap(|v: AnyValue| v.type_name());
        let Handler::Run(f) = handler else {
            panic!("expected a closure slot");
        };
        match f(AnyValue::of(3.5_f64)) {
            Fired::Returned(v) => assert_eq!(v.cast::<&str>().unwrap(), "f64"),
            Fired::InputMismatch(_) => panic!("AnyValue input never mismatches"),
        }
    }

    #[test]
    fn inert_variants() {
        assert!(Handler::Empty.is_inert());
        assert!(Handler::PassThrough.is_inert());
        assert!(!Handler::wrap(|_: AnyValue| ()).is_inert());
    }
}
