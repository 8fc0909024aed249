//! Dynamic value box: the type-erased container that flows through a chain.
//!
//! Continuations form a heterogeneously-typed chain whose element types are
//! only known at the call site of each link. `AnyValue` is the boundary
//! currency between links: a cloneable, thread-safe box carrying a payload of
//! arbitrary declared type, with an exact-type downcast and a distinguished
//! *nothing* state.
//!
//! Casting is strict: `cast::<T>()` succeeds only when the stored payload is
//! exactly `T`. The single exception is `T == AnyValue`, which always
//! succeeds and hands back the box itself; this is what lets a continuation
//! accept "whatever the chain carries" without committing to a type.
//!
//! Panics captured at the engine boundary travel through the chain as a
//! [`PanicPayload`], an opaque error marker holding the panic message.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Error produced when a downcast requests a type other than the stored one.
///
/// On the resolved path the engine converts this into a rejection; on the
/// rejected path it is treated as pass-through so that typed failure handlers
/// only catch their declared error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("bad value cast: stored `{from}`, requested `{to}`")]
pub struct CastError {
    /// Type name of the payload actually stored in the box.
    pub from: &'static str,
    /// Type name the caller asked for.
    pub to: &'static str,
}

/// A cloneable, type-erased value container.
///
/// Cloning is cheap (the payload is shared behind an `Arc`); extracting a
/// payload with [`AnyValue::cast`] clones the payload itself.
#[derive(Clone, Default)]
pub struct AnyValue {
    payload: Option<Arc<dyn Any + Send + Sync>>,
    name: &'static str,
}

impl AnyValue {
    /// The distinguished empty box.
    #[must_use]
    pub fn nothing() -> Self {
        Self {
            payload: None,
            name: "",
        }
    }

    /// Boxes a value.
    ///
    /// Two inputs are normalized rather than stored: an `AnyValue` argument
    /// is absorbed (never nested), and the unit value maps to
    /// [`AnyValue::nothing`], mirroring a continuation that returns no value.
    #[must_use]
    pub fn of<T: Send + Sync + 'static>(value: T) -> Self {
        if TypeId::of::<T>() == TypeId::of::<()>() {
            return Self::nothing();
        }
        let boxed: Box<dyn Any + Send + Sync> = Box::new(value);
        match boxed.downcast::<AnyValue>() {
            Ok(absorbed) => *absorbed,
            Err(other) => Self {
                payload: Some(Arc::from(other)),
                name: std::any::type_name::<T>(),
            },
        }
    }

    /// Returns true if the box is empty.
    #[must_use]
    pub fn is_nothing(&self) -> bool {
        self.payload.is_none()
    }

    /// The `TypeId` of the stored payload, or `None` for an empty box.
    #[must_use]
    pub fn type_id(&self) -> Option<TypeId> {
        self.payload.as_ref().map(|p| (**p).type_id())
    }

    /// Human-readable name of the stored type; `"(nothing)"` when empty.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        if self.payload.is_some() {
            self.name
        } else {
            "(nothing)"
        }
    }

    /// Returns true if the stored payload is exactly `T`.
    #[must_use]
    pub fn holds<T: 'static>(&self) -> bool {
        self.type_id() == Some(TypeId::of::<T>())
    }

    /// Borrows the payload as `T`, or `None` on type mismatch or empty box.
    #[must_use]
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.payload.as_deref().and_then(|p| p.downcast_ref::<T>())
    }

    /// Clones the payload out as `T`.
    ///
    /// Fails with [`CastError`] unless the stored type is exactly `T`.
    /// Requesting `AnyValue` itself always succeeds and returns the box.
    pub fn cast<T: Clone + Send + Sync + 'static>(&self) -> Result<T, CastError> {
        if TypeId::of::<T>() == TypeId::of::<AnyValue>() {
            let identity: Box<dyn Any> = Box::new(self.clone());
            let identity = identity
                .downcast::<T>()
                .expect("TypeId matched AnyValue exactly");
            return Ok(*identity);
        }
        self.downcast_ref::<T>().cloned().ok_or(CastError {
            from: self.type_name(),
            to: std::any::type_name::<T>(),
        })
    }
}

impl fmt::Debug for AnyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AnyValue({})", self.type_name())
    }
}

/// Payload from a panic caught at the engine boundary.
///
/// Wraps the panic value for transport through the rejection path of a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanicPayload {
    message: String,
}

impl PanicPayload {
    /// Creates a payload with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Extracts a payload from the boxed value of a caught panic.
    #[must_use]
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        if let Some(s) = payload.downcast_ref::<&'static str>() {
            return Self::new(*s);
        }
        if let Some(s) = payload.downcast_ref::<String>() {
            return Self::new(s.clone());
        }
        Self::new("opaque panic payload")
    }

    /// Returns the panic message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "panic: {}", self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boxed_value_round_trips() {
        let v = AnyValue::of(42_i32);
        assert!(v.holds::<i32>());
        assert_eq!(v.cast::<i32>().unwrap(), 42);
    }

    #[test]
    fn cast_is_exact() {
        let v = AnyValue::of(42_i32);
        let err = v.cast::<i64>().unwrap_err();
        assert_eq!(err.from, "i32");
        assert!(err.to.contains("i64"));
    }

    #[test]
    fn cast_to_any_value_is_identity() {
        let v = AnyValue::of("payload");
        let w = v.cast::<AnyValue>().unwrap();
        assert_eq!(w.cast::<&str>().unwrap(), "payload");
    }

    #[test]
    fn nothing_has_no_type() {
        let v = AnyValue::nothing();
        assert!(v.is_nothing());
        assert_eq!(v.type_id(), None);
        assert_eq!(v.type_name(), "(nothing)");
        assert!(v.cast::<i32>().is_err());
    }

    #[test]
    fn any_value_is_absorbed_not_nested() {
        let inner = AnyValue::of(7_u8);
        let outer = AnyValue::of(inner);
        assert!(outer.holds::<u8>());
    }

    #[test]
    fn unit_maps_to_nothing() {
        assert!(AnyValue::of(()).is_nothing());
    }

    #[test]
    fn clone_shares_payload() {
        let v = AnyValue::of(String::from("shared"));
        let w = v.clone();
        assert_eq!(w.cast::<String>().unwrap(), "shared");
        assert_eq!(v.cast::<String>().unwrap(), "shared");
    }

    #[test]
    fn panic_payload_from_str_and_string() {
        let p = PanicPayload::from_panic(Box::new("boom"));
        assert_eq!(p.message(), "boom");
        let p = PanicPayload::from_panic(Box::new(String::from("bang")));
        assert_eq!(p.message(), "bang");
        let p = PanicPayload::from_panic(Box::new(17_u64));
        assert_eq!(p.message(), "opaque panic payload");
    }
}
