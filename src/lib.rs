//! Thenable: JavaScript-style promise chains for synchronous Rust.
//!
//! # Overview
//!
//! Thenable is a library-level realization of the promise abstraction for
//! code that has no task scheduler: a program describes chains and graphs of
//! deferred continuations, and whichever thread settles a promise drives the
//! waiting continuations to completion. There is no thread pool, no reactor,
//! and no I/O here; event sources integrate by calling [`Defer::resolve`] or
//! [`Defer::reject`] from whatever thread they own.
//!
//! # Core Guarantees
//!
//! - **Exactly-once settlement**: the first resolve or reject wins; every
//!   later settle of the same defer is a no-op
//! - **FIFO per chain**: continuations on one chain run in attach order,
//!   even when settles race across threads
//! - **Adoption transparency**: a continuation returning a promise splices
//!   that promise into the chain; downstream continuations see only its
//!   final value
//! - **No lock over user code**: continuations always run with the engine's
//!   locks released
//! - **No silent failures**: a rejected chain dropped without a rejection
//!   handler reports through the process-wide sink
//!
//! # Module Structure
//!
//! - [`any_value`]: type-erased value box flowing through chains
//! - [`handler`]: continuation slots and the [`Step`] control value
//! - [`promise`]: [`Promise`] and [`Defer`] handles and chain operations
//! - [`do_while`]: iteration through the state engine
//! - [`combinator`]: `all`, `race` and the loser-settling race variants
//! - [`callstack`]: source-location trail carried by every chain
//! - [`sink`]: process-wide uncaught-rejection reporting
//!
//! # Example
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use thenable::new_promise;
//!
//! let seen = Arc::new(Mutex::new(0_i32));
//! let slot = Arc::clone(&seen);
//! new_promise(|defer| defer.resolve(42_i32))
//!     .then(|v: i32| v + 1)
//!     .then(|v: i32| v * 2)
//!     .then(move |v: i32| *slot.lock().unwrap() = v);
//!
//! // The executor settled synchronously, so the whole chain has run.
//! assert_eq!(*seen.lock().unwrap(), 86);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]

pub mod any_value;
pub mod callstack;
pub mod combinator;
pub mod do_while;
pub mod handler;
pub mod promise;
pub mod sink;

mod engine;
mod holder;
mod sync;
mod task;

pub use any_value::{AnyValue, CastError, PanicPayload};
pub use callstack::{CallRecord, CallStack, Loc, MAX_CALL_RECORDS};
pub use combinator::{all, race, race_and_reject, race_and_resolve};
pub use do_while::{do_while, DeferLoop};
pub use handler::{FromAny, Step};
pub use promise::{call_stack, new_promise, rejected, resolved, Defer, Promise};
pub use sink::set_uncaught_handler;
