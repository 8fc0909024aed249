//! Source-location records and the bounded per-holder debug trail.
//!
//! Every public operation captures its caller's `(file, line)` pair via
//! `#[track_caller]`. The engine appends a record for the driving call and
//! one for the dispatched continuation on every dispatch, so a settled chain
//! carries a short history of where it has been. The trail is bounded to the
//! most recent [`MAX_CALL_RECORDS`] entries.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Maximum number of [`CallRecord`] entries retained per holder.
pub const MAX_CALL_RECORDS: usize = 16;

/// A `(file, line)` pair captured at a public API call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Loc {
    file: &'static str,
    line: u32,
}

impl Loc {
    /// Captures the location of the caller.
    #[must_use]
    #[track_caller]
    pub fn caller() -> Self {
        let loc = std::panic::Location::caller();
        Self {
            file: loc.file(),
            line: loc.line(),
        }
    }

    /// Source file of the call site.
    #[must_use]
    pub const fn file(self) -> &'static str {
        self.file
    }

    /// Line number of the call site.
    #[must_use]
    pub const fn line(self) -> u32 {
        self.line
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

static CALL_SERIAL: AtomicU64 = AtomicU64::new(0);

/// One entry in a holder's debug trail.
#[derive(Debug, Clone)]
pub struct CallRecord {
    loc: Loc,
    serial: u64,
    at: SystemTime,
}

impl CallRecord {
    pub(crate) fn new(loc: Loc) -> Self {
        Self {
            loc,
            serial: CALL_SERIAL.fetch_add(1, Ordering::Relaxed),
            at: SystemTime::now(),
        }
    }

    /// The call site this record was captured at.
    #[must_use]
    pub const fn loc(&self) -> Loc {
        self.loc
    }

    /// Process-wide dispatch serial number, in dispatch order.
    #[must_use]
    pub const fn serial(&self) -> u64 {
        self.serial
    }

    /// Wall-clock time the record was captured.
    #[must_use]
    pub const fn at(&self) -> SystemTime {
        self.at
    }
}

impl fmt::Display for CallRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let when: chrono::DateTime<chrono::Local> = self.at.into();
        write!(
            f,
            "#{} {} {}",
            self.serial,
            when.format("%Y-%m-%d_%H:%M:%S"),
            self.loc
        )
    }
}

/// A snapshot of one chain's debug trail, most recent record last.
#[derive(Debug, Clone, Default)]
pub struct CallStack {
    records: Vec<CallRecord>,
}

impl CallStack {
    pub(crate) fn from_records(records: Vec<CallRecord>) -> Self {
        Self { records }
    }

    /// Returns true when no records were captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// The records, oldest first.
    #[must_use]
    pub fn records(&self) -> &[CallRecord] {
        &self.records
    }
}

impl fmt::Display for CallStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.records.is_empty() {
            return write!(f, "call stack is empty");
        }
        writeln!(f, "call stack size = {}", self.records.len())?;
        for record in self.records.iter().rev() {
            writeln!(f, "  {record}")?;
        }
        Ok(())
    }
}
