//! rollcall-store: SQLite persistence for Rollcall.
//!
//! Enrolled identities and their pose embeddings are read as whole snapshots
//! for the recognition index. Attendance is a one-row-per-identity-per-day
//! ledger whose writes are serialized through a single connection and an
//! immediate transaction, backed by a unique `(identity_id, day)` key.

pub mod db;
pub mod enrollment;
pub mod ledger;
pub mod paths;

pub use db::{Store, StoreError};
pub use enrollment::IdentitySummary;
pub use ledger::{
    parse_utc_offset, AttendanceEvent, AttendanceRecord, AttendanceSummaryRow, EventKind, Ledger, LedgerAction,
    LedgerOutcome, OutBeforeIn,
};
