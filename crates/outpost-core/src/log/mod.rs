//! Delivery audit log.
//!
//! One entry per attempt outcome. Entries are append-only; retention is
//! handled outside this crate.

mod model;
mod repository;

pub use model::{LogEntry, LogEntryId, ResultCode};
pub(crate) use repository::insert_entry;
pub use repository::LogRepository;
