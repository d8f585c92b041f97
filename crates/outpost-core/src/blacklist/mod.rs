//! Suppressed recipient addresses.
//!
//! Addresses are normalized (trimmed, lowercased) on write and on lookup, so
//! matching is case-insensitive: blacklisting `User@Example.com` also
//! suppresses `user@example.com`.

mod model;
mod repository;

pub use model::{BlacklistEntry, normalize_address};
pub use repository::BlacklistRepository;
