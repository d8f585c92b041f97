//! Blacklist data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A suppressed recipient address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    /// Unique identifier.
    pub id: i64,
    /// Normalized address.
    pub email: String,
    /// When the address was added.
    pub date_added: DateTime<Utc>,
}

/// Canonical form used for storage and comparison.
#[must_use]
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}
