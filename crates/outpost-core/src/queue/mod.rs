//! Pending-send queue.
//!
//! Entries are handed out in dispatch order: priority first (high, normal,
//! low), then oldest `queued_at`, then insertion order. An entry is eligible
//! when its `deferred_until` is unset or not in the future.
//!
//! Concurrent dispatch passes never process the same entry: [`QueueRepository::claim`]
//! leases the next eligible entry in a single statement by pushing its
//! `deferred_until` past the lease duration. A lease that is never resolved
//! (crash, cancelled pass) simply expires and the entry becomes eligible again.

mod backoff;
mod model;
mod repository;

pub use backoff::{BackoffPolicy, ExponentialBackoff};
pub use model::{Priority, QueueStats, QueuedMessage, QueuedMessageId};
pub use repository::QueueRepository;
