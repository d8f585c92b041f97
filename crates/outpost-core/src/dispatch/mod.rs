//! Queue draining.
//!
//! A [`Dispatcher`] pass claims ready entries in dispatch order and runs each
//! through exactly one transition:
//!
//! - recipient blacklisted: entry removed, `Skipped` logged, no quota used
//! - no account under its cap: entry left queued, retries untouched
//! - send succeeds: entry removed, `Sent` logged
//! - send fails: entry deferred with backoff and `Failed` logged, or removed
//!   and `Abandoned` logged once the retry budget is spent

mod config;
mod dispatcher;

pub use config::DispatchConfig;
pub use dispatcher::{Dispatcher, Outcome, PassReport};
