//! # outpost-core
//!
//! Durable outbound mail queue and dispatcher.
//!
//! This crate provides:
//! - Message storage (`SQLite`), immutable once created
//! - A priority queue of pending sends with deferred retries
//! - Sending accounts with per-day send caps
//! - A recipient blacklist
//! - An append-only delivery log
//! - The dispatcher that drains the queue through a pluggable transport
//!
//! ```no_run
//! use chrono::Utc;
//! use outpost_core::{DispatchConfig, Dispatcher, NewMessage, Priority, SmtpTransport, Store};
//!
//! # async fn run() -> outpost_core::Result<()> {
//! let store = Store::new("outpost.db").await?;
//! let message = store
//!     .messages()
//!     .create(NewMessage::new("to@example.com", b"raw rfc822".to_vec()), Utc::now())
//!     .await?;
//! store.queue().enqueue(message.id, Priority::High, Utc::now()).await?;
//!
//! let config = DispatchConfig::default();
//! let transport = SmtpTransport::new(config.transport_timeout);
//! let dispatcher = Dispatcher::new(store, transport, config)?;
//! let report = dispatcher.run_pass(Utc::now()).await?;
//! println!("sent {}", report.sent);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod account;
pub mod blacklist;
pub mod dispatch;
mod error;
pub mod log;
pub mod message;
pub mod queue;
mod store;
pub mod transport;

pub use account::{
    Account, AccountId, AccountPool, AccountRepository, Reservation, Security, SmtpConfig,
    ValidationError, ValidationResult, validate_account,
};
pub use blacklist::{BlacklistEntry, BlacklistRepository};
pub use dispatch::{DispatchConfig, Dispatcher, Outcome, PassReport};
pub use error::{Error, Result};
pub use log::{LogEntry, LogEntryId, LogRepository, ResultCode};
pub use message::{Message, MessageId, MessageRepository, NewMessage};
pub use queue::{
    BackoffPolicy, ExponentialBackoff, Priority, QueueRepository, QueueStats, QueuedMessage,
    QueuedMessageId,
};
pub use store::Store;
pub use transport::{SmtpTransport, Transport, TransportError};
