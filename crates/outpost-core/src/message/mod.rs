//! Message store.
//!
//! Composed messages are immutable once created. The presentation layer reads
//! the summary fields and the opaque encoded payload; nothing in this crate
//! interprets the payload.

mod model;
mod repository;

pub use model::{Message, MessageId, NewMessage};
pub use repository::MessageRepository;
