//! Outbound delivery transports.
//!
//! The dispatcher hands an encoded payload to a [`Transport`] together with
//! the account to send through. [`SmtpTransport`] relays over SMTP; tests plug
//! in their own implementations.

mod smtp;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::account::Account;

pub use smtp::SmtpTransport;

/// Why a single delivery attempt failed.
///
/// Every variant is treated as transient by the dispatcher; the message is
/// retried until its retry budget runs out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Could not reach or authenticate with the server.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The server refused the message.
    #[error("Rejected by server: {0}")]
    Rejected(String),

    /// A sender or recipient address could not be used.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// The attempt did not finish in time.
    #[error("Timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),
}

/// Something that can deliver an encoded message.
pub trait Transport: Send + Sync {
    /// Deliver `payload` from `from` to `to` through `account`.
    ///
    /// The payload is sent verbatim.
    fn send(
        &self,
        account: &Account,
        to: &str,
        from: &str,
        payload: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn send(
        &self,
        account: &Account,
        to: &str,
        from: &str,
        payload: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send {
        (**self).send(account, to, from, payload)
    }
}
