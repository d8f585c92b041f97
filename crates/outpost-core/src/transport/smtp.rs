//! SMTP relay transport.

use std::time::Duration;

use lettre::address::Envelope;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use tracing::debug;

use super::{Transport, TransportError};
use crate::account::{Account, Security};

/// Default SMTP command timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Delivers messages by relaying them through each account's SMTP server.
#[derive(Debug, Clone)]
pub struct SmtpTransport {
    timeout: Duration,
}

impl Default for SmtpTransport {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl SmtpTransport {
    /// Create a transport whose SMTP commands give up after `timeout`.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn mailer(
        &self,
        account: &Account,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, TransportError> {
        let host = &account.smtp.host;
        let tls = match account.smtp.security {
            Security::None => Tls::None,
            Security::Tls => Tls::Wrapper(tls_parameters(host)?),
            Security::StartTls => Tls::Required(tls_parameters(host)?),
        };

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
            .port(account.smtp.port)
            .tls(tls)
            .timeout(Some(self.timeout));

        if !account.host_user.is_empty() {
            builder = builder.credentials(Credentials::new(
                account.host_user.clone(),
                account.host_password.clone(),
            ));
        }

        Ok(builder.build())
    }
}

fn tls_parameters(host: &str) -> Result<TlsParameters, TransportError> {
    TlsParameters::new(host.to_string()).map_err(|e| TransportError::Connection(e.to_string()))
}

fn parse_address(address: &str) -> Result<Address, TransportError> {
    address
        .trim()
        .parse()
        .map_err(|e| TransportError::InvalidAddress(format!("{address}: {e}")))
}

impl Transport for SmtpTransport {
    async fn send(
        &self,
        account: &Account,
        to: &str,
        from: &str,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let envelope = Envelope::new(Some(parse_address(from)?), vec![parse_address(to)?])
            .map_err(|e| TransportError::InvalidAddress(e.to_string()))?;

        let mailer = self.mailer(account)?;
        let response = mailer.send_raw(&envelope, payload).await.map_err(|e| {
            if e.is_permanent() || e.is_transient() {
                TransportError::Rejected(e.to_string())
            } else if e.is_timeout() {
                TransportError::Timeout(self.timeout)
            } else {
                TransportError::Connection(e.to_string())
            }
        })?;

        debug!(host = %account.smtp.host, code = %response.code(), "Server accepted message");
        Ok(())
    }
}
