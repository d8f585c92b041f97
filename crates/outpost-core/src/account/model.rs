//! Account model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of messages an account may send per day.
pub const DEFAULT_DAILY_CAP: u32 = 500;

/// Unique identifier for an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(pub i64);

impl AccountId {
    /// Create a new account ID.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Security/encryption mode for the SMTP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Security {
    /// No encryption (not recommended).
    None,
    /// Implicit TLS (connect directly with TLS).
    Tls,
    /// STARTTLS upgrade after plaintext connect.
    #[default]
    StartTls,
}

impl Security {
    /// Get display name for the security mode.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::None => "None (insecure)",
            Self::Tls => "SSL/TLS",
            Self::StartTls => "STARTTLS",
        }
    }

    /// Convert to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Tls => "tls",
            Self::StartTls => "starttls",
        }
    }

    /// Parse from database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "none" => Self::None,
            "tls" | "ssl" => Self::Tls,
            _ => Self::StartTls,
        }
    }
}

/// SMTP endpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Security mode.
    pub security: Security,
}

impl SmtpConfig {
    /// Get default port for the security mode.
    #[must_use]
    pub const fn default_port(security: Security) -> u16 {
        match security {
            Security::None => 25,
            Security::StartTls => 587,
            Security::Tls => 465,
        }
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: "smtp.gmail.com".to_string(),
            port: Self::default_port(Security::StartTls),
            security: Security::StartTls,
        }
    }
}

/// Outbound sending account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Unique identifier (None for unsaved accounts).
    pub id: Option<AccountId>,
    /// Login identity on the SMTP host. Unique across the pool.
    pub host_user: String,
    /// Login secret on the SMTP host.
    #[serde(skip_serializing, default)]
    pub host_password: String,
    /// Sender used when a message has no from address.
    pub default_from: String,
    /// SMTP endpoint.
    pub smtp: SmtpConfig,
    /// Maximum messages this account may send per UTC day.
    pub daily_cap: u32,
    /// Disabled accounts are never selected.
    pub enabled: bool,
    /// When the account was created.
    pub created_at: Option<DateTime<Utc>>,
    /// When the account was last modified.
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for Account {
    fn default() -> Self {
        Self {
            id: None,
            host_user: String::new(),
            host_password: String::new(),
            default_from: String::new(),
            smtp: SmtpConfig::default(),
            daily_cap: DEFAULT_DAILY_CAP,
            enabled: true,
            created_at: None,
            updated_at: None,
        }
    }
}

impl Account {
    /// Create a new account with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create account for a host user, with SMTP presets for well-known providers.
    #[must_use]
    pub fn with_host_user(host_user: &str) -> Self {
        let mut account = Self {
            host_user: host_user.to_string(),
            default_from: host_user.to_string(),
            ..Default::default()
        };

        if let Some(domain) = host_user.split('@').nth(1) {
            let preset = match domain.to_lowercase().as_str() {
                "gmail.com" | "googlemail.com" => Some(("smtp.gmail.com", Security::StartTls)),
                "outlook.com" | "hotmail.com" | "live.com" => {
                    Some(("smtp.office365.com", Security::StartTls))
                }
                "yahoo.com" | "ymail.com" => Some(("smtp.mail.yahoo.com", Security::Tls)),
                "icloud.com" | "me.com" | "mac.com" => {
                    Some(("smtp.mail.me.com", Security::StartTls))
                }
                _ => None,
            };

            if let Some((host, security)) = preset {
                account.smtp = SmtpConfig {
                    host: host.to_string(),
                    port: SmtpConfig::default_port(security),
                    security,
                };
            } else {
                account.smtp.host = format!("smtp.{domain}");
            }
        }

        account
    }

    /// Sender to use for a message: its own from address, or this account's default.
    #[must_use]
    pub fn sender_for<'a>(&'a self, from_address: &'a str) -> &'a str {
        if from_address.trim().is_empty() {
            &self.default_from
        } else {
            from_address
        }
    }
}
