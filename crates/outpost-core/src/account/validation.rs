//! Account validation.

use super::model::Account;

/// Validation error for account configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    /// Host user is empty.
    EmptyHostUser,
    /// Default from address format is invalid.
    InvalidDefaultFrom,
    /// SMTP host is empty.
    EmptySmtpHost,
    /// SMTP port is invalid.
    InvalidSmtpPort,
    /// Daily cap is zero.
    ZeroDailyCap,
}

impl ValidationError {
    /// Get human-readable error message.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::EmptyHostUser => "Host user is required",
            Self::InvalidDefaultFrom => "Invalid default from address",
            Self::EmptySmtpHost => "SMTP server is required",
            Self::InvalidSmtpPort => "SMTP port must be 1-65535",
            Self::ZeroDailyCap => "Daily cap must be at least 1",
        }
    }

    /// Get the field name this error relates to.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::EmptyHostUser => "host_user",
            Self::InvalidDefaultFrom => "default_from",
            Self::EmptySmtpHost => "smtp_host",
            Self::InvalidSmtpPort => "smtp_port",
            Self::ZeroDailyCap => "daily_cap",
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ValidationError {}

/// Result of validating an account.
pub type ValidationResult = Result<(), Vec<ValidationError>>;

/// Validate an account configuration.
///
/// Returns `Ok(())` if valid, or `Err(Vec<ValidationError>)` with all errors.
///
/// # Errors
///
/// Returns a vector of `ValidationError` if any fields are invalid.
pub fn validate_account(account: &Account) -> ValidationResult {
    let mut errors = Vec::new();

    if account.host_user.trim().is_empty() {
        errors.push(ValidationError::EmptyHostUser);
    }

    if !is_valid_email(&account.default_from) {
        errors.push(ValidationError::InvalidDefaultFrom);
    }

    if account.smtp.host.trim().is_empty() {
        errors.push(ValidationError::EmptySmtpHost);
    }
    if account.smtp.port == 0 {
        errors.push(ValidationError::InvalidSmtpPort);
    }

    if account.daily_cap == 0 {
        errors.push(ValidationError::ZeroDailyCap);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Basic email validation.
fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.trim().split_once('@') else {
        return false;
    };

    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && domain.split('.').all(|part| !part.is_empty())
}
