//! Sending accounts.
//!
//! Accounts are administered externally; the dispatcher only reads them
//! through [`AccountPool`], which picks an enabled account with headroom
//! under its daily cap.

mod model;
mod pool;
mod repository;
mod validation;

pub use model::{Account, AccountId, Security, SmtpConfig};
pub use pool::{AccountPool, Reservation};
pub use repository::AccountRepository;
pub use validation::{ValidationError, ValidationResult, validate_account};
