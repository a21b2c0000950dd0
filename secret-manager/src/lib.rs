#![forbid(unsafe_code)]
//! The Secret Manager (spec.md §4.J): AEAD-encrypted secret store backing
//! signer key material, with rotation bookkeeping, short-lived TURN-style
//! token issuance, and an audit log.

mod error;
mod master;
mod store;
mod token;

pub use error::{SecretManagerError, SecretManagerResult};
pub use master::{MasterKey, MIN_PBKDF2_ITERATIONS};
pub use store::{AuditAction, AuditEntry, SecretManager, StoredSecret, DEFAULT_ROTATION_PERIOD_SECS, DEFAULT_ROTATION_WARNING_SECS};
pub use token::{TurnToken, MAX_TOKEN_TTL_SECS};
