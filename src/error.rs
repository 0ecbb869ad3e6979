// src/error.rs
//! Error taxonomy shared by every component of the identity core.
//!
//! Local validation and cryptographic failures are terminal and surfaced
//! synchronously. Ledger failures are split into terminal reverts
//! ([`Error::LedgerRejected`]) and retryable transport failures
//! ([`Error::NetworkFailure`]) so callers know whether resubmission means anything.

use std::fmt;
use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Reasons a ledger transaction is reverted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerRejection {
    /// Signer does not own the active token for the fingerprint.
    NotOwner,
    /// A mint was attempted while an active token already exists.
    ActiveTokenExists,
    /// No token has ever been minted for the fingerprint.
    NoActiveToken,
    /// Signer lacks the minter role.
    NotMinter,
    /// Signer lacks the admin role.
    NotAdmin,
    /// Credential tokens are soulbound.
    NonTransferable,
    /// Token id does not exist.
    UnknownToken,
    /// Revert string reported by a remote ledger that has no local equivalent.
    Reverted(String),
}

impl LedgerRejection {
    /// Maps a contract revert string onto a known rejection.
    pub fn from_revert_reason(reason: &str) -> Self {
        let lowered = reason.to_ascii_lowercase();
        if lowered.contains("not owner") || lowered.contains("not the owner") {
            LedgerRejection::NotOwner
        } else if lowered.contains("already") && lowered.contains("active") {
            LedgerRejection::ActiveTokenExists
        } else if lowered.contains("no active") {
            LedgerRejection::NoActiveToken
        } else if lowered.contains("minter") {
            LedgerRejection::NotMinter
        } else if lowered.contains("admin") {
            LedgerRejection::NotAdmin
        } else if lowered.contains("soulbound") || lowered.contains("transfer") {
            LedgerRejection::NonTransferable
        } else if lowered.contains("nonexistent")
            || lowered.contains("unknown token")
            || lowered.contains("invalid token") {
            LedgerRejection::UnknownToken
        } else {
            LedgerRejection::Reverted(reason.to_string())
        }
    }
}

impl fmt::Display for LedgerRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerRejection::NotOwner => write!(f, "caller does not own the active token"),
            LedgerRejection::ActiveTokenExists => {
                write!(f, "an active token already exists for this fingerprint")
            }
            LedgerRejection::NoActiveToken => write!(f, "no active token for this fingerprint"),
            LedgerRejection::NotMinter => write!(f, "caller is not a minter"),
            LedgerRejection::NotAdmin => write!(f, "caller is not the ledger admin"),
            LedgerRejection::NonTransferable => write!(f, "credential tokens are non-transferable"),
            LedgerRejection::UnknownToken => write!(f, "token does not exist"),
            LedgerRejection::Reverted(reason) => write!(f, "reverted: {}", reason),
        }
    }
}

/// Every failure the identity core can report.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or low-entropy fingerprint.
    #[error("invalid fingerprint: {reason}")]
    InvalidFingerprint { reason: String },

    /// A configuration struct failed validation.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The attempt limit for the identifier was reached.
    #[error("rate limit exceeded, retry after {retry_after_secs}s ({attempts_remaining} attempts remaining)")]
    RateLimitExceeded {
        retry_after_secs: u64,
        attempts_remaining: u32,
    },

    /// The identifier is locked out until the cooldown expires.
    #[error("cooldown active, retry after {retry_after_secs}s")]
    CooldownActive { retry_after_secs: u64 },

    /// The derived bytes could not form a valid secp256k1 key, or an HD step failed.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Decryption failed. Deliberately carries no detail.
    #[error("incorrect password")]
    IncorrectPassword,

    /// Decryption succeeded but the contents disagree with the record.
    #[error("vault data corrupted: {0}")]
    DataCorrupted(String),

    /// The local persistent store could not be read or written.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The ledger reverted the transaction. Terminal.
    #[error("ledger rejected transaction: {0}")]
    LedgerRejected(LedgerRejection),

    /// The ledger could not be reached. Retryable.
    #[error("network failure: {0}")]
    NetworkFailure(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether resubmitting the same request can succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::NetworkFailure(_) | Error::RateLimitExceeded { .. } | Error::CooldownActive { .. }
        )
    }

    /// Seconds the caller should wait before retrying, when known.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Error::RateLimitExceeded { retry_after_secs, .. } => Some(*retry_after_secs),
            Error::CooldownActive { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }

    pub(crate) fn invalid_fingerprint(reason: impl Into<String>) -> Self {
        Error::InvalidFingerprint { reason: reason.into() }
    }

    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        Error::InvalidConfig { reason: reason.into() }
    }
}

impl From<LedgerRejection> for Error {
    fn from(rejection: LedgerRejection) -> Self {
        Error::LedgerRejected(rejection)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::StorageUnavailable(err.to_string())
    }
}
