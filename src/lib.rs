// src/lib.rs

//! # Biometric Identity Vault
//!
//! Self-custodial identity credentials derived deterministically from a
//! biometric fingerprint.
//!
//! ## Architecture Overview
//! 1. **Wallet Layer**: rate-limited fingerprint → secp256k1 key derivation and
//!    the AES-256-GCM encrypted local vault
//! 2. **Ledger Layer**: soulbound credential tokens with recovery history,
//!    in-process ([`ledger::local`]) or on zkSync ([`contracts::identity_registry`])
//! 3. **Services Layer**: enrollment, restoration and verification flows
//!
//! Private keys and raw fingerprints never leave the vault unencrypted and are
//! never logged.

pub mod blockchain; // zkSync blockchain interactions
pub mod config; // Layered settings
pub mod contracts; // Smart contract interfaces
pub mod error;
pub mod ledger; // Credential ledger trait and local implementation
pub mod models; // Data structures
pub mod services; // Enrollment and verification flows
pub mod utils; // Helper functions
pub mod wallet; // Derivation, rate limiting, vault

pub use error::{Error, LedgerRejection, Result};
