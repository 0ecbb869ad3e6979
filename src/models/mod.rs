// src/models/mod.rs
//! Data structures shared by the wallet, vault and ledger layers.

pub mod credential;
pub mod fingerprint;
pub mod key_material;

pub use credential::{
    CredentialHistory, CredentialToken, FullHistory, PersonalFields, Suspicion, SuspicionReason,
    TokenId,
};
pub use fingerprint::{analyze_fingerprint, Fingerprint, FingerprintKey, FingerprintQuality};
pub use key_material::{DerivationConfig, KeyMaterial};
