// src/wallet/mod.rs
//! Key derivation, rate limiting and the encrypted local vault.

pub mod credential_storage;
pub mod hd;
pub mod key_derivation;
pub mod rate_limiter;
pub mod vault;

pub use credential_storage::{FileStore, MemoryStore, VaultStore};
pub use key_derivation::{derive_key_material, KeyDerivationEngine};
pub use rate_limiter::{RateLimitConfig, RateLimitStatus, RateLimiter};
pub use vault::{CredentialVault, UnlockedCredential, VaultConfig, VaultManifest, VaultRecord};
