// src/models/key_material.rs
//! Key material produced by deterministic derivation, and the versioned
//! configuration that fully determines it.

use std::fmt;

use ethers::types::Address;
use ethers::utils::{hex, to_checksum};
use k256::SecretKey;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::utils::crypto::public_key_to_address;

/// Lowest PBKDF2 iteration count accepted for fingerprint derivation.
pub const MIN_DERIVATION_ITERATIONS: u32 = 100_000;

/// Length in bytes of a secp256k1 private key.
pub const PRIVATE_KEY_LENGTH: usize = 32;

static DEVELOPMENT: Lazy<DerivationConfig> = Lazy::new(|| DerivationConfig {
    version: 1,
    salt: "bioid-deterministic-dev".to_string(),
    iterations: 100_000,
    key_length: 32,
});

static PRODUCTION: Lazy<DerivationConfig> = Lazy::new(|| DerivationConfig {
    version: 1,
    salt: "bioid-deterministic-v1".to_string(),
    iterations: 250_000,
    key_length: 32,
});

/// Parameters of fingerprint → key derivation.
///
/// Changing any field changes every derived address, so the struct is
/// versioned and meant to be pinned per deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DerivationConfig {
    /// Schema version of this parameter set.
    pub version: u32,
    /// Application salt mixed into the KDF input and used as the PBKDF2 salt.
    pub salt: String,
    /// PBKDF2-HMAC-SHA256 iteration count.
    pub iterations: u32,
    /// Bytes requested from the KDF before padding/truncating to 32.
    pub key_length: usize,
}

impl Default for DerivationConfig {
    fn default() -> Self {
        Self::development()
    }
}

impl DerivationConfig {
    /// 100k-iteration preset for development and tests.
    pub fn development() -> Self {
        DEVELOPMENT.clone()
    }

    /// 250k-iteration preset for production deployments.
    pub fn production() -> Self {
        PRODUCTION.clone()
    }

    /// Returns a copy with a different salt.
    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = salt.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.salt.is_empty() {
            return Err(Error::invalid_config("derivation salt must not be empty"));
        }
        if self.iterations < MIN_DERIVATION_ITERATIONS {
            return Err(Error::invalid_config(format!(
                "derivation iterations must be at least {}, got {}",
                MIN_DERIVATION_ITERATIONS, self.iterations
            )));
        }
        if self.key_length == 0 || self.key_length > 64 {
            return Err(Error::invalid_config(format!(
                "derivation key length must be within 1..=64, got {}",
                self.key_length
            )));
        }
        Ok(())
    }
}

/// A secp256k1 keypair and its Ethereum address.
#[derive(Clone)]
pub struct KeyMaterial {
    secret_key: SecretKey,
    address: Address,
}

impl KeyMaterial {
    /// Builds key material from raw private key bytes.
    ///
    /// # Errors
    /// [`Error::KeyDerivation`] when the bytes are zero or not below the curve order.
    pub fn from_private_key(bytes: &[u8; PRIVATE_KEY_LENGTH]) -> Result<Self> {
        let secret_key = SecretKey::from_slice(bytes)
            .map_err(|_| Error::KeyDerivation("bytes are not a valid secp256k1 scalar".to_string()))?;
        Ok(Self::from_secret_key(secret_key))
    }

    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let address = public_key_to_address(&secret_key.public_key());
        KeyMaterial { secret_key, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// EIP-55 checksummed address string.
    pub fn address_string(&self) -> String {
        to_checksum(&self.address, None)
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }

    /// Raw private key bytes, wiped when dropped.
    pub fn private_key_bytes(&self) -> Zeroizing<[u8; PRIVATE_KEY_LENGTH]> {
        let mut out = Zeroizing::new([0u8; PRIVATE_KEY_LENGTH]);
        out.copy_from_slice(&self.secret_key.to_bytes());
        out
    }

    /// Hex private key without `0x`, wiped when dropped.
    pub fn private_key_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.private_key_bytes().as_slice()))
    }
}

impl PartialEq for KeyMaterial {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.private_key_bytes() == other.private_key_bytes()
    }
}

impl Eq for KeyMaterial {}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("address", &self.address_string())
            .field("secret_key", &"<redacted>")
            .finish()
    }
}
