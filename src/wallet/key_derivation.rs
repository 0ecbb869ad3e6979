// src/wallet/key_derivation.rs
//! Deterministic key derivation from a biometric fingerprint.
//!
//! The same `(fingerprint, DerivationConfig)` pair always yields the same
//! secp256k1 keypair, so a verified human can regenerate their wallet on any
//! device without the private key ever leaving the local vault.
//!
//! Uses the following cryptographic primitives:
//! - PBKDF2-HMAC-SHA256 (via `ring`)
//! - secp256k1 curve (via `k256`)
//! - Keccak-256 address hashing (via `ethers`)

use std::num::NonZeroU32;
use std::sync::Arc;

use ethers::types::Address;
use log::{debug, info, warn};
use ring::pbkdf2;
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::models::fingerprint::Fingerprint;
use crate::models::key_material::{DerivationConfig, KeyMaterial, PRIVATE_KEY_LENGTH};
use crate::utils::crypto::sha512;
use crate::wallet::hd::{ethereum_address_path, ExtendedKey};
use crate::wallet::rate_limiter::{RateLimitConfig, RateLimitStatus, RateLimiter};

/// Upper bound on addresses produced by one multi-address derivation.
pub const MAX_DERIVED_ADDRESSES: usize = 100;

/// Derives key material without rate limiting.
///
/// Validates the config and the fingerprint, then runs the KDF. Prefer
/// [`KeyDerivationEngine::derive`] for anything reachable by untrusted input.
///
/// # Process Flow
/// 1. Concatenates `fingerprint:salt`
/// 2. Runs PBKDF2-HMAC-SHA256 for `config.iterations` to `config.key_length` bytes
/// 3. Left-pads or truncates the output to 32 bytes
/// 4. Builds the secp256k1 keypair and its address
pub fn derive_key_material(fingerprint: &Fingerprint, config: &DerivationConfig) -> Result<KeyMaterial> {
    config.validate()?;
    fingerprint.validate()?;
    derive_unchecked(fingerprint, config)
}

fn derive_unchecked(fingerprint: &Fingerprint, config: &DerivationConfig) -> Result<KeyMaterial> {
    let iterations = NonZeroU32::new(config.iterations)
        .ok_or_else(|| Error::invalid_config("derivation iterations must be positive"))?;
    let secret = Zeroizing::new(format!("{}:{}", fingerprint.as_str(), config.salt));

    let mut derived = Zeroizing::new(vec![0u8; config.key_length]);
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        config.salt.as_bytes(),
        secret.as_bytes(),
        derived.as_mut_slice(),
    );

    let mut key_bytes = Zeroizing::new([0u8; PRIVATE_KEY_LENGTH]);
    if derived.len() >= PRIVATE_KEY_LENGTH {
        key_bytes.copy_from_slice(&derived[..PRIVATE_KEY_LENGTH]);
    } else {
        let offset = PRIVATE_KEY_LENGTH - derived.len();
        key_bytes[offset..].copy_from_slice(&derived);
    }

    KeyMaterial::from_private_key(&key_bytes)
}

/// Rate-limited derivation engine.
///
/// The limiter is injected rather than global, so independent engines (and
/// tests) never share attempt history unless they share the limiter.
#[derive(Clone)]
pub struct KeyDerivationEngine {
    limiter: Arc<RateLimiter>,
    rate_limit: RateLimitConfig,
}

impl KeyDerivationEngine {
    /// Creates an engine applying `rate_limit` to every call.
    pub fn new(limiter: Arc<RateLimiter>, rate_limit: RateLimitConfig) -> Self {
        KeyDerivationEngine { limiter, rate_limit }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn rate_limit_config(&self) -> &RateLimitConfig {
        &self.rate_limit
    }

    /// Derives the keypair for `fingerprint`.
    ///
    /// # Arguments
    /// * `fingerprint` - Provider fingerprint (validated after the rate-limit check)
    /// * `config` - Versioned derivation parameters
    /// * `identifier` - Rate-limit key; defaults to the fingerprint's SHA-256 digest
    ///
    /// # Errors
    /// - [`Error::RateLimitExceeded`] / [`Error::CooldownActive`] when throttled
    /// - [`Error::InvalidFingerprint`] for malformed or low-entropy input;
    ///   the attempt slot is consumed regardless
    pub fn derive(
        &self,
        fingerprint: &Fingerprint,
        config: &DerivationConfig,
        identifier: Option<&str>,
    ) -> Result<KeyMaterial> {
        self.derive_with_limits(fingerprint, config, identifier, &self.rate_limit)
    }

    /// [`derive`](Self::derive) with a per-call rate-limit configuration.
    pub fn derive_with_limits(
        &self,
        fingerprint: &Fingerprint,
        config: &DerivationConfig,
        identifier: Option<&str>,
        rate_limit: &RateLimitConfig,
    ) -> Result<KeyMaterial> {
        self.admit(fingerprint, config, identifier, rate_limit)?;
        let key = derive_unchecked(fingerprint, config)?;
        debug!("derived address {} (config v{})", key.address_string(), config.version);
        Ok(key)
    }

    /// Derives only the address.
    pub fn derive_address(
        &self,
        fingerprint: &Fingerprint,
        config: &DerivationConfig,
        identifier: Option<&str>,
    ) -> Result<Address> {
        self.derive(fingerprint, config, identifier).map(|key| key.address())
    }

    /// Derives `count` further keypairs along `m/44'/60'/0'/0/i`.
    ///
    /// The HD seed is SHA-512 of the base private key. If hierarchical
    /// derivation fails for an index, that index falls back to salted
    /// re-derivation with salt `"{salt}-{i}"`. Consumes one attempt in total.
    pub fn derive_multiple(
        &self,
        fingerprint: &Fingerprint,
        config: &DerivationConfig,
        count: usize,
        identifier: Option<&str>,
    ) -> Result<Vec<KeyMaterial>> {
        if count > MAX_DERIVED_ADDRESSES {
            return Err(Error::invalid_config(format!(
                "cannot derive more than {} addresses, requested {}",
                MAX_DERIVED_ADDRESSES, count
            )));
        }
        self.admit(fingerprint, config, identifier, &self.rate_limit)?;
        let base = derive_unchecked(fingerprint, config)?;

        let seed = Zeroizing::new(sha512(base.private_key_bytes().as_slice()));
        let master = ExtendedKey::master(seed.as_slice());
        if let Err(err) = &master {
            warn!("HD master derivation unavailable, using salted re-derivation: {}", err);
        }

        let mut keys = Vec::with_capacity(count);
        for index in 0..count {
            let hierarchical = master
                .as_ref()
                .map_err(|err| Error::KeyDerivation(err.to_string()))
                .and_then(|master| master.derive_path(&ethereum_address_path(index as u32)));
            let key = match hierarchical {
                Ok(extended) => KeyMaterial::from_secret_key(extended.secret_key().clone()),
                Err(err) => {
                    if master.is_ok() {
                        warn!("HD derivation failed at index {}: {}", index, err);
                    }
                    let salted = config.clone().with_salt(format!("{}-{}", config.salt, index));
                    derive_unchecked(fingerprint, &salted)?
                }
            };
            keys.push(key);
        }
        info!("derived {} additional addresses", keys.len());
        Ok(keys)
    }

    /// Checks whether `address` is the one `fingerprint` derives to.
    ///
    /// Comparison is case-insensitive; an unparseable address is simply `false`.
    pub fn validate_address_for_fingerprint(
        &self,
        address: &str,
        fingerprint: &Fingerprint,
        config: &DerivationConfig,
        identifier: Option<&str>,
    ) -> Result<bool> {
        let expected = self.derive_address(fingerprint, config, identifier)?;
        Ok(match address.trim().parse::<Address>() {
            Ok(candidate) => candidate == expected,
            Err(_) => false,
        })
    }

    /// Current limiter state for `identifier` under the engine's limits.
    pub fn check_rate_limit(&self, identifier: &str) -> RateLimitStatus {
        self.limiter.check(identifier, &self.rate_limit)
    }

    fn admit(
        &self,
        fingerprint: &Fingerprint,
        config: &DerivationConfig,
        identifier: Option<&str>,
        rate_limit: &RateLimitConfig,
    ) -> Result<()> {
        config.validate()?;
        rate_limit.validate()?;

        let default_identifier;
        let identifier = match identifier {
            Some(identifier) => identifier,
            None => {
                default_identifier = fingerprint.digest();
                default_identifier.as_str()
            }
        };
        self.limiter.check_and_record(identifier, rate_limit)?;

        // The slot stays consumed even when validation fails.
        fingerprint.validate()
    }
}
