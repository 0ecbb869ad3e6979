// src/wallet/vault.rs
//! Password-protected local vault for derived key material.
//!
//! Envelope encryption at rest: the payload (private key, fingerprint,
//! optional mnemonic) is sealed with AES-256-GCM under a key derived from the
//! user's password and a fresh random salt. Only non-secret metadata is kept in
//! clear: the address, a SHA-256 digest of the fingerprint, and the timestamp.
//!
//! # Security Notes
//! - A fresh 128-bit salt and 96-bit IV are generated on every save
//! - Any authentication failure is reported as [`Error::IncorrectPassword`]
//!   regardless of cause, so callers cannot use the vault as a decryption oracle
//! - The address recovered from the decrypted key must equal the record's
//!   address, otherwise [`Error::DataCorrupted`] is raised

use std::fmt;
use std::num::NonZeroU32;
use std::path::PathBuf;

use ethers::types::Address;
use ethers::utils::hex;
use log::{debug, info, warn};
use ring::{aead, pbkdf2};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{Error, Result};
use crate::models::fingerprint::Fingerprint;
use crate::models::key_material::{KeyMaterial, PRIVATE_KEY_LENGTH};
use crate::utils::crypto::{constant_time_eq, random_bytes};
use crate::utils::serialization::{base64_bytes, base64_opt_bytes, from_json_bytes, to_json_bytes};
use crate::wallet::credential_storage::VaultStore;

/// Current on-disk record layout.
pub const VAULT_SCHEMA_VERSION: u32 = 2;

/// Storage key of the single vault record.
pub const RECORD_KEY: &str = "vault_record";

/// Storage key where schema-1 vaults kept their salt apart from the record.
pub const LEGACY_SALT_KEY: &str = "vault_salt";

pub const SALT_LENGTH: usize = 16;
pub const IV_LENGTH: usize = 12;

pub const DEFAULT_KDF_ITERATIONS: u32 = 600_000;
pub const MIN_KDF_ITERATIONS: u32 = 10_000;

fn legacy_schema_version() -> u32 {
    1
}

/// Vault settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// PBKDF2 iterations for the password-derived encryption key.
    pub kdf_iterations: u32,
    /// Directory for the file-backed store; `None` selects the in-memory store.
    pub directory: Option<PathBuf>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
            directory: None,
        }
    }
}

impl VaultConfig {
    /// Minimum-strength settings to keep test suites fast.
    pub fn for_testing() -> Self {
        Self {
            kdf_iterations: MIN_KDF_ITERATIONS,
            directory: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.kdf_iterations < MIN_KDF_ITERATIONS {
            return Err(Error::invalid_config(format!(
                "vault kdf_iterations must be at least {}, got {}",
                MIN_KDF_ITERATIONS, self.kdf_iterations
            )));
        }
        Ok(())
    }
}

/// Persisted vault record. Everything secret lives inside `ciphertext`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultRecord {
    pub id: String,
    /// EIP-55 address of the sealed key.
    pub address: String,
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub iv: Vec<u8>,
    /// Absent on schema-1 records, whose salt lives under [`LEGACY_SALT_KEY`].
    #[serde(default, with = "base64_opt_bytes")]
    pub salt: Option<Vec<u8>>,
    /// Save time, milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Hex SHA-256 of the fingerprint.
    pub fingerprint_digest: String,
    /// Iterations used to seal this record; absent on schema-1 records.
    #[serde(default)]
    pub kdf_iterations: Option<u32>,
    #[serde(default = "legacy_schema_version")]
    pub schema_version: u32,
}

/// Sealed payload.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct VaultPayload {
    private_key: String,
    fingerprint: String,
    #[serde(default)]
    mnemonic: Option<String>,
}

/// Decrypted vault contents.
pub struct UnlockedCredential {
    pub key_material: KeyMaterial,
    pub fingerprint: Fingerprint,
    pub mnemonic: Option<Zeroizing<String>>,
}

impl fmt::Debug for UnlockedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnlockedCredential")
            .field("key_material", &self.key_material)
            .field("fingerprint", &self.fingerprint)
            .field("mnemonic", &self.mnemonic.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Non-secret summary of the vault, safe to share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultManifest {
    pub address: String,
    pub fingerprint_digest: String,
    pub timestamp: u64,
    pub schema_version: u32,
}

/// Encrypted credential vault over a [`VaultStore`].
pub struct CredentialVault<S> {
    store: S,
    config: VaultConfig,
}

impl<S: VaultStore> CredentialVault<S> {
    /// Creates a vault over `store`.
    ///
    /// # Errors
    /// [`Error::InvalidConfig`] if `config` is too weak.
    pub fn new(store: S, config: VaultConfig) -> Result<Self> {
        config.validate()?;
        Ok(CredentialVault { store, config })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Whether a record is present.
    pub fn exists(&self) -> Result<bool> {
        self.store.contains(RECORD_KEY)
    }

    /// Reads the record metadata without decrypting.
    pub fn record(&self) -> Result<Option<VaultRecord>> {
        match self.store.get(RECORD_KEY)? {
            Some(bytes) => from_json_bytes(&bytes)
                .map(Some)
                .map_err(|e| Error::DataCorrupted(format!("unreadable vault record: {}", e))),
            None => Ok(None),
        }
    }

    /// Seals `key_material` and `fingerprint` under `password`.
    pub fn save(&self, key_material: &KeyMaterial, password: &str, fingerprint: &Fingerprint) -> Result<()> {
        self.save_with_mnemonic(key_material, password, fingerprint, None)
    }

    /// Seals the key together with an optional recovery mnemonic.
    ///
    /// # Process Flow
    /// 1. Generates a fresh salt and IV
    /// 2. Derives the AES-256-GCM key from the password
    /// 3. Seals the payload and writes the whole record in one store operation
    /// 4. Deletes any legacy salt entry
    pub fn save_with_mnemonic(
        &self,
        key_material: &KeyMaterial,
        password: &str,
        fingerprint: &Fingerprint,
        mnemonic: Option<&str>,
    ) -> Result<()> {
        if password.is_empty() {
            return Err(Error::invalid_config("vault password must not be empty"));
        }

        let salt = random_bytes::<SALT_LENGTH>()?;
        let iv = random_bytes::<IV_LENGTH>()?;
        let encryption_key = derive_encryption_key(password, &salt, self.config.kdf_iterations)?;

        let payload = VaultPayload {
            private_key: key_material.private_key_hex().to_string(),
            fingerprint: fingerprint.as_str().to_string(),
            mnemonic: mnemonic.map(str::to_string),
        };
        let plaintext = Zeroizing::new(to_json_bytes(&payload)?);
        let ciphertext = seal(&encryption_key, &iv, &plaintext)?;

        let id = match self.record() {
            Ok(Some(existing)) => existing.id,
            Ok(None) => new_record_id(),
            Err(Error::DataCorrupted(reason)) => {
                warn!("replacing unreadable vault record: {}", reason);
                new_record_id()
            }
            Err(e) => return Err(e),
        };
        let record = VaultRecord {
            id,
            address: key_material.address_string(),
            ciphertext,
            iv: iv.to_vec(),
            salt: Some(salt.to_vec()),
            timestamp: chrono::Utc::now().timestamp_millis().max(0) as u64,
            fingerprint_digest: fingerprint.digest(),
            kdf_iterations: Some(self.config.kdf_iterations),
            schema_version: VAULT_SCHEMA_VERSION,
        };
        self.store.put(RECORD_KEY, &to_json_bytes(&record)?)?;

        if self.store.delete(LEGACY_SALT_KEY)? {
            info!("removed legacy vault salt entry");
        }
        info!("vault record {} saved for {}", record.id, record.address);
        Ok(())
    }

    /// Decrypts the vault.
    ///
    /// # Returns
    /// - `Ok(None)` when no record exists
    /// - `Ok(Some(..))` with the verified key material and fingerprint
    ///
    /// # Errors
    /// - [`Error::IncorrectPassword`] when the payload does not authenticate
    /// - [`Error::DataCorrupted`] when the decrypted key or fingerprint disagree
    ///   with the record, or the record is malformed
    pub fn load(&self, password: &str) -> Result<Option<UnlockedCredential>> {
        let mut record = match self.record()? {
            Some(record) => record,
            None => return Ok(None),
        };

        let (salt, from_legacy) = match &record.salt {
            Some(salt) => (salt.clone(), false),
            None => (self.legacy_salt()?, true),
        };
        if salt.len() != SALT_LENGTH {
            return Err(Error::DataCorrupted(format!("salt must be {} bytes", SALT_LENGTH)));
        }
        let iv: [u8; IV_LENGTH] = record
            .iv
            .as_slice()
            .try_into()
            .map_err(|_| Error::DataCorrupted(format!("iv must be {} bytes", IV_LENGTH)))?;

        let iterations = record.kdf_iterations.unwrap_or(self.config.kdf_iterations);
        let encryption_key = derive_encryption_key(password, &salt, iterations)?;
        let plaintext = open(&encryption_key, &iv, &record.ciphertext)?;

        let payload: VaultPayload = from_json_bytes(&plaintext)
            .map_err(|_| Error::DataCorrupted("decrypted payload is malformed".to_string()))?;
        let key_material = decode_private_key(&payload.private_key)?;

        let recorded_address: Address = record
            .address
            .parse()
            .map_err(|_| Error::DataCorrupted("record address is malformed".to_string()))?;
        if recorded_address != key_material.address() {
            return Err(Error::DataCorrupted(
                "decrypted key does not match the record address".to_string(),
            ));
        }

        let fingerprint = Fingerprint::new(payload.fingerprint.clone());
        if !constant_time_eq(fingerprint.digest().as_bytes(), record.fingerprint_digest.as_bytes()) {
            return Err(Error::DataCorrupted(
                "decrypted fingerprint does not match the record digest".to_string(),
            ));
        }

        if from_legacy {
            warn!(
                "vault record {} used the legacy salt location; migrating salt into the record",
                record.id
            );
            record.salt = Some(salt);
            record.kdf_iterations = Some(iterations);
            record.schema_version = VAULT_SCHEMA_VERSION;
            self.store.put(RECORD_KEY, &to_json_bytes(&record)?)?;
            self.store.delete(LEGACY_SALT_KEY)?;
        }

        debug!("vault record {} unlocked", record.id);
        Ok(Some(UnlockedCredential {
            key_material,
            fingerprint,
            mnemonic: payload.mnemonic.clone().map(Zeroizing::new),
        }))
    }

    /// Compares a candidate fingerprint to the stored digest without decrypting.
    ///
    /// Returns `false` when the vault is empty.
    pub fn verify_fingerprint(&self, candidate: &Fingerprint) -> Result<bool> {
        Ok(match self.record()? {
            Some(record) => constant_time_eq(
                candidate.digest().as_bytes(),
                record.fingerprint_digest.as_bytes(),
            ),
            None => false,
        })
    }

    /// Emits the non-secret manifest after proving the password unlocks the vault.
    pub fn export_manifest(&self, password: &str) -> Result<Option<VaultManifest>> {
        if self.load(password)?.is_none() {
            return Ok(None);
        }
        Ok(self.record()?.map(|record| VaultManifest {
            address: record.address,
            fingerprint_digest: record.fingerprint_digest,
            timestamp: record.timestamp,
            schema_version: record.schema_version,
        }))
    }

    /// Removes the record and any legacy salt. Safe to call repeatedly.
    pub fn wipe(&self) -> Result<()> {
        let removed_record = self.store.delete(RECORD_KEY)?;
        let removed_legacy = self.store.delete(LEGACY_SALT_KEY)?;
        if removed_record || removed_legacy {
            info!("vault wiped");
        }
        Ok(())
    }

    fn legacy_salt(&self) -> Result<Vec<u8>> {
        let stored = self
            .store
            .get(LEGACY_SALT_KEY)?
            .ok_or_else(|| Error::DataCorrupted("record has no salt".to_string()))?;
        let text = String::from_utf8(stored)
            .map_err(|_| Error::DataCorrupted("legacy salt is not text".to_string()))?;
        hex::decode(text.trim()).map_err(|_| Error::DataCorrupted("legacy salt is not hex".to_string()))
    }
}

fn derive_encryption_key(password: &str, salt: &[u8], iterations: u32) -> Result<Zeroizing<[u8; 32]>> {
    let iterations = NonZeroU32::new(iterations)
        .ok_or_else(|| Error::invalid_config("vault kdf_iterations must be positive"))?;
    let mut key = Zeroizing::new([0u8; 32]);
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        salt,
        password.as_bytes(),
        key.as_mut_slice(),
    );
    Ok(key)
}

fn cipher(key: &[u8; 32]) -> Result<aead::LessSafeKey> {
    let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, key)
        .map_err(|_| Error::KeyDerivation("invalid AES-256-GCM key length".to_string()))?;
    Ok(aead::LessSafeKey::new(unbound))
}

fn seal(key: &[u8; 32], iv: &[u8; IV_LENGTH], plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut in_out = plaintext.to_vec();
    cipher(key)?
        .seal_in_place_append_tag(
            aead::Nonce::assume_unique_for_key(*iv),
            aead::Aad::empty(),
            &mut in_out,
        )
        .map_err(|_| Error::KeyDerivation("encryption failed".to_string()))?;
    Ok(in_out)
}

fn open(key: &[u8; 32], iv: &[u8; IV_LENGTH], ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let mut in_out = Zeroizing::new(ciphertext.to_vec());
    let plaintext_len = cipher(key)?
        .open_in_place(
            aead::Nonce::assume_unique_for_key(*iv),
            aead::Aad::empty(),
            in_out.as_mut_slice(),
        )
        .map_err(|_| Error::IncorrectPassword)?
        .len();
    in_out.truncate(plaintext_len);
    Ok(in_out)
}

fn decode_private_key(encoded: &str) -> Result<KeyMaterial> {
    let bytes = Zeroizing::new(
        hex::decode(encoded).map_err(|_| Error::DataCorrupted("sealed key is not hex".to_string()))?,
    );
    let bytes: &[u8; PRIVATE_KEY_LENGTH] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| Error::DataCorrupted("sealed key has the wrong length".to_string()))?;
    KeyMaterial::from_private_key(bytes)
        .map_err(|_| Error::DataCorrupted("sealed key is not a valid scalar".to_string()))
}

fn new_record_id() -> String {
    let bytes: [u8; 8] = rand::random();
    format!("vault-{}", hex::encode(bytes))
}
