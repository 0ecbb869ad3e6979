// src/wallet/hd.rs
//! Hierarchical deterministic (BIP-32) derivation over secp256k1.
//!
//! Used by multi-address derivation: a seed built from the fingerprint's base
//! key is expanded into a master key, and child keys are walked along the
//! standard Ethereum path `m/44'/60'/0'/0/i`.

use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::elliptic_curve::PrimeField;
use k256::{FieldBytes, NonZeroScalar, Scalar, SecretKey};
use ring::hmac;

use crate::error::{Error, Result};

/// Offset marking a hardened child index.
pub const HARDENED_OFFSET: u32 = 0x8000_0000;

/// Ethereum account path prefix; the address index is appended.
pub const ETHEREUM_ACCOUNT_PATH: &str = "m/44'/60'/0'/0";

const MASTER_HMAC_KEY: &[u8] = b"Bitcoin seed";

/// An extended private key: secret scalar plus chain code.
#[derive(Clone)]
pub struct ExtendedKey {
    secret_key: SecretKey,
    chain_code: [u8; 32],
}

impl ExtendedKey {
    /// Computes the master key for `seed`.
    ///
    /// # Errors
    /// [`Error::KeyDerivation`] if the seed maps to an invalid scalar.
    pub fn master(seed: &[u8]) -> Result<Self> {
        if !(16..=64).contains(&seed.len()) {
            return Err(Error::KeyDerivation(format!(
                "HD seed must be 16..=64 bytes, got {}",
                seed.len()
            )));
        }
        let key = hmac::Key::new(hmac::HMAC_SHA512, MASTER_HMAC_KEY);
        let tag = hmac::sign(&key, seed);
        let (il, ir) = tag.as_ref().split_at(32);
        let secret_key = SecretKey::from_slice(il)
            .map_err(|_| Error::KeyDerivation("master key is not a valid scalar".to_string()))?;
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(ir);
        Ok(ExtendedKey { secret_key, chain_code })
    }

    /// Derives the child at `index` (hardened when `index >= HARDENED_OFFSET`).
    pub fn child(&self, index: u32) -> Result<Self> {
        let mut data = Vec::with_capacity(37);
        if index >= HARDENED_OFFSET {
            data.push(0u8);
            data.extend_from_slice(&self.secret_key.to_bytes());
        } else {
            let point = self.secret_key.public_key().to_encoded_point(true);
            data.extend_from_slice(point.as_bytes());
        }
        data.extend_from_slice(&index.to_be_bytes());

        let key = hmac::Key::new(hmac::HMAC_SHA512, &self.chain_code);
        let tag = hmac::sign(&key, &data);
        let (il, ir) = tag.as_ref().split_at(32);

        let tweak: Option<Scalar> = Scalar::from_repr(FieldBytes::clone_from_slice(il)).into();
        let tweak = tweak.ok_or_else(|| {
            Error::KeyDerivation(format!("child {} tweak exceeds curve order", index))
        })?;
        let parent: Scalar = *self.secret_key.to_nonzero_scalar();
        let child: Option<NonZeroScalar> = NonZeroScalar::new(tweak + parent).into();
        let child = child
            .ok_or_else(|| Error::KeyDerivation(format!("child {} is the zero scalar", index)))?;

        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(ir);
        Ok(ExtendedKey {
            secret_key: SecretKey::from(child),
            chain_code,
        })
    }

    /// Walks a full path such as `m/44'/60'/0'/0/3`.
    pub fn derive_path(&self, path: &str) -> Result<Self> {
        parse_path(path)?
            .into_iter()
            .try_fold(self.clone(), |key, index| key.child(index))
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }

    pub fn chain_code(&self) -> &[u8; 32] {
        &self.chain_code
    }
}

/// Parses a BIP-32 path into child indices.
pub fn parse_path(path: &str) -> Result<Vec<u32>> {
    let mut segments = path.split('/');
    if segments.next() != Some("m") {
        return Err(Error::KeyDerivation(format!("path must start with 'm': {}", path)));
    }
    segments
        .map(|segment| {
            let (digits, hardened) = match segment.strip_suffix('\'') {
                Some(digits) => (digits, true),
                None => (segment, false),
            };
            let index: u32 = digits
                .parse()
                .map_err(|_| Error::KeyDerivation(format!("bad path segment '{}'", segment)))?;
            if index >= HARDENED_OFFSET {
                return Err(Error::KeyDerivation(format!("path index {} out of range", index)));
            }
            Ok(if hardened { index + HARDENED_OFFSET } else { index })
        })
        .collect()
}

/// Path of the `index`-th Ethereum address.
pub fn ethereum_address_path(index: u32) -> String {
    format!("{}/{}", ETHEREUM_ACCOUNT_PATH, index)
}
