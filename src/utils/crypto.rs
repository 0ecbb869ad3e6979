// src/utils/crypto.rs
//! Cryptographic utilities optimized for blockchain compatibility.
//!
//! Keccak-256 is used wherever a value must match what the ledger computes
//! (addresses, fingerprint keys). SHA-256 (via `ring`) is used for local
//! verification tokens that never leave the device.

use ethers::utils::{hex, keccak256};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::PublicKey;
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};
use ethers::types::Address;

use crate::error::{Error, Result};

/// Computes a Keccak-256 hash of the input data (Ethereum-compatible).
///
/// # Arguments
/// * `data` - Binary data to hash (as bytes slice)
///
/// # Returns
/// Fixed-size 32-byte array (`[u8; 32]`) containing the hash.
pub fn hash_data(data: &[u8]) -> [u8; 32] {
    keccak256(data)
}

/// SHA-256 of `data`, lowercase hex encoded.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(digest::digest(&digest::SHA256, data).as_ref())
}

/// SHA-512 of `data`.
pub fn sha512(data: &[u8]) -> [u8; 64] {
    let mut out = [0u8; 64];
    out.copy_from_slice(digest::digest(&digest::SHA512, data).as_ref());
    out
}

/// Derives the Ethereum address of a secp256k1 public key.
///
/// The address is the last 20 bytes of the Keccak-256 hash of the
/// uncompressed point without its `0x04` prefix.
pub fn public_key_to_address(public_key: &PublicKey) -> Address {
    let encoded = public_key.to_encoded_point(false);
    let hash = hash_data(&encoded.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

/// Fills a fixed-size buffer from the system CSPRNG.
pub fn random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    SystemRandom::new()
        .fill(&mut buf)
        .map_err(|_| Error::StorageUnavailable("system random source unavailable".to_string()))?;
    Ok(buf)
}

/// Compares two byte strings without short-circuiting on the first difference.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    ring::constant_time::verify_slices_are_equal(a, b).is_ok()
}
