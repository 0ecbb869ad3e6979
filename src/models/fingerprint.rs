// src/models/fingerprint.rs
//! Biometric fingerprint handling.
//!
//! A fingerprint is an opaque hexadecimal string produced by the biometric
//! verification provider. It is the root of key derivation and must never be
//! persisted in plaintext. Two one-way projections are used instead:
//! - [`Fingerprint::digest`]: SHA-256, the local vault's verification token
//! - [`Fingerprint::ledger_key`]: Keccak-256, the identifier the ledger indexes by

use std::collections::HashMap;
use std::fmt;

use ethers::types::H256;
use ethers::utils::hex;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};
use crate::utils::crypto::{hash_data, sha256_hex};

/// Minimum number of hex characters accepted.
pub const MIN_FINGERPRINT_LENGTH: usize = 32;

/// Minimum Shannon entropy, in bits per symbol, of the decoded fingerprint bytes.
pub const MIN_ENTROPY_BITS: f64 = 4.0;

/// Slack below the `log2(symbols)` ceiling a short fingerprint is allowed.
///
/// Sixteen random bytes collide often enough that the ceiling itself would
/// reject a large share of minimum-length values.
pub const ENTROPY_TOLERANCE_BITS: f64 = 1.0;

/// Raw biometric fingerprint. Zeroized on drop, redacted in `Debug`.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wraps a provider value without validating it.
    ///
    /// Validation is deferred to [`Fingerprint::validate`] so that callers such
    /// as the derivation engine can order it after rate limiting.
    pub fn new(value: impl Into<String>) -> Self {
        Fingerprint(value.into())
    }

    /// Wraps and validates in one step.
    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let fingerprint = Self::new(value);
        fingerprint.validate()?;
        Ok(fingerprint)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Checks length, charset and entropy.
    ///
    /// # Errors
    /// [`Error::InvalidFingerprint`] naming the first rule that failed.
    pub fn validate(&self) -> Result<()> {
        let value = self.0.as_str();
        if value.len() < MIN_FINGERPRINT_LENGTH {
            return Err(Error::invalid_fingerprint(format!(
                "must be at least {} characters, got {}",
                MIN_FINGERPRINT_LENGTH,
                value.len()
            )));
        }
        if !is_hex(value) {
            return Err(Error::invalid_fingerprint(
                "must contain only hexadecimal characters",
            ));
        }
        let entropy = shannon_entropy(value);
        let required = required_entropy_bits(value);
        if entropy < required {
            return Err(Error::invalid_fingerprint(format!(
                "entropy {:.2} bits/symbol is below the {:.2} minimum",
                entropy, required
            )));
        }
        Ok(())
    }

    /// Hex SHA-256 of the fingerprint, stored by the vault.
    pub fn digest(&self) -> String {
        sha256_hex(self.0.as_bytes())
    }

    /// Keccak-256 of the fingerprint, the ledger's `bytes32` identifier.
    pub fn ledger_key(&self) -> FingerprintKey {
        FingerprintKey(H256::from(hash_data(self.0.as_bytes())))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({}…)", &self.digest()[..8])
    }
}

/// One-way ledger identifier of a fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FingerprintKey(pub H256);

impl FingerprintKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_fixed_bytes()
    }
}

impl fmt::Display for FingerprintKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0.as_bytes()))
    }
}

/// Non-throwing quality report for a candidate fingerprint.
#[derive(Debug, Clone, Serialize)]
pub struct FingerprintQuality {
    pub length: usize,
    pub entropy_bits: f64,
    pub is_hex: bool,
    pub is_valid: bool,
    /// One entry per failed rule; empty when the fingerprint is acceptable.
    pub recommendations: Vec<String>,
}

/// Reports every rule a candidate fingerprint breaks.
pub fn analyze_fingerprint(value: &str) -> FingerprintQuality {
    let length = value.len();
    let hex_only = is_hex(value);
    let entropy_bits = if hex_only { shannon_entropy(value) } else { 0.0 };
    let mut recommendations = Vec::new();

    if length < MIN_FINGERPRINT_LENGTH {
        recommendations.push(format!(
            "fingerprint should have at least {} characters",
            MIN_FINGERPRINT_LENGTH
        ));
    }
    if !hex_only {
        recommendations.push("fingerprint should contain only hexadecimal characters".to_string());
    } else if entropy_bits < required_entropy_bits(value) {
        recommendations.push(format!(
            "fingerprint is too predictable ({:.2} bits/symbol, need {:.2})",
            entropy_bits,
            required_entropy_bits(value)
        ));
    }

    FingerprintQuality {
        length,
        entropy_bits,
        is_hex: hex_only,
        is_valid: recommendations.is_empty(),
        recommendations,
    }
}

fn is_hex(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_hexdigit())
}

/// Entropy a fingerprint of this length must reach.
///
/// `n` symbols can carry at most `log2(n)` bits each, so for short values the
/// [`MIN_ENTROPY_BITS`] floor is lowered to that ceiling minus
/// [`ENTROPY_TOLERANCE_BITS`].
pub fn required_entropy_bits(value: &str) -> f64 {
    let symbols = ((value.len() + 1) / 2).max(1) as f64;
    MIN_ENTROPY_BITS.min(symbols.log2() - ENTROPY_TOLERANCE_BITS)
}

/// Shannon entropy over the decoded byte distribution of a hex string.
///
/// Each pair of hex digits is one symbol; an odd-length string is read with an
/// implicit leading `0` nibble. Non-hex input yields `0.0`.
pub fn shannon_entropy(value: &str) -> f64 {
    let nibbles: Option<Vec<u8>> = value
        .chars()
        .map(|c| c.to_digit(16).map(|d| d as u8))
        .collect();
    let mut nibbles = match nibbles {
        Some(n) if !n.is_empty() => n,
        _ => return 0.0,
    };
    if nibbles.len() % 2 == 1 {
        nibbles.insert(0, 0);
    }

    let mut counts: HashMap<u8, usize> = HashMap::new();
    for pair in nibbles.chunks(2) {
        *counts.entry((pair[0] << 4) | pair[1]).or_insert(0) += 1;
    }
    let total = (nibbles.len() / 2) as f64;
    counts
        .values()
        .map(|&count| {
            let p = count as f64 / total;
            -p * p.log2()
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: &str = "2bd806c97f0e00af1a1fc3328fa763a9269723c8db8fac4f93af71db186d6e90";

    #[test]
    fn test_sha256_shaped_fingerprint_is_valid() {
        assert!(Fingerprint::parse(ALICE).is_ok());
        let quality = analyze_fingerprint(ALICE);
        assert_eq!(quality.length, 64);
        assert!(quality.is_valid);
        assert!(quality.recommendations.is_empty());
    }

    #[test]
    fn test_short_fingerprint_rejected() {
        let err = Fingerprint::parse("abc123").unwrap_err();
        assert!(matches!(err, Error::InvalidFingerprint { .. }));

        let quality = analyze_fingerprint("short");
        assert!(!quality.is_valid);
        assert!(quality.recommendations[0].contains("at least 32 characters"));
    }

    #[test]
    fn test_non_hex_rejected() {
        let value = format!("{}zz", &ALICE[..40]);
        match Fingerprint::parse(value) {
            Err(Error::InvalidFingerprint { reason }) => assert!(reason.contains("hexadecimal")),
            other => panic!("expected charset rejection, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_repetitive_fingerprint_rejected_for_entropy() {
        let repetitive = "a1b2c3d4e5f6".repeat(5);
        assert!(shannon_entropy(&repetitive) < MIN_ENTROPY_BITS);
        match Fingerprint::parse(repetitive) {
            Err(Error::InvalidFingerprint { reason }) => assert!(reason.contains("entropy")),
            other => panic!("expected entropy rejection, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_random_minimum_length_fingerprints_accepted() {
        for i in 0..1000 {
            let candidate = sha256_hex(format!("enrollment-{}", i).as_bytes());
            let candidate = &candidate[..MIN_FINGERPRINT_LENGTH];
            assert!(
                Fingerprint::parse(candidate).is_ok(),
                "rejected {} ({:.2} bits)",
                candidate,
                shannon_entropy(candidate)
            );
            assert!(analyze_fingerprint(candidate).is_valid);
        }
    }

    #[test]
    fn test_required_entropy_scales_with_length() {
        assert_eq!(required_entropy_bits(&"0".repeat(32)), 3.0);
        assert_eq!(required_entropy_bits(ALICE), MIN_ENTROPY_BITS);
        assert!(Fingerprint::parse("ab".repeat(16)).is_err());
        assert!(!analyze_fingerprint(&"01234567".repeat(4)).is_valid);
    }

    #[test]
    fn test_entropy_of_constant_input_is_zero() {
        assert_eq!(shannon_entropy(&"ab".repeat(32)), 0.0);
    }

    #[test]
    fn test_odd_length_is_padded() {
        // "f" alone decodes to a single 0x0f symbol.
        assert_eq!(shannon_entropy("f"), 0.0);
        assert_eq!(shannon_entropy("0f"), shannon_entropy("f"));
    }

    #[test]
    fn test_projections_are_distinct_and_stable() {
        let fp = Fingerprint::new(ALICE);
        assert_eq!(fp.digest(), fp.clone().digest());
        assert_ne!(fp.digest(), hex::encode(fp.ledger_key().as_bytes()));
        assert!(!format!("{:?}", fp).contains(ALICE));
    }
}
