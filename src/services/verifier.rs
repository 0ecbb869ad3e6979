// src/services/verifier.rs
//! Wallet and credential verification service.
//!
//! Answers two questions for relying parties: does a wallet address belong to
//! a fingerprint, and is a given credential token still the active one.

use std::sync::Arc;

use ethers::types::Address;
use log::debug;
use serde::Serialize;

use crate::error::{Error, LedgerRejection, Result};
use crate::ledger::CredentialLedger;
use crate::models::credential::{CredentialToken, TokenId};
use crate::models::fingerprint::Fingerprint;
use crate::models::key_material::DerivationConfig;
use crate::wallet::key_derivation::KeyDerivationEngine;

/// Result of [`Verifier::validate_wallet`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletValidation {
    /// Whether the provided address is the fingerprint's derived address.
    pub valid: bool,
    pub expected_address: Address,
    pub provided_address: String,
    /// The fingerprint's active token, when the address is valid and one exists.
    pub active_token: Option<CredentialToken>,
}

/// Verifier backed by a derivation engine and a credential ledger.
///
/// The Verifier provides:
/// - Address-to-fingerprint validation
/// - Active credential checks by token id
#[derive(Clone)]
pub struct Verifier {
    engine: KeyDerivationEngine,
    derivation: DerivationConfig,
    ledger: Arc<dyn CredentialLedger>,
}

impl Verifier {
    /// Constructs a new Verifier instance.
    ///
    /// # Arguments
    /// * `engine` - Rate-limited derivation engine
    /// * `derivation` - Derivation parameters the wallets were created with
    /// * `ledger` - Credential ledger to consult
    pub fn new(
        engine: KeyDerivationEngine,
        derivation: DerivationConfig,
        ledger: Arc<dyn CredentialLedger>,
    ) -> Self {
        Self {
            engine,
            derivation,
            ledger,
        }
    }

    /// Checks that `address` derives from `fingerprint` and looks up its credential.
    ///
    /// # Returns
    /// - `valid == false` if the address does not match (the ledger is not queried)
    /// - `valid == true` with `active_token == None` if the fingerprint has no token yet
    ///
    /// # Errors
    /// Derivation errors, and ledger errors other than "no active token".
    pub async fn validate_wallet(&self, address: &str, fingerprint: &Fingerprint) -> Result<WalletValidation> {
        let expected_address = self.engine.derive_address(fingerprint, &self.derivation, None)?;
        let valid = address
            .trim()
            .parse::<Address>()
            .map_or(false, |candidate| candidate == expected_address);

        let mut validation = WalletValidation {
            valid,
            expected_address,
            provided_address: address.to_string(),
            active_token: None,
        };
        if !valid {
            debug!("address {} does not match fingerprint", address);
            return Ok(validation);
        }

        match self.ledger.active_token(fingerprint.ledger_key()).await {
            Ok((token_id, _)) => validation.active_token = Some(self.ledger.token(token_id).await?),
            Err(Error::LedgerRejected(LedgerRejection::NoActiveToken)) => {
                debug!("address {} is valid but has no credential yet", address);
            }
            Err(err) => return Err(err),
        }
        Ok(validation)
    }

    /// Verifies that `token_id` exists and is the active token of its chain.
    ///
    /// # Returns
    /// - `Ok(true)` if the token is active
    /// - `Ok(false)` if it was revoked or never existed
    pub async fn verify_credential(&self, token_id: TokenId) -> Result<bool> {
        match self.ledger.token(token_id).await {
            Ok(token) => Ok(token.is_active),
            Err(Error::LedgerRejected(LedgerRejection::UnknownToken)) => Ok(false),
            Err(err) => Err(err),
        }
    }
}
