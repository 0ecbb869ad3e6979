// src/services/identity_service.rs
//! Identity issuance service.
//!
//! Composes the core components into the two user journeys:
//! - Enrollment: derive the keypair, seal it in the vault, mint the genesis token
//! - Restoration on a new device: re-derive, prove the derived address owns the
//!   active token, then seal the key locally

use std::sync::Arc;

use ethers::types::Address;
use log::{error, info};
use serde::Serialize;

use crate::error::{Error, LedgerRejection, Result};
use crate::ledger::CredentialLedger;
use crate::models::credential::{PersonalFields, TokenId};
use crate::models::fingerprint::Fingerprint;
use crate::models::key_material::DerivationConfig;
use crate::wallet::credential_storage::VaultStore;
use crate::wallet::key_derivation::KeyDerivationEngine;
use crate::wallet::vault::{CredentialVault, UnlockedCredential};

/// Outcome of a successful enrollment or restoration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityReceipt {
    pub address: Address,
    pub token_id: TokenId,
}

/// Service tying derivation, the local vault and the ledger together.
pub struct IdentityService<S> {
    engine: KeyDerivationEngine,
    derivation: DerivationConfig,
    vault: Arc<CredentialVault<S>>,
    ledger: Arc<dyn CredentialLedger>,
}

impl<S> Clone for IdentityService<S> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            derivation: self.derivation.clone(),
            vault: self.vault.clone(),
            ledger: self.ledger.clone(),
        }
    }
}

impl<S: VaultStore> IdentityService<S> {
    /// Creates a new IdentityService instance
    ///
    /// # Arguments
    /// * `engine` - Rate-limited derivation engine
    /// * `derivation` - Pinned derivation parameters for this deployment
    /// * `vault` - Local encrypted vault
    /// * `ledger` - Credential ledger; its signer must hold the minter role
    pub fn new(
        engine: KeyDerivationEngine,
        derivation: DerivationConfig,
        vault: Arc<CredentialVault<S>>,
        ledger: Arc<dyn CredentialLedger>,
    ) -> Result<Self> {
        derivation.validate()?;
        Ok(Self {
            engine,
            derivation,
            vault,
            ledger,
        })
    }

    pub fn vault(&self) -> &CredentialVault<S> {
        &self.vault
    }

    pub fn ledger(&self) -> &Arc<dyn CredentialLedger> {
        &self.ledger
    }

    /// Enrolls a newly verified person.
    ///
    /// # Process Flow
    /// 1. Derives the keypair (rate limited)
    /// 2. Seals it in the vault under `password`
    /// 3. Mints the genesis credential token to the derived address
    ///
    /// # Errors
    /// Derivation, vault and ledger errors are returned unchanged. A ledger
    /// failure leaves the sealed key in the vault so minting can be retried.
    pub async fn enroll(
        &self,
        fingerprint: &Fingerprint,
        password: &str,
        fields: &PersonalFields,
    ) -> Result<IdentityReceipt> {
        let key = self.engine.derive(fingerprint, &self.derivation, None)?;
        self.vault.save(&key, password, fingerprint)?;

        let token_id = self
            .ledger
            .mint(key.address(), fields, fingerprint.ledger_key())
            .await
            .map_err(|err| {
                error!("mint for {} failed: {}", key.address_string(), err);
                err
            })?;

        info!("enrolled {} as token {}", key.address_string(), token_id);
        Ok(IdentityReceipt {
            address: key.address(),
            token_id,
        })
    }

    /// Restores an identity on a device with an empty vault.
    ///
    /// # Errors
    /// - [`LedgerRejection::NoActiveToken`] if the fingerprint was never enrolled
    /// - [`LedgerRejection::NotOwner`] if the active token belongs to another
    ///   address, for example after a recovery to a different owner
    pub async fn restore(&self, fingerprint: &Fingerprint, password: &str) -> Result<IdentityReceipt> {
        let key = self.engine.derive(fingerprint, &self.derivation, None)?;
        let (token_id, owner) = self.ledger.active_token(fingerprint.ledger_key()).await?;
        if owner != key.address() {
            return Err(Error::LedgerRejected(LedgerRejection::NotOwner));
        }

        self.vault.save(&key, password, fingerprint)?;
        info!("restored {} with active token {}", key.address_string(), token_id);
        Ok(IdentityReceipt {
            address: key.address(),
            token_id,
        })
    }

    /// Unlocks the local vault.
    pub fn unlock(&self, password: &str) -> Result<Option<UnlockedCredential>> {
        self.vault.load(password)
    }
}
