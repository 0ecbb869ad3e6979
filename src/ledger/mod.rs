// src/ledger/mod.rs
//! Credential ledger interface.
//!
//! A ledger binds each fingerprint to exactly one active, non-transferable
//! credential token and keeps the chain of revoked predecessors. Two
//! implementations exist: [`local::LocalLedger`], an in-process state machine
//! with a single total order, and
//! [`crate::contracts::identity_registry::IdentityRegistry`], the deployed
//! contract reached over RPC.
//!
//! Concurrent `recover` calls for one fingerprint are serialised by the ledger
//! itself: the loser observes a stale active token and is rejected.

pub mod local;

use async_trait::async_trait;
use ethers::types::Address;
use serde::{Deserialize, Serialize};

use crate::error::{Error, LedgerRejection, Result};
use crate::models::credential::{
    CredentialHistory, CredentialToken, FullHistory, PersonalFields, Suspicion, SuspicionReason,
    TokenId,
};
use crate::models::fingerprint::FingerprintKey;

/// Operations every credential ledger supports.
#[async_trait]
pub trait CredentialLedger: Send + Sync {
    /// Address that signs transactions submitted through this handle.
    fn signer(&self) -> Address;

    /// Mints a genesis token for `fingerprint`.
    ///
    /// # Errors
    /// - [`LedgerRejection::NotMinter`] if the signer lacks the minter role
    /// - [`LedgerRejection::ActiveTokenExists`] if the fingerprint is already bound
    async fn mint(
        &self,
        owner: Address,
        fields: &PersonalFields,
        fingerprint: FingerprintKey,
    ) -> Result<TokenId>;

    /// Revokes the active token and mints its successor for `new_owner`.
    ///
    /// # Errors
    /// - [`LedgerRejection::NoActiveToken`] for an unregistered fingerprint
    /// - [`LedgerRejection::NotOwner`] if the signer does not own the active token
    async fn recover(&self, fingerprint: FingerprintKey, new_owner: Address) -> Result<TokenId>;

    /// `(token_id, owner)` of the active token.
    async fn active_token(&self, fingerprint: FingerprintKey) -> Result<(TokenId, Address)>;

    async fn owns_active(&self, owner: Address, fingerprint: FingerprintKey) -> Result<bool>;

    /// Looks up a token by id.
    async fn token(&self, token_id: TokenId) -> Result<CredentialToken>;

    /// The fingerprint's chain ordered from genesis to tail. Empty when unregistered.
    async fn history(&self, fingerprint: FingerprintKey) -> Result<Vec<CredentialToken>>;

    async fn full_history(&self, fingerprint: FingerprintKey) -> Result<FullHistory> {
        Ok(FullHistory::from_tokens(self.history(fingerprint).await?))
    }

    /// Chain length minus one; zero when unregistered.
    async fn revocation_count(&self, fingerprint: FingerprintKey) -> Result<u64>;

    async fn is_suspicious(&self, fingerprint: FingerprintKey) -> Result<Suspicion>;

    /// Chain, revocation count and suspicion in one view.
    async fn credential_history(&self, fingerprint: FingerprintKey) -> Result<CredentialHistory> {
        let tokens = self.history(fingerprint).await?;
        let suspicion = self.is_suspicious(fingerprint).await?;
        Ok(CredentialHistory {
            revocation_count: tokens.len().saturating_sub(1) as u64,
            tokens,
            suspicion,
        })
    }

    /// Credential tokens are soulbound; every transfer is rejected.
    async fn transfer(&self, _from: Address, _to: Address, _token_id: TokenId) -> Result<()> {
        Err(Error::LedgerRejected(LedgerRejection::NonTransferable))
    }
}

/// Thresholds for flagging anomalous recovery histories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuspicionPolicy {
    /// More revocations than this is flagged as "too many revocations".
    pub max_revocations: u64,
    /// Number of most recent recoveries examined for clustering.
    pub rapid_revocation_count: usize,
    /// The examined recoveries are "rapid" when they all fall within this window.
    pub rapid_window_secs: u64,
}

impl Default for SuspicionPolicy {
    fn default() -> Self {
        Self {
            max_revocations: 5,
            rapid_revocation_count: 3,
            rapid_window_secs: 3_600,
        }
    }
}

impl SuspicionPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.rapid_revocation_count < 2 {
            return Err(Error::invalid_config(
                "suspicion rapid_revocation_count must be at least 2",
            ));
        }
        if self.rapid_window_secs == 0 {
            return Err(Error::invalid_config("suspicion rapid_window_secs must be positive"));
        }
        Ok(())
    }

    /// Classifies a history.
    ///
    /// # Arguments
    /// * `revocation_count` - Chain length minus one
    /// * `recovery_times_ms` - Recovery timestamps in ascending order
    pub fn evaluate(&self, revocation_count: u64, recovery_times_ms: &[u64]) -> Suspicion {
        if revocation_count > self.max_revocations {
            return Suspicion::flagged(SuspicionReason::TooManyRevocations);
        }

        let k = self.rapid_revocation_count;
        if k >= 2 && recovery_times_ms.len() >= k {
            let recent = &recovery_times_ms[recovery_times_ms.len() - k..];
            let span_ms = recent[k - 1].saturating_sub(recent[0]);
            if span_ms <= self.rapid_window_secs.saturating_mul(1_000) {
                return Suspicion::flagged(SuspicionReason::RapidRevocations);
            }
        }

        Suspicion::normal()
    }
}
