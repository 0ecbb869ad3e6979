// src/models/credential.rs
//! Credential token data model.
//!
//! A credential token is a soulbound ledger record binding a fingerprint to an
//! owner address. Tokens issued for the same fingerprint form a singly-linked
//! chain through `previous_token_id`; only the tail of the chain is active.

use ethers::types::Address;
use serde::{Deserialize, Serialize};

use super::fingerprint::FingerprintKey;

/// Ledger token identifier. Ids start at 1 and strictly increase.
pub type TokenId = u64;

/// Identity data copied verbatim into every token of a chain.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PersonalFields {
    /// Full legal name of the verified person.
    pub name: String,
    /// Identity document number.
    pub document_number: String,
    /// Applicant id assigned by the biometric verification provider.
    pub applicant_id: String,
}

/// A credential token as recorded by the ledger.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CredentialToken {
    pub token_id: TokenId,
    pub owner: Address,
    pub personal_fields: PersonalFields,
    /// Ledger key of the fingerprint; the raw fingerprint never reaches the ledger.
    pub fingerprint: FingerprintKey,
    /// Issuance time, milliseconds since the Unix epoch.
    pub issued_at: u64,
    pub is_active: bool,
    /// `None` for the genesis token of a chain.
    pub previous_token_id: Option<TokenId>,
}

/// Parallel-array view over a fingerprint's token chain.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct FullHistory {
    pub token_ids: Vec<TokenId>,
    pub records: Vec<CredentialToken>,
    pub active_flags: Vec<bool>,
}

impl FullHistory {
    pub fn from_tokens(tokens: Vec<CredentialToken>) -> Self {
        FullHistory {
            token_ids: tokens.iter().map(|t| t.token_id).collect(),
            active_flags: tokens.iter().map(|t| t.is_active).collect(),
            records: tokens,
        }
    }

    pub fn len(&self) -> usize {
        self.token_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.token_ids.is_empty()
    }
}

/// Why a fingerprint's history was, or was not, flagged.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspicionReason {
    Normal,
    TooManyRevocations,
    RapidRevocations,
}

impl SuspicionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuspicionReason::Normal => "normal",
            SuspicionReason::TooManyRevocations => "too many revocations",
            SuspicionReason::RapidRevocations => "rapid revocations",
        }
    }
}

/// Result of an anomaly check over a fingerprint's recovery history.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Suspicion {
    pub flag: bool,
    pub reason: SuspicionReason,
}

impl Suspicion {
    pub fn normal() -> Self {
        Suspicion {
            flag: false,
            reason: SuspicionReason::Normal,
        }
    }

    pub fn flagged(reason: SuspicionReason) -> Self {
        Suspicion { flag: true, reason }
    }

    /// Builds a suspicion from an on-chain `(bool, string)` pair.
    pub fn from_parts(flag: bool, reason: &str) -> Self {
        let reason = match reason {
            "too many revocations" => SuspicionReason::TooManyRevocations,
            "rapid revocations" => SuspicionReason::RapidRevocations,
            _ => SuspicionReason::Normal,
        };
        Suspicion { flag, reason }
    }

    /// `(flag, reason)` as the ledger reports it.
    pub fn as_tuple(&self) -> (bool, &'static str) {
        (self.flag, self.reason.as_str())
    }
}

/// Derived view over a fingerprint's token chain.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CredentialHistory {
    /// Tokens ordered from genesis to the active tail.
    pub tokens: Vec<CredentialToken>,
    /// Chain length minus one.
    pub revocation_count: u64,
    pub suspicion: Suspicion,
}

impl CredentialHistory {
    /// The active tail, if the chain is non-empty.
    pub fn active(&self) -> Option<&CredentialToken> {
        self.tokens.last().filter(|t| t.is_active)
    }
}
