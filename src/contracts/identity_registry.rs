// src/contracts/identity_registry.rs
//! Identity Registry smart contract interface.
//!
//! The deployed registry is an ERC-721 style soulbound token contract keyed by
//! the Keccak-256 hash of the fingerprint ("bioHash"). This wrapper exposes it
//! as a [`CredentialLedger`]. Mint and recover wait for the transaction receipt
//! and then resolve the new token id from the registry's active-token index.

use async_trait::async_trait;
use ethers_contract::BaseContract;
use ethers_core::{
    abi::{Abi, Detokenize, Tokenize},
    types::{Address, H256, U256},
    utils::keccak256,
};
use log::{info, warn};

use crate::blockchain::zksync_client::ZkSyncClient;
use crate::error::{Error, LedgerRejection, Result};
use crate::ledger::CredentialLedger;
use crate::models::credential::{CredentialToken, PersonalFields, Suspicion, TokenId};
use crate::models::fingerprint::FingerprintKey;

const IDENTITY_REGISTRY_ABI: &[u8] = include_bytes!("../abi/IdentityRegistry.json");

/// Raw `identities(tokenId)` tuple:
/// (name, documentNumber, bioHash, kycTimestamp, isActive, previousTokenId, applicantId).
type IdentityTuple = (String, String, H256, U256, bool, U256, String);

/// Loads the bundled registry ABI.
pub fn registry_abi() -> Result<BaseContract> {
    let abi = Abi::load(IDENTITY_REGISTRY_ABI)
        .map_err(|e| Error::invalid_config(format!("identity registry ABI is invalid: {}", e)))?;
    Ok(BaseContract::from(abi))
}

/// `keccak256("MINTER_ROLE")`, the role allowed to mint.
pub fn minter_role() -> H256 {
    H256(keccak256(b"MINTER_ROLE"))
}

/// Identity Registry contract wrapper.
pub struct IdentityRegistry {
    client: ZkSyncClient,
    address: Address,
    abi: BaseContract,
}

impl IdentityRegistry {
    /// Creates a wrapper over the registry deployed at `address`.
    ///
    /// # Arguments
    /// * `client` - zkSync client; must carry a signer for mint and recover
    /// * `address` - Address of the deployed IdentityRegistry contract
    pub fn new(client: ZkSyncClient, address: Address) -> Result<Self> {
        Ok(IdentityRegistry {
            client,
            address,
            abi: registry_abi()?,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Grants the minter role. The client's signer must hold the admin role.
    pub async fn grant_minter(&self, account: Address) -> Result<()> {
        if self.is_minter(account).await? {
            info!("{:?} already holds the minter role", account);
            return Ok(());
        }
        self.client
            .send_transaction::<()>(self.address, &self.abi, "grantRole", (minter_role(), account))
            .await?;
        info!("granted minter role to {:?}", account);
        Ok(())
    }

    pub async fn is_minter(&self, account: Address) -> Result<bool> {
        self.query("hasRole", (minter_role(), account)).await
    }

    async fn query<R: Detokenize>(
        &self,
        method: &str,
        params: impl Tokenize,
    ) -> Result<R> {
        self.client
            .query_contract(self.address, &self.abi, method, params)
            .await
    }
}

fn to_token_id(value: U256) -> Result<TokenId> {
    u64::try_from(value).map_err(|_| Error::LedgerRejected(LedgerRejection::UnknownToken))
}

fn to_token(token_id: TokenId, owner: Address, identity: IdentityTuple) -> Result<CredentialToken> {
    let (name, document_number, bio_hash, kyc_timestamp, is_active, previous_token_id, applicant_id) =
        identity;
    if bio_hash.is_zero() {
        return Err(LedgerRejection::UnknownToken.into());
    }
    let previous = to_token_id(previous_token_id)?;
    let issued_at_secs = u64::try_from(kyc_timestamp).unwrap_or(u64::MAX / 1_000);
    Ok(CredentialToken {
        token_id,
        owner,
        personal_fields: PersonalFields {
            name,
            document_number,
            applicant_id,
        },
        fingerprint: FingerprintKey(bio_hash),
        issued_at: issued_at_secs.saturating_mul(1_000),
        is_active,
        previous_token_id: (previous != 0).then_some(previous),
    })
}

#[async_trait]
impl CredentialLedger for IdentityRegistry {
    fn signer(&self) -> Address {
        self.client.get_address()
    }

    async fn mint(
        &self,
        owner: Address,
        fields: &PersonalFields,
        fingerprint: FingerprintKey,
    ) -> Result<TokenId> {
        let params = (
            owner,
            fields.name.clone(),
            fields.document_number.clone(),
            fingerprint.0,
            fields.applicant_id.clone(),
        );
        self.client
            .send_transaction::<U256>(self.address, &self.abi, "mintIdentity", params)
            .await?;
        let (token_id, _) = self.active_token(fingerprint).await?;
        info!("minted credential token {} for {} to {:?}", token_id, fingerprint, owner);
        Ok(token_id)
    }

    async fn recover(&self, fingerprint: FingerprintKey, new_owner: Address) -> Result<TokenId> {
        self.client
            .send_transaction::<U256>(
                self.address,
                &self.abi,
                "recoverIdentity",
                (fingerprint.0, new_owner),
            )
            .await?;
        let (token_id, _) = self.active_token(fingerprint).await?;
        info!("recovered {} as token {} for {:?}", fingerprint, token_id, new_owner);

        let suspicion = self.is_suspicious(fingerprint).await?;
        if suspicion.flag {
            warn!("recovery history for {} is suspicious: {}", fingerprint, suspicion.reason.as_str());
        }
        Ok(token_id)
    }

    async fn active_token(&self, fingerprint: FingerprintKey) -> Result<(TokenId, Address)> {
        let (token_id, owner): (U256, Address) =
            self.query("getActiveTokenByBioHash", (fingerprint.0,)).await?;
        if token_id.is_zero() {
            return Err(LedgerRejection::NoActiveToken.into());
        }
        Ok((to_token_id(token_id)?, owner))
    }

    async fn owns_active(&self, owner: Address, fingerprint: FingerprintKey) -> Result<bool> {
        self.query("ownsActiveIdentity", (owner, fingerprint.0)).await
    }

    async fn token(&self, token_id: TokenId) -> Result<CredentialToken> {
        let identity: IdentityTuple = self.query("identities", (U256::from(token_id),)).await?;
        let owner: Address = self.query("ownerOf", (U256::from(token_id),)).await?;
        to_token(token_id, owner, identity)
    }

    async fn history(&self, fingerprint: FingerprintKey) -> Result<Vec<CredentialToken>> {
        let ids: Vec<U256> = self.query("getTokenHistory", (fingerprint.0,)).await?;
        let mut tokens = Vec::with_capacity(ids.len());
        for id in ids {
            tokens.push(self.token(to_token_id(id)?).await?);
        }
        Ok(tokens)
    }

    async fn revocation_count(&self, fingerprint: FingerprintKey) -> Result<u64> {
        let count: U256 = self.query("getRevocationCount", (fingerprint.0,)).await?;
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }

    async fn is_suspicious(&self, fingerprint: FingerprintKey) -> Result<Suspicion> {
        let (flag, reason): (bool, String) = self.query("isSuspicious", (fingerprint.0,)).await?;
        Ok(Suspicion::from_parts(flag, &reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fingerprint::Fingerprint;

    const ALICE: &str = "2bd806c97f0e00af1a1fc3328fa763a9269723c8db8fac4f93af71db186d6e90";

    #[test]
    fn test_bundled_abi_exposes_registry_functions() {
        let abi = registry_abi().unwrap();
        for name in [
            "mintIdentity",
            "recoverIdentity",
            "getActiveTokenByBioHash",
            "ownsActiveIdentity",
            "getTokenHistory",
            "getRevocationCount",
            "isSuspicious",
            "identities",
            "ownerOf",
            "grantRole",
            "hasRole",
        ] {
            assert!(abi.abi().function(name).is_ok(), "missing {}", name);
        }
        assert!(abi.abi().event("IdentityMinted").is_ok());
    }

    #[test]
    fn test_minter_role_hash() {
        assert_eq!(
            format!("{:?}", minter_role()),
            "0x9f2df0fed2c77648de5860a4cc508cd0818c85b8b8a1ab4ceeef8d981c8956a6"
        );
    }

    #[test]
    fn test_identity_tuple_conversion() {
        let fp = Fingerprint::new(ALICE).ledger_key();
        let owner = Address::from_low_u64_be(5);
        let tuple: IdentityTuple = (
            "Alice Example".to_string(),
            "123".to_string(),
            fp.0,
            U256::from(1_700_000_000u64),
            true,
            U256::from(2u64),
            "applicant-42".to_string(),
        );

        let token = to_token(3, owner, tuple).unwrap();
        assert_eq!(token.fingerprint, fp);
        assert_eq!(token.issued_at, 1_700_000_000_000);
        assert_eq!(token.previous_token_id, Some(2));
        assert_eq!(token.personal_fields.applicant_id, "applicant-42");
    }

    #[test]
    fn test_genesis_and_missing_tokens() {
        let fp = Fingerprint::new(ALICE).ledger_key();
        let genesis: IdentityTuple = (
            "Alice".into(),
            "1".into(),
            fp.0,
            U256::one(),
            true,
            U256::zero(),
            "a".into(),
        );
        assert_eq!(to_token(1, Address::zero(), genesis).unwrap().previous_token_id, None);

        let missing: IdentityTuple = (
            String::new(),
            String::new(),
            H256::zero(),
            U256::zero(),
            false,
            U256::zero(),
            String::new(),
        );
        assert!(matches!(
            to_token(9, Address::zero(), missing),
            Err(Error::LedgerRejected(LedgerRejection::UnknownToken))
        ));
    }
}
