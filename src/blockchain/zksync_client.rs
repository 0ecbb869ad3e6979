// src/blockchain/zksync_client.rs
//! zkSync blockchain client implementation.
//!
//! Provides a high-level interface for interacting with zkSync Era: signed
//! contract transactions that wait for their receipt, and read-only contract
//! queries. Contract reverts surface as [`Error::LedgerRejected`]; transport
//! problems surface as [`Error::NetworkFailure`].

use std::sync::Arc;

use ethers_contract::{BaseContract, ContractError};
use ethers_core::{
    abi::{Detokenize, Tokenize},
    types::{Address, TransactionReceipt, U256},
    utils::hex,
};
use k256::ecdsa::SigningKey;
use log::{debug, info};
use zeroize::Zeroizing;
use zksync_web3_rs::{
    contract::Contract,
    providers::{Http, Middleware, Provider},
    signers::{Signer, Wallet},
    zks_wallet::ZKSWallet,
};

use crate::error::{Error, LedgerRejection, Result};
use crate::models::key_material::{KeyMaterial, PRIVATE_KEY_LENGTH};

/// Gas limit attached to every state-changing call.
pub const DEFAULT_GAS_LIMIT: u64 = 3_000_000;

type EraWallet = ZKSWallet<Provider<Http>, SigningKey>;

/// zkSync client for contract interactions.
///
/// A client built with [`ZkSyncClient::read_only`] can query but not send.
#[derive(Clone)]
pub struct ZkSyncClient {
    /// zkSync RPC provider
    provider: Arc<Provider<Http>>,
    /// Signing wallet, absent for read-only clients
    wallet: Option<EraWallet>,
}

impl ZkSyncClient {
    /// Creates a signing client.
    ///
    /// # Arguments
    /// * `rpc_url` - zkSync RPC endpoint URL
    /// * `private_key` - Hex-encoded private key (with or without 0x prefix)
    ///
    /// # Errors
    /// - [`Error::InvalidConfig`] if the URL or private key is invalid
    /// - [`Error::NetworkFailure`] if the chain id cannot be retrieved
    pub async fn new(rpc_url: &str, private_key: &str) -> Result<Self> {
        let provider = Arc::new(connect(rpc_url)?);
        let key_material = parse_private_key(private_key)?;
        let signing_key = SigningKey::from(key_material.secret_key());

        let chain_id = provider
            .get_chainid()
            .await
            .map_err(|e| Error::NetworkFailure(format!("chain id unavailable: {}", e)))?
            .as_u64();
        let l2_wallet = Wallet::from(signing_key).with_chain_id(chain_id);

        let wallet = ZKSWallet::new(l2_wallet, None, Some((*provider).clone()), None)
            .map_err(|e| Error::invalid_config(format!("wallet initialisation failed: {}", e)))?;

        info!("zkSync client connected to chain {} as {:?}", chain_id, wallet.l2_address());
        Ok(Self {
            provider,
            wallet: Some(wallet),
        })
    }

    /// Creates a client that can only query.
    pub fn read_only(rpc_url: &str) -> Result<Self> {
        Ok(Self {
            provider: Arc::new(connect(rpc_url)?),
            wallet: None,
        })
    }

    /// The wallet's L2 address, or the zero address for read-only clients.
    pub fn get_address(&self) -> Address {
        self.wallet
            .as_ref()
            .map_or_else(Address::zero, |wallet| wallet.l2_address())
    }

    /// Sends a contract transaction and waits for it to be mined.
    ///
    /// The call is simulated first so that a revert reason is reported
    /// instead of a bare failed receipt.
    ///
    /// # Arguments
    /// * `contract_address` - Address of the target contract
    /// * `abi` - Contract ABI
    /// * `method` - Method name to call
    /// * `params` - Method parameters
    ///
    /// # Errors
    /// - [`Error::LedgerRejected`] if the call reverts or the receipt reports failure
    /// - [`Error::NetworkFailure`] if the transaction cannot be submitted or tracked
    ///
    /// # Gas Usage
    /// Uses fixed gas limit of [`DEFAULT_GAS_LIMIT`]
    pub async fn send_transaction<R: Detokenize>(
        &self,
        contract_address: Address,
        abi: &BaseContract,
        method: &str,
        params: impl Tokenize,
    ) -> Result<TransactionReceipt> {
        let wallet = self
            .wallet
            .as_ref()
            .ok_or_else(|| Error::invalid_config("ledger client has no signer configured"))?;
        let era_provider = wallet
            .get_era_provider()
            .map_err(|e| Error::invalid_config(format!("no era provider: {}", e)))?;

        let contract = Contract::new(contract_address, abi.clone(), era_provider);
        let call = contract
            .method::<_, R>(method, params)
            .map_err(|e| Error::invalid_config(format!("cannot encode {}: {}", method, e)))?
            .gas(U256::from(DEFAULT_GAS_LIMIT));

        call.call().await.map_err(map_contract_error)?;

        let pending = call.send().await.map_err(map_contract_error)?;
        let tx_hash = pending.tx_hash();
        debug!("{} submitted as {:?}", method, tx_hash);

        let receipt = pending
            .await
            .map_err(|e| Error::NetworkFailure(format!("awaiting receipt for {:?}: {}", tx_hash, e)))?
            .ok_or_else(|| Error::NetworkFailure(format!("transaction {:?} was dropped", tx_hash)))?;

        if receipt.status != Some(1u64.into()) {
            return Err(LedgerRejection::Reverted(format!("{} failed in transaction {:?}", method, tx_hash)).into());
        }
        info!("{} confirmed in block {:?}", method, receipt.block_number);
        Ok(receipt)
    }

    /// Queries a smart contract (read-only operation).
    ///
    /// # Arguments
    /// * `contract_address` - Address of the target contract
    /// * `abi` - Contract ABI
    /// * `method` - Method name to call
    /// * `params` - Method parameters
    ///
    /// # Returns
    /// Decoded return value from the contract call
    pub async fn query_contract<R: Detokenize>(
        &self,
        contract_address: Address,
        abi: &BaseContract,
        method: &str,
        params: impl Tokenize,
    ) -> Result<R> {
        let contract = Contract::new(contract_address, abi.clone(), self.provider.clone());

        contract
            .method::<_, R>(method, params)
            .map_err(|e| Error::invalid_config(format!("cannot encode {}: {}", method, e)))?
            .call()
            .await
            .map_err(map_contract_error)
    }
}

fn connect(rpc_url: &str) -> Result<Provider<Http>> {
    Provider::<Http>::try_from(rpc_url)
        .map_err(|e| Error::invalid_config(format!("invalid RPC url {}: {}", rpc_url, e)))
}

fn parse_private_key(private_key: &str) -> Result<KeyMaterial> {
    let bytes = Zeroizing::new(
        hex::decode(private_key.trim().trim_start_matches("0x"))
            .map_err(|_| Error::invalid_config("signer private key is not hex"))?,
    );
    let bytes: &[u8; PRIVATE_KEY_LENGTH] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| Error::invalid_config("signer private key must be 32 bytes"))?;
    KeyMaterial::from_private_key(bytes)
}

/// Splits contract errors into terminal reverts and retryable transport failures.
pub(crate) fn map_contract_error<M: Middleware>(err: ContractError<M>) -> Error {
    if err.is_revert() {
        let reason = err
            .decode_revert::<String>()
            .unwrap_or_else(|| "execution reverted".to_string());
        return Error::LedgerRejected(LedgerRejection::from_revert_reason(&reason));
    }
    match err {
        ContractError::ContractNotDeployed => {
            Error::invalid_config("no contract deployed at the registry address")
        }
        ContractError::DecodingError(e) => Error::NetworkFailure(format!("undecodable response: {}", e)),
        other => Error::NetworkFailure(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers_core::abi::{self, Token};
    use ethers_core::types::Bytes;

    fn revert_data(reason: &str) -> Bytes {
        let mut data = vec![0x08, 0xc3, 0x79, 0xa0];
        data.extend(abi::encode(&[Token::String(reason.to_string())]));
        data.into()
    }

    #[test]
    fn test_revert_maps_to_ledger_rejection() {
        let err = ContractError::<Provider<Http>>::Revert(revert_data("IdentityNFT: caller is not owner"));
        assert!(matches!(
            map_contract_error(err),
            Error::LedgerRejected(LedgerRejection::NotOwner)
        ));
    }

    #[test]
    fn test_undeployed_contract_is_config_error() {
        let err = ContractError::<Provider<Http>>::ContractNotDeployed;
        assert!(matches!(map_contract_error(err), Error::InvalidConfig { .. }));
    }

    #[test]
    fn test_read_only_client_has_no_signer() {
        let client = ZkSyncClient::read_only("http://127.0.0.1:3050").unwrap();
        assert_eq!(client.get_address(), Address::zero());
        assert!(ZkSyncClient::read_only("not a url").is_err());
    }

    #[test]
    fn test_private_key_parsing() {
        let key = format!("0x{}", "00".repeat(31) + "01");
        let material = parse_private_key(&key).unwrap();
        assert_eq!(
            material.address_string(),
            "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf"
        );
        assert!(parse_private_key("abcd").is_err());
        assert!(parse_private_key("zz").is_err());
    }
}
