// src/main.rs

//! # Biometric Identity Vault - Command Line Entry Point
//!
//! ## Commands
//! - `derive-address <fingerprint>`: print the deterministic address
//! - `analyze <fingerprint>`: fingerprint quality report
//! - `rate-limit <identifier>`: current limiter state for an identifier
//! - `manifest`: non-secret vault manifest (password read from stdin)
//! - `ledger-status <fingerprint>`: on-chain credential history
//! - `grant-minter <address>`: grant the registry minter role
//!
//! ## Environment Variables
//! - `BIOID_CONFIG`: (Optional) settings file (default: bioid.toml)
//! - `BIOID__<SECTION>__<KEY>`: (Optional) setting overrides
//! - `BIOID_SIGNER_KEY`: registry admin private key, for `grant-minter`
//! - `RUST_LOG`: log filter (default: info)

use std::io::BufRead;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use bioid_vault::blockchain::zksync_client::ZkSyncClient;
use bioid_vault::config::Settings;
use bioid_vault::contracts::identity_registry::IdentityRegistry;
use bioid_vault::ledger::CredentialLedger;
use bioid_vault::models::fingerprint::{analyze_fingerprint, Fingerprint};
use bioid_vault::wallet::credential_storage::FileStore;
use bioid_vault::wallet::key_derivation::KeyDerivationEngine;
use bioid_vault::wallet::rate_limiter::RateLimiter;
use bioid_vault::wallet::vault::CredentialVault;
use ethers::types::Address;
use ethers::utils::to_checksum;
use log::info;
use serde::Serialize;
use zeroize::Zeroizing;

const USAGE: &str = "usage: bioid-vault <derive-address|analyze|rate-limit|manifest|ledger-status|grant-minter> [argument]";

/// Main application entry point
///
/// # Initialization Sequence
/// 1. Initialise logging
/// 2. Load layered settings
/// 3. Dispatch the command
#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = Settings::load().context("failed to load settings")?;
    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or_default();
    let argument = args.get(1).map(String::as_str);

    match (command, argument) {
        ("derive-address", Some(fingerprint)) => derive_address(&settings, fingerprint),
        ("analyze", Some(fingerprint)) => print_json(&analyze_fingerprint(fingerprint)),
        ("rate-limit", Some(identifier)) => {
            let engine = engine(&settings);
            print_json(&engine.check_rate_limit(identifier))
        }
        ("manifest", None) => manifest(&settings),
        ("ledger-status", Some(fingerprint)) => ledger_status(&settings, fingerprint).await,
        ("grant-minter", Some(account)) => grant_minter(&settings, account).await,
        _ => bail!(USAGE),
    }
}

fn engine(settings: &Settings) -> KeyDerivationEngine {
    KeyDerivationEngine::new(Arc::new(RateLimiter::new()), settings.rate_limit.clone())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn derive_address(settings: &Settings, fingerprint: &str) -> Result<()> {
    let fingerprint = Fingerprint::new(fingerprint);
    let address = engine(settings).derive_address(&fingerprint, &settings.derivation, None)?;
    println!("{}", to_checksum(&address, None));
    Ok(())
}

fn manifest(settings: &Settings) -> Result<()> {
    let directory = settings
        .vault
        .directory
        .as_ref()
        .context("vault.directory is not configured")?;
    let vault = CredentialVault::new(FileStore::open(directory)?, settings.vault.clone())?;

    let mut line = Zeroizing::new(String::new());
    std::io::stdin().lock().read_line(&mut line)?;
    let password = line.trim_end_matches(&['\r', '\n'][..]);

    match vault.export_manifest(password)? {
        Some(manifest) => print_json(&manifest),
        None => bail!("no vault found in {}", directory.display()),
    }
}

async fn ledger_status(settings: &Settings, fingerprint: &str) -> Result<()> {
    let client = ZkSyncClient::read_only(&settings.ledger.rpc_url)?;
    let registry = IdentityRegistry::new(client, settings.ledger.registry_address()?)?;

    let key = Fingerprint::new(fingerprint).ledger_key();
    info!("querying registry {:?} for {}", registry.address(), key);
    print_json(&registry.credential_history(key).await?)
}

async fn grant_minter(settings: &Settings, account: &str) -> Result<()> {
    let account: Address = account.parse().context("invalid minter address")?;
    let signer_key = std::env::var("BIOID_SIGNER_KEY").context("BIOID_SIGNER_KEY must be set")?;
    let client = ZkSyncClient::new(&settings.ledger.rpc_url, &signer_key).await?;
    let registry = IdentityRegistry::new(client, settings.ledger.registry_address()?)?;

    registry.grant_minter(account).await?;
    println!("{} holds the minter role", to_checksum(&account, None));
    Ok(())
}
