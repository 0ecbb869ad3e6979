// src/config.rs
//! Layered application settings.
//!
//! Sources, later ones overriding earlier ones:
//! 1. Built-in defaults
//! 2. `bioid.toml`, or the file named by `BIOID_CONFIG` (optional)
//! 3. Environment variables `BIOID__<SECTION>__<KEY>`, e.g.
//!    `BIOID__RATE_LIMIT__MAX_ATTEMPTS=3`
//!
//! A `.env` file is loaded into the environment first.

use config::{Config, Environment, File};
use ethers::types::Address;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ledger::local::LocalChain;
use crate::ledger::SuspicionPolicy;
use crate::models::key_material::DerivationConfig;
use crate::wallet::rate_limiter::RateLimitConfig;
use crate::wallet::vault::VaultConfig;

/// Default settings file name.
pub const DEFAULT_CONFIG_FILE: &str = "bioid.toml";

/// zkSync Era Sepolia endpoint.
pub const DEFAULT_RPC_URL: &str = "https://sepolia.era.zksync.dev";

/// Connection settings for the on-chain identity registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    pub rpc_url: String,
    /// Deployed registry address; `None` until the contract is deployed.
    pub registry_address: Option<String>,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            registry_address: None,
        }
    }
}

impl LedgerSettings {
    /// Parsed registry address.
    ///
    /// # Errors
    /// [`Error::InvalidConfig`] if the address is missing or malformed.
    pub fn registry_address(&self) -> Result<Address> {
        let raw = self
            .registry_address
            .as_deref()
            .ok_or_else(|| Error::invalid_config("ledger.registry_address is not set"))?;
        raw.trim()
            .parse()
            .map_err(|_| Error::invalid_config(format!("ledger.registry_address {} is not an address", raw)))
    }
}

/// All application settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub derivation: DerivationConfig,
    pub rate_limit: RateLimitConfig,
    pub vault: VaultConfig,
    pub suspicion: SuspicionPolicy,
    pub ledger: LedgerSettings,
}

impl Settings {
    /// Loads settings from `.env`, the settings file and the environment.
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();
        let path = std::env::var("BIOID_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(Some(&path))
    }

    /// Loads settings from an explicit file (optional) and the environment.
    pub fn load_from(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder().add_source(
            Config::try_from(&Settings::default()).map_err(|e| Error::invalid_config(e.to_string()))?,
        );
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(false));
        }
        builder = builder.add_source(
            Environment::with_prefix("BIOID")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| Error::invalid_config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<()> {
        self.derivation.validate()?;
        self.rate_limit.validate()?;
        self.vault.validate()?;
        self.suspicion.validate()?;
        if self.ledger.registry_address.is_some() {
            self.ledger.registry_address()?;
        }
        Ok(())
    }

    /// Builds an in-process ledger that applies the configured suspicion policy.
    ///
    /// # Arguments
    /// * `admin` - Registry administrator, also granted the minter role
    ///
    /// # Errors
    /// [`Error::InvalidConfig`] if the suspicion section is invalid.
    pub fn local_chain(&self, admin: Address) -> Result<LocalChain> {
        LocalChain::new(admin).with_policy(self.suspicion.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        let settings = Settings::load_from(None).unwrap();
        assert_eq!(settings.derivation, DerivationConfig::development());
        assert_eq!(settings.rate_limit, RateLimitConfig::default());
        assert_eq!(settings.suspicion, SuspicionPolicy::default());
        assert_eq!(settings.ledger.rpc_url, DEFAULT_RPC_URL);
        assert!(settings.ledger.registry_address().is_err());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[derivation]
salt = "bioid-deterministic-v1"
iterations = 250000

[rate_limit]
max_attempts = 2

[vault]
kdf_iterations = 20000

[ledger]
registry_address = "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf"
"#
        )
        .unwrap();

        let settings = Settings::load_from(file.path().to_str()).unwrap();
        assert_eq!(settings.derivation, DerivationConfig::production());
        assert_eq!(settings.rate_limit.max_attempts, 2);
        assert_eq!(settings.rate_limit.window_ms, 60_000);
        assert_eq!(settings.vault.kdf_iterations, 20_000);
        assert_eq!(
            settings.ledger.registry_address().unwrap(),
            "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf".parse::<Address>().unwrap()
        );
    }

    #[test]
    fn test_suspicion_section_reaches_local_chain() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[suspicion]\nmax_revocations = 2\nrapid_window_secs = 600").unwrap();

        let settings = Settings::load_from(file.path().to_str()).unwrap();
        let chain = settings.local_chain(Address::from_low_u64_be(1)).unwrap();
        assert_eq!(chain.policy().max_revocations, 2);
        assert_eq!(chain.policy().rapid_window_secs, 600);
        assert_eq!(chain.policy().rapid_revocation_count, 3);

        let mut invalid = settings;
        invalid.suspicion.rapid_window_secs = 0;
        assert!(invalid.local_chain(Address::from_low_u64_be(1)).is_err());
    }

    #[test]
    fn test_weak_file_settings_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[derivation]\niterations = 1000").unwrap();
        assert!(matches!(
            Settings::load_from(file.path().to_str()),
            Err(Error::InvalidConfig { .. })
        ));
    }
}
