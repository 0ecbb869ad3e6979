// src/ledger/local.rs
//! In-process credential ledger.
//!
//! [`LocalChain`] holds the whole registry behind one mutex, which gives every
//! transaction a single total order just like block inclusion does on-chain.
//! Tokens live in an arena indexed by id, and each fingerprint maps to the ids
//! of its chain in issuance order. Callers interact through [`LocalLedger`]
//! handles, each bound to a signer address.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use ethers::types::Address;
use log::{info, warn};
use parking_lot::Mutex;

use super::{CredentialLedger, SuspicionPolicy};
use crate::error::{Error, LedgerRejection, Result};
use crate::models::credential::{CredentialToken, PersonalFields, Suspicion, TokenId};
use crate::models::fingerprint::FingerprintKey;
use crate::utils::time::{Clock, SystemClock};

#[derive(Default)]
struct LedgerState {
    /// Token `n` is stored at index `n - 1`.
    tokens: Vec<CredentialToken>,
    chains: HashMap<FingerprintKey, Vec<TokenId>>,
    recoveries: HashMap<FingerprintKey, Vec<u64>>,
    minters: HashSet<Address>,
}

impl LedgerState {
    fn token(&self, token_id: TokenId) -> Result<&CredentialToken> {
        token_id
            .checked_sub(1)
            .and_then(|index| self.tokens.get(index as usize))
            .ok_or(Error::LedgerRejected(LedgerRejection::UnknownToken))
    }

    fn active(&self, fingerprint: &FingerprintKey) -> Option<&CredentialToken> {
        self.chains
            .get(fingerprint)
            .and_then(|chain| chain.last())
            .and_then(|id| self.token(*id).ok())
            .filter(|token| token.is_active)
    }

    fn issue(
        &mut self,
        owner: Address,
        personal_fields: PersonalFields,
        fingerprint: FingerprintKey,
        issued_at: u64,
        previous_token_id: Option<TokenId>,
    ) -> TokenId {
        let token_id = self.tokens.len() as TokenId + 1;
        self.tokens.push(CredentialToken {
            token_id,
            owner,
            personal_fields,
            fingerprint,
            issued_at,
            is_active: true,
            previous_token_id,
        });
        self.chains.entry(fingerprint).or_default().push(token_id);
        token_id
    }
}

/// Shared in-process registry.
pub struct LocalChain {
    admin: Address,
    state: Mutex<LedgerState>,
    clock: Arc<dyn Clock>,
    policy: SuspicionPolicy,
}

impl LocalChain {
    /// Creates a registry administered by `admin`, who also holds the minter role.
    pub fn new(admin: Address) -> Self {
        Self::with_clock(admin, Arc::new(SystemClock))
    }

    pub fn with_clock(admin: Address, clock: Arc<dyn Clock>) -> Self {
        let mut state = LedgerState::default();
        state.minters.insert(admin);
        LocalChain {
            admin,
            state: Mutex::new(state),
            clock,
            policy: SuspicionPolicy::default(),
        }
    }

    /// Replaces the suspicion thresholds.
    ///
    /// # Errors
    /// [`Error::InvalidConfig`] if the policy fails [`SuspicionPolicy::validate`].
    pub fn with_policy(mut self, policy: SuspicionPolicy) -> Result<Self> {
        policy.validate()?;
        self.policy = policy;
        Ok(self)
    }

    pub fn policy(&self) -> &SuspicionPolicy {
        &self.policy
    }

    pub fn admin(&self) -> Address {
        self.admin
    }

    /// Returns a handle that submits transactions as `signer`.
    pub fn connect(self: &Arc<Self>, signer: Address) -> LocalLedger {
        LocalLedger {
            chain: Arc::clone(self),
            signer,
        }
    }

    /// Grants the minter role.
    ///
    /// # Errors
    /// [`LedgerRejection::NotAdmin`] unless `caller` is the admin.
    pub fn grant_minter(&self, caller: Address, account: Address) -> Result<()> {
        if caller != self.admin {
            return Err(LedgerRejection::NotAdmin.into());
        }
        if self.state.lock().minters.insert(account) {
            info!("granted minter role to {:?}", account);
        }
        Ok(())
    }

    pub fn revoke_minter(&self, caller: Address, account: Address) -> Result<()> {
        if caller != self.admin {
            return Err(LedgerRejection::NotAdmin.into());
        }
        self.state.lock().minters.remove(&account);
        Ok(())
    }

    pub fn is_minter(&self, account: Address) -> bool {
        self.state.lock().minters.contains(&account)
    }

    fn suspicion(&self, state: &LedgerState, fingerprint: &FingerprintKey) -> Suspicion {
        let revocations = state
            .chains
            .get(fingerprint)
            .map_or(0, |chain| chain.len().saturating_sub(1)) as u64;
        let times = state
            .recoveries
            .get(fingerprint)
            .map(Vec::as_slice)
            .unwrap_or_default();
        self.policy.evaluate(revocations, times)
    }
}

/// A signer-bound handle onto a [`LocalChain`].
#[derive(Clone)]
pub struct LocalLedger {
    chain: Arc<LocalChain>,
    signer: Address,
}

impl LocalLedger {
    pub fn chain(&self) -> &Arc<LocalChain> {
        &self.chain
    }
}

#[async_trait]
impl CredentialLedger for LocalLedger {
    fn signer(&self) -> Address {
        self.signer
    }

    async fn mint(
        &self,
        owner: Address,
        fields: &PersonalFields,
        fingerprint: FingerprintKey,
    ) -> Result<TokenId> {
        let mut state = self.chain.state.lock();
        if !state.minters.contains(&self.signer) {
            return Err(LedgerRejection::NotMinter.into());
        }
        if owner.is_zero() {
            return Err(LedgerRejection::Reverted("mint to the zero address".to_string()).into());
        }
        if state.active(&fingerprint).is_some() {
            return Err(LedgerRejection::ActiveTokenExists.into());
        }

        let now = self.chain.clock.now_millis();
        let token_id = state.issue(owner, fields.clone(), fingerprint, now, None);
        info!("minted credential token {} for {} to {:?}", token_id, fingerprint, owner);
        Ok(token_id)
    }

    async fn recover(&self, fingerprint: FingerprintKey, new_owner: Address) -> Result<TokenId> {
        let mut state = self.chain.state.lock();
        let (previous_id, owner, fields) = match state.active(&fingerprint) {
            Some(active) => (active.token_id, active.owner, active.personal_fields.clone()),
            None => return Err(LedgerRejection::NoActiveToken.into()),
        };
        if owner != self.signer {
            return Err(LedgerRejection::NotOwner.into());
        }
        if new_owner.is_zero() {
            return Err(LedgerRejection::Reverted("recover to the zero address".to_string()).into());
        }

        let now = self.chain.clock.now_millis();
        state.tokens[(previous_id - 1) as usize].is_active = false;
        let token_id = state.issue(new_owner, fields, fingerprint, now, Some(previous_id));
        state.recoveries.entry(fingerprint).or_default().push(now);

        info!(
            "recovered {}: token {} revoked, token {} issued to {:?}",
            fingerprint, previous_id, token_id, new_owner
        );
        let suspicion = self.chain.suspicion(&state, &fingerprint);
        if suspicion.flag {
            warn!("recovery history for {} is suspicious: {}", fingerprint, suspicion.reason.as_str());
        }
        Ok(token_id)
    }

    async fn active_token(&self, fingerprint: FingerprintKey) -> Result<(TokenId, Address)> {
        let state = self.chain.state.lock();
        state
            .active(&fingerprint)
            .map(|token| (token.token_id, token.owner))
            .ok_or(Error::LedgerRejected(LedgerRejection::NoActiveToken))
    }

    async fn owns_active(&self, owner: Address, fingerprint: FingerprintKey) -> Result<bool> {
        let state = self.chain.state.lock();
        Ok(state.active(&fingerprint).map_or(false, |token| token.owner == owner))
    }

    async fn token(&self, token_id: TokenId) -> Result<CredentialToken> {
        self.chain.state.lock().token(token_id).cloned()
    }

    async fn history(&self, fingerprint: FingerprintKey) -> Result<Vec<CredentialToken>> {
        let state = self.chain.state.lock();
        match state.chains.get(&fingerprint) {
            Some(chain) => chain.iter().map(|id| state.token(*id).cloned()).collect(),
            None => Ok(Vec::new()),
        }
    }

    async fn revocation_count(&self, fingerprint: FingerprintKey) -> Result<u64> {
        let state = self.chain.state.lock();
        Ok(state
            .chains
            .get(&fingerprint)
            .map_or(0, |chain| chain.len().saturating_sub(1)) as u64)
    }

    async fn is_suspicious(&self, fingerprint: FingerprintKey) -> Result<Suspicion> {
        let state = self.chain.state.lock();
        Ok(self.chain.suspicion(&state, &fingerprint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::credential::SuspicionReason;
    use crate::models::fingerprint::Fingerprint;
    use crate::utils::time::ManualClock;

    const ALICE: &str = "2bd806c97f0e00af1a1fc3328fa763a9269723c8db8fac4f93af71db186d6e90";
    const BOB: &str = "81b637d8fcd2c6da6359e6963113a1170de795e4b725b84d1e0b4cfd9ec58ce9";
    const HOUR_MS: u64 = 3_600_000;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    fn fields() -> PersonalFields {
        PersonalFields {
            name: "Alice Example".to_string(),
            document_number: "123.456.789-00".to_string(),
            applicant_id: "applicant-42".to_string(),
        }
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        chain: Arc<LocalChain>,
        minter: LocalLedger,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let chain = Arc::new(LocalChain::with_clock(addr(100), clock.clone()));
        let minter = chain.connect(addr(100));
        Fixture { clock, chain, minter }
    }

    #[tokio::test]
    async fn test_mint_recover_recover_scenario() {
        let fx = fixture();
        let fp = Fingerprint::new(ALICE).ledger_key();
        let (owner1, owner2) = (addr(1), addr(2));

        let first = fx.minter.mint(owner1, &fields(), fp).await.unwrap();
        assert_eq!(first, 1);
        let token = fx.minter.token(first).await.unwrap();
        assert!(token.is_active);
        assert_eq!(token.previous_token_id, None);

        let second = fx.chain.connect(owner1).recover(fp, owner2).await.unwrap();
        assert_eq!(second, 2);
        assert!(!fx.minter.token(1).await.unwrap().is_active);
        let token = fx.minter.token(2).await.unwrap();
        assert!(token.is_active);
        assert_eq!(token.previous_token_id, Some(1));
        assert_eq!(token.owner, owner2);
        assert_eq!(token.personal_fields, fields());
        assert_eq!(fx.minter.revocation_count(fp).await.unwrap(), 1);

        let third = fx.chain.connect(owner2).recover(fp, owner1).await.unwrap();
        assert_eq!(third, 3);
        assert_eq!(fx.minter.token(3).await.unwrap().previous_token_id, Some(2));
        assert_eq!(fx.minter.revocation_count(fp).await.unwrap(), 2);
        assert_eq!(fx.minter.active_token(fp).await.unwrap(), (3, owner1));
        assert!(fx.minter.owns_active(owner1, fp).await.unwrap());
        assert!(!fx.minter.owns_active(owner2, fp).await.unwrap());
    }

    #[tokio::test]
    async fn test_full_history_has_single_active_tail() {
        let fx = fixture();
        let fp = Fingerprint::new(ALICE).ledger_key();
        fx.minter.mint(addr(1), &fields(), fp).await.unwrap();
        for n in 1..4u64 {
            fx.clock.advance(2 * HOUR_MS);
            fx.chain.connect(addr(n)).recover(fp, addr(n + 1)).await.unwrap();
        }

        let history = fx.minter.full_history(fp).await.unwrap();
        let revocations = fx.minter.revocation_count(fp).await.unwrap();
        assert_eq!(history.len() as u64 - 1, revocations);
        assert_eq!(history.active_flags.iter().filter(|f| **f).count(), 1);
        assert_eq!(history.active_flags.last(), Some(&true));
        assert_eq!(history.token_ids, vec![1, 2, 3, 4]);
        for pair in history.records.windows(2) {
            assert_eq!(pair[1].previous_token_id, Some(pair[0].token_id));
            assert!(pair[1].issued_at >= pair[0].issued_at);
        }

        let view = fx.minter.credential_history(fp).await.unwrap();
        assert_eq!(view.revocation_count, 3);
        assert_eq!(view.active().map(|t| t.owner), Some(addr(4)));
        assert_eq!(view.suspicion, Suspicion::normal());
    }

    #[tokio::test]
    async fn test_six_recoveries_is_too_many() {
        let fx = fixture();
        let fp = Fingerprint::new(ALICE).ledger_key();
        fx.minter.mint(addr(1), &fields(), fp).await.unwrap();
        for n in 1..=6u64 {
            fx.clock.advance(2 * HOUR_MS);
            fx.chain.connect(addr(n)).recover(fp, addr(n + 1)).await.unwrap();
            if n == 5 {
                assert!(!fx.minter.is_suspicious(fp).await.unwrap().flag);
            }
        }

        let suspicion = fx.minter.is_suspicious(fp).await.unwrap();
        assert_eq!(suspicion.as_tuple(), (true, "too many revocations"));
    }

    #[tokio::test]
    async fn test_clustered_recoveries_are_rapid() {
        let fx = fixture();
        let fp = Fingerprint::new(ALICE).ledger_key();
        fx.minter.mint(addr(1), &fields(), fp).await.unwrap();
        for n in 1..=3u64 {
            fx.clock.advance(60_000);
            fx.chain.connect(addr(n)).recover(fp, addr(n + 1)).await.unwrap();
        }

        let suspicion = fx.minter.is_suspicious(fp).await.unwrap();
        assert_eq!(suspicion.reason, SuspicionReason::RapidRevocations);
        assert_eq!(suspicion.as_tuple(), (true, "rapid revocations"));
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let policy = SuspicionPolicy {
            rapid_revocation_count: 1,
            ..SuspicionPolicy::default()
        };
        assert!(matches!(
            LocalChain::new(addr(100)).with_policy(policy),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[tokio::test]
    async fn test_custom_policy_threshold() {
        let clock = Arc::new(ManualClock::new(0));
        let policy = SuspicionPolicy {
            max_revocations: 1,
            ..SuspicionPolicy::default()
        };
        let chain = Arc::new(
            LocalChain::with_clock(addr(100), clock.clone())
                .with_policy(policy)
                .unwrap(),
        );
        let fp = Fingerprint::new(ALICE).ledger_key();
        chain.connect(addr(100)).mint(addr(1), &fields(), fp).await.unwrap();
        for n in 1..=2u64 {
            clock.advance(2 * HOUR_MS);
            chain.connect(addr(n)).recover(fp, addr(n + 1)).await.unwrap();
        }

        let suspicion = chain.connect(addr(100)).is_suspicious(fp).await.unwrap();
        assert_eq!(suspicion.reason, SuspicionReason::TooManyRevocations);
    }

    #[tokio::test]
    async fn test_double_mint_rejected() {
        let fx = fixture();
        let fp = Fingerprint::new(ALICE).ledger_key();
        fx.minter.mint(addr(1), &fields(), fp).await.unwrap();

        let err = fx.minter.mint(addr(2), &fields(), fp).await.unwrap_err();
        assert!(matches!(err, Error::LedgerRejected(LedgerRejection::ActiveTokenExists)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_recover_by_non_owner_rejected() {
        let fx = fixture();
        let fp = Fingerprint::new(ALICE).ledger_key();
        fx.minter.mint(addr(1), &fields(), fp).await.unwrap();

        let err = fx.chain.connect(addr(9)).recover(fp, addr(9)).await.unwrap_err();
        assert!(matches!(err, Error::LedgerRejected(LedgerRejection::NotOwner)));
        assert_eq!(fx.minter.active_token(fp).await.unwrap(), (1, addr(1)));
    }

    #[tokio::test]
    async fn test_unregistered_fingerprint() {
        let fx = fixture();
        let fp = Fingerprint::new(BOB).ledger_key();

        let err = fx.chain.connect(addr(1)).recover(fp, addr(2)).await.unwrap_err();
        assert!(matches!(err, Error::LedgerRejected(LedgerRejection::NoActiveToken)));
        assert!(matches!(
            fx.minter.active_token(fp).await,
            Err(Error::LedgerRejected(LedgerRejection::NoActiveToken))
        ));
        assert!(fx.minter.history(fp).await.unwrap().is_empty());
        assert_eq!(fx.minter.revocation_count(fp).await.unwrap(), 0);
        assert!(matches!(
            fx.minter.token(7).await,
            Err(Error::LedgerRejected(LedgerRejection::UnknownToken))
        ));
    }

    #[tokio::test]
    async fn test_minter_role_enforced() {
        let fx = fixture();
        let fp = Fingerprint::new(ALICE).ledger_key();
        let outsider = fx.chain.connect(addr(7));

        let err = outsider.mint(addr(1), &fields(), fp).await.unwrap_err();
        assert!(matches!(err, Error::LedgerRejected(LedgerRejection::NotMinter)));

        assert!(matches!(
            fx.chain.grant_minter(addr(7), addr(7)),
            Err(Error::LedgerRejected(LedgerRejection::NotAdmin))
        ));
        fx.chain.grant_minter(fx.chain.admin(), addr(7)).unwrap();
        assert!(fx.chain.is_minter(addr(7)));
        assert_eq!(outsider.mint(addr(1), &fields(), fp).await.unwrap(), 1);

        fx.chain.revoke_minter(fx.chain.admin(), addr(7)).unwrap();
        assert!(!fx.chain.is_minter(addr(7)));
    }

    #[test]
    fn test_transfer_always_rejected() {
        let fx = fixture();
        let fp = Fingerprint::new(ALICE).ledger_key();
        tokio_test::block_on(async {
            fx.minter.mint(addr(1), &fields(), fp).await.unwrap();
            let err = fx.chain.connect(addr(1)).transfer(addr(1), addr(2), 1).await.unwrap_err();
            assert!(matches!(err, Error::LedgerRejected(LedgerRejection::NonTransferable)));
            assert_eq!(fx.minter.active_token(fp).await.unwrap(), (1, addr(1)));
        });
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_recoveries_admit_one() {
        let fx = fixture();
        let fp = Fingerprint::new(ALICE).ledger_key();
        fx.minter.mint(addr(1), &fields(), fp).await.unwrap();

        let owner = fx.chain.connect(addr(1));
        let handles: Vec<_> = (0..8u64)
            .map(|n| {
                let ledger = owner.clone();
                tokio::spawn(async move { ledger.recover(fp, addr(200 + n)).await })
            })
            .collect();

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(err) => {
                    assert!(matches!(err, Error::LedgerRejected(LedgerRejection::NotOwner)))
                }
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(fx.minter.revocation_count(fp).await.unwrap(), 1);
        assert_eq!(fx.minter.full_history(fp).await.unwrap().len(), 2);
    }
}
