// src/wallet/rate_limiter.rs
//! Per-identifier attempt limiting for key derivation.
//!
//! Each identifier moves through a small state machine:
//!
//! ```text
//! Open --(attempts == max)--> LimitReached --+--> Cooldown (cooldown configured)
//!                                            |      blocks until cooldown_ends_at,
//!                                            |      then Open with history cleared
//!                                            +--> SlidingBackoff (no cooldown)
//!                                                   next allowed = oldest + window
//! ```
//!
//! Expired cooldowns and out-of-window attempts are purged lazily by
//! [`RateLimiter::check_and_record`], which performs the check and the record
//! under one per-identifier lock, so concurrent callers sharing an identifier
//! can never both observe "not limited" for the last free slot.
//! [`RateLimiter::check`] only reads; polling never moves a lockout.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::utils::time::{Clock, SystemClock};

// ============================================================================
// Constants
// ============================================================================

/// Default attempts admitted per window.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default sliding window length.
pub const DEFAULT_WINDOW_MS: u64 = 60_000;

/// Default lockout once the limit is reached.
pub const DEFAULT_COOLDOWN_MS: u64 = 5 * 60_000;

// ============================================================================
// Configuration
// ============================================================================

/// Limits applied to one identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Attempts admitted within one window.
    pub max_attempts: u32,
    /// Sliding window length in milliseconds.
    pub window_ms: u64,
    /// Lockout after the limit is reached. `None` selects sliding backoff.
    pub cooldown_ms: Option<u64>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            window_ms: DEFAULT_WINDOW_MS,
            cooldown_ms: Some(DEFAULT_COOLDOWN_MS),
        }
    }
}

impl RateLimitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_window_ms(mut self, window_ms: u64) -> Self {
        self.window_ms = window_ms;
        self
    }

    pub fn with_cooldown_ms(mut self, cooldown_ms: u64) -> Self {
        self.cooldown_ms = Some(cooldown_ms);
        self
    }

    /// Disables the cooldown; the window slides instead.
    pub fn without_cooldown(mut self) -> Self {
        self.cooldown_ms = None;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::invalid_config("max_attempts must be positive"));
        }
        if self.window_ms == 0 {
            return Err(Error::invalid_config("window_ms must be positive"));
        }
        if self.cooldown_ms == Some(0) {
            return Err(Error::invalid_config(
                "cooldown_ms must be positive; omit it to use sliding backoff",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Status
// ============================================================================

/// Snapshot of an identifier's limiter state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub limited: bool,
    pub attempts_remaining: u32,
    /// Earliest time (ms since epoch) another attempt will be admitted.
    pub next_allowed_at: u64,
    /// Set while the identifier is locked out.
    pub cooldown_ends_at: Option<u64>,
}

impl RateLimitStatus {
    /// Whole seconds until `next_allowed_at`, rounded up.
    pub fn retry_after_secs(&self, now: u64) -> u64 {
        let wait = self.next_allowed_at.saturating_sub(now);
        (wait + 999) / 1000
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Open,
    LimitReached,
    CoolingDown,
}

// ============================================================================
// Attempt log
// ============================================================================

/// Attempts within the current window plus an optional cooldown expiry.
#[derive(Debug, Default)]
struct AttemptLog {
    attempts: VecDeque<u64>,
    cooldown_ends_at: Option<u64>,
}

impl AttemptLog {
    fn purge(&mut self, now: u64, config: &RateLimitConfig) {
        if let Some(ends_at) = self.cooldown_ends_at {
            if now >= ends_at {
                self.cooldown_ends_at = None;
                self.attempts.clear();
            }
        }
        while let Some(&oldest) = self.attempts.front() {
            if now.saturating_sub(oldest) >= config.window_ms {
                self.attempts.pop_front();
            } else {
                break;
            }
        }
    }

    /// Computes the state at `now` without touching the log.
    ///
    /// Expired cooldowns and stale attempts are treated as already purged.
    /// Reaching the limit here never starts a cooldown; only an admission
    /// attempt does that.
    fn status(&self, now: u64, config: &RateLimitConfig) -> (Gate, RateLimitStatus) {
        match self.cooldown_ends_at {
            Some(ends_at) if now < ends_at => {
                return (
                    Gate::CoolingDown,
                    RateLimitStatus {
                        limited: true,
                        attempts_remaining: 0,
                        next_allowed_at: ends_at,
                        cooldown_ends_at: Some(ends_at),
                    },
                );
            }
            // An expired cooldown clears the history.
            Some(_) => return (Gate::Open, open_status(now, config.max_attempts)),
            None => {}
        }

        let mut live = self
            .attempts
            .iter()
            .copied()
            .filter(|&at| now.saturating_sub(at) < config.window_ms);
        let oldest = live.next();
        let used = oldest.map_or(0, |_| 1 + live.count() as u32);

        if used < config.max_attempts {
            return (Gate::Open, open_status(now, config.max_attempts - used));
        }

        (
            Gate::LimitReached,
            RateLimitStatus {
                limited: true,
                attempts_remaining: 0,
                next_allowed_at: oldest.unwrap_or(now) + config.window_ms,
                cooldown_ends_at: None,
            },
        )
    }

    fn is_idle(&self) -> bool {
        self.attempts.is_empty() && self.cooldown_ends_at.is_none()
    }
}

// ============================================================================
// Rate Limiter
// ============================================================================

/// Injectable attempt limiter keyed by an opaque identifier.
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    logs: Mutex<HashMap<String, Arc<Mutex<AttemptLog>>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    /// Creates a limiter reading the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        RateLimiter {
            clock,
            logs: Mutex::new(HashMap::new()),
        }
    }

    pub fn now(&self) -> u64 {
        self.clock.now_millis()
    }

    /// Returns the identifier's log, creating it if needed.
    ///
    /// Handles are cloned under the map lock and `prune_idle` keeps any entry
    /// with an outstanding handle, so a caller never records into a log that
    /// has already left the map.
    fn log_for(&self, identifier: &str) -> Arc<Mutex<AttemptLog>> {
        let mut logs = self.logs.lock();
        logs.entry(identifier.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(AttemptLog::default())))
            .clone()
    }

    /// Reports the identifier's state without recording an attempt.
    ///
    /// Read-only: unknown identifiers are not tracked and a reached limit does
    /// not start the cooldown.
    pub fn check(&self, identifier: &str, config: &RateLimitConfig) -> RateLimitStatus {
        let now = self.now();
        let log = self.logs.lock().get(identifier).cloned();
        match log {
            Some(log) => {
                let (_, status) = log.lock().status(now, config);
                status
            }
            None => open_status(now, config.max_attempts),
        }
    }

    /// Records an attempt unconditionally.
    pub fn record_attempt(&self, identifier: &str) {
        let log = self.log_for(identifier);
        let now = self.now();
        log.lock().attempts.push_back(now);
    }

    /// Admits and records one attempt, or fails without recording it.
    ///
    /// The call that finds the limit reached starts the cooldown, if one is
    /// configured.
    ///
    /// # Returns
    /// The status after the attempt was recorded.
    ///
    /// # Errors
    /// - [`Error::RateLimitExceeded`] when this call finds the limit reached
    /// - [`Error::CooldownActive`] when the identifier is already locked out
    pub fn check_and_record(&self, identifier: &str, config: &RateLimitConfig) -> Result<RateLimitStatus> {
        let log = self.log_for(identifier);
        let mut log = log.lock();
        let now = self.now();

        log.purge(now, config);
        let (gate, status) = log.status(now, config);
        match gate {
            Gate::Open => {
                log.attempts.push_back(now);
                debug!(
                    "attempt admitted for {} ({} remaining)",
                    short(identifier),
                    status.attempts_remaining - 1
                );
                Ok(RateLimitStatus {
                    attempts_remaining: status.attempts_remaining - 1,
                    ..status
                })
            }
            Gate::LimitReached => {
                let status = match config.cooldown_ms {
                    Some(cooldown_ms) => {
                        let ends_at = now + cooldown_ms;
                        log.cooldown_ends_at = Some(ends_at);
                        warn!(
                            "attempt limit reached for {}, cooldown until {}",
                            short(identifier),
                            ends_at
                        );
                        RateLimitStatus {
                            next_allowed_at: ends_at,
                            cooldown_ends_at: Some(ends_at),
                            ..status
                        }
                    }
                    None => {
                        warn!("attempt limit reached for {}", short(identifier));
                        status
                    }
                };
                Err(Error::RateLimitExceeded {
                    retry_after_secs: status.retry_after_secs(now),
                    attempts_remaining: status.attempts_remaining,
                })
            }
            Gate::CoolingDown => {
                debug!("attempt rejected for {}: cooldown active", short(identifier));
                Err(Error::CooldownActive {
                    retry_after_secs: status.retry_after_secs(now),
                })
            }
        }
    }

    /// Forgets all history for the identifier.
    pub fn reset(&self, identifier: &str) {
        self.logs.lock().remove(identifier);
    }

    /// Drops identifiers with no in-window attempts and no cooldown.
    ///
    /// Entries a concurrent caller is about to record into are kept.
    pub fn prune_idle(&self, config: &RateLimitConfig) {
        let now = self.now();
        self.logs.lock().retain(|_, log| {
            if Arc::strong_count(log) > 1 {
                return true;
            }
            let mut log = log.lock();
            log.purge(now, config);
            !log.is_idle()
        });
    }

    /// Number of identifiers currently tracked.
    pub fn tracked_identifiers(&self) -> usize {
        self.logs.lock().len()
    }
}

fn open_status(now: u64, attempts_remaining: u32) -> RateLimitStatus {
    RateLimitStatus {
        limited: false,
        attempts_remaining,
        next_allowed_at: now,
        cooldown_ends_at: None,
    }
}

fn short(identifier: &str) -> &str {
    let end = identifier
        .char_indices()
        .nth(8)
        .map(|(idx, _)| idx)
        .unwrap_or(identifier.len());
    &identifier[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::time::ManualClock;
    use std::thread;

    fn limiter_at(start: u64) -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::new(start));
        let limiter = RateLimiter::with_clock(clock.clone());
        (clock, limiter)
    }

    #[test]
    fn test_default_config() {
        let config = RateLimitConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.window_ms, 60_000);
        assert_eq!(config.cooldown_ms, Some(300_000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(RateLimitConfig::new().with_max_attempts(0).validate().is_err());
        assert!(RateLimitConfig::new().with_cooldown_ms(0).validate().is_err());
    }

    #[test]
    fn test_sliding_window_blocks_then_recovers() {
        let (clock, limiter) = limiter_at(1_000_000);
        let config = RateLimitConfig::new()
            .with_max_attempts(2)
            .with_window_ms(60_000)
            .without_cooldown();

        assert_eq!(limiter.check_and_record("id", &config).unwrap().attempts_remaining, 1);
        clock.advance(1_000);
        assert_eq!(limiter.check_and_record("id", &config).unwrap().attempts_remaining, 0);

        clock.advance(1_000);
        match limiter.check_and_record("id", &config) {
            Err(Error::RateLimitExceeded {
                retry_after_secs,
                attempts_remaining,
            }) => {
                assert_eq!(attempts_remaining, 0);
                assert_eq!(retry_after_secs, 58);
            }
            other => panic!("expected RateLimitExceeded, got {:?}", other),
        }

        let status = limiter.check("id", &config);
        assert!(status.limited);
        assert_eq!(status.next_allowed_at, 1_060_000);
        assert_eq!(status.cooldown_ends_at, None);

        clock.advance(58_000);
        assert!(limiter.check_and_record("id", &config).is_ok());
    }

    #[test]
    fn test_cooldown_locks_out_until_expiry() {
        let (clock, limiter) = limiter_at(0);
        let config = RateLimitConfig::new()
            .with_max_attempts(1)
            .with_cooldown_ms(5_000);

        assert!(limiter.check_and_record("id", &config).is_ok());
        assert!(matches!(
            limiter.check_and_record("id", &config),
            Err(Error::RateLimitExceeded { retry_after_secs: 5, .. })
        ));

        clock.advance(1_000);
        let status = limiter.check("id", &config);
        assert!(status.limited);
        assert!(status.cooldown_ends_at.unwrap() > clock.now_millis());
        assert!(matches!(
            limiter.check_and_record("id", &config),
            Err(Error::CooldownActive { retry_after_secs: 4 })
        ));

        clock.advance(4_000);
        let status = limiter.check("id", &config);
        assert!(!status.limited);
        assert_eq!(status.attempts_remaining, 1);
        assert_eq!(status.cooldown_ends_at, None);
    }

    #[test]
    fn test_rejected_attempts_are_not_recorded() {
        let (clock, limiter) = limiter_at(0);
        let config = RateLimitConfig::new()
            .with_max_attempts(1)
            .with_window_ms(10_000)
            .without_cooldown();

        assert!(limiter.check_and_record("id", &config).is_ok());
        clock.advance(9_000);
        assert!(limiter.check_and_record("id", &config).is_err());
        clock.advance(1_000);
        assert!(limiter.check_and_record("id", &config).is_ok());
    }

    #[test]
    fn test_identifiers_are_isolated() {
        let (_clock, limiter) = limiter_at(0);
        let config = RateLimitConfig::new().with_max_attempts(1).without_cooldown();

        assert!(limiter.check_and_record("a", &config).is_ok());
        assert!(limiter.check_and_record("a", &config).is_err());
        assert!(limiter.check_and_record("b", &config).is_ok());
    }

    #[test]
    fn test_reset_and_prune() {
        let (clock, limiter) = limiter_at(0);
        let config = RateLimitConfig::new().with_max_attempts(1).without_cooldown();

        limiter.check_and_record("a", &config).unwrap();
        limiter.check_and_record("b", &config).unwrap();
        limiter.reset("a");
        assert!(limiter.check_and_record("a", &config).is_ok());

        clock.advance(config.window_ms);
        limiter.prune_idle(&config);
        assert_eq!(limiter.tracked_identifiers(), 0);
    }

    #[test]
    fn test_polling_does_not_move_the_lockout() {
        let config = RateLimitConfig::new()
            .with_max_attempts(1)
            .with_cooldown_ms(5_000);

        for poll in [false, true] {
            let (clock, limiter) = limiter_at(0);
            assert!(limiter.check_and_record("id", &config).is_ok());
            if poll {
                let status = limiter.check("id", &config);
                assert!(status.limited);
                assert_eq!(status.cooldown_ends_at, None);
            }

            clock.set(4_000);
            assert!(matches!(
                limiter.check_and_record("id", &config),
                Err(Error::RateLimitExceeded { retry_after_secs: 5, .. })
            ));
            clock.set(5_500);
            assert!(matches!(
                limiter.check_and_record("id", &config),
                Err(Error::CooldownActive { retry_after_secs: 4 })
            ));
        }
    }

    #[test]
    fn test_check_does_not_track_unknown_identifiers() {
        let (_clock, limiter) = limiter_at(0);
        let config = RateLimitConfig::default();

        let status = limiter.check("never-seen", &config);
        assert!(!status.limited);
        assert_eq!(status.attempts_remaining, config.max_attempts);
        assert_eq!(limiter.tracked_identifiers(), 0);
    }

    #[test]
    fn test_record_attempt_consumes_a_slot() {
        let (_clock, limiter) = limiter_at(0);
        let config = RateLimitConfig::new().with_max_attempts(3);

        limiter.record_attempt("id");
        assert_eq!(limiter.check("id", &config).attempts_remaining, 2);
        limiter.record_attempt("id");
        limiter.record_attempt("id");
        let status = limiter.check("id", &config);
        assert!(status.limited);
        assert_eq!(status.attempts_remaining, 0);
    }

    #[test]
    fn test_prune_keeps_entries_in_use() {
        let (clock, limiter) = limiter_at(0);
        let config = RateLimitConfig::new().with_max_attempts(1).without_cooldown();

        // A caller holding the log between lookup and record.
        let log = limiter.log_for("x");
        limiter.prune_idle(&config);
        assert_eq!(limiter.tracked_identifiers(), 1);

        log.lock().attempts.push_back(clock.now_millis());
        drop(log);
        assert!(matches!(
            limiter.check_and_record("x", &config),
            Err(Error::RateLimitExceeded { .. })
        ));

        clock.advance(config.window_ms);
        limiter.prune_idle(&config);
        assert_eq!(limiter.tracked_identifiers(), 0);
    }

    #[test]
    fn test_concurrent_record_and_prune_never_exceed_limit() {
        let limiter = Arc::new(RateLimiter::with_clock(Arc::new(ManualClock::new(0))));
        let config = RateLimitConfig::new().with_max_attempts(2).without_cooldown();

        let pruner = {
            let limiter = limiter.clone();
            let config = config.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    limiter.prune_idle(&config);
                }
            })
        };
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let limiter = limiter.clone();
                let config = config.clone();
                thread::spawn(move || limiter.check_and_record("shared", &config).is_ok())
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        pruner.join().unwrap();
        assert_eq!(admitted, 2);
    }

    #[test]
    fn test_concurrent_callers_never_exceed_limit() {
        let limiter = Arc::new(RateLimiter::with_clock(Arc::new(ManualClock::new(0))));
        let config = RateLimitConfig::new().with_max_attempts(3).without_cooldown();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let limiter = limiter.clone();
                let config = config.clone();
                thread::spawn(move || limiter.check_and_record("shared", &config).is_ok())
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 3);
    }
}
