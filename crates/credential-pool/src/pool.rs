//! Credential health state machine and round-robin selection
//!
//! The pool holds one `CredentialHealth` per credential plus a shared cursor
//! (`current`). Both live behind a single `RwLock`, so every check-then-mutate
//! sequence (usability check → reactivation, error increment → disable) is one
//! critical section. No lock is ever held across network I/O: callers get a
//! `SelectedCredential` by value and report the outcome afterwards.
//!
//! Reactivation happens lazily: an inactive credential whose reset time has
//! passed becomes active again the next time a selection scan reaches it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::Secret;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use transport::QuotaHeaders;

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};

/// Tunable health policy. Defaults: 24h rate-limit window, 3 consecutive
/// errors trigger a 30 minute disable.
#[derive(Debug, Clone)]
pub struct PoolPolicy {
    /// Disable window for a global rate limit with no reported reset time
    pub rate_limit_window: chrono::Duration,
    /// Consecutive errors before a credential is soft-disabled
    pub error_threshold: u32,
    /// Disable window after `error_threshold` consecutive errors
    pub error_cooldown: chrono::Duration,
}

impl Default for PoolPolicy {
    fn default() -> Self {
        Self {
            rate_limit_window: chrono::Duration::hours(24),
            error_threshold: 3,
            error_cooldown: chrono::Duration::minutes(30),
        }
    }
}

/// Mutable health record for one credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialHealth {
    pub active: bool,
    pub rate_limit_reset_at: Option<DateTime<Utc>>,
    /// Last observed quota, advisory only
    pub requests_remaining: Option<u64>,
    /// Last observed quota window reset, advisory only
    pub quota_reset_at: Option<DateTime<Utc>>,
    pub consecutive_error_count: u32,
    pub last_error: Option<String>,
}

impl CredentialHealth {
    fn new() -> Self {
        Self {
            active: true,
            rate_limit_reset_at: None,
            requests_remaining: None,
            quota_reset_at: None,
            consecutive_error_count: 0,
            last_error: None,
        }
    }

    /// Whether the record would be usable at `now`, without mutating it.
    fn usable_at(&self, now: DateTime<Utc>) -> bool {
        self.active || self.rate_limit_reset_at.is_some_and(|reset| now > reset)
    }

    fn status(&self) -> CredentialStatus {
        if self.active {
            CredentialStatus::Active
        } else if self.rate_limit_reset_at.is_some() {
            CredentialStatus::RateLimited
        } else if self.consecutive_error_count > 0 {
            CredentialStatus::Error
        } else {
            CredentialStatus::Disabled
        }
    }
}

/// Snapshot classification of a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    Active,
    RateLimited,
    Error,
    Disabled,
}

/// A credential handed out for one attempt.
///
/// Carries the pool index so outcomes are recorded against the right health
/// record; the secret stays redacted in Debug output.
#[derive(Debug, Clone)]
pub struct SelectedCredential {
    pub index: usize,
    secret: Secret<String>,
}

impl SelectedCredential {
    /// The raw secret, for the Authorization header only.
    pub fn expose(&self) -> &str {
        self.secret.expose()
    }

    /// Fixed-length suffix for logs and results.
    pub fn suffix(&self) -> String {
        self.secret.suffix()
    }

    /// 1-based position, as reported in status snapshots.
    pub fn number(&self) -> usize {
        self.index + 1
    }
}

/// Result of an administrative rotation.
#[derive(Debug, Clone, Serialize)]
pub struct Rotation {
    pub previous: Option<usize>,
    pub previous_suffix: Option<String>,
    pub current: usize,
    pub current_suffix: String,
}

/// Per-credential entry in a status snapshot. Never carries the secret.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialEntry {
    /// 1-based index
    pub index: usize,
    pub suffix: String,
    pub status: CredentialStatus,
    pub active: bool,
    pub requests_remaining: Option<u64>,
    pub quota_reset_at: Option<DateTime<Utc>>,
    pub rate_limit_reset_at: Option<DateTime<Utc>>,
    pub error_count: u32,
    pub last_error: Option<String>,
}

/// Status export for the admin and health endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct PoolSnapshot {
    pub total: usize,
    pub active: usize,
    pub rate_limited: usize,
    pub error: usize,
    /// Credentials selectable right now, counting elapsed reset times
    pub usable: usize,
    pub credentials: Vec<CredentialEntry>,
}

impl PoolSnapshot {
    /// healthy when every credential is usable, degraded when some are,
    /// unhealthy when none are (including an empty pool).
    pub fn health_label(&self) -> &'static str {
        if self.total > 0 && self.usable == self.total {
            "healthy"
        } else if self.usable > 0 {
            "degraded"
        } else {
            "unhealthy"
        }
    }
}

/// `now + window`, clamped to the latest representable instant.
fn saturating_add(now: DateTime<Utc>, window: chrono::Duration) -> DateTime<Utc> {
    now.checked_add_signed(window).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

struct PoolState {
    current: usize,
    health: Vec<CredentialHealth>,
}

/// Shared credential pool.
///
/// Constructed once at startup and shared via `Arc` by every concurrent
/// dispatch. A single pool-wide `RwLock` guards the cursor and all health
/// records; credential counts are small, so per-credential locking buys
/// nothing.
pub struct CredentialPool {
    credentials: Vec<Secret<String>>,
    state: RwLock<PoolState>,
    policy: PoolPolicy,
    clock: Arc<dyn Clock>,
}

impl CredentialPool {
    /// Create a pool over `credentials` using the system clock.
    pub fn new(credentials: Vec<Secret<String>>, policy: PoolPolicy) -> Self {
        Self::with_clock(credentials, policy, Arc::new(SystemClock))
    }

    /// Create a pool with an explicit clock (simulations and tests).
    pub fn with_clock(
        credentials: Vec<Secret<String>>,
        policy: PoolPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let health = credentials.iter().map(|_| CredentialHealth::new()).collect();
        info!(credentials = credentials.len(), "credential pool initialized");
        Self {
            credentials,
            state: RwLock::new(PoolState { current: 0, health }),
            policy,
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn policy(&self) -> &PoolPolicy {
        &self.policy
    }

    /// The credential at the cursor if usable, else the next usable one.
    ///
    /// Scans forward with wrap-around starting at the cursor, reactivating
    /// credentials whose reset time has passed, and moves the cursor to the
    /// credential returned. `None` when nothing is usable.
    pub async fn current(&self) -> Option<SelectedCredential> {
        self.scan(0).await
    }

    /// Rotate away from the current credential.
    ///
    /// Like `current()` but the scan starts one past the cursor and covers only
    /// the other credentials, so the credential that was current is never
    /// returned, even when it is the only usable one.
    pub async fn advance(&self) -> Option<SelectedCredential> {
        let selected = self.scan(1).await;
        if let Some(ref s) = selected {
            info!(credential = s.number(), "switched to next credential");
        }
        selected
    }

    async fn scan(&self, first_offset: usize) -> Option<SelectedCredential> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        self.scan_locked(&mut state, now, first_offset)
    }

    /// Selection scan over an already-held write guard.
    fn scan_locked(
        &self,
        state: &mut PoolState,
        now: DateTime<Utc>,
        first_offset: usize,
    ) -> Option<SelectedCredential> {
        let n = self.credentials.len();
        if n == 0 {
            return None;
        }
        let start = state.current;

        for offset in first_offset..n {
            let idx = (start + offset) % n;
            let health = &mut state.health[idx];
            if !health.usable_at(now) {
                continue;
            }
            if !health.active {
                health.active = true;
                health.rate_limit_reset_at = None;
                health.consecutive_error_count = 0;
                info!(credential = idx + 1, "credential reactivated after reset time");
            }
            state.current = idx;
            return Some(SelectedCredential {
                index: idx,
                secret: self.credentials[idx].clone(),
            });
        }

        debug!(credentials = n, "no usable credential found");
        None
    }

    /// Record a successful dispatch through `index`.
    ///
    /// Clears the error streak and applies advisory quota headers. Quota
    /// values are reported in snapshots only and never gate selection, so a
    /// success racing a rate limit on the same credential cannot shorten the
    /// disable window.
    pub async fn record_success(&self, index: usize, quota: &QuotaHeaders) {
        let mut state = self.state.write().await;
        let Some(health) = state.health.get_mut(index) else {
            warn!(credential = index + 1, "success recorded for unknown credential");
            return;
        };
        health.consecutive_error_count = 0;
        health.last_error = None;
        if let Some(remaining) = quota.requests_remaining {
            health.requests_remaining = Some(remaining);
        }
        if let Some(reset_at) = quota.reset_at {
            health.quota_reset_at = Some(reset_at);
        }
    }

    /// Disable `index` until `reset_at`, or for the policy's rate-limit window
    /// when the upstream did not say.
    pub async fn record_rate_limited(&self, index: usize, reset_at: Option<DateTime<Utc>>) {
        let until = reset_at
            .unwrap_or_else(|| saturating_add(self.clock.now(), self.policy.rate_limit_window));
        let mut state = self.state.write().await;
        let Some(health) = state.health.get_mut(index) else {
            warn!(credential = index + 1, "rate limit recorded for unknown credential");
            return;
        };
        health.active = false;
        health.rate_limit_reset_at = Some(until);
        warn!(
            credential = index + 1,
            reset_at = %until.to_rfc3339(),
            "credential rate limited"
        );
    }

    /// Record a failed attempt through `index`.
    ///
    /// Reaching `error_threshold` consecutive errors disables the credential
    /// for `error_cooldown`. An existing later reset time is kept, so error
    /// escalation never shortens a rate-limit disable.
    pub async fn record_error(&self, index: usize, message: impl Into<String>) {
        let message = message.into();
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let Some(health) = state.health.get_mut(index) else {
            warn!(credential = index + 1, "error recorded for unknown credential");
            return;
        };
        health.consecutive_error_count = health.consecutive_error_count.saturating_add(1);
        health.last_error = Some(message);

        if health.consecutive_error_count >= self.policy.error_threshold {
            let until = saturating_add(now, self.policy.error_cooldown);
            let until = match health.rate_limit_reset_at {
                Some(existing) if !health.active && existing > until => existing,
                _ => until,
            };
            health.active = false;
            health.rate_limit_reset_at = Some(until);
            warn!(
                credential = index + 1,
                errors = health.consecutive_error_count,
                reset_at = %until.to_rfc3339(),
                "credential temporarily disabled after repeated errors"
            );
        } else {
            debug!(
                credential = index + 1,
                errors = health.consecutive_error_count,
                "credential error recorded"
            );
        }
    }

    /// Force rotation to the next usable credential.
    ///
    /// Returns `RotationExhausted` when no credential other than the current
    /// one is usable. Resolving the current credential and scanning past it
    /// happen under one write guard, so `previous` is always the credential
    /// rotated away from.
    pub async fn rotate(&self) -> Result<Rotation> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let previous = self.scan_locked(&mut state, now, 0);
        let next = self
            .scan_locked(&mut state, now, 1)
            .ok_or(Error::RotationExhausted)?;
        drop(state);
        info!(credential = next.number(), "switched to next credential");
        Ok(Rotation {
            previous: previous.as_ref().map(SelectedCredential::number),
            previous_suffix: previous.as_ref().map(SelectedCredential::suffix),
            current: next.number(),
            current_suffix: next.suffix(),
        })
    }

    /// Reset credential `number` (1-based) to its initial state.
    pub async fn reset(&self, number: usize) -> Result<()> {
        let idx = number.checked_sub(1).ok_or(Error::NotFound(number))?;
        let mut state = self.state.write().await;
        let health = state.health.get_mut(idx).ok_or(Error::NotFound(number))?;
        let (requests_remaining, quota_reset_at) =
            (health.requests_remaining, health.quota_reset_at);
        *health = CredentialHealth::new();
        health.requests_remaining = requests_remaining;
        health.quota_reset_at = quota_reset_at;
        info!(credential = number, "credential health reset");
        Ok(())
    }

    /// Health record of credential `index` (0-based).
    pub async fn health(&self, index: usize) -> Option<CredentialHealth> {
        self.state.read().await.health.get(index).cloned()
    }

    /// Point-in-time status of every credential plus aggregate counts.
    ///
    /// Read-only: elapsed reset times are counted as `usable` but the records
    /// themselves are only reactivated by a selection scan.
    pub async fn status_snapshot(&self) -> PoolSnapshot {
        let now = self.clock.now();
        let state = self.state.read().await;

        let mut snapshot = PoolSnapshot {
            total: self.credentials.len(),
            active: 0,
            rate_limited: 0,
            error: 0,
            usable: 0,
            credentials: Vec::with_capacity(self.credentials.len()),
        };

        for (idx, (secret, health)) in self.credentials.iter().zip(&state.health).enumerate() {
            let status = health.status();
            match status {
                CredentialStatus::Active => snapshot.active += 1,
                CredentialStatus::RateLimited => snapshot.rate_limited += 1,
                CredentialStatus::Error => snapshot.error += 1,
                CredentialStatus::Disabled => {}
            }
            if health.usable_at(now) {
                snapshot.usable += 1;
            }
            snapshot.credentials.push(CredentialEntry {
                index: idx + 1,
                suffix: secret.suffix(),
                status,
                active: health.active,
                requests_remaining: health.requests_remaining,
                quota_reset_at: health.quota_reset_at,
                rate_limit_reset_at: health.rate_limit_reset_at,
                error_count: health.consecutive_error_count,
                last_error: health.last_error.clone(),
            });
        }

        snapshot
    }
}
