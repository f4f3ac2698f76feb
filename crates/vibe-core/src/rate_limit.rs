//! # Sliding-Window Rate Limiter
//!
//! Only requests inside the trailing window count. Each `(identity, action)`
//! pair owns one [`RateLimitRecord`] in the shared [`RateLimitStore`]; stale
//! timestamps are dropped whenever the record is rewritten, and a periodic
//! [`RateLimiter::sweep`] removes records nobody has touched for a day.
//!
//! Writes are version-conditional, so concurrent checks for the same key are
//! serialized by the store instead of over-admitting.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::models::{RateLimitDecision, RateLimitPolicy, RateLimitRecord};
use crate::traits::RateLimitStore;

/// How long a record survives without updates before the sweep removes it.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

const MAX_WRITE_ATTEMPTS: usize = 5;

/// Outcome of evaluating one request against a history.
#[derive(Debug, PartialEq)]
enum Evaluation {
    Admitted { timestamps: Vec<DateTime<Utc>>, remaining: u32 },
    Denied { reset_at: DateTime<Utc> },
}

/// Applies the sliding window to `history` for a request arriving at `now`.
fn evaluate(history: &[DateTime<Utc>], now: DateTime<Utc>, policy: &RateLimitPolicy) -> Evaluation {
    let window = policy.window_delta();
    let window_start = now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);

    let mut effective: Vec<DateTime<Utc>> = history.iter().copied().filter(|ts| *ts > window_start).collect();

    if effective.len() >= policy.limit as usize {
        let reset_at = effective
            .iter()
            .min()
            .map(|oldest| add_window(*oldest, window))
            .unwrap_or_else(|| add_window(now, window));
        return Evaluation::Denied { reset_at };
    }

    effective.push(now);
    let remaining = policy.limit.saturating_sub(effective.len() as u32);
    Evaluation::Admitted { timestamps: effective, remaining }
}

fn add_window(ts: DateTime<Utc>, window: TimeDelta) -> DateTime<Utc> {
    ts.checked_add_signed(window).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Sliding-window limiter over a shared store.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>) -> Self {
        Self { store }
    }

    /// Checks (and, if admitted, records) a request made now.
    pub async fn check(&self, identity: &str, action: &str, policy: &RateLimitPolicy) -> Result<RateLimitDecision> {
        self.check_at(identity, action, policy, Utc::now()).await
    }

    /// Same as [`RateLimiter::check`] with an explicit clock.
    ///
    /// Store failures propagate: the limiter never fails open.
    pub async fn check_at(
        &self,
        identity: &str,
        action: &str,
        policy: &RateLimitPolicy,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision> {
        let key = RateLimitRecord::key_for(identity, action);
        let reset_if_admitted = add_window(now, policy.window_delta());

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let existing = self.store.load(&key).await.map_err(AppError::internal)?;
            let history = existing.as_ref().map(|r| r.request_timestamps.as_slice()).unwrap_or_default();

            let (timestamps, remaining) = match evaluate(history, now, policy) {
                Evaluation::Denied { reset_at } => {
                    debug!(%key, %reset_at, "rate limit denied");
                    return Ok(RateLimitDecision { allowed: false, remaining: 0, reset_at });
                }
                Evaluation::Admitted { timestamps, remaining } => (timestamps, remaining),
            };

            let written = match existing {
                None => {
                    let record = RateLimitRecord::with_timestamps(key.clone(), timestamps, now, 1);
                    self.store.insert(&record).await.map_err(AppError::internal)?
                }
                Some(current) => {
                    let record =
                        RateLimitRecord::with_timestamps(key.clone(), timestamps, now, current.version + 1);
                    self.store.replace(&record, current.version).await.map_err(AppError::internal)?
                }
            };

            if written {
                return Ok(RateLimitDecision { allowed: true, remaining, reset_at: reset_if_admitted });
            }
            debug!(%key, attempt, "rate limit record changed concurrently, re-evaluating");
        }

        Err(AppError::Conflict(format!("rate limit record {key} is under contention")))
    }

    /// Removes records not updated within `retention`.
    pub async fn sweep(&self, retention: Duration) -> Result<u64> {
        let retention = TimeDelta::from_std(retention).map_err(AppError::internal)?;
        let cutoff = Utc::now().checked_sub_signed(retention).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let removed = self.store.purge_expired(cutoff).await.map_err(AppError::internal)?;
        if removed > 0 {
            info!(removed, "swept expired rate limit records");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRateLimitStore;
    use crate::traits::MockRateLimitStore;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-03-01T12:00:00Z").unwrap().with_timezone(&Utc)
    }

    fn limiter() -> (RateLimiter, Arc<MemoryRateLimitStore>) {
        let store = Arc::new(MemoryRateLimitStore::default());
        (RateLimiter::new(store.clone()), store)
    }

    #[tokio::test]
    async fn first_request_creates_record() {
        let (limiter, store) = limiter();
        let policy = RateLimitPolicy::new(10, Duration::from_secs(60));

        let decision = limiter.check_at("1.2.3.4", "generate-vibe", &policy, t0()).await.unwrap();

        assert!(decision.allowed);
        assert_eq!(decision.remaining, 9);
        assert_eq!(decision.reset_at, t0() + TimeDelta::seconds(60));

        let record = store.load("1.2.3.4:generate-vibe").await.unwrap().unwrap();
        assert_eq!(record.request_timestamps, vec![t0()]);
        assert_eq!(record.count, 1);
    }

    #[tokio::test]
    async fn denies_after_limit_and_readmits_after_window() {
        let (limiter, _) = limiter();
        let policy = RateLimitPolicy::new(3, Duration::from_secs(60));

        for i in 0..3 {
            let now = t0() + TimeDelta::seconds(i * 10);
            let decision = limiter.check_at("ip", "a", &policy, now).await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.remaining, 2 - i as u32);
        }

        let denied = limiter.check_at("ip", "a", &policy, t0() + TimeDelta::seconds(30)).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.reset_at, t0() + TimeDelta::seconds(60));

        let later = t0() + TimeDelta::seconds(60) + TimeDelta::milliseconds(1);
        let readmitted = limiter.check_at("ip", "a", &policy, later).await.unwrap();
        assert!(readmitted.allowed);
    }

    #[tokio::test]
    async fn denial_does_not_consume_quota_and_reset_is_monotonic() {
        let (limiter, store) = limiter();
        let policy = RateLimitPolicy::new(2, Duration::from_secs(100));

        limiter.check_at("ip", "a", &policy, t0()).await.unwrap();
        limiter.check_at("ip", "a", &policy, t0() + TimeDelta::seconds(50)).await.unwrap();
        let version = store.load("ip:a").await.unwrap().unwrap().version;

        let mut last_reset = DateTime::<Utc>::MIN_UTC;
        for offset in [60, 70, 99] {
            let decision = limiter.check_at("ip", "a", &policy, t0() + TimeDelta::seconds(offset)).await.unwrap();
            assert!(!decision.allowed);
            assert!(decision.reset_at >= last_reset);
            last_reset = decision.reset_at;
        }
        assert_eq!(last_reset, t0() + TimeDelta::seconds(100));

        let record = store.load("ip:a").await.unwrap().unwrap();
        assert_eq!(record.version, version);
        assert_eq!(record.count, 2);

        // The first request ages out; the reset moves to the second one.
        let admitted = limiter.check_at("ip", "a", &policy, t0() + TimeDelta::seconds(101)).await.unwrap();
        assert!(admitted.allowed);
        let denied = limiter.check_at("ip", "a", &policy, t0() + TimeDelta::seconds(102)).await.unwrap();
        assert_eq!(denied.reset_at, t0() + TimeDelta::seconds(150));
    }

    #[tokio::test]
    async fn stale_timestamps_are_pruned_on_write() {
        let (limiter, store) = limiter();
        let policy = RateLimitPolicy::new(5, Duration::from_secs(10));

        for i in 0..4 {
            limiter.check_at("ip", "a", &policy, t0() + TimeDelta::seconds(i)).await.unwrap();
        }
        let decision = limiter.check_at("ip", "a", &policy, t0() + TimeDelta::seconds(30)).await.unwrap();

        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
        let record = store.load("ip:a").await.unwrap().unwrap();
        assert_eq!(record.request_timestamps, vec![t0() + TimeDelta::seconds(30)]);
        assert_eq!(record.count, 1);
    }

    #[tokio::test]
    async fn identities_and_actions_are_independent() {
        let (limiter, _) = limiter();
        let policy = RateLimitPolicy::new(1, Duration::from_secs(60));

        assert!(limiter.check_at("a", "x", &policy, t0()).await.unwrap().allowed);
        assert!(!limiter.check_at("a", "x", &policy, t0()).await.unwrap().allowed);
        assert!(limiter.check_at("b", "x", &policy, t0()).await.unwrap().allowed);
        assert!(limiter.check_at("a", "y", &policy, t0()).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn zero_limit_denies_everything() {
        let (limiter, store) = limiter();
        let policy = RateLimitPolicy::new(0, Duration::from_secs(60));

        let decision = limiter.check_at("ip", "a", &policy, t0()).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.reset_at, t0() + TimeDelta::seconds(60));
        assert!(store.load("ip:a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_checks_never_over_admit() {
        let (limiter, _) = limiter();
        let policy = RateLimitPolicy::new(5, Duration::from_secs(60));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let limiter = limiter.clone();
            let policy = policy.clone();
            handles.push(tokio::spawn(async move { limiter.check_at("ip", "a", &policy, t0()).await }));
        }

        let mut admitted = 0;
        for handle in handles {
            // Heavy contention may exhaust the write attempts; that is a failure, never an admission.
            if let Ok(decision) = handle.await.unwrap() {
                if decision.allowed {
                    admitted += 1;
                }
            }
        }
        assert!(admitted <= 5);
    }

    #[tokio::test]
    async fn lost_race_is_retried() {
        let mut store = MockRateLimitStore::new();
        let existing = RateLimitRecord::first("ip:a".to_string(), t0());
        store.expect_load().times(2).returning(move |_| Ok(Some(existing.clone())));
        let mut results = vec![true, false];
        store.expect_replace().times(2).returning(move |_, _| Ok(results.pop().unwrap()));

        let limiter = RateLimiter::new(Arc::new(store));
        let policy = RateLimitPolicy::new(5, Duration::from_secs(60));
        let decision = limiter.check_at("ip", "a", &policy, t0() + TimeDelta::seconds(1)).await.unwrap();

        assert!(decision.allowed);
        assert_eq!(decision.remaining, 3);
    }

    #[tokio::test]
    async fn store_failure_fails_closed() {
        let mut store = MockRateLimitStore::new();
        store.expect_load().returning(|_| Err(anyhow::anyhow!("connection refused")));

        let limiter = RateLimiter::new(Arc::new(store));
        let err = limiter.check_at("ip", "a", &RateLimitPolicy::default(), t0()).await.unwrap_err();

        assert!(matches!(err, AppError::Internal(msg) if msg.contains("connection refused")));
    }

    #[tokio::test]
    async fn sweep_removes_idle_records() {
        let (limiter, store) = limiter();
        let old = Utc::now() - TimeDelta::hours(25);
        store.insert(&RateLimitRecord::first("old:a".into(), old)).await.unwrap();
        store.insert(&RateLimitRecord::first("new:a".into(), Utc::now())).await.unwrap();

        let removed = limiter.sweep(DEFAULT_RETENTION).await.unwrap();

        assert_eq!(removed, 1);
        assert!(store.load("old:a").await.unwrap().is_none());
        assert!(store.load("new:a").await.unwrap().is_some());
    }
}
