//! Deduplication store: which fingerprints have been emitted, with expiry.
//!
//! The contract every backend honors:
//! - `claim` is an atomic check-then-set per key. Of any number of callers
//!   racing on one fingerprint, exactly one observes `true`.
//! - Entries expire `ttl` after they were recorded. An expired key is
//!   forgotten: the same update arriving after the TTL is emitted
//!   again. This keeps memory bounded.
//!
//! [`MemoryStore`] is process-local. Shared backends (e.g. PostgreSQL, in the
//! relay crate) implement the same trait; [`FailoverStore`] puts one in front
//! of an in-memory fallback for outages.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::types::{DedupRecord, Fingerprint};

/// Map size that triggers a lazy sweep inside `claim`.
const DEFAULT_SWEEP_THRESHOLD: usize = 10_000;

#[async_trait]
pub trait DedupStore: Send + Sync {
  /// Short backend name for logs and health output.
  fn backend(&self) -> &'static str;

  /// True when a shared backend is down and a fallback is serving.
  fn is_degraded(&self) -> bool {
    false
  }

  /// Check that the backend is reachable. Process-local stores always are.
  async fn ping(&self) -> Result<(), EngineError> {
    Ok(())
  }

  /// True if `key` is recorded and not expired at `now`.
  async fn seen(&self, key: &Fingerprint, now: DateTime<Utc>) -> Result<bool, EngineError>;

  /// Record `key` with expiry `now + ttl`. Idempotent; refreshes the expiry.
  async fn mark_seen(&self, key: &Fingerprint, now: DateTime<Utc>) -> Result<(), EngineError>;

  /// Atomically record `key` unless it is live. Returns true for the caller
  /// that recorded it.
  async fn claim(&self, key: &Fingerprint, now: DateTime<Utc>) -> Result<bool, EngineError>;

  /// Drop entries expired at `now`; returns how many were removed.
  async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, EngineError>;
}

/// `now + ttl`, saturating at the maximum representable instant.
pub fn expires_at(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
  chrono::Duration::from_std(ttl)
    .ok()
    .and_then(|d| now.checked_add_signed(d))
    .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

struct MemoryState {
  entries: HashMap<Fingerprint, DedupRecord>,
  /// Size at which the next lazy sweep runs.
  sweep_at: usize,
}

/// Process-local store; lost on restart.
pub struct MemoryStore {
  ttl: Duration,
  sweep_threshold: usize,
  state: Mutex<MemoryState>,
}

impl MemoryStore {
  pub fn new(ttl: Duration) -> Self {
    Self::with_sweep_threshold(ttl, DEFAULT_SWEEP_THRESHOLD)
  }

  pub fn with_sweep_threshold(ttl: Duration, sweep_threshold: usize) -> Self {
    let sweep_threshold = sweep_threshold.max(1);
    Self {
      ttl,
      sweep_threshold,
      state: Mutex::new(MemoryState {
        entries: HashMap::new(),
        sweep_at: sweep_threshold,
      }),
    }
  }

  /// Number of stored entries, expired or not.
  pub fn len(&self) -> usize {
    self.lock().map(|s| s.entries.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, EngineError> {
    self
      .state
      .lock()
      .map_err(|e| EngineError::store(format!("lock poisoned: {}", e)))
  }

  fn record(&self, now: DateTime<Utc>) -> DedupRecord {
    DedupRecord {
      first_seen: now,
      expires_at: expires_at(now, self.ttl),
    }
  }

  fn sweep_locked(&self, state: &mut MemoryState, now: DateTime<Utc>) -> usize {
    let before = state.entries.len();
    state.entries.retain(|_, rec| rec.is_live(now));
    // Avoid re-sweeping on every call when most entries are still live.
    state.sweep_at = (state.entries.len() * 2).max(self.sweep_threshold);
    before - state.entries.len()
  }
}

#[async_trait]
impl DedupStore for MemoryStore {
  fn backend(&self) -> &'static str {
    "memory"
  }

  async fn seen(&self, key: &Fingerprint, now: DateTime<Utc>) -> Result<bool, EngineError> {
    let state = self.lock()?;
    Ok(state.entries.get(key).is_some_and(|rec| rec.is_live(now)))
  }

  async fn mark_seen(&self, key: &Fingerprint, now: DateTime<Utc>) -> Result<(), EngineError> {
    let mut state = self.lock()?;
    let fresh = self.record(now);
    state
      .entries
      .entry(key.clone())
      .and_modify(|rec| {
        if !rec.is_live(now) {
          rec.first_seen = now;
        }
        rec.expires_at = fresh.expires_at;
      })
      .or_insert(fresh);
    Ok(())
  }

  async fn claim(&self, key: &Fingerprint, now: DateTime<Utc>) -> Result<bool, EngineError> {
    let mut state = self.lock()?;
    if state.entries.len() >= state.sweep_at {
      let removed = self.sweep_locked(&mut state, now);
      debug!(removed, remaining = state.entries.len(), "lazy dedup sweep");
    }

    if state.entries.get(key).is_some_and(|rec| rec.is_live(now)) {
      return Ok(false);
    }
    let rec = self.record(now);
    state.entries.insert(key.clone(), rec);
    Ok(true)
  }

  async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, EngineError> {
    let mut state = self.lock()?;
    Ok(self.sweep_locked(&mut state, now))
  }
}

// ---------------------------------------------------------------------------
// Failover store
// ---------------------------------------------------------------------------

/// How long a degraded store serves from memory before retrying the primary.
pub const DEFAULT_RECHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Shared store with an in-memory fallback.
///
/// While healthy every call goes to the primary. When it reports an error the
/// call is served from memory and the store flips into degraded mode, which is
/// logged once per outage. While degraded, calls are answered from memory and
/// the primary is only retried once per recheck interval, so an outage costs
/// one slow call per interval instead of one per record. Keys claimed in
/// memory during an outage keep suppressing duplicates after the primary comes
/// back, until they expire.
pub struct FailoverStore<P> {
  primary: P,
  fallback: MemoryStore,
  degraded: AtomicBool,
  recheck_interval: Duration,
  /// Earliest instant at which a degraded store retries the primary.
  next_recheck: Mutex<Option<DateTime<Utc>>>,
}

impl<P: DedupStore> FailoverStore<P> {
  pub fn new(primary: P, ttl: Duration) -> Self {
    Self::with_recheck_interval(primary, ttl, DEFAULT_RECHECK_INTERVAL)
  }

  pub fn with_recheck_interval(primary: P, ttl: Duration, recheck_interval: Duration) -> Self {
    Self {
      primary,
      fallback: MemoryStore::new(ttl),
      degraded: AtomicBool::new(false),
      recheck_interval,
      next_recheck: Mutex::new(None),
    }
  }

  pub fn primary(&self) -> &P {
    &self.primary
  }

  /// Enter degraded mode from outside a call, e.g. when a startup check
  /// against the primary fails.
  pub fn mark_unavailable(&self, err: &EngineError, now: DateTime<Utc>) {
    self.on_failure(err, now);
  }

  /// True when the primary should be tried for a call at `now`. Of concurrent
  /// degraded callers past the recheck instant, only one gets to retry.
  fn primary_due(&self, now: DateTime<Utc>) -> bool {
    if !self.degraded.load(Ordering::SeqCst) {
      return true;
    }
    let Ok(mut next) = self.next_recheck.lock() else {
      return true;
    };
    match *next {
      Some(at) if now < at => false,
      _ => {
        *next = Some(expires_at(now, self.recheck_interval));
        true
      }
    }
  }

  fn on_failure(&self, err: &EngineError, now: DateTime<Utc>) {
    if let Ok(mut next) = self.next_recheck.lock() {
      *next = Some(expires_at(now, self.recheck_interval));
    }
    if !self.degraded.swap(true, Ordering::SeqCst) {
      warn!(
        backend = self.primary.backend(),
        error = %err,
        recheck_secs = self.recheck_interval.as_secs(),
        "shared dedup store unavailable, falling back to in-memory dedup"
      );
    }
  }

  fn on_success(&self) {
    if self.degraded.load(Ordering::Relaxed) && self.degraded.swap(false, Ordering::SeqCst) {
      if let Ok(mut next) = self.next_recheck.lock() {
        *next = None;
      }
      info!(backend = self.primary.backend(), "shared dedup store reachable again");
    }
  }
}

#[async_trait]
impl<P: DedupStore> DedupStore for FailoverStore<P> {
  fn backend(&self) -> &'static str {
    self.primary.backend()
  }

  fn is_degraded(&self) -> bool {
    self.degraded.load(Ordering::SeqCst)
  }

  /// Always asks the primary, so health checks see recovery right away.
  async fn ping(&self) -> Result<(), EngineError> {
    match self.primary.ping().await {
      Ok(()) => {
        self.on_success();
        Ok(())
      }
      Err(e) => {
        self.on_failure(&e, Utc::now());
        Err(e)
      }
    }
  }

  async fn seen(&self, key: &Fingerprint, now: DateTime<Utc>) -> Result<bool, EngineError> {
    if self.fallback.seen(key, now).await? {
      return Ok(true);
    }
    if !self.primary_due(now) {
      return Ok(false);
    }
    match self.primary.seen(key, now).await {
      Ok(seen) => {
        self.on_success();
        Ok(seen)
      }
      Err(e) => {
        self.on_failure(&e, now);
        Ok(false)
      }
    }
  }

  async fn mark_seen(&self, key: &Fingerprint, now: DateTime<Utc>) -> Result<(), EngineError> {
    if !self.primary_due(now) {
      return self.fallback.mark_seen(key, now).await;
    }
    match self.primary.mark_seen(key, now).await {
      Ok(()) => {
        self.on_success();
        Ok(())
      }
      Err(e) => {
        self.on_failure(&e, now);
        self.fallback.mark_seen(key, now).await
      }
    }
  }

  async fn claim(&self, key: &Fingerprint, now: DateTime<Utc>) -> Result<bool, EngineError> {
    if self.fallback.seen(key, now).await? {
      return Ok(false);
    }
    if !self.primary_due(now) {
      return self.fallback.claim(key, now).await;
    }
    match self.primary.claim(key, now).await {
      Ok(claimed) => {
        self.on_success();
        Ok(claimed)
      }
      Err(e) => {
        self.on_failure(&e, now);
        self.fallback.claim(key, now).await
      }
    }
  }

  async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, EngineError> {
    let mut removed = self.fallback.sweep(now).await?;
    if !self.primary_due(now) {
      return Ok(removed);
    }
    match self.primary.sweep(now).await {
      Ok(n) => {
        self.on_success();
        removed += n;
      }
      Err(e) => self.on_failure(&e, now),
    }
    Ok(removed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fingerprint;
  use chrono::TimeZone;
  use std::sync::atomic::AtomicUsize;
  use std::sync::Arc;

  const HOUR: Duration = Duration::from_secs(3600);

  fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 11, 18, 12, 0, 0).unwrap()
  }

  fn key(n: u32) -> Fingerprint {
    fingerprint::compute("inc_001", &format!("u{}", n))
  }

  #[tokio::test]
  async fn claim_succeeds_once_within_ttl() {
    let store = MemoryStore::new(HOUR);
    assert!(store.claim(&key(1), t0()).await.unwrap());
    assert!(!store.claim(&key(1), t0()).await.unwrap());
    assert!(store.seen(&key(1), t0()).await.unwrap());
    assert!(!store.seen(&key(2), t0()).await.unwrap());
  }

  #[tokio::test]
  async fn expired_key_is_intentionally_forgotten() {
    let store = MemoryStore::new(HOUR);
    assert!(store.claim(&key(1), t0()).await.unwrap());

    let later = t0() + chrono::Duration::hours(1);
    assert!(!store.seen(&key(1), later).await.unwrap());
    // Re-emission after TTL is the bounded-memory policy, not a bug.
    assert!(store.claim(&key(1), later).await.unwrap());
  }

  #[tokio::test]
  async fn mark_seen_is_idempotent_and_refreshes_expiry() {
    let store = MemoryStore::new(HOUR);
    store.mark_seen(&key(1), t0()).await.unwrap();
    store.mark_seen(&key(1), t0()).await.unwrap();
    assert_eq!(store.len(), 1);

    let half = t0() + chrono::Duration::minutes(30);
    store.mark_seen(&key(1), half).await.unwrap();
    let after_first_expiry = t0() + chrono::Duration::minutes(70);
    assert!(store.seen(&key(1), after_first_expiry).await.unwrap());
  }

  #[tokio::test]
  async fn sweep_removes_only_expired() {
    let store = MemoryStore::new(HOUR);
    store.claim(&key(1), t0()).await.unwrap();
    store
      .claim(&key(2), t0() + chrono::Duration::minutes(45))
      .await
      .unwrap();

    let removed = store.sweep(t0() + chrono::Duration::minutes(61)).await.unwrap();
    assert_eq!(removed, 1);
    assert_eq!(store.len(), 1);
  }

  #[tokio::test]
  async fn lazy_sweep_bounds_growth() {
    let store = MemoryStore::with_sweep_threshold(HOUR, 4);
    for n in 0..4 {
      store.claim(&key(n), t0()).await.unwrap();
    }
    assert_eq!(store.len(), 4);
    let later = t0() + chrono::Duration::hours(2);
    store.claim(&key(99), later).await.unwrap();
    assert_eq!(store.len(), 1);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn concurrent_claims_have_one_winner() {
    let store = Arc::new(MemoryStore::new(HOUR));
    let wins = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for _ in 0..32 {
      let store = Arc::clone(&store);
      let wins = Arc::clone(&wins);
      handles.push(tokio::spawn(async move {
        if store.claim(&key(7), t0()).await.unwrap() {
          wins.fetch_add(1, Ordering::SeqCst);
        }
      }));
    }
    for h in handles {
      h.await.unwrap();
    }
    assert_eq!(wins.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn expiry_saturates() {
    let huge = Duration::from_secs(u64::MAX);
    assert_eq!(expires_at(t0(), huge), DateTime::<Utc>::MAX_UTC);
  }

  /// Primary that can be switched off. Counts every call it receives.
  struct FlakyStore {
    down: AtomicBool,
    calls: AtomicUsize,
    inner: MemoryStore,
  }

  impl FlakyStore {
    fn check(&self) -> Result<(), EngineError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if self.down.load(Ordering::SeqCst) {
        Err(EngineError::store("connection refused"))
      } else {
        Ok(())
      }
    }
  }

  #[async_trait]
  impl DedupStore for FlakyStore {
    fn backend(&self) -> &'static str {
      "flaky"
    }
    async fn ping(&self) -> Result<(), EngineError> {
      self.check()
    }
    async fn seen(&self, key: &Fingerprint, now: DateTime<Utc>) -> Result<bool, EngineError> {
      self.check()?;
      self.inner.seen(key, now).await
    }
    async fn mark_seen(&self, key: &Fingerprint, now: DateTime<Utc>) -> Result<(), EngineError> {
      self.check()?;
      self.inner.mark_seen(key, now).await
    }
    async fn claim(&self, key: &Fingerprint, now: DateTime<Utc>) -> Result<bool, EngineError> {
      self.check()?;
      self.inner.claim(key, now).await
    }
    async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, EngineError> {
      self.check()?;
      self.inner.sweep(now).await
    }
  }

  fn flaky(down: bool) -> FailoverStore<FlakyStore> {
    FailoverStore::new(
      FlakyStore {
        down: AtomicBool::new(down),
        calls: AtomicUsize::new(0),
        inner: MemoryStore::new(HOUR),
      },
      HOUR,
    )
  }

  fn primary_calls(store: &FailoverStore<FlakyStore>) -> usize {
    store.primary().calls.load(Ordering::SeqCst)
  }

  fn secs(n: i64) -> chrono::Duration {
    chrono::Duration::seconds(n)
  }

  #[tokio::test]
  async fn failover_serves_from_memory_during_outage() {
    let store = flaky(true);
    assert!(!store.is_degraded());
    assert!(store.claim(&key(1), t0()).await.unwrap());
    assert!(store.is_degraded());
    assert!(!store.claim(&key(1), t0()).await.unwrap());
  }

  #[tokio::test]
  async fn outage_claims_still_suppress_after_recovery() {
    let store = flaky(true);
    assert!(store.claim(&key(1), t0()).await.unwrap());

    store.primary().down.store(false, Ordering::SeqCst);
    let later = t0() + secs(31);
    assert!(!store.claim(&key(1), later).await.unwrap());

    assert!(store.claim(&key(2), later).await.unwrap());
    assert!(!store.is_degraded());
    assert!(store.primary().inner.seen(&key(2), t0()).await.unwrap());
  }

  #[tokio::test]
  async fn healthy_primary_is_authoritative() {
    let store = flaky(false);
    assert!(store.claim(&key(3), t0()).await.unwrap());
    assert!(store.primary().inner.seen(&key(3), t0()).await.unwrap());
    assert!(store.fallback.is_empty());
    assert!(!store.is_degraded());
  }

  #[tokio::test]
  async fn degraded_store_retries_primary_once_per_interval() {
    let store = flaky(true);
    for n in 0..10 {
      assert!(store.claim(&key(n), t0() + secs(n as i64)).await.unwrap());
    }
    assert_eq!(primary_calls(&store), 1);
    assert!(store.is_degraded());

    // Still down at the recheck: one retry, then memory again.
    store.claim(&key(20), t0() + secs(30)).await.unwrap();
    store.claim(&key(21), t0() + secs(31)).await.unwrap();
    assert_eq!(primary_calls(&store), 2);

    store.primary().down.store(false, Ordering::SeqCst);
    assert!(store.claim(&key(22), t0() + secs(61)).await.unwrap());
    assert_eq!(primary_calls(&store), 3);
    assert!(!store.is_degraded());
    assert!(store.primary().inner.seen(&key(22), t0() + secs(61)).await.unwrap());
  }

  #[tokio::test]
  async fn seen_checks_primary_when_healthy_and_memory_when_degraded() {
    let store = flaky(false);
    store.primary().inner.claim(&key(1), t0()).await.unwrap();
    assert!(store.seen(&key(1), t0()).await.unwrap());
    assert!(!store.seen(&key(2), t0()).await.unwrap());

    store.primary().down.store(true, Ordering::SeqCst);
    // The primary's copy is unreachable, so the key reads as unseen.
    assert!(!store.seen(&key(1), t0()).await.unwrap());
    assert!(store.is_degraded());

    store.claim(&key(3), t0()).await.unwrap();
    assert!(store.seen(&key(3), t0()).await.unwrap());
  }

  #[tokio::test]
  async fn mark_seen_writes_primary_when_healthy_and_memory_when_degraded() {
    let store = flaky(false);
    store.mark_seen(&key(1), t0()).await.unwrap();
    assert!(store.primary().inner.seen(&key(1), t0()).await.unwrap());
    assert!(store.fallback.is_empty());

    store.primary().down.store(true, Ordering::SeqCst);
    store.mark_seen(&key(2), t0()).await.unwrap();
    assert!(store.is_degraded());
    assert!(store.fallback.seen(&key(2), t0()).await.unwrap());
    assert!(!store.claim(&key(2), t0()).await.unwrap());
  }

  #[tokio::test]
  async fn sweep_covers_both_stores_and_survives_outage() {
    let store = flaky(false);
    store.claim(&key(1), t0()).await.unwrap();
    assert_eq!(store.sweep(t0() + secs(3601)).await.unwrap(), 1);

    store.primary().down.store(true, Ordering::SeqCst);
    store.claim(&key(2), t0()).await.unwrap();
    assert!(store.is_degraded());
    // Past the recheck the primary is tried and fails; the fallback is still swept.
    assert_eq!(store.sweep(t0() + secs(3601)).await.unwrap(), 1);
    assert!(store.fallback.is_empty());
  }

  #[tokio::test]
  async fn mark_unavailable_starts_degraded_and_ping_recovers() {
    let store = flaky(true);
    store.mark_unavailable(&EngineError::store("schema check failed"), t0());
    assert!(store.is_degraded());

    assert!(store.claim(&key(1), t0()).await.unwrap());
    assert_eq!(primary_calls(&store), 0);

    assert!(store.ping().await.is_err());
    store.primary().down.store(false, Ordering::SeqCst);
    assert!(store.ping().await.is_ok());
    assert!(!store.is_degraded());
  }
}
