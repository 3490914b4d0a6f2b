//! Background workers: the pull loop and the dedup sweeper.
//!
//! The pull loop is the sole owner of [`SnapshotState`]. It runs one
//! iteration at a time (fetch, diff, emit, replace state, then sleep), so
//! iterations can never overlap. Shutdown is observed between iterations
//! only: an in-flight iteration always completes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dedup::DedupStore;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::reconcile::{Snapshot, SnapshotState};
use crate::types::IngestReport;

/// Conditional-fetch validators from the previous response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheToken {
  pub etag: Option<String>,
  pub last_modified: Option<String>,
}

impl CacheToken {
  /// `None` when the response carried neither validator.
  pub fn from_parts(etag: Option<String>, last_modified: Option<String>) -> Option<Self> {
    if etag.is_none() && last_modified.is_none() {
      None
    } else {
      Some(Self { etag, last_modified })
    }
  }
}

/// One poll result from a [`PullSource`].
#[derive(Debug, Clone, Default)]
pub struct PullResult {
  /// Raw summary body; absent when the source reports "unchanged".
  pub snapshot: Option<Vec<u8>>,
  pub changed: bool,
  pub cache_token: Option<CacheToken>,
}

impl PullResult {
  pub fn changed(snapshot: Vec<u8>, cache_token: Option<CacheToken>) -> Self {
    Self {
      snapshot: Some(snapshot),
      changed: true,
      cache_token,
    }
  }

  pub fn unchanged(cache_token: Option<CacheToken>) -> Self {
    Self {
      snapshot: None,
      changed: false,
      cache_token,
    }
  }
}

/// Fetch collaborator for the pull path. Implementations apply their own timeout.
#[async_trait]
pub trait PullSource: Send + Sync {
  fn name(&self) -> &str;

  async fn fetch(&self, cache_token: Option<&CacheToken>) -> Result<PullResult, EngineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
  /// Source reported no change for our token; state untouched.
  Unchanged,
  Reconciled(IngestReport),
}

/// Delay before the next iteration after `failures` consecutive failures.
pub fn backoff_delay(interval: Duration, max_backoff: Duration, failures: u32) -> Duration {
  if failures == 0 {
    return interval;
  }
  let factor = 2u32.saturating_pow(failures.saturating_sub(1).min(16));
  interval.saturating_mul(factor).min(max_backoff.max(interval))
}

pub struct Poller<S> {
  engine: Arc<Engine>,
  source: S,
  state: SnapshotState,
  cache_token: Option<CacheToken>,
  failures: u32,
}

impl<S: PullSource> Poller<S> {
  pub fn new(engine: Arc<Engine>, source: S) -> Self {
    Self {
      engine,
      source,
      state: SnapshotState::new(),
      cache_token: None,
      failures: 0,
    }
  }

  pub fn state(&self) -> &SnapshotState {
    &self.state
  }

  pub fn cache_token(&self) -> Option<&CacheToken> {
    self.cache_token.as_ref()
  }

  /// Run one iteration. On error, snapshot state and cache token are unchanged.
  pub async fn tick_at(&mut self, now: DateTime<Utc>) -> Result<TickOutcome, EngineError> {
    let result = self.source.fetch(self.cache_token.as_ref()).await?;

    // The token only lets us skip when there is one to vouch for "unchanged".
    let token_known = result.cache_token.is_some() || self.cache_token.is_some();
    if !result.changed && token_known {
      if result.cache_token.is_some() {
        self.cache_token = result.cache_token;
      }
      return Ok(TickOutcome::Unchanged);
    }

    let Some(body) = result.snapshot else {
      return Err(EngineError::fetch("source returned no snapshot body"));
    };
    let snapshot = Snapshot::parse(&body)?;
    let report = self.engine.ingest_snapshot_at(&self.state, &snapshot, now).await?;

    self.state = snapshot.state;
    self.cache_token = result.cache_token;
    Ok(TickOutcome::Reconciled(report))
  }

  /// Poll until `shutdown` flips to true (or its sender is dropped).
  pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
    let interval = self.engine.config().poll_interval;
    let max_backoff = self.engine.config().max_backoff;
    info!(source = self.source.name(), interval_secs = interval.as_secs(), "poller started");

    loop {
      if *shutdown.borrow() {
        break;
      }

      match self.tick_at(Utc::now()).await {
        Ok(TickOutcome::Unchanged) => {
          self.failures = 0;
          debug!(source = self.source.name(), "summary unchanged");
        }
        Ok(TickOutcome::Reconciled(report)) => {
          self.failures = 0;
          debug!(
            source = self.source.name(),
            normalized = report.normalized,
            emitted = report.emitted,
            duplicates = report.duplicates,
            "poll complete"
          );
        }
        Err(e) => {
          self.failures = self.failures.saturating_add(1);
          let delay = backoff_delay(interval, max_backoff, self.failures);
          error!(
            source = self.source.name(),
            error = %e,
            failures = self.failures,
            retry_in_secs = delay.as_secs(),
            "poll failed, keeping previous snapshot"
          );
        }
      }

      let delay = backoff_delay(interval, max_backoff, self.failures);
      tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        changed = shutdown.changed() => {
          if changed.is_err() {
            break;
          }
        }
      }
    }

    info!(source = self.source.name(), "poller stopped");
  }
}

/// Spawn a task that sweeps expired dedup entries every `every`.
pub fn spawn_sweeper(store: Arc<dyn DedupStore>, every: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick completes immediately; nothing to sweep at startup.
    ticker.tick().await;
    loop {
      tokio::select! {
        _ = ticker.tick() => {}
        changed = shutdown.changed() => {
          if changed.is_err() || *shutdown.borrow() {
            break;
          }
          continue;
        }
      }
      match store.sweep(Utc::now()).await {
        Ok(0) => {}
        Ok(removed) => debug!(removed, backend = store.backend(), "swept expired dedup entries"),
        Err(e) => warn!(error = %e, backend = store.backend(), "dedup sweep failed"),
      }
    }
  })
}
