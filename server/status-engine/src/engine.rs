//! Core engine: verifies, normalizes, deduplicates and emits updates.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dedup::{DedupStore, MemoryStore};
use crate::error::EngineError;
use crate::fingerprint;
use crate::normalize;
use crate::reconcile::{self, Snapshot, SnapshotState};
use crate::sink::Sink;
use crate::types::*;
use crate::verify::Verifier;

/// Status the source reports for a healthy component.
const OPERATIONAL: &str = "operational";

/// The update pipeline. Shared by the push handler and the pull worker;
/// all mutable dedup state lives behind the [`DedupStore`].
pub struct Engine {
  config: Config,
  verifier: Verifier,
  store: Arc<dyn DedupStore>,
  sink: Arc<dyn Sink>,
}

impl Engine {
  pub fn new(config: Config, verifier: Verifier, store: Arc<dyn DedupStore>, sink: Arc<dyn Sink>) -> Self {
    Self {
      config,
      verifier,
      store,
      sink,
    }
  }

  /// Process-local dedup with the configured TTL.
  pub fn with_memory_store(config: Config, verifier: Verifier, sink: Arc<dyn Sink>) -> Self {
    let store = Arc::new(MemoryStore::new(config.dedup_ttl));
    Self::new(config, verifier, store, sink)
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn verifier(&self) -> &Verifier {
    &self.verifier
  }

  pub fn store(&self) -> &Arc<dyn DedupStore> {
    &self.store
  }

  /// Handle one push delivery at the current time.
  pub async fn ingest_push(&self, body: &[u8], signature: Option<&str>) -> Result<IngestReport, EngineError> {
    self.ingest_push_at(body, signature, Utc::now()).await
  }

  /// Handle one push delivery.
  ///
  /// Returns `AuthenticityFailure` without touching any state when the
  /// signature does not verify. Unrecognized bodies are still emitted as a
  /// generic record.
  pub async fn ingest_push_at(
    &self,
    body: &[u8],
    signature: Option<&str>,
    now: DateTime<Utc>,
  ) -> Result<IngestReport, EngineError> {
    if !self.verifier.verify(body, signature) {
      warn!(
        body_len = body.len(),
        has_signature = signature.is_some(),
        "rejecting push: signature did not verify"
      );
      return Err(EngineError::AuthenticityFailure);
    }

    let payload = normalize::classify(body, self.config.unrecognized_preview_chars);
    let updates = normalize::normalize(&payload, now);
    self.emit_new(updates, now).await
  }

  /// Emit new records from a pulled snapshot.
  ///
  /// Incident updates pass straight to dedup; component records come from
  /// diffing against `previous`. On the first pull (empty `previous`)
  /// operational components are not announced unless configured. The caller
  /// owns `previous` and replaces it with `snapshot.state` on success.
  pub async fn ingest_snapshot_at(
    &self,
    previous: &SnapshotState,
    snapshot: &Snapshot,
    now: DateTime<Utc>,
  ) -> Result<IngestReport, EngineError> {
    let mut updates = snapshot.incident_updates(now);

    let mut changes = reconcile::reconcile(previous, &snapshot.state);
    if previous.is_empty() && !self.config.announce_operational_on_start {
      changes.retain(|c| c.status != OPERATIONAL);
    }
    debug!(changes = changes.len(), incidents = snapshot.incidents.len(), "reconciled snapshot");

    updates.extend(
      changes
        .iter()
        .map(|change| normalize::normalize_component_change(change, now)),
    );
    self.emit_new(updates, now).await
  }

  /// Claim each record's fingerprint and emit the ones this call won.
  async fn emit_new(&self, updates: Vec<CanonicalUpdate>, now: DateTime<Utc>) -> Result<IngestReport, EngineError> {
    let mut report = IngestReport {
      normalized: updates.len(),
      ..IngestReport::default()
    };

    for update in updates {
      let fp = fingerprint::of(&update);
      if self.store.claim(&fp, now).await? {
        info!(
          product = %update.product_name,
          status = %update.status_text,
          source_id = %update.source_id,
          update_id = %update.update_id,
          kind = ?update.raw_kind,
          "status update"
        );
        self.sink.emit(&update);
        report.emitted += 1;
      } else {
        debug!(fingerprint = %fp, update_id = %update.update_id, "duplicate update suppressed");
        report.duplicates += 1;
      }
    }

    Ok(report)
  }
}
