//! Core types for the status engine (JSON contracts + internal models).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Inbound types (JSON contract: what status providers send)
// ---------------------------------------------------------------------------

/// Statuspage-style incident object. Unknown fields are silently ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncidentDoc {
  #[serde(default, deserialize_with = "lenient_string")]
  pub id: Option<String>,
  #[serde(default, deserialize_with = "lenient_string")]
  pub name: Option<String>,
  #[serde(default)]
  pub incident_updates: Option<Vec<IncidentUpdateDoc>>,
  /// Affected components: either full component objects or bare ids.
  #[serde(default)]
  pub components: Option<Vec<Value>>,
}

/// One entry of an incident's `incident_updates` list.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncidentUpdateDoc {
  #[serde(default, deserialize_with = "lenient_string")]
  pub id: Option<String>,
  #[serde(default, deserialize_with = "lenient_string")]
  pub incident_id: Option<String>,
  #[serde(default, deserialize_with = "lenient_string")]
  pub body: Option<String>,
  #[serde(default, deserialize_with = "lenient_string")]
  pub content: Option<String>,
  #[serde(default, deserialize_with = "lenient_string")]
  pub created_at: Option<String>,
  #[serde(default, deserialize_with = "lenient_string")]
  pub updated_at: Option<String>,
}

/// Statuspage-style component object (push `component` payloads and summary entries).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ComponentDoc {
  #[serde(default, deserialize_with = "lenient_string")]
  pub id: Option<String>,
  #[serde(default, deserialize_with = "lenient_string")]
  pub name: Option<String>,
  #[serde(default, deserialize_with = "lenient_string")]
  pub status: Option<String>,
  #[serde(default, deserialize_with = "lenient_string")]
  pub updated_at: Option<String>,
}

/// Pulled `summary.json` document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SummaryDoc {
  #[serde(default)]
  pub components: Vec<ComponentDoc>,
  #[serde(default)]
  pub incidents: Vec<IncidentDoc>,
}

/// Accept strings, numbers and booleans where providers disagree on id types.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
  D: Deserializer<'de>,
{
  let value = Option::<Value>::deserialize(deserializer)?;
  Ok(match value {
    Some(Value::String(s)) => Some(s),
    Some(Value::Number(n)) => Some(n.to_string()),
    Some(Value::Bool(b)) => Some(b.to_string()),
    _ => None,
  })
}

// ---------------------------------------------------------------------------
// Payload (closed variant decided by structural inspection)
// ---------------------------------------------------------------------------

/// A classified push payload.
#[derive(Debug, Clone)]
pub enum Payload {
  /// `{"incident": {...}}`, optionally with a top-level `incident_update`.
  Incident {
    incident: IncidentDoc,
    standalone_update: Option<IncidentUpdateDoc>,
  },
  /// `{"incident_update": {...}}` without an incident object.
  IncidentUpdate(IncidentUpdateDoc),
  /// `{"component": {...}}`.
  Component(ComponentDoc),
  /// Free text with an optional service label.
  Message {
    service: Option<String>,
    message: String,
    timestamp: Option<String>,
  },
  /// Anything else; `preview` is the extractable text.
  Unrecognized { preview: String },
}

// ---------------------------------------------------------------------------
// Canonical record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawKind {
  Incident,
  Component,
  GenericMessage,
  SummaryComponent,
}

/// Normalized status update, the unit of dedup and emission.
///
/// `(source_id, update_id)` is the identity; every other field is payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalUpdate {
  pub source_id: String,
  pub update_id: String,
  pub product_name: String,
  pub status_text: String,
  pub occurred_at: DateTime<Utc>,
  pub raw_kind: RawKind,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub components: Vec<String>,
}

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// A stable hex string identifying one canonical update.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

impl Fingerprint {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for Fingerprint {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

// ---------------------------------------------------------------------------
// Dedup + reconcile state
// ---------------------------------------------------------------------------

/// Store entry for one fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupRecord {
  pub first_seen: DateTime<Utc>,
  pub expires_at: DateTime<Utc>,
}

impl DedupRecord {
  pub fn is_live(&self, now: DateTime<Utc>) -> bool {
    now < self.expires_at
  }
}

/// A component whose status changed (or appeared) between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentChange {
  pub id: String,
  pub name: String,
  pub status: String,
  pub previous_status: Option<String>,
  pub updated_at: Option<String>,
}

// ---------------------------------------------------------------------------
// Pipeline outputs
// ---------------------------------------------------------------------------

/// Counters for one push delivery or pull tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
  pub normalized: usize,
  pub emitted: usize,
  pub duplicates: usize,
}
