//! Change detection for the pull path: diff a fresh summary snapshot against
//! the last one and synthesize component changes.
//!
//! Reported: components whose status string changed, and components that are
//! new. Not reported: components that disappeared (not a status event).

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::error::EngineError;
use crate::normalize;
use crate::types::{CanonicalUpdate, ComponentChange, IncidentDoc, SummaryDoc};

/// Last-known status of one component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
  pub name: String,
  pub status: String,
  pub updated_at: Option<String>,
}

/// Component id -> last-known status, in the source's listed order.
///
/// Replaced wholesale after each successful pull; never merged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotState {
  entries: HashMap<String, SnapshotEntry>,
  order: Vec<String>,
}

impl SnapshotState {
  pub fn new() -> Self {
    Self::default()
  }

  /// Insert or overwrite; the first insertion fixes the entry's position.
  pub fn insert(&mut self, id: impl Into<String>, entry: SnapshotEntry) {
    let id = id.into();
    if self.entries.insert(id.clone(), entry).is_none() {
      self.order.push(id);
    }
  }

  pub fn get(&self, id: &str) -> Option<&SnapshotEntry> {
    self.entries.get(id)
  }

  pub fn len(&self) -> usize {
    self.order.len()
  }

  pub fn is_empty(&self) -> bool {
    self.order.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &SnapshotEntry)> {
    self
      .order
      .iter()
      .filter_map(|id| self.entries.get(id).map(|e| (id.as_str(), e)))
  }

  /// Convenience for tests and fixtures: `[(id, status)]`.
  pub fn from_statuses<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
    let mut state = Self::new();
    for (id, status) in pairs {
      state.insert(
        id,
        SnapshotEntry {
          name: id.to_string(),
          status: status.to_string(),
          updated_at: None,
        },
      );
    }
    state
  }
}

/// A parsed `summary.json`.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
  pub state: SnapshotState,
  pub incidents: Vec<IncidentDoc>,
  /// Component id -> display name, for resolving incident component ids.
  pub component_names: HashMap<String, String>,
}

impl Snapshot {
  /// Parse a summary document. Fails on anything that is not a JSON object
  /// of the expected shape; the caller keeps its prior state in that case.
  pub fn parse(bytes: &[u8]) -> Result<Self, EngineError> {
    let doc: SummaryDoc = serde_json::from_slice(bytes)
      .map_err(|e| EngineError::malformed(format!("summary snapshot: {}", e)))?;
    Ok(Self::from_doc(doc))
  }

  pub fn from_doc(doc: SummaryDoc) -> Self {
    let mut state = SnapshotState::new();
    let mut component_names = HashMap::new();

    for component in doc.components {
      let name = component.name.filter(|n| !n.trim().is_empty());
      // Components without an id are keyed by name; with neither they are unusable.
      let Some(id) = component.id.filter(|i| !i.trim().is_empty()).or_else(|| name.clone()) else {
        continue;
      };
      let name = name.unwrap_or_else(|| id.clone());
      component_names.insert(id.clone(), name.clone());
      state.insert(
        id,
        SnapshotEntry {
          name,
          status: component.status.unwrap_or_else(|| "unknown".to_string()),
          updated_at: component.updated_at,
        },
      );
    }

    Self {
      state,
      incidents: doc.incidents,
      component_names,
    }
  }

  /// Canonical records for every incident update in the snapshot, in source order.
  ///
  /// Incident updates carry natural ids, so the dedup store (not the diff)
  /// decides which of these are new.
  pub fn incident_updates(&self, now: DateTime<Utc>) -> Vec<CanonicalUpdate> {
    self
      .incidents
      .iter()
      .flat_map(|incident| normalize::normalize_incident(incident, None, &self.component_names, now))
      .collect()
  }
}

/// Entries of `new` whose status differs from `previous`, or that `previous`
/// lacks, in `new`'s order.
pub fn reconcile(previous: &SnapshotState, new: &SnapshotState) -> Vec<ComponentChange> {
  new
    .iter()
    .filter_map(|(id, entry)| {
      let prior = previous.get(id);
      if prior.is_some_and(|p| p.status == entry.status) {
        return None;
      }
      Some(ComponentChange {
        id: id.to_string(),
        name: entry.name.clone(),
        status: entry.status.clone(),
        previous_status: prior.map(|p| p.status.clone()),
        updated_at: entry.updated_at.clone(),
      })
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reports_change_and_appearance_but_not_removal() {
    let prev = SnapshotState::from_statuses([("A", "up"), ("C", "up")]);
    let new = SnapshotState::from_statuses([("A", "down"), ("B", "up")]);

    let changes = reconcile(&prev, &new);
    assert_eq!(changes.len(), 2);

    assert_eq!(changes[0].id, "A");
    assert_eq!(changes[0].status, "down");
    assert_eq!(changes[0].previous_status.as_deref(), Some("up"));

    assert_eq!(changes[1].id, "B");
    assert_eq!(changes[1].status, "up");
    assert!(changes[1].previous_status.is_none());

    assert!(changes.iter().all(|c| c.id != "C"));
  }

  #[test]
  fn identical_snapshots_yield_nothing() {
    let state = SnapshotState::from_statuses([("A", "up"), ("B", "degraded")]);
    assert!(reconcile(&state, &state.clone()).is_empty());
  }

  #[test]
  fn everything_is_new_against_empty_state() {
    let new = SnapshotState::from_statuses([("A", "up"), ("B", "down")]);
    let changes = reconcile(&SnapshotState::new(), &new);
    let ids: Vec<&str> = changes.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["A", "B"]);
  }

  #[test]
  fn parse_summary_document() {
    let snapshot = Snapshot::parse(
      br#"{
        "page": {"id": "p1", "name": "OpenAI"},
        "components": [
          {"id": "c1", "name": "API", "status": "operational", "updated_at": "2025-11-18T12:00:00Z"},
          {"id": "c2", "name": "ChatGPT", "status": "partial_outage"},
          {"name": "Nameless id"},
          {"status": "operational"}
        ],
        "incidents": [
          {"id": "inc_1", "name": "Elevated errors", "components": ["c2"],
           "incident_updates": [{"id": "u2", "body": "Monitoring"}, {"id": "u1", "body": "Investigating"}]}
        ]
      }"#,
    )
    .unwrap();

    assert_eq!(snapshot.state.len(), 3);
    assert_eq!(snapshot.state.get("c2").unwrap().status, "partial_outage");
    assert_eq!(snapshot.state.get("Nameless id").unwrap().status, "unknown");

    let updates = snapshot.incident_updates(Utc::now());
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0].update_id, "u2");
    assert_eq!(updates[0].components, vec!["ChatGPT"]);
  }

  #[test]
  fn parse_rejects_non_summary_bodies() {
    assert!(Snapshot::parse(b"<html>502 Bad Gateway</html>").is_err());
    assert!(Snapshot::parse(b"[]").is_err());
    assert!(Snapshot::parse(br#"{"components": "nope"}"#).is_err());
  }

  #[test]
  fn duplicate_ids_keep_first_position_last_value() {
    let mut state = SnapshotState::new();
    let entry = |s: &str| SnapshotEntry {
      name: "x".into(),
      status: s.into(),
      updated_at: None,
    };
    state.insert("a", entry("up"));
    state.insert("b", entry("up"));
    state.insert("a", entry("down"));
    let listed: Vec<(&str, &str)> = state.iter().map(|(id, e)| (id, e.status.as_str())).collect();
    assert_eq!(listed, vec![("a", "down"), ("b", "up")]);
  }
}
