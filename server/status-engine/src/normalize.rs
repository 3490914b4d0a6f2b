//! Normalize inbound payloads into canonical update records.
//!
//! Classification is structural: the first recognized top-level key wins
//! (`incident`, then `incident_update`, then `component`, then a
//! `message`/`text` field). Anything else still yields one generic record so
//! an accepted push is never silently dropped.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::fingerprint::synthesize_id;
use crate::types::*;

pub const UNKNOWN_SERVICE: &str = "Unknown Service";
pub const UNKNOWN_INCIDENT: &str = "Unknown incident";
pub const UNKNOWN_COMPONENT: &str = "Unknown component";
pub const EMPTY_PAYLOAD: &str = "(empty payload)";
const NO_UPDATE_BODY: &str = "No update body provided";

/// Classify raw body bytes into a [`Payload`]. Never fails.
pub fn classify(body: &[u8], preview_chars: usize) -> Payload {
  match serde_json::from_slice::<Value>(body) {
    Ok(value) => classify_value(&value, preview_chars),
    Err(_) => {
      let text = String::from_utf8_lossy(body);
      Payload::Unrecognized {
        preview: truncate_chars(text.trim(), preview_chars),
      }
    }
  }
}

/// Classify an already-parsed JSON value.
pub fn classify_value(value: &Value, preview_chars: usize) -> Payload {
  let Value::Object(map) = value else {
    return unrecognized(value, preview_chars);
  };

  if let Some(incident) = object_field(map, "incident").and_then(|v| IncidentDoc::deserialize(v).ok()) {
    let standalone_update =
      object_field(map, "incident_update").and_then(|v| IncidentUpdateDoc::deserialize(v).ok());
    return Payload::Incident {
      incident,
      standalone_update,
    };
  }

  if let Some(update) =
    object_field(map, "incident_update").and_then(|v| IncidentUpdateDoc::deserialize(v).ok())
  {
    return Payload::IncidentUpdate(update);
  }

  if let Some(component) = object_field(map, "component").and_then(|v| ComponentDoc::deserialize(v).ok()) {
    return Payload::Component(component);
  }

  if let Some(message) = text_field(map, "message").or_else(|| text_field(map, "text")) {
    return Payload::Message {
      service: text_field(map, "service"),
      message,
      timestamp: text_field(map, "timestamp").or_else(|| text_field(map, "created_at")),
    };
  }

  unrecognized(value, preview_chars)
}

/// Map a classified payload to canonical records, in source order.
///
/// `now` is the ingestion time used when the source carries no parseable timestamp.
pub fn normalize(payload: &Payload, now: DateTime<Utc>) -> Vec<CanonicalUpdate> {
  match payload {
    Payload::Incident {
      incident,
      standalone_update,
    } => normalize_incident(incident, standalone_update.as_ref(), &HashMap::new(), now),
    Payload::IncidentUpdate(update) => {
      normalize_incident(&IncidentDoc::default(), Some(update), &HashMap::new(), now)
    }
    Payload::Component(component) => vec![normalize_component(component, now)],
    Payload::Message {
      service,
      message,
      timestamp,
    } => vec![generic_record(
      service.as_deref().unwrap_or(UNKNOWN_SERVICE),
      message,
      timestamp.as_deref(),
      now,
    )],
    Payload::Unrecognized { preview } => {
      warn!(preview = %truncate_chars(preview, 200), "unrecognized payload shape, emitting generic record");
      let text = if preview.is_empty() { EMPTY_PAYLOAD } else { preview };
      vec![generic_record(UNKNOWN_SERVICE, text, None, now)]
    }
  }
}

/// Classify and normalize in one step.
pub fn normalize_body(body: &[u8], preview_chars: usize, now: DateTime<Utc>) -> Vec<CanonicalUpdate> {
  normalize(&classify(body, preview_chars), now)
}

/// One record per incident update entry.
///
/// `component_names` resolves bare component ids listed on the incident
/// (available on the pull path, where the snapshot carries all components).
pub fn normalize_incident(
  incident: &IncidentDoc,
  standalone_update: Option<&IncidentUpdateDoc>,
  component_names: &HashMap<String, String>,
  now: DateTime<Utc>,
) -> Vec<CanonicalUpdate> {
  let product_name = non_empty(incident.name.as_deref()).unwrap_or(UNKNOWN_INCIDENT);
  let components = affected_components(incident, component_names);

  let updates: Vec<&IncidentUpdateDoc> = match incident.incident_updates.as_deref() {
    Some(list) if !list.is_empty() => list.iter().collect(),
    _ => standalone_update.into_iter().collect(),
  };

  updates
    .into_iter()
    .map(|update| {
      let source_id = non_empty(incident.id.as_deref())
        .or_else(|| non_empty(update.incident_id.as_deref()))
        .map(str::to_string)
        .unwrap_or_else(|| synthesize_id(&["incident", product_name]));

      let status_text = non_empty(update.body.as_deref())
        .or_else(|| non_empty(update.content.as_deref()))
        .unwrap_or(NO_UPDATE_BODY)
        .to_string();

      let raw_ts = non_empty(update.created_at.as_deref()).or_else(|| non_empty(update.updated_at.as_deref()));
      let occurred_at = raw_ts.and_then(parse_timestamp).unwrap_or(now);

      let update_id = non_empty(update.id.as_deref())
        .map(str::to_string)
        .unwrap_or_else(|| synthesize_id(&[&source_id, raw_ts.unwrap_or_default(), &status_text]));

      CanonicalUpdate {
        source_id,
        update_id,
        product_name: product_name.to_string(),
        status_text,
        occurred_at,
        raw_kind: RawKind::Incident,
        components: components.clone(),
      }
    })
    .collect()
}

/// Pushed component status change.
pub fn normalize_component(component: &ComponentDoc, now: DateTime<Utc>) -> CanonicalUpdate {
  let status = non_empty(component.status.as_deref()).unwrap_or("unknown");
  component_record(
    non_empty(component.id.as_deref()).or_else(|| non_empty(component.name.as_deref())),
    non_empty(component.name.as_deref()).unwrap_or(UNKNOWN_COMPONENT),
    status,
    non_empty(component.updated_at.as_deref()),
    format!("Component status changed to: {}", status),
    RawKind::Component,
    now,
  )
}

/// Component change synthesized by the reconciler from two snapshots.
///
/// Shares identity rules with [`normalize_component`], so a push and a poll
/// describing the same change dedup together.
pub fn normalize_component_change(change: &ComponentChange, now: DateTime<Utc>) -> CanonicalUpdate {
  let status_text = match change.previous_status.as_deref() {
    Some(prev) => format!("Component status changed from {} to {}", prev, change.status),
    None => format!("Component status: {}", change.status),
  };
  component_record(
    non_empty(Some(&change.id)),
    non_empty(Some(&change.name)).unwrap_or(UNKNOWN_COMPONENT),
    &change.status,
    non_empty(change.updated_at.as_deref()),
    status_text,
    RawKind::SummaryComponent,
    now,
  )
}

fn component_record(
  source_id: Option<&str>,
  product_name: &str,
  status: &str,
  updated_at: Option<&str>,
  status_text: String,
  raw_kind: RawKind,
  now: DateTime<Utc>,
) -> CanonicalUpdate {
  let source_id = source_id.unwrap_or_default().to_string();
  let parsed = updated_at.and_then(parse_timestamp);
  // No natural revision id exists for components. Hash the parsed instant so
  // push and pull agree even when they format the timestamp differently.
  let stamp = match parsed {
    Some(ts) => ts.to_rfc3339(),
    None => updated_at.unwrap_or_default().to_string(),
  };
  let update_id = synthesize_id(&[&source_id, status, &stamp]);
  CanonicalUpdate {
    source_id,
    update_id,
    product_name: product_name.to_string(),
    status_text,
    occurred_at: parsed.unwrap_or(now),
    raw_kind,
    components: Vec::new(),
  }
}

fn generic_record(product_name: &str, text: &str, timestamp: Option<&str>, now: DateTime<Utc>) -> CanonicalUpdate {
  CanonicalUpdate {
    source_id: synthesize_id(&["message", product_name]),
    update_id: synthesize_id(&[product_name, text, timestamp.unwrap_or_default()]),
    product_name: product_name.to_string(),
    status_text: text.to_string(),
    occurred_at: timestamp.and_then(parse_timestamp).unwrap_or(now),
    raw_kind: RawKind::GenericMessage,
    components: Vec::new(),
  }
}

/// Names of the components an incident lists, resolved through `names` for bare ids.
fn affected_components(incident: &IncidentDoc, names: &HashMap<String, String>) -> Vec<String> {
  let mut out: Vec<String> = Vec::new();
  for entry in incident.components.as_deref().unwrap_or_default() {
    let name = match entry {
      Value::Object(obj) => text_field(obj, "name")
        .or_else(|| text_field(obj, "id").map(|id| names.get(&id).cloned().unwrap_or(id))),
      Value::String(id) => Some(names.get(id).cloned().unwrap_or_else(|| id.clone())),
      Value::Number(n) => {
        let id = n.to_string();
        Some(names.get(&id).cloned().unwrap_or(id))
      }
      _ => None,
    };
    if let Some(name) = name {
      if !out.contains(&name) {
        out.push(name);
      }
    }
  }
  out
}

/// Parse provider timestamps: RFC 3339, or naive ISO-8601 taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
  let raw = raw.trim();
  if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
    return Some(ts.with_timezone(&Utc));
  }
  if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z") {
    return Some(ts.with_timezone(&Utc));
  }
  ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
    .iter()
    .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
    .map(|naive| Utc.from_utc_datetime(&naive))
}

fn unrecognized(value: &Value, preview_chars: usize) -> Payload {
  let compact = serde_json::to_string(value).unwrap_or_default();
  Payload::Unrecognized {
    preview: truncate_chars(&compact, preview_chars),
  }
}

fn object_field<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
  map.get(key).filter(|v| v.is_object())
}

fn text_field(map: &Map<String, Value>, key: &str) -> Option<String> {
  map
    .get(key)
    .and_then(Value::as_str)
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(str::to_string)
}

fn non_empty(s: Option<&str>) -> Option<&str> {
  s.map(str::trim).filter(|s| !s.is_empty())
}

fn truncate_chars(s: &str, max: usize) -> String {
  s.chars().take(max).collect()
}
