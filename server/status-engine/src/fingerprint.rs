//! Stable fingerprint computation for deduplicating canonical updates.

use crate::types::{CanonicalUpdate, Fingerprint};

const FINGERPRINT_DOMAIN: &[u8] = b"status-engine/fingerprint/v1";
const SYNTHETIC_DOMAIN: &[u8] = b"status-engine/synthetic/v1";

/// Compute the dedup key for a `(source_id, update_id)` pair.
///
/// Each field is length-prefixed so no separator can be forged from inside a
/// field. An empty field hashes as a dedicated placeholder tag instead of an
/// empty string, so `("", "a")` and `("a", "")` stay distinct. Never fails.
pub fn compute(source_id: &str, update_id: &str) -> Fingerprint {
  let mut hasher = blake3::Hasher::new();
  hasher.update(FINGERPRINT_DOMAIN);
  write_field(&mut hasher, source_id);
  write_field(&mut hasher, update_id);

  // First 16 bytes (32 hex chars): compact, stable across restarts.
  let hex = hasher.finalize().to_hex();
  Fingerprint(hex[..32].to_string())
}

/// Fingerprint of a canonical record. Only the identity pair participates.
pub fn of(update: &CanonicalUpdate) -> Fingerprint {
  compute(&update.source_id, &update.update_id)
}

/// Derive a deterministic `syn-` identifier for sources that carry no id.
pub fn synthesize_id(parts: &[&str]) -> String {
  let mut hasher = blake3::Hasher::new();
  hasher.update(SYNTHETIC_DOMAIN);
  for part in parts {
    write_field(&mut hasher, part);
  }
  let hex = hasher.finalize().to_hex();
  format!("syn-{}", &hex[..16])
}

fn write_field(hasher: &mut blake3::Hasher, field: &str) {
  if field.is_empty() {
    hasher.update(&[0u8]);
    return;
  }
  hasher.update(&[1u8]);
  hasher.update(&(field.len() as u64).to_le_bytes());
  hasher.update(field.as_bytes());
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn same_input_same_fingerprint() {
    assert_eq!(compute("inc_001", "u1"), compute("inc_001", "u1"));
  }

  #[test]
  fn different_update_different_fingerprint() {
    assert_ne!(compute("inc_001", "u1"), compute("inc_001", "u2"));
  }

  #[test]
  fn field_boundary_cannot_be_shifted() {
    assert_ne!(compute("ab", "c"), compute("a", "bc"));
    assert_ne!(compute("a|b", "c"), compute("a", "b|c"));
  }

  #[test]
  fn empty_fields_do_not_collide() {
    let a = compute("", "x");
    let b = compute("x", "");
    let c = compute("", "");
    assert_ne!(a, b);
    assert_ne!(a, c);
    assert_ne!(b, c);
    assert_eq!(compute("", ""), c);
  }

  #[test]
  fn fingerprint_is_32_hex_chars() {
    let fp = compute("comp_1", "syn-0011223344556677");
    assert_eq!(fp.0.len(), 32);
    assert!(fp.0.chars().all(|c| c.is_ascii_hexdigit()));
  }

  #[test]
  fn synthesized_ids_are_stable_and_prefixed() {
    let a = synthesize_id(&["comp_1", "major_outage", "2025-11-18T12:00:00Z"]);
    let b = synthesize_id(&["comp_1", "major_outage", "2025-11-18T12:00:00Z"]);
    let c = synthesize_id(&["comp_1", "operational", "2025-11-18T12:00:00Z"]);
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert!(a.starts_with("syn-"));
    assert_eq!(a.len(), 4 + 16);
  }
}
