//! Push authenticity: HMAC-SHA256 over the exact raw request body.
//!
//! Accepted signature encodings:
//! - bare hex digest: `3f9a...`
//! - prefixed: `sha256=3f9a...` (any `algorithm=` prefix is stripped; a
//!   non-sha256 prefix is logged and still checked as SHA-256)
//!
//! Comparison is constant-time (`Mac::verify_slice`). Missing or malformed
//! signatures verify as `false`; nothing here returns an error.

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Shared signing secret. Never printed.
#[derive(Clone)]
pub struct SigningSecret(Vec<u8>);

impl SigningSecret {
  pub fn new(secret: impl Into<Vec<u8>>) -> Self {
    Self(secret.into())
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.0
  }
}

impl fmt::Debug for SigningSecret {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("SigningSecret(<redacted>)")
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyPolicy {
  /// Every push must carry a valid signature.
  Required,
  /// No secret configured: every push is accepted unverified.
  Disabled,
}

/// Verifier bound to the process-wide secret.
#[derive(Debug, Clone)]
pub struct Verifier {
  secret: Option<SigningSecret>,
}

impl Verifier {
  pub fn new(secret: SigningSecret) -> Self {
    Self {
      secret: Some(secret),
    }
  }

  /// Accept every payload without checking signatures.
  ///
  /// This removes all authenticity guarantees for the push path. It exists
  /// for deployments where the provider cannot sign deliveries; callers are
  /// expected to log the choice at startup.
  pub fn disabled() -> Self {
    Self { secret: None }
  }

  /// Build from an optional configured secret. A blank secret counts as unset;
  /// any other value is used byte for byte.
  pub fn from_config(secret: Option<&str>) -> Self {
    match secret.filter(|s| !s.trim().is_empty()) {
      Some(s) => Self::new(SigningSecret::new(s.as_bytes().to_vec())),
      None => Self::disabled(),
    }
  }

  pub fn policy(&self) -> VerifyPolicy {
    if self.secret.is_some() {
      VerifyPolicy::Required
    } else {
      VerifyPolicy::Disabled
    }
  }

  /// Check one delivery. Always true under [`VerifyPolicy::Disabled`].
  pub fn verify(&self, raw_body: &[u8], signature: Option<&str>) -> bool {
    match (&self.secret, signature) {
      (None, _) => true,
      (Some(_), None) => false,
      (Some(secret), Some(sig)) => verify(raw_body, sig, secret.as_bytes()),
    }
  }
}

/// Verify `provided_signature` against HMAC-SHA256(`secret`, `raw_body`).
pub fn verify(raw_body: &[u8], provided_signature: &str, secret: &[u8]) -> bool {
  let Some(digest_hex) = strip_algorithm(provided_signature) else {
    return false;
  };
  let Ok(provided) = hex::decode(digest_hex) else {
    return false;
  };
  let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
    return false;
  };
  mac.update(raw_body);
  mac.verify_slice(&provided).is_ok()
}

/// Sign a body, producing the `sha256=<hex>` form.
pub fn sign(raw_body: &[u8], secret: &[u8]) -> String {
  // HMAC accepts keys of any length; the error arm is unreachable.
  let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
    return String::new();
  };
  mac.update(raw_body);
  format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Reduce both accepted encodings to the bare hex digest.
fn strip_algorithm(provided: &str) -> Option<&str> {
  let provided = provided.trim();
  let digest = match provided.split_once('=') {
    Some((algorithm, digest)) => {
      if !algorithm.eq_ignore_ascii_case("sha256") {
        warn!(algorithm, "signature uses a non-sha256 prefix, verifying as sha256");
      }
      digest.trim()
    }
    None => provided,
  };
  if digest.is_empty() {
    None
  } else {
    Some(digest)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const SECRET: &[u8] = b"whsec_test_secret";
  const BODY: &[u8] = br#"{"incident":{"id":"inc_001"}}"#;

  fn bare(sig: &str) -> &str {
    sig.strip_prefix("sha256=").unwrap()
  }

  #[test]
  fn accepts_bare_and_prefixed_encodings() {
    let sig = sign(BODY, SECRET);
    assert!(sig.starts_with("sha256="));
    assert!(verify(BODY, &sig, SECRET));
    assert!(verify(BODY, bare(&sig), SECRET));
    assert!(verify(BODY, &bare(&sig).to_ascii_uppercase(), SECRET));
    assert!(verify(BODY, &format!("  {}  ", sig), SECRET));
  }

  #[test]
  fn any_single_bit_flip_in_body_fails() {
    let sig = sign(BODY, SECRET);
    for byte in 0..BODY.len() {
      for bit in 0..8 {
        let mut body = BODY.to_vec();
        body[byte] ^= 1 << bit;
        assert!(!verify(&body, &sig, SECRET), "byte {} bit {}", byte, bit);
      }
    }
  }

  #[test]
  fn any_single_bit_flip_in_signature_fails() {
    let sig = sign(BODY, SECRET);
    let digest = hex::decode(bare(&sig)).unwrap();
    for byte in 0..digest.len() {
      for bit in 0..8 {
        let mut mutated = digest.clone();
        mutated[byte] ^= 1 << bit;
        let encoded = format!("sha256={}", hex::encode(&mutated));
        assert!(!verify(BODY, &encoded, SECRET), "byte {} bit {}", byte, bit);
      }
    }
  }

  #[test]
  fn malformed_signatures_are_false() {
    assert!(!verify(BODY, "", SECRET));
    assert!(!verify(BODY, "sha256=", SECRET));
    assert!(!verify(BODY, "sha256=zz-not-hex", SECRET));
    assert!(!verify(BODY, "abc", SECRET));
    let sig = sign(BODY, SECRET);
    assert!(!verify(BODY, &sig[..sig.len() - 2], SECRET));
  }

  #[test]
  fn wrong_secret_fails() {
    let sig = sign(BODY, SECRET);
    assert!(!verify(BODY, &sig, b"other"));
  }

  #[test]
  fn disabled_policy_accepts_everything() {
    let v = Verifier::from_config(None);
    assert_eq!(v.policy(), VerifyPolicy::Disabled);
    assert!(v.verify(BODY, None));
    assert!(v.verify(BODY, Some("garbage")));
    assert_eq!(Verifier::from_config(Some("  ")).policy(), VerifyPolicy::Disabled);
  }

  #[test]
  fn required_policy_rejects_missing_signature() {
    let v = Verifier::from_config(Some("whsec_test_secret"));
    assert_eq!(v.policy(), VerifyPolicy::Required);
    assert!(!v.verify(BODY, None));
    assert!(v.verify(BODY, Some(&sign(BODY, SECRET))));
  }

  #[test]
  fn configured_secret_is_used_byte_for_byte() {
    let padded = " whsec_padded\t";
    let v = Verifier::from_config(Some(padded));
    assert_eq!(v.policy(), VerifyPolicy::Required);
    assert!(v.verify(BODY, Some(&sign(BODY, padded.as_bytes()))));
    assert!(!v.verify(BODY, Some(&sign(BODY, b"whsec_padded"))));
  }

  #[test]
  fn secret_debug_is_redacted() {
    let s = SigningSecret::new(b"hunter2".to_vec());
    assert!(!format!("{:?}", s).contains("hunter2"));
  }
}
