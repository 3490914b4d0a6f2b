//! Structured error types for the status engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
  /// Input that could not be parsed. Push payloads degrade to a generic
  /// record instead; this surfaces only where degrading is impossible
  /// (e.g. a pulled snapshot).
  #[error("malformed payload: {0}")]
  MalformedPayload(String),

  /// Signature mismatch. The request is rejected and no state is touched.
  #[error("authenticity check failed")]
  AuthenticityFailure,

  /// Shared dedup backing store unreachable.
  #[error("dedup store unavailable: {0}")]
  StoreUnavailable(String),

  /// Pull source error for one tick.
  #[error("fetch failed: {0}")]
  FetchFailure(String),

  #[error("json: {0}")]
  Json(#[from] serde_json::Error),
}

impl EngineError {
  pub fn malformed(msg: impl Into<String>) -> Self {
    Self::MalformedPayload(msg.into())
  }

  pub fn store(msg: impl std::fmt::Display) -> Self {
    Self::StoreUnavailable(msg.to_string())
  }

  pub fn fetch(msg: impl std::fmt::Display) -> Self {
    Self::FetchFailure(msg.to_string())
  }
}
