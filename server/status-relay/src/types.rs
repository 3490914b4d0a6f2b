//! Response types for the relay.

use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
  /// `healthy`, or `degraded` while the shared dedup store is unreachable.
  pub status: &'static str,
  pub store: StoreHealth,
  /// `required` or `disabled`.
  pub signature_verification: &'static str,
  pub poller_enabled: bool,
  pub uptime_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct StoreHealth {
  pub backend: &'static str,
  /// Result of the ping made for this response.
  pub reachable: bool,
  /// Serving from the in-memory fallback.
  pub degraded: bool,
}
