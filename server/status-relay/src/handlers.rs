//! HTTP handlers for the relay.

use axum::{
  body::Bytes,
  extract::State,
  http::{HeaderMap, StatusCode},
  Json,
};
use std::sync::Arc;
use tracing::{debug, error, warn};

use status_engine::{DedupStore, EngineError, VerifyPolicy};

use crate::state::AppState;
use crate::types::{HealthResponse, StoreHealth};

pub const SIGNATURE_HEADER: &str = "x-signature";

/// Pings the dedup store on every call, so an outage shows up here even
/// before any delivery has touched the store.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
  let store = state.engine.store();
  let reachable = match store.ping().await {
    Ok(()) => true,
    Err(e) => {
      warn!(error = %e, backend = store.backend(), "health: dedup store unreachable");
      false
    }
  };
  let degraded = !reachable || store.is_degraded();
  Json(HealthResponse {
    status: if degraded { "degraded" } else { "healthy" },
    store: StoreHealth {
      backend: store.backend(),
      reachable,
      degraded,
    },
    signature_verification: match state.engine.verifier().policy() {
      VerifyPolicy::Required => "required",
      VerifyPolicy::Disabled => "disabled",
    },
    poller_enabled: state.poller_enabled,
    uptime_secs: state.uptime_secs(),
  })
}

/// Push delivery. The body is taken raw so the signature covers exactly the
/// bytes that were sent.
pub async fn webhook(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> StatusCode {
  let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());

  match state.engine.ingest_push(&body, signature).await {
    Ok(report) => {
      debug!(
        normalized = report.normalized,
        emitted = report.emitted,
        duplicates = report.duplicates,
        "webhook processed"
      );
      StatusCode::NO_CONTENT
    }
    Err(EngineError::AuthenticityFailure) => StatusCode::UNAUTHORIZED,
    Err(e) => {
      error!(error = %e, "webhook: processing failed");
      StatusCode::INTERNAL_SERVER_ERROR
    }
  }
}
