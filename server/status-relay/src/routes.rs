//! Axum router for the relay.

use std::sync::Arc;

use axum::{
  routing::{get, post},
  Router,
};

use crate::handlers;
use crate::state::AppState;

/// Build the router. Middleware is attached in `main.rs` so tests drive the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
  Router::new()
    .route("/health", get(handlers::health))
    .route("/webhook", post(handlers::webhook))
    .with_state(state)
}
