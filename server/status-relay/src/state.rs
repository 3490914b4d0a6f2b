//! Shared state handed to every request.

use std::sync::Arc;
use std::time::Instant;

use status_engine::Engine;

pub struct AppState {
  pub engine: Arc<Engine>,
  pub poller_enabled: bool,
  started: Instant,
}

impl AppState {
  pub fn new(engine: Arc<Engine>, poller_enabled: bool) -> Self {
    Self {
      engine,
      poller_enabled,
      started: Instant::now(),
    }
  }

  pub fn uptime_secs(&self) -> u64 {
    self.started.elapsed().as_secs()
  }
}
