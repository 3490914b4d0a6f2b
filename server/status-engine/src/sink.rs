//! Emission targets. The engine's obligation ends at handing a deduplicated
//! record to a [`Sink`]; presentation belongs to the sink.

use std::io::Write;
use std::sync::Mutex;

use tracing::warn;

use crate::types::CanonicalUpdate;

pub trait Sink: Send + Sync {
  fn emit(&self, update: &CanonicalUpdate);
}

/// Collects emitted records in memory.
#[derive(Default)]
pub struct MemorySink {
  updates: Mutex<Vec<CanonicalUpdate>>,
}

impl MemorySink {
  pub fn new() -> Self {
    Self::default()
  }

  /// Copy of everything emitted so far.
  pub fn updates(&self) -> Vec<CanonicalUpdate> {
    self.updates.lock().map(|u| u.clone()).unwrap_or_default()
  }

  pub fn len(&self) -> usize {
    self.updates.lock().map(|u| u.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl Sink for MemorySink {
  fn emit(&self, update: &CanonicalUpdate) {
    if let Ok(mut updates) = self.updates.lock() {
      updates.push(update.clone());
    }
  }
}

/// Writes one JSON object per line.
pub struct JsonLinesSink<W> {
  out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
  pub fn new(out: W) -> Self {
    Self {
      out: Mutex::new(out),
    }
  }

  pub fn into_inner(self) -> W {
    match self.out.into_inner() {
      Ok(w) => w,
      Err(poisoned) => poisoned.into_inner(),
    }
  }
}

impl<W: Write + Send> Sink for JsonLinesSink<W> {
  fn emit(&self, update: &CanonicalUpdate) {
    let Ok(mut out) = self.out.lock() else {
      return;
    };
    let written = serde_json::to_writer(&mut *out, update)
      .map_err(std::io::Error::from)
      .and_then(|_| writeln!(out))
      .and_then(|_| out.flush());
    if let Err(e) = written {
      warn!(error = %e, update_id = %update.update_id, "failed to write update");
    }
  }
}
