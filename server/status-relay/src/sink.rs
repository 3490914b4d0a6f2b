//! Console sink: the relay's user-visible output.

use std::io::{self, Write};
use std::sync::Mutex;

use status_engine::{CanonicalUpdate, Sink};
use tracing::{info, warn};

use crate::date;

/// Prints each emitted update as a two-line block and logs it.
///
/// Output is serialized through one lock so concurrent emits never interleave.
pub struct ConsoleSink<W = io::Stdout> {
  out: Mutex<W>,
}

impl ConsoleSink<io::Stdout> {
  pub fn stdout() -> Self {
    Self::new(io::stdout())
  }
}

impl<W: Write + Send> ConsoleSink<W> {
  pub fn new(out: W) -> Self {
    Self { out: Mutex::new(out) }
  }

  pub fn into_inner(self) -> W {
    self.out.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

/// The printed block for one update, trailing blank line included.
pub fn render(update: &CanonicalUpdate) -> String {
  format!(
    "[{}] Product: {}\nStatus: {}\n\n",
    date::console_timestamp(&update.occurred_at),
    update.product_name,
    update.status_text
  )
}

impl<W: Write + Send> Sink for ConsoleSink<W> {
  fn emit(&self, update: &CanonicalUpdate) {
    info!(
      product = %update.product_name,
      status = %update.status_text,
      timestamp = %update.occurred_at,
      source_id = %update.source_id,
      "printed status update"
    );
    let mut out = self.out.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    // A closed stdout must not take the pipeline down.
    if let Err(e) = out.write_all(render(update).as_bytes()).and_then(|_| out.flush()) {
      warn!(error = %e, update_id = %update.update_id, "failed to print update");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::{TimeZone, Utc};
  use status_engine::RawKind;

  fn update() -> CanonicalUpdate {
    CanonicalUpdate {
      source_id: "inc_001".into(),
      update_id: "u1".into(),
      product_name: "X".into(),
      status_text: "Investigating".into(),
      occurred_at: Utc.with_ymd_and_hms(2025, 11, 18, 12, 34, 56).unwrap(),
      raw_kind: RawKind::Incident,
      components: Vec::new(),
    }
  }

  #[test]
  fn prints_product_and_status_block() {
    let sink = ConsoleSink::new(Vec::new());
    sink.emit(&update());
    let printed = String::from_utf8(sink.into_inner()).unwrap();
    assert_eq!(printed, "[2025-11-18 12:34:56] Product: X\nStatus: Investigating\n\n");
  }

  struct ClosedPipe;

  impl Write for ClosedPipe {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
      Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
    }
    fn flush(&mut self) -> io::Result<()> {
      Ok(())
    }
  }

  #[test]
  fn write_failure_is_logged_not_raised() {
    let sink = ConsoleSink::new(ClosedPipe);
    sink.emit(&update());
    sink.emit(&update());
  }
}
