//! Binary entrypoint: replay push payloads from stdin, write new updates to stdout.
//!
//! Each non-blank input line is one raw push body (JSON or free text). Every
//! update that is new within the run is written as one CanonicalUpdate JSON
//! line. Duplicates produce no output. Signatures are not checked here.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use status_engine::sink::JsonLinesSink;
use status_engine::{Config, Engine, Verifier};

#[tokio::main(flavor = "current_thread")]
async fn main() {
  let sink = Arc::new(JsonLinesSink::new(io::stdout()));
  let engine = Engine::with_memory_store(Config::default(), Verifier::disabled(), sink);

  let stdin = io::stdin();
  for line in stdin.lock().lines() {
    let line = match line {
      Ok(l) => l,
      Err(e) => {
        let _ = writeln!(io::stderr(), "status-engine: read error: {}", e);
        std::process::exit(1);
      }
    };

    // Skip blank lines.
    let trimmed = line.trim();
    if trimmed.is_empty() {
      continue;
    }

    if let Err(e) = engine.ingest_push(trimmed.as_bytes(), None).await {
      let _ = writeln!(io::stderr(), "status-engine: {}", e);
    }
  }
}
