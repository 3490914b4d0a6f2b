//! Engine configuration with sane defaults.

use std::time::Duration;

/// Tunables for dedup, polling and normalization. Immutable once the engine starts.
#[derive(Debug, Clone)]
pub struct Config {
  /// How long a fingerprint suppresses re-emission.
  pub dedup_ttl: Duration,
  /// Delay between pull iterations.
  pub poll_interval: Duration,
  /// Upper bound for the pull backoff after consecutive failures.
  pub max_backoff: Duration,
  /// How often expired dedup entries are swept.
  pub sweep_interval: Duration,
  /// Max characters of an unrecognized payload kept as status text.
  pub unrecognized_preview_chars: usize,
  /// Report `operational` components found on the first pull.
  pub announce_operational_on_start: bool,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      dedup_ttl: Duration::from_secs(7 * 24 * 3600),
      poll_interval: Duration::from_secs(30),
      max_backoff: Duration::from_secs(300),
      sweep_interval: Duration::from_secs(600),
      unrecognized_preview_chars: 800,
      announce_operational_on_start: false,
    }
  }
}
