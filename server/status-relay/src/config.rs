//! Relay configuration from the process environment.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context};
use status_engine::Config;

pub const DEFAULT_SUMMARY_URL: &str = "https://status.openai.com/api/v2/summary.json";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";

/// Everything the relay reads at startup. Immutable afterwards.
#[derive(Clone)]
pub struct RelayConfig {
  /// HMAC secret for push deliveries; `None` disables verification.
  pub signing_secret: Option<String>,
  /// PostgreSQL URL for shared dedup; `None` keeps dedup in memory.
  pub database_url: Option<String>,
  pub enable_poller: bool,
  pub summary_url: String,
  pub bind_addr: SocketAddr,
  /// Filter used when `RUST_LOG` is unset.
  pub log_level: String,
  pub engine: Config,
}

impl RelayConfig {
  pub fn from_env() -> anyhow::Result<Self> {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  /// Build from any key lookup. Blank values count as unset.
  pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
  where
    F: Fn(&str) -> Option<String>,
  {
    let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    let mut engine = Config::default();
    if let Some(secs) = positive_secs(get("POLL_INTERVAL_SECONDS"), "POLL_INTERVAL_SECONDS")? {
      engine.poll_interval = secs;
    }
    if let Some(secs) = positive_secs(get("DEDUP_TTL_SECONDS"), "DEDUP_TTL_SECONDS")? {
      engine.dedup_ttl = secs;
    }
    if let Some(flag) = get("ANNOUNCE_OPERATIONAL_ON_START") {
      engine.announce_operational_on_start = parse_flag(&flag);
    }

    let bind_raw = get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
    let bind_addr = bind_raw
      .parse()
      .with_context(|| format!("BIND_ADDR is not a socket address: {}", bind_raw))?;

    Ok(Self {
      // Key material is passed through untrimmed.
      signing_secret: lookup("SIGNING_SECRET").filter(|v| !v.trim().is_empty()),
      database_url: get("DATABASE_URL"),
      enable_poller: get("ENABLE_POLLER").map(|v| parse_flag(&v)).unwrap_or(false),
      summary_url: get("STATUS_SUMMARY_URL").unwrap_or_else(|| DEFAULT_SUMMARY_URL.to_string()),
      bind_addr,
      log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
      engine,
    })
  }
}

fn parse_flag(value: &str) -> bool {
  matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn positive_secs(value: Option<String>, key: &str) -> anyhow::Result<Option<Duration>> {
  let Some(raw) = value else {
    return Ok(None);
  };
  let secs: u64 = raw
    .parse()
    .with_context(|| format!("{} must be a whole number of seconds, got {:?}", key, raw))?;
  if secs == 0 {
    bail!("{} must be greater than zero", key);
  }
  Ok(Some(Duration::from_secs(secs)))
}
