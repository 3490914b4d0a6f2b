//! Timestamp formatting for console output.

use chrono::{DateTime, Utc};

/// Format as `YYYY-MM-DD HH:MM:SS` (UTC).
pub fn console_timestamp(dt: &DateTime<Utc>) -> String {
  dt.format("%Y-%m-%d %H:%M:%S").to_string()
}
