//! HTTP pull source for the public status summary.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderName, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::StatusCode;
use status_engine::{CacheToken, EngineError, PullResult, PullSource};
use tracing::warn;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Conditional GET against a summary URL.
///
/// Sends `If-None-Match` / `If-Modified-Since` from the last token; a 304 is
/// reported as unchanged. Any other non-200 status is a fetch failure.
pub struct HttpPullSource {
  url: String,
  http: reqwest::Client,
}

impl HttpPullSource {
  pub fn new(url: impl Into<String>) -> Result<Self, EngineError> {
    let http = reqwest::Client::builder()
      .timeout(REQUEST_TIMEOUT)
      .build()
      .map_err(EngineError::fetch)?;
    Ok(Self { url: url.into(), http })
  }
}

#[async_trait]
impl PullSource for HttpPullSource {
  fn name(&self) -> &str {
    &self.url
  }

  async fn fetch(&self, cache_token: Option<&CacheToken>) -> Result<PullResult, EngineError> {
    let mut req = self.http.get(&self.url);
    if let Some(token) = cache_token {
      if let Some(etag) = &token.etag {
        req = req.header(IF_NONE_MATCH, etag);
      }
      if let Some(modified) = &token.last_modified {
        req = req.header(IF_MODIFIED_SINCE, modified);
      }
    }

    let resp = req.send().await.map_err(EngineError::fetch)?;
    let status = resp.status();

    let header = |name: HeaderName| {
      resp
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
    };
    // Keep the previous validators when the response omits them.
    let fresh = CacheToken::from_parts(header(ETAG), header(LAST_MODIFIED));
    let token = match (fresh, cache_token) {
      (Some(t), _) => Some(t),
      (None, prev) => prev.cloned(),
    };

    if status == StatusCode::NOT_MODIFIED {
      return Ok(PullResult::unchanged(token));
    }
    if status != StatusCode::OK {
      let body = resp.text().await.unwrap_or_default();
      let preview: String = body.chars().take(200).collect();
      warn!(url = %self.url, status = %status, body = %preview, "unexpected summary response");
      return Err(EngineError::fetch(format!("summary returned {}", status)));
    }

    let body = resp.bytes().await.map_err(EngineError::fetch)?;
    Ok(PullResult::changed(body.to_vec(), token))
  }
}
