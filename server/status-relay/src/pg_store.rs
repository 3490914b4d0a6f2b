//! PostgreSQL-backed dedup store shared by every relay replica.
//!
//! One row per fingerprint in `seen_updates`. `claim` is a single upsert whose
//! conflict branch only fires for an expired row, so the database row lock
//! decides the race and exactly one caller gets a row back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx_core::query::query;
use sqlx_postgres::{PgPool, PgPoolOptions, Postgres};
use status_engine::dedup::{expires_at, DedupStore};
use status_engine::{EngineError, FailoverStore, Fingerprint};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(3);

pub struct PgStore {
  pool: PgPool,
  ttl: Duration,
  schema_ready: AtomicBool,
}

impl PgStore {
  /// Build a pool without connecting. The relay starts even if the database
  /// is down; the first failing call puts the failover store into degraded mode.
  pub fn connect_lazy(database_url: &str, ttl: Duration) -> Result<Self, EngineError> {
    let pool = PgPoolOptions::new()
      .max_connections(5)
      .acquire_timeout(ACQUIRE_TIMEOUT)
      .connect_lazy(database_url)
      .map_err(EngineError::store)?;
    Ok(Self::with_pool(pool, ttl))
  }

  pub fn with_pool(pool: PgPool, ttl: Duration) -> Self {
    Self {
      pool,
      ttl,
      schema_ready: AtomicBool::new(false),
    }
  }

  /// Create the table if it does not exist yet.
  pub async fn ensure_schema(&self) -> Result<(), EngineError> {
    query::<Postgres>(
      r#"
      CREATE TABLE IF NOT EXISTS seen_updates (
        fingerprint TEXT PRIMARY KEY,
        first_seen TIMESTAMPTZ NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL
      )
      "#,
    )
    .execute(&self.pool)
    .await
    .map_err(EngineError::store)?;

    query::<Postgres>("CREATE INDEX IF NOT EXISTS seen_updates_expires_at_idx ON seen_updates (expires_at)")
      .execute(&self.pool)
      .await
      .map_err(EngineError::store)?;
    self.schema_ready.store(true, Ordering::Release);
    Ok(())
  }

  /// Create the schema on first use, so a database that was down at startup
  /// still gets its table once it comes back.
  async fn ready(&self) -> Result<(), EngineError> {
    if self.schema_ready.load(Ordering::Acquire) {
      return Ok(());
    }
    self.ensure_schema().await
  }
}

/// PostgreSQL dedup behind an in-memory fallback.
///
/// The schema is created up front; if that fails the store starts out
/// degraded, so `/health` reports the outage before the first delivery.
pub async fn failover_store(database_url: &str, ttl: Duration) -> Result<FailoverStore<PgStore>, EngineError> {
  let pg = PgStore::connect_lazy(database_url, ttl)?;
  let schema = pg.ensure_schema().await;
  let store = FailoverStore::new(pg, ttl);
  if let Err(e) = schema {
    store.mark_unavailable(&e, Utc::now());
  }
  Ok(store)
}

#[async_trait]
impl DedupStore for PgStore {
  fn backend(&self) -> &'static str {
    "postgres"
  }

  async fn ping(&self) -> Result<(), EngineError> {
    self.ready().await?;
    query::<Postgres>("SELECT 1")
      .execute(&self.pool)
      .await
      .map_err(EngineError::store)?;
    Ok(())
  }

  async fn seen(&self, key: &Fingerprint, now: DateTime<Utc>) -> Result<bool, EngineError> {
    self.ready().await?;
    let row = query::<Postgres>("SELECT 1 FROM seen_updates WHERE fingerprint = $1 AND expires_at > $2")
      .bind(key.as_str())
      .bind(now)
      .fetch_optional(&self.pool)
      .await
      .map_err(EngineError::store)?;
    Ok(row.is_some())
  }

  async fn mark_seen(&self, key: &Fingerprint, now: DateTime<Utc>) -> Result<(), EngineError> {
    self.ready().await?;
    query::<Postgres>(
      r#"
      INSERT INTO seen_updates (fingerprint, first_seen, expires_at)
      VALUES ($1, $2, $3)
      ON CONFLICT (fingerprint) DO UPDATE SET expires_at = EXCLUDED.expires_at
      "#,
    )
    .bind(key.as_str())
    .bind(now)
    .bind(expires_at(now, self.ttl))
    .execute(&self.pool)
    .await
    .map_err(EngineError::store)?;
    Ok(())
  }

  async fn claim(&self, key: &Fingerprint, now: DateTime<Utc>) -> Result<bool, EngineError> {
    self.ready().await?;
    let row = query::<Postgres>(
      r#"
      INSERT INTO seen_updates (fingerprint, first_seen, expires_at)
      VALUES ($1, $2, $3)
      ON CONFLICT (fingerprint) DO UPDATE SET
        first_seen = EXCLUDED.first_seen,
        expires_at = EXCLUDED.expires_at
      WHERE seen_updates.expires_at <= EXCLUDED.first_seen
      RETURNING fingerprint
      "#,
    )
    .bind(key.as_str())
    .bind(now)
    .bind(expires_at(now, self.ttl))
    .fetch_optional(&self.pool)
    .await
    .map_err(EngineError::store)?;
    Ok(row.is_some())
  }

  async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, EngineError> {
    self.ready().await?;
    let done = query::<Postgres>("DELETE FROM seen_updates WHERE expires_at <= $1")
      .bind(now)
      .execute(&self.pool)
      .await
      .map_err(EngineError::store)?;
    Ok(done.rows_affected() as usize)
  }
}
