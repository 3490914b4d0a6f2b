//! Binary entrypoint for the status relay.

use std::sync::Arc;

use anyhow::Context;
use status_engine::worker::spawn_sweeper;
use status_engine::{DedupStore, Engine, MemoryStore, Poller, Verifier, VerifyPolicy};
use tokio::sync::watch;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, warn, Level};

use status_relay::pg_store::failover_store;
use status_relay::{routes, AppState, ConsoleSink, HttpPullSource, RelayConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Silent if the file does not exist; production injects env vars directly.
  let _ = dotenvy::dotenv();

  let cfg = RelayConfig::from_env().context("invalid configuration")?;
  init_tracing(&cfg.log_level);

  let store = build_store(&cfg).await?;

  let verifier = Verifier::from_config(cfg.signing_secret.as_deref());
  if verifier.policy() == VerifyPolicy::Disabled {
    warn!("SIGNING_SECRET not set: webhook signatures are NOT verified");
  }

  let engine = Arc::new(Engine::new(
    cfg.engine.clone(),
    verifier,
    Arc::clone(&store),
    Arc::new(ConsoleSink::stdout()),
  ));

  let (shutdown_tx, shutdown_rx) = watch::channel(false);
  let sweeper = spawn_sweeper(Arc::clone(&store), cfg.engine.sweep_interval, shutdown_rx.clone());

  let poller = if cfg.enable_poller {
    let source = HttpPullSource::new(cfg.summary_url.clone()).context("building summary client")?;
    info!(
      url = %cfg.summary_url,
      interval_secs = cfg.engine.poll_interval.as_secs(),
      "poller enabled"
    );
    Some(tokio::spawn(Poller::new(Arc::clone(&engine), source).run(shutdown_rx.clone())))
  } else {
    info!("poller disabled, waiting for deliveries on /webhook");
    None
  };

  let state = Arc::new(AppState::new(Arc::clone(&engine), cfg.enable_poller));
  let app = routes::build_router(state).layer(
    TraceLayer::new_for_http()
      .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
      .on_response(DefaultOnResponse::new().level(Level::INFO)),
  );

  let listener = tokio::net::TcpListener::bind(cfg.bind_addr)
    .await
    .with_context(|| format!("binding {}", cfg.bind_addr))?;
  info!("status-relay listening on http://{}", cfg.bind_addr);

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server crashed")?;

  // Background tasks finish their current iteration before exiting.
  let _ = shutdown_tx.send(true);
  if let Some(handle) = poller {
    let _ = handle.await;
  }
  let _ = sweeper.await;
  info!("status-relay stopped");

  Ok(())
}

fn init_tracing(default_level: &str) {
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()),
    )
    .init();
}

async fn build_store(cfg: &RelayConfig) -> anyhow::Result<Arc<dyn DedupStore>> {
  let ttl = cfg.engine.dedup_ttl;
  let Some(url) = cfg.database_url.as_deref() else {
    info!(ttl_secs = ttl.as_secs(), "DATABASE_URL not set, dedup is in-memory only");
    return Ok(Arc::new(MemoryStore::new(ttl)));
  };

  let store = failover_store(url, ttl).await.context("invalid DATABASE_URL")?;
  if !store.is_degraded() {
    info!(ttl_secs = ttl.as_secs(), "dedup backed by postgres");
  }
  Ok(Arc::new(store))
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    warn!(error = %e, "could not listen for ctrl-c");
    std::future::pending::<()>().await;
  }
  info!("shutdown requested");
}
