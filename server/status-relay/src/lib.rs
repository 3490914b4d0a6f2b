//! Status Relay
//!
//! HTTP service around the status engine: push deliveries on `/webhook`, an
//! optional summary poller, PostgreSQL-backed dedup shared between replicas,
//! and console output for every new update.

pub mod config;
mod date;
pub mod handlers;
pub mod pg_store;
pub mod pull_source;
pub mod routes;
pub mod sink;
pub mod state;
pub mod types;

pub use config::RelayConfig;
pub use handlers::{health, webhook};
pub use pg_store::PgStore;
pub use pull_source::HttpPullSource;
pub use routes::build_router;
pub use sink::ConsoleSink;
pub use state::AppState;
