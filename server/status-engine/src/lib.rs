//! Status Engine: deduplication and normalization core for status-page updates.
//!
//! Ingests push deliveries (raw body + optional signature) and pulled summary
//! snapshots, normalizes them into `CanonicalUpdate` records, fingerprints
//! each `(source_id, update_id)` and emits a record only the first time it is
//! seen within the dedup TTL.
//!
//! No HTTP, no DB driver; fetching, shared storage and rendering are
//! collaborators behind `PullSource`, `DedupStore` and `Sink`.

pub mod config;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod normalize;
pub mod reconcile;
pub mod sink;
pub mod types;
pub mod verify;
pub mod worker;

pub use config::Config;
pub use dedup::{DedupStore, FailoverStore, MemoryStore};
pub use engine::Engine;
pub use error::EngineError;
pub use reconcile::{reconcile, Snapshot, SnapshotState};
pub use sink::Sink;
pub use types::{CanonicalUpdate, Fingerprint, IngestReport, RawKind};
pub use verify::{Verifier, VerifyPolicy};
pub use worker::{CacheToken, Poller, PullResult, PullSource};
