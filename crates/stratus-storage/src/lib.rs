//! Stratus storage crate - SQLite persistence and the expiry engine.
//!
//! Provides a WAL-mode SQLite database behind a bounded connection pool,
//! schema migrations, the entity repository (idempotent upserts, link
//! maintenance, filtered reads), and the write-driven expiry subsystem
//! (sync tracker + debounced background sweeps).

pub mod clock;
pub mod db;
pub mod expiry;
pub mod migrations;
pub mod repository;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use db::Database;
pub use expiry::{ExpireRequest, ExpiryDebouncer, SyncTracker};
pub use repository::EntityRepository;
pub use store::SnapshotStore;
