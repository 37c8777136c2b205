//! Stratus API crate - read-only query service over the entity repository.
//!
//! A thin axum façade: requests become repository calls, rows become JSON.
//! The one write path is `/events`, which accepts a discovery envelope and
//! routes it through the ingest pipeline.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::AppState;
