//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use stratus_ingest::Consumer;
use stratus_storage::EntityRepository;

/// Shared application state, cheap to clone into each handler task.
#[derive(Clone)]
pub struct AppState {
    /// The entity repository serving every read.
    pub repository: Arc<EntityRepository>,
    /// Ingest pipeline for the `/events` write path.
    pub consumer: Arc<Consumer>,
    /// Server start time for uptime reporting.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(repository: Arc<EntityRepository>) -> Self {
        Self {
            consumer: Arc::new(Consumer::new(Arc::clone(&repository))),
            repository,
            start_time: Instant::now(),
        }
    }
}
