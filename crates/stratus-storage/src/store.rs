//! Wiring facade: database, repository, and expiry worker assembled from
//! configuration.

use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use tokio::sync::broadcast;

use stratus_core::config::StratusConfig;
use stratus_core::error::Result;
use stratus_core::events::DomainEvent;

use crate::clock::{Clock, SystemClock};
use crate::db::Database;
use crate::expiry::{ExpiryDebouncer, SyncTracker};
use crate::repository::EntityRepository;

/// A fully wired snapshot store: bounded-pool database, entity repository,
/// and the running expiry evaluation worker.
pub struct SnapshotStore {
    repository: Arc<EntityRepository>,
    events: broadcast::Sender<DomainEvent>,
    worker: Option<thread::JoinHandle<()>>,
}

impl SnapshotStore {
    /// Open the store described by the configuration and start the expiry
    /// worker, using the system clock.
    pub fn open(config: &StratusConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Open the store with an injected clock (tests drive a manual one).
    pub fn with_clock(config: &StratusConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let db = Arc::new(Database::open(
            Path::new(&config.database.path),
            config.database.max_connections,
        )?);
        let tracker = Arc::new(SyncTracker::new());
        let (events, _) = broadcast::channel(256);

        // Rendezvous channel: each write hands its evaluation request
        // directly to the single evaluating worker.
        let (expire_tx, expire_rx) = mpsc::sync_channel(0);
        let debouncer =
            ExpiryDebouncer::new(Arc::clone(&db), tracker, &config.expiry, events.clone());
        let worker = debouncer.spawn(expire_rx);

        let repository = Arc::new(EntityRepository::new(db, clock, expire_tx));

        Ok(Self {
            repository,
            events,
            worker: Some(worker),
        })
    }

    /// Open an in-memory store with default settings (for testing).
    pub fn in_memory() -> Result<Self> {
        let mut config = StratusConfig::default();
        config.database.path = ":memory:".to_string();
        Self::open(&config)
    }

    pub fn repository(&self) -> Arc<EntityRepository> {
        Arc::clone(&self.repository)
    }

    /// Subscribe to sweep outcome events.
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.events.subscribe()
    }

    /// Stop accepting evaluation requests and wait for the worker to drain.
    ///
    /// The evaluation channel closes once every repository handle is gone;
    /// callers must drop their repository clones first or the join blocks.
    /// In-flight sweeps are detached and finish (or are abandoned at
    /// process exit) on their own; row writes are individually atomic, so
    /// abandonment loses at most a baseline update.
    pub fn shutdown(self) {
        let SnapshotStore {
            repository,
            events: _events,
            mut worker,
        } = self;
        drop(repository);
        if let Some(handle) = worker.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;
    use stratus_core::types::{Entity, Instance, InstanceFilter};

    fn make_instance(customer_id: &str, id: &str) -> Entity {
        Entity::Instance(Instance {
            id: id.to_string(),
            customer_id: customer_id.to_string(),
            kind: "ec2".to_string(),
            data: json!({"InstanceId": id}),
            updated_at: None,
            groups: Vec::new(),
        })
    }

    #[test]
    fn test_open_in_memory_and_write_through_worker() {
        let store = SnapshotStore::in_memory().unwrap();
        let repo = store.repository();

        repo.put_entity(make_instance("cust-1", "i-1")).unwrap();
        assert!(repo.get_instance("cust-1", "i-1").unwrap().is_some());

        drop(repo);
        store.shutdown();
    }

    #[test]
    fn test_end_to_end_expiry_with_manual_clock() {
        let mut config = StratusConfig::default();
        config.database.path = ":memory:".to_string();
        config.expiry.interval_secs = 60;
        config.expiry.threshold_secs = 120;

        let clock = Arc::new(ManualClock::new(0));
        let store =
            SnapshotStore::with_clock(&config, Arc::clone(&clock) as Arc<dyn Clock>).unwrap();
        let repo = store.repository();
        let mut events = store.subscribe();

        // t=0 bootstraps, t=30 debounces, t=100 sweeps nothing,
        // t=250 sweeps everything older than 130.
        repo.put_entity(make_instance("c1", "i1")).unwrap();
        clock.set(30);
        repo.put_entity(make_instance("c1", "i2")).unwrap();
        clock.set(100);
        repo.put_entity(make_instance("c1", "i3")).unwrap();
        match events.blocking_recv().unwrap() {
            DomainEvent::SweepCompleted {
                instances_deleted, ..
            } => assert_eq!(instances_deleted, 0),
            other => panic!("unexpected event: {:?}", other),
        }

        clock.set(250);
        repo.put_entity(make_instance("c1", "i4")).unwrap();
        match events.blocking_recv().unwrap() {
            DomainEvent::SweepCompleted {
                cutoff,
                instances_deleted,
                ..
            } => {
                assert_eq!(cutoff, 130);
                assert_eq!(instances_deleted, 3);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let survivors = repo
            .list_instances(&InstanceFilter {
                customer_id: "c1".to_string(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].id, "i4");

        drop(repo);
        store.shutdown();
    }
}
