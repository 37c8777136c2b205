//! Write-driven expiry: sync tracker + debounced background sweeps.
//!
//! Every successful write hands an evaluation request to a single worker
//! over a rendezvous channel. The worker decides, per customer, whether
//! enough time has passed since the last evaluation to warrant a sweep;
//! qualifying requests dispatch the sweep on its own thread so a slow
//! delete never blocks evaluation for other customers.
//!
//! Eviction cadence is therefore coupled to each customer's write cadence:
//! a customer whose discovery feed goes quiet is never swept again, and
//! their last-known snapshot persists. That is intended behavior.

use std::collections::HashMap;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::thread;

use tokio::sync::broadcast;
use tracing::{debug, error, info};

use stratus_core::config::ExpiryConfig;
use stratus_core::error::{Result, StratusError};
use stratus_core::events::DomainEvent;

use crate::db::Database;

/// An expiry-evaluation request, one per successful write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpireRequest {
    pub customer_id: String,
    /// Unix-second timestamp of the triggering write.
    pub timestamp: i64,
}

/// Per-customer record of the last timestamp at which an expiry sweep was
/// evaluated (or the customer was first observed).
///
/// Read by the evaluation worker and written by concurrently running sweep
/// tasks, so every access goes through the lock. Owned explicitly and
/// injected, so multiple independent stores can coexist in one process.
#[derive(Debug, Default)]
pub struct SyncTracker {
    baselines: Mutex<HashMap<String, i64>>,
}

impl SyncTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The customer's current baseline, if one has been recorded.
    pub fn baseline(&self, customer_id: &str) -> Option<i64> {
        self.lock().get(customer_id).copied()
    }

    /// Record a new baseline for the customer.
    pub fn record(&self, customer_id: &str, timestamp: i64) {
        self.lock().insert(customer_id.to_string(), timestamp);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, i64>> {
        // A poisoned map just means a sweep thread panicked mid-insert; the
        // baselines themselves are still usable.
        self.baselines.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// The single-consumer evaluation worker for expiry requests.
///
/// Decisions are made strictly sequentially; the resulting sweeps run
/// concurrently on their own threads. A sweep only advances the customer's
/// baseline on success, so a failed sweep is retried by the next write
/// that crosses the interval.
pub struct ExpiryDebouncer {
    db: Arc<Database>,
    tracker: Arc<SyncTracker>,
    interval_secs: i64,
    threshold_secs: i64,
    events: broadcast::Sender<DomainEvent>,
}

impl ExpiryDebouncer {
    pub fn new(
        db: Arc<Database>,
        tracker: Arc<SyncTracker>,
        config: &ExpiryConfig,
        events: broadcast::Sender<DomainEvent>,
    ) -> Self {
        Self {
            db,
            tracker,
            interval_secs: config.interval_secs,
            threshold_secs: config.threshold_secs,
            events,
        }
    }

    /// Consume evaluation requests until the channel closes.
    ///
    /// Sweeps dispatched along the way are detached; abandoning one at
    /// process exit loses at most its terminal baseline update.
    pub fn spawn(self, requests: Receiver<ExpireRequest>) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            info!("expiry evaluation worker started");
            for request in requests {
                self.evaluate(request);
            }
            info!("expiry evaluation channel closed; worker exiting");
        })
    }

    /// Evaluate one request, dispatching a sweep when the debounce interval
    /// has been crossed. Returns the sweep's join handle so tests can wait
    /// for it; the worker loop discards it.
    pub fn evaluate(&self, request: ExpireRequest) -> Option<thread::JoinHandle<()>> {
        let Some(last_evaluated) = self.tracker.baseline(&request.customer_id) else {
            // First observation bootstraps the tracker without evicting.
            debug!(
                customer_id = %request.customer_id,
                timestamp = request.timestamp,
                "recording expiry baseline"
            );
            self.tracker.record(&request.customer_id, request.timestamp);
            return None;
        };

        if request.timestamp - last_evaluated <= self.interval_secs {
            return None;
        }

        let db = Arc::clone(&self.db);
        let tracker = Arc::clone(&self.tracker);
        let events = self.events.clone();
        let cutoff = request.timestamp - self.threshold_secs;

        Some(thread::spawn(move || {
            match sweep(&db, &request.customer_id, cutoff) {
                Ok(stats) => {
                    tracker.record(&request.customer_id, request.timestamp);
                    info!(
                        customer_id = %request.customer_id,
                        timestamp = request.timestamp,
                        instances_deleted = stats.instances,
                        groups_deleted = stats.groups,
                        links_deleted = stats.links,
                        "expired stale entities"
                    );
                    let _ = events.send(DomainEvent::SweepCompleted {
                        customer_id: request.customer_id,
                        triggered_at: request.timestamp,
                        cutoff,
                        instances_deleted: stats.instances,
                        groups_deleted: stats.groups,
                        links_deleted: stats.links,
                    });
                }
                Err(e) => {
                    // Baseline stays put: the next qualifying write retries.
                    error!(
                        customer_id = %request.customer_id,
                        timestamp = request.timestamp,
                        error = %e,
                        "error expiring entities"
                    );
                    let _ = events.send(DomainEvent::SweepFailed {
                        customer_id: request.customer_id,
                        triggered_at: request.timestamp,
                        reason: e.to_string(),
                    });
                }
            }
        }))
    }
}

struct SweepStats {
    instances: usize,
    groups: usize,
    links: usize,
}

/// Delete every group and instance of the customer whose `updated_at` falls
/// strictly before the cutoff, then drop link rows left pointing at rows
/// that no longer exist for that customer.
fn sweep(db: &Database, customer_id: &str, cutoff: i64) -> Result<SweepStats> {
    db.with_conn(|conn| {
        let groups = conn
            .execute(
                "DELETE FROM groups WHERE customer_id = ?1 AND updated_at < ?2",
                rusqlite::params![customer_id, cutoff],
            )
            .map_err(|e| StratusError::Sweep(format!("Failed to expire groups: {}", e)))?;

        let instances = conn
            .execute(
                "DELETE FROM instances WHERE customer_id = ?1 AND updated_at < ?2",
                rusqlite::params![customer_id, cutoff],
            )
            .map_err(|e| StratusError::Sweep(format!("Failed to expire instances: {}", e)))?;

        let links = conn
            .execute(
                "DELETE FROM groups_instances
                 WHERE customer_id = ?1
                   AND (instance_id NOT IN (SELECT id FROM instances WHERE customer_id = ?1)
                     OR group_name NOT IN (SELECT name FROM groups WHERE customer_id = ?1))",
                rusqlite::params![customer_id],
            )
            .map_err(|e| StratusError::Sweep(format!("Failed to prune links: {}", e)))?;

        Ok(SweepStats {
            instances,
            groups,
            links,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    const CUSTOMER: &str = "cust-expiry";

    fn insert_instance(db: &Database, customer_id: &str, id: &str, updated_at: i64) {
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO instances (id, customer_id, type, data, updated_at)
                 VALUES (?1, ?2, 'ec2', 'null', ?3)",
                rusqlite::params![id, customer_id, updated_at],
            )
            .map_err(|e| StratusError::Storage(e.to_string()))?;
            Ok(())
        })
        .unwrap();
    }

    fn insert_group(db: &Database, customer_id: &str, name: &str, updated_at: i64) {
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO groups (name, customer_id, type, data, updated_at)
                 VALUES (?1, ?2, 'security', 'null', ?3)",
                rusqlite::params![name, customer_id, updated_at],
            )
            .map_err(|e| StratusError::Storage(e.to_string()))?;
            Ok(())
        })
        .unwrap();
    }

    fn insert_link(db: &Database, customer_id: &str, group_name: &str, instance_id: &str) {
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO groups_instances (customer_id, group_name, instance_id)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![customer_id, group_name, instance_id],
            )
            .map_err(|e| StratusError::Storage(e.to_string()))?;
            Ok(())
        })
        .unwrap();
    }

    fn instance_ids(db: &Database, customer_id: &str) -> Vec<String> {
        db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id FROM instances WHERE customer_id = ?1 ORDER BY id")
                .map_err(|e| StratusError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(rusqlite::params![customer_id], |row| row.get(0))
                .map_err(|e| StratusError::Storage(e.to_string()))?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(row.map_err(|e| StratusError::Storage(e.to_string()))?);
            }
            Ok(ids)
        })
        .unwrap()
    }

    fn make_debouncer(
        interval_secs: i64,
        threshold_secs: i64,
    ) -> (
        ExpiryDebouncer,
        Arc<Database>,
        Arc<SyncTracker>,
        broadcast::Receiver<DomainEvent>,
    ) {
        let db = Arc::new(Database::in_memory().unwrap());
        let tracker = Arc::new(SyncTracker::new());
        let (events, events_rx) = broadcast::channel(16);
        let debouncer = ExpiryDebouncer::new(
            Arc::clone(&db),
            Arc::clone(&tracker),
            &ExpiryConfig {
                interval_secs,
                threshold_secs,
            },
            events,
        );
        (debouncer, db, tracker, events_rx)
    }

    fn request(timestamp: i64) -> ExpireRequest {
        ExpireRequest {
            customer_id: CUSTOMER.to_string(),
            timestamp,
        }
    }

    #[test]
    fn test_first_observation_records_baseline_without_sweeping() {
        let (debouncer, db, tracker, _events) = make_debouncer(60, 120);
        insert_instance(&db, CUSTOMER, "i-old", -500);

        assert!(debouncer.evaluate(request(0)).is_none());
        assert_eq!(tracker.baseline(CUSTOMER), Some(0));
        // Nothing evicted on bootstrap, however stale.
        assert_eq!(instance_ids(&db, CUSTOMER), vec!["i-old"]);
    }

    #[test]
    fn test_requests_within_interval_are_debounced() {
        let (debouncer, _db, tracker, _events) = make_debouncer(60, 120);

        assert!(debouncer.evaluate(request(0)).is_none());
        assert!(debouncer.evaluate(request(30)).is_none());
        assert!(debouncer.evaluate(request(60)).is_none()); // delta == interval: no sweep
        assert_eq!(tracker.baseline(CUSTOMER), Some(0));
    }

    #[test]
    fn test_sweep_deletes_only_stale_rows() {
        let (debouncer, db, tracker, mut events) = make_debouncer(60, 120);

        insert_instance(&db, CUSTOMER, "i-stale", 0);
        insert_instance(&db, CUSTOMER, "i-fresh", 200);
        insert_group(&db, CUSTOMER, "sg-stale", 10);
        insert_group(&db, CUSTOMER, "sg-fresh", 210);

        debouncer.evaluate(request(100));
        let handle = debouncer.evaluate(request(250)).expect("sweep dispatched");
        handle.join().unwrap();

        // cutoff = 250 - 120 = 130.
        assert_eq!(instance_ids(&db, CUSTOMER), vec!["i-fresh"]);
        assert_eq!(tracker.baseline(CUSTOMER), Some(250));

        match events.try_recv().unwrap() {
            DomainEvent::SweepCompleted {
                customer_id,
                triggered_at,
                cutoff,
                instances_deleted,
                groups_deleted,
                ..
            } => {
                assert_eq!(customer_id, CUSTOMER);
                assert_eq!(triggered_at, 250);
                assert_eq!(cutoff, 130);
                assert_eq!(instances_deleted, 1);
                assert_eq!(groups_deleted, 1);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_write_cadence_scenario() {
        // interval=60, threshold=120; writes at t=0, 30, 100, 250.
        let (debouncer, db, tracker, _events) = make_debouncer(60, 120);

        insert_instance(&db, CUSTOMER, "i1", 0);
        assert!(debouncer.evaluate(request(0)).is_none()); // bootstrap

        insert_instance(&db, CUSTOMER, "i2", 30);
        assert!(debouncer.evaluate(request(30)).is_none()); // delta 30 <= 60

        insert_instance(&db, CUSTOMER, "i3", 100);
        let handle = debouncer.evaluate(request(100)).expect("delta 100 > 60");
        handle.join().unwrap();
        // cutoff = -20: nothing is stale yet.
        assert_eq!(instance_ids(&db, CUSTOMER), vec!["i1", "i2", "i3"]);
        assert_eq!(tracker.baseline(CUSTOMER), Some(100));

        insert_instance(&db, CUSTOMER, "i4", 250);
        let handle = debouncer.evaluate(request(250)).expect("delta 150 > 60");
        handle.join().unwrap();
        // cutoff = 130: i1, i2, and i3 are all older.
        assert_eq!(instance_ids(&db, CUSTOMER), vec!["i4"]);
    }

    #[test]
    fn test_failed_sweep_leaves_baseline_for_retry() {
        let (debouncer, db, tracker, mut events) = make_debouncer(60, 120);

        debouncer.evaluate(request(0));

        // Sabotage the schema so the sweep fails.
        db.with_conn(|conn| {
            conn.execute_batch("ALTER TABLE groups RENAME TO groups_gone;")
                .map_err(|e| StratusError::Storage(e.to_string()))?;
            Ok(())
        })
        .unwrap();

        let handle = debouncer.evaluate(request(100)).expect("sweep dispatched");
        handle.join().unwrap();

        assert_eq!(tracker.baseline(CUSTOMER), Some(0));
        assert!(matches!(
            events.try_recv().unwrap(),
            DomainEvent::SweepFailed { .. }
        ));

        // Restore the table; the next qualifying write succeeds.
        db.with_conn(|conn| {
            conn.execute_batch("ALTER TABLE groups_gone RENAME TO groups;")
                .map_err(|e| StratusError::Storage(e.to_string()))?;
            Ok(())
        })
        .unwrap();

        let handle = debouncer.evaluate(request(200)).expect("retry dispatched");
        handle.join().unwrap();
        assert_eq!(tracker.baseline(CUSTOMER), Some(200));
        assert!(matches!(
            events.try_recv().unwrap(),
            DomainEvent::SweepCompleted { .. }
        ));
    }

    #[test]
    fn test_sweep_prunes_links_of_deleted_rows() {
        let (debouncer, db, _tracker, _events) = make_debouncer(60, 120);

        insert_group(&db, CUSTOMER, "sg-stale", 0);
        insert_instance(&db, CUSTOMER, "i-fresh", 400);
        insert_link(&db, CUSTOMER, "sg-stale", "i-fresh");

        debouncer.evaluate(request(300));
        let handle = debouncer.evaluate(request(400)).expect("sweep dispatched");
        handle.join().unwrap();

        let links: i64 = db
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM groups_instances WHERE customer_id = ?1",
                    rusqlite::params![CUSTOMER],
                    |row| row.get(0),
                )
                .map_err(|e| StratusError::Storage(e.to_string()))
            })
            .unwrap();
        assert_eq!(links, 0);
        // The fresh instance itself survives.
        assert_eq!(instance_ids(&db, CUSTOMER), vec!["i-fresh"]);
    }

    #[test]
    fn test_customers_are_tracked_independently() {
        let (debouncer, _db, tracker, _events) = make_debouncer(60, 120);

        debouncer.evaluate(request(0));
        debouncer.evaluate(ExpireRequest {
            customer_id: "cust-other".to_string(),
            timestamp: 500,
        });

        assert_eq!(tracker.baseline(CUSTOMER), Some(0));
        assert_eq!(tracker.baseline("cust-other"), Some(500));
    }

    #[test]
    fn test_worker_drains_channel_until_close() {
        let (debouncer, _db, tracker, _events) = make_debouncer(60, 120);
        let (tx, rx) = mpsc::sync_channel(0);

        let worker = debouncer.spawn(rx);
        tx.send(request(0)).unwrap();
        tx.send(ExpireRequest {
            customer_id: "cust-b".to_string(),
            timestamp: 7,
        })
        .unwrap();
        drop(tx);
        worker.join().unwrap();

        assert_eq!(tracker.baseline(CUSTOMER), Some(0));
        assert_eq!(tracker.baseline("cust-b"), Some(7));
    }
}
