//! Injectable time source.
//!
//! Write timestamps and the expiry debounce decision both derive from a
//! `Clock` so tests can cross interval/threshold boundaries without
//! sleeping. Production wiring uses `SystemClock`.

use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};

/// A source of "now" for write timestamps and expiry evaluation.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A hand-advanced clock for deterministic tests.
#[derive(Debug)]
pub struct ManualClock {
    now_secs: Mutex<i64>,
}

impl ManualClock {
    /// Start the clock at the given unix timestamp.
    pub fn new(epoch_secs: i64) -> Self {
        Self {
            now_secs: Mutex::new(epoch_secs),
        }
    }

    /// Jump to an absolute unix timestamp.
    pub fn set(&self, epoch_secs: i64) {
        *self.now_secs.lock().expect("clock lock") = epoch_secs;
    }

    /// Move forward by the given number of seconds.
    pub fn advance(&self, secs: i64) {
        *self.now_secs.lock().expect("clock lock") += secs;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let secs = *self.now_secs.lock().expect("clock lock");
        Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
    }
}
