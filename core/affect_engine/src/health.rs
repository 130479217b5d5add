//! Per-backend circuit breaker.
//!
//! Failures are counted inside a rolling window. Reaching `max_failures`, or a
//! window closing with failures still on the books, takes the backend out of
//! rotation for one window length. Eligibility returns on its own once the
//! disable period passes.

use chrono::Duration;
use dashmap::DashMap;
use shared_types::{BackendId, HealthConfig, HealthRecord, HealthStatus};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::errors::CoreResult;
use crate::persistence;

const MAX_WINDOW_SECS: u64 = 100 * 365 * 24 * 3600;

pub struct HealthTracker {
    records: DashMap<BackendId, HealthRecord>,
    window: Duration,
    max_failures: u32,
    clock: Arc<dyn Clock>,
}

impl HealthTracker {
    pub fn new(config: &HealthConfig, clock: Arc<dyn Clock>) -> Self {
        // capped so `now + window` can never overflow
        let secs = i64::try_from(config.rotation_window_secs.min(MAX_WINDOW_SECS)).unwrap_or(0);
        Self {
            records: DashMap::new(),
            window: Duration::seconds(secs),
            max_failures: config.max_failures.max(1),
            clock,
        }
    }

    /// Record one invocation outcome for `id`.
    pub fn record_result(&self, id: &str, success: bool) {
        let now = self.clock.now();
        let mut record = self.records.entry(id.to_string()).or_default();

        let window_start = record.window_start;
        match window_start {
            None => record.window_start = Some(now),
            Some(start) if now - start >= self.window => {
                if record.failure_count > 0 {
                    record.disabled_until = Some(now + self.window);
                    warn!(
                        backend = %id,
                        failures = record.failure_count,
                        "failure window closed with errors, backend disabled"
                    );
                }
                record.failure_count = 0;
                record.window_start = Some(now);
            }
            Some(_) => {}
        }

        if success {
            record.failure_count = 0;
            return;
        }

        record.failure_count += 1;
        if record.failure_count >= self.max_failures {
            record.disabled_until = Some(now + self.window);
            record.failure_count = 0;
            record.window_start = Some(now);
            warn!(
                backend = %id,
                max_failures = self.max_failures,
                "failure threshold reached, backend disabled"
            );
        } else {
            debug!(backend = %id, failures = record.failure_count, "backend failure recorded");
        }
    }

    /// False while the backend sits inside a disable period.
    pub fn is_eligible(&self, id: &str) -> bool {
        let now = self.clock.now();
        self.records
            .get(id)
            .map(|r| !r.is_disabled_at(now))
            .unwrap_or(true)
    }

    pub fn record(&self, id: &str) -> HealthRecord {
        self.records.get(id).map(|r| r.clone()).unwrap_or_default()
    }

    pub fn status(&self, id: &str) -> HealthStatus {
        let record = self.record(id);
        if record.is_disabled_at(self.clock.now()) {
            HealthStatus::Disabled
        } else if record.failure_count > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Status of every tracked backend, ordered by id.
    pub fn summary(&self) -> BTreeMap<BackendId, HealthStatus> {
        let ids: Vec<BackendId> = self.records.iter().map(|e| e.key().clone()).collect();
        ids.into_iter()
            .map(|id| {
                let status = self.status(&id);
                (id, status)
            })
            .collect()
    }

    pub fn forget(&self, id: &str) {
        self.records.remove(id);
    }

    pub fn snapshot(&self) -> BTreeMap<BackendId, HealthRecord> {
        self.records
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub fn restore(&self, snapshot: BTreeMap<BackendId, HealthRecord>) {
        self.records.clear();
        for (id, record) in snapshot {
            self.records.insert(id, record);
        }
    }

    pub fn save(&self, path: &Path) -> CoreResult<()> {
        persistence::save_json(path, &self.snapshot())
    }

    pub fn load(path: &Path, config: &HealthConfig, clock: Arc<dyn Clock>) -> Self {
        let tracker = Self::new(config, clock);
        let snapshot: BTreeMap<BackendId, HealthRecord> =
            persistence::load_or_else(path, "backend health", BTreeMap::new);
        tracker.restore(snapshot);
        tracker
    }
}
