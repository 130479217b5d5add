//! Exponential moving average of per-backend rewards.

use dashmap::DashMap;
use shared_types::BackendId;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use crate::errors::CoreResult;
use crate::persistence;

/// Score of a backend nothing has been learned about yet.
pub const NEUTRAL_SCORE: f64 = 1.0;

pub struct WeightLedger {
    scores: DashMap<BackendId, f64>,
    learning_rate: f64,
}

impl WeightLedger {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            scores: DashMap::new(),
            learning_rate,
        }
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Current score, or the neutral score for unseen backends.
    pub fn score(&self, id: &str) -> f64 {
        self.scores.get(id).map(|s| *s).unwrap_or(NEUTRAL_SCORE)
    }

    /// `score = (1 - α) * score + α * reward`, applied under the entry lock.
    pub fn update(&self, id: &str, reward: f64) -> f64 {
        let alpha = self.learning_rate;
        let mut entry = self.scores.entry(id.to_string()).or_insert(NEUTRAL_SCORE);
        *entry = (1.0 - alpha) * *entry + alpha * reward;
        let updated = *entry;
        drop(entry);
        debug!(backend = %id, reward, score = updated, "ledger updated");
        updated
    }

    /// Seed a neutral score; an existing score is kept.
    pub fn register(&self, id: &str) {
        self.scores.entry(id.to_string()).or_insert(NEUTRAL_SCORE);
    }

    pub fn forget(&self, id: &str) {
        self.scores.remove(id);
    }

    pub fn snapshot(&self) -> BTreeMap<BackendId, f64> {
        self.scores
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    /// Replace the contents with a persisted snapshot. Non-finite scores are
    /// dropped so the backend restarts from neutral.
    pub fn restore(&self, snapshot: BTreeMap<BackendId, f64>) {
        self.scores.clear();
        for (id, score) in snapshot {
            if score.is_finite() {
                self.scores.insert(id, score);
            }
        }
    }

    pub fn save(&self, path: &Path) -> CoreResult<()> {
        persistence::save_json(path, &self.snapshot())
    }

    /// Load a snapshot from `path`; missing or corrupt files leave the
    /// ledger empty.
    pub fn load(path: &Path, learning_rate: f64) -> Self {
        let ledger = Self::new(learning_rate);
        let snapshot: BTreeMap<BackendId, f64> =
            persistence::load_or_else(path, "backend weights", BTreeMap::new);
        ledger.restore(snapshot);
        ledger
    }
}
