use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// Mood, tolerance and personality layer types
pub mod affect;
pub use affect::*;

pub mod config;
pub use config::*;

/// Logical identifier for a reasoning backend (e.g. "glm", "mistral").
pub type BackendId = String;

/// Task category label produced by the task classifier (e.g. "instructional").
pub type TaskCategory = String;

/// Category used when the task classifier is unavailable.
pub const TASK_GENERAL: &str = "general";

/// One routing decision, appended to decision memory before the backend runs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RoutingDecisionRecord {
    pub input_text: String,
    pub chosen_backend: BackendId,
    pub emotion: EmotionLabel,
    pub task_category: TaskCategory,
    pub timestamp: DateTime<Utc>,
}

/// Result of one backend invocation, logged beside the decision that chose it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DecisionOutcomeRecord {
    pub backend: BackendId,
    pub task_category: TaskCategory,
    pub emotion: EmotionLabel,
    pub success: bool,
    /// Benchmark reward of the response; 0.0 when the call failed.
    pub reward: f64,
    pub timestamp: DateTime<Utc>,
}

/// Circuit breaker bookkeeping for one backend.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct HealthRecord {
    pub failure_count: u32,
    #[serde(default)]
    pub window_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub disabled_until: Option<DateTime<Utc>>,
}

impl HealthRecord {
    pub fn is_disabled_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.disabled_until, Some(until) if now < until)
    }
}

/// Coarse health classification used for logs and the soak report.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Disabled,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Disabled => write!(f, "disabled"),
        }
    }
}
