// Configuration surface of the affect engine.
//
// Every section and field is defaulted so a partial TOML file (or none at all)
// yields a working configuration. Range checks live in the engine's config
// service; unknown layer names already fail here, during deserialisation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::affect::{EmotionLabel, PersonalityLayer};
use crate::{BackendId, TaskCategory};

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AffectConfig {
    pub state: StateConfig,
    pub health: HealthConfig,
    pub ledger: LedgerConfig,
    pub mood: MoodConfig,
    pub personality: PersonalityConfig,
    pub routing: RoutingConfig,
    pub self_correction: SelfCorrectionConfig,
}

/// Where persisted state lives and how often it is flushed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct StateConfig {
    pub data_dir: PathBuf,
    pub affect_file: String,
    pub health_file: String,
    pub ledger_file: String,
    /// SQLite decision log file name; `None` keeps decisions in memory only.
    pub decision_log_file: Option<String>,
    /// Capacity of the in-memory decision ring.
    pub decision_log_capacity: usize,
    /// Interval of the background snapshot task; 0 disables it.
    pub auto_save_secs: u64,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            affect_file: "affect_state.json".to_string(),
            health_file: "backend_health.json".to_string(),
            ledger_file: "backend_weights.json".to_string(),
            decision_log_file: None,
            decision_log_capacity: 1024,
            auto_save_secs: 60,
        }
    }
}

impl StateConfig {
    pub fn affect_path(&self) -> PathBuf {
        self.data_dir.join(&self.affect_file)
    }

    pub fn health_path(&self) -> PathBuf {
        self.data_dir.join(&self.health_file)
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join(&self.ledger_file)
    }

    pub fn decision_log_path(&self) -> Option<PathBuf> {
        self.decision_log_file.as_ref().map(|f| self.data_dir.join(f))
    }
}

/// Circuit breaker settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    /// Length of the rolling failure window, and of the disable period.
    pub rotation_window_secs: u64,
    /// Failures within one window that disable a backend.
    pub max_failures: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            rotation_window_secs: 300,
            max_failures: 3,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LedgerConfig {
    pub learning_rate: f64,
    /// Reward penalty per second of backend latency.
    pub latency_penalty: f64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            latency_penalty: 0.1,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct MoodConfig {
    /// EMA rate applied to every channel on each observation.
    pub rate: f64,
    /// Channels created up front; unseen labels are added on first sight.
    pub emotions: Vec<EmotionLabel>,
    /// Value of the `"default"` tolerance entry in a fresh state.
    pub default_tolerance: f64,
}

impl Default for MoodConfig {
    fn default() -> Self {
        Self {
            rate: 0.2,
            emotions: [
                "neutral", "joy", "excited", "calm", "sad", "fear", "anger", "stress", "love",
            ]
            .into_iter()
            .map(EmotionLabel::new)
            .collect(),
            default_tolerance: 0.5,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PersonalityConfig {
    pub initial_layer: Option<PersonalityLayer>,
    /// Layer entered whenever a ritual keyword is seen.
    pub unlock_layer: PersonalityLayer,
    pub resonance_threshold: f64,
    /// Matched case-insensitively as substrings of the input.
    pub ritual_keywords: Vec<String>,
    pub emotion_layers: BTreeMap<EmotionLabel, PersonalityLayer>,
    /// Number of recent decision records inspected by history evaluation.
    pub history_window: usize,
}

impl Default for PersonalityConfig {
    fn default() -> Self {
        let emotion_layers = [
            ("anger", PersonalityLayer::Nigredo),
            ("fear", PersonalityLayer::Nigredo),
            ("sad", PersonalityLayer::Nigredo),
            ("sadness", PersonalityLayer::Nigredo),
            ("joy", PersonalityLayer::Rubedo),
            ("love", PersonalityLayer::Rubedo),
            ("excited", PersonalityLayer::Rubedo),
            ("calm", PersonalityLayer::Citrinitas),
        ]
        .into_iter()
        .map(|(e, l)| (EmotionLabel::new(e), l))
        .collect();

        Self {
            initial_layer: None,
            unlock_layer: PersonalityLayer::Citrinitas,
            resonance_threshold: 0.8,
            ritual_keywords: ["ritual", "invoke", "summon", "☉", "☾", "❣", "⟁"]
                .into_iter()
                .map(String::from)
                .collect(),
            emotion_layers,
            history_window: 5,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RoutingConfig {
    /// Backend used when nothing else is eligible and as the failure fallback.
    pub default_backend: BackendId,
    pub task_priority: BTreeMap<TaskCategory, BackendId>,
    pub task_priority_boost: f64,
    pub emotion_affinity: BTreeMap<EmotionLabel, BackendId>,
    pub affinity_bonus: f64,
    pub layer_bias: BTreeMap<PersonalityLayer, BackendId>,
    pub layer_bonus: f64,
    /// Bonus per appearance in recent decisions for the same emotion.
    pub memory_bonus: f64,
    pub memory_limit: usize,
    pub invoke_timeout_ms: u64,
    pub classify_timeout_ms: u64,
    pub memory_timeout_ms: u64,
    /// Task-matching outcomes a backend needs before it can be recommended.
    pub recommend_min_samples: usize,
    /// Outcomes per backend inspected by a recommendation.
    pub recommend_window: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_backend: "primary".to_string(),
            task_priority: BTreeMap::new(),
            task_priority_boost: 1.0,
            emotion_affinity: BTreeMap::new(),
            affinity_bonus: 0.2,
            layer_bias: BTreeMap::new(),
            layer_bonus: 0.1,
            memory_bonus: 0.1,
            memory_limit: 10,
            invoke_timeout_ms: 30_000,
            classify_timeout_ms: 2_000,
            memory_timeout_ms: 1_000,
            recommend_min_samples: 3,
            recommend_window: 50,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SelfCorrectionConfig {
    pub cadence_ms: u64,
    /// Iteration bound; `None` runs until cancelled.
    pub iterations: Option<u64>,
    pub sample_timeout_ms: u64,
    pub tolerance_step: f64,
    pub special_label: EmotionLabel,
    pub ritual_name: String,
    pub divergence_threshold: f64,
}

impl Default for SelfCorrectionConfig {
    fn default() -> Self {
        Self {
            cadence_ms: 1_000,
            iterations: None,
            sample_timeout_ms: 2_000,
            tolerance_step: 0.01,
            special_label: EmotionLabel::new("citrinitas"),
            ritual_name: "citrinitas_rite".to_string(),
            divergence_threshold: 0.5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: AffectConfig = toml::from_str("").unwrap();
        assert_eq!(config, AffectConfig::default());
        assert_eq!(config.health.max_failures, 3);
        assert_eq!(config.routing.memory_limit, 10);
        assert!(config.mood.emotions.contains(&EmotionLabel::new("joy")));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let raw = r#"
            [health]
            max_failures = 5

            [routing]
            default_backend = "glm"

            [routing.emotion_affinity]
            joy = "mistral"

            [routing.layer_bias]
            rubedo_layer = "mistral"
        "#;
        let config: AffectConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.health.max_failures, 5);
        assert_eq!(config.health.rotation_window_secs, 300);
        assert_eq!(config.routing.default_backend, "glm");
        assert_eq!(
            config.routing.emotion_affinity.get(&EmotionLabel::new("joy")),
            Some(&"mistral".to_string())
        );
        assert_eq!(
            config.routing.layer_bias.get(&PersonalityLayer::Rubedo),
            Some(&"mistral".to_string())
        );
    }

    #[test]
    fn unknown_layer_name_is_rejected() {
        let raw = r#"
            [personality]
            initial_layer = "obsidian"
        "#;
        assert!(toml::from_str::<AffectConfig>(raw).is_err());
    }

    #[test]
    fn state_paths_join_data_dir() {
        let state = StateConfig {
            data_dir: PathBuf::from("/var/lib/affect"),
            decision_log_file: Some("decisions.db".to_string()),
            ..StateConfig::default()
        };
        assert_eq!(
            state.affect_path(),
            PathBuf::from("/var/lib/affect/affect_state.json")
        );
        assert_eq!(
            state.decision_log_path(),
            Some(PathBuf::from("/var/lib/affect/decisions.db"))
        );
    }
}
