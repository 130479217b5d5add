// === AFFECT TYPES ===
// Mood, tolerance and personality-layer shapes shared by the engine and its hosts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Emotion label as produced by classifiers and observers.
///
/// Labels are compared case-insensitively, so construction lower-cases and
/// trims the input.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(from = "String", into = "String")]
pub struct EmotionLabel(String);

impl EmotionLabel {
    pub const NEUTRAL: &'static str = "neutral";

    pub fn new(label: impl AsRef<str>) -> Self {
        Self(label.as_ref().trim().to_lowercase())
    }

    pub fn neutral() -> Self {
        Self(Self::NEUTRAL.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_neutral(&self) -> bool {
        self.0 == Self::NEUTRAL
    }
}

impl From<String> for EmotionLabel {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for EmotionLabel {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<EmotionLabel> for String {
    fn from(value: EmotionLabel) -> Self {
        value.0
    }
}

impl fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-emotion intensity channels, each in [0, 1].
pub type MoodVector = BTreeMap<EmotionLabel, f64>;

/// Discrete behavioural mode the agent is in.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum PersonalityLayer {
    #[serde(alias = "nigredo_layer")]
    Nigredo,
    #[serde(alias = "albedo_layer")]
    Albedo,
    #[serde(alias = "rubedo_layer")]
    Rubedo,
    #[serde(alias = "citrinitas_layer")]
    Citrinitas,
}

impl PersonalityLayer {
    pub const ALL: [PersonalityLayer; 4] = [
        PersonalityLayer::Nigredo,
        PersonalityLayer::Albedo,
        PersonalityLayer::Rubedo,
        PersonalityLayer::Citrinitas,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PersonalityLayer::Nigredo => "nigredo",
            PersonalityLayer::Albedo => "albedo",
            PersonalityLayer::Rubedo => "rubedo",
            PersonalityLayer::Citrinitas => "citrinitas",
        }
    }
}

impl fmt::Display for PersonalityLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a layer name is not one of the four known layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownLayer(pub String);

impl fmt::Display for UnknownLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown personality layer '{}' (expected nigredo, albedo, rubedo or citrinitas)",
            self.0
        )
    }
}

impl std::error::Error for UnknownLayer {}

impl FromStr for PersonalityLayer {
    type Err = UnknownLayer;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        let name = lowered.strip_suffix("_layer").unwrap_or(&lowered);
        match name {
            "nigredo" => Ok(PersonalityLayer::Nigredo),
            "albedo" => Ok(PersonalityLayer::Albedo),
            "rubedo" => Ok(PersonalityLayer::Rubedo),
            "citrinitas" => Ok(PersonalityLayer::Citrinitas),
            _ => Err(UnknownLayer(s.to_string())),
        }
    }
}

/// Adaptive per-emotion tolerance with a `"default"` fallback entry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(transparent)]
pub struct ToleranceMap(BTreeMap<String, f64>);

impl ToleranceMap {
    pub const DEFAULT_KEY: &'static str = "default";

    /// Map holding only the fallback entry.
    pub fn with_default(default: f64) -> Self {
        let mut values = BTreeMap::new();
        values.insert(Self::DEFAULT_KEY.to_string(), default.clamp(0.0, 1.0));
        Self(values)
    }

    /// Tolerance for `label`, or the `"default"` entry, or 0.0.
    pub fn get(&self, label: &str) -> f64 {
        self.0
            .get(label)
            .or_else(|| self.0.get(Self::DEFAULT_KEY))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn set(&mut self, label: &str, value: f64) {
        self.0.insert(label.to_string(), value.clamp(0.0, 1.0));
    }

    /// Shift the entry for `label` by `delta`, seeding it from the fallback.
    /// Returns the clamped new value.
    pub fn nudge(&mut self, label: &str, delta: f64) -> f64 {
        let next = (self.get(label) + delta).clamp(0.0, 1.0);
        self.0.insert(label.to_string(), next);
        next
    }

    /// Shift every entry, the fallback included, by `delta`.
    pub fn nudge_all(&mut self, delta: f64) {
        for value in self.0.values_mut() {
            *value = (*value + delta).clamp(0.0, 1.0);
        }
    }

    pub fn entries(&self) -> &BTreeMap<String, f64> {
        &self.0
    }

    /// Clamp every entry into [0, 1]; used after loading untrusted files.
    pub fn clamp_all(&mut self) {
        for value in self.0.values_mut() {
            *value = if value.is_finite() { value.clamp(0.0, 1.0) } else { 0.0 };
        }
    }
}

impl Default for ToleranceMap {
    fn default() -> Self {
        Self::with_default(0.5)
    }
}

impl From<BTreeMap<String, f64>> for ToleranceMap {
    fn from(values: BTreeMap<String, f64>) -> Self {
        let mut map = Self(values);
        map.clamp_all();
        map
    }
}

/// Persisted affect state.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AffectState {
    pub mood: MoodVector,
    #[serde(default)]
    pub current_layer: Option<PersonalityLayer>,
    #[serde(default)]
    pub resonance_level: f64,
    #[serde(default)]
    pub last_emotion: Option<EmotionLabel>,
    #[serde(default)]
    pub tolerance: ToleranceMap,
}

impl AffectState {
    /// Fresh state: the `neutral` channel starts saturated and dominant, every
    /// other known channel at zero.
    pub fn initial<I>(emotions: I, layer: Option<PersonalityLayer>, tolerance: ToleranceMap) -> Self
    where
        I: IntoIterator<Item = EmotionLabel>,
    {
        let mut mood: MoodVector = emotions.into_iter().map(|e| (e, 0.0)).collect();
        mood.insert(EmotionLabel::neutral(), 1.0);
        Self {
            mood,
            current_layer: layer,
            resonance_level: 1.0,
            last_emotion: Some(EmotionLabel::neutral()),
            tolerance,
        }
    }
}

/// Synthetic affect-history entry pushed into the voice tuning collaborator.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AffectHistoryEntry {
    pub emotion: EmotionLabel,
    pub arousal: f64,
    pub valence: f64,
    pub sentiment: f64,
}

impl AffectHistoryEntry {
    /// Mid-scale entry for `emotion`.
    pub fn neutral_for(emotion: &EmotionLabel) -> Self {
        Self {
            emotion: emotion.clone(),
            arousal: 0.5,
            valence: 0.5,
            sentiment: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emotion_label_normalises_case() {
        assert_eq!(EmotionLabel::new("  Joy "), EmotionLabel::new("joy"));
        assert!(EmotionLabel::from("NEUTRAL").is_neutral());
    }

    #[test]
    fn layer_parses_with_and_without_suffix() {
        assert_eq!("rubedo".parse::<PersonalityLayer>(), Ok(PersonalityLayer::Rubedo));
        assert_eq!(
            "Citrinitas_Layer".parse::<PersonalityLayer>(),
            Ok(PersonalityLayer::Citrinitas)
        );
        assert!("obsidian".parse::<PersonalityLayer>().is_err());
    }

    #[test]
    fn layer_serde_accepts_alias() {
        let layer: PersonalityLayer = serde_json::from_str("\"albedo_layer\"").unwrap();
        assert_eq!(layer, PersonalityLayer::Albedo);
        assert_eq!(serde_json::to_string(&layer).unwrap(), "\"albedo\"");
        assert!(serde_json::from_str::<PersonalityLayer>("\"gold\"").is_err());
    }

    #[test]
    fn tolerance_falls_back_to_default() {
        let mut map = ToleranceMap::with_default(0.3);
        assert_eq!(map.get("joy"), 0.3);
        map.set("joy", 0.9);
        assert_eq!(map.get("joy"), 0.9);
        assert_eq!(map.get("fear"), 0.3);
    }

    #[test]
    fn tolerance_nudge_stays_clamped() {
        let mut map = ToleranceMap::with_default(0.5);
        for _ in 0..200 {
            map.nudge("joy", 0.05);
        }
        assert_eq!(map.get("joy"), 1.0);
        for _ in 0..200 {
            map.nudge("joy", -0.05);
        }
        assert_eq!(map.get("joy"), 0.0);
        map.set("fear", 4.0);
        assert_eq!(map.get("fear"), 1.0);
    }

    #[test]
    fn nudge_all_moves_every_entry() {
        let mut map = ToleranceMap::with_default(0.5);
        map.set("citrinitas", 1.0);
        map.set("fear", 0.0);
        map.nudge_all(-0.01);
        assert!((map.get("citrinitas") - 0.99).abs() < 1e-12);
        assert_eq!(map.get("fear"), 0.0);
        assert!((map.get("joy") - 0.49).abs() < 1e-12);
        assert_eq!(map.entries().len(), 3);
    }

    #[test]
    fn initial_state_saturates_neutral() {
        let state = AffectState::initial(
            ["joy", "fear"].into_iter().map(EmotionLabel::new),
            Some(PersonalityLayer::Albedo),
            ToleranceMap::default(),
        );
        assert_eq!(state.mood[&EmotionLabel::neutral()], 1.0);
        assert_eq!(state.mood[&EmotionLabel::new("joy")], 0.0);
        assert_eq!(state.current_layer, Some(PersonalityLayer::Albedo));
        assert_eq!(state.resonance_level, 1.0);
        assert_eq!(state.last_emotion, Some(EmotionLabel::neutral()));
    }
}
