//! Personality layer transitions.
//!
//! A ritual keyword in the input always unlocks the configured layer. Short
//! of that, a dominant emotion held with enough resonance pulls the agent
//! into the layer mapped to that emotion.

use serde::{Deserialize, Serialize};
use shared_types::{EmotionLabel, PersonalityConfig, PersonalityLayer, RoutingDecisionRecord};
use std::collections::HashMap;

/// What caused a layer change.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransitionTrigger {
    RitualKeyword,
    Resonance,
    Tolerance,
    History,
    SelfCorrection,
}

impl TransitionTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionTrigger::RitualKeyword => "ritual_keyword",
            TransitionTrigger::Resonance => "resonance",
            TransitionTrigger::Tolerance => "tolerance",
            TransitionTrigger::History => "history",
            TransitionTrigger::SelfCorrection => "self_correction",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerTransition {
    pub from: Option<PersonalityLayer>,
    pub to: PersonalityLayer,
    pub trigger: TransitionTrigger,
}

pub struct LayerMachine {
    config: PersonalityConfig,
    keywords: Vec<String>,
}

impl LayerMachine {
    pub fn new(config: PersonalityConfig) -> Self {
        let keywords = config
            .ritual_keywords
            .iter()
            .map(|k| k.to_lowercase())
            .collect();
        Self { config, keywords }
    }

    pub fn config(&self) -> &PersonalityConfig {
        &self.config
    }

    pub fn contains_ritual_keyword(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        self.keywords.iter().any(|k| text.contains(k.as_str()))
    }

    pub fn layer_for_emotion(&self, emotion: &EmotionLabel) -> Option<PersonalityLayer> {
        self.config.emotion_layers.get(emotion).copied()
    }

    /// Decide the next layer for one utterance, if any.
    pub fn evaluate(
        &self,
        text: &str,
        emotion: &EmotionLabel,
        resonance: f64,
        current: Option<PersonalityLayer>,
    ) -> Option<LayerTransition> {
        if self.contains_ritual_keyword(text) {
            return Some(LayerTransition {
                from: current,
                to: self.config.unlock_layer,
                trigger: TransitionTrigger::RitualKeyword,
            });
        }

        if resonance >= self.config.resonance_threshold {
            if let Some(layer) = self.layer_for_emotion(emotion) {
                if Some(layer) != current {
                    return Some(LayerTransition {
                        from: current,
                        to: layer,
                        trigger: TransitionTrigger::Resonance,
                    });
                }
            }
        }
        None
    }

    /// Layer suggested by the recent decision history.
    ///
    /// `records` are newest first, as decision memory returns them. Only the
    /// first `history_window` are inspected.
    pub fn evaluate_history(
        &self,
        records: &[RoutingDecisionRecord],
        resonance: f64,
        current: Option<PersonalityLayer>,
    ) -> Option<LayerTransition> {
        let window = self.config.history_window.min(records.len());
        if window == 0 {
            return None;
        }
        // oldest to newest
        let recent: Vec<&RoutingDecisionRecord> = records[..window].iter().rev().collect();

        let mut counts: HashMap<&EmotionLabel, usize> = HashMap::new();
        let mut order: Vec<&EmotionLabel> = Vec::new();
        for record in &recent {
            let count = counts.entry(&record.emotion).or_insert(0);
            if *count == 0 {
                order.push(&record.emotion);
            }
            *count += 1;
        }
        // first seen wins among equally common labels
        let mut top: Option<(&EmotionLabel, usize)> = None;
        for label in order {
            let count = counts.get(label).copied().unwrap_or(0);
            if top.map_or(true, |(_, best)| count > best) {
                top = Some((label, count));
            }
        }
        let latest = recent.last()?;
        let emotion = match top {
            Some((label, count)) if count >= 2 => label.clone(),
            _ => latest.emotion.clone(),
        };

        let joined = recent
            .iter()
            .map(|r| r.input_text.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ");
        let repeated = self
            .keywords
            .iter()
            .find(|k| joined.matches(k.as_str()).count() >= 2);
        let event = repeated.map(String::as_str).unwrap_or(latest.input_text.as_str());

        self.evaluate(event, &emotion, resonance, current)
            .map(|t| LayerTransition {
                trigger: TransitionTrigger::History,
                ..t
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn machine() -> LayerMachine {
        LayerMachine::new(PersonalityConfig::default())
    }

    fn joy() -> EmotionLabel {
        EmotionLabel::new("joy")
    }

    fn record(text: &str, emotion: &str) -> RoutingDecisionRecord {
        RoutingDecisionRecord {
            input_text: text.to_string(),
            chosen_backend: "glm".to_string(),
            emotion: EmotionLabel::new(emotion),
            task_category: "general".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn keyword_beats_resonance() {
        let m = machine();
        let t = m
            .evaluate("let us begin the RITUAL", &joy(), 0.95, Some(PersonalityLayer::Albedo))
            .unwrap();
        assert_eq!(t.to, PersonalityLayer::Citrinitas);
        assert_eq!(t.trigger, TransitionTrigger::RitualKeyword);
        assert_eq!(t.from, Some(PersonalityLayer::Albedo));
    }

    #[test]
    fn sigil_keyword_unlocks() {
        let t = machine().evaluate("☉", &EmotionLabel::neutral(), 0.0, None).unwrap();
        assert_eq!(t.to, PersonalityLayer::Citrinitas);
    }

    #[test]
    fn resonance_threshold_is_inclusive() {
        let m = machine();
        assert!(m.evaluate("hello", &joy(), 0.79, None).is_none());
        let t = m.evaluate("hello", &joy(), 0.8, None).unwrap();
        assert_eq!(t.to, PersonalityLayer::Rubedo);
        assert_eq!(t.trigger, TransitionTrigger::Resonance);
    }

    #[test]
    fn no_transition_into_current_layer_or_unmapped_emotion() {
        let m = machine();
        assert!(m
            .evaluate("hello", &joy(), 1.0, Some(PersonalityLayer::Rubedo))
            .is_none());
        assert!(m.evaluate("hello", &EmotionLabel::neutral(), 1.0, None).is_none());
    }

    #[test]
    fn history_prefers_repeated_emotion() {
        let m = machine();
        // newest first
        let records = vec![
            record("fine", "calm"),
            record("ugh", "anger"),
            record("ugh again", "anger"),
        ];
        let t = m.evaluate_history(&records, 0.9, None).unwrap();
        assert_eq!(t.to, PersonalityLayer::Nigredo);
        assert_eq!(t.trigger, TransitionTrigger::History);
    }

    #[test]
    fn history_falls_back_to_latest_emotion() {
        let m = machine();
        let records = vec![record("nice", "calm"), record("ugh", "anger")];
        let t = m.evaluate_history(&records, 0.9, None).unwrap();
        assert_eq!(t.to, PersonalityLayer::Citrinitas);
    }

    #[test]
    fn history_repeated_keyword_unlocks() {
        let m = machine();
        let records = vec![
            record("plain words", "joy"),
            record("summon the tide", "sad"),
            record("summon again", "fear"),
        ];
        let t = m.evaluate_history(&records, 0.0, None).unwrap();
        assert_eq!(t.to, PersonalityLayer::Citrinitas);
    }

    #[test]
    fn history_window_limits_records() {
        let config = PersonalityConfig {
            history_window: 1,
            ..PersonalityConfig::default()
        };
        let m = LayerMachine::new(config);
        let records = vec![
            record("hi", "joy"),
            record("ugh", "anger"),
            record("ugh", "anger"),
        ];
        let t = m.evaluate_history(&records, 0.9, None).unwrap();
        assert_eq!(t.to, PersonalityLayer::Rubedo);
        assert!(m.evaluate_history(&[], 0.9, None).is_none());
    }
}
