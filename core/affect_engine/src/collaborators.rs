//! Narrow interfaces to the systems around the decision core, plus the
//! lightweight implementations shipped with the engine.

use async_trait::async_trait;
use shared_types::{
    AffectHistoryEntry, BackendId, DecisionOutcomeRecord, EmotionLabel, RoutingDecisionRecord,
    TaskCategory, TASK_GENERAL,
};
use std::future::Future;
use std::time::Duration;
use tracing::info;

use crate::errors::CollaboratorError;

/// Await a collaborator call for at most `timeout_ms`.
pub async fn call_with_timeout<T, F>(timeout_ms: u64, call: F) -> Result<T, CollaboratorError>
where
    F: Future<Output = Result<T, CollaboratorError>>,
{
    match tokio::time::timeout(Duration::from_millis(timeout_ms), call).await {
        Ok(result) => result,
        Err(_) => Err(CollaboratorError::Timeout(timeout_ms)),
    }
}

#[async_trait]
pub trait TaskClassifier: Send + Sync {
    async fn classify_task(&self, text: &str) -> Result<TaskCategory, CollaboratorError>;
}

#[async_trait]
pub trait EmotionDetector: Send + Sync {
    async fn detect_emotion(&self, text: &str) -> Result<EmotionLabel, CollaboratorError>;
}

/// Which decision records a memory query should return.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecisionFilter {
    pub emotion: Option<EmotionLabel>,
    pub backend: Option<BackendId>,
}

impl DecisionFilter {
    pub fn for_emotion(emotion: &EmotionLabel) -> Self {
        Self {
            emotion: Some(emotion.clone()),
            backend: None,
        }
    }

    pub fn matches(&self, record: &RoutingDecisionRecord) -> bool {
        self.emotion.as_ref().map_or(true, |e| &record.emotion == e)
            && self
                .backend
                .as_ref()
                .map_or(true, |b| &record.chosen_backend == b)
    }
}

/// Append-only store of routing decisions.
#[async_trait]
pub trait DecisionMemory: Send + Sync {
    /// Most recent matching records first, at most `limit`.
    async fn query_recent(
        &self,
        filter: &DecisionFilter,
        limit: usize,
    ) -> Result<Vec<RoutingDecisionRecord>, CollaboratorError>;

    async fn append(&self, record: RoutingDecisionRecord) -> Result<(), CollaboratorError>;

    /// Log how one backend invocation went. Stores that keep no outcomes
    /// accept and drop it.
    async fn record_outcome(&self, _outcome: DecisionOutcomeRecord) -> Result<(), CollaboratorError> {
        Ok(())
    }

    /// Most recent outcomes for `backend` first, at most `limit`.
    async fn query_outcomes(
        &self,
        _backend: &str,
        _limit: usize,
    ) -> Result<Vec<DecisionOutcomeRecord>, CollaboratorError> {
        Ok(Vec::new())
    }
}

/// Reads back the emotion actually expressed in the agent's rendered output.
#[async_trait]
pub trait ExpressionObserver: Send + Sync {
    async fn sample_observed_emotion(&self) -> Result<EmotionLabel, CollaboratorError>;
}

#[async_trait]
pub trait RitualSink: Send + Sync {
    async fn invoke_named(&self, name: &str) -> Result<Vec<String>, CollaboratorError>;
}

/// Voice and expression tuning fed from synthetic affect history.
#[async_trait]
pub trait VoiceTuner: Send + Sync {
    async fn update_from_history(&self, entries: &[AffectHistoryEntry]) -> Result<(), CollaboratorError>;
}

/// Ritual sink that only records the invocation in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingRitualSink;

#[async_trait]
impl RitualSink for LoggingRitualSink {
    async fn invoke_named(&self, name: &str) -> Result<Vec<String>, CollaboratorError> {
        info!(ritual = %name, "ritual invoked");
        Ok(Vec::new())
    }
}

/// Voice tuner for hosts without an expression layer.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopVoiceTuner;

#[async_trait]
impl VoiceTuner for NoopVoiceTuner {
    async fn update_from_history(&self, _entries: &[AffectHistoryEntry]) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}

/// Keyword heuristic: instructional, philosophical or general.
#[derive(Debug, Clone)]
pub struct KeywordTaskClassifier {
    rules: Vec<(TaskCategory, Vec<String>)>,
}

impl KeywordTaskClassifier {
    pub fn new(rules: Vec<(TaskCategory, Vec<String>)>) -> Self {
        Self { rules }
    }

    pub fn classify(&self, text: &str) -> TaskCategory {
        let tokens: Vec<String> = words(text).collect();
        for (category, keywords) in &self.rules {
            if tokens.iter().any(|t| keywords.iter().any(|k| k == t)) {
                return category.clone();
            }
        }
        TASK_GENERAL.to_string()
    }
}

impl Default for KeywordTaskClassifier {
    fn default() -> Self {
        let rule = |category: &str, keywords: &[&str]| {
            (
                category.to_string(),
                keywords.iter().map(|k| k.to_string()).collect(),
            )
        };
        Self::new(vec![
            rule("instructional", &["how", "explain", "tutorial"]),
            rule("philosophical", &["why", "meaning", "purpose"]),
        ])
    }
}

#[async_trait]
impl TaskClassifier for KeywordTaskClassifier {
    async fn classify_task(&self, text: &str) -> Result<TaskCategory, CollaboratorError> {
        Ok(self.classify(text))
    }
}

/// Lexicon lookup: the first word found in the lexicon decides the label.
#[derive(Debug, Clone)]
pub struct LexiconEmotionDetector {
    lexicon: Vec<(String, EmotionLabel)>,
}

impl LexiconEmotionDetector {
    pub fn new(lexicon: Vec<(String, EmotionLabel)>) -> Self {
        Self { lexicon }
    }

    pub fn detect(&self, text: &str) -> EmotionLabel {
        for token in words(text) {
            if let Some((_, label)) = self.lexicon.iter().find(|(w, _)| *w == token) {
                return label.clone();
            }
        }
        EmotionLabel::neutral()
    }
}

impl Default for LexiconEmotionDetector {
    fn default() -> Self {
        let table: &[(&str, &[&str])] = &[
            ("joy", &["happy", "glad", "joy", "great", "wonderful", "delighted"]),
            ("excited", &["excited", "thrilled", "amazing", "wow"]),
            ("love", &["love", "adore", "beloved"]),
            ("calm", &["calm", "peaceful", "relaxed", "serene"]),
            ("sad", &["sad", "unhappy", "cry", "lonely", "grief"]),
            ("fear", &["afraid", "scared", "fear", "anxious", "worried"]),
            ("anger", &["angry", "furious", "mad", "hate", "annoyed"]),
            ("stress", &["stressed", "overwhelmed", "deadline", "pressure"]),
        ];
        let lexicon = table
            .iter()
            .flat_map(|(label, words)| {
                words
                    .iter()
                    .map(move |w| (w.to_string(), EmotionLabel::new(label)))
            })
            .collect();
        Self::new(lexicon)
    }
}

#[async_trait]
impl EmotionDetector for LexiconEmotionDetector {
    async fn detect_emotion(&self, text: &str) -> Result<EmotionLabel, CollaboratorError> {
        Ok(self.detect(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn task_keywords() {
        let classifier = KeywordTaskClassifier::default();
        assert_eq!(classifier.classify("How do I bake bread?"), "instructional");
        assert_eq!(classifier.classify("Please EXPLAIN this"), "instructional");
        assert_eq!(classifier.classify("What is the meaning of it all"), "philosophical");
        assert_eq!(classifier.classify("hello there"), TASK_GENERAL);
        // whole words only
        assert_eq!(classifier.classify("showcase"), TASK_GENERAL);
    }

    #[test]
    fn lexicon_first_hit_wins() {
        let detector = LexiconEmotionDetector::default();
        assert_eq!(detector.detect("I am so happy today"), EmotionLabel::new("joy"));
        assert_eq!(detector.detect("Scared, but happy"), EmotionLabel::new("fear"));
        assert!(detector.detect("the weather report").is_neutral());
    }

    #[test]
    fn filter_matches_emotion_and_backend() {
        let record = RoutingDecisionRecord {
            input_text: "x".to_string(),
            chosen_backend: "glm".to_string(),
            emotion: EmotionLabel::new("joy"),
            task_category: TASK_GENERAL.to_string(),
            timestamp: Utc::now(),
        };
        assert!(DecisionFilter::default().matches(&record));
        assert!(DecisionFilter::for_emotion(&EmotionLabel::new("joy")).matches(&record));
        assert!(!DecisionFilter::for_emotion(&EmotionLabel::new("sad")).matches(&record));
        let by_backend = DecisionFilter {
            emotion: None,
            backend: Some("mistral".to_string()),
        };
        assert!(!by_backend.matches(&record));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_collaborator_times_out() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, CollaboratorError>(1)
        };
        assert_eq!(
            call_with_timeout(100, slow).await,
            Err(CollaboratorError::Timeout(100))
        );
        assert_eq!(call_with_timeout(100, async { Ok::<_, CollaboratorError>(2) }).await, Ok(2));
    }

    #[tokio::test]
    async fn shipped_sinks_succeed() {
        assert!(LoggingRitualSink.invoke_named("citrinitas_rite").await.unwrap().is_empty());
        NoopVoiceTuner
            .update_from_history(&[AffectHistoryEntry::neutral_for(&EmotionLabel::neutral())])
            .await
            .unwrap();
    }
}
