//! `handle_utterance`: classification, mood updates and layer transitions.

use affect_engine::{
    AffectRuntime, Backend, BackendError, CollaboratorError, EmotionDetector, RuntimeCollaborators,
    TransitionTrigger,
};
use async_trait::async_trait;
use shared_types::{AffectConfig, EmotionLabel, PersonalityLayer};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Echo;

#[async_trait]
impl Backend for Echo {
    async fn invoke(&self, text: &str) -> Result<String, BackendError> {
        Ok(format!("you said: {text}"))
    }
}

struct Unreachable;

#[async_trait]
impl EmotionDetector for Unreachable {
    async fn detect_emotion(&self, _text: &str) -> Result<EmotionLabel, CollaboratorError> {
        Err(CollaboratorError::Unavailable("detector offline".to_string()))
    }
}

struct Hanging;

#[async_trait]
impl EmotionDetector for Hanging {
    async fn detect_emotion(&self, _text: &str) -> Result<EmotionLabel, CollaboratorError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(EmotionLabel::new("joy"))
    }
}

// Helper to build a runtime with an echo backend registered as the default
fn runtime(mut config: AffectConfig, collaborators: RuntimeCollaborators) -> (AffectRuntime, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    config.state.data_dir = dir.path().to_path_buf();
    config.state.auto_save_secs = 0;
    config.routing.default_backend = "echo".to_string();
    let runtime = AffectRuntime::bootstrap(config, collaborators).unwrap();
    runtime.register_backend("echo", Arc::new(Echo));
    (runtime, dir)
}

#[tokio::test]
async fn test_ritual_keyword_unlocks_citrinitas() {
    let (runtime, _dir) = runtime(AffectConfig::default(), RuntimeCollaborators::default());
    let report = runtime
        .handle_utterance("Let us INVOKE the morning star")
        .await
        .unwrap();

    let transition = report.transition.expect("keyword should transition");
    assert_eq!(transition.trigger, TransitionTrigger::RitualKeyword);
    assert_eq!(transition.to, PersonalityLayer::Citrinitas);
    assert_eq!(report.layer, Some(PersonalityLayer::Citrinitas));
    assert_eq!(runtime.affect().layer(), Some(PersonalityLayer::Citrinitas));
}

#[tokio::test]
async fn test_sustained_emotion_shifts_layer_by_resonance() {
    let mut config = AffectConfig::default();
    // keep the tolerance path quiet
    config.mood.default_tolerance = 1.0;
    let (runtime, _dir) = runtime(config, RuntimeCollaborators::default());

    for i in 0..7 {
        let report = runtime.handle_utterance("I am so happy").await.unwrap();
        assert!(report.transition.is_none(), "unexpected transition at step {i}");
    }
    let report = runtime.handle_utterance("I am so happy").await.unwrap();
    assert_eq!(report.dominant_emotion, EmotionLabel::new("joy"));
    assert!(report.resonance >= 0.8);
    let transition = report.transition.unwrap();
    assert_eq!(transition.trigger, TransitionTrigger::Resonance);
    assert_eq!(transition.to, PersonalityLayer::Rubedo);
}

#[tokio::test]
async fn test_intensity_over_tolerance_shifts_layer() {
    let (runtime, _dir) = runtime(AffectConfig::default(), RuntimeCollaborators::default());

    for _ in 0..3 {
        let report = runtime.handle_utterance("so happy").await.unwrap();
        assert!(report.transition.is_none());
    }
    // joy overtakes neutral at ~0.59, above the 0.5 default tolerance
    let report = runtime.handle_utterance("so happy").await.unwrap();
    assert_eq!(report.dominant_emotion, EmotionLabel::new("joy"));
    assert!(report.resonance < 0.8);
    let transition = report.transition.unwrap();
    assert_eq!(transition.trigger, TransitionTrigger::Tolerance);
    assert_eq!(transition.to, PersonalityLayer::Rubedo);
}

#[tokio::test]
async fn test_unavailable_detector_means_neutral() {
    let collaborators = RuntimeCollaborators {
        emotion_detector: Arc::new(Unreachable),
        ..RuntimeCollaborators::default()
    };
    let (runtime, _dir) = runtime(AffectConfig::default(), collaborators);

    let report = runtime.handle_utterance("I am so happy").await.unwrap();
    assert!(report.detected_emotion.is_neutral());
    assert_eq!(report.outcome.response, "you said: I am so happy");
}

#[tokio::test(start_paused = true)]
async fn test_hanging_detector_times_out_to_neutral() {
    let mut config = AffectConfig::default();
    config.routing.classify_timeout_ms = 50;
    let collaborators = RuntimeCollaborators {
        emotion_detector: Arc::new(Hanging),
        ..RuntimeCollaborators::default()
    };
    let (runtime, _dir) = runtime(config, collaborators);

    let report = runtime.handle_utterance("anything").await.unwrap();
    assert!(report.detected_emotion.is_neutral());
}

#[tokio::test]
async fn test_unseen_emotion_becomes_mood_channel() {
    struct Awe;

    #[async_trait]
    impl EmotionDetector for Awe {
        async fn detect_emotion(&self, _text: &str) -> Result<EmotionLabel, CollaboratorError> {
            Ok(EmotionLabel::new("awe"))
        }
    }

    let collaborators = RuntimeCollaborators {
        emotion_detector: Arc::new(Awe),
        ..RuntimeCollaborators::default()
    };
    let (runtime, _dir) = runtime(AffectConfig::default(), collaborators);
    runtime.handle_utterance("look at the sky").await.unwrap();

    let mood = runtime.affect().mood();
    assert!((mood[&EmotionLabel::new("awe")] - 0.2).abs() < 1e-12);
}

#[tokio::test]
async fn test_history_review_follows_repeated_sigils() {
    let (runtime, _dir) = runtime(AffectConfig::default(), RuntimeCollaborators::default());
    // the first utterance already unlocks citrinitas; move away from it
    runtime.handle_utterance("summon the tide").await.unwrap();
    runtime.affect().set_layer(PersonalityLayer::Albedo);
    runtime.handle_utterance("just chatting").await.unwrap();
    runtime.affect().set_layer(PersonalityLayer::Albedo);
    runtime.handle_utterance("summon it again").await.unwrap();
    runtime.affect().set_layer(PersonalityLayer::Albedo);

    let transition = runtime.review_history().await.unwrap();
    assert_eq!(transition.trigger, TransitionTrigger::History);
    assert_eq!(transition.from, Some(PersonalityLayer::Albedo));
    assert_eq!(transition.to, PersonalityLayer::Citrinitas);
    assert_eq!(runtime.affect().layer(), Some(PersonalityLayer::Citrinitas));
}
