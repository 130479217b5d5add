//! Self-correction loop driven through the runtime with scripted collaborators.

use affect_engine::{
    AffectRuntime, CollaboratorError, ExpressionObserver, RitualSink, RuntimeCollaborators,
};
use async_trait::async_trait;
use shared_types::{AffectConfig, EmotionLabel};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

struct Scripted(Mutex<VecDeque<EmotionLabel>>);

impl Scripted {
    fn repeating(label: &str, times: usize) -> Arc<Self> {
        Arc::new(Self(Mutex::new(
            std::iter::repeat(EmotionLabel::new(label)).take(times).collect(),
        )))
    }
}

#[async_trait]
impl ExpressionObserver for Scripted {
    async fn sample_observed_emotion(&self) -> Result<EmotionLabel, CollaboratorError> {
        self.0
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| CollaboratorError::Unavailable("script exhausted".to_string()))
    }
}

#[derive(Default)]
struct CountingSink(Mutex<Vec<String>>);

#[async_trait]
impl RitualSink for CountingSink {
    async fn invoke_named(&self, name: &str) -> Result<Vec<String>, CollaboratorError> {
        self.0.lock().unwrap().push(name.to_string());
        Ok(vec![format!("{name}: light the lamp")])
    }
}

// Helper to run `samples` copies of `label` through a bounded loop
async fn run_special_samples(tolerance: f64, step: f64, samples: usize) -> (u64, Vec<String>) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AffectConfig::default();
    config.state.data_dir = dir.path().to_path_buf();
    config.state.auto_save_secs = 0;
    config.self_correction.iterations = Some(samples as u64);
    config.self_correction.cadence_ms = 1;
    config.self_correction.tolerance_step = step;

    let sink = Arc::new(CountingSink::default());
    let collaborators = RuntimeCollaborators {
        observer: Some(Scripted::repeating("citrinitas", samples)),
        rituals: sink.clone(),
        ..RuntimeCollaborators::default()
    };
    let runtime = AffectRuntime::bootstrap(config, collaborators).unwrap();
    let mut map = runtime.affect().tolerance_map();
    map.set("citrinitas", tolerance);
    runtime.affect().set_tolerance_map(map);

    let mut lp = runtime.self_correction_loop().unwrap();
    let summary = lp.run(CancellationToken::new()).await;
    assert_eq!(summary.iterations, samples as u64);
    let invoked = sink.0.lock().unwrap().clone();
    (summary.rituals, invoked)
}

#[tokio::test]
async fn test_special_label_at_zero_tolerance_fires_once_per_exceedance() {
    let (rituals, invoked) = run_special_samples(0.0, 0.0, 5).await;
    assert_eq!(rituals, 5);
    assert_eq!(invoked, vec!["citrinitas_rite".to_string(); 5]);
}

#[tokio::test]
async fn test_special_label_counter_resets_after_each_ritual() {
    // counter must exceed 1.0, so every second sample fires
    let (rituals, invoked) = run_special_samples(1.0, 0.0, 5).await;
    assert_eq!(rituals, 2);
    assert_eq!(invoked.len(), 2);
}

#[tokio::test]
async fn test_mismatched_samples_lower_special_tolerance() {
    // each citrinitas sample misses the neutral mood and pulls every
    // tolerance down first, so a count of 1 already exceeds the limit
    let (rituals, invoked) = run_special_samples(1.0, 0.01, 4).await;
    assert_eq!(rituals, 4);
    assert_eq!(invoked, vec!["citrinitas_rite".to_string(); 4]);
}

#[tokio::test]
async fn test_loop_requires_observer() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AffectConfig::default();
    config.state.data_dir = dir.path().to_path_buf();
    let runtime = AffectRuntime::bootstrap(config, RuntimeCollaborators::default()).unwrap();
    assert!(runtime.self_correction_loop().is_none());
    assert!(runtime.spawn_self_correction().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_spawned_loop_stops_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AffectConfig::default();
    config.state.data_dir = dir.path().to_path_buf();
    config.self_correction.cadence_ms = 100;
    let collaborators = RuntimeCollaborators {
        observer: Some(Scripted::repeating("neutral", 1_000)),
        ..RuntimeCollaborators::default()
    };
    let runtime = AffectRuntime::bootstrap(config, collaborators).unwrap();

    let handle = runtime.spawn_self_correction().unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(450)).await;
    runtime.shutdown().unwrap();
    let summary = handle.await.unwrap();
    assert!(summary.iterations >= 4 && summary.iterations <= 6, "{summary:?}");
    assert_eq!(summary.skipped, 0);
    // neutral matches the held mood every time
    assert!(runtime.affect().tolerance_for(&EmotionLabel::neutral()) > 0.5);
}
