//! Wiring: builds every component from configuration and persisted state,
//! and owns the background tasks.

use shared_types::{AffectConfig, BackendId, HealthStatus};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::affect::AffectStateStore;
use crate::clock::{Clock, SystemClock};
use crate::collaborators::{
    DecisionMemory, EmotionDetector, ExpressionObserver, KeywordTaskClassifier,
    LexiconEmotionDetector, LoggingRitualSink, NoopVoiceTuner, RitualSink, TaskClassifier,
    VoiceTuner,
};
use crate::config_service;
use crate::errors::{CoreResult, RouterError};
use crate::health::HealthTracker;
use crate::ledger::WeightLedger;
use crate::memory_service::{InMemoryDecisionLog, SqliteDecisionLog};
use crate::personality::{LayerMachine, LayerTransition};
use crate::registry::{Backend, BackendRegistry};
use crate::router::{DecisionReport, Recommendation, RouterHandles, RoutingEngine};
use crate::self_correction::{LoopSummary, SelfCorrectionLoop};

/// Pluggable collaborators. `Default` ships the keyword classifier, the
/// lexicon detector, a logging ritual sink, no voice tuning and no observer.
#[derive(Clone)]
pub struct RuntimeCollaborators {
    pub task_classifier: Arc<dyn TaskClassifier>,
    pub emotion_detector: Arc<dyn EmotionDetector>,
    pub observer: Option<Arc<dyn ExpressionObserver>>,
    pub rituals: Arc<dyn RitualSink>,
    pub tuner: Arc<dyn VoiceTuner>,
    /// Overrides the configured decision log.
    pub memory: Option<Arc<dyn DecisionMemory>>,
    pub clock: Arc<dyn Clock>,
}

impl Default for RuntimeCollaborators {
    fn default() -> Self {
        Self {
            task_classifier: Arc::new(KeywordTaskClassifier::default()),
            emotion_detector: Arc::new(LexiconEmotionDetector::default()),
            observer: None,
            rituals: Arc::new(LoggingRitualSink),
            tuner: Arc::new(NoopVoiceTuner),
            memory: None,
            clock: Arc::new(SystemClock),
        }
    }
}

pub struct AffectRuntime {
    config: AffectConfig,
    router: Arc<RoutingEngine>,
    observer: Option<Arc<dyn ExpressionObserver>>,
    rituals: Arc<dyn RitualSink>,
    tuner: Arc<dyn VoiceTuner>,
    shutdown: CancellationToken,
}

impl AffectRuntime {
    pub fn from_config_file(
        path: impl AsRef<Path>,
        collaborators: RuntimeCollaborators,
    ) -> CoreResult<Self> {
        let config = config_service::load_config(path)?;
        Self::bootstrap(config, collaborators)
    }

    /// Build the runtime. Persisted state under `state.data_dir` is loaded
    /// when present; missing or corrupt files start from defaults.
    pub fn bootstrap(config: AffectConfig, collaborators: RuntimeCollaborators) -> CoreResult<Self> {
        config_service::validate(&config)?;
        let state = &config.state;
        let clock = collaborators.clock.clone();

        let health = Arc::new(HealthTracker::load(
            &state.health_path(),
            &config.health,
            clock.clone(),
        ));
        let ledger = Arc::new(WeightLedger::load(
            &state.ledger_path(),
            config.ledger.learning_rate,
        ));
        let affect = Arc::new(AffectStateStore::load(&state.affect_path(), &config));
        let memory: Arc<dyn DecisionMemory> = match (&collaborators.memory, state.decision_log_path()) {
            (Some(memory), _) => memory.clone(),
            (None, Some(path)) => Arc::new(SqliteDecisionLog::open(&path)?),
            (None, None) => Arc::new(InMemoryDecisionLog::new(state.decision_log_capacity)),
        };

        let handles = RouterHandles {
            registry: Arc::new(BackendRegistry::new()),
            ledger,
            health,
            affect,
            layers: Arc::new(LayerMachine::new(config.personality.clone())),
            memory,
            task_classifier: collaborators.task_classifier,
            emotion_detector: collaborators.emotion_detector,
            clock,
        };
        let router = Arc::new(RoutingEngine::new(
            handles,
            config.routing.clone(),
            config.ledger.latency_penalty,
        ));

        info!(
            data_dir = %state.data_dir.display(),
            default_backend = %config.routing.default_backend,
            "affect runtime ready"
        );

        Ok(Self {
            config,
            router,
            observer: collaborators.observer,
            rituals: collaborators.rituals,
            tuner: collaborators.tuner,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &AffectConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<RoutingEngine> {
        &self.router
    }

    pub fn affect(&self) -> &Arc<AffectStateStore> {
        &self.router.handles().affect
    }

    pub fn register_backend(&self, id: impl Into<BackendId>, backend: Arc<dyn Backend>) {
        self.router.register_backend(id, backend);
    }

    pub fn deregister_backend(&self, id: &str) -> bool {
        self.router.deregister_backend(id)
    }

    pub async fn handle_utterance(&self, text: &str) -> Result<DecisionReport, RouterError> {
        self.router.handle_utterance(text).await
    }

    pub async fn review_history(&self) -> Option<LayerTransition> {
        self.router.review_history().await
    }

    pub async fn recommend(&self, task: &str) -> Recommendation {
        self.router.recommend(task).await
    }

    pub fn health_summary(&self) -> BTreeMap<BackendId, HealthStatus> {
        self.router.handles().health.summary()
    }

    pub fn ledger_snapshot(&self) -> BTreeMap<BackendId, f64> {
        self.router.handles().ledger.snapshot()
    }

    /// Self-correction loop over the shared affect state, if an expression
    /// observer was supplied.
    pub fn self_correction_loop(&self) -> Option<SelfCorrectionLoop> {
        let observer = self.observer.clone()?;
        let handles = self.router.handles();
        Some(SelfCorrectionLoop::new(
            handles.affect.clone(),
            handles.layers.clone(),
            observer,
            self.rituals.clone(),
            self.tuner.clone(),
            self.config.self_correction.clone(),
        ))
    }

    /// Start the self-correction loop; it stops on [`shutdown`](Self::shutdown).
    pub fn spawn_self_correction(&self) -> Option<JoinHandle<LoopSummary>> {
        let lp = self.self_correction_loop()?;
        Some(lp.spawn(self.shutdown.child_token()))
    }

    /// Write affect state, ledger and health snapshots.
    pub fn persist(&self) -> CoreResult<()> {
        let state = &self.config.state;
        let handles = self.router.handles();
        handles.affect.persist()?;
        handles.ledger.save(&state.ledger_path())?;
        handles.health.save(&state.health_path())?;
        debug!(data_dir = %state.data_dir.display(), "runtime state persisted");
        Ok(())
    }

    /// Periodic snapshot task; `None` when `state.auto_save_secs` is 0.
    pub fn start_auto_save(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let secs = self.config.state.auto_save_secs;
        if secs == 0 {
            return None;
        }
        let runtime = self.clone();
        let cancel = self.shutdown.child_token();

        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(secs));
            // the first tick completes immediately
            interval.tick().await;
            info!("auto-save started (interval: {}s)", secs);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        match runtime.persist() {
                            Ok(()) => debug!("auto-save completed"),
                            Err(e) => error!("auto-save failed: {}", e),
                        }
                    }
                }
            }
            debug!("auto-save stopped");
        }))
    }

    /// Stop background tasks and write a final snapshot.
    pub fn shutdown(&self) -> CoreResult<()> {
        self.shutdown.cancel();
        self.persist()
    }
}
