//! Backend selection.
//!
//! Each request scores the eligible backends from the weight ledger, recent
//! decisions for the same emotion and the static priority tables, invokes the
//! winner under a timeout and feeds the outcome back into the ledger and the
//! circuit breaker. A failed backend degrades to the default backend; a failed
//! default backend is the only error a caller sees.

use platform::metrics::{
    BACKEND_FAILURES_TOTAL, BACKEND_LATENCY_SECONDS, BACKEND_REWARD, FALLBACKS_TOTAL,
    LAYER_TRANSITIONS_TOTAL, ROUTE_DECISIONS_TOTAL,
};
use platform::{decision_span, new_decision_id, record_counter_with, record_histogram, record_histogram_with};
use serde::Serialize;
use shared_types::{
    AffectState, BackendId, DecisionOutcomeRecord, EmotionLabel, PersonalityLayer, RoutingConfig,
    RoutingDecisionRecord, TaskCategory, TASK_GENERAL,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::affect::{tolerance_exceedance, AffectStateStore};
use crate::benchmark::Benchmark;
use crate::clock::Clock;
use crate::collaborators::{
    call_with_timeout, DecisionFilter, DecisionMemory, EmotionDetector, TaskClassifier,
};
use crate::errors::{BackendError, RouterError};
use crate::health::HealthTracker;
use crate::ledger::WeightLedger;
use crate::personality::{LayerMachine, LayerTransition, TransitionTrigger};
use crate::registry::{Backend, BackendRegistry};

/// Shared state and collaborators the engine works against.
#[derive(Clone)]
pub struct RouterHandles {
    pub registry: Arc<BackendRegistry>,
    pub ledger: Arc<WeightLedger>,
    pub health: Arc<HealthTracker>,
    pub affect: Arc<AffectStateStore>,
    pub layers: Arc<LayerMachine>,
    pub memory: Arc<dyn DecisionMemory>,
    pub task_classifier: Arc<dyn TaskClassifier>,
    pub emotion_detector: Arc<dyn EmotionDetector>,
    pub clock: Arc<dyn Clock>,
}

/// Score breakdown for one eligible backend.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CandidateScore {
    pub backend: BackendId,
    pub base: f64,
    /// Ledger score plus memory, layer and affinity bonuses.
    pub memory: f64,
    pub combined: f64,
}

#[derive(Serialize, Debug, Clone)]
pub struct RouteOutcome {
    pub decision_id: Uuid,
    /// Backend that produced `response`.
    pub backend: BackendId,
    pub response: String,
    pub benchmark: Benchmark,
    /// Set when the chosen backend failed and the default answered instead.
    pub fallback_from: Option<BackendId>,
    pub candidates: Vec<CandidateScore>,
}

/// Everything the utterance pipeline decided for one input.
#[derive(Serialize, Debug, Clone)]
pub struct DecisionReport {
    pub outcome: RouteOutcome,
    pub task_category: TaskCategory,
    pub detected_emotion: EmotionLabel,
    pub dominant_emotion: EmotionLabel,
    pub resonance: f64,
    pub layer: Option<PersonalityLayer>,
    pub transition: Option<LayerTransition>,
}

/// History-based standing of one backend for a task category.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct HistoryScore {
    pub backend: BackendId,
    pub samples: usize,
    pub success_rate: f64,
    pub mean_reward: f64,
    /// `success_rate + mean_reward`.
    pub score: f64,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Recommendation {
    pub backend: BackendId,
    /// Backends with enough history, in id order.
    pub scored: Vec<HistoryScore>,
}

struct Selection {
    chosen: BackendId,
    candidates: Vec<CandidateScore>,
}

pub struct RoutingEngine {
    handles: RouterHandles,
    config: RoutingConfig,
    latency_penalty: f64,
}

impl RoutingEngine {
    pub fn new(handles: RouterHandles, config: RoutingConfig, latency_penalty: f64) -> Self {
        Self {
            handles,
            config,
            latency_penalty,
        }
    }

    pub fn handles(&self) -> &RouterHandles {
        &self.handles
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    pub fn default_backend(&self) -> &str {
        &self.config.default_backend
    }

    /// Make `backend` routable under `id` and seed its ledger score.
    pub fn register_backend(&self, id: impl Into<BackendId>, backend: Arc<dyn Backend>) {
        let id = id.into();
        self.handles.ledger.register(&id);
        self.handles.registry.register(id, backend);
    }

    /// Remove a backend along with its ledger score and health record.
    pub fn deregister_backend(&self, id: &str) -> bool {
        let removed = self.handles.registry.deregister(id).is_some();
        self.handles.ledger.forget(id);
        self.handles.health.forget(id);
        removed
    }

    /// Route `text` for the given emotion and task category.
    pub async fn route(
        &self,
        text: &str,
        emotion: &EmotionLabel,
        task: &str,
    ) -> Result<RouteOutcome, RouterError> {
        let decision_id = new_decision_id();
        self.route_inner(decision_id, text, emotion, task)
            .instrument(decision_span(decision_id, "route"))
            .await
    }

    async fn route_inner(
        &self,
        decision_id: Uuid,
        text: &str,
        emotion: &EmotionLabel,
        task: &str,
    ) -> Result<RouteOutcome, RouterError> {
        let selection = self.select(emotion, task).await;
        let chosen = selection.chosen.clone();
        debug!(backend = %chosen, emotion = %emotion, task, "backend selected");
        record_counter_with(ROUTE_DECISIONS_TOTAL, "backend", &chosen, 1);

        let record = RoutingDecisionRecord {
            input_text: text.to_string(),
            chosen_backend: chosen.clone(),
            emotion: emotion.clone(),
            task_category: task.to_string(),
            timestamp: self.handles.clock.now(),
        };
        if let Err(e) = call_with_timeout(
            self.config.memory_timeout_ms,
            self.handles.memory.append(record),
        )
        .await
        {
            warn!(error = %e, "failed to append decision record");
        }

        let default = self.config.default_backend.clone();
        match self.invoke(&chosen, text).await {
            Ok((response, latency)) => {
                let benchmark = self.learn(&chosen, text, &response, latency);
                self.handles.health.record_result(&chosen, true);
                self.log_outcome(&chosen, emotion, task, Some(&benchmark)).await;
                Ok(RouteOutcome {
                    decision_id,
                    backend: chosen,
                    response,
                    benchmark,
                    fallback_from: None,
                    candidates: selection.candidates,
                })
            }
            Err(e) if chosen == default => {
                if self.handles.registry.has_backend(&default) {
                    self.handles.health.record_result(&default, false);
                }
                self.log_outcome(&default, emotion, task, None).await;
                Err(self.default_failure(&default, e))
            }
            Err(e) => {
                self.handles.health.record_result(&chosen, false);
                self.log_outcome(&chosen, emotion, task, None).await;
                record_counter_with(BACKEND_FAILURES_TOTAL, "backend", &chosen, 1);
                record_counter_with(FALLBACKS_TOTAL, "backend", &chosen, 1);
                warn!(
                    backend = %chosen,
                    fallback = %default,
                    error = %e,
                    "backend failed, falling back to default"
                );

                let (response, latency) = match self.invoke(&default, text).await {
                    Ok(done) => done,
                    Err(e) => {
                        self.log_outcome(&default, emotion, task, None).await;
                        return Err(self.default_failure(&default, e));
                    }
                };
                let benchmark = self.learn(&default, text, &response, latency);
                self.log_outcome(&default, emotion, task, Some(&benchmark)).await;
                Ok(RouteOutcome {
                    decision_id,
                    backend: default,
                    response,
                    benchmark,
                    fallback_from: Some(chosen),
                    candidates: selection.candidates,
                })
            }
        }
    }

    /// Log one invocation result; `None` means the call failed. Unregistered
    /// backends have no history to keep.
    async fn log_outcome(
        &self,
        backend: &str,
        emotion: &EmotionLabel,
        task: &str,
        benchmark: Option<&Benchmark>,
    ) {
        if !self.handles.registry.has_backend(backend) {
            return;
        }
        let outcome = DecisionOutcomeRecord {
            backend: backend.to_string(),
            task_category: task.to_string(),
            emotion: emotion.clone(),
            success: benchmark.is_some(),
            reward: benchmark.map_or(0.0, |b| b.reward),
            timestamp: self.handles.clock.now(),
        };
        if let Err(e) = call_with_timeout(
            self.config.memory_timeout_ms,
            self.handles.memory.record_outcome(outcome),
        )
        .await
        {
            warn!(backend, error = %e, "failed to record backend outcome");
        }
    }

    fn default_failure(&self, default: &str, e: BackendError) -> RouterError {
        record_counter_with(BACKEND_FAILURES_TOTAL, "backend", default, 1);
        if !self.handles.registry.has_backend(default) {
            error!(backend = %default, "default backend is not registered");
            return RouterError::DefaultBackendMissing(default.to_string());
        }
        error!(backend = %default, error = %e, "default backend failed");
        RouterError::DefaultBackendFailed {
            backend: default.to_string(),
            source: e,
        }
    }

    /// Benchmark a response and fold the reward into the ledger.
    fn learn(&self, id: &str, input: &str, output: &str, latency: Duration) -> Benchmark {
        let benchmark = Benchmark::measure(input, output, latency, self.latency_penalty);
        self.handles.ledger.update(id, benchmark.reward);
        record_histogram_with(BACKEND_LATENCY_SECONDS, "backend", id, benchmark.latency_secs);
        record_histogram(BACKEND_REWARD, benchmark.reward);
        benchmark
    }

    async fn invoke(&self, id: &str, text: &str) -> Result<(String, Duration), BackendError> {
        let backend = self
            .handles
            .registry
            .get(id)
            .ok_or_else(|| BackendError::Unavailable(format!("backend '{id}' is not registered")))?;

        let started = Instant::now();
        let timeout = Duration::from_millis(self.config.invoke_timeout_ms);
        match tokio::time::timeout(timeout, backend.invoke(text)).await {
            Ok(Ok(response)) => Ok((response, started.elapsed())),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(BackendError::Timeout(self.config.invoke_timeout_ms)),
        }
    }

    async fn recent_for(&self, emotion: &EmotionLabel) -> Vec<RoutingDecisionRecord> {
        if self.config.memory_limit == 0 {
            return Vec::new();
        }
        match call_with_timeout(
            self.config.memory_timeout_ms,
            self.handles
                .memory
                .query_recent(&DecisionFilter::for_emotion(emotion), self.config.memory_limit),
        )
        .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "decision memory unavailable, routing without history");
                Vec::new()
            }
        }
    }

    async fn select(&self, emotion: &EmotionLabel, task: &str) -> Selection {
        let eligible: Vec<BackendId> = self
            .handles
            .registry
            .list_backends()
            .into_iter()
            .filter(|id| self.handles.health.is_eligible(id))
            .collect();

        if eligible.is_empty() {
            warn!(
                backend = %self.config.default_backend,
                "no eligible backend, using default"
            );
            return Selection {
                chosen: self.config.default_backend.clone(),
                candidates: Vec::new(),
            };
        }

        let recent = self.recent_for(emotion).await;
        let layer = self.handles.affect.layer();
        let layer_backend = layer.and_then(|l| self.config.layer_bias.get(&l));
        let priority_backend = self.config.task_priority.get(task);
        let affinity = self
            .config
            .emotion_affinity
            .get(emotion)
            .unwrap_or(&self.config.default_backend);

        let candidates: Vec<CandidateScore> = eligible
            .iter()
            .map(|id| {
                let base = if priority_backend == Some(id) {
                    1.0 + self.config.task_priority_boost
                } else {
                    1.0
                };
                let seen = recent.iter().filter(|r| &r.chosen_backend == id).count();
                let mut memory = self.handles.ledger.score(id) + self.config.memory_bonus * seen as f64;
                if layer_backend == Some(id) {
                    memory += self.config.layer_bonus;
                }
                if id == affinity {
                    memory += self.config.affinity_bonus;
                }
                CandidateScore {
                    backend: id.clone(),
                    base,
                    memory,
                    combined: base * memory,
                }
            })
            .collect();

        // candidates are in id order, so strict comparison keeps the first
        let mut best = &candidates[0];
        for c in &candidates[1..] {
            if c.combined > best.combined {
                best = c;
            }
        }

        let chosen = match candidates.iter().find(|c| &c.backend == affinity) {
            Some(aff) if best.memory <= aff.memory => aff.backend.clone(),
            _ => best.backend.clone(),
        };

        Selection { chosen, candidates }
    }

    /// Full pipeline for one utterance: classify, update the mood, apply any
    /// layer transition, then route on the dominant emotion.
    pub async fn handle_utterance(&self, text: &str) -> Result<DecisionReport, RouterError> {
        let decision_id = new_decision_id();
        self.handle_inner(decision_id, text)
            .instrument(decision_span(decision_id, "handle_utterance"))
            .await
    }

    async fn handle_inner(
        &self,
        decision_id: Uuid,
        text: &str,
    ) -> Result<DecisionReport, RouterError> {
        let timeout_ms = self.config.classify_timeout_ms;
        let handles = &self.handles;
        let task = match call_with_timeout(timeout_ms, handles.task_classifier.classify_task(text))
            .await
        {
            Ok(task) => task,
            Err(e) => {
                warn!(error = %e, "task classifier unavailable, using general");
                TASK_GENERAL.to_string()
            }
        };
        let detected = match call_with_timeout(timeout_ms, handles.emotion_detector.detect_emotion(text))
            .await
        {
            Ok(emotion) => emotion,
            Err(e) => {
                warn!(error = %e, "emotion detector unavailable, using neutral");
                EmotionLabel::neutral()
            }
        };

        let affect = &handles.affect;
        let observation = affect.observe_with(&detected, |state, dominant| {
            let transition = handles
                .layers
                .evaluate(text, dominant, state.resonance_level, state.current_layer)
                .or_else(|| self.tolerance_transition(state))?;
            Some((transition.to, transition))
        });
        let dominant = observation.dominant;
        let resonance = observation.resonance;
        let transition = observation.decided;
        if let Some(t) = &transition {
            note_transition(t);
        }

        let outcome = self.route_inner(decision_id, text, &dominant, &task).await?;
        info!(
            backend = %outcome.backend,
            task = %task,
            emotion = %detected,
            dominant = %dominant,
            "utterance handled"
        );

        Ok(DecisionReport {
            outcome,
            task_category: task,
            detected_emotion: detected,
            dominant_emotion: dominant,
            resonance,
            layer: affect.layer(),
            transition,
        })
    }

    /// Layer shift when the dominant emotion runs hotter than its tolerance.
    fn tolerance_transition(&self, state: &AffectState) -> Option<LayerTransition> {
        let current = state.current_layer;
        let (emotion, intensity, limit) = tolerance_exceedance(state)?;
        let layer = self.handles.layers.layer_for_emotion(&emotion)?;
        if Some(layer) == current {
            return None;
        }
        debug!(emotion = %emotion, intensity, limit, "intensity above tolerance");
        Some(LayerTransition {
            from: current,
            to: layer,
            trigger: TransitionTrigger::Tolerance,
        })
    }

    /// Re-read recent decisions and apply the layer they point to, if any.
    pub async fn review_history(&self) -> Option<LayerTransition> {
        let window = self.handles.layers.config().history_window;
        let records = match call_with_timeout(
            self.config.memory_timeout_ms,
            self.handles
                .memory
                .query_recent(&DecisionFilter::default(), window),
        )
        .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "decision memory unavailable, skipping history review");
                return None;
            }
        };
        let layers = &self.handles.layers;
        let transition = self.handles.affect.transition_with(|state| {
            let t = layers.evaluate_history(&records, state.resonance_level, state.current_layer)?;
            Some((t.to, t))
        })?;
        note_transition(&transition);
        Some(transition)
    }

    /// Backend with the best invocation history for `task`.
    ///
    /// Only eligible backends with at least `recommend_min_samples` outcomes
    /// for the task category take part; each scores its success rate plus its
    /// mean benchmark reward. Falls back to the default backend when none
    /// qualifies.
    pub async fn recommend(&self, task: &str) -> Recommendation {
        let mut scored = Vec::new();
        for id in self.handles.registry.list_backends() {
            if !self.handles.health.is_eligible(&id) {
                continue;
            }
            let outcomes = match call_with_timeout(
                self.config.memory_timeout_ms,
                self.handles
                    .memory
                    .query_outcomes(&id, self.config.recommend_window),
            )
            .await
            {
                Ok(outcomes) => outcomes,
                Err(e) => {
                    warn!(backend = %id, error = %e, "outcome history unavailable");
                    continue;
                }
            };
            let relevant: Vec<&DecisionOutcomeRecord> =
                outcomes.iter().filter(|o| o.task_category == task).collect();
            if relevant.len() < self.config.recommend_min_samples {
                continue;
            }

            let samples = relevant.len();
            let successes = relevant.iter().filter(|o| o.success).count();
            let success_rate = successes as f64 / samples as f64;
            let mean_reward = relevant.iter().map(|o| o.reward).sum::<f64>() / samples as f64;
            scored.push(HistoryScore {
                backend: id,
                samples,
                success_rate,
                mean_reward,
                score: success_rate + mean_reward,
            });
        }

        // id order, so strict comparison keeps the first of equal scores
        let mut best: Option<&HistoryScore> = None;
        for candidate in &scored {
            if best.map_or(true, |b| candidate.score > b.score) {
                best = Some(candidate);
            }
        }
        let backend = best
            .map(|b| b.backend.clone())
            .unwrap_or_else(|| self.config.default_backend.clone());
        debug!(task, backend = %backend, qualified = scored.len(), "backend recommended");
        Recommendation { backend, scored }
    }
}

fn note_transition(transition: &LayerTransition) {
    record_counter_with(LAYER_TRANSITIONS_TOTAL, "trigger", transition.trigger.as_str(), 1);
}
