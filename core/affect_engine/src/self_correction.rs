//! Background loop comparing the held mood with the emotion the agent actually
//! expressed, tuning tolerance and voice when the two drift apart.

use platform::metrics::{RITUALS_TOTAL, SELF_CORRECTIONS_TOTAL};
use platform::{decision_span, new_decision_id, record_counter, record_counter_with};
use serde::Serialize;
use shared_types::{AffectHistoryEntry, EmotionLabel, PersonalityLayer, SelfCorrectionConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::affect::AffectStateStore;
use crate::collaborators::{call_with_timeout, ExpressionObserver, RitualSink, VoiceTuner};
use crate::personality::LayerMachine;

/// Distance between two differing emotions.
const MISMATCH: f64 = 1.0;

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IterationOutcome {
    /// No usable sample this round.
    Skipped { reason: String },
    Aligned { emotion: EmotionLabel },
    /// Special label seen, counter still within tolerance.
    SpecialCounted { count: u32 },
    Ritual { name: String, steps: Vec<String> },
    WithinTolerance {
        intended: EmotionLabel,
        detected: EmotionLabel,
    },
    Corrected {
        intended: EmotionLabel,
        detected: EmotionLabel,
        layer: Option<PersonalityLayer>,
    },
}

#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub iterations: u64,
    pub skipped: u64,
    pub rituals: u64,
    pub corrections: u64,
    pub layer_changes: u64,
}

impl LoopSummary {
    fn absorb(&mut self, outcome: &IterationOutcome) {
        self.iterations += 1;
        match outcome {
            IterationOutcome::Skipped { .. } => self.skipped += 1,
            IterationOutcome::Ritual { .. } => self.rituals += 1,
            IterationOutcome::Corrected { layer, .. } => {
                self.corrections += 1;
                if layer.is_some() {
                    self.layer_changes += 1;
                }
            }
            _ => {}
        }
    }
}

pub struct SelfCorrectionLoop {
    affect: Arc<AffectStateStore>,
    layers: Arc<LayerMachine>,
    observer: Arc<dyn ExpressionObserver>,
    rituals: Arc<dyn RitualSink>,
    tuner: Arc<dyn VoiceTuner>,
    config: SelfCorrectionConfig,
    special_count: u32,
}

impl SelfCorrectionLoop {
    pub fn new(
        affect: Arc<AffectStateStore>,
        layers: Arc<LayerMachine>,
        observer: Arc<dyn ExpressionObserver>,
        rituals: Arc<dyn RitualSink>,
        tuner: Arc<dyn VoiceTuner>,
        config: SelfCorrectionConfig,
    ) -> Self {
        Self {
            affect,
            layers,
            observer,
            rituals,
            tuner,
            config,
            special_count: 0,
        }
    }

    pub fn special_count(&self) -> u32 {
        self.special_count
    }

    async fn tune(&self, emotion: &EmotionLabel) {
        let entries = [AffectHistoryEntry::neutral_for(emotion)];
        if let Err(e) = call_with_timeout(
            self.config.sample_timeout_ms,
            self.tuner.update_from_history(&entries),
        )
        .await
        {
            warn!(emotion = %emotion, error = %e, "voice tuning failed");
        }
    }

    /// One observation and its corrections.
    pub async fn run_once(&mut self) -> IterationOutcome {
        let detected = match call_with_timeout(
            self.config.sample_timeout_ms,
            self.observer.sample_observed_emotion(),
        )
        .await
        {
            Ok(emotion) => emotion,
            Err(e) => {
                warn!(error = %e, "expression sample failed, iteration skipped");
                return IterationOutcome::Skipped {
                    reason: e.to_string(),
                };
            }
        };

        let intended = self.affect.dominant();
        let reward = if detected == intended { 1.0 } else { -1.0 };
        let tolerance = self
            .affect
            .nudge_tolerances(reward, self.config.tolerance_step);
        debug!(
            detected = %detected,
            intended = %intended,
            tolerance = ?tolerance.entries(),
            "expression sampled"
        );

        if detected == self.config.special_label {
            self.special_count += 1;
            let limit = self.affect.tolerance_for(&self.config.special_label);
            if f64::from(self.special_count) <= limit {
                return IterationOutcome::SpecialCounted {
                    count: self.special_count,
                };
            }
            self.special_count = 0;
            let name = self.config.ritual_name.clone();
            let steps = match call_with_timeout(
                self.config.sample_timeout_ms,
                self.rituals.invoke_named(&name),
            )
            .await
            {
                Ok(steps) => steps,
                Err(e) => {
                    warn!(ritual = %name, error = %e, "ritual invocation failed");
                    Vec::new()
                }
            };
            record_counter_with(RITUALS_TOTAL, "ritual", &name, 1);
            info!(ritual = %name, steps = steps.len(), "ritual triggered by expression");
            return IterationOutcome::Ritual { name, steps };
        }
        self.special_count = 0;

        if detected == intended {
            return IterationOutcome::Aligned { emotion: detected };
        }

        let detected_layer = self.layers.layer_for_emotion(&detected);
        if let (Some(expected), Some(held)) = (detected_layer, self.affect.layer()) {
            if expected != held {
                self.tune(&detected).await;
                debug!(detected = %detected, layer = %held, "voice tuned for layer conflict");
            }
        }

        let limit = self.affect.tolerance_for(&intended);
        if MISMATCH <= limit {
            debug!(limit, "mismatch within tolerance");
            return IterationOutcome::WithinTolerance { intended, detected };
        }

        self.tune(&intended).await;

        let divergence = self.affect.intensity(&intended) - self.affect.intensity(&detected);
        let layer = match detected_layer {
            Some(target) if divergence >= self.config.divergence_threshold => {
                self.affect.transition_with(|state| {
                    (state.current_layer != Some(target)).then_some((target, target))
                })
            }
            _ => None,
        };

        record_counter(SELF_CORRECTIONS_TOTAL, 1);
        info!(
            detected = %detected,
            intended = %intended,
            limit,
            divergence,
            "expression corrected"
        );
        IterationOutcome::Corrected {
            intended,
            detected,
            layer,
        }
    }

    /// Run until the iteration bound is reached or `cancel` fires. A
    /// cancellation lets the current iteration finish.
    pub async fn run(&mut self, cancel: CancellationToken) -> LoopSummary {
        let mut summary = LoopSummary::default();
        let cadence = Duration::from_millis(self.config.cadence_ms);
        info!(
            cadence_ms = self.config.cadence_ms,
            iterations = ?self.config.iterations,
            "self-correction loop started"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }
            if let Some(bound) = self.config.iterations {
                if summary.iterations >= bound {
                    break;
                }
            }

            let outcome = self
                .run_once()
                .instrument(decision_span(new_decision_id(), "self_correction"))
                .await;
            summary.absorb(&outcome);

            if matches!(self.config.iterations, Some(bound) if summary.iterations >= bound) {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(cadence) => {}
            }
        }

        info!(
            iterations = summary.iterations,
            rituals = summary.rituals,
            corrections = summary.corrections,
            "self-correction loop stopped"
        );
        summary
    }

    /// Move the loop onto its own task.
    pub fn spawn(mut self, cancel: CancellationToken) -> JoinHandle<LoopSummary> {
        tokio::spawn(async move { self.run(cancel).await })
    }
}
