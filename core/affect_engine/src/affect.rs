//! Affect state store: the mood vector, the active personality layer and the
//! adaptive tolerance map, flushed to disk on every change.
//!
//! Mutations serialise the new state under the write guard and write the file
//! after releasing it, so readers never wait on disk. Each snapshot carries a
//! generation and older generations never overwrite newer ones.

use shared_types::{
    AffectConfig, AffectState, EmotionLabel, MoodVector, PersonalityLayer, ToleranceMap,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info};

use crate::errors::CoreResult;
use crate::persistence;

pub struct AffectStateStore {
    state: RwLock<AffectState>,
    path: Option<PathBuf>,
    rate: f64,
    generation: AtomicU64,
    written: Mutex<u64>,
}

/// Result of [`AffectStateStore::observe_with`].
#[derive(Debug, Clone, PartialEq)]
pub struct Observation<T> {
    pub dominant: EmotionLabel,
    pub resonance: f64,
    /// Whatever the decision closure returned alongside a layer switch.
    pub decided: Option<T>,
}

/// Highest channel; ties go to the smallest label. Neutral when empty.
pub fn dominant_of(mood: &MoodVector) -> EmotionLabel {
    let mut best: Option<(&EmotionLabel, f64)> = None;
    for (label, value) in mood {
        match best {
            Some((_, top)) if *value <= top => {}
            _ => best = Some((label, *value)),
        }
    }
    best.map(|(l, _)| l.clone()).unwrap_or_else(EmotionLabel::neutral)
}

/// Dominant emotion with its intensity and limit, when the intensity is
/// strictly above the tolerance for that emotion.
pub fn tolerance_exceedance(state: &AffectState) -> Option<(EmotionLabel, f64, f64)> {
    let dominant = dominant_of(&state.mood);
    let intensity = state.mood.get(&dominant).copied().unwrap_or(0.0);
    let limit = state.tolerance.get(dominant.as_str());
    (intensity > limit).then_some((dominant, intensity, limit))
}

fn sanitize(state: &mut AffectState) {
    for value in state.mood.values_mut() {
        *value = if value.is_finite() { value.clamp(0.0, 1.0) } else { 0.0 };
    }
    state.tolerance.clamp_all();
    if !state.resonance_level.is_finite() {
        state.resonance_level = 0.0;
    }
    state.resonance_level = state.resonance_level.clamp(0.0, 1.0);
}

fn apply_observation(state: &mut AffectState, observed: &EmotionLabel, rate: f64) -> EmotionLabel {
    if !state.mood.contains_key(observed) {
        debug!(emotion = %observed, "new mood channel registered");
        state.mood.insert(observed.clone(), 0.0);
    }
    for (label, value) in state.mood.iter_mut() {
        let target = if label == observed { 1.0 } else { 0.0 };
        *value = ((1.0 - rate) * *value + rate * target).clamp(0.0, 1.0);
    }
    let dominant = dominant_of(&state.mood);
    state.resonance_level = state.mood.get(&dominant).copied().unwrap_or(0.0);
    state.last_emotion = Some(dominant.clone());
    dominant
}

fn switch_layer(state: &mut AffectState, layer: PersonalityLayer) -> Option<PersonalityLayer> {
    let previous = state.current_layer.replace(layer);
    if previous != Some(layer) {
        info!(
            from = previous.map(|l| l.as_str()).unwrap_or("none"),
            to = %layer,
            "personality layer changed"
        );
    }
    previous
}

impl AffectStateStore {
    /// Store that flushes to `path` after each mutation when a path is given.
    pub fn new(state: AffectState, path: Option<PathBuf>, rate: f64) -> Self {
        Self {
            state: RwLock::new(state),
            path,
            rate,
            generation: AtomicU64::new(0),
            written: Mutex::new(0),
        }
    }

    /// Fresh state built from configuration, kept in memory only.
    pub fn in_memory(config: &AffectConfig) -> Self {
        Self::new(Self::initial_state(config), None, config.mood.rate)
    }

    pub fn initial_state(config: &AffectConfig) -> AffectState {
        AffectState::initial(
            config.mood.emotions.iter().cloned(),
            config.personality.initial_layer,
            ToleranceMap::with_default(config.mood.default_tolerance),
        )
    }

    /// Load from `path`, or start from the configured initial state when the
    /// file is absent or corrupt.
    pub fn load(path: &Path, config: &AffectConfig) -> Self {
        let mut state = persistence::load_or_else(path, "affect state", || {
            Self::initial_state(config)
        });
        sanitize(&mut state);
        Self::new(state, Some(path.to_path_buf()), config.mood.rate)
    }

    fn read(&self) -> RwLockReadGuard<'_, AffectState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, AffectState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Serialise under `guard`, release it, then write the file.
    fn commit(&self, guard: RwLockWriteGuard<'_, AffectState>) {
        let Some(path) = &self.path else {
            return;
        };
        let snapshot = persistence::to_json(&*guard);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        drop(guard);

        let result = snapshot.and_then(|json| self.write_snapshot(path, generation, &json));
        if let Err(e) = result {
            error!(path = %path.display(), error = %e, "failed to flush affect state");
        }
    }

    /// Write `json` unless a newer generation already reached the disk.
    fn write_snapshot(&self, path: &Path, generation: u64, json: &str) -> CoreResult<()> {
        let mut written = self.written.lock().unwrap_or_else(|p| p.into_inner());
        if generation <= *written {
            debug!(generation, latest = *written, "stale affect snapshot skipped");
            return Ok(());
        }
        persistence::write_atomic(path, json)?;
        *written = generation;
        Ok(())
    }

    /// Explicit flush, reporting the error instead of logging it.
    pub fn persist(&self) -> CoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let (json, generation) = {
            let state = self.read();
            let json = persistence::to_json(&*state)?;
            (json, self.generation.fetch_add(1, Ordering::SeqCst) + 1)
        };
        self.write_snapshot(path, generation, &json)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Apply one observation: every channel decays toward the one-hot vector
    /// of `observed`. Returns the new dominant emotion.
    pub fn update(&self, observed: &EmotionLabel) -> EmotionLabel {
        let mut state = self.write();
        let dominant = apply_observation(&mut state, observed, self.rate);
        self.commit(state);
        dominant
    }

    /// Apply one observation and let `decide` pick a layer from the updated
    /// state, all under one write guard. Concurrent callers each see the
    /// layer the previous one left behind.
    pub fn observe_with<T, F>(&self, observed: &EmotionLabel, decide: F) -> Observation<T>
    where
        F: FnOnce(&AffectState, &EmotionLabel) -> Option<(PersonalityLayer, T)>,
    {
        let mut state = self.write();
        let dominant = apply_observation(&mut state, observed, self.rate);
        let decided = decide(&state, &dominant).map(|(layer, value)| {
            switch_layer(&mut state, layer);
            value
        });
        let resonance = state.resonance_level;
        self.commit(state);
        Observation {
            dominant,
            resonance,
            decided,
        }
    }

    /// Layer switch decided against the current state under one write guard.
    pub fn transition_with<T, F>(&self, decide: F) -> Option<T>
    where
        F: FnOnce(&AffectState) -> Option<(PersonalityLayer, T)>,
    {
        let mut state = self.write();
        let (layer, value) = decide(&state)?;
        switch_layer(&mut state, layer);
        self.commit(state);
        Some(value)
    }

    pub fn dominant(&self) -> EmotionLabel {
        dominant_of(&self.read().mood)
    }

    pub fn intensity(&self, label: &EmotionLabel) -> f64 {
        self.read().mood.get(label).copied().unwrap_or(0.0)
    }

    pub fn mood(&self) -> MoodVector {
        self.read().mood.clone()
    }

    pub fn resonance(&self) -> f64 {
        self.read().resonance_level
    }

    pub fn last_emotion(&self) -> Option<EmotionLabel> {
        self.read().last_emotion.clone()
    }

    pub fn snapshot(&self) -> AffectState {
        self.read().clone()
    }

    pub fn layer(&self) -> Option<PersonalityLayer> {
        self.read().current_layer
    }

    /// Set the active layer. Returns the previous one.
    pub fn set_layer(&self, layer: PersonalityLayer) -> Option<PersonalityLayer> {
        let mut state = self.write();
        let previous = switch_layer(&mut state, layer);
        self.commit(state);
        previous
    }

    pub fn tolerance_map(&self) -> ToleranceMap {
        self.read().tolerance.clone()
    }

    pub fn set_tolerance_map(&self, mut tolerance: ToleranceMap) {
        tolerance.clamp_all();
        let mut state = self.write();
        state.tolerance = tolerance;
        self.commit(state);
    }

    pub fn tolerance_for(&self, label: &EmotionLabel) -> f64 {
        self.read().tolerance.get(label.as_str())
    }

    /// Move every tolerance entry by `reward * step`, clamped to [0, 1].
    pub fn nudge_tolerances(&self, reward: f64, step: f64) -> ToleranceMap {
        let mut state = self.write();
        state.tolerance.nudge_all(reward * step);
        let tolerance = state.tolerance.clone();
        self.commit(state);
        tolerance
    }

    pub fn exceeds_tolerance(&self) -> Option<(EmotionLabel, f64, f64)> {
        tolerance_exceedance(&self.read())
    }
}
