//! Reward signal for a backend response.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Scores that went into one reward.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Benchmark {
    pub coherence: f64,
    pub relevance: f64,
    pub latency_secs: f64,
    pub reward: f64,
}

impl Benchmark {
    /// `reward = coherence + relevance - latency_penalty * latency_secs`
    pub fn measure(input: &str, output: &str, latency: Duration, latency_penalty: f64) -> Self {
        let coherence = coherence(output);
        let relevance = relevance(output, input);
        let latency_secs = latency.as_secs_f64();
        Self {
            coherence,
            relevance,
            latency_secs,
            reward: coherence + relevance - latency_penalty * latency_secs,
        }
    }
}

/// Share of distinct whitespace tokens; 0 for empty text.
pub fn coherence(text: &str) -> f64 {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.is_empty() {
        return 0.0;
    }
    let unique: HashSet<&str> = tokens.iter().copied().collect();
    unique.len() as f64 / tokens.len() as f64
}

/// Jaccard similarity of the whitespace token sets; 0 if either is empty.
pub fn relevance(output: &str, input: &str) -> f64 {
    let a: HashSet<&str> = output.split_whitespace().collect();
    let b: HashSet<&str> = input.split_whitespace().collect();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(&b).count();
    let union = a.union(&b).count();
    shared as f64 / union as f64
}
