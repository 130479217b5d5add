use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use affect_engine::{AffectRuntime, Backend, BackendError, RuntimeCollaborators};
use async_trait::async_trait;
use clap::Parser;
use shared_types::AffectConfig;
use tokio::sync::Semaphore;
use tracing::{info, warn};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "route_soak",
    version,
    about = "Drive concurrent utterances through the affect router with synthetic backends"
)]
struct Args {
    /// Affect engine TOML config; defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for persisted state (overrides the config)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Total utterances to send
    #[arg(long, default_value_t = 500)]
    utterances: usize,

    /// Maximum number of utterances in flight
    #[arg(long, default_value_t = 16)]
    concurrency: usize,

    /// Failure rate of the flaky backend, 0.0 to 1.0
    #[arg(long, default_value_t = 0.3)]
    flaky_rate: f64,

    /// Prometheus exporter address, e.g. 127.0.0.1:9000
    #[arg(long)]
    metrics_addr: Option<SocketAddr>,
}

/// Synthetic backend that fails every n-th call and answers after a fixed delay.
struct Synthetic {
    name: &'static str,
    delay: Duration,
    fail_every: Option<u64>,
    calls: AtomicU64,
}

impl Synthetic {
    fn new(name: &'static str, delay_ms: u64, failure_rate: f64) -> Self {
        let fail_every =
            (failure_rate > 0.0).then(|| (1.0 / failure_rate.min(1.0)).round().max(1.0) as u64);
        Self {
            name,
            delay: Duration::from_millis(delay_ms),
            fail_every,
            calls: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl Backend for Synthetic {
    async fn invoke(&self, text: &str) -> Result<String, BackendError> {
        let n = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        tokio::time::sleep(self.delay).await;
        if matches!(self.fail_every, Some(every) if n % every == 0) {
            return Err(BackendError::Failed(format!("{} synthetic failure #{n}", self.name)));
        }
        Ok(format!("{} considered: {text}. The answer follows from it.", self.name))
    }
}

const UTTERANCES: &[&str] = &[
    "how do I explain recursion to a beginner",
    "I am so happy today, the sun is out",
    "why does anything have meaning at all",
    "I feel afraid of the deadline",
    "let us invoke the morning ritual",
    "calm evening, nothing to do",
    "this makes me angry and tired",
    "tell me a story about love",
];

#[tokio::main]
async fn main() {
    let args = Args::parse();

    platform::init_logging("route_soak");
    if let Some(addr) = args.metrics_addr {
        if let Err(e) = platform::init_metrics(addr) {
            eprintln!("failed to init metrics: {e}");
        }
    }

    let mut config = match &args.config {
        Some(path) => match affect_engine::config_service::load_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("failed to load config {}: {e}", path.display());
                std::process::exit(1);
            }
        },
        None => AffectConfig::default(),
    };
    if let Some(dir) = &args.data_dir {
        config.state.data_dir = dir.clone();
    }

    let default_backend = config.routing.default_backend.clone();
    let runtime = match AffectRuntime::bootstrap(config, RuntimeCollaborators::default()) {
        Ok(runtime) => Arc::new(runtime),
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            std::process::exit(1);
        }
    };
    runtime.register_backend(default_backend, Arc::new(Synthetic::new("steady", 5, 0.0)));
    runtime.register_backend("quick", Arc::new(Synthetic::new("quick", 1, args.flaky_rate)));
    runtime.register_backend("deep", Arc::new(Synthetic::new("deep", 20, args.flaky_rate / 2.0)));
    let auto_save = runtime.start_auto_save();

    let semaphore = Arc::new(Semaphore::new(args.concurrency.max(1)));
    let failures = Arc::new(AtomicU64::new(0));
    let fallbacks = Arc::new(AtomicU64::new(0));
    let started = Instant::now();

    let mut handles = Vec::with_capacity(args.utterances);
    for i in 0..args.utterances {
        let runtime = runtime.clone();
        let sem = semaphore.clone();
        let failures = failures.clone();
        let fallbacks = fallbacks.clone();

        handles.push(tokio::spawn(async move {
            let _permit = match sem.acquire().await {
                Ok(p) => p,
                Err(_) => return,
            };
            let text = UTTERANCES[i % UTTERANCES.len()];
            match runtime.handle_utterance(text).await {
                Ok(report) => {
                    if report.outcome.fallback_from.is_some() {
                        fallbacks.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Err(e) => {
                    failures.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "utterance failed");
                }
            }
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }

    if let Some(transition) = runtime.review_history().await {
        info!(to = %transition.to, trigger = transition.trigger.as_str(), "history review moved layer");
    }
    if let Err(e) = runtime.shutdown() {
        eprintln!("failed to persist state: {e}");
    }
    if let Some(handle) = auto_save {
        let _ = handle.await;
    }

    let mut recommendations = std::collections::BTreeMap::new();
    for task in ["general", "instructional", "philosophical"] {
        recommendations.insert(task, runtime.recommend(task).await);
    }

    let report = serde_json::json!({
        "utterances": args.utterances,
        "concurrency": args.concurrency,
        "elapsed_secs": started.elapsed().as_secs_f64(),
        "failures": failures.load(Ordering::Relaxed),
        "fallbacks": fallbacks.load(Ordering::Relaxed),
        "ledger": runtime.ledger_snapshot(),
        "health": runtime.health_summary(),
        "dominant_emotion": runtime.affect().dominant(),
        "layer": runtime.affect().layer(),
        "recommendations": recommendations,
    });
    match serde_json::to_string_pretty(&report) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("failed to render report: {e}"),
    }
}
