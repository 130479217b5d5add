use std::net::SocketAddr;
use std::sync::Once;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::errors::{PlatformError, PlatformResult};

pub const ROUTE_DECISIONS_TOTAL: &str = "affect_route_decisions_total";
pub const BACKEND_FAILURES_TOTAL: &str = "affect_backend_failures_total";
pub const FALLBACKS_TOTAL: &str = "affect_fallbacks_total";
pub const LAYER_TRANSITIONS_TOTAL: &str = "affect_layer_transitions_total";
pub const SELF_CORRECTIONS_TOTAL: &str = "affect_self_corrections_total";
pub const RITUALS_TOTAL: &str = "affect_rituals_total";
pub const BACKEND_LATENCY_SECONDS: &str = "affect_backend_latency_seconds";
pub const BACKEND_REWARD: &str = "affect_backend_reward";

/// Ensure we only install a single global recorder even if `init_metrics`
/// is called multiple times.
static INIT: Once = Once::new();

/// Install the Prometheus exporter and serve `/metrics` on `bind_addr`.
///
/// Subsequent calls are ignored. Until a recorder is installed every
/// `record_*` call is a no-op.
pub fn init_metrics(bind_addr: SocketAddr) -> PlatformResult<()> {
    let mut init_result: PlatformResult<()> = Ok(());

    INIT.call_once(|| {
        let builder = PrometheusBuilder::new().with_http_listener(bind_addr);

        if let Err(err) = builder.install() {
            init_result = Err(PlatformError::Metrics(format!(
                "failed to init metrics: {err}"
            )));
        }
    });

    init_result
}

/// Record a counter metric by name.
pub fn record_counter(name: &'static str, value: u64) {
    counter!(name).increment(value);
}

/// Record a counter with a single label, e.g. `("backend", "glm")`.
pub fn record_counter_with(name: &'static str, label: &'static str, label_value: &str, value: u64) {
    counter!(name, label => label_value.to_string()).increment(value);
}

/// Record a histogram metric (in seconds or other appropriate units).
pub fn record_histogram(name: &'static str, value: f64) {
    histogram!(name).record(value);
}

pub fn record_histogram_with(name: &'static str, label: &'static str, label_value: &str, value: f64) {
    histogram!(name, label => label_value.to_string()).record(value);
}
