use std::env;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer};

/// Environment variable selecting the output format.
pub const ENVIRONMENT_VAR: &str = "AFFECT_ENV";

/// Initialize structured logging.
///
/// JSON lines in `prod` and `staging`, readable text everywhere else. The
/// filter comes from `RUST_LOG` and defaults to `info`. Calling this more than
/// once (tests, embedding hosts) leaves the first subscriber in place.
pub fn init_logging(service_name: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let environment = env::var(ENVIRONMENT_VAR).unwrap_or_else(|_| "dev".to_string());

    let installed = if environment == "prod" || environment == "staging" {
        let json_layer = fmt::layer()
            .json()
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_target(true)
            .with_current_span(true)
            .with_span_list(true)
            .with_file(true)
            .with_line_number(true)
            .with_filter(env_filter);

        tracing_subscriber::registry().with(json_layer).try_init()
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .finish()
            .try_init()
    };

    if installed.is_ok() {
        tracing::info!(
            service = %service_name,
            environment = %environment,
            "logging initialized"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_is_idempotent() {
        init_logging("platform-test");
        init_logging("platform-test");
        tracing::info!("still logging after second init");
    }
}
