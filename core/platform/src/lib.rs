pub mod errors;
pub mod logging;
pub mod metrics;
pub mod tracing;

pub use errors::{PlatformError, PlatformResult};
pub use logging::init_logging;
pub use metrics::{init_metrics, record_counter, record_counter_with, record_histogram, record_histogram_with};
pub use tracing::{decision_span, new_decision_id};
