use tracing::{span, Level, Span};
use uuid::Uuid;

pub fn new_decision_id() -> Uuid {
    Uuid::new_v4()
}

/// Span wrapping one routing decision or loop iteration.
pub fn decision_span(decision_id: Uuid, operation: &str) -> Span {
    span!(
        Level::INFO,
        "decision",
        %operation,
        decision_id = %decision_id,
    )
}
