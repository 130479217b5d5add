//! Affect-aware backend routing core.
//!
//! [`runtime::AffectRuntime`] wires the pieces together; the modules can
//! also be assembled by hand around [`router::RoutingEngine`].

pub mod affect;
pub mod benchmark;
pub mod clock;
pub mod collaborators;
pub mod config_service;
pub mod errors;
pub mod health;
pub mod ledger;
pub mod memory_service;
pub mod persistence;
pub mod personality;
pub mod registry;
pub mod router;
pub mod runtime;
pub mod self_correction;

pub use affect::AffectStateStore;
pub use benchmark::Benchmark;
pub use clock::{Clock, ManualClock, SystemClock};
pub use collaborators::{
    DecisionFilter, DecisionMemory, EmotionDetector, ExpressionObserver, KeywordTaskClassifier,
    LexiconEmotionDetector, LoggingRitualSink, NoopVoiceTuner, RitualSink, TaskClassifier,
    VoiceTuner,
};
pub use errors::{BackendError, CollaboratorError, CoreError, CoreResult, RouterError};
pub use health::HealthTracker;
pub use ledger::WeightLedger;
pub use memory_service::{InMemoryDecisionLog, SqliteDecisionLog};
pub use personality::{LayerMachine, LayerTransition, TransitionTrigger};
pub use registry::{Backend, BackendRegistry};
pub use router::{
    CandidateScore, DecisionReport, HistoryScore, Recommendation, RouteOutcome, RouterHandles,
    RoutingEngine,
};
pub use runtime::{AffectRuntime, RuntimeCollaborators};
pub use self_correction::{IterationOutcome, LoopSummary, SelfCorrectionLoop};
