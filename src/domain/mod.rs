//! Domain types for the refinement core.

pub mod disagreement;
pub mod feedback;
pub mod iteration;
pub mod learning;
pub mod request;
pub mod severity;
pub mod state;
pub mod violation;

pub use disagreement::{
    Disagreement, DisagreementCategory, DisagreementStatus, Position, Resolution, ResolutionOutcome,
};
pub use feedback::{FeedbackMessage, Urgency};
pub use iteration::Iteration;
pub use learning::{Impact, LearningEvent, LearningEventType};
pub use request::{LoopRequest, LoopRequestOptions, Priority};
pub use severity::Severity;
pub use state::{
    ConvergenceReason, IterationSummary, LoopResult, LoopState, LoopStatus, QualityMetrics,
    ResultStatus,
};
pub use violation::{QualityViolation, ViolationType};
