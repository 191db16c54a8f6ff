//! Loop state and result types.
//!
//! `LoopState` is owned by the loop's task and mutated only by that task; the
//! store keeps snapshots. `LoopResult` is the wire contract returned to
//! callers when a loop finishes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::providers::GeneratedContent;

/// Status of a running loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopStatus {
    Active,
    Completed,
    Cancelled,
    Error,
}

impl LoopStatus {
    /// Get a human-readable name for the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopStatus::Active => "active",
            LoopStatus::Completed => "completed",
            LoopStatus::Cancelled => "cancelled",
            LoopStatus::Error => "error",
        }
    }

    /// Check whether the status is terminal.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LoopStatus::Active)
    }
}

/// Status of a finished loop result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Completed,
    Cancelled,
    Error,
    Timeout,
}

impl ResultStatus {
    /// Get a human-readable name for the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Completed => "completed",
            ResultStatus::Cancelled => "cancelled",
            ResultStatus::Error => "error",
            ResultStatus::Timeout => "timeout",
        }
    }
}

/// Why the loop stopped iterating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceReason {
    /// Every node's confidence reached the request threshold
    ThresholdMet,
    /// Improvement over the last two iterations fell below the minimum rate
    MinimalImprovement,
    /// The two most recent improvement deltas both fell below staleness
    DiminishingReturns,
    /// The iteration budget ran out
    MaxIterationsReached,
    /// No node produced actionable feedback
    NoActionableFeedback,
    /// Cancellation was requested
    Cancelled,
    /// The wall-clock budget ran out
    Timeout,
    /// The quality controller flagged a critical violation
    QualityControlAbort,
    /// The confidence series oscillated instead of improving
    OscillationDetected,
    /// A collaborator failed terminally
    ProviderError,
}

impl ConvergenceReason {
    /// Get a human-readable name for the reason.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConvergenceReason::ThresholdMet => "threshold_met",
            ConvergenceReason::MinimalImprovement => "minimal_improvement",
            ConvergenceReason::DiminishingReturns => "diminishing_returns",
            ConvergenceReason::MaxIterationsReached => "max_iterations_reached",
            ConvergenceReason::NoActionableFeedback => "no_actionable_feedback",
            ConvergenceReason::Cancelled => "cancelled",
            ConvergenceReason::Timeout => "timeout",
            ConvergenceReason::QualityControlAbort => "quality_control_abort",
            ConvergenceReason::OscillationDetected => "oscillation_detected",
            ConvergenceReason::ProviderError => "provider_error",
        }
    }

    /// Reasons that count as convergence rather than exhaustion or abort.
    pub fn is_converged(&self) -> bool {
        matches!(
            self,
            ConvergenceReason::ThresholdMet
                | ConvergenceReason::MinimalImprovement
                | ConvergenceReason::DiminishingReturns
        )
    }
}

/// Mutable state of one loop, owned by its task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopState {
    /// Loop identifier
    pub loop_id: String,
    /// Request that started the loop
    pub request_id: String,
    /// Current status
    pub status: LoopStatus,
    /// When the loop started
    pub started_at: DateTime<Utc>,
    /// Current (or final) iteration number
    pub current_iteration: u32,
    /// Whether the loop converged
    pub converged: bool,
    /// Final overall confidence once the loop finishes
    pub final_confidence: Option<f64>,
}

impl LoopState {
    /// Create active state for a new loop.
    pub fn new(loop_id: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            loop_id: loop_id.into(),
            request_id: request_id.into(),
            status: LoopStatus::Active,
            started_at: Utc::now(),
            current_iteration: 0,
            converged: false,
            final_confidence: None,
        }
    }
}

/// Aggregate quality metrics for a finished loop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// Overall confidence after the initial validation
    pub initial_confidence: f64,
    /// Overall confidence after the last iteration
    pub final_confidence: f64,
    /// final - initial
    pub improvement: f64,
    /// Mean iteration processing time in milliseconds
    pub average_iteration_ms: f64,
    /// Total feedback messages produced across all iterations
    pub total_feedback_count: usize,
}

/// Compact per-iteration summary carried in the result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationSummary {
    /// Iteration number
    pub number: u32,
    /// Overall confidence after the iteration
    pub overall_confidence: f64,
    /// Delta against the previous iteration
    pub confidence_delta: f64,
    /// Feedback messages produced
    pub feedback_count: usize,
    /// Processing time in milliseconds
    pub processing_ms: u64,
}

/// Final result of a refinement loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopResult {
    /// Loop identifier
    pub loop_id: String,
    /// Request that started the loop
    pub request_id: String,
    /// Terminal status
    pub status: ResultStatus,
    /// Whether the loop converged
    pub converged: bool,
    /// Why iteration stopped
    pub convergence_reason: ConvergenceReason,
    /// Final content (absent on early provider failure)
    pub content: Option<GeneratedContent>,
    /// Aggregate quality metrics
    pub metrics: QualityMetrics,
    /// Per-iteration summaries
    pub iterations: Vec<IterationSummary>,
    /// Whether the result was flagged for human review
    pub escalation_required: bool,
    /// Originating cause for error-status results
    pub error: Option<String>,
}

impl LoopResult {
    /// Total iterations recorded (excluding the initial pass).
    pub fn iteration_count(&self) -> u32 {
        self.iterations
            .iter()
            .map(|s| s.number)
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_status_terminal() {
        assert!(!LoopStatus::Active.is_terminal());
        assert!(LoopStatus::Completed.is_terminal());
        assert!(LoopStatus::Cancelled.is_terminal());
        assert!(LoopStatus::Error.is_terminal());
    }

    #[test]
    fn test_loop_status_as_str() {
        assert_eq!(LoopStatus::Active.as_str(), "active");
        assert_eq!(LoopStatus::Error.as_str(), "error");
    }

    #[test]
    fn test_result_status_as_str() {
        assert_eq!(ResultStatus::Timeout.as_str(), "timeout");
        assert_eq!(ResultStatus::Completed.as_str(), "completed");
    }

    #[test]
    fn test_convergence_reason_serialization() {
        assert_eq!(
            serde_json::to_string(&ConvergenceReason::ThresholdMet).unwrap(),
            "\"threshold_met\""
        );
        assert_eq!(
            serde_json::to_string(&ConvergenceReason::MaxIterationsReached).unwrap(),
            "\"max_iterations_reached\""
        );
    }

    #[test]
    fn test_convergence_reason_is_converged() {
        assert!(ConvergenceReason::ThresholdMet.is_converged());
        assert!(ConvergenceReason::MinimalImprovement.is_converged());
        assert!(ConvergenceReason::DiminishingReturns.is_converged());
        assert!(!ConvergenceReason::MaxIterationsReached.is_converged());
        assert!(!ConvergenceReason::OscillationDetected.is_converged());
    }

    #[test]
    fn test_loop_state_new() {
        let state = LoopState::new("loop-1", "req-1");
        assert_eq!(state.status, LoopStatus::Active);
        assert_eq!(state.current_iteration, 0);
        assert!(!state.converged);
        assert!(state.final_confidence.is_none());
    }

    #[test]
    fn test_loop_result_iteration_count() {
        let result = LoopResult {
            loop_id: "loop-1".to_string(),
            request_id: "req-1".to_string(),
            status: ResultStatus::Completed,
            converged: true,
            convergence_reason: ConvergenceReason::ThresholdMet,
            content: None,
            metrics: QualityMetrics::default(),
            iterations: vec![
                IterationSummary {
                    number: 0,
                    overall_confidence: 0.5,
                    confidence_delta: 0.0,
                    feedback_count: 0,
                    processing_ms: 10,
                },
                IterationSummary {
                    number: 3,
                    overall_confidence: 0.8,
                    confidence_delta: 0.1,
                    feedback_count: 2,
                    processing_ms: 12,
                },
            ],
            escalation_required: false,
            error: None,
        };
        assert_eq!(result.iteration_count(), 3);
    }
}
