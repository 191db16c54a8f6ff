//! Typed lifecycle events.
//!
//! Loop lifecycle notifications travel over a broadcast channel with explicit
//! subscriber handles; emission never blocks and tolerates zero subscribers.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::domain::{ConvergenceReason, QualityViolation, ResultStatus};

/// Observable side effects of the refinement core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoopEvent {
    /// An iteration finished
    IterationCompleted {
        loop_id: String,
        iteration: u32,
        overall_confidence: f64,
        confidence_delta: f64,
    },
    /// A loop reached a terminal state
    LoopCompleted {
        loop_id: String,
        status: ResultStatus,
        converged: bool,
        reason: ConvergenceReason,
    },
    /// A critical quality violation was detected
    CriticalViolation {
        loop_id: String,
        violation: QualityViolation,
    },
    /// A loop or disagreement was escalated to human review
    HumanEscalation {
        loop_id: Option<String>,
        disagreement_id: Option<String>,
        reason: String,
    },
    /// The process-wide circuit breaker opened
    CircuitBreakerOpened {
        failure_count: u32,
        cooldown_secs: u64,
    },
}

impl LoopEvent {
    /// Get a stable name for the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            LoopEvent::IterationCompleted { .. } => "iteration_completed",
            LoopEvent::LoopCompleted { .. } => "loop_completed",
            LoopEvent::CriticalViolation { .. } => "critical_violation",
            LoopEvent::HumanEscalation { .. } => "human_escalation",
            LoopEvent::CircuitBreakerOpened { .. } => "circuit_breaker_opened",
        }
    }

    /// Loop the event belongs to, if any.
    pub fn loop_id(&self) -> Option<&str> {
        match self {
            LoopEvent::IterationCompleted { loop_id, .. }
            | LoopEvent::LoopCompleted { loop_id, .. }
            | LoopEvent::CriticalViolation { loop_id, .. } => Some(loop_id),
            LoopEvent::HumanEscalation { loop_id, .. } => loop_id.as_deref(),
            LoopEvent::CircuitBreakerOpened { .. } => None,
        }
    }
}

/// Broadcast bus for lifecycle events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LoopEvent>,
}

impl EventBus {
    /// Create a bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to events. Each subscriber gets its own receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<LoopEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. No subscribers is not an error.
    pub fn emit(&self, event: LoopEvent) {
        tracing::debug!(kind = event.kind(), loop_id = ?event.loop_id(), "Emitting event");
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
