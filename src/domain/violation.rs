//! Quality violations.
//!
//! A `QualityViolation` is a pure value record, never mutated after creation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::severity::Severity;

/// What kind of limit or concern a violation records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    /// Iteration count reached or exceeded its limit
    IterationLimit,
    /// Wall-clock budget exceeded
    TimeLimit,
    /// Confidence dropped between iterations
    QualityDegradation,
    /// Confidence swinging up and down instead of improving
    Oscillation,
    /// Confidence no longer improving
    Stagnation,
    /// Ethical score below the floor
    EthicalConcern,
    /// Bias score below the floor
    BiasConcern,
    /// Concurrent loop cap exceeded at admission
    ConcurrencyLimit,
    /// Circuit breaker is open
    CircuitBreakerOpen,
    /// A downstream collaborator failed its health probe
    UnhealthyDependency,
}

impl ViolationType {
    /// Get a human-readable name for the violation type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationType::IterationLimit => "iteration_limit",
            ViolationType::TimeLimit => "time_limit",
            ViolationType::QualityDegradation => "quality_degradation",
            ViolationType::Oscillation => "oscillation",
            ViolationType::Stagnation => "stagnation",
            ViolationType::EthicalConcern => "ethical_concern",
            ViolationType::BiasConcern => "bias_concern",
            ViolationType::ConcurrencyLimit => "concurrency_limit",
            ViolationType::CircuitBreakerOpen => "circuit_breaker_open",
            ViolationType::UnhealthyDependency => "unhealthy_dependency",
        }
    }
}

impl std::fmt::Display for ViolationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A detected quality violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityViolation {
    /// Kind of violation
    pub violation_type: ViolationType,
    /// Severity of the violation
    pub severity: Severity,
    /// Human-readable description
    pub description: String,
    /// Loop the violation belongs to
    pub loop_id: String,
    /// Iteration during which it was detected, if any
    pub iteration: Option<u32>,
    /// Additional structured context
    pub metadata: Value,
}

impl QualityViolation {
    /// Create a violation.
    pub fn new(
        violation_type: ViolationType,
        severity: Severity,
        loop_id: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            violation_type,
            severity,
            description: description.into(),
            loop_id: loop_id.into(),
            iteration: None,
            metadata: Value::Null,
        }
    }

    /// Set the iteration the violation was detected in.
    pub fn with_iteration(mut self, iteration: u32) -> Self {
        self.iteration = Some(iteration);
        self
    }

    /// Attach structured metadata.
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Check whether the violation is critical.
    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }
}
