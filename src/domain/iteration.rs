//! Per-iteration records.
//!
//! Iterations are append-only, indexed by loop id in the store, and retained
//! briefly after loop completion for analysis before eviction.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::feedback::FeedbackMessage;

/// Snapshot of one refinement iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Iteration {
    /// Iteration number (0 is the initial generate+validate pass)
    pub number: u32,
    /// When the iteration completed
    pub timestamp: DateTime<Utc>,
    /// Identifier of the generation snapshot
    pub generation_id: String,
    /// Identifier of the validation snapshot
    pub validation_id: String,
    /// Mean of per-node confidences after this iteration
    pub overall_confidence: f64,
    /// Per-node confidences after this iteration
    pub node_confidences: HashMap<String, f64>,
    /// Feedback produced during this iteration
    pub feedback: Vec<FeedbackMessage>,
    /// Change in overall confidence versus the previous iteration
    pub confidence_delta: f64,
    /// Wall-clock processing time in milliseconds
    pub processing_ms: u64,
}

impl Iteration {
    /// Create an iteration record.
    pub fn new(number: u32, generation_id: impl Into<String>, validation_id: impl Into<String>) -> Self {
        Self {
            number,
            timestamp: Utc::now(),
            generation_id: generation_id.into(),
            validation_id: validation_id.into(),
            overall_confidence: 0.0,
            node_confidences: HashMap::new(),
            feedback: Vec::new(),
            confidence_delta: 0.0,
            processing_ms: 0,
        }
    }

    /// Set the confidence snapshot.
    pub fn with_confidences(mut self, overall: f64, nodes: HashMap<String, f64>) -> Self {
        self.overall_confidence = overall;
        self.node_confidences = nodes;
        self
    }

    /// Set the delta against the previous iteration.
    pub fn with_delta(mut self, delta: f64) -> Self {
        self.confidence_delta = delta;
        self
    }

    /// Set the feedback produced this iteration.
    pub fn with_feedback(mut self, feedback: Vec<FeedbackMessage>) -> Self {
        self.feedback = feedback;
        self
    }

    /// Set the processing time.
    pub fn with_processing_ms(mut self, ms: u64) -> Self {
        self.processing_ms = ms;
        self
    }

    /// Check whether every node meets the given threshold.
    pub fn all_nodes_meet(&self, threshold: f64) -> bool {
        !self.node_confidences.is_empty() && self.node_confidences.values().all(|c| *c >= threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_iteration_new() {
        let iteration = Iteration::new(1, "gen-1", "val-1");
        assert_eq!(iteration.number, 1);
        assert_eq!(iteration.generation_id, "gen-1");
        assert_eq!(iteration.validation_id, "val-1");
        assert!(iteration.feedback.is_empty());
    }

    #[test]
    fn test_iteration_builders() {
        let iteration = Iteration::new(2, "gen-2", "val-2")
            .with_confidences(0.7, nodes(&[("a", 0.6), ("b", 0.8)]))
            .with_delta(0.1)
            .with_processing_ms(250);
        assert_eq!(iteration.overall_confidence, 0.7);
        assert_eq!(iteration.confidence_delta, 0.1);
        assert_eq!(iteration.processing_ms, 250);
        assert_eq!(iteration.node_confidences.len(), 2);
    }

    #[test]
    fn test_all_nodes_meet() {
        let iteration =
            Iteration::new(1, "g", "v").with_confidences(0.85, nodes(&[("a", 0.8), ("b", 0.9)]));
        assert!(iteration.all_nodes_meet(0.8));
        assert!(!iteration.all_nodes_meet(0.85));
    }

    #[test]
    fn test_all_nodes_meet_empty_is_false() {
        let iteration = Iteration::new(1, "g", "v");
        assert!(!iteration.all_nodes_meet(0.1));
    }
}
