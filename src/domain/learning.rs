//! Learning events fed into the continuous-learning pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CrucibleError, Result};
use crate::id::generate_learning_event_id;

/// Kind of outcome a learning event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LearningEventType {
    Disagreement,
    Feedback,
    Correction,
    Success,
    Failure,
}

impl LearningEventType {
    /// Get a human-readable name for the event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            LearningEventType::Disagreement => "disagreement",
            LearningEventType::Feedback => "feedback",
            LearningEventType::Correction => "correction",
            LearningEventType::Success => "success",
            LearningEventType::Failure => "failure",
        }
    }

    /// Queue priority boost for this event type.
    pub fn priority_boost(&self) -> i32 {
        match self {
            LearningEventType::Disagreement => 2,
            LearningEventType::Correction => 3,
            LearningEventType::Failure => 1,
            LearningEventType::Feedback | LearningEventType::Success => 0,
        }
    }
}

/// Measured impact of a learning event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Impact {
    /// Impact score in [-1, 1]; negative means harmful outcome
    pub score: f64,
    /// Confidence in the impact measurement
    pub confidence: f64,
    /// Models the event bears on
    pub affected_models: Vec<String>,
    /// Suggested follow-up actions
    pub suggested_actions: Vec<String>,
}

impl Impact {
    /// Create an impact record.
    pub fn new(score: f64, confidence: f64) -> Self {
        Self {
            score,
            confidence,
            affected_models: Vec::new(),
            suggested_actions: Vec::new(),
        }
    }

    /// Set the affected models.
    pub fn with_affected_models(mut self, models: Vec<String>) -> Self {
        self.affected_models = models;
        self
    }

    /// Set the suggested actions.
    pub fn with_suggested_actions(mut self, actions: Vec<String>) -> Self {
        self.suggested_actions = actions;
        self
    }
}

/// A record of an outcome fed into the learning pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningEvent {
    /// Event identifier
    pub id: String,
    /// Kind of outcome
    pub event_type: LearningEventType,
    /// Identifier of the source record (loop, disagreement, ...)
    pub source_id: String,
    /// Kind of source ("loop", "disagreement", ...)
    pub source_type: String,
    /// Structured input payload
    pub input: Value,
    /// Structured output payload
    pub output: Value,
    /// Structured feedback payload
    pub feedback: Value,
    /// Measured impact
    pub impact: Impact,
    /// When the event occurred; defaulted during enrichment if absent
    pub timestamp: Option<DateTime<Utc>>,
}

impl LearningEvent {
    /// Create a learning event.
    pub fn new(
        event_type: LearningEventType,
        source_id: impl Into<String>,
        source_type: impl Into<String>,
        impact: Impact,
    ) -> Self {
        Self {
            id: generate_learning_event_id(),
            event_type,
            source_id: source_id.into(),
            source_type: source_type.into(),
            input: Value::Null,
            output: Value::Null,
            feedback: Value::Null,
            impact,
            timestamp: None,
        }
    }

    /// Set the input payload.
    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    /// Set the output payload.
    pub fn with_output(mut self, output: Value) -> Self {
        self.output = output;
        self
    }

    /// Set the feedback payload.
    pub fn with_feedback(mut self, feedback: Value) -> Self {
        self.feedback = feedback;
        self
    }

    /// Check required fields and the impact score range.
    pub fn validate(&self) -> Result<()> {
        if self.source_id.is_empty() {
            return Err(CrucibleError::Learning("source_id must not be empty".to_string()));
        }
        if self.source_type.is_empty() {
            return Err(CrucibleError::Learning("source_type must not be empty".to_string()));
        }
        if !(-1.0..=1.0).contains(&self.impact.score) {
            return Err(CrucibleError::Learning(format!(
                "impact score {} outside [-1, 1]",
                self.impact.score
            )));
        }
        Ok(())
    }

    /// Queue priority: `round(score * 10)` plus the type boost.
    pub fn priority(&self) -> i32 {
        (self.impact.score * 10.0).round() as i32 + self.event_type.priority_boost()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_priority_boost() {
        assert_eq!(LearningEventType::Disagreement.priority_boost(), 2);
        assert_eq!(LearningEventType::Correction.priority_boost(), 3);
        assert_eq!(LearningEventType::Failure.priority_boost(), 1);
        assert_eq!(LearningEventType::Feedback.priority_boost(), 0);
        assert_eq!(LearningEventType::Success.priority_boost(), 0);
    }

    #[test]
    fn test_learning_event_new() {
        let event = LearningEvent::new(
            LearningEventType::Success,
            "loop-1",
            "loop",
            Impact::new(0.6, 0.9),
        );
        assert!(event.id.starts_with("lrn-"));
        assert!(event.timestamp.is_none());
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range_score() {
        let event = LearningEvent::new(
            LearningEventType::Failure,
            "loop-1",
            "loop",
            Impact::new(1.5, 0.9),
        );
        assert!(event.validate().is_err());

        let event = LearningEvent::new(
            LearningEventType::Failure,
            "loop-1",
            "loop",
            Impact::new(-1.01, 0.9),
        );
        assert!(event.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_boundary_scores() {
        for score in [-1.0, 0.0, 1.0] {
            let event = LearningEvent::new(
                LearningEventType::Feedback,
                "loop-1",
                "loop",
                Impact::new(score, 0.5),
            );
            assert!(event.validate().is_ok());
        }
    }

    #[test]
    fn test_validate_rejects_missing_source() {
        let event = LearningEvent::new(LearningEventType::Success, "", "loop", Impact::new(0.5, 0.5));
        assert!(event.validate().is_err());

        let event = LearningEvent::new(LearningEventType::Success, "loop-1", "", Impact::new(0.5, 0.5));
        assert!(event.validate().is_err());
    }

    #[test]
    fn test_priority_calculation() {
        // 0.6 * 10 = 6, disagreement boost +2
        let event = LearningEvent::new(
            LearningEventType::Disagreement,
            "dis-1",
            "disagreement",
            Impact::new(0.6, 0.9),
        );
        assert_eq!(event.priority(), 8);

        // -0.4 * 10 = -4, correction boost +3
        let event = LearningEvent::new(
            LearningEventType::Correction,
            "loop-1",
            "loop",
            Impact::new(-0.4, 0.9),
        );
        assert_eq!(event.priority(), -1);
    }

    #[test]
    fn test_impact_builders() {
        let impact = Impact::new(0.5, 0.8)
            .with_affected_models(vec!["generator-primary".to_string()])
            .with_suggested_actions(vec!["tighten style prompts".to_string()]);
        assert_eq!(impact.affected_models.len(), 1);
        assert_eq!(impact.suggested_actions.len(), 1);
    }

    #[test]
    fn test_serialization_roundtrip() {
        let event = LearningEvent::new(
            LearningEventType::Disagreement,
            "dis-1",
            "disagreement",
            Impact::new(0.9, 0.8),
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: LearningEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, event.id);
        assert_eq!(back.event_type, LearningEventType::Disagreement);
    }
}
