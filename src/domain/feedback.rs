//! Targeted feedback for low-confidence nodes.
//!
//! Each iteration produces one `FeedbackMessage` per node whose confidence sits
//! below the request threshold. The revision step consumes them worst-first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Urgency of a feedback message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl Urgency {
    /// Derive urgency from the gap between current and target confidence.
    pub fn for_gap(gap: f64) -> Self {
        if gap > 0.4 {
            Urgency::Critical
        } else if gap > 0.25 {
            Urgency::High
        } else if gap > 0.1 {
            Urgency::Medium
        } else {
            Urgency::Low
        }
    }

    /// Get a human-readable name for the urgency.
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Low => "low",
            Urgency::Medium => "medium",
            Urgency::High => "high",
            Urgency::Critical => "critical",
        }
    }
}

/// Feedback produced for one low-confidence node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackMessage {
    /// Node the feedback targets
    pub node_id: String,
    /// Confidence the node currently has
    pub current_confidence: f64,
    /// Confidence the node must reach
    pub target_confidence: f64,
    /// Issues the validator raised against the node
    pub issues: Vec<String>,
    /// Suggested improvements from the validator
    pub suggestions: Vec<String>,
    /// Urgency derived from the confidence gap
    pub urgency: Urgency,
    /// When the feedback was produced
    pub timestamp: DateTime<Utc>,
}

impl FeedbackMessage {
    /// Create feedback for a node, deriving urgency from the gap.
    pub fn new(node_id: impl Into<String>, current: f64, target: f64) -> Self {
        Self {
            node_id: node_id.into(),
            current_confidence: current,
            target_confidence: target,
            issues: Vec::new(),
            suggestions: Vec::new(),
            urgency: Urgency::for_gap(target - current),
            timestamp: Utc::now(),
        }
    }

    /// Attach validator issues.
    pub fn with_issues(mut self, issues: Vec<String>) -> Self {
        self.issues = issues;
        self
    }

    /// Attach suggested improvements.
    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }

    /// Gap between target and current confidence.
    pub fn gap(&self) -> f64 {
        self.target_confidence - self.current_confidence
    }
}
