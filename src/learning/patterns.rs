//! Pattern extraction from learning events.
//!
//! Batch processing turns each event into zero or more patterns; patterns are
//! aggregated into insights exposed to operators.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{LearningEvent, LearningEventType};
use crate::id::generate_insight_id;

/// A recurring behavior extracted from one learning event.
#[derive(Debug, Clone, Serialize)]
pub struct LearningPattern {
    /// Stable pattern name
    pub pattern_type: String,
    /// Human-readable description
    pub description: String,
    /// Confidence in the pattern
    pub confidence: f64,
}

/// Extract patterns from a single event.
pub fn extract_patterns(event: &LearningEvent) -> Vec<LearningPattern> {
    let mut patterns = Vec::new();

    match event.event_type {
        LearningEventType::Disagreement => {
            if let Some(category) = event.input.get("category").and_then(|v| v.as_str()) {
                patterns.push(LearningPattern {
                    pattern_type: format!("disagreement_{}", category),
                    description: format!("validator disagreement in the {} category", category),
                    confidence: event.impact.confidence,
                });
            }
            if event.impact.score >= 0.7 {
                patterns.push(LearningPattern {
                    pattern_type: "high_impact_disagreement".to_string(),
                    description: "high-impact disagreement, generator alignment suspect".to_string(),
                    confidence: event.impact.confidence,
                });
            }
        }
        LearningEventType::Failure => {
            patterns.push(LearningPattern {
                pattern_type: "loop_failure".to_string(),
                description: format!("loop {} failed to converge", event.source_id),
                confidence: event.impact.confidence,
            });
        }
        LearningEventType::Correction => {
            patterns.push(LearningPattern {
                pattern_type: "human_correction".to_string(),
                description: "human override of an automatic decision".to_string(),
                confidence: event.impact.confidence,
            });
        }
        LearningEventType::Feedback if event.impact.score < 0.0 => {
            patterns.push(LearningPattern {
                pattern_type: "negative_feedback".to_string(),
                description: "downstream feedback scored the output negatively".to_string(),
                confidence: event.impact.confidence,
            });
        }
        LearningEventType::Feedback | LearningEventType::Success => {}
    }

    patterns
}

/// An aggregated, operator-facing insight.
#[derive(Debug, Clone, Serialize)]
pub struct Insight {
    /// Insight identifier
    pub id: String,
    /// Short title
    pub title: String,
    /// Longer explanation
    pub detail: String,
    /// Confidence in the insight
    pub confidence: f64,
    /// Number of supporting patterns
    pub support: usize,
    /// When the insight was created
    pub created_at: DateTime<Utc>,
}

impl Insight {
    /// Build an insight from a group of same-typed patterns.
    pub fn from_patterns(pattern_type: &str, patterns: &[&LearningPattern]) -> Option<Self> {
        let first = patterns.first()?;
        let confidence =
            patterns.iter().map(|p| p.confidence).sum::<f64>() / patterns.len() as f64;
        Some(Self {
            id: generate_insight_id(),
            title: pattern_type.replace('_', " "),
            detail: first.description.clone(),
            confidence,
            support: patterns.len(),
            created_at: Utc::now(),
        })
    }
}
