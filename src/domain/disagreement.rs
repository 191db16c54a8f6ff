//! Structured conflicts between generator and validator positions.
//!
//! A disagreement is created on every validator rejection or modification. It
//! is terminal once resolved or dismissed; resolving twice is an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CrucibleError, Result};
use crate::id::generate_disagreement_id;

use super::severity::Severity;

/// Category of a disagreement, classified from validator issue categories.
///
/// Classification priority is ethical > bias > quality > compliance > style,
/// first match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisagreementCategory {
    Ethical,
    Bias,
    Quality,
    Compliance,
    Style,
}

impl DisagreementCategory {
    /// Classification order, highest priority first.
    pub const PRIORITY: [DisagreementCategory; 5] = [
        DisagreementCategory::Ethical,
        DisagreementCategory::Bias,
        DisagreementCategory::Quality,
        DisagreementCategory::Compliance,
        DisagreementCategory::Style,
    ];

    /// Get a human-readable name for the category.
    pub fn as_str(&self) -> &'static str {
        match self {
            DisagreementCategory::Ethical => "ethical",
            DisagreementCategory::Bias => "bias",
            DisagreementCategory::Quality => "quality",
            DisagreementCategory::Compliance => "compliance",
            DisagreementCategory::Style => "style",
        }
    }

    /// Parse a validator issue category string.
    pub fn from_issue_category(category: &str) -> Option<Self> {
        match category.to_ascii_lowercase().as_str() {
            "ethical" | "ethics" => Some(DisagreementCategory::Ethical),
            "bias" => Some(DisagreementCategory::Bias),
            "quality" | "accuracy" | "clarity" => Some(DisagreementCategory::Quality),
            "compliance" => Some(DisagreementCategory::Compliance),
            "style" => Some(DisagreementCategory::Style),
            _ => None,
        }
    }

    /// Weight used when scoring learning impact (ethics highest).
    pub fn weight(&self) -> f64 {
        match self {
            DisagreementCategory::Ethical => 1.0,
            DisagreementCategory::Bias => 0.9,
            DisagreementCategory::Quality => 0.7,
            DisagreementCategory::Compliance => 0.6,
            DisagreementCategory::Style => 0.4,
        }
    }
}

/// One party's stance in a disagreement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// What the party asserts
    pub stance: String,
    /// Why the party asserts it
    pub reasoning: String,
    /// How confident the party is, in [0, 1]
    pub confidence: f64,
}

impl Position {
    /// Create a position.
    pub fn new(stance: impl Into<String>, reasoning: impl Into<String>, confidence: f64) -> Self {
        Self {
            stance: stance.into(),
            reasoning: reasoning.into(),
            confidence,
        }
    }
}

/// Lifecycle status of a disagreement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisagreementStatus {
    Open,
    Resolved,
    Escalated,
    Dismissed,
}

impl DisagreementStatus {
    /// Check whether the status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DisagreementStatus::Resolved | DisagreementStatus::Dismissed)
    }
}

/// Which way an automatic resolution went.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionOutcome {
    /// Validator's position won; content must be revised
    ValidatorUpheld,
    /// Generator's content approved; validator may be over-strict
    GeneratorUpheld,
    /// Validator's suggestions applied as a compromise
    Compromise,
}

impl ResolutionOutcome {
    /// Get a human-readable name for the outcome.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionOutcome::ValidatorUpheld => "validator_upheld",
            ResolutionOutcome::GeneratorUpheld => "generator_upheld",
            ResolutionOutcome::Compromise => "compromise",
        }
    }
}

/// Terminal resolution of a disagreement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    /// Which way the resolution went
    pub outcome: ResolutionOutcome,
    /// Why the strategy chose this outcome
    pub rationale: String,
    /// When the resolution was applied
    pub resolved_at: DateTime<Utc>,
}

impl Resolution {
    /// Create a resolution.
    pub fn new(outcome: ResolutionOutcome, rationale: impl Into<String>) -> Self {
        Self {
            outcome,
            rationale: rationale.into(),
            resolved_at: Utc::now(),
        }
    }
}

/// A structured conflict between generator and validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Disagreement {
    /// Disagreement identifier
    pub id: String,
    /// Generation snapshot involved
    pub generation_id: String,
    /// Validation snapshot involved
    pub validation_id: String,
    /// Classified category
    pub category: DisagreementCategory,
    /// Raw issue category the classification came from
    pub subcategory: String,
    /// Severity from critical/high issue counts
    pub severity: Severity,
    /// Generator's position
    pub generator: Position,
    /// Validator's position
    pub validator: Position,
    /// Lifecycle status
    pub status: DisagreementStatus,
    /// Applied resolution, if any
    pub resolution: Option<Resolution>,
    /// When the disagreement was created
    pub created_at: DateTime<Utc>,
}

impl Disagreement {
    /// Create an open disagreement.
    pub fn new(
        generation_id: impl Into<String>,
        validation_id: impl Into<String>,
        category: DisagreementCategory,
        severity: Severity,
        generator: Position,
        validator: Position,
    ) -> Self {
        Self {
            id: generate_disagreement_id(),
            generation_id: generation_id.into(),
            validation_id: validation_id.into(),
            category,
            subcategory: category.as_str().to_string(),
            severity,
            generator,
            validator,
            status: DisagreementStatus::Open,
            resolution: None,
            created_at: Utc::now(),
        }
    }

    /// Set the raw subcategory string.
    pub fn with_subcategory(mut self, subcategory: impl Into<String>) -> Self {
        self.subcategory = subcategory.into();
        self
    }

    /// Absolute gap between the two positions' confidences.
    pub fn confidence_gap(&self) -> f64 {
        (self.validator.confidence - self.generator.confidence).abs()
    }

    /// Apply a resolution. Errors if the disagreement is already terminal.
    pub fn resolve(&mut self, resolution: Resolution) -> Result<()> {
        if self.status.is_terminal() {
            return Err(CrucibleError::Disagreement(format!(
                "disagreement {} is already {}, cannot re-resolve",
                self.id,
                match self.status {
                    DisagreementStatus::Resolved => "resolved",
                    DisagreementStatus::Dismissed => "dismissed",
                    _ => "terminal",
                }
            )));
        }
        self.resolution = Some(resolution);
        self.status = DisagreementStatus::Resolved;
        Ok(())
    }

    /// Mark the disagreement escalated to human review.
    pub fn escalate(&mut self) {
        if !self.status.is_terminal() {
            self.status = DisagreementStatus::Escalated;
        }
    }

    /// Dismiss the disagreement without resolution.
    pub fn dismiss(&mut self) {
        if !self.status.is_terminal() {
            self.status = DisagreementStatus::Dismissed;
        }
    }
}
