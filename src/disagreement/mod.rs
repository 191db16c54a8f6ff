//! Disagreement handling between generator and validator.
//!
//! Every contested validation becomes a structured `Disagreement`. The handler
//! classifies it, checks escalation rules first, and otherwise runs a
//! resolution strategy keyed by category and severity. Unresolvable
//! disagreements go to the human review queue. Every handled disagreement also
//! yields a learning event.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use crate::config::ResolutionConfig;
use crate::domain::{
    Disagreement, DisagreementCategory, Impact, LearningEvent, LearningEventType, Position,
    Priority, Resolution, ResolutionOutcome, Severity,
};
use crate::error::Result;
use crate::events::{EventBus, LoopEvent};
use crate::providers::{
    GenerationResponse, HumanReviewQueue, ReviewTicket, ValidationIssue, ValidationResponse,
};

/// A pluggable resolution strategy.
///
/// Returns `None` when the strategy cannot decide; the handler escalates.
pub trait ResolutionStrategy: Send + Sync {
    fn resolve(&self, disagreement: &Disagreement, config: &ResolutionConfig) -> Option<Resolution>;
}

/// Default strategy: let the confidence gap decide.
///
/// Validator ahead by more than the auto-resolve delta upholds the validator;
/// generator ahead by more than the delta upholds the generator; otherwise the
/// validator's suggestions are applied as a compromise.
#[derive(Debug, Default)]
pub struct ConfidenceDeltaStrategy;

impl ResolutionStrategy for ConfidenceDeltaStrategy {
    fn resolve(&self, disagreement: &Disagreement, config: &ResolutionConfig) -> Option<Resolution> {
        let delta = disagreement.validator.confidence - disagreement.generator.confidence;
        let resolution = if delta > config.auto_resolve_delta {
            Resolution::new(
                ResolutionOutcome::ValidatorUpheld,
                format!(
                    "validator confidence exceeds generator's by {:.2}, revision required",
                    delta
                ),
            )
        } else if delta < -config.auto_resolve_delta {
            Resolution::new(
                ResolutionOutcome::GeneratorUpheld,
                format!(
                    "generator confidence exceeds validator's by {:.2}, validator may be over-strict",
                    -delta
                ),
            )
        } else {
            Resolution::new(
                ResolutionOutcome::Compromise,
                "confidences comparable, applying validator suggestions",
            )
        };
        Some(resolution)
    }
}

/// Classifies, resolves, or escalates generator/validator disagreements.
pub struct DisagreementHandler {
    config: ResolutionConfig,
    strategies: HashMap<String, Arc<dyn ResolutionStrategy>>,
    default_strategy: Arc<dyn ResolutionStrategy>,
    review_queue: Arc<dyn HumanReviewQueue>,
    events: EventBus,
}

impl DisagreementHandler {
    /// Create a handler with the default confidence-delta strategy.
    pub fn new(
        config: ResolutionConfig,
        review_queue: Arc<dyn HumanReviewQueue>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            strategies: HashMap::new(),
            default_strategy: Arc::new(ConfidenceDeltaStrategy),
            review_queue,
            events,
        }
    }

    /// Register a strategy for a "{category}_{severity}" key, e.g.
    /// "quality_medium". Unkeyed combinations fall back to the default.
    pub fn with_strategy(
        mut self,
        category: DisagreementCategory,
        severity: Severity,
        strategy: Arc<dyn ResolutionStrategy>,
    ) -> Self {
        let key = strategy_key(category, severity);
        self.strategies.insert(key, strategy);
        self
    }

    /// Handle a contested validation.
    ///
    /// Builds the disagreement, escalates when the rules demand it, otherwise
    /// attempts automatic resolution. Returns the (possibly resolved or
    /// escalated) disagreement and the learning event it produced.
    pub async fn handle(
        &self,
        generation: &GenerationResponse,
        validation: &ValidationResponse,
    ) -> Result<(Disagreement, LearningEvent)> {
        let issues = collect_issues(validation);
        let (category, subcategory) = classify(&issues);
        let severity = severity_from_issues(&issues);

        let generator = Position::new(
            "content meets the request",
            generation.metadata.reasoning.clone(),
            generation.metadata.confidence,
        );
        let validator = Position::new(
            format!("content {}", validation.status.as_str()),
            summarize_issues(&issues),
            validation.scores.overall,
        );

        let mut disagreement = Disagreement::new(
            &generation.id,
            &validation.id,
            category,
            severity,
            generator,
            validator,
        )
        .with_subcategory(subcategory);

        tracing::debug!(
            disagreement_id = %disagreement.id,
            category = category.as_str(),
            severity = severity.as_str(),
            gap = disagreement.confidence_gap(),
            "Handling disagreement"
        );

        if let Some(reason) = self.escalation_reason(&disagreement) {
            self.escalate(&mut disagreement, &reason).await?;
        } else {
            let key = strategy_key(category, severity);
            let strategy = self.strategies.get(&key).unwrap_or(&self.default_strategy);
            match strategy.resolve(&disagreement, &self.config) {
                Some(resolution) => {
                    tracing::info!(
                        disagreement_id = %disagreement.id,
                        outcome = resolution.outcome.as_str(),
                        "Disagreement auto-resolved"
                    );
                    disagreement.resolve(resolution)?;
                }
                None => {
                    self.escalate(&mut disagreement, "no strategy could resolve")
                        .await?;
                }
            }
        }

        let event = learning_event_for(&disagreement);
        Ok((disagreement, event))
    }

    /// Escalation rules, checked before any automatic resolution:
    /// critical severity always escalates; high severity escalates for
    /// ethical disagreements; a confidence gap above the configured limit
    /// escalates regardless of category.
    fn escalation_reason(&self, disagreement: &Disagreement) -> Option<String> {
        if disagreement.severity == Severity::Critical {
            return Some("critical severity".to_string());
        }
        if disagreement.severity == Severity::High
            && disagreement.category == DisagreementCategory::Ethical
        {
            return Some("high-severity ethical disagreement".to_string());
        }
        if disagreement.confidence_gap() > self.config.escalation_gap {
            return Some(format!(
                "confidence gap {:.2} exceeds {:.2}",
                disagreement.confidence_gap(),
                self.config.escalation_gap
            ));
        }
        None
    }

    async fn escalate(&self, disagreement: &mut Disagreement, reason: &str) -> Result<()> {
        disagreement.escalate();
        tracing::warn!(
            disagreement_id = %disagreement.id,
            reason,
            "Disagreement escalated to human review"
        );
        let priority = match disagreement.severity {
            Severity::Critical => Priority::Critical,
            Severity::High => Priority::High,
            _ => Priority::Normal,
        };
        self.review_queue
            .enqueue(ReviewTicket::for_disagreement(
                &disagreement.id,
                priority,
                reason,
            ))
            .await?;
        self.events.emit(LoopEvent::HumanEscalation {
            loop_id: None,
            disagreement_id: Some(disagreement.id.clone()),
            reason: reason.to_string(),
        });
        Ok(())
    }
}

fn strategy_key(category: DisagreementCategory, severity: Severity) -> String {
    format!("{}_{}", category.as_str(), severity.as_str())
}

/// All issues from the validation, node-level and content-level.
fn collect_issues(validation: &ValidationResponse) -> Vec<ValidationIssue> {
    let mut issues = validation.issues.clone();
    for node in &validation.nodes {
        issues.extend(node.issues.iter().cloned());
    }
    issues
}

/// Classify by category priority, first match wins. Falls back to quality
/// when no issue category parses.
fn classify(issues: &[ValidationIssue]) -> (DisagreementCategory, String) {
    for candidate in DisagreementCategory::PRIORITY {
        if let Some(issue) = issues
            .iter()
            .find(|i| DisagreementCategory::from_issue_category(&i.category) == Some(candidate))
        {
            return (candidate, issue.category.clone());
        }
    }
    (DisagreementCategory::Quality, "unclassified".to_string())
}

/// Severity from issue counts: two or more critical issues is critical, one
/// is high, two or more high issues is medium, anything else low.
fn severity_from_issues(issues: &[ValidationIssue]) -> Severity {
    let critical = issues.iter().filter(|i| i.severity == Severity::Critical).count();
    let high = issues.iter().filter(|i| i.severity == Severity::High).count();
    if critical >= 2 {
        Severity::Critical
    } else if critical == 1 {
        Severity::High
    } else if high >= 2 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

fn summarize_issues(issues: &[ValidationIssue]) -> String {
    if issues.is_empty() {
        return "no specific issues raised".to_string();
    }
    issues
        .iter()
        .map(|i| i.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Learning event for a handled disagreement. Impact scales with severity and
/// category weight.
fn learning_event_for(disagreement: &Disagreement) -> LearningEvent {
    let score = disagreement.severity.weight() * disagreement.category.weight();
    LearningEvent::new(
        LearningEventType::Disagreement,
        &disagreement.id,
        "disagreement",
        Impact::new(score, disagreement.validator.confidence),
    )
    .with_input(json!({
        "category": disagreement.category.as_str(),
        "severity": disagreement.severity.as_str(),
        "generator_confidence": disagreement.generator.confidence,
        "validator_confidence": disagreement.validator.confidence,
    }))
    .with_output(json!({
        "status": disagreement.status,
        "outcome": disagreement.resolution.as_ref().map(|r| r.outcome.as_str()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DisagreementStatus;
    use crate::providers::mock::MemoryReviewQueue;
    use crate::providers::{
        ContentNode, GeneratedContent, GenerationMetadata, TokenUsage, ValidationScores,
        ValidationStatus,
    };

    fn generation(confidence: f64) -> GenerationResponse {
        GenerationResponse {
            id: "gen-1".to_string(),
            content: GeneratedContent::new("content-1", vec![ContentNode::new("node-1", "body")]),
            model: "generator-primary".to_string(),
            metadata: GenerationMetadata {
                confidence,
                reasoning: "matched the brief".to_string(),
            },
            usage: TokenUsage::default(),
        }
    }

    fn validation(overall: f64, issues: Vec<ValidationIssue>) -> ValidationResponse {
        ValidationResponse {
            id: "val-1".to_string(),
            status: ValidationStatus::NeedsRevision,
            issues,
            scores: ValidationScores::uniform(overall),
            nodes: Vec::new(),
        }
    }

    fn handler() -> (DisagreementHandler, Arc<MemoryReviewQueue>) {
        let queue = Arc::new(MemoryReviewQueue::default());
        let handler = DisagreementHandler::new(
            ResolutionConfig::default(),
            queue.clone(),
            EventBus::default(),
        );
        (handler, queue)
    }

    #[tokio::test]
    async fn test_validator_upheld_on_large_gap() {
        let (handler, queue) = handler();
        let issues = vec![ValidationIssue::new("quality", Severity::Low, "vague claim")];
        let (disagreement, event) = handler
            .handle(&generation(0.5), &validation(0.75, issues))
            .await
            .unwrap();

        assert_eq!(disagreement.status, DisagreementStatus::Resolved);
        let resolution = disagreement.resolution.unwrap();
        assert_eq!(resolution.outcome, ResolutionOutcome::ValidatorUpheld);
        assert!(queue.tickets().is_empty());
        assert_eq!(event.event_type, LearningEventType::Disagreement);
    }

    #[tokio::test]
    async fn test_generator_upheld_when_validator_over_strict() {
        let (handler, _) = handler();
        let issues = vec![ValidationIssue::new("style", Severity::Low, "tone preference")];
        let (disagreement, _) = handler
            .handle(&generation(0.9), &validation(0.6, issues))
            .await
            .unwrap();

        let resolution = disagreement.resolution.unwrap();
        assert_eq!(resolution.outcome, ResolutionOutcome::GeneratorUpheld);
        assert!(resolution.rationale.contains("over-strict"));
    }

    #[tokio::test]
    async fn test_compromise_on_small_gap() {
        let (handler, _) = handler();
        let issues = vec![ValidationIssue::new("quality", Severity::Low, "minor issue")];
        let (disagreement, _) = handler
            .handle(&generation(0.7), &validation(0.8, issues))
            .await
            .unwrap();

        let resolution = disagreement.resolution.unwrap();
        assert_eq!(resolution.outcome, ResolutionOutcome::Compromise);
    }

    #[tokio::test]
    async fn test_critical_severity_always_escalates() {
        let (handler, queue) = handler();
        let issues = vec![
            ValidationIssue::new("ethical", Severity::Critical, "harmful claim"),
            ValidationIssue::new("ethical", Severity::Critical, "privacy breach"),
        ];
        let (disagreement, _) = handler
            .handle(&generation(0.7), &validation(0.75, issues))
            .await
            .unwrap();

        assert_eq!(disagreement.status, DisagreementStatus::Escalated);
        assert_eq!(disagreement.severity, Severity::Critical);
        let tickets = queue.tickets();
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].priority, Priority::Critical);
    }

    #[tokio::test]
    async fn test_high_ethical_escalates() {
        let (handler, queue) = handler();
        // One critical issue maps to high severity; ethical category
        let issues = vec![ValidationIssue::new("ethical", Severity::Critical, "possible harm")];
        let (disagreement, _) = handler
            .handle(&generation(0.7), &validation(0.75, issues))
            .await
            .unwrap();

        assert_eq!(disagreement.category, DisagreementCategory::Ethical);
        assert_eq!(disagreement.severity, Severity::High);
        assert_eq!(disagreement.status, DisagreementStatus::Escalated);
        assert_eq!(queue.tickets().len(), 1);
    }

    #[tokio::test]
    async fn test_low_style_never_escalates() {
        let (handler, queue) = handler();
        let issues = vec![ValidationIssue::new("style", Severity::Low, "passive voice")];
        let (disagreement, _) = handler
            .handle(&generation(0.7), &validation(0.78, issues))
            .await
            .unwrap();

        assert_eq!(disagreement.category, DisagreementCategory::Style);
        assert_eq!(disagreement.severity, Severity::Low);
        assert_eq!(disagreement.status, DisagreementStatus::Resolved);
        assert!(queue.tickets().is_empty());
    }

    #[tokio::test]
    async fn test_wide_gap_escalates_any_category() {
        let (handler, queue) = handler();
        let issues = vec![ValidationIssue::new("quality", Severity::Low, "weak sourcing")];
        // Gap 0.55 exceeds the 0.5 escalation gap
        let (disagreement, _) = handler
            .handle(&generation(0.95), &validation(0.4, issues))
            .await
            .unwrap();

        assert_eq!(disagreement.status, DisagreementStatus::Escalated);
        assert_eq!(queue.tickets().len(), 1);
    }

    #[tokio::test]
    async fn test_classification_prefers_ethical_over_style() {
        let (handler, _) = handler();
        let issues = vec![
            ValidationIssue::new("style", Severity::Low, "tone"),
            ValidationIssue::new("ethics", Severity::Low, "borderline claim"),
        ];
        let (disagreement, _) = handler
            .handle(&generation(0.7), &validation(0.75, issues))
            .await
            .unwrap();

        assert_eq!(disagreement.category, DisagreementCategory::Ethical);
        assert_eq!(disagreement.subcategory, "ethics");
    }

    #[tokio::test]
    async fn test_node_level_issues_count_for_classification() {
        use crate::providers::NodeValidation;
        let (handler, _) = handler();
        let mut validation = validation(0.75, Vec::new());
        validation.nodes.push(NodeValidation {
            node_id: "node-1".to_string(),
            confidence: 0.5,
            issues: vec![ValidationIssue::new("bias", Severity::Low, "skewed framing")],
            suggestions: Vec::new(),
        });
        let (disagreement, _) = handler.handle(&generation(0.7), &validation).await.unwrap();
        assert_eq!(disagreement.category, DisagreementCategory::Bias);
    }

    #[tokio::test]
    async fn test_escalation_emits_event() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let handler = DisagreementHandler::new(
            ResolutionConfig::default(),
            Arc::new(MemoryReviewQueue::default()),
            bus,
        );
        let issues = vec![
            ValidationIssue::new("ethical", Severity::Critical, "harm"),
            ValidationIssue::new("ethical", Severity::Critical, "harm again"),
        ];
        handler
            .handle(&generation(0.7), &validation(0.75, issues))
            .await
            .unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind(), "human_escalation");
    }

    #[tokio::test]
    async fn test_learning_event_impact_scales_with_category() {
        let (handler, _) = handler();
        let issues = vec![ValidationIssue::new("style", Severity::Low, "tone")];
        let (_, event) = handler
            .handle(&generation(0.7), &validation(0.75, issues))
            .await
            .unwrap();
        // low severity (0.25) x style weight (0.4)
        assert!((event.impact.score - 0.1).abs() < 1e-9);
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_severity_from_issue_counts() {
        let critical2 = vec![
            ValidationIssue::new("quality", Severity::Critical, "a"),
            ValidationIssue::new("quality", Severity::Critical, "b"),
        ];
        assert_eq!(severity_from_issues(&critical2), Severity::Critical);

        let critical1 = vec![ValidationIssue::new("quality", Severity::Critical, "a")];
        assert_eq!(severity_from_issues(&critical1), Severity::High);

        let high2 = vec![
            ValidationIssue::new("quality", Severity::High, "a"),
            ValidationIssue::new("quality", Severity::High, "b"),
        ];
        assert_eq!(severity_from_issues(&high2), Severity::Medium);

        let low = vec![ValidationIssue::new("quality", Severity::Low, "a")];
        assert_eq!(severity_from_issues(&low), Severity::Low);
        assert_eq!(severity_from_issues(&[]), Severity::Low);
    }
}
