//! External collaborator interfaces.
//!
//! The generator and validator are opaque request/response services; the core
//! only defines the seams it drives them through. The human review queue and
//! model registry are the remaining collaborators the control layer touches.

pub mod mock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Priority, Severity};
use crate::error::Result;

/// One addressable unit of generated content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentNode {
    /// Node identifier, stable across revisions
    pub id: String,
    /// Node body text
    pub body: String,
}

impl ContentNode {
    /// Create a node.
    pub fn new(id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
        }
    }
}

/// Generated content as a set of addressable nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedContent {
    /// Content identifier
    pub id: String,
    /// Content nodes
    pub nodes: Vec<ContentNode>,
}

impl GeneratedContent {
    /// Create content from nodes.
    pub fn new(id: impl Into<String>, nodes: Vec<ContentNode>) -> Self {
        Self { id: id.into(), nodes }
    }

    /// All node ids in order.
    pub fn node_ids(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.id.clone()).collect()
    }

    /// Replace the node with a matching id, or append if absent.
    pub fn merge_node(&mut self, node: ContentNode) {
        match self.nodes.iter_mut().find(|n| n.id == node.id) {
            Some(existing) => *existing = node,
            None => self.nodes.push(node),
        }
    }
}

/// Request sent to the generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Loop request id the generation belongs to
    pub request_id: String,
    /// Kind of content to generate
    pub content_type: String,
    /// Free-form generation context
    pub context: Value,
}

/// Generator-side metadata about a generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationMetadata {
    /// Generator's confidence in the content
    pub confidence: f64,
    /// Generator's reasoning summary
    pub reasoning: String,
}

/// Token accounting for a provider call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Response from the generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    /// Generation snapshot identifier
    pub id: String,
    /// The generated content
    pub content: GeneratedContent,
    /// Model that produced it
    pub model: String,
    /// Generator-side metadata
    pub metadata: GenerationMetadata,
    /// Token accounting
    pub usage: TokenUsage,
}

/// Validator's verdict on a piece of content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Approved,
    NeedsRevision,
    Rejected,
}

impl ValidationStatus {
    /// Get a human-readable name for the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Approved => "approved",
            ValidationStatus::NeedsRevision => "needs_revision",
            ValidationStatus::Rejected => "rejected",
        }
    }

    /// Whether the validator pushed back on the content.
    pub fn is_contested(&self) -> bool {
        !matches!(self, ValidationStatus::Approved)
    }
}

/// A single issue the validator raised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Issue category ("ethical", "bias", "quality", "compliance", "style")
    pub category: String,
    /// Severity of the issue
    pub severity: Severity,
    /// Human-readable message
    pub message: String,
}

impl ValidationIssue {
    /// Create an issue.
    pub fn new(category: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            severity,
            message: message.into(),
        }
    }
}

/// Score block produced by the validator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ValidationScores {
    pub ethical: f64,
    pub bias: f64,
    pub quality: f64,
    pub compliance: f64,
    pub accuracy: f64,
    pub clarity: f64,
    pub overall: f64,
}

impl ValidationScores {
    /// Uniform score block, useful for tests and defaults.
    pub fn uniform(score: f64) -> Self {
        Self {
            ethical: score,
            bias: score,
            quality: score,
            compliance: score,
            accuracy: score,
            clarity: score,
            overall: score,
        }
    }
}

/// Per-node validation verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeValidation {
    /// Node the verdict applies to
    pub node_id: String,
    /// Validator's confidence in the node
    pub confidence: f64,
    /// Issues raised against the node
    pub issues: Vec<ValidationIssue>,
    /// Suggested improvements for the node
    pub suggestions: Vec<String>,
}

/// Request sent to the validator.
///
/// `node_ids` restricts validation to the named nodes (incremental
/// re-validation after a revision step); `None` validates everything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRequest {
    /// Loop request id the validation belongs to
    pub request_id: String,
    /// Content under validation
    pub content: GeneratedContent,
    /// Subset of nodes to validate, if incremental
    pub node_ids: Option<Vec<String>>,
}

/// Response from the validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResponse {
    /// Validation snapshot identifier
    pub id: String,
    /// Overall verdict
    pub status: ValidationStatus,
    /// Content-level issues
    pub issues: Vec<ValidationIssue>,
    /// Score block
    pub scores: ValidationScores,
    /// Per-node verdicts
    pub nodes: Vec<NodeValidation>,
}

/// Content generator collaborator.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate initial content for a request.
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse>;

    /// Revise one node toward a target confidence given validator feedback.
    async fn revise_node(
        &self,
        node_id: &str,
        issues: &[String],
        suggestions: &[String],
        target_confidence: f64,
    ) -> Result<ContentNode>;

    /// Health probe used by admission control.
    async fn healthy(&self) -> bool {
        true
    }
}

/// Content validator collaborator.
#[async_trait]
pub trait Validator: Send + Sync {
    /// Validate content, optionally restricted to a node subset.
    async fn validate(&self, request: ValidationRequest) -> Result<ValidationResponse>;

    /// Health probe used by admission control.
    async fn healthy(&self) -> bool {
        true
    }
}

/// Ticket placed on the human review queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewTicket {
    /// Disagreement under review, if any
    pub disagreement_id: Option<String>,
    /// Loop under review, if any
    pub loop_id: Option<String>,
    /// Review priority
    pub priority: Priority,
    /// Why the item was escalated
    pub reason: String,
    /// When the ticket was created
    pub created_at: DateTime<Utc>,
}

impl ReviewTicket {
    /// Create a ticket for a disagreement.
    pub fn for_disagreement(disagreement_id: impl Into<String>, priority: Priority, reason: impl Into<String>) -> Self {
        Self {
            disagreement_id: Some(disagreement_id.into()),
            loop_id: None,
            priority,
            reason: reason.into(),
            created_at: Utc::now(),
        }
    }

    /// Create a ticket for a loop.
    pub fn for_loop(loop_id: impl Into<String>, priority: Priority, reason: impl Into<String>) -> Self {
        Self {
            disagreement_id: None,
            loop_id: Some(loop_id.into()),
            priority,
            reason: reason.into(),
            created_at: Utc::now(),
        }
    }
}

/// Queue routing escalated items to humans.
#[async_trait]
pub trait HumanReviewQueue: Send + Sync {
    /// Enqueue a ticket for human review.
    async fn enqueue(&self, ticket: ReviewTicket) -> Result<()>;
}

/// Lifecycle status of a registered model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Active,
    Retraining,
    Disabled,
}

/// A model registry entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRecord {
    /// Model name
    pub name: String,
    /// Current lifecycle status
    pub status: ModelStatus,
    /// Registry metadata
    pub metadata: Value,
}

/// Request to start a retraining job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrainingRequest {
    /// Model to retrain
    pub model: String,
    /// Which trigger fired
    pub reason: String,
}

/// A started retraining job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrainingJob {
    /// Job identifier
    pub id: String,
    /// Model under retraining
    pub model: String,
    /// When the job started
    pub started_at: DateTime<Utc>,
}

/// Model registry / retraining pipeline collaborator.
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    /// Look up a model by name.
    async fn get_model(&self, name: &str) -> Result<Option<ModelRecord>>;

    /// Update a model's lifecycle status.
    async fn update_status(&self, name: &str, status: ModelStatus, metadata: Value) -> Result<()>;

    /// Start a retraining job.
    async fn start_retraining(&self, request: RetrainingRequest) -> Result<RetrainingJob>;

    /// Check whether retraining resources are available.
    async fn check_resource_availability(&self) -> Result<bool>;
}
