//! Scripted collaborators for tests.
//!
//! The scripted generator and validator let tests drive the loop through a
//! predetermined confidence trajectory without real providers behind them.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::domain::Severity;
use crate::error::{CrucibleError, Result};
use crate::id::now_ms;

use super::{
    ContentNode, GeneratedContent, GenerationMetadata, GenerationRequest, GenerationResponse,
    Generator, HumanReviewQueue, ModelRecord, ModelRegistry, ModelStatus, NodeValidation,
    RetrainingJob, RetrainingRequest, ReviewTicket, TokenUsage, ValidationIssue,
    ValidationRequest, ValidationResponse, ValidationScores, ValidationStatus, Validator,
};

/// Generator that produces a fixed node layout and mechanical revisions.
pub struct ScriptedGenerator {
    node_count: usize,
    confidence: f64,
    healthy: AtomicBool,
    fail_with: Mutex<Option<String>>,
    revisions: AtomicUsize,
}

impl ScriptedGenerator {
    /// Create a generator producing `node_count` nodes.
    pub fn new(node_count: usize) -> Self {
        Self {
            node_count,
            confidence: 0.7,
            healthy: AtomicBool::new(true),
            fail_with: Mutex::new(None),
            revisions: AtomicUsize::new(0),
        }
    }

    /// Set the generator's self-reported confidence.
    pub fn with_confidence(self, confidence: f64) -> Self {
        Self { confidence, ..self }
    }

    /// Make every call fail with the given message.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.fail_with.lock().unwrap() = Some(message.into());
    }

    /// Flip the health probe.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Number of node revisions performed.
    pub fn revision_count(&self) -> usize {
        self.revisions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse> {
        if let Some(message) = self.fail_with.lock().unwrap().clone() {
            return Err(CrucibleError::Generation(message));
        }

        let nodes = (1..=self.node_count)
            .map(|i| ContentNode::new(format!("node-{}", i), format!("draft body {}", i)))
            .collect();

        Ok(GenerationResponse {
            id: format!("gen-{}", now_ms()),
            content: GeneratedContent::new(format!("content-{}", request.request_id), nodes),
            model: "mock-generator".to_string(),
            metadata: GenerationMetadata {
                confidence: self.confidence,
                reasoning: "scripted draft".to_string(),
            },
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 200,
            },
        })
    }

    async fn revise_node(
        &self,
        node_id: &str,
        _issues: &[String],
        _suggestions: &[String],
        _target_confidence: f64,
    ) -> Result<ContentNode> {
        if let Some(message) = self.fail_with.lock().unwrap().clone() {
            return Err(CrucibleError::Generation(message));
        }

        let revision = self.revisions.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ContentNode::new(
            node_id,
            format!("revised body (pass {})", revision),
        ))
    }

    async fn healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

/// Validator that walks a scripted confidence trajectory.
///
/// Call `n` assigns `confidences[n]` (repeating the last entry once the script
/// runs out) to every node it is asked to validate.
pub struct ScriptedValidator {
    confidences: Vec<f64>,
    ethical_scores: Vec<f64>,
    approve_at: f64,
    issue_category: String,
    healthy: AtomicBool,
    fail_with: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl ScriptedValidator {
    /// Create a validator with a per-call confidence script.
    pub fn new(confidences: Vec<f64>) -> Self {
        Self {
            confidences,
            ethical_scores: vec![0.95],
            approve_at: 0.8,
            issue_category: "quality".to_string(),
            healthy: AtomicBool::new(true),
            fail_with: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Set a per-call ethical score script.
    pub fn with_ethical_scores(mut self, scores: Vec<f64>) -> Self {
        self.ethical_scores = scores;
        self
    }

    /// Set the confidence at which content is approved.
    pub fn with_approve_at(mut self, approve_at: f64) -> Self {
        self.approve_at = approve_at;
        self
    }

    /// Set the category attached to raised issues.
    pub fn with_issue_category(mut self, category: impl Into<String>) -> Self {
        self.issue_category = category.into();
        self
    }

    /// Make every call fail with the given message.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.fail_with.lock().unwrap() = Some(message.into());
    }

    /// Flip the health probe.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Number of validation calls made.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn scripted(values: &[f64], call: usize) -> f64 {
        values.get(call).or(values.last()).copied().unwrap_or(0.0)
    }
}

#[async_trait]
impl Validator for ScriptedValidator {
    async fn validate(&self, request: ValidationRequest) -> Result<ValidationResponse> {
        if let Some(message) = self.fail_with.lock().unwrap().clone() {
            return Err(CrucibleError::ValidationCall(message));
        }

        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let confidence = Self::scripted(&self.confidences, call);
        let ethical = Self::scripted(&self.ethical_scores, call);

        let target_ids: Vec<String> = match &request.node_ids {
            Some(ids) => ids.clone(),
            None => request.content.node_ids(),
        };

        let nodes: Vec<NodeValidation> = target_ids
            .iter()
            .map(|id| {
                let issues = if confidence < self.approve_at {
                    vec![ValidationIssue::new(
                        self.issue_category.clone(),
                        Severity::Medium,
                        format!("node {} below bar", id),
                    )]
                } else {
                    Vec::new()
                };
                NodeValidation {
                    node_id: id.clone(),
                    confidence,
                    issues,
                    suggestions: vec!["tighten wording".to_string()],
                }
            })
            .collect();

        let status = if confidence >= self.approve_at {
            ValidationStatus::Approved
        } else {
            ValidationStatus::NeedsRevision
        };

        let mut scores = ValidationScores::uniform(0.95);
        scores.overall = confidence;
        scores.ethical = ethical;

        let issues = if status.is_contested() {
            vec![ValidationIssue::new(
                self.issue_category.clone(),
                Severity::Medium,
                "content below confidence bar",
            )]
        } else {
            Vec::new()
        };

        Ok(ValidationResponse {
            id: format!("val-{}-{}", now_ms(), call),
            status,
            issues,
            scores,
            nodes,
        })
    }

    async fn healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

/// In-memory review queue capturing enqueued tickets.
#[derive(Default)]
pub struct MemoryReviewQueue {
    tickets: Mutex<Vec<ReviewTicket>>,
}

impl MemoryReviewQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of enqueued tickets.
    pub fn tickets(&self) -> Vec<ReviewTicket> {
        self.tickets.lock().unwrap().clone()
    }

    /// Number of enqueued tickets.
    pub fn len(&self) -> usize {
        self.tickets.lock().unwrap().len()
    }

    /// Check whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl HumanReviewQueue for MemoryReviewQueue {
    async fn enqueue(&self, ticket: ReviewTicket) -> Result<()> {
        self.tickets.lock().unwrap().push(ticket);
        Ok(())
    }
}

/// In-memory model registry with a resource availability switch.
pub struct MemoryModelRegistry {
    models: Mutex<Vec<ModelRecord>>,
    resources_available: AtomicBool,
    jobs_started: AtomicUsize,
}

impl MemoryModelRegistry {
    /// Create a registry pre-populated with active models.
    pub fn with_models(names: &[&str]) -> Self {
        let models = names
            .iter()
            .map(|name| ModelRecord {
                name: name.to_string(),
                status: ModelStatus::Active,
                metadata: Value::Null,
            })
            .collect();
        Self {
            models: Mutex::new(models),
            resources_available: AtomicBool::new(true),
            jobs_started: AtomicUsize::new(0),
        }
    }

    /// Flip the resource availability switch.
    pub fn set_resources_available(&self, available: bool) {
        self.resources_available.store(available, Ordering::SeqCst);
    }

    /// Number of retraining jobs started.
    pub fn jobs_started(&self) -> usize {
        self.jobs_started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelRegistry for MemoryModelRegistry {
    async fn get_model(&self, name: &str) -> Result<Option<ModelRecord>> {
        Ok(self
            .models
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.name == name)
            .cloned())
    }

    async fn update_status(&self, name: &str, status: ModelStatus, metadata: Value) -> Result<()> {
        let mut models = self.models.lock().unwrap();
        match models.iter_mut().find(|m| m.name == name) {
            Some(model) => {
                model.status = status;
                model.metadata = metadata;
                Ok(())
            }
            None => Err(CrucibleError::Learning(format!("unknown model: {}", name))),
        }
    }

    async fn start_retraining(&self, request: RetrainingRequest) -> Result<RetrainingJob> {
        self.jobs_started.fetch_add(1, Ordering::SeqCst);
        Ok(RetrainingJob {
            id: format!("job-{}", now_ms()),
            model: request.model,
            started_at: Utc::now(),
        })
    }

    async fn check_resource_availability(&self) -> Result<bool> {
        Ok(self.resources_available.load(Ordering::SeqCst))
    }
}
