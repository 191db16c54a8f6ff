//! Feedback loop orchestration.
//!
//! `FeedbackLoopService` owns the generate-validate-revise cycle: it admits
//! requests through the quality controller, runs the initial pass, iterates
//! until the loop converges, diverges, or exhausts its budgets, and finishes
//! with result validation, learning events, and a `LoopCompleted` event.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::convergence::ConvergenceEvaluator;
use crate::disagreement::DisagreementHandler;
use crate::domain::{
    ConvergenceReason, FeedbackMessage, Impact, Iteration, IterationSummary, LearningEvent,
    LearningEventType, LoopRequest, LoopResult, LoopState, LoopStatus, QualityMetrics,
    ResultStatus,
};
use crate::error::{CrucibleError, Result};
use crate::events::{EventBus, LoopEvent};
use crate::id::generate_loop_id;
use crate::learning::ContinuousLearningEngine;
use crate::providers::{
    GeneratedContent, GenerationRequest, GenerationResponse, Generator, HumanReviewQueue,
    ModelRegistry, ValidationRequest, ValidationResponse, Validator,
};
use crate::quality::{DependencyHealth, QualityControlResult, QualityController};
use crate::store::LoopStore;

/// What `execute` produced: a rejection at admission, or a finished loop.
#[derive(Debug)]
pub enum ExecuteOutcome {
    /// Admission refused the request; no loop ran.
    Rejected(QualityControlResult),
    /// A loop ran to a terminal state.
    Finished(LoopResult),
}

impl ExecuteOutcome {
    /// The loop result, if a loop ran.
    pub fn result(&self) -> Option<&LoopResult> {
        match self {
            ExecuteOutcome::Finished(result) => Some(result),
            ExecuteOutcome::Rejected(_) => None,
        }
    }
}

/// Validator verdict folded into loop-local bookkeeping.
struct NodeFeedbackMeta {
    issues: Vec<String>,
    suggestions: Vec<String>,
}

/// Orchestrates refinement loops over a generator/validator pair.
pub struct FeedbackLoopService<G: Generator, V: Validator> {
    generator: Arc<G>,
    validator: Arc<V>,
    quality: Arc<QualityController>,
    disagreements: Arc<DisagreementHandler>,
    learning: Arc<ContinuousLearningEngine>,
    store: Arc<LoopStore>,
    convergence: ConvergenceEvaluator,
    config: EngineConfig,
    events: EventBus,
    maintenance: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl<G: Generator, V: Validator> FeedbackLoopService<G, V> {
    /// Wire up a service from its collaborators and configuration. All
    /// components share one event bus.
    pub fn new(
        generator: Arc<G>,
        validator: Arc<V>,
        config: EngineConfig,
        review_queue: Arc<dyn HumanReviewQueue>,
        registry: Arc<dyn ModelRegistry>,
    ) -> Self {
        let events = EventBus::default();
        let quality = Arc::new(QualityController::new(
            config.quality.clone(),
            config.service.clone(),
            config.breaker.clone(),
            config.convergence.clone(),
            events.clone(),
        ));
        let disagreements = Arc::new(DisagreementHandler::new(
            config.resolution.clone(),
            review_queue,
            events.clone(),
        ));
        let learning = Arc::new(ContinuousLearningEngine::new(
            config.learning.clone(),
            registry,
        ));
        let store = Arc::new(LoopStore::new(config.service.loop_retention));
        let convergence = ConvergenceEvaluator::new(config.convergence.clone());
        let (shutdown, _) = watch::channel(false);

        Self {
            generator,
            validator,
            quality,
            disagreements,
            learning,
            store,
            convergence,
            config,
            events,
            maintenance: Mutex::new(None),
            shutdown,
        }
    }

    /// The shared event bus.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// The quality controller.
    pub fn quality(&self) -> &QualityController {
        &self.quality
    }

    /// The continuous learning engine.
    pub fn learning(&self) -> &Arc<ContinuousLearningEngine> {
        &self.learning
    }

    /// State snapshot for a loop.
    pub fn loop_state(&self, loop_id: &str) -> Option<LoopState> {
        self.store.state(loop_id)
    }

    /// Iteration history for a loop.
    pub fn loop_iterations(&self, loop_id: &str) -> Option<Vec<Iteration>> {
        self.store.iterations(loop_id)
    }

    /// Number of loops currently running.
    pub fn active_loops(&self) -> usize {
        self.store.active_count()
    }

    /// Request cancellation of a running loop.
    pub fn cancel(&self, loop_id: &str) -> Result<()> {
        if self.store.cancel(loop_id) {
            Ok(())
        } else {
            Err(CrucibleError::LoopNotFound(loop_id.to_string()))
        }
    }

    /// Evict completed loops and stale audit entries.
    pub fn purge_expired(&self) -> usize {
        self.quality.purge_audit();
        self.store.purge_expired()
    }

    /// Start the background maintenance ticker (store and audit eviction).
    /// Idempotent.
    pub fn start_maintenance(&self) {
        let mut maintenance = match self.maintenance.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if maintenance.is_some() {
            return;
        }

        let store = Arc::clone(&self.store);
        let quality = Arc::clone(&self.quality);
        let mut shutdown = self.shutdown.subscribe();
        let interval = self.config.service.maintenance_interval;
        *maintenance = Some(tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let evicted = store.purge_expired();
                        let purged = quality.purge_audit();
                        if evicted > 0 || purged > 0 {
                            tracing::debug!(evicted, purged, "Maintenance pass");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        }));
        tracing::info!(interval_secs = interval.as_secs(), "Maintenance ticker started");
    }

    /// Stop the background maintenance ticker.
    pub async fn stop_maintenance(&self) {
        let _ = self.shutdown.send(true);
        let handle = {
            let mut maintenance = match self.maintenance.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            maintenance.take()
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Run a refinement loop for the request.
    ///
    /// Structural validation errors surface as `Err`; admission rejections
    /// come back as `ExecuteOutcome::Rejected` with the quality-control
    /// verdict attached. Everything past admission finishes as a `LoopResult`,
    /// including provider failures.
    pub async fn execute(&self, request: LoopRequest) -> Result<ExecuteOutcome> {
        request.validate()?;

        let health = DependencyHealth {
            generator: self.generator.healthy().await,
            validator: self.validator.healthy().await,
        };
        let admission = self
            .quality
            .validate_request(&request, health, self.store.active_count());
        if !admission.approved {
            return Ok(ExecuteOutcome::Rejected(admission));
        }

        let loop_id = generate_loop_id();
        let cancel = self.store.register(LoopState::new(&loop_id, &request.id));
        let started = Instant::now();
        tracing::info!(
            loop_id = %loop_id,
            request_id = %request.id,
            content_type = %request.content_type,
            threshold = request.confidence_threshold,
            "Starting refinement loop"
        );

        // Initial pass: generate then validate everything
        let generation = match self
            .generator
            .generate(GenerationRequest {
                request_id: request.id.clone(),
                content_type: request.content_type.clone(),
                context: request.context.clone(),
            })
            .await
        {
            Ok(generation) => generation,
            Err(err) => return Ok(ExecuteOutcome::Finished(self.fail(&loop_id, &request, err))),
        };

        let mut content = generation.content.clone();
        let initial_validation = match self
            .validator
            .validate(ValidationRequest {
                request_id: request.id.clone(),
                content: content.clone(),
                node_ids: None,
            })
            .await
        {
            Ok(validation) => validation,
            Err(err) => return Ok(ExecuteOutcome::Finished(self.fail(&loop_id, &request, err))),
        };

        let mut node_confidences: HashMap<String, f64> = HashMap::new();
        let mut node_meta: HashMap<String, NodeFeedbackMeta> = HashMap::new();
        absorb_validation(&initial_validation, &mut node_confidences, &mut node_meta);

        let overall = mean_confidence(&node_confidences);
        let initial = Iteration::new(0, &generation.id, &initial_validation.id)
            .with_confidences(overall, node_confidences.clone())
            .with_processing_ms(started.elapsed().as_millis() as u64);
        self.store.push_iteration(&loop_id, initial.clone());
        let mut iterations = vec![initial];

        let mut escalation = false;
        if initial_validation.status.is_contested() && request.options.learning_enabled {
            escalation |= self
                .record_disagreement(&generation, &initial_validation)
                .await;
        }

        let mut error_message: Option<String> = None;
        let mut provider_failed = false;
        let reason = loop {
            if cancel.load(Ordering::SeqCst) {
                break ConvergenceReason::Cancelled;
            }
            if started.elapsed() >= Duration::from_millis(request.timeout_ms) {
                break ConvergenceReason::Timeout;
            }
            if let Some(reason) = self
                .convergence
                .evaluate(request.confidence_threshold, &iterations)
            {
                break reason;
            }

            let number = iterations.last().map(|it| it.number).unwrap_or(0) + 1;
            if number > request.max_iterations {
                break ConvergenceReason::MaxIterationsReached;
            }

            let feedback = self.build_feedback(
                &node_confidences,
                &node_meta,
                request.confidence_threshold,
            );
            if feedback.is_empty() {
                break ConvergenceReason::NoActionableFeedback;
            }

            let iteration_started = Instant::now();
            let mut revision_error = None;
            for message in &feedback {
                match self
                    .generator
                    .revise_node(
                        &message.node_id,
                        &message.issues,
                        &message.suggestions,
                        message.target_confidence,
                    )
                    .await
                {
                    Ok(node) => content.merge_node(node),
                    Err(err) => {
                        revision_error = Some(err);
                        break;
                    }
                }
            }
            if let Some(err) = revision_error {
                self.quality.record_monitoring_failure();
                error_message = Some(err.to_string());
                provider_failed = true;
                break ConvergenceReason::ProviderError;
            }

            let revised_ids: Vec<String> = feedback.iter().map(|f| f.node_id.clone()).collect();
            let validation = match self
                .validator
                .validate(ValidationRequest {
                    request_id: request.id.clone(),
                    content: content.clone(),
                    node_ids: if request.options.incremental_validation {
                        Some(revised_ids)
                    } else {
                        None
                    },
                })
                .await
            {
                Ok(validation) => validation,
                Err(err) => {
                    self.quality.record_monitoring_failure();
                    error_message = Some(err.to_string());
                    provider_failed = true;
                    break ConvergenceReason::ProviderError;
                }
            };
            absorb_validation(&validation, &mut node_confidences, &mut node_meta);

            let overall = mean_confidence(&node_confidences);
            let delta = overall
                - iterations
                    .last()
                    .map(|it| it.overall_confidence)
                    .unwrap_or(overall);
            let iteration = Iteration::new(number, &generation.id, &validation.id)
                .with_confidences(overall, node_confidences.clone())
                .with_delta(delta)
                .with_feedback(feedback)
                .with_processing_ms(iteration_started.elapsed().as_millis() as u64);
            self.store.push_iteration(&loop_id, iteration.clone());
            iterations.push(iteration);

            self.events.emit(LoopEvent::IterationCompleted {
                loop_id: loop_id.clone(),
                iteration: number,
                overall_confidence: overall,
                confidence_delta: delta,
            });
            tracing::debug!(
                loop_id = %loop_id,
                iteration = number,
                overall_confidence = overall,
                confidence_delta = delta,
                "Iteration completed"
            );

            let monitor = self.quality.monitor_iteration(
                &loop_id,
                &request,
                &iterations,
                &validation.scores,
                started.elapsed(),
            );
            escalation |= monitor.escalation_required;
            if monitor
                .violations
                .iter()
                .any(|v| v.violation_type == crate::domain::ViolationType::Oscillation)
            {
                break ConvergenceReason::OscillationDetected;
            }
            if monitor.critical_count() > 0 {
                break ConvergenceReason::QualityControlAbort;
            }

            if validation.status.is_contested() && request.options.learning_enabled {
                escalation |= self.record_disagreement(&generation, &validation).await;
            }
        };

        if !provider_failed {
            self.quality.record_monitoring_success();
        }

        let result = self.finalize(
            &loop_id,
            &request,
            reason,
            Some(content),
            iterations,
            escalation,
            error_message,
        );
        Ok(ExecuteOutcome::Finished(result))
    }

    /// Feedback for every node below the threshold, worst first, capped at
    /// the per-iteration limit.
    fn build_feedback(
        &self,
        node_confidences: &HashMap<String, f64>,
        node_meta: &HashMap<String, NodeFeedbackMeta>,
        threshold: f64,
    ) -> Vec<FeedbackMessage> {
        let mut feedback: Vec<FeedbackMessage> = node_confidences
            .iter()
            .filter(|(_, confidence)| **confidence < threshold)
            .map(|(node_id, confidence)| {
                let mut message = FeedbackMessage::new(node_id.clone(), *confidence, threshold);
                if let Some(meta) = node_meta.get(node_id) {
                    message = message
                        .with_issues(meta.issues.clone())
                        .with_suggestions(meta.suggestions.clone());
                }
                message
            })
            .collect();

        feedback.sort_by(|a, b| {
            b.urgency.cmp(&a.urgency).then(
                a.current_confidence
                    .partial_cmp(&b.current_confidence)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
        });
        feedback.truncate(self.config.service.max_feedback_per_iteration);
        feedback
    }

    /// Record a disagreement and its learning event. Returns whether the
    /// disagreement was escalated.
    async fn record_disagreement(
        &self,
        generation: &GenerationResponse,
        validation: &ValidationResponse,
    ) -> bool {
        match self.disagreements.handle(generation, validation).await {
            Ok((disagreement, event)) => {
                let escalated =
                    disagreement.status == crate::domain::DisagreementStatus::Escalated;
                if let Err(err) = self.learning.record_event(event) {
                    tracing::warn!(error = %err, "Failed to record learning event");
                }
                escalated
            }
            Err(err) => {
                tracing::warn!(error = %err, "Disagreement handling failed");
                false
            }
        }
    }

    /// Terminal result for a loop that failed before its first iteration.
    fn fail(&self, loop_id: &str, request: &LoopRequest, err: CrucibleError) -> LoopResult {
        tracing::error!(loop_id, error = %err, "Loop failed before first iteration");
        self.quality.record_monitoring_failure();
        let result = LoopResult {
            loop_id: loop_id.to_string(),
            request_id: request.id.clone(),
            status: ResultStatus::Error,
            converged: false,
            convergence_reason: ConvergenceReason::ProviderError,
            content: None,
            metrics: QualityMetrics::default(),
            iterations: Vec::new(),
            escalation_required: false,
            error: Some(err.to_string()),
        };
        self.store
            .mark_completed(loop_id, LoopStatus::Error, None);
        self.events.emit(LoopEvent::LoopCompleted {
            loop_id: loop_id.to_string(),
            status: result.status,
            converged: false,
            reason: result.convergence_reason,
        });
        result
    }

    /// Assemble metrics and the final result, run result validation, record
    /// the outcome's learning event, and emit completion.
    #[allow(clippy::too_many_arguments)]
    fn finalize(
        &self,
        loop_id: &str,
        request: &LoopRequest,
        reason: ConvergenceReason,
        content: Option<GeneratedContent>,
        iterations: Vec<Iteration>,
        mut escalation: bool,
        error: Option<String>,
    ) -> LoopResult {
        let status = match reason {
            ConvergenceReason::Cancelled => ResultStatus::Cancelled,
            ConvergenceReason::Timeout => ResultStatus::Timeout,
            ConvergenceReason::ProviderError => ResultStatus::Error,
            _ => ResultStatus::Completed,
        };
        let converged = reason.is_converged();

        let initial_confidence = iterations.first().map(|it| it.overall_confidence).unwrap_or(0.0);
        let final_confidence = iterations.last().map(|it| it.overall_confidence).unwrap_or(0.0);
        let average_iteration_ms = if iterations.is_empty() {
            0.0
        } else {
            iterations.iter().map(|it| it.processing_ms as f64).sum::<f64>()
                / iterations.len() as f64
        };
        let metrics = QualityMetrics {
            initial_confidence,
            final_confidence,
            improvement: final_confidence - initial_confidence,
            average_iteration_ms,
            total_feedback_count: iterations.iter().map(|it| it.feedback.len()).sum(),
        };

        let summaries = iterations
            .iter()
            .map(|it| IterationSummary {
                number: it.number,
                overall_confidence: it.overall_confidence,
                confidence_delta: it.confidence_delta,
                feedback_count: it.feedback.len(),
                processing_ms: it.processing_ms,
            })
            .collect();

        let mut result = LoopResult {
            loop_id: loop_id.to_string(),
            request_id: request.id.clone(),
            status,
            converged,
            convergence_reason: reason,
            content,
            metrics,
            iterations: summaries,
            escalation_required: false,
            error,
        };

        let check = self.quality.validate_result(&result);
        escalation |= check.escalation_required;
        result.escalation_required = escalation && request.options.escalation_enabled;

        if request.options.learning_enabled {
            let (event_type, score) = if converged {
                (LearningEventType::Success, result.metrics.improvement.clamp(0.0, 1.0))
            } else {
                (LearningEventType::Failure, result.metrics.improvement.clamp(-1.0, 1.0))
            };
            let event = LearningEvent::new(event_type, loop_id, "loop", Impact::new(score, final_confidence))
                .with_output(json!({
                    "status": result.status,
                    "reason": reason.as_str(),
                    "iterations": result.iteration_count(),
                }));
            if let Err(err) = self.learning.record_event(event) {
                tracing::warn!(error = %err, "Failed to record loop outcome event");
            }
        }

        let store_status = match status {
            ResultStatus::Cancelled => LoopStatus::Cancelled,
            ResultStatus::Error => LoopStatus::Error,
            ResultStatus::Completed | ResultStatus::Timeout => LoopStatus::Completed,
        };
        self.store
            .mark_completed(loop_id, store_status, Some(final_confidence));

        self.events.emit(LoopEvent::LoopCompleted {
            loop_id: loop_id.to_string(),
            status,
            converged,
            reason,
        });
        tracing::info!(
            loop_id,
            status = status.as_str(),
            converged,
            reason = reason.as_str(),
            iterations = result.iteration_count(),
            final_confidence,
            "Loop completed"
        );
        result
    }
}

/// Fold a validation response into the per-node confidence and feedback maps.
/// Incremental validations only touch the nodes they cover.
fn absorb_validation(
    validation: &ValidationResponse,
    node_confidences: &mut HashMap<String, f64>,
    node_meta: &mut HashMap<String, NodeFeedbackMeta>,
) {
    for node in &validation.nodes {
        node_confidences.insert(node.node_id.clone(), node.confidence);
        node_meta.insert(
            node.node_id.clone(),
            NodeFeedbackMeta {
                issues: node.issues.iter().map(|i| i.message.clone()).collect(),
                suggestions: node.suggestions.clone(),
            },
        );
    }
}

fn mean_confidence(node_confidences: &HashMap<String, f64>) -> f64 {
    if node_confidences.is_empty() {
        return 0.0;
    }
    node_confidences.values().sum::<f64>() / node_confidences.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::{
        MemoryModelRegistry, MemoryReviewQueue, ScriptedGenerator, ScriptedValidator,
    };

    fn service(
        generator: ScriptedGenerator,
        validator: ScriptedValidator,
        config: EngineConfig,
    ) -> FeedbackLoopService<ScriptedGenerator, ScriptedValidator> {
        FeedbackLoopService::new(
            Arc::new(generator),
            Arc::new(validator),
            config,
            Arc::new(MemoryReviewQueue::default()),
            Arc::new(MemoryModelRegistry::with_models(&["generator-primary"])),
        )
    }

    #[tokio::test]
    async fn test_invalid_request_is_an_error() {
        let service = service(
            ScriptedGenerator::new(1),
            ScriptedValidator::new(vec![0.9]),
            EngineConfig::default(),
        );
        let request = LoopRequest::new("article", 0.0);
        assert!(service.execute(request).await.is_err());
    }

    #[tokio::test]
    async fn test_immediately_approved_content_converges_at_zero() {
        let service = service(
            ScriptedGenerator::new(2),
            ScriptedValidator::new(vec![0.9]),
            EngineConfig::default(),
        );
        let outcome = service.execute(LoopRequest::new("article", 0.8)).await.unwrap();
        let result = outcome.result().unwrap();

        assert!(result.converged);
        assert_eq!(result.convergence_reason, ConvergenceReason::ThresholdMet);
        assert_eq!(result.iteration_count(), 0);
        assert_eq!(result.status, ResultStatus::Completed);
    }

    #[tokio::test]
    async fn test_generation_failure_yields_error_result() {
        let generator = ScriptedGenerator::new(1);
        generator.fail_with("model unavailable");
        let service = service(
            generator,
            ScriptedValidator::new(vec![0.9]),
            EngineConfig::default(),
        );
        let outcome = service.execute(LoopRequest::new("article", 0.8)).await.unwrap();
        let result = outcome.result().unwrap();

        assert_eq!(result.status, ResultStatus::Error);
        assert_eq!(result.convergence_reason, ConvergenceReason::ProviderError);
        assert!(result.error.as_deref().unwrap().contains("model unavailable"));
        assert!(result.content.is_none());
    }

    #[tokio::test]
    async fn test_cancel_unknown_loop_errors() {
        let service = service(
            ScriptedGenerator::new(1),
            ScriptedValidator::new(vec![0.9]),
            EngineConfig::default(),
        );
        assert!(matches!(
            service.cancel("loop-nope"),
            Err(CrucibleError::LoopNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_feedback_worst_first_and_capped() {
        let config = EngineConfig {
            service: crate::config::ServiceConfig::default().with_max_feedback_per_iteration(2),
            ..Default::default()
        };
        let service = service(
            ScriptedGenerator::new(1),
            ScriptedValidator::new(vec![0.9]),
            config,
        );

        let mut confidences = HashMap::new();
        confidences.insert("a".to_string(), 0.7);
        confidences.insert("b".to_string(), 0.3);
        confidences.insert("c".to_string(), 0.5);
        let meta = HashMap::new();

        let feedback = service.build_feedback(&confidences, &meta, 0.8);
        assert_eq!(feedback.len(), 2);
        assert_eq!(feedback[0].node_id, "b");
        assert_eq!(feedback[1].node_id, "c");
    }

    #[tokio::test]
    async fn test_maintenance_ticker_evicts_completed_loops() {
        let config = EngineConfig {
            service: crate::config::ServiceConfig {
                loop_retention: Duration::from_millis(0),
                maintenance_interval: Duration::from_millis(10),
                ..Default::default()
            },
            ..Default::default()
        };
        let service = service(
            ScriptedGenerator::new(1),
            ScriptedValidator::new(vec![0.9]),
            config,
        );

        let outcome = service.execute(LoopRequest::new("article", 0.8)).await.unwrap();
        let loop_id = outcome.result().unwrap().loop_id.clone();
        assert!(service.loop_state(&loop_id).is_some());

        service.start_maintenance();
        tokio::time::sleep(Duration::from_millis(50)).await;
        service.stop_maintenance().await;

        assert!(service.loop_state(&loop_id).is_none());
    }

    #[tokio::test]
    async fn test_no_feedback_above_threshold() {
        let service = service(
            ScriptedGenerator::new(1),
            ScriptedValidator::new(vec![0.9]),
            EngineConfig::default(),
        );
        let mut confidences = HashMap::new();
        confidences.insert("a".to_string(), 0.9);
        assert!(service.build_feedback(&confidences, &HashMap::new(), 0.8).is_empty());
    }
}
