//! Continuous learning engine.
//!
//! Learning events arrive from loops and disagreements, queue by priority,
//! and are drained in background batches. Batches extract patterns, roll them
//! into insights, update running statistics, and evaluate retraining triggers
//! against the configured model.

pub mod patterns;
pub mod retraining;

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::LearningConfig;
use crate::domain::LearningEvent;
use crate::error::{CrucibleError, Result};
use crate::providers::{ModelRegistry, ModelStatus, RetrainingJob, RetrainingRequest};

pub use patterns::{extract_patterns, Insight, LearningPattern};
pub use retraining::{evaluate_triggers, LearningStats, RetrainReason};

/// A queued event ordered by priority (desc), then arrival order (asc).
struct QueuedEvent {
    priority: i32,
    seq: u64,
    event: LearningEvent,
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedEvent {}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, earlier arrival breaks ties
        self.priority
            .cmp(&other.priority)
            .then(other.seq.cmp(&self.seq))
    }
}

/// Priority-queued, batch-draining learning pipeline.
pub struct ContinuousLearningEngine {
    config: LearningConfig,
    registry: Arc<dyn ModelRegistry>,
    queue: Mutex<BinaryHeap<QueuedEvent>>,
    seq: AtomicU64,
    stats: Mutex<LearningStats>,
    insights: Mutex<Vec<Insight>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl ContinuousLearningEngine {
    /// Create an engine backed by the given model registry.
    pub fn new(config: LearningConfig, registry: Arc<dyn ModelRegistry>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            registry,
            queue: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
            stats: Mutex::new(LearningStats::default()),
            insights: Mutex::new(Vec::new()),
            ticker: Mutex::new(None),
            shutdown,
        }
    }

    /// Validate, enrich, and enqueue an event.
    pub fn record_event(&self, mut event: LearningEvent) -> Result<()> {
        event.validate()?;
        if event.timestamp.is_none() {
            event.timestamp = Some(Utc::now());
        }

        let priority = event.priority();
        let seq = self.seq.fetch_add(1, AtomicOrdering::SeqCst);
        tracing::debug!(
            event_id = %event.id,
            event_type = event.event_type.as_str(),
            priority,
            "Queued learning event"
        );
        self.lock_queue().push(QueuedEvent {
            priority,
            seq,
            event,
        });
        Ok(())
    }

    /// Number of events waiting in the queue.
    pub fn queued_events(&self) -> usize {
        self.lock_queue().len()
    }

    /// Drain and process up to one batch of events. Returns how many events
    /// were processed.
    pub async fn process_batch(&self) -> Result<usize> {
        let batch: Vec<LearningEvent> = {
            let mut queue = self.lock_queue();
            let take = queue.len().min(self.config.batch_size);
            (0..take).filter_map(|_| queue.pop()).map(|q| q.event).collect()
        };
        if batch.is_empty() {
            return Ok(0);
        }

        let processed = batch.len();
        tracing::debug!(events = processed, "Processing learning batch");

        // Extraction per event runs with bounded concurrency; one event's
        // patterns never block another's
        let extracted: Vec<(LearningEvent, Vec<LearningPattern>)> = stream::iter(batch)
            .map(|event| async move {
                let patterns = extract_patterns(&event);
                (event, patterns)
            })
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;

        let mut grouped: HashMap<String, Vec<LearningPattern>> = HashMap::new();
        {
            let mut stats = self.lock_stats();
            for (event, patterns) in &extracted {
                stats.observe(event);
                for pattern in patterns {
                    grouped
                        .entry(pattern.pattern_type.clone())
                        .or_default()
                        .push(pattern.clone());
                }
            }
        }

        if !grouped.is_empty() {
            let mut insights = self.lock_insights();
            for (pattern_type, group) in &grouped {
                let refs: Vec<&LearningPattern> = group.iter().collect();
                if let Some(insight) = Insight::from_patterns(pattern_type, &refs) {
                    insights.push(insight);
                }
            }
        }

        let trigger = {
            let stats = self.lock_stats();
            evaluate_triggers(&self.config, &stats)
        };
        if let Some(reason) = trigger {
            let model = self.config.model_name.clone();
            if let Err(err) = self.trigger_retraining(&model, reason).await {
                tracing::warn!(model = %model, error = %err, "Retraining trigger failed");
            }
        }

        Ok(processed)
    }

    /// Start retraining for a model. Errors when the model is unknown or
    /// already retraining; returns `None` when resources are unavailable.
    pub async fn trigger_retraining(
        &self,
        model: &str,
        reason: RetrainReason,
    ) -> Result<Option<RetrainingJob>> {
        let record = self
            .registry
            .get_model(model)
            .await?
            .ok_or_else(|| CrucibleError::Learning(format!("unknown model: {}", model)))?;

        if record.status == ModelStatus::Retraining {
            return Err(CrucibleError::Learning(format!(
                "model {} is already retraining",
                model
            )));
        }

        if !self.registry.check_resource_availability().await? {
            tracing::warn!(model, reason = reason.as_str(), "Retraining deferred, no resources");
            return Ok(None);
        }

        let job = self
            .registry
            .start_retraining(RetrainingRequest {
                model: model.to_string(),
                reason: reason.as_str().to_string(),
            })
            .await?;
        self.registry
            .update_status(
                model,
                ModelStatus::Retraining,
                json!({"job_id": job.id, "reason": reason.as_str()}),
            )
            .await?;
        self.lock_stats().mark_retrained();
        tracing::info!(model, job_id = %job.id, reason = reason.as_str(), "Retraining started");
        Ok(Some(job))
    }

    /// Snapshot of accumulated insights, newest last.
    pub fn get_insights(&self) -> Vec<Insight> {
        self.lock_insights().clone()
    }

    /// Snapshot of the running statistics.
    pub fn stats(&self) -> LearningStats {
        self.lock_stats().clone()
    }

    /// Start the background batch ticker. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut ticker = match self.ticker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if ticker.is_some() {
            return;
        }

        let engine = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        let interval = self.config.batch_interval;
        *ticker = Some(tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        if let Err(err) = engine.process_batch().await {
                            tracing::warn!(error = %err, "Learning batch failed");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        }));
        tracing::info!(interval_secs = interval.as_secs(), "Learning ticker started");
    }

    /// Stop the background ticker.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let handle = {
            let mut ticker = match self.ticker.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            ticker.take()
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, BinaryHeap<QueuedEvent>> {
        match self.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, LearningStats> {
        match self.stats.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_insights(&self) -> std::sync::MutexGuard<'_, Vec<Insight>> {
        match self.insights.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
