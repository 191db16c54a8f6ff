//! Retraining triggers.
//!
//! Batch processing keeps running statistics over processed events; after each
//! batch the trigger rules decide whether the configured model needs
//! retraining.

use std::time::Instant;

use crate::config::LearningConfig;
use crate::domain::{LearningEvent, LearningEventType};

/// Why retraining was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrainReason {
    /// Disagreement events exceed the rate trigger
    DisagreementRate,
    /// Failure events exceed the accuracy-drop trigger
    AccuracyDrop,
    /// Mean feedback impact score fell below the trigger
    FeedbackScore,
    /// The periodic retraining interval elapsed
    Elapsed,
}

impl RetrainReason {
    /// Get a stable name for the reason.
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrainReason::DisagreementRate => "disagreement_rate",
            RetrainReason::AccuracyDrop => "accuracy_drop",
            RetrainReason::FeedbackScore => "feedback_score",
            RetrainReason::Elapsed => "elapsed_interval",
        }
    }
}

/// Running statistics over processed learning events.
#[derive(Debug, Clone, Default)]
pub struct LearningStats {
    /// Total events processed
    pub events_processed: u64,
    /// Disagreement events processed
    pub disagreement_events: u64,
    /// Failure events processed
    pub failure_events: u64,
    /// Success events processed
    pub success_events: u64,
    /// Sum of feedback impact scores
    pub feedback_score_sum: f64,
    /// Number of feedback events
    pub feedback_count: u64,
    /// When retraining was last triggered
    pub last_retraining: Option<Instant>,
}

impl LearningStats {
    /// Fold one processed event into the statistics.
    pub fn observe(&mut self, event: &LearningEvent) {
        self.events_processed += 1;
        match event.event_type {
            LearningEventType::Disagreement => self.disagreement_events += 1,
            LearningEventType::Failure => self.failure_events += 1,
            LearningEventType::Success => self.success_events += 1,
            LearningEventType::Feedback => {
                self.feedback_score_sum += event.impact.score;
                self.feedback_count += 1;
            }
            LearningEventType::Correction => {}
        }
    }

    /// Fraction of processed events that were disagreements.
    pub fn disagreement_rate(&self) -> f64 {
        if self.events_processed == 0 {
            return 0.0;
        }
        self.disagreement_events as f64 / self.events_processed as f64
    }

    /// Fraction of processed events that were failures.
    pub fn failure_rate(&self) -> f64 {
        if self.events_processed == 0 {
            return 0.0;
        }
        self.failure_events as f64 / self.events_processed as f64
    }

    /// Mean feedback impact score, if any feedback was seen.
    pub fn mean_feedback_score(&self) -> Option<f64> {
        if self.feedback_count == 0 {
            return None;
        }
        Some(self.feedback_score_sum / self.feedback_count as f64)
    }

    /// Mark retraining as having happened now.
    pub fn mark_retrained(&mut self) {
        self.last_retraining = Some(Instant::now());
    }
}

/// Evaluate the trigger rules against the current statistics. The first
/// matching rule wins; rules are ordered by how direct the evidence is.
pub fn evaluate_triggers(config: &LearningConfig, stats: &LearningStats) -> Option<RetrainReason> {
    if stats.events_processed == 0 {
        return None;
    }

    if stats.disagreement_rate() > config.disagreement_rate_trigger {
        return Some(RetrainReason::DisagreementRate);
    }
    if stats.failure_rate() > config.accuracy_drop_trigger {
        return Some(RetrainReason::AccuracyDrop);
    }
    if let Some(mean) = stats.mean_feedback_score() {
        if mean < config.feedback_score_trigger {
            return Some(RetrainReason::FeedbackScore);
        }
    }
    if let Some(last) = stats.last_retraining {
        if last.elapsed() >= config.retraining_interval {
            return Some(RetrainReason::Elapsed);
        }
    }
    None
}
