//! Engine configuration.
//!
//! Every tunable threshold in the refinement core lives here as a documented
//! default. The resolution deltas and severity cutoffs are deliberate carries
//! from the system this engine gates; they are exposed as configuration rather
//! than baked into the services.

use std::time::Duration;

/// Top-level configuration for the refinement engine.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Loop orchestration limits.
    pub service: ServiceConfig,
    /// Convergence and divergence detection thresholds.
    pub convergence: ConvergenceConfig,
    /// Quality controller policy.
    pub quality: QualityConfig,
    /// Circuit breaker policy.
    pub breaker: BreakerConfig,
    /// Disagreement resolution policy.
    pub resolution: ResolutionConfig,
    /// Continuous learning policy.
    pub learning: LearningConfig,
}

/// Limits applied to every feedback loop.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Global ceiling on iterations a request may ask for.
    pub max_iterations_ceiling: u32,
    /// Maximum loops allowed to run concurrently.
    pub max_concurrent_loops: usize,
    /// Maximum feedback messages produced per iteration.
    pub max_feedback_per_iteration: usize,
    /// How long completed loop records are retained before eviction.
    pub loop_retention: Duration,
    /// Interval between maintenance passes (store and audit eviction).
    pub maintenance_interval: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_iterations_ceiling: 20,
            max_concurrent_loops: 10,
            max_feedback_per_iteration: 5,
            loop_retention: Duration::from_secs(600),
            maintenance_interval: Duration::from_secs(60),
        }
    }
}

impl ServiceConfig {
    /// Set the concurrent loop cap.
    pub fn with_max_concurrent_loops(mut self, cap: usize) -> Self {
        self.max_concurrent_loops = cap;
        self
    }

    /// Set the per-iteration feedback cap.
    pub fn with_max_feedback_per_iteration(mut self, cap: usize) -> Self {
        self.max_feedback_per_iteration = cap;
        self
    }

    /// Set the maintenance pass interval.
    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }
}

/// Thresholds for convergence and divergence detection.
#[derive(Debug, Clone)]
pub struct ConvergenceConfig {
    /// Minimum confidence improvement per iteration; below this the loop is
    /// judged to have stopped making progress.
    pub min_improvement: f64,
    /// Staleness threshold for the diminishing-returns check.
    pub staleness_threshold: f64,
    /// Sliding window size for oscillation detection.
    pub oscillation_window: usize,
    /// Fraction of delta direction reversals that flags oscillation.
    pub oscillation_reversal_rate: f64,
    /// Minimum max-min confidence amplitude for oscillation.
    pub oscillation_amplitude: f64,
    /// Confidence drop between two iterations that flags degradation.
    pub degradation_threshold: f64,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            min_improvement: 0.01,
            staleness_threshold: 0.005,
            oscillation_window: 6,
            oscillation_reversal_rate: 0.6,
            oscillation_amplitude: 0.1,
            degradation_threshold: 0.1,
        }
    }
}

impl ConvergenceConfig {
    /// Set the minimum per-iteration improvement.
    pub fn with_min_improvement(mut self, min: f64) -> Self {
        self.min_improvement = min;
        self
    }

    /// Set the oscillation window size.
    pub fn with_oscillation_window(mut self, window: usize) -> Self {
        self.oscillation_window = window;
        self
    }
}

/// Quality controller policy.
#[derive(Debug, Clone)]
pub struct QualityConfig {
    /// Ethical score floor; below it a critical violation is raised.
    pub ethical_floor: f64,
    /// Bias score floor; below it a high-severity violation is raised.
    pub bias_floor: f64,
    /// Quality score below which escalation is forced.
    pub escalation_score_floor: f64,
    /// Critical violation count that forces escalation.
    pub critical_violation_threshold: usize,
    /// Ethical concern count that forces escalation.
    pub ethical_concern_threshold: usize,
    /// Fraction of measured confidence improvement credited back into the
    /// quality score.
    pub improvement_credit: f64,
    /// How long audit entries are retained before the periodic purge.
    pub audit_retention: Duration,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            ethical_floor: 0.8,
            bias_floor: 0.8,
            escalation_score_floor: 0.5,
            critical_violation_threshold: 1,
            ethical_concern_threshold: 1,
            improvement_credit: 0.5,
            audit_retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl QualityConfig {
    /// Set the ethical score floor.
    pub fn with_ethical_floor(mut self, floor: f64) -> Self {
        self.ethical_floor = floor;
        self
    }

    /// Set the audit retention period.
    pub fn with_audit_retention(mut self, retention: Duration) -> Self {
        self.audit_retention = retention;
        self
    }
}

/// Circuit breaker policy.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive monitoring failures that open the breaker.
    pub failure_threshold: u32,
    /// Cooldown window during which all admissions are rejected.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(300),
        }
    }
}

impl BreakerConfig {
    /// Set the failure threshold.
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the cooldown window.
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

/// Disagreement resolution policy.
#[derive(Debug, Clone)]
pub struct ResolutionConfig {
    /// Confidence gap at which one party's position wins outright.
    pub auto_resolve_delta: f64,
    /// Confidence gap between positions that forces escalation.
    pub escalation_gap: f64,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            auto_resolve_delta: 0.2,
            escalation_gap: 0.5,
        }
    }
}

impl ResolutionConfig {
    /// Set the automatic resolution delta.
    pub fn with_auto_resolve_delta(mut self, delta: f64) -> Self {
        self.auto_resolve_delta = delta;
        self
    }

    /// Set the escalation gap.
    pub fn with_escalation_gap(mut self, gap: f64) -> Self {
        self.escalation_gap = gap;
        self
    }
}

/// Continuous learning policy.
#[derive(Debug, Clone)]
pub struct LearningConfig {
    /// Interval between background batch drains.
    pub batch_interval: Duration,
    /// Maximum events drained per batch.
    pub batch_size: usize,
    /// Bounded concurrency for batch processing.
    pub concurrency: usize,
    /// Model name retraining triggers apply to.
    pub model_name: String,
    /// Disagreement-event rate that triggers retraining.
    pub disagreement_rate_trigger: f64,
    /// Failure-event rate that triggers retraining (accuracy drop proxy).
    pub accuracy_drop_trigger: f64,
    /// Mean feedback impact score below which retraining triggers.
    pub feedback_score_trigger: f64,
    /// Elapsed time since last retraining that triggers retraining.
    pub retraining_interval: Duration,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            batch_interval: Duration::from_secs(30),
            batch_size: 50,
            concurrency: 5,
            model_name: "generator-primary".to_string(),
            disagreement_rate_trigger: 0.3,
            accuracy_drop_trigger: 0.25,
            feedback_score_trigger: -0.2,
            retraining_interval: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

impl LearningConfig {
    /// Set the batch drain interval.
    pub fn with_batch_interval(mut self, interval: Duration) -> Self {
        self.batch_interval = interval;
        self
    }

    /// Set the batch concurrency bound.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the model retraining triggers apply to.
    pub fn with_model_name(mut self, name: impl Into<String>) -> Self {
        self.model_name = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_config_default() {
        let config = ServiceConfig::default();
        assert_eq!(config.max_iterations_ceiling, 20);
        assert_eq!(config.max_concurrent_loops, 10);
        assert_eq!(config.max_feedback_per_iteration, 5);
    }

    #[test]
    fn test_convergence_config_default() {
        let config = ConvergenceConfig::default();
        assert_eq!(config.oscillation_window, 6);
        assert_eq!(config.oscillation_reversal_rate, 0.6);
        assert_eq!(config.oscillation_amplitude, 0.1);
        assert_eq!(config.degradation_threshold, 0.1);
    }

    #[test]
    fn test_quality_config_default() {
        let config = QualityConfig::default();
        assert_eq!(config.ethical_floor, 0.8);
        assert_eq!(config.bias_floor, 0.8);
        assert_eq!(config.escalation_score_floor, 0.5);
        assert_eq!(config.critical_violation_threshold, 1);
    }

    #[test]
    fn test_breaker_config_default() {
        let config = BreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.cooldown, Duration::from_secs(300));
    }

    #[test]
    fn test_resolution_config_default() {
        let config = ResolutionConfig::default();
        assert_eq!(config.auto_resolve_delta, 0.2);
        assert_eq!(config.escalation_gap, 0.5);
    }

    #[test]
    fn test_builder_setters() {
        let config = EngineConfig {
            service: ServiceConfig::default().with_max_concurrent_loops(2),
            breaker: BreakerConfig::default()
                .with_failure_threshold(3)
                .with_cooldown(Duration::from_secs(10)),
            resolution: ResolutionConfig::default().with_auto_resolve_delta(0.3),
            ..Default::default()
        };
        assert_eq!(config.service.max_concurrent_loops, 2);
        assert_eq!(config.breaker.failure_threshold, 3);
        assert_eq!(config.resolution.auto_resolve_delta, 0.3);
    }

    #[test]
    fn test_learning_config_default() {
        let config = LearningConfig::default();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.model_name, "generator-primary");
    }
}
