//! Convergence and divergence detection.
//!
//! Pure functions over the iteration history. Convergence is judged in three
//! tiers, evaluated in order with the first true tier deciding; the divergence
//! detectors (oscillation, stagnation, degradation) feed the quality
//! controller and the loop's abort checks.

use crate::config::ConvergenceConfig;
use crate::domain::{ConvergenceReason, Iteration};

/// Per-iteration convergence and divergence judgments.
#[derive(Debug, Clone, Default)]
pub struct ConvergenceEvaluator {
    config: ConvergenceConfig,
}

impl ConvergenceEvaluator {
    /// Create an evaluator with the given thresholds.
    pub fn new(config: ConvergenceConfig) -> Self {
        Self { config }
    }

    /// Judge whether the loop has converged.
    ///
    /// Tiers, first true decides:
    /// 1. Threshold met: every node's confidence >= the request threshold.
    /// 2. Minimal improvement: improvement over the last two iterations below
    ///    the minimum rate.
    /// 3. Diminishing returns: the two most recent improvement deltas both
    ///    below the staleness threshold.
    pub fn evaluate(&self, threshold: f64, iterations: &[Iteration]) -> Option<ConvergenceReason> {
        let last = iterations.last()?;

        if last.all_nodes_meet(threshold) {
            return Some(ConvergenceReason::ThresholdMet);
        }

        if iterations.len() >= 2 {
            let prev = &iterations[iterations.len() - 2];
            let improvement = last.overall_confidence - prev.overall_confidence;
            if improvement < self.config.min_improvement {
                return Some(ConvergenceReason::MinimalImprovement);
            }
        }

        if iterations.len() >= 3 {
            let deltas = [
                iterations[iterations.len() - 2].confidence_delta,
                last.confidence_delta,
            ];
            if deltas.iter().all(|d| *d < self.config.staleness_threshold) {
                return Some(ConvergenceReason::DiminishingReturns);
            }
        }

        None
    }

    /// Detect oscillation over the sliding confidence window.
    ///
    /// Flags when the direction-reversal rate between consecutive deltas
    /// exceeds the configured rate AND the window's max-min amplitude exceeds
    /// the configured amplitude.
    pub fn oscillating(&self, iterations: &[Iteration]) -> bool {
        let window = self.config.oscillation_window;
        if iterations.len() < window {
            return false;
        }

        let confidences: Vec<f64> = iterations[iterations.len() - window..]
            .iter()
            .map(|it| it.overall_confidence)
            .collect();

        let deltas: Vec<f64> = confidences.windows(2).map(|w| w[1] - w[0]).collect();
        if deltas.len() < 2 {
            return false;
        }

        let reversals = deltas
            .windows(2)
            .filter(|pair| pair[0] * pair[1] < 0.0)
            .count();
        let reversal_rate = reversals as f64 / (deltas.len() - 1) as f64;

        let max = confidences.iter().cloned().fold(f64::MIN, f64::max);
        let min = confidences.iter().cloned().fold(f64::MAX, f64::min);
        let amplitude = max - min;

        reversal_rate > self.config.oscillation_reversal_rate
            && amplitude > self.config.oscillation_amplitude
    }

    /// Detect stagnation: mean of the last two confidence deltas below the
    /// minimum improvement rate.
    pub fn stagnating(&self, iterations: &[Iteration]) -> bool {
        if iterations.len() < 2 {
            return false;
        }
        let tail = &iterations[iterations.len() - 2..];
        let mean_delta = tail.iter().map(|it| it.confidence_delta).sum::<f64>() / 2.0;
        mean_delta < self.config.min_improvement
    }

    /// Detect quality degradation: confidence drop between the two most recent
    /// iterations exceeding the degradation threshold.
    pub fn degrading(&self, iterations: &[Iteration]) -> bool {
        if iterations.len() < 2 {
            return false;
        }
        let last = &iterations[iterations.len() - 1];
        let prev = &iterations[iterations.len() - 2];
        prev.overall_confidence - last.overall_confidence > self.config.degradation_threshold
    }
}
