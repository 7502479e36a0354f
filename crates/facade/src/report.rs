//! Per-trial results and their aggregate summary.

use serde::Serialize;
use statrs::statistics::Statistics;

use dpfl_core::{FedError, Result};

use crate::experiment::{Algorithm, EpsilonIndex, TrialBaseline};

/// Best grid cell of one algorithm in one trial.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AlgorithmResult {
    /// Algorithm swept.
    pub algorithm: Algorithm,
    /// Selected stepsize.
    pub stepsize: f64,
    /// Selected clip norm.
    pub clip_norm: f64,
    /// Mean excess risk of the selected cell.
    pub excess_risk: f64,
    /// Mean pooled-test error of the selected cell.
    pub test_error: f64,
    /// `√(test_error / naive_test_error)`.
    pub nrmse: f64,
    /// Diverged runs over the whole grid.
    pub diverged_runs: usize,
}

/// Everything measured in one trial.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrialResult {
    /// Trial index.
    pub trial: usize,
    /// Minibatch size / local step count used.
    pub local_steps: usize,
    /// Optimum and reference errors.
    pub baseline: TrialBaseline,
    /// One entry per algorithm, in [`Algorithm::all`] order.
    pub algorithms: Vec<AlgorithmResult>,
}

impl TrialResult {
    /// Result for `algorithm`, if it was run.
    pub fn result(&self, algorithm: Algorithm) -> Option<&AlgorithmResult> {
        self.algorithms.iter().find(|r| r.algorithm == algorithm)
    }
}

/// Per-trial series for one algorithm.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AlgorithmTrials {
    /// Excess risk per trial.
    pub excess_risk: Vec<f64>,
    /// Test error per trial.
    pub test_error: Vec<f64>,
    /// NRMSE per trial.
    pub nrmse: Vec<f64>,
}

impl AlgorithmTrials {
    fn push(&mut self, result: &AlgorithmResult) {
        self.excess_risk.push(result.excess_risk);
        self.test_error.push(result.test_error);
        self.nrmse.push(result.nrmse);
    }
}

/// Mean with a 5th/95th percentile band.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Band {
    /// Mean over trials.
    pub mean: f64,
    /// 5th percentile, clamped at 0.
    pub low: f64,
    /// 95th percentile, clamped at 1.
    pub high: f64,
}

impl Band {
    /// Band of `values`; all fields are NaN when `values` is empty.
    pub fn of(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self {
                mean: f64::NAN,
                low: f64::NAN,
                high: f64::NAN,
            };
        }
        let mean = values.iter().mean();
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        Self {
            mean,
            low: linear_percentile(&sorted, 5.0).max(0.0),
            high: linear_percentile(&sorted, 95.0).min(1.0),
        }
    }
}

/// Percentile `p ∈ [0, 100]` of non-empty `sorted`, interpolating linearly
/// between the order statistics at `(len − 1) · p / 100`.
fn linear_percentile(sorted: &[f64], p: f64) -> f64 {
    let h = (sorted.len() - 1) as f64 * p / 100.0;
    let lo = h.floor() as usize;
    let hi = (h.ceil() as usize).min(sorted.len() - 1);
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Aggregate NRMSE of one algorithm.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AlgorithmSummary {
    /// Algorithm summarized.
    pub algorithm: Algorithm,
    /// Budget of a noisy algorithm.
    pub epsilon: Option<f64>,
    /// NRMSE band across trials.
    pub nrmse: Band,
    /// Mean test error across trials.
    pub mean_test_error: f64,
}

/// Output of [`run_experiment`](crate::experiment::run_experiment).
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExperimentReport {
    epsilons: Vec<f64>,
    trials: Vec<TrialResult>,
}

impl ExperimentReport {
    /// Wrap finished trials run with budgets `epsilons`.
    pub fn new(epsilons: Vec<f64>, trials: Vec<TrialResult>) -> Self {
        Self { epsilons, trials }
    }

    /// Configured budgets.
    pub fn epsilons(&self) -> &[f64] {
        &self.epsilons
    }

    /// Budget at `index`.
    pub fn epsilon(&self, index: EpsilonIndex) -> Option<f64> {
        self.epsilons.get(index.0).copied()
    }

    /// Finished trials in order.
    pub fn trials(&self) -> &[TrialResult] {
        &self.trials
    }

    /// Algorithms in report order.
    pub fn algorithms(&self) -> Vec<Algorithm> {
        Algorithm::all(self.epsilons.len())
    }

    /// Per-trial series for `algorithm`.
    pub fn trials_for(&self, algorithm: Algorithm) -> AlgorithmTrials {
        let mut series = AlgorithmTrials::default();
        for result in self.trials.iter().filter_map(|t| t.result(algorithm)) {
            series.push(result);
        }
        series
    }

    /// Mean client heterogeneity `υ²` across trials.
    pub fn mean_heterogeneity(&self) -> f64 {
        self.trials.iter().map(|t| t.baseline.heterogeneity).mean()
    }

    /// NRMSE band and mean test error for every algorithm.
    pub fn summary(&self) -> Vec<AlgorithmSummary> {
        self.algorithms()
            .into_iter()
            .map(|algorithm| {
                let series = self.trials_for(algorithm);
                AlgorithmSummary {
                    algorithm,
                    epsilon: algorithm.epsilon_index().and_then(|i| self.epsilon(i)),
                    nrmse: Band::of(&series.nrmse),
                    mean_test_error: series.test_error.iter().mean(),
                }
            })
            .collect()
    }

    /// Pretty-printed JSON of the whole report.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| FedError::config(format!("serializing report: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn result(algorithm: Algorithm, nrmse: f64) -> AlgorithmResult {
        AlgorithmResult {
            algorithm,
            stepsize: 0.1,
            clip_norm: 100.0,
            excess_risk: nrmse / 10.0,
            test_error: nrmse * nrmse,
            nrmse,
            diverged_runs: 0,
        }
    }

    fn trial(t: usize, nrmse: [f64; 4]) -> TrialResult {
        let algorithms = Algorithm::all(1)
            .into_iter()
            .zip(nrmse)
            .map(|(a, v)| result(a, v))
            .collect();
        TrialResult {
            trial: t,
            local_steps: 1,
            baseline: TrialBaseline {
                optimal_value: 0.0,
                optimal_weights: vec![0.0, 0.0],
                newton_converged: true,
                heterogeneity: t as f64,
                naive_test_error: 1.0,
            },
            algorithms,
        }
    }

    fn report() -> ExperimentReport {
        ExperimentReport::new(
            vec![0.5],
            vec![
                trial(0, [0.2, 0.3, 0.6, 0.9]),
                trial(1, [0.4, 0.3, 0.8, 1.3]),
            ],
        )
    }

    #[test]
    fn trials_for_collects_in_trial_order() {
        let series = report().trials_for(Algorithm::Minibatch);
        assert_eq!(series.nrmse, vec![0.2, 0.4]);
        assert_eq!(series.excess_risk.len(), 2);
    }

    #[test]
    fn summary_labels_noisy_budgets() {
        let summary = report().summary();
        assert_eq!(summary.len(), 4);
        assert_eq!(summary[0].epsilon, None);
        assert_eq!(summary[3].algorithm, Algorithm::NoisyLocal(EpsilonIndex(0)));
        assert_eq!(summary[3].epsilon, Some(0.5));
        assert!((summary[0].nrmse.mean - 0.3).abs() < 1e-12);
        assert!((summary[1].nrmse.mean - 0.3).abs() < 1e-12);
    }

    #[test]
    fn band_is_clamped_to_unit_interval() {
        let band = Band::of(&[0.9, 1.3, 1.5]);
        assert!(band.high <= 1.0);
        assert!(band.low >= 0.0);
        assert!(band.mean > 1.0);
        assert!(Band::of(&[]).mean.is_nan());
    }

    #[test]
    fn band_brackets_the_bulk() {
        let values: Vec<f64> = (0..=100).map(|i| i as f64 / 200.0).collect();
        let band = Band::of(&values);
        assert!((band.mean - 0.25).abs() < 1e-12);
        assert!((band.low - 0.025).abs() < 1e-12);
        assert!((band.high - 0.475).abs() < 1e-12);
    }

    #[test]
    fn percentiles_interpolate_between_order_statistics() {
        let band = Band::of(&[0.6, 0.2]);
        assert!((band.low - 0.22).abs() < 1e-12);
        assert!((band.high - 0.58).abs() < 1e-12);
        let band = Band::of(&[0.3]);
        assert_eq!((band.low, band.high), (0.3, 0.3));
        assert!((linear_percentile(&[0.0, 1.0, 2.0, 10.0], 50.0) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn serializes_with_algorithm_tags() {
        let r = report();
        assert!((r.mean_heterogeneity() - 0.5).abs() < 1e-12);
        let json = r.to_json().unwrap();
        assert!(json.contains("\"noisy_local\": 0"));
        assert!(json.contains("\"minibatch\""));
    }

    proptest! {
        #[test]
        fn prop_band_is_ordered_for_unit_values(
            values in prop::collection::vec(0.0f64..1.0, 1..64),
        ) {
            let band = Band::of(&values);
            prop_assert!(band.low >= 0.0);
            prop_assert!(band.high <= 1.0);
            prop_assert!(band.low <= band.high);
        }
    }
}
