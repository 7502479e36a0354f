//! Stepsize, clip-norm and privacy-budget sweeps over repeated trials.
//!
//! Each trial repartitions the data, solves for the reference optimum and
//! then, for every algorithm, picks the grid cell with the lowest mean
//! excess risk. Diverged runs are scored with a fixed sentinel so they can
//! never be selected over a run that stayed bounded.

use std::fmt;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use dpfl_core::{moments_accountant_local_steps, FedError, NoiseConfig, Result, Vector};
use dpfl_data::{partition, Dataset, Federation, PartitionConfig};
use dpfl_optim::{
    newtons_method, run, NewtonConfig, Protocol, RunConfig, DEFAULT_AVG_WINDOW,
    DEFAULT_DIVERGENCE_THRESHOLD,
};

use crate::report::{AlgorithmResult, ExperimentReport, TrialResult};

/// Score given to a diverged run in place of its excess risk and test error.
pub const DEFAULT_DIVERGENCE_SENTINEL: f64 = 5e9;

/// `count` values `exp(t)` for `t` evenly spaced over `[lo, hi]`.
pub fn log_spaced(lo: f64, hi: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![lo.exp()],
        _ => {
            let step = (hi - lo) / (count - 1) as f64;
            (0..count).map(|i| (lo + step * i as f64).exp()).collect()
        }
    }
}

/// Position of a budget in [`ExperimentConfig::epsilons`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpsilonIndex(pub usize);

/// One of the compared optimization algorithms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Non-private minibatch SGD.
    Minibatch,
    /// Non-private local SGD.
    Local,
    /// Minibatch SGD with noise for the indexed budget.
    NoisyMinibatch(EpsilonIndex),
    /// Local SGD with noise for the indexed budget.
    NoisyLocal(EpsilonIndex),
}

impl Algorithm {
    /// Every algorithm for `num_epsilons` budgets, non-private first.
    pub fn all(num_epsilons: usize) -> Vec<Self> {
        let mut algorithms = vec![Algorithm::Minibatch, Algorithm::Local];
        for i in 0..num_epsilons {
            algorithms.push(Algorithm::NoisyMinibatch(EpsilonIndex(i)));
            algorithms.push(Algorithm::NoisyLocal(EpsilonIndex(i)));
        }
        algorithms
    }

    /// Engine protocol the algorithm runs.
    pub fn protocol(self) -> Protocol {
        match self {
            Algorithm::Minibatch | Algorithm::NoisyMinibatch(_) => Protocol::Minibatch,
            Algorithm::Local | Algorithm::NoisyLocal(_) => Protocol::Local,
        }
    }

    /// Budget index, or `None` for the non-private algorithms.
    pub fn epsilon_index(self) -> Option<EpsilonIndex> {
        match self {
            Algorithm::NoisyMinibatch(i) | Algorithm::NoisyLocal(i) => Some(i),
            Algorithm::Minibatch | Algorithm::Local => None,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::Minibatch => write!(f, "minibatch"),
            Algorithm::Local => write!(f, "local"),
            Algorithm::NoisyMinibatch(EpsilonIndex(i)) => write!(f, "noisy_minibatch[{i}]"),
            Algorithm::NoisyLocal(EpsilonIndex(i)) => write!(f, "noisy_local[{i}]"),
        }
    }
}

/// Full sweep configuration.
///
/// Missing JSON fields take their [`Default`] values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// How each trial partitions the dataset.
    pub partition: PartitionConfig,
    /// Rounds per run.
    pub rounds: usize,
    /// Clients sampled per round.
    pub clients_per_round: usize,
    /// Minibatch size / local step count; `None` uses
    /// [`moments_accountant_local_steps`] with the largest budget.
    pub local_steps: Option<usize>,
    /// Independent trials.
    pub trials: usize,
    /// Runs averaged per grid cell.
    pub reps: usize,
    /// Loss-evaluation frequency in rounds.
    pub loss_freq: usize,
    /// Iterate-averaging window.
    pub avg_window: usize,
    /// Clip norms swept for every algorithm.
    pub clip_norms: Vec<f64>,
    /// Stepsizes swept for the minibatch algorithms.
    pub minibatch_stepsizes: Vec<f64>,
    /// Stepsizes swept for the local algorithms.
    pub local_stepsizes: Vec<f64>,
    /// Privacy budgets.
    pub epsilons: Vec<f64>,
    /// Fixed δ; `None` uses `1/n²` per client.
    pub delta: Option<f64>,
    /// Loss above which a run is declared diverged.
    pub divergence_threshold: f64,
    /// Score recorded for a diverged run.
    pub divergence_sentinel: f64,
    /// Reference solver settings.
    pub newton: NewtonConfig,
    /// Master seed; trial `t` draws from stream `t` of this seed.
    pub seed: u64,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            partition: PartitionConfig::insurance(10),
            rounds: 35,
            clients_per_round: 5,
            local_steps: None,
            trials: 20,
            reps: 3,
            loss_freq: 5,
            avg_window: DEFAULT_AVG_WINDOW,
            clip_norms: vec![1e2, 1e4, 1e6, 1e8, 1e32],
            minibatch_stepsizes: log_spaced(-8.0, 1.0, 10),
            local_stepsizes: log_spaced(-10.0, 0.0, 10),
            epsilons: vec![0.125, 0.25, 0.5, 1.0, 2.0, 3.0],
            delta: None,
            divergence_threshold: DEFAULT_DIVERGENCE_THRESHOLD,
            divergence_sentinel: DEFAULT_DIVERGENCE_SENTINEL,
            newton: NewtonConfig::default(),
            seed: 0,
        }
    }
}

impl ExperimentConfig {
    /// Default sweep over `partition`.
    pub fn new(partition: PartitionConfig) -> Self {
        Self {
            partition,
            ..Self::default()
        }
    }

    /// Parse a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| FedError::config(format!("parsing experiment config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the number of trials.
    pub fn with_trials(mut self, trials: usize) -> Self {
        self.trials = trials;
        self
    }

    /// Set the runs per grid cell.
    pub fn with_reps(mut self, reps: usize) -> Self {
        self.reps = reps;
        self
    }

    /// Set the rounds per run.
    pub fn with_rounds(mut self, rounds: usize) -> Self {
        self.rounds = rounds;
        self
    }

    /// Set the clients sampled per round.
    pub fn with_clients_per_round(mut self, clients_per_round: usize) -> Self {
        self.clients_per_round = clients_per_round;
        self
    }

    /// Fix the minibatch size / local step count.
    pub fn with_local_steps(mut self, local_steps: usize) -> Self {
        self.local_steps = Some(local_steps);
        self
    }

    /// Set the loss-evaluation frequency.
    pub fn with_loss_freq(mut self, loss_freq: usize) -> Self {
        self.loss_freq = loss_freq;
        self
    }

    /// Set the clip-norm grid.
    pub fn with_clip_norms(mut self, clip_norms: Vec<f64>) -> Self {
        self.clip_norms = clip_norms;
        self
    }

    /// Set both stepsize grids.
    pub fn with_stepsizes(mut self, minibatch: Vec<f64>, local: Vec<f64>) -> Self {
        self.minibatch_stepsizes = minibatch;
        self.local_stepsizes = local;
        self
    }

    /// Set the privacy budgets.
    pub fn with_epsilons(mut self, epsilons: Vec<f64>) -> Self {
        self.epsilons = epsilons;
        self
    }

    /// Fix δ for every client.
    pub fn with_delta(mut self, delta: f64) -> Self {
        self.delta = Some(delta);
        self
    }

    /// Set the master seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Check the sweep parameters.
    ///
    /// Per-run settings are checked again against the federation when each
    /// run starts.
    pub fn validate(&self) -> Result<()> {
        if self.trials == 0 {
            return Err(FedError::invalid("trials must be positive"));
        }
        if self.reps == 0 {
            return Err(FedError::invalid("reps must be positive"));
        }
        if self.local_steps == Some(0) {
            return Err(FedError::invalid("local steps must be positive"));
        }
        if self.partition.test_fraction <= 0.0 {
            return Err(FedError::invalid(
                "test fraction must be positive to report test error",
            ));
        }
        check_grid("clip norm", &self.clip_norms)?;
        check_grid("minibatch stepsize", &self.minibatch_stepsizes)?;
        check_grid("local stepsize", &self.local_stepsizes)?;
        for &epsilon in &self.epsilons {
            let noise = match self.delta {
                Some(delta) => NoiseConfig::new(epsilon).with_delta(delta),
                None => NoiseConfig::new(epsilon),
            };
            noise.validate()?;
        }
        if !self.divergence_sentinel.is_finite() || self.divergence_sentinel <= 0.0 {
            return Err(FedError::invalid("divergence sentinel must be positive and finite"));
        }
        self.newton.validate()
    }

    /// Minibatch size / local step count for shards of `shard_size` rows.
    pub fn local_steps_for(&self, shard_size: usize) -> usize {
        self.local_steps.unwrap_or_else(|| {
            let max_epsilon = self.epsilons.iter().copied().fold(f64::NAN, f64::max);
            moments_accountant_local_steps(shard_size, max_epsilon, self.rounds)
        })
    }

    /// Stepsize grid swept for `algorithm`.
    pub fn stepsizes(&self, algorithm: Algorithm) -> &[f64] {
        match algorithm.protocol() {
            Protocol::Minibatch => &self.minibatch_stepsizes,
            Protocol::Local => &self.local_stepsizes,
        }
    }

    /// Engine config for one grid cell of `algorithm`.
    pub fn run_config(
        &self,
        algorithm: Algorithm,
        local_steps: usize,
        stepsize: f64,
        clip_norm: f64,
    ) -> Result<RunConfig> {
        let base = RunConfig::new(algorithm.protocol())
            .with_clients_per_round(self.clients_per_round)
            .with_local_steps(local_steps)
            .with_rounds(self.rounds)
            .with_stepsize(stepsize)
            .with_clip_norm(clip_norm)
            .with_loss_freq(self.loss_freq)
            .with_avg_window(self.avg_window)
            .with_divergence_threshold(self.divergence_threshold);

        let Some(EpsilonIndex(i)) = algorithm.epsilon_index() else {
            return Ok(base);
        };
        let epsilon = *self.epsilons.get(i).ok_or_else(|| {
            FedError::invalid(format!(
                "{algorithm} refers to budget {i} but only {} are configured",
                self.epsilons.len()
            ))
        })?;
        let noise = match self.delta {
            Some(delta) => NoiseConfig::new(epsilon).with_delta(delta),
            None => NoiseConfig::new(epsilon),
        };
        Ok(base.with_noise(noise))
    }
}

fn check_grid(name: &str, values: &[f64]) -> Result<()> {
    if values.is_empty() {
        return Err(FedError::invalid(format!("{name} grid is empty")));
    }
    match values.iter().find(|v| v.is_nan() || **v <= 0.0) {
        Some(bad) => Err(FedError::invalid(format!("{name} must be positive, got {bad}"))),
        None => Ok(()),
    }
}

/// Reference quantities shared by every algorithm in a trial.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrialBaseline {
    /// Pooled-train optimum `F*`.
    pub optimal_value: f64,
    /// Optimal weights `w*`.
    pub optimal_weights: Vec<f64>,
    /// Whether Newton's method met its tolerance.
    pub newton_converged: bool,
    /// Client heterogeneity `υ²` at `w*`.
    pub heterogeneity: f64,
    /// Test error of predicting the pooled-train label mean.
    pub naive_test_error: f64,
}

impl TrialBaseline {
    /// Solve for the optimum of `federation` and derive the baselines.
    pub fn compute(federation: &Federation, newton: &NewtonConfig) -> Result<Self> {
        let solution = newtons_method(federation.pooled_train(), newton)?;
        let heterogeneity = heterogeneity(federation, &solution.weights)?;
        let naive_test_error = naive_test_error(federation)?;
        Ok(Self {
            optimal_value: solution.optimal_value,
            optimal_weights: solution.weights.to_vec(),
            newton_converged: solution.converged,
            heterogeneity,
            naive_test_error,
        })
    }
}

/// `υ² = (1/M) Σ_m ‖∇F_m(w)‖²` over the clients' train sets.
pub fn heterogeneity(federation: &Federation, w: &Vector) -> Result<f64> {
    let mut total = 0.0;
    for client in federation.clients() {
        let g = client.train.gradient(w)?;
        total += g.dot(&g);
    }
    Ok(total / federation.num_clients() as f64)
}

/// `‖y_test − ȳ_train‖² / (2 n_test)` on the pooled sets.
pub fn naive_test_error(federation: &Federation) -> Result<f64> {
    let mean = federation
        .pooled_train()
        .labels()
        .mean()
        .ok_or_else(|| FedError::degenerate("pooled train set is empty"))?;
    let test = federation.pooled_test().labels();
    if test.is_empty() {
        return Err(FedError::degenerate("pooled test set is empty"));
    }
    let sse: f64 = test.iter().map(|y| (y - mean) * (y - mean)).sum();
    Ok(sse / (2.0 * test.len() as f64))
}

/// Generator for trial `trial`: stream `trial` of a ChaCha8 keyed by `seed`.
pub fn trial_rng(seed: u64, trial: usize) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(trial as u64);
    rng
}

/// Run every trial of `config` over `dataset`.
pub fn run_experiment(dataset: &Dataset, config: &ExperimentConfig) -> Result<ExperimentReport> {
    config.validate()?;
    tracing::info!(
        trials = config.trials,
        reps = config.reps,
        algorithms = 2 + 2 * config.epsilons.len(),
        "starting experiment"
    );

    let mut trials = Vec::with_capacity(config.trials);
    for trial in 0..config.trials {
        let mut rng = trial_rng(config.seed, trial);
        trials.push(run_trial(dataset, config, trial, &mut rng)?);
    }
    Ok(ExperimentReport::new(config.epsilons.clone(), trials))
}

/// One trial: partition, baseline, then every algorithm's sweep.
pub fn run_trial<R: Rng + ?Sized>(
    dataset: &Dataset,
    config: &ExperimentConfig,
    trial: usize,
    rng: &mut R,
) -> Result<TrialResult> {
    let federation = partition(dataset, &config.partition, rng)?;
    let local_steps = config.local_steps_for(federation.shard_size());
    let baseline = TrialBaseline::compute(&federation, &config.newton)?;
    if baseline.naive_test_error <= 0.0 {
        return Err(FedError::degenerate(
            "test labels equal the train mean; NRMSE is undefined",
        ));
    }
    tracing::info!(
        trial,
        optimal_value = baseline.optimal_value,
        heterogeneity = baseline.heterogeneity,
        local_steps,
        "computed trial baseline"
    );

    let mut algorithms = Vec::new();
    for algorithm in Algorithm::all(config.epsilons.len()) {
        algorithms.push(sweep(&federation, config, algorithm, local_steps, &baseline, rng)?);
    }
    Ok(TrialResult {
        trial,
        local_steps,
        baseline,
        algorithms,
    })
}

/// Mean scores of one grid cell.
struct CellScore {
    stepsize: f64,
    clip_norm: f64,
    excess_risk: f64,
    test_error: f64,
}

fn sweep<R: Rng + ?Sized>(
    federation: &Federation,
    config: &ExperimentConfig,
    algorithm: Algorithm,
    local_steps: usize,
    baseline: &TrialBaseline,
    rng: &mut R,
) -> Result<AlgorithmResult> {
    let reps = config.reps as f64;
    let mut best: Option<CellScore> = None;
    let mut diverged_runs = 0;

    for &stepsize in config.stepsizes(algorithm) {
        for &clip_norm in &config.clip_norms {
            let run_config = config.run_config(algorithm, local_steps, stepsize, clip_norm)?;
            let mut cell = CellScore {
                stepsize,
                clip_norm,
                excess_risk: 0.0,
                test_error: 0.0,
            };
            for _ in 0..config.reps {
                let outcome = run(federation, &run_config, rng)?;
                if !outcome.is_converged() {
                    diverged_runs += 1;
                    cell.excess_risk += config.divergence_sentinel;
                    cell.test_error += config.divergence_sentinel;
                    continue;
                }
                let w = outcome.averaged_iterate();
                let loss = match outcome.final_loss() {
                    Some(loss) => loss,
                    None => federation.pooled_train().objective(&w)?,
                };
                cell.excess_risk += (loss - baseline.optimal_value) / reps;
                cell.test_error += federation.pooled_test().objective(&w)? / reps;
            }
            if best.as_ref().map_or(true, |b| cell.excess_risk < b.excess_risk) {
                best = Some(cell);
            }
        }
    }

    // Grids are non-empty after validation.
    let best = best.ok_or_else(|| FedError::invalid(format!("{algorithm}: empty sweep grid")))?;
    let nrmse = (best.test_error / baseline.naive_test_error).sqrt();
    tracing::info!(
        %algorithm,
        stepsize = best.stepsize,
        clip_norm = best.clip_norm,
        excess_risk = best.excess_risk,
        nrmse,
        diverged_runs,
        "selected best configuration"
    );
    Ok(AlgorithmResult {
        algorithm,
        stepsize: best.stepsize,
        clip_norm: best.clip_norm,
        excess_risk: best.excess_risk,
        test_error: best.test_error,
        nrmse,
        diverged_runs,
    })
}
