//! Facade crate re-exporting the federated regression stack and the
//! experiment driver built on it.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod experiment;
pub mod logging;
pub mod report;

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use dpfl_core as core;
pub use dpfl_data as data;
pub use dpfl_optim as optim;

pub use dpfl_core::{
    clip_vector, default_delta, moments_accountant_local_steps, FedError, LeastSquares,
    MomentsAccountantNoise, NoiseConfig, Result, SmoothObjective,
};
pub use dpfl_data::{linear_dataset, partition, ClientShard, Dataset, Federation, PartitionConfig};
pub use experiment::{
    heterogeneity, log_spaced, naive_test_error, run_experiment, run_trial, trial_rng, Algorithm,
    EpsilonIndex, ExperimentConfig, TrialBaseline, DEFAULT_DIVERGENCE_SENTINEL,
};
pub use logging::{init_logging, LogLevel};
pub use dpfl_optim::{
    newtons_method, run, solve_optimum, FederatedRunner, NewtonConfig, NewtonSolution, Protocol,
    RunConfig, RunOutcome, RunStatus,
};
pub use report::{AlgorithmResult, AlgorithmSummary, AlgorithmTrials, Band, ExperimentReport, TrialResult};

/// Convenience prelude covering the driver and its building blocks.
pub mod prelude {
    pub use crate::experiment::{
        run_experiment, Algorithm, EpsilonIndex, ExperimentConfig, TrialBaseline,
    };
    pub use crate::logging::{init_logging, LogLevel};
    pub use crate::report::{AlgorithmSummary, ExperimentReport};
    pub use dpfl_core::prelude::*;
    pub use dpfl_data::prelude::*;
    pub use dpfl_optim::prelude::*;
}
