//! Core primitives for differentially private federated regression.
//!
//! This crate provides the building blocks shared by the partitioner, the
//! reference solver and the federated optimization engine: squared-loss
//! oracles, gradient clipping, calibrated Gaussian noise, sampling and a
//! dense linear solve.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod clipping;
pub mod error;
pub mod linalg;
pub mod noise;
pub mod objective;
pub mod sampling;
pub mod tensor;

pub use clipping::{clip_vector, clipped, ClipReport};
pub use error::{FedError, Result};
pub use linalg::solve;
pub use noise::{default_delta, moments_accountant_local_steps, MomentsAccountantNoise, NoiseConfig};
pub use objective::{gradient, hessian, mean_squared_error, objective, LeastSquares, SmoothObjective};
pub use sampling::{minibatch_indices, sample_clients};
pub use tensor::{all_finite, l2_norm, max_abs, mean_vector, Matrix, Vector};

/// Common imports for downstream users.
pub mod prelude {
    pub use crate::{
        all_finite, clip_vector, clipped, default_delta, gradient, hessian, l2_norm,
        mean_squared_error, mean_vector, minibatch_indices, moments_accountant_local_steps,
        objective, sample_clients, solve, ClipReport, FedError, LeastSquares, Matrix,
        MomentsAccountantNoise, NoiseConfig, Result, SmoothObjective, Vector,
    };
}
