//! Reference solver and federated optimization engine.
//!
//! [`newtons_method`] computes the least-squares optimum used as the
//! excess-risk baseline; [`FederatedRunner`] executes minibatch or local
//! gradient descent over a [`dpfl_data::Federation`], optionally adding
//! calibrated Gaussian noise to every clipped client contribution.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod engine;
pub mod newton;
pub mod window;

pub use config::{Protocol, RunConfig, DEFAULT_AVG_WINDOW, DEFAULT_DIVERGENCE_THRESHOLD};
pub use engine::{run, FederatedRunner, RunOutcome, RunStatus};
pub use newton::{newtons_method, solve_optimum, NewtonConfig, NewtonSolution};
pub use window::IterateWindow;

/// Common imports for optimization.
pub mod prelude {
    pub use crate::{
        newtons_method, run, solve_optimum, FederatedRunner, IterateWindow, NewtonConfig,
        NewtonSolution, Protocol, RunConfig, RunOutcome, RunStatus, DEFAULT_AVG_WINDOW,
        DEFAULT_DIVERGENCE_THRESHOLD,
    };
}
