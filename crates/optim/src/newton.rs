//! Damped Newton's method for the reference optimum.
//!
//! The optimum `F*` anchors every excess-risk number the driver reports,
//! so the solver always returns its last iterate, even when it runs out of
//! iterations; callers read `converged` to know whether the baseline is
//! exact.

use serde::{Deserialize, Serialize};

use dpfl_core::{solve, FedError, Result, SmoothObjective, Vector};

/// Stopping rule and damping for [`newtons_method`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewtonConfig {
    /// Iteration bound.
    pub max_iter: usize,
    /// Tolerance on the Newton decrement `√(gᵗΔ)`.
    pub tol: f64,
    /// Fixed step multiplier applied to the Newton direction.
    pub damping: f64,
}

impl Default for NewtonConfig {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            tol: 1e-6,
            damping: 0.5,
        }
    }
}

impl NewtonConfig {
    /// Set the iteration bound.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Set the decrement tolerance.
    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Check the parameters.
    pub fn validate(&self) -> Result<()> {
        if self.max_iter == 0 {
            return Err(FedError::invalid("newton max_iter must be positive"));
        }
        if !self.tol.is_finite() || self.tol <= 0.0 {
            return Err(FedError::invalid(format!("newton tol must be positive, got {}", self.tol)));
        }
        if !(self.damping > 0.0 && self.damping <= 1.0) {
            return Err(FedError::invalid(format!(
                "newton damping must lie in (0, 1], got {}",
                self.damping
            )));
        }
        Ok(())
    }
}

/// Output of [`newtons_method`].
#[derive(Clone, Debug, PartialEq)]
pub struct NewtonSolution {
    /// Objective value at `weights` (`F*`).
    pub optimal_value: f64,
    /// Final iterate (`w*`).
    pub weights: Vector,
    /// Iterations performed.
    pub iterations: usize,
    /// Newton decrement at the last iteration.
    pub decrement: f64,
    /// Whether the decrement fell below the tolerance.
    pub converged: bool,
}

/// Minimize `problem` from `w = 0` with damped Newton steps.
///
/// Each iteration solves `H Δ = g` and sets `w ← w − damping · Δ`. An
/// exhausted iteration budget logs a warning and still returns the last
/// iterate with `converged = false`.
pub fn newtons_method<P>(problem: &P, config: &NewtonConfig) -> Result<NewtonSolution>
where
    P: SmoothObjective + ?Sized,
{
    config.validate()?;
    let mut w = Vector::zeros(problem.dim());
    let mut decrement = f64::INFINITY;

    for t in 0..config.max_iter {
        let g = problem.gradient(&w)?;
        let h = problem.hessian(&w)?;
        let direction = solve(&h, &g)?;
        w.scaled_add(-config.damping, &direction);
        decrement = g.dot(&direction).max(0.0).sqrt();
        if decrement <= config.tol {
            tracing::debug!(iterations = t + 1, decrement, "newton's method converged");
            return Ok(NewtonSolution {
                optimal_value: problem.value(&w)?,
                weights: w,
                iterations: t + 1,
                decrement,
                converged: true,
            });
        }
    }

    tracing::warn!(
        max_iter = config.max_iter,
        decrement,
        "newton's method failed to converge; returning last iterate"
    );
    Ok(NewtonSolution {
        optimal_value: problem.value(&w)?,
        weights: w,
        iterations: config.max_iter,
        decrement,
        converged: false,
    })
}

/// [`newtons_method`] with the default configuration.
pub fn solve_optimum<P>(problem: &P) -> Result<NewtonSolution>
where
    P: SmoothObjective + ?Sized,
{
    newtons_method(problem, &NewtonConfig::default())
}
