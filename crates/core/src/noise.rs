//! Gaussian noise calibrated with the moments-accountant bound.
//!
//! Each client perturbs its clipped gradient with isotropic Gaussian noise
//! whose variance is
//!
//! ```text
//! σ² = 8 · L² · R · ln(1/δ) / (n² · ε²)
//! ```
//!
//! for clip norm `L`, `R` noisy releases, shard size `n` and privacy
//! parameters `(ε, δ)`. The expression is fixed; there is no pluggable
//! accountant behind it.

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::error::{FedError, Result};
use crate::tensor::Vector;

/// The conventional `δ = 1/n²` for a shard of `n` examples.
pub fn default_delta(shard_size: usize) -> f64 {
    let n = shard_size as f64;
    1.0 / (n * n)
}

/// Local-step count needed for the moments-accountant guarantee.
///
/// Returns `max(1, ⌊n · √(ε_max / (4R))⌋)`.
pub fn moments_accountant_local_steps(shard_size: usize, max_epsilon: f64, rounds: usize) -> usize {
    if rounds == 0 || !max_epsilon.is_finite() || max_epsilon <= 0.0 {
        return 1;
    }
    let k = shard_size as f64 * (max_epsilon / (4.0 * rounds as f64)).sqrt();
    (k.floor() as usize).max(1)
}

/// Privacy budget requested for a noisy run.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NoiseConfig {
    /// Target epsilon.
    pub epsilon: f64,
    /// Fixed delta; `None` means `1/n²` for each client's shard size.
    #[serde(default)]
    pub delta: Option<f64>,
}

impl NoiseConfig {
    /// Create a config with `δ = 1/n²`.
    pub fn new(epsilon: f64) -> Self {
        Self {
            epsilon,
            delta: None,
        }
    }

    /// Fix delta instead of deriving it from the shard size.
    pub fn with_delta(mut self, delta: f64) -> Self {
        self.delta = Some(delta);
        self
    }

    /// Delta to use for a shard of `shard_size` examples.
    pub fn delta_for(&self, shard_size: usize) -> f64 {
        self.delta.unwrap_or_else(|| default_delta(shard_size))
    }

    /// Check epsilon and the optional fixed delta.
    pub fn validate(&self) -> Result<()> {
        check_epsilon(self.epsilon)?;
        if let Some(delta) = self.delta {
            check_delta(delta)?;
        }
        Ok(())
    }
}

fn check_epsilon(epsilon: f64) -> Result<()> {
    if !epsilon.is_finite() || epsilon <= 0.0 {
        return Err(FedError::invalid(format!(
            "epsilon must be positive and finite, got {epsilon}"
        )));
    }
    Ok(())
}

fn check_delta(delta: f64) -> Result<()> {
    if !(delta > 0.0 && delta < 1.0) {
        return Err(FedError::degenerate(format!(
            "delta must lie in (0, 1), got {delta}"
        )));
    }
    Ok(())
}

/// Moments-accountant Gaussian noise for a single client contribution.
#[derive(Clone, Debug, PartialEq)]
pub struct MomentsAccountantNoise {
    /// Dimension of the perturbed vector.
    pub dim: usize,
    /// Privacy budget.
    pub epsilon: f64,
    /// Failure probability.
    pub delta: f64,
    /// Number of examples held by the client.
    pub shard_size: usize,
    /// Number of noisy releases accounted for.
    pub rounds: usize,
    /// L2 clip norm bounding each contribution.
    pub clip_norm: f64,
    /// Local steps per round (does not enter the variance).
    pub local_steps: usize,
}

impl MomentsAccountantNoise {
    /// Create a calibrated noise source, validating every parameter.
    pub fn new(
        dim: usize,
        epsilon: f64,
        delta: f64,
        shard_size: usize,
        rounds: usize,
        clip_norm: f64,
        local_steps: usize,
    ) -> Result<Self> {
        if dim == 0 {
            return Err(FedError::invalid("noise dimension must be positive"));
        }
        check_epsilon(epsilon)?;
        check_delta(delta)?;
        if shard_size == 0 {
            return Err(FedError::degenerate("shard size must be positive"));
        }
        if rounds == 0 {
            return Err(FedError::invalid("round count must be positive"));
        }
        if local_steps == 0 {
            return Err(FedError::invalid("local steps must be positive"));
        }
        if !clip_norm.is_finite() || clip_norm <= 0.0 {
            return Err(FedError::invalid(format!(
                "noisy runs need a finite positive clip norm, got {clip_norm}"
            )));
        }
        Ok(Self {
            dim,
            epsilon,
            delta,
            shard_size,
            rounds,
            clip_norm,
            local_steps,
        })
    }

    /// Per-coordinate variance.
    pub fn variance(&self) -> f64 {
        let n = self.shard_size as f64;
        8.0 * self.clip_norm.powi(2) * self.rounds as f64 * (1.0 / self.delta).ln()
            / (n * n * self.epsilon * self.epsilon)
    }

    /// Per-coordinate standard deviation.
    pub fn stddev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Trace of the covariance matrix `σ² · I_d`.
    pub fn covariance_trace(&self) -> f64 {
        self.dim as f64 * self.variance()
    }

    /// Draw one independent noise vector.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vector> {
        let sigma = self.stddev();
        let dist = Normal::new(0.0, sigma).map_err(|e| {
            FedError::numerical(format!("cannot build normal with sigma={sigma}: {e}"))
        })?;
        Ok(Vector::from_shape_fn(self.dim, |_| dist.sample(rng)))
    }

    /// Add one independent noise draw to `v` in-place.
    pub fn perturb<R: Rng + ?Sized>(&self, v: &mut Vector, rng: &mut R) -> Result<()> {
        if v.len() != self.dim {
            return Err(FedError::shape("noise perturbation", self.dim, v.len()));
        }
        let noise = self.sample(rng)?;
        *v += &noise;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn base() -> MomentsAccountantNoise {
        MomentsAccountantNoise::new(7, 1.0, 1e-4, 100, 35, 10.0, 1).unwrap()
    }

    #[test]
    fn variance_matches_closed_form() {
        let noise = base();
        let expected = 8.0 * 100.0 * 35.0 * (1e4f64).ln() / (100.0 * 100.0 * 1.0);
        assert!((noise.variance() - expected).abs() < 1e-9);
        assert!((noise.covariance_trace() - 7.0 * expected).abs() < 1e-8);
    }

    #[test]
    fn default_delta_is_inverse_square() {
        assert!((default_delta(10) - 0.01).abs() < 1e-15);
        assert_eq!(NoiseConfig::new(1.0).delta_for(20), 1.0 / 400.0);
        assert_eq!(NoiseConfig::new(1.0).with_delta(1e-3).delta_for(20), 1e-3);
    }

    #[test]
    fn rejects_degenerate_parameters() {
        assert!(MomentsAccountantNoise::new(7, 1.0, 0.0, 100, 35, 10.0, 1).is_err());
        assert!(MomentsAccountantNoise::new(7, 1.0, 1.0, 100, 35, 10.0, 1).is_err());
        assert!(MomentsAccountantNoise::new(7, 0.0, 1e-4, 100, 35, 10.0, 1).is_err());
        assert!(MomentsAccountantNoise::new(7, 1.0, 1e-4, 0, 35, 10.0, 1).is_err());
        assert!(MomentsAccountantNoise::new(7, 1.0, 1e-4, 100, 0, 10.0, 1).is_err());
        assert!(MomentsAccountantNoise::new(7, 1.0, 1e-4, 100, 35, f64::INFINITY, 1).is_err());
        assert!(MomentsAccountantNoise::new(0, 1.0, 1e-4, 100, 35, 10.0, 1).is_err());
        assert!(NoiseConfig::new(1.0).with_delta(-0.5).validate().is_err());
    }

    #[test]
    fn draws_are_fresh_and_reproducible() {
        let noise = base();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let a = noise.sample(&mut rng).unwrap();
        let b = noise.sample(&mut rng).unwrap();
        assert_ne!(a, b);

        let mut rng = ChaCha8Rng::seed_from_u64(42);
        assert_eq!(noise.sample(&mut rng).unwrap(), a);
    }

    #[test]
    fn sample_statistics() {
        let noise = MomentsAccountantNoise::new(10_000, 2.0, 1e-2, 50, 4, 1.0, 1).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(123);
        let v = noise.sample(&mut rng).unwrap();
        let mean = v.sum() / v.len() as f64;
        let var = v.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / v.len() as f64;
        assert!(mean.abs() < 0.1 * noise.stddev());
        assert!((var / noise.variance() - 1.0).abs() < 0.1);
    }

    #[test]
    fn perturb_checks_dimension() {
        let noise = base();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut v = Vector::zeros(3);
        assert!(noise.perturb(&mut v, &mut rng).is_err());
    }

    #[test]
    fn local_steps_formula() {
        // n = 134, eps = 3, R = 35: 134 * sqrt(3/140) = 19.6...
        assert_eq!(moments_accountant_local_steps(134, 3.0, 35), 19);
        assert_eq!(moments_accountant_local_steps(1, 0.1, 100), 1);
    }

    proptest! {
        #[test]
        fn prop_trace_monotone(
            eps in 0.05f64..10.0,
            n in 2usize..500,
            rounds in 1usize..100,
            clip in 0.1f64..100.0,
        ) {
            let delta = default_delta(n).min(0.5);
            let make = |eps, n, rounds, clip| {
                MomentsAccountantNoise::new(7, eps, delta, n, rounds, clip, 1)
                    .unwrap()
                    .covariance_trace()
            };
            let t = make(eps, n, rounds, clip);
            prop_assert!(make(eps, n, rounds + 1, clip) > t);
            prop_assert!(make(eps, n, rounds, clip * 1.5) > t);
            prop_assert!(make(eps * 1.5, n, rounds, clip) < t);
            prop_assert!(make(eps, n + 1, rounds, clip) < t);
        }
    }
}
