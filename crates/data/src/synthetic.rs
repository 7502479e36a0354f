//! Synthetic regression data with a known linear relationship.

use rand::Rng;
use rand_distr::{Distribution, Normal, StandardNormal};

use dpfl_core::{FedError, Matrix, Result, Vector};

use crate::dataset::Dataset;

/// Draw `n` rows with standard-normal features and labels
/// `y = intercept + Σ_j coefficients[j] · x_j + N(0, noise_std²)`.
pub fn linear_dataset<R: Rng + ?Sized>(
    n: usize,
    coefficients: &[f64],
    intercept: f64,
    noise_std: f64,
    rng: &mut R,
) -> Result<Dataset> {
    if coefficients.is_empty() {
        return Err(FedError::invalid("need at least one coefficient"));
    }
    if !(noise_std >= 0.0 && noise_std.is_finite()) {
        return Err(FedError::invalid(format!(
            "noise std must be finite and non-negative, got {noise_std}"
        )));
    }
    let noise = Normal::new(0.0, noise_std)
        .map_err(|e| FedError::invalid(format!("noise std {noise_std}: {e}")))?;

    let d = coefficients.len();
    let mut features = Matrix::zeros((n, d));
    let mut labels = Vector::zeros(n);
    for i in 0..n {
        let mut y = intercept;
        for (j, &c) in coefficients.iter().enumerate() {
            let x: f64 = StandardNormal.sample(rng);
            features[(i, j)] = x;
            y += c * x;
        }
        labels[i] = y + noise.sample(rng);
    }
    Dataset::new(features, labels, Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn noiseless_labels_follow_the_model() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let ds = linear_dataset(50, &[3.0, -2.0], 1.0, 0.0, &mut rng).unwrap();
        assert_eq!(ds.len(), 50);
        for i in 0..50 {
            let x = ds.features().row(i);
            let expected = 1.0 + 3.0 * x[0] - 2.0 * x[1];
            assert!((ds.labels()[i] - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn rejects_bad_arguments() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert!(linear_dataset(10, &[], 0.0, 0.1, &mut rng).is_err());
        assert!(linear_dataset(10, &[1.0], 0.0, -1.0, &mut rng).is_err());
        assert!(linear_dataset(10, &[1.0], 0.0, f64::NAN, &mut rng).is_err());
        assert!(linear_dataset(10, &[1.0], 0.0, f64::INFINITY, &mut rng).is_err());
        assert!(linear_dataset(0, &[1.0], 0.0, 0.1, &mut rng).is_err());
    }
}
