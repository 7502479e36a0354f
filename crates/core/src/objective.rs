//! Squared-loss objective, gradient and Hessian oracles.
//!
//! All quantities are averaged over the rows they are evaluated on:
//!
//! - `objective(w) = ‖y − Xw‖² / (2n)`
//! - `gradient(w)  = −Xᵗ(y − Xw) / n`
//! - `hessian      = XᵗX / n`

use ndarray::{ArrayView1, ArrayView2, Axis};
use rand::Rng;

use crate::error::{FedError, Result};
use crate::sampling::minibatch_indices;
use crate::tensor::{Matrix, Vector};

fn check_rows(context: &str, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<usize> {
    if x.nrows() != y.len() {
        return Err(FedError::shape(format!("{context} labels"), x.nrows(), y.len()));
    }
    if y.is_empty() {
        return Err(FedError::degenerate(format!("{context} on zero rows")));
    }
    Ok(y.len())
}

fn check_weights(context: &str, x: ArrayView2<'_, f64>, w: ArrayView1<'_, f64>) -> Result<()> {
    if x.ncols() != w.len() {
        return Err(FedError::shape(format!("{context} weights"), x.ncols(), w.len()));
    }
    Ok(())
}

/// Average squared-loss gradient `−Xᵗ(y − Xw) / n`.
pub fn gradient(
    w: ArrayView1<'_, f64>,
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, f64>,
) -> Result<Vector> {
    let n = check_rows("gradient", x, y)?;
    check_weights("gradient", x, w)?;
    let residual = &y - &x.dot(&w);
    Ok(x.t().dot(&residual) * (-1.0 / n as f64))
}

/// Squared-loss Hessian `XᵗX / n` (independent of the weights).
pub fn hessian(x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<Matrix> {
    let n = check_rows("hessian", x, y)?;
    Ok(x.t().dot(&x) / n as f64)
}

/// Halved mean squared residual `‖y − Xw‖² / (2n)`.
pub fn objective(
    w: ArrayView1<'_, f64>,
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, f64>,
) -> Result<f64> {
    let n = check_rows("objective", x, y)?;
    check_weights("objective", x, w)?;
    let residual = &y - &x.dot(&w);
    Ok(residual.dot(&residual) / (2.0 * n as f64))
}

/// Test error as reported downstream; same scale as [`objective`].
pub fn mean_squared_error(
    w: ArrayView1<'_, f64>,
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, f64>,
) -> Result<f64> {
    objective(w, x, y)
}

/// Smooth objective with first- and second-order oracles.
pub trait SmoothObjective {
    /// Number of parameters.
    fn dim(&self) -> usize;

    /// Objective value at `w`.
    fn value(&self, w: &Vector) -> Result<f64>;

    /// Gradient at `w`.
    fn gradient(&self, w: &Vector) -> Result<Vector>;

    /// Hessian at `w`.
    fn hessian(&self, w: &Vector) -> Result<Matrix>;
}

/// An owned least-squares problem over a feature matrix and label vector.
#[derive(Clone, Debug, PartialEq)]
pub struct LeastSquares {
    features: Matrix,
    labels: Vector,
}

impl LeastSquares {
    /// Create a problem, checking that rows and labels line up.
    pub fn new(features: Matrix, labels: Vector) -> Result<Self> {
        if features.nrows() != labels.len() {
            return Err(FedError::shape(
                "least-squares labels",
                features.nrows(),
                labels.len(),
            ));
        }
        Ok(Self { features, labels })
    }

    /// Feature matrix.
    pub fn features(&self) -> &Matrix {
        &self.features
    }

    /// Label vector.
    pub fn labels(&self) -> &Vector {
        &self.labels
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the problem has no rows.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Number of feature columns.
    pub fn num_features(&self) -> usize {
        self.features.ncols()
    }

    /// Objective at `w`.
    pub fn objective(&self, w: &Vector) -> Result<f64> {
        objective(w.view(), self.features.view(), self.labels.view())
    }

    /// Full-batch gradient at `w`.
    pub fn gradient(&self, w: &Vector) -> Result<Vector> {
        gradient(w.view(), self.features.view(), self.labels.view())
    }

    /// Hessian `XᵗX / n`.
    pub fn hessian(&self) -> Result<Matrix> {
        hessian(self.features.view(), self.labels.view())
    }

    /// Gradient on `batch_size` rows drawn uniformly with replacement.
    pub fn minibatch_gradient<R: Rng + ?Sized>(
        &self,
        w: &Vector,
        batch_size: usize,
        rng: &mut R,
    ) -> Result<Vector> {
        let idx = minibatch_indices(self.len(), batch_size, rng)?;
        let x = self.features.select(Axis(0), &idx);
        let y = self.labels.select(Axis(0), &idx);
        gradient(w.view(), x.view(), y.view())
    }

    /// Restrict the problem to the given rows (in order, repeats allowed).
    pub fn select_rows(&self, rows: &[usize]) -> Self {
        Self {
            features: self.features.select(Axis(0), rows),
            labels: self.labels.select(Axis(0), rows),
        }
    }
}

impl SmoothObjective for LeastSquares {
    fn dim(&self) -> usize {
        self.num_features()
    }

    fn value(&self, w: &Vector) -> Result<f64> {
        self.objective(w)
    }

    fn gradient(&self, w: &Vector) -> Result<Vector> {
        LeastSquares::gradient(self, w)
    }

    fn hessian(&self, _w: &Vector) -> Result<Matrix> {
        LeastSquares::hessian(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn problem() -> LeastSquares {
        // y = 1 + 2x exactly.
        let x = array![[1.0, 0.0], [1.0, 1.0], [1.0, 2.0], [1.0, 3.0]];
        let y = array![1.0, 3.0, 5.0, 7.0];
        LeastSquares::new(x, y).unwrap()
    }

    #[test]
    fn zero_at_exact_fit() {
        let p = problem();
        let w = array![1.0, 2.0];
        assert!(p.objective(&w).unwrap().abs() < 1e-12);
        assert!(p.gradient(&w).unwrap().iter().all(|g| g.abs() < 1e-12));
    }

    #[test]
    fn values_at_origin() {
        let p = problem();
        let w = array![0.0, 0.0];
        // ‖y‖² = 1 + 9 + 25 + 49 = 84, / (2·4)
        assert!((p.objective(&w).unwrap() - 10.5).abs() < 1e-12);
        // −Xᵗy / n = −[16, 34] / 4
        let g = p.gradient(&w).unwrap();
        assert!((g[0] + 4.0).abs() < 1e-12);
        assert!((g[1] + 8.5).abs() < 1e-12);
    }

    #[test]
    fn hessian_is_gram_over_n() {
        let h = problem().hessian().unwrap();
        assert_eq!(h, array![[1.0, 1.5], [1.5, 3.5]]);
    }

    #[test]
    fn gradient_matches_finite_difference() {
        let p = problem();
        let w = array![0.3, -0.7];
        let g = p.gradient(&w).unwrap();
        let eps = 1e-6;
        for j in 0..2 {
            let mut wp = w.clone();
            let mut wm = w.clone();
            wp[j] += eps;
            wm[j] -= eps;
            let fd = (p.objective(&wp).unwrap() - p.objective(&wm).unwrap()) / (2.0 * eps);
            assert!((fd - g[j]).abs() < 1e-6);
        }
    }

    #[test]
    fn shape_mismatches_are_reported() {
        let x = array![[1.0, 0.0], [1.0, 1.0]];
        let y = array![1.0, 2.0, 3.0];
        let w = array![0.0, 0.0];
        let err = gradient(w.view(), x.view(), y.view()).unwrap_err();
        assert!(matches!(err, FedError::ShapeMismatch { expected: 2, found: 3, .. }));
        assert!(LeastSquares::new(x.clone(), y).is_err());

        let y = array![1.0, 2.0];
        let w3 = array![0.0, 0.0, 0.0];
        assert!(matches!(
            objective(w3.view(), x.view(), y.view()),
            Err(FedError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn minibatch_of_one_is_a_single_row_gradient() {
        let p = problem();
        let w = array![0.0, 0.0];
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let g = p.minibatch_gradient(&w, 1, &mut rng).unwrap();
        let rows: Vec<Vector> = (0..4)
            .map(|i| p.select_rows(&[i]).gradient(&w).unwrap())
            .collect();
        assert!(rows.iter().any(|r| r == &g));
        assert!(p.minibatch_gradient(&w, 0, &mut rng).is_err());
    }
}
