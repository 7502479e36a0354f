//! Dense linear solves.

use crate::error::{FedError, Result};
use crate::tensor::{Matrix, Vector};

const PIVOT_TOL: f64 = 1e-12;

/// Solve `A x = b` by Gaussian elimination with partial pivoting.
///
/// `A` is never inverted explicitly.
pub fn solve(a: &Matrix, b: &Vector) -> Result<Vector> {
    let n = a.nrows();
    if n != a.ncols() {
        return Err(FedError::shape("linear solve (square)", n, a.ncols()));
    }
    if b.len() != n {
        return Err(FedError::shape("linear solve rhs", n, b.len()));
    }

    let mut m = a.as_standard_layout().to_owned();
    let mut x = b.clone();
    let scale = m.iter().fold(0.0f64, |acc, v| acc.max(v.abs())).max(1.0);

    for i in 0..n {
        let mut pivot_row = i;
        let mut pivot_val = m[(i, i)].abs();
        for r in (i + 1)..n {
            let val = m[(r, i)].abs();
            if val > pivot_val {
                pivot_val = val;
                pivot_row = r;
            }
        }
        if !pivot_val.is_finite() || pivot_val <= PIVOT_TOL * scale {
            return Err(FedError::numerical(format!(
                "matrix is singular (pivot {pivot_val:.3e} in column {i})"
            )));
        }
        if pivot_row != i {
            for c in 0..n {
                m.swap((i, c), (pivot_row, c));
            }
            x.swap(i, pivot_row);
        }

        for r in (i + 1)..n {
            let factor = m[(r, i)] / m[(i, i)];
            if factor == 0.0 {
                continue;
            }
            for c in i..n {
                m[(r, c)] -= factor * m[(i, c)];
            }
            x[r] -= factor * x[i];
        }
    }

    for i in (0..n).rev() {
        let mut sum = x[i];
        for c in (i + 1)..n {
            sum -= m[(i, c)] * x[c];
        }
        x[i] = sum / m[(i, i)];
    }
    Ok(x)
}
