//! Vector and matrix types plus low-level operations.

use ndarray::{Array1, Array2, ArrayView1};

/// Weight or gradient vector.
pub type Vector = Array1<f64>;

/// Row-major design matrix (one row per example).
pub type Matrix = Array2<f64>;

/// Compute L2 norm of a vector, handling NaN/inf.
///
/// Finite entries whose squares overflow are rescaled by the largest
/// magnitude, so the result is only infinite when the norm itself exceeds
/// `f64::MAX` or an entry is infinite.
pub fn l2_norm(v: ArrayView1<'_, f64>) -> f64 {
    let mut sum_sq: f64 = 0.0;
    let mut peak: f64 = 0.0;
    for &x in v.iter() {
        if x.is_nan() {
            return f64::NAN;
        }
        if !x.is_finite() {
            return f64::INFINITY;
        }
        sum_sq += x * x;
        peak = peak.max(x.abs());
    }
    if sum_sq.is_finite() {
        return sum_sq.sqrt();
    }
    let scaled: f64 = v.iter().map(|&x| (x / peak).powi(2)).sum();
    peak * scaled.sqrt()
}

/// Largest absolute entry, or 0 for an empty vector.
pub fn max_abs(v: ArrayView1<'_, f64>) -> f64 {
    v.iter().fold(0.0, |acc: f64, &x| acc.max(x.abs()))
}

/// Element-wise mean of equally sized vectors.
///
/// Returns `None` when `vectors` is empty or the lengths disagree.
pub fn mean_vector<'a, I>(vectors: I) -> Option<Vector>
where
    I: IntoIterator<Item = &'a Vector>,
{
    let mut iter = vectors.into_iter();
    let first = iter.next()?;
    let mut sum = first.clone();
    let mut count = 1usize;
    for v in iter {
        if v.len() != sum.len() {
            return None;
        }
        sum += v;
        count += 1;
    }
    sum /= count as f64;
    Some(sum)
}

/// True when every entry is finite.
pub fn all_finite(v: ArrayView1<'_, f64>) -> bool {
    v.iter().all(|x| x.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_l2_norm() {
        let v = array![3.0, 4.0];
        assert!((l2_norm(v.view()) - 5.0).abs() < 1e-10);
    }

    #[test]
    fn test_l2_norm_nan() {
        let v = array![1.0, f64::NAN, 2.0];
        assert!(l2_norm(v.view()).is_nan());
    }

    #[test]
    fn test_l2_norm_inf() {
        let v = array![1.0, f64::NEG_INFINITY];
        assert_eq!(l2_norm(v.view()), f64::INFINITY);
    }

    #[test]
    fn l2_norm_survives_overflowing_squares() {
        let v = array![1e200, -1e200, 3.0];
        let norm = l2_norm(v.view());
        assert!(norm.is_finite());
        assert!((norm / (2f64.sqrt() * 1e200) - 1.0).abs() < 1e-12);
        assert_eq!(max_abs(v.view()), 1e200);
    }

    #[test]
    fn mean_vector_averages_elementwise() {
        let vs = vec![array![1.0, 2.0], array![3.0, 6.0]];
        let m = mean_vector(&vs).expect("non-empty");
        assert_eq!(m, array![2.0, 4.0]);
    }

    #[test]
    fn mean_vector_rejects_ragged_input() {
        let vs = vec![array![1.0, 2.0], array![3.0]];
        assert!(mean_vector(&vs).is_none());
        assert!(mean_vector(&Vec::<Vector>::new()).is_none());
    }
}
