//! Gradient clipping for bounded sensitivity.

use crate::error::{FedError, Result};
use crate::tensor::{all_finite, l2_norm, max_abs, Vector};

/// Result of a clipping operation.
#[derive(Clone, Debug, PartialEq)]
pub struct ClipReport {
    /// Original L2 norm before clipping.
    pub original_norm: f64,
    /// Whether clipping was applied.
    pub clipped: bool,
    /// Scale factor applied (1.0 if not clipped).
    pub scale: f64,
}

fn check_clip_norm(max_norm: f64) -> Result<()> {
    if max_norm.is_nan() || max_norm <= 0.0 {
        return Err(FedError::invalid(format!(
            "clip norm must be positive, got {max_norm}"
        )));
    }
    Ok(())
}

/// Clip a vector to a maximum L2 norm in-place.
///
/// The vector is scaled by `min(1, max_norm / ‖v‖)`, so it is only ever
/// shrunk. Any vector of finite entries ends within `max_norm`, even when
/// its norm does not fit in an `f64`. Zero vectors and vectors with NaN or
/// infinite entries are left as they are; the latter surface through the
/// caller's divergence check.
pub fn clip_vector(v: &mut Vector, max_norm: f64) -> Result<ClipReport> {
    check_clip_norm(max_norm)?;
    let norm = l2_norm(v.view());

    if norm.is_nan() || norm <= max_norm || !all_finite(v.view()) {
        return Ok(ClipReport {
            original_norm: norm,
            clipped: false,
            scale: 1.0,
        });
    }

    let scale = if norm.is_finite() {
        let scale = max_norm / norm;
        v.mapv_inplace(|x| x * scale);
        scale
    } else {
        // Norm beyond f64::MAX: bring the entries to unit peak first.
        let peak = max_abs(v.view());
        v.mapv_inplace(|x| x / peak);
        let unit = max_norm / l2_norm(v.view());
        v.mapv_inplace(|x| x * unit);
        unit / peak
    };
    Ok(ClipReport {
        original_norm: norm,
        clipped: true,
        scale,
    })
}

/// Return a clipped copy of `v`.
pub fn clipped(v: &Vector, max_norm: f64) -> Result<(Vector, ClipReport)> {
    let mut out = v.clone();
    let report = clip_vector(&mut out, max_norm)?;
    Ok((out, report))
}
