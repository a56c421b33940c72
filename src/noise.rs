//! Noise model: safe inverse variance and variance-frame refinement.
//!
//! Inverse variance is the statistical weight used throughout extraction.
//! The safe-inverse rule maps non-positive variance to exactly zero weight,
//! so masked or degenerate pixels drop out of weighted sums instead of
//! injecting infinities.

use ndarray::{Array1, Array2, ArrayView2};

/// Safe scalar inverse: `1/v` where `v > 0`, else exactly 0.
pub fn safe_inverse(value: f64) -> f64 {
    if value > 0.0 {
        1.0 / value
    } else {
        0.0
    }
}

/// Inverse-variance frame from a variance frame.
///
/// Finite everywhere, strictly positive where variance is positive, exactly
/// zero elsewhere (including NaN variance).
pub fn inverse_variance(variance: &ArrayView2<f64>) -> Array2<f64> {
    variance.mapv(safe_inverse)
}

/// Per-row safe inverse of a 1-D array.
pub fn inverse_variance_1d(variance: &Array1<f64>) -> Array1<f64> {
    variance.mapv(safe_inverse)
}

/// Refined variance frame from the sky frame and the accumulated
/// object-flux model.
///
/// Recombines the extraction's object model with the sky estimate and the
/// detector read noise: `|object + sky − √2·rn + rn²|` per pixel. Feeding
/// this back as the variance frame of a second extraction pass sharpens the
/// optimal weights; a single pass is the default.
pub fn model_variance(
    sky: &ArrayView2<f64>,
    object_model: &ArrayView2<f64>,
    read_noise: f64,
) -> Array2<f64> {
    let rn_term = read_noise * read_noise - std::f64::consts::SQRT_2 * read_noise;
    let mut var = sky + object_model;
    var.mapv_inplace(|v| (v + rn_term).abs());
    var
}
