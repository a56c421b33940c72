//! Robust statistics used by the extraction stages.
//!
//! Provides the NaN-tolerant median, iterative sigma clipping along the
//! cross-dispersion axis, and the weighted linear least-squares fit used by
//! the boxcar background model.

use thiserror::Error;

/// Errors from statistical helpers on degenerate inputs.
#[derive(Error, Debug)]
pub enum StatsError {
    /// No valid (non-NaN) samples remained.
    #[error("no valid samples: {total} values, all NaN or empty")]
    EmptySample {
        /// Number of input values before filtering.
        total: usize,
    },
}

/// Median of a slice, filtering NaN values.
///
/// Infinite values participate; for even-length data the two middle values
/// are averaged.
pub fn median(values: &[f64]) -> Result<f64, StatsError> {
    let mut valid: Vec<f64> = values.iter().filter(|v| !v.is_nan()).copied().collect();

    if valid.is_empty() {
        return Err(StatsError::EmptySample {
            total: values.len(),
        });
    }

    valid.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let mid = valid.len() / 2;
    if valid.len() % 2 == 0 {
        Ok((valid[mid - 1] + valid[mid]) / 2.0)
    } else {
        Ok(valid[mid])
    }
}

/// Iterative median-centered sigma clip over one row of samples.
///
/// `keep` marks the samples eligible on entry and is narrowed in place:
/// each pass computes the median and standard deviation of the surviving
/// samples and rejects those further than `sigma` standard deviations from
/// the median, until no sample is rejected or `max_iters` passes have run.
///
/// Degenerate rows (fewer than 2 survivors, or zero spread) are left as-is.
pub fn sigma_clip(values: &[f64], keep: &mut [bool], sigma: f64, max_iters: usize) {
    debug_assert_eq!(values.len(), keep.len());

    for _ in 0..max_iters {
        let kept: Vec<f64> = values
            .iter()
            .zip(keep.iter())
            .filter(|(v, &k)| k && v.is_finite())
            .map(|(&v, _)| v)
            .collect();
        if kept.len() < 2 {
            return;
        }

        let center = match median(&kept) {
            Ok(m) => m,
            Err(_) => return,
        };
        let var = kept.iter().map(|v| (v - center).powi(2)).sum::<f64>() / kept.len() as f64;
        let std = var.sqrt();
        if std <= 0.0 {
            return;
        }

        let mut rejected_any = false;
        for (i, &v) in values.iter().enumerate() {
            if keep[i] && (!v.is_finite() || (v - center).abs() > sigma * std) {
                keep[i] = false;
                rejected_any = true;
            }
        }
        if !rejected_any {
            return;
        }
    }
}

/// Weighted linear least-squares fit `y ≈ c0 + c1·x`.
///
/// Samples with non-positive weight or non-finite values are ignored.
/// Returns `(c0, c1)`. Degenerate inputs degrade rather than fail: with a
/// single usable sample the fit is the flat line through it, with none it is
/// zero, and singular normal equations fall back to the weighted mean.
pub fn weighted_linear_fit(x: &[f64], y: &[f64], w: &[f64]) -> (f64, f64) {
    debug_assert_eq!(x.len(), y.len());
    debug_assert_eq!(x.len(), w.len());

    let mut sw = 0.0;
    let mut swx = 0.0;
    let mut swy = 0.0;
    let mut swxx = 0.0;
    let mut swxy = 0.0;
    let mut n_used = 0usize;

    for i in 0..x.len() {
        let wi = w[i];
        if wi <= 0.0 || !x[i].is_finite() || !y[i].is_finite() {
            continue;
        }
        sw += wi;
        swx += wi * x[i];
        swy += wi * y[i];
        swxx += wi * x[i] * x[i];
        swxy += wi * x[i] * y[i];
        n_used += 1;
    }

    if n_used == 0 || sw <= 0.0 {
        return (0.0, 0.0);
    }
    if n_used == 1 {
        return (swy / sw, 0.0);
    }

    let det = sw * swxx - swx * swx;
    if det.abs() < f64::EPSILON * sw * sw {
        // All x identical: flat line at the weighted mean.
        return (swy / sw, 0.0);
    }

    let c1 = (sw * swxy - swx * swy) / det;
    let c0 = (swy - c1 * swx) / sw;
    (c0, c1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_median_odd_even() {
        assert_relative_eq!(median(&[3.0, 1.0, 2.0]).unwrap(), 2.0);
        assert_relative_eq!(median(&[4.0, 1.0, 2.0, 3.0]).unwrap(), 2.5);
    }

    #[test]
    fn test_median_filters_nan() {
        let vals = [f64::NAN, 5.0, 1.0, f64::NAN, 3.0];
        assert_relative_eq!(median(&vals).unwrap(), 3.0);
    }

    #[test]
    fn test_median_all_nan_errors() {
        let vals = [f64::NAN, f64::NAN];
        assert!(matches!(
            median(&vals),
            Err(StatsError::EmptySample { total: 2 })
        ));
    }

    #[test]
    fn test_sigma_clip_rejects_outlier() {
        // Mild alternating scatter about 10, one gross outlier.
        let mut values: Vec<f64> = (0..20)
            .map(|i| if i % 2 == 0 { 9.9 } else { 10.1 })
            .collect();
        values[13] = 1000.0;
        let mut keep = vec![true; 20];

        sigma_clip(&values, &mut keep, 3.0, 5);

        assert!(!keep[13], "gross outlier should be rejected");
        assert_eq!(
            keep.iter().filter(|&&k| k).count(),
            19,
            "mild scatter should survive"
        );
    }

    #[test]
    fn test_sigma_clip_uniform_data_untouched() {
        let values = vec![5.0; 10];
        let mut keep = vec![true; 10];
        sigma_clip(&values, &mut keep, 3.0, 5);
        assert!(keep.iter().all(|&k| k));
    }

    #[test]
    fn test_sigma_clip_respects_initial_mask() {
        let values = vec![1.0, 2.0, 3.0, 4.0];
        let mut keep = vec![true, false, true, true];
        sigma_clip(&values, &mut keep, 3.0, 5);
        assert!(!keep[1], "pre-masked sample must stay masked");
    }

    #[test]
    fn test_weighted_linear_fit_recovers_line() {
        let x: Vec<f64> = (0..10).map(|i| i as f64 / 9.0).collect();
        let y: Vec<f64> = x.iter().map(|&xi| 2.0 + 3.0 * xi).collect();
        let w = vec![1.0; 10];

        let (c0, c1) = weighted_linear_fit(&x, &y, &w);
        assert_relative_eq!(c0, 2.0, epsilon = 1e-10);
        assert_relative_eq!(c1, 3.0, epsilon = 1e-10);
    }

    #[test]
    fn test_weighted_linear_fit_ignores_zero_weight() {
        let x = vec![0.0, 0.5, 1.0];
        let y = vec![1.0, 1.0, 100.0];
        let w = vec![1.0, 1.0, 0.0];

        let (c0, c1) = weighted_linear_fit(&x, &y, &w);
        assert_relative_eq!(c0, 1.0, epsilon = 1e-10);
        assert_relative_eq!(c1, 0.0, epsilon = 1e-10);
    }

    #[test]
    fn test_weighted_linear_fit_degenerate() {
        assert_eq!(weighted_linear_fit(&[], &[], &[]), (0.0, 0.0));

        // Single sample: flat line through it.
        let (c0, c1) = weighted_linear_fit(&[0.3], &[7.0], &[2.0]);
        assert_relative_eq!(c0, 7.0);
        assert_relative_eq!(c1, 0.0);

        // Identical abscissae: weighted mean, no slope.
        let (c0, c1) = weighted_linear_fit(&[0.5, 0.5], &[2.0, 4.0], &[1.0, 1.0]);
        assert_relative_eq!(c0, 3.0);
        assert_relative_eq!(c1, 0.0);
    }
}
