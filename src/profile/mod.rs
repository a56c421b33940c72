//! Spatial profile models and per-object fit outcomes.
//!
//! The profile relates an object's normalized flux to its fractional
//! cross-slit position. Two symmetric radial models are supported: a narrow
//! 2-parameter Gaussian and a wider-winged 3-parameter Moffat. Every object
//! gets an explicit [`ProfileFit`] outcome; downstream stages pattern-match
//! on it instead of probing for missing fields.

mod fit;
mod lm;

pub use fit::{fit_object_profiles, ProfileObserver};
pub use lm::{LmConfig, LmResult};

use serde::{Deserialize, Serialize};

/// Conversion from a Gaussian sigma to its full width at half maximum.
pub const GAUSSIAN_FWHM_PER_SIGMA: f64 = 2.354_820_045_030_949_3;

/// Supported spatial profile model kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileKind {
    /// `a·exp(−x²/2σ²)` with parameters `[amplitude, sigma]`.
    Gaussian,
    /// `a·(1 + x²/α²)^(−β)` with parameters `[amplitude, alpha, beta]`.
    Moffat,
}

impl ProfileKind {
    /// Number of model parameters.
    pub fn n_params(&self) -> usize {
        match self {
            ProfileKind::Gaussian => 2,
            ProfileKind::Moffat => 3,
        }
    }

    /// Evaluate the model at cross-slit position `x`.
    ///
    /// `params` must hold [`Self::n_params`] coefficients.
    pub fn evaluate(&self, params: &[f64], x: f64) -> f64 {
        match self {
            ProfileKind::Gaussian => {
                let (amp, sigma) = (params[0], params[1]);
                amp * (-x * x / (2.0 * sigma * sigma)).exp()
            }
            ProfileKind::Moffat => {
                let (amp, alpha, beta) = (params[0], params[1], params[2]);
                amp * (1.0 + x * x / (alpha * alpha)).powf(-beta)
            }
        }
    }

    /// Full width at half maximum implied by fitted coefficients, in the
    /// units of the cross-slit coordinate.
    pub fn fwhm(&self, params: &[f64]) -> f64 {
        match self {
            ProfileKind::Gaussian => GAUSSIAN_FWHM_PER_SIGMA * params[1],
            ProfileKind::Moffat => {
                let (alpha, beta) = (params[1], params[2]);
                2.0 * alpha * (2.0_f64.powf(1.0 / beta) - 1.0).sqrt()
            }
        }
    }
}

/// The raw samples a profile was fitted to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSamples {
    /// Cross-slit position of each sample.
    pub position: Vec<f64>,
    /// Normalized flux (science / boxcar counts) of each sample.
    pub flux: Vec<f64>,
    /// Fit weight (1/σ) of each sample.
    pub weight: Vec<f64>,
}

/// A successfully fitted spatial profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedProfile {
    /// Model kind that was fitted.
    pub kind: ProfileKind,
    /// Fitted coefficients, `kind.n_params()` of them.
    pub params: Vec<f64>,
    /// Per-sample robust-rejection mask; true = excluded from the final fit.
    pub rejected: Vec<bool>,
    /// The samples the fit consumed.
    pub samples: ProfileSamples,
}

impl FittedProfile {
    /// Evaluate the fitted model at cross-slit position `x`.
    pub fn evaluate(&self, x: f64) -> f64 {
        self.kind.evaluate(&self.params, x)
    }

    /// FWHM diagnostic of the fitted profile.
    pub fn fwhm(&self) -> f64 {
        self.kind.fwhm(&self.params)
    }
}

/// Why an object's profile was not fitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SkipReason {
    /// At most the low-signal row count qualified; far too faint to fit.
    LowSignal {
        /// Rows whose boxcar counts exceeded the configured floor.
        qualifying_rows: usize,
    },
    /// Between the low- and high-signal boundaries; explicitly not fitted.
    MarginalSignal {
        /// Rows whose boxcar counts exceeded the configured floor.
        qualifying_rows: usize,
    },
    /// Fit inputs contained non-finite positions or fluxes.
    NonFiniteSamples {
        /// Count of non-finite position samples.
        bad_positions: usize,
        /// Count of non-finite flux samples.
        bad_fluxes: usize,
    },
    /// The fit did not converge or its normal equations were singular.
    FitFailed {
        /// Iterations the optimizer ran before giving up.
        iterations: usize,
    },
}

/// Per-object profile outcome: a fitted model or an explicit skip.
///
/// Skipped objects keep their boxcar spectrum; the optimal extractor passes
/// over them without error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProfileFit {
    /// The profile was fitted; optimal extraction may proceed.
    Fitted(FittedProfile),
    /// The profile was not fitted, with the reason.
    Skipped(SkipReason),
}

impl ProfileFit {
    /// The fitted profile, if any.
    pub fn fitted(&self) -> Option<&FittedProfile> {
        match self {
            ProfileFit::Fitted(profile) => Some(profile),
            ProfileFit::Skipped(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_gaussian_evaluate() {
        let params = [2.0, 1.5];
        let kind = ProfileKind::Gaussian;
        assert_relative_eq!(kind.evaluate(&params, 0.0), 2.0);
        // Symmetric and monotonically falling from center.
        assert_relative_eq!(kind.evaluate(&params, 1.0), kind.evaluate(&params, -1.0));
        assert!(kind.evaluate(&params, 1.0) > kind.evaluate(&params, 2.0));
    }

    #[test]
    fn test_gaussian_fwhm() {
        let kind = ProfileKind::Gaussian;
        let fwhm = kind.fwhm(&[1.0, 2.0]);
        assert_relative_eq!(fwhm, 2.0 * GAUSSIAN_FWHM_PER_SIGMA);
        // Half maximum at half the FWHM from center.
        let half = kind.evaluate(&[1.0, 2.0], fwhm / 2.0);
        assert_relative_eq!(half, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_moffat_evaluate_and_fwhm() {
        let kind = ProfileKind::Moffat;
        let params = [3.0, 1.2, 2.5];
        assert_relative_eq!(kind.evaluate(&params, 0.0), 3.0);

        let fwhm = kind.fwhm(&params);
        let half = kind.evaluate(&params, fwhm / 2.0);
        assert_relative_eq!(half, 1.5, epsilon = 1e-12);
    }

    #[test]
    fn test_param_counts() {
        assert_eq!(ProfileKind::Gaussian.n_params(), 2);
        assert_eq!(ProfileKind::Moffat.n_params(), 3);
    }

    #[test]
    fn test_profile_fit_accessor() {
        let skipped = ProfileFit::Skipped(SkipReason::LowSignal { qualifying_rows: 4 });
        assert!(skipped.fitted().is_none());

        let fitted = ProfileFit::Fitted(FittedProfile {
            kind: ProfileKind::Gaussian,
            params: vec![1.0, 1.0],
            rejected: vec![],
            samples: ProfileSamples {
                position: vec![],
                flux: vec![],
                weight: vec![],
            },
        });
        assert!(fitted.fitted().is_some());
    }
}
