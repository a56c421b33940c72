//! Spatial profile fitting stage.
//!
//! Consumes the boxcar spectra as a signal gate and fits the configured
//! radial model to (cross-slit position, normalized flux) samples drawn from
//! each object's footprint. Objects outside the high-signal regime, and
//! objects whose fit degenerates, receive an explicit skip outcome and stay
//! boxcar-only.

use log::{debug, info, warn};
use ndarray::Array2;

use crate::config::ExtractionConfig;
use crate::error::ExtractionError;
use crate::frame::FrameSet;
use crate::geometry::{ObjectRegion, SlitGeometry};
use crate::profile::lm::{fit_radial_model, LmConfig};
use crate::profile::{
    FittedProfile, ProfileFit, ProfileKind, ProfileSamples, SkipReason, GAUSSIAN_FWHM_PER_SIGMA,
};
use crate::specobj::SpecObj;
use crate::stats::median;

/// Observer invoked on each successful profile fit.
///
/// Hook for QA plotting or diagnostics collection; the extraction core
/// itself never draws.
pub trait ProfileObserver {
    /// Called after each object's profile is fitted.
    fn on_profile(&mut self, slit: u32, object: usize, profile: &FittedProfile);
}

/// Fit spatial profiles for every traced object.
///
/// Returns one [`ProfileFit`] per object, in the same slit-major order as
/// `specobjs`. Requires the boxcar stage to have run; a missing boxcar
/// spectrum is a contract violation.
pub fn fit_object_profiles(
    frames: &FrameSet,
    geometry: &SlitGeometry,
    specobjs: &[SpecObj],
    config: &ExtractionConfig,
    mut observer: Option<&mut dyn ProfileObserver>,
) -> Result<Vec<ProfileFit>, ExtractionError> {
    let nslit = geometry.slits.len();
    let mut outcomes = Vec::with_capacity(specobjs.len());
    let mut idx = 0usize;

    for (s, slit) in geometry.slits.iter().enumerate() {
        for (o, region) in slit.objects.iter().enumerate() {
            let specobj = &specobjs[idx];
            idx += 1;

            info!(
                "Deriving spatial profile of object {}/{} in slit {}/{}",
                o + 1,
                slit.objects.len(),
                s + 1,
                nslit
            );

            let outcome = fit_one_profile(frames, region, slit.id, o, specobj, config)?;
            if let (Some(obs), ProfileFit::Fitted(profile)) = (observer.as_deref_mut(), &outcome) {
                obs.on_profile(slit.id, o, profile);
            }
            outcomes.push(outcome);
        }
    }

    Ok(outcomes)
}

fn fit_one_profile(
    frames: &FrameSet,
    region: &ObjectRegion,
    slit_id: u32,
    object: usize,
    specobj: &SpecObj,
    config: &ExtractionConfig,
) -> Result<ProfileFit, ExtractionError> {
    let spectrum = specobj
        .boxcar
        .as_ref()
        .ok_or(ExtractionError::MissingBoxcar {
            slit: slit_id,
            object,
        })?;

    let qualifying_rows = spectrum
        .counts
        .iter()
        .filter(|&&c| c > config.profile_count_floor)
        .count();

    if qualifying_rows <= config.low_signal_rows {
        debug!(
            "{}: only {qualifying_rows} rows above the count floor, far too faint to profile",
            specobj.label()
        );
        return Ok(ProfileFit::Skipped(SkipReason::LowSignal {
            qualifying_rows,
        }));
    }
    if qualifying_rows <= config.high_signal_rows {
        warn!(
            "{}: low extracted flux ({qualifying_rows} qualifying rows), not ready for optimal",
            specobj.label()
        );
        return Ok(ProfileFit::Skipped(SkipReason::MarginalSignal {
            qualifying_rows,
        }));
    }

    let (nrows, ncols) = frames.dim();
    let mut weight = region.object_weights.clone();

    // Rows touched by a cosmic ray anywhere in the footprint are dropped
    // outright; a hit inside the footprint corrupts the whole row's
    // normalized flux.
    zero_cr_rows(&mut weight, &frames.cr_mask);

    // Restrict to rows meeting the signal floor.
    for row in 0..nrows {
        if spectrum.counts[row] <= config.profile_count_floor {
            weight.row_mut(row).fill(0.0);
        }
    }

    let mut position = Vec::new();
    let mut flux = Vec::new();
    let mut fit_weight = Vec::new();
    let mut bad_positions = 0usize;
    let mut bad_fluxes = 0usize;

    for row in 0..nrows {
        let counts = spectrum.counts[row];
        for col in 0..ncols {
            if weight[[row, col]] <= 0.0 {
                continue;
            }
            let sigma = frames.variance[[row, col]].max(0.0).sqrt();
            if sigma <= 0.0 {
                continue;
            }
            let x = region.slit_position[[row, col]];
            let y = frames.science[[row, col]] / counts;
            if !x.is_finite() {
                bad_positions += 1;
                continue;
            }
            if !y.is_finite() {
                bad_fluxes += 1;
                continue;
            }
            position.push(x);
            flux.push(y);
            fit_weight.push(1.0 / sigma);
        }
    }

    if bad_positions > 0 || bad_fluxes > 0 {
        warn!(
            "{}: non-finite profile samples ({bad_positions} positions, {bad_fluxes} fluxes), \
             skipping profile fit",
            specobj.label()
        );
        return Ok(ProfileFit::Skipped(SkipReason::NonFiniteSamples {
            bad_positions,
            bad_fluxes,
        }));
    }

    if position.len() <= config.profile.n_params() {
        warn!(
            "{}: {} usable samples cannot constrain a {}-parameter profile",
            specobj.label(),
            position.len(),
            config.profile.n_params()
        );
        return Ok(ProfileFit::Skipped(SkipReason::FitFailed { iterations: 0 }));
    }

    match robust_fit(
        config.profile,
        &position,
        &flux,
        &fit_weight,
        config.clip_sigma,
    ) {
        Ok((params, rejected)) => Ok(ProfileFit::Fitted(FittedProfile {
            kind: config.profile,
            params,
            rejected,
            samples: ProfileSamples {
                position,
                flux,
                weight: fit_weight,
            },
        })),
        Err(iterations) => {
            warn!(
                "{}: profile fit did not converge after {iterations} iterations, \
                 skipping optimal extraction",
                specobj.label()
            );
            Ok(ProfileFit::Skipped(SkipReason::FitFailed { iterations }))
        }
    }
}

/// Zero every row of `weight` whose footprint contains a cosmic-ray hit.
fn zero_cr_rows(weight: &mut Array2<f64>, cr_mask: &Array2<u8>) {
    let nrows = weight.nrows();
    for row in 0..nrows {
        let hit = weight
            .row(row)
            .iter()
            .zip(cr_mask.row(row).iter())
            .any(|(&w, &cr)| w > 0.0 && cr != 0);
        if hit {
            weight.row_mut(row).fill(0.0);
        }
    }
}

/// Weighted fit with one robust rejection iteration.
///
/// Fits, rejects residual outliers beyond `clip_sigma` standard deviations
/// of the weighted residuals (all at once), and refits on the survivors.
/// Returns the coefficients and the per-sample rejection mask, or the
/// iteration count of the failed optimizer run.
fn robust_fit(
    kind: ProfileKind,
    x: &[f64],
    y: &[f64],
    w: &[f64],
    clip_sigma: f64,
) -> Result<(Vec<f64>, Vec<bool>), usize> {
    let initial = initial_guess(kind, x, y, w);
    let lm = LmConfig::default();

    let first = fit_radial_model(kind, x, y, w, &initial, &lm);
    if !first.converged {
        return Err(first.iterations);
    }

    // Weighted residuals of the first pass.
    let residuals: Vec<f64> = x
        .iter()
        .zip(y.iter())
        .zip(w.iter())
        .map(|((&xi, &yi), &wi)| wi * (yi - kind.evaluate(&first.params, xi)))
        .collect();

    let center = median(&residuals).unwrap_or(0.0);
    let std = (residuals.iter().map(|r| (r - center).powi(2)).sum::<f64>()
        / residuals.len() as f64)
        .sqrt();

    let rejected: Vec<bool> = residuals
        .iter()
        .map(|&r| std > 0.0 && (r - center).abs() > clip_sigma * std)
        .collect();

    let n_rejected = rejected.iter().filter(|&&r| r).count();
    if n_rejected == 0 {
        return Ok((first.params, rejected));
    }

    let keep_x: Vec<f64> = zip_keep(x, &rejected);
    let keep_y: Vec<f64> = zip_keep(y, &rejected);
    let keep_w: Vec<f64> = zip_keep(w, &rejected);
    if keep_x.len() <= kind.n_params() {
        return Err(first.iterations);
    }

    let second = fit_radial_model(kind, &keep_x, &keep_y, &keep_w, &first.params, &lm);
    if !second.converged {
        return Err(second.iterations);
    }

    Ok((second.params, rejected))
}

fn zip_keep(values: &[f64], rejected: &[bool]) -> Vec<f64> {
    values
        .iter()
        .zip(rejected.iter())
        .filter(|(_, &r)| !r)
        .map(|(&v, _)| v)
        .collect()
}

/// Starting point for the optimizer from sample moments.
fn initial_guess(kind: ProfileKind, x: &[f64], y: &[f64], w: &[f64]) -> Vec<f64> {
    let amp = y.iter().copied().fold(0.0f64, f64::max).max(1e-6);

    // Flux-weighted second moment of position gives a width scale.
    let mut num = 0.0;
    let mut den = 0.0;
    for ((&xi, &yi), &wi) in x.iter().zip(y.iter()).zip(w.iter()) {
        if yi > 0.0 {
            num += wi * yi * xi * xi;
            den += wi * yi;
        }
    }
    let sigma = if den > 0.0 && num > 0.0 {
        (num / den).sqrt()
    } else {
        1.0
    };

    match kind {
        ProfileKind::Gaussian => vec![amp, sigma],
        ProfileKind::Moffat => {
            let beta = 2.5;
            let fwhm = GAUSSIAN_FWHM_PER_SIGMA * sigma;
            let alpha = fwhm / (2.0 * (2.0_f64.powf(1.0 / beta) - 1.0).sqrt());
            vec![amp, alpha.max(1e-3), beta]
        }
    }
}
