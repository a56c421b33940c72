//! Optimal (Horne) extraction.
//!
//! Uses each object's fitted spatial profile as a matched filter: per-row
//! sums weighted by inverse variance and the row-normalized profile image
//! give the variance-minimizing flux estimate. Objects without a fitted
//! profile are passed over and keep their boxcar-only spectrum. Each object
//! is a pure unit of work; the shared object-flux model image is accumulated
//! by the driver from per-object sparse updates and feeds the refined
//! variance frame.

use log::{debug, info};
use ndarray::{Array1, Array2, ArrayView2};
use rayon::prelude::*;

use crate::config::{ExtractionConfig, WavelengthMode};
use crate::error::ExtractionError;
use crate::frame::FrameSet;
use crate::geometry::{ObjectRegion, SlitGeometry};
use crate::noise::{inverse_variance, safe_inverse};
use crate::profile::{FittedProfile, ProfileFit};
use crate::specobj::{OptimalSpectrum, SpecObj};

/// Wavelengths below this are physically impossible outside pixel mode.
const WAVELENGTH_FLOOR: f64 = 1.0;

/// Result of one object's optimal extraction.
struct OptimalObjectResult {
    spectrum: OptimalSpectrum,
    /// Sparse `(row, col, value)` object-flux model contributions.
    model_updates: Vec<(usize, usize, f64)>,
}

/// Run optimal extraction for every object with a fitted profile, filling
/// each [`SpecObj::optimal`] bundle.
///
/// `profiles` must be in the same slit-major order as `specobjs`. Returns
/// the accumulated 2-D object-flux model image.
pub fn extract_optimal(
    frames: &FrameSet,
    geometry: &SlitGeometry,
    profiles: &[ProfileFit],
    specobjs: &mut [SpecObj],
    config: &ExtractionConfig,
) -> Result<Array2<f64>, ExtractionError> {
    let ivar = inverse_variance(&frames.variance.view());
    let nslit = geometry.slits.len();

    let mut jobs: Vec<(usize, u32, usize, &ObjectRegion, &FittedProfile)> = Vec::new();
    let mut idx = 0usize;
    for (s, slit) in geometry.slits.iter().enumerate() {
        for (o, region) in slit.objects.iter().enumerate() {
            match profiles[idx].fitted() {
                Some(profile) => {
                    info!(
                        "Performing optimal extraction of object {}/{} in slit {}/{}",
                        o + 1,
                        slit.objects.len(),
                        s + 1,
                        nslit
                    );
                    jobs.push((idx, slit.id, o, region, profile));
                }
                None => {
                    debug!(
                        "{}: no profile parameters, spectrum stays boxcar-only",
                        specobjs[idx].label()
                    );
                }
            }
            idx += 1;
        }
    }

    let results: Vec<Result<(usize, OptimalObjectResult), ExtractionError>> = jobs
        .into_par_iter()
        .map(|(i, slit_id, o, region, profile)| {
            optimal_object(frames, &ivar.view(), region, profile, slit_id, o, config)
                .map(|result| (i, result))
        })
        .collect();

    let mut object_model = Array2::<f64>::zeros(frames.dim());
    for result in results {
        let (i, result) = result?;
        for (row, col, value) in result.model_updates {
            object_model[[row, col]] += value;
        }
        specobjs[i].optimal = Some(result.spectrum);
    }

    Ok(object_model)
}

/// Optimally extract a single object. Pure: reads frames, geometry and the
/// profile, returns the spectrum and this object's model contributions.
fn optimal_object(
    frames: &FrameSet,
    ivar: &ArrayView2<f64>,
    region: &ObjectRegion,
    profile: &FittedProfile,
    slit_id: u32,
    object: usize,
    config: &ExtractionConfig,
) -> Result<OptimalObjectResult, ExtractionError> {
    let (nrows, ncols) = frames.dim();

    // Profile image: the fitted model evaluated where the object has weight
    // and the noise model has support, then normalized per row. Rows with
    // zero sum stay all-zero.
    let mut prof = Array2::<f64>::zeros((nrows, ncols));
    for row in 0..nrows {
        for col in 0..ncols {
            if region.object_weights[[row, col]] > 0.0 && ivar[[row, col]] > 0.0 {
                prof[[row, col]] = profile.evaluate(region.slit_position[[row, col]]);
            }
        }
    }
    for mut prof_row in prof.rows_mut() {
        let row_sum: f64 = prof_row.sum();
        if row_sum != 0.0 {
            prof_row.mapv_inplace(|p| p / row_sum);
        }
    }

    let mut wave = Array1::<f64>::zeros(nrows);
    let mut counts = Array1::<f64>::zeros(nrows);
    let mut var = Array1::<f64>::zeros(nrows);
    let mut model_updates = Vec::new();

    for row in 0..nrows {
        let mut flux_num = 0.0;
        let mut flux_den = 0.0;
        let mut wave_num = 0.0;
        let mut wave_den = 0.0;
        let mut weight_sum = 0.0;

        for col in 0..ncols {
            let p = prof[[row, col]];
            let iv = ivar[[row, col]];
            let valid = region.object_weights[[row, col]] > 0.0
                && iv > 0.0
                && frames.cr_mask[[row, col]] == 0;

            wave_num += frames.wave[[row, col]] * iv * p * p;
            wave_den += iv * p * p;

            if valid {
                flux_num += frames.science[[row, col]] * iv * p;
                flux_den += iv * p * p;
                weight_sum += p;
            }
        }

        counts[row] = if flux_den > 0.0 {
            flux_num / flux_den
        } else {
            0.0
        };
        wave[row] = if wave_den > 0.0 {
            wave_num / wave_den
        } else {
            0.0
        };

        // A physical wavelength below the floor means the wavelength
        // calibration upstream is corrupt; empty rows are exempt.
        if config.wavelength_mode != WavelengthMode::Pixel
            && wave_den > 0.0
            && wave[row] < WAVELENGTH_FLOOR
        {
            return Err(ExtractionError::WavelengthBelowFloor {
                slit: slit_id,
                object,
                row,
                value: wave[row],
            });
        }

        let opt_ivar = flux_den * safe_inverse(weight_sum);
        var[row] = if opt_ivar > 0.0 && weight_sum > 0.0 {
            safe_inverse(opt_ivar)
        } else {
            0.0
        };

        if counts[row] != 0.0 {
            for col in 0..ncols {
                let p = prof[[row, col]];
                if p != 0.0 {
                    model_updates.push((row, col, p * counts[row]));
                }
            }
        }
    }

    Ok(OptimalObjectResult {
        spectrum: OptimalSpectrum {
            wave,
            counts,
            var,
            fwhm: profile.fwhm(),
        },
        model_updates,
    })
}
