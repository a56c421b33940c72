//! Boxcar extraction with local background re-fitting.
//!
//! For each traced object the stage re-fits a smooth background across the
//! object's slit from the background-region pixels, subtracts it, and sums
//! science/variance across the cross-dispersion footprint using the object
//! weights as the summation kernel. Wavelength and sky are weighted means;
//! flux and variance are weighted sums. Each object is an independent, pure
//! unit of work; the shared background-correction image is assembled by the
//! driver from per-object sparse updates.

use log::{info, warn};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rayon::prelude::*;

use crate::config::ExtractionConfig;
use crate::error::ExtractionError;
use crate::flags;
use crate::frame::FrameSet;
use crate::geometry::{ObjectRegion, SlitGeometry};
use crate::specobj::{BoxcarSpectrum, SpecObj};
use crate::stats::{median, sigma_clip, weighted_linear_fit};

/// Result of one object's boxcar extraction.
struct BoxcarObjectResult {
    spectrum: BoxcarSpectrum,
    /// Sparse `(row, col, value)` background-correction updates within this
    /// object's footprint.
    background_updates: Vec<(usize, usize, f64)>,
}

/// Run boxcar extraction for every traced object, filling each
/// [`SpecObj::boxcar`] bundle.
///
/// Returns the shared background-correction image, merged from the
/// per-object updates. Object footprints are expected to be disjoint; a
/// later update to the same pixel overwrites an earlier one.
pub fn extract_boxcar(
    frames: &FrameSet,
    geometry: &SlitGeometry,
    specobjs: &mut [SpecObj],
    config: &ExtractionConfig,
) -> Result<Array2<f64>, ExtractionError> {
    let nslit = geometry.slits.len();

    // Collect per-object jobs, validating traces up front: a stored trace
    // that disagrees with the geometry means the record and the geometry
    // come from different reductions.
    let mut jobs: Vec<(usize, u32, &ObjectRegion)> = Vec::with_capacity(specobjs.len());
    let mut idx = 0usize;
    for (s, slit) in geometry.slits.iter().enumerate() {
        for (o, region) in slit.objects.iter().enumerate() {
            let specobj = &specobjs[idx];
            if !specobj.check_trace(&region.trace.view()) {
                return Err(ExtractionError::TraceMismatch {
                    slit: slit.id,
                    object: o,
                });
            }
            info!(
                "Performing boxcar extraction of object {}/{} in slit {}/{}",
                o + 1,
                slit.objects.len(),
                s + 1,
                nslit
            );
            jobs.push((idx, slit.id, region));
            idx += 1;
        }
    }

    let slit_map = geometry.slit_map.view();
    let results: Vec<(usize, BoxcarObjectResult)> = jobs
        .into_par_iter()
        .map(|(i, slit_id, region)| {
            (i, boxcar_object(frames, &slit_map, region, slit_id, config))
        })
        .collect();

    let mut background_correction = Array2::zeros(frames.dim());
    for (i, result) in results {
        for (row, col, value) in result.background_updates {
            background_correction[[row, col]] = value;
        }
        specobjs[i].boxcar = Some(result.spectrum);
    }

    Ok(background_correction)
}

/// Boxcar-extract a single object. Pure: reads frames and geometry, returns
/// the spectrum and this object's background-correction updates.
fn boxcar_object(
    frames: &FrameSet,
    slit_map: &ArrayView2<u32>,
    region: &ObjectRegion,
    slit_id: u32,
    config: &ExtractionConfig,
) -> BoxcarObjectResult {
    let (nrows, ncols) = frames.dim();

    // Background-eligibility weights: in this slit, carrying background
    // weight, and clear of cosmic rays.
    let mut bg_weight = Array2::<f64>::zeros((nrows, ncols));
    for row in 0..nrows {
        for col in 0..ncols {
            if slit_map[[row, col]] != slit_id {
                continue;
            }
            let w = region.background_weights[[row, col]]
                * (1.0 - f64::from(frames.cr_mask[[row, col]]));
            if w > 0.0 {
                bg_weight[[row, col]] = w;
            }
        }
    }

    let background = fit_background(
        &frames.science.view(),
        &bg_weight.view(),
        config.clip_sigma,
        config.background_fit_order,
    );

    // Summation kernel: object weights restricted to this slit.
    let mut weight = Array2::<f64>::zeros((nrows, ncols));
    for row in 0..nrows {
        for col in 0..ncols {
            if slit_map[[row, col]] == slit_id {
                weight[[row, col]] = region.object_weights[[row, col]];
            }
        }
    }

    let mut wave = Array1::<f64>::zeros(nrows);
    let mut counts = Array1::<f64>::zeros(nrows);
    let mut var = Array1::<f64>::zeros(nrows);
    let mut sky = Array1::<f64>::zeros(nrows);
    let mut mask = Array1::<u32>::zeros(nrows);

    for row in 0..nrows {
        let mut sum_w = 0.0;
        let mut sum_wave = 0.0;
        let mut sum_sky = 0.0;
        let mut sum_sci = 0.0;
        let mut sum_var = 0.0;
        let mut bad_hit = false;
        let mut cr_hit = false;

        let mut nonfinite_hit = false;

        for col in 0..ncols {
            let w = weight[[row, col]];
            if w <= 0.0 {
                continue;
            }
            let bad = frames.bad_pixel[[row, col]] != 0;
            let cr = frames.cr_mask[[row, col]] != 0;
            let sci = frames.science[[row, col]] - background[[row, col]];
            let finite = sci.is_finite() && frames.variance[[row, col]].is_finite();
            bad_hit |= bad;
            cr_hit |= cr;
            nonfinite_hit |= !finite;
            // Masked pixels carry their flag but contribute zero to every
            // weighted sum.
            if bad || cr || !finite {
                continue;
            }
            sum_w += w;
            sum_wave += frames.wave[[row, col]] * w;
            sum_sky += frames.sky[[row, col]] * w;
            sum_sci += sci * w;
            sum_var += frames.variance[[row, col]] * w;
        }

        // Zero-weight rows contribute nothing; never divide by zero.
        if sum_w > 0.0 {
            wave[row] = sum_wave / sum_w;
            sky[row] = sum_sky / sum_w;
        }
        counts[row] = sum_sci;
        var[row] = sum_var;

        if bad_hit {
            mask[row] |= flags::BAD_PIXEL;
        }
        if cr_hit {
            mask[row] |= flags::COSMIC_RAY;
        }
        if nonfinite_hit || !counts[row].is_finite() {
            mask[row] |= flags::NON_FINITE;
        }
        if !counts[row].is_finite() {
            counts[row] = 0.0;
            var[row] = 0.0;
            sky[row] = 0.0;
        }
    }

    if mask.iter().any(|&m| flags::has_flag(m, flags::NON_FINITE)) {
        warn!("non-finite summed flux in boxcar extraction; affected rows flagged and zeroed");
    }

    // Background-correction updates: every in-slit pixel carrying object or
    // background weight receives the fitted background value.
    let mut background_updates = Vec::new();
    for row in 0..nrows {
        for col in 0..ncols {
            if slit_map[[row, col]] != slit_id {
                continue;
            }
            if region.object_weights[[row, col]] + region.background_weights[[row, col]] > 0.0 {
                background_updates.push((row, col, background[[row, col]]));
            }
        }
    }

    let size = extraction_width(&weight.view());

    BoxcarObjectResult {
        spectrum: BoxcarSpectrum {
            wave,
            counts,
            var,
            sky,
            mask,
            size,
        },
        background_updates,
    }
}

/// Fit the local background model: per dispersion row, a robust low-order
/// polynomial of science counts against the normalized column coordinate.
///
/// Eligible pixels are first sigma-clipped along the row to suppress
/// unflagged outliers. Rows without usable pixels produce a zero background.
fn fit_background(
    science: &ArrayView2<f64>,
    bg_weight: &ArrayView2<f64>,
    clip_sigma: f64,
    order: usize,
) -> Array2<f64> {
    let (nrows, ncols) = science.dim();
    let span = if ncols > 1 { (ncols - 1) as f64 } else { 1.0 };
    let xcoord: Vec<f64> = (0..ncols).map(|c| c as f64 / span).collect();

    let mut background = Array2::<f64>::zeros((nrows, ncols));
    let mut values = vec![0.0f64; ncols];
    let mut keep = vec![false; ncols];
    let mut fit_w = vec![0.0f64; ncols];

    for row in 0..nrows {
        let mut any = false;
        for col in 0..ncols {
            values[col] = science[[row, col]];
            keep[col] = bg_weight[[row, col]] > 0.0;
            any |= keep[col];
        }
        if !any {
            continue;
        }

        sigma_clip(&values, &mut keep, clip_sigma, 5);

        for col in 0..ncols {
            fit_w[col] = if keep[col] {
                bg_weight[[row, col]]
            } else {
                0.0
            };
        }

        let (c0, c1) = if order == 0 {
            let sw: f64 = fit_w.iter().sum();
            let swy: f64 = fit_w
                .iter()
                .zip(values.iter())
                .map(|(&w, &v)| w * v)
                .sum();
            if sw > 0.0 {
                (swy / sw, 0.0)
            } else {
                (0.0, 0.0)
            }
        } else {
            weighted_linear_fit(&xcoord, &values, &fit_w)
        };

        for col in 0..ncols {
            background[[row, col]] = c0 + c1 * xcoord[col];
        }
    }

    background
}

/// Median spatial extraction width: per row the max−min column index among
/// unit-weight pixels, then the median across rows carrying any.
fn extraction_width(weight: &ArrayView2<f64>) -> f64 {
    let mut spans = Vec::new();
    for row in weight.rows() {
        let mut min_col: Option<usize> = None;
        let mut max_col = 0usize;
        for (col, &w) in row.iter().enumerate() {
            if w == 1.0 {
                if min_col.is_none() {
                    min_col = Some(col);
                }
                max_col = col;
            }
        }
        if let Some(min) = min_col {
            spans.push((max_col - min) as f64);
        }
    }
    median(&spans).unwrap_or(0.0)
}

/// Plain boxcar down a given center trace: the 5-pixel average around the
/// center column of each dispersion row. Used to pull a quick spectrum down
/// the middle of a slit (arc frames, alignment checks).
pub fn boxcar_center(image: &ArrayView2<f64>, centers: &ArrayView1<f64>) -> Array1<f64> {
    let (nrows, ncols) = image.dim();
    assert!(ncols >= 5, "image must span at least 5 columns");
    debug_assert_eq!(centers.len(), nrows);

    let mut spectrum = Array1::<f64>::zeros(nrows);
    for row in 0..nrows {
        let center = centers[row].round() as isize;
        let center = center.clamp(2, ncols as isize - 3) as usize;
        let mut sum = 0.0;
        for col in (center - 2)..=(center + 2) {
            sum += image[[row, col]];
        }
        spectrum[row] = sum / 5.0;
    }
    spectrum
}
