//! End-to-end extraction scenarios through the public pipeline API.

use approx::assert_relative_eq;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use slitspec::{
    flags, run_extraction, ExtractionConfig, ExtractionError, FrameSet, ObjectRegion, ProfileFit,
    SkipReason, Slit, SlitGeometry, WavelengthMode,
};

/// Frames with constant science counts and variance, one slit covering the
/// whole detector.
fn constant_frames(dim: (usize, usize), science: f64, variance: f64) -> FrameSet {
    FrameSet::new(
        Array2::from_elem(dim, science),
        Array2::from_elem(dim, variance),
        Array2::zeros(dim),
        Array2::from_elem(dim, 5500.0),
        Array2::zeros(dim),
        Array2::zeros(dim),
    )
    .unwrap()
}

/// Geometry with a single object of unit weights on the given columns.
fn column_geometry(dim: (usize, usize), obj_cols: std::ops::RangeInclusive<usize>) -> SlitGeometry {
    let center = (*obj_cols.start() + *obj_cols.end()) as f64 / 2.0;
    let object_weights = Array2::from_shape_fn(dim, |(_, col)| {
        if obj_cols.contains(&col) {
            1.0
        } else {
            0.0
        }
    });
    SlitGeometry {
        slit_map: Array2::ones(dim),
        slits: vec![Slit {
            id: 1,
            objects: vec![ObjectRegion {
                object_weights,
                background_weights: Array2::zeros(dim),
                trace: Array1::from_elem(dim.0, center),
                slit_position: Array2::from_shape_fn(dim, |(_, col)| col as f64 - center),
            }],
        }],
    }
}

/// A tall frame with a noisy Gaussian object bright enough for the
/// high-signal regime.
fn noisy_gaussian_setup(nrows: usize, seed: u64) -> (FrameSet, SlitGeometry) {
    let ncols = 15;
    let dim = (nrows, ncols);
    let center = 7.0;
    let (amp, sigma) = (300.0, 1.3);
    let noise_sigma = 2.0;

    let mut rng = StdRng::seed_from_u64(seed);
    let science = Array2::from_shape_fn(dim, |(_, col)| {
        let x = col as f64 - center;
        let signal = amp * (-x * x / (2.0 * sigma * sigma)).exp();
        // Box-Muller pair from two uniform draws.
        let u1: f64 = rng.gen_range(1e-12..1.0);
        let u2: f64 = rng.gen_range(0.0..1.0);
        let gauss = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        signal + noise_sigma * gauss
    });

    let frames = FrameSet::new(
        science,
        Array2::from_elem(dim, noise_sigma * noise_sigma),
        Array2::from_elem(dim, 1.5),
        Array2::from_shape_fn(dim, |(row, _)| 4500.0 + 0.5 * row as f64),
        Array2::zeros(dim),
        Array2::zeros(dim),
    )
    .unwrap();

    (frames, column_geometry(dim, 3..=11))
}

#[test]
fn scenario_constant_footprint() {
    // Constant 100 counts, variance 25, 3-column unit footprint: flux 300,
    // variance 75, clean mask in every row.
    let dim = (5, 6);
    let frames = constant_frames(dim, 100.0, 25.0);
    let geometry = column_geometry(dim, 1..=3);

    let result = run_extraction(&frames, &geometry, &ExtractionConfig::default()).unwrap();
    let boxcar = result.spec_objs[0].boxcar.as_ref().unwrap();

    for row in 0..dim.0 {
        assert_relative_eq!(boxcar.counts[row], 300.0, epsilon = 1e-10);
        assert_relative_eq!(boxcar.var[row], 75.0, epsilon = 1e-10);
        assert_eq!(boxcar.mask[row], 0);
    }
}

#[test]
fn scenario_cosmic_ray_in_footprint() {
    let dim = (5, 6);
    let mut frames = constant_frames(dim, 100.0, 25.0);
    frames.cr_mask[[2, 2]] = 1;
    let geometry = column_geometry(dim, 1..=3);

    let result = run_extraction(&frames, &geometry, &ExtractionConfig::default()).unwrap();
    let boxcar = result.spec_objs[0].boxcar.as_ref().unwrap();

    assert!(flags::has_flag(boxcar.mask[2], flags::COSMIC_RAY));
    assert_relative_eq!(boxcar.counts[2], 200.0, epsilon = 1e-10);
    assert_eq!(boxcar.mask[1], 0);
    assert_relative_eq!(boxcar.counts[1], 300.0, epsilon = 1e-10);
}

#[test]
fn scenario_low_signal_object_stays_boxcar_only() {
    // Only 8 rows carry flux above the 25-count floor; the profile stage
    // must skip and the optimal stage must leave the object untouched.
    let dim = (20, 6);
    let mut science = Array2::from_elem(dim, 1.0);
    for row in 0..8 {
        for col in 1..=3 {
            science[[row, col]] = 50.0;
        }
    }
    let frames = FrameSet::new(
        science,
        Array2::from_elem(dim, 4.0),
        Array2::zeros(dim),
        Array2::from_elem(dim, 5000.0),
        Array2::zeros(dim),
        Array2::zeros(dim),
    )
    .unwrap();
    let geometry = column_geometry(dim, 1..=3);

    let result = run_extraction(&frames, &geometry, &ExtractionConfig::default()).unwrap();

    assert!(matches!(
        result.profiles[0],
        ProfileFit::Skipped(SkipReason::LowSignal { qualifying_rows: 8 })
    ));
    let obj = &result.spec_objs[0];
    assert!(obj.boxcar.is_some());
    assert!(obj.optimal.is_none());
}

#[test]
fn scenario_marginal_signal_explicitly_skipped() {
    // 40 qualifying rows: between the low and high boundaries.
    let dim = (60, 6);
    let mut science = Array2::from_elem(dim, 1.0);
    for row in 0..40 {
        for col in 1..=3 {
            science[[row, col]] = 50.0;
        }
    }
    let frames = FrameSet::new(
        science,
        Array2::from_elem(dim, 4.0),
        Array2::zeros(dim),
        Array2::from_elem(dim, 5000.0),
        Array2::zeros(dim),
        Array2::zeros(dim),
    )
    .unwrap();
    let geometry = column_geometry(dim, 1..=3);

    let result = run_extraction(&frames, &geometry, &ExtractionConfig::default()).unwrap();

    assert!(matches!(
        result.profiles[0],
        ProfileFit::Skipped(SkipReason::MarginalSignal {
            qualifying_rows: 40
        })
    ));
    assert!(result.spec_objs[0].optimal.is_none());
}

#[test]
fn scenario_zero_ivar_row_yields_zero_wavelength() {
    let (mut frames, geometry) = noisy_gaussian_setup(130, 7);
    // Row 60 loses all noise-model support.
    for col in 0..frames.ncols() {
        frames.variance[[60, col]] = 0.0;
    }

    let result = run_extraction(&frames, &geometry, &ExtractionConfig::default()).unwrap();
    let optimal = result.spec_objs[0]
        .optimal
        .as_ref()
        .expect("bright object should be optimally extracted");

    assert_eq!(optimal.wave[60], 0.0);
    assert_eq!(optimal.counts[60], 0.0);
    assert!(optimal.wave.iter().all(|w| w.is_finite()));
}

#[test]
fn bright_object_full_pass_recovers_flux_and_width() {
    let (frames, geometry) = noisy_gaussian_setup(200, 42);
    let result = run_extraction(&frames, &geometry, &ExtractionConfig::default()).unwrap();

    let profile = result.profiles[0]
        .fitted()
        .expect("high-signal object should get a fitted profile");
    // True sigma is 1.3; the fit sees the pixel-sampled, noisy profile.
    assert_relative_eq!(profile.params[1], 1.3, max_relative = 0.15);

    let optimal = result.spec_objs[0].optimal.as_ref().unwrap();
    let boxcar = result.spec_objs[0].boxcar.as_ref().unwrap();

    // Optimal and boxcar flux agree on average for a well-matched profile.
    let mean_opt: f64 = optimal.counts.iter().sum::<f64>() / optimal.counts.len() as f64;
    let mean_box: f64 = boxcar.counts.iter().sum::<f64>() / boxcar.counts.len() as f64;
    assert_relative_eq!(mean_opt, mean_box, max_relative = 0.05);

    // Wavelengths reproduce the input ramp.
    assert_relative_eq!(optimal.wave[0], 4500.0, max_relative = 1e-10);
    assert_relative_eq!(optimal.wave[199], 4599.5, max_relative = 1e-10);

    assert!(result.refined_variance.iter().all(|&v| v >= 0.0));
}

#[test]
fn all_zero_object_weights_extract_cleanly() {
    let dim = (12, 8);
    let frames = constant_frames(dim, 80.0, 16.0);
    let mut geometry = column_geometry(dim, 2..=4);
    geometry.slits[0].objects[0].object_weights.fill(0.0);

    let result = run_extraction(&frames, &geometry, &ExtractionConfig::default()).unwrap();
    let boxcar = result.spec_objs[0].boxcar.as_ref().unwrap();

    assert!(boxcar.counts.iter().all(|&c| c == 0.0));
    assert!(boxcar.var.iter().all(|&v| v == 0.0));
    assert!(result.spec_objs[0].optimal.is_none());
}

#[test]
fn rerun_is_bit_identical() {
    let (frames, geometry) = noisy_gaussian_setup(150, 99);
    let cfg = ExtractionConfig::default();

    let first = run_extraction(&frames, &geometry, &cfg).unwrap();
    let second = run_extraction(&frames, &geometry, &cfg).unwrap();

    let a = first.spec_objs[0].boxcar.as_ref().unwrap();
    let b = second.spec_objs[0].boxcar.as_ref().unwrap();
    assert_eq!(a.counts, b.counts);
    assert_eq!(a.var, b.var);
    assert_eq!(a.wave, b.wave);
    assert_eq!(a.mask, b.mask);
    assert_eq!(first.background_correction, second.background_correction);
    assert_eq!(first.object_model, second.object_model);
    assert_eq!(first.refined_variance, second.refined_variance);
}

#[test]
fn pixel_mode_disables_wavelength_floor() {
    let (mut frames, geometry) = noisy_gaussian_setup(130, 3);
    // A pixel-index wavelength frame: row numbers, starting at 0.
    frames.wave = Array2::from_shape_fn(frames.dim(), |(row, _)| row as f64);

    let calibrated = run_extraction(&frames, &geometry, &ExtractionConfig::default());
    assert!(matches!(
        calibrated,
        Err(ExtractionError::WavelengthBelowFloor { .. })
    ));

    let pixel_cfg = ExtractionConfig {
        wavelength_mode: WavelengthMode::Pixel,
        ..ExtractionConfig::default()
    };
    let pixel = run_extraction(&frames, &geometry, &pixel_cfg).unwrap();
    assert!(pixel.spec_objs[0].optimal.is_some());
}

#[test]
fn two_slits_extract_independently() {
    // Two slits side by side, each with its own object; the background
    // correction and model images must stay within each slit's footprint.
    let dim = (130, 16);
    let mut rng = StdRng::seed_from_u64(11);
    let science = Array2::from_shape_fn(dim, |(_, col)| {
        let center = if col < 8 { 3.0 } else { 11.0 };
        let x = col as f64 - center;
        let noise: f64 = rng.gen_range(-0.5..0.5);
        200.0 * (-x * x / 2.0).exp() + noise
    });
    let frames = FrameSet::new(
        science,
        Array2::from_elem(dim, 1.0),
        Array2::zeros(dim),
        Array2::from_elem(dim, 5000.0),
        Array2::zeros(dim),
        Array2::zeros(dim),
    )
    .unwrap();

    let slit_map = Array2::from_shape_fn(dim, |(_, col)| if col < 8 { 1u32 } else { 2u32 });
    let make_slit = |id: u32, center: f64, cols: std::ops::RangeInclusive<usize>| Slit {
        id,
        objects: vec![ObjectRegion {
            object_weights: Array2::from_shape_fn(dim, |(_, col)| {
                if cols.contains(&col) {
                    1.0
                } else {
                    0.0
                }
            }),
            background_weights: Array2::zeros(dim),
            trace: Array1::from_elem(dim.0, center),
            slit_position: Array2::from_shape_fn(dim, |(_, col)| col as f64 - center),
        }],
    };
    let geometry = SlitGeometry {
        slit_map,
        slits: vec![make_slit(1, 3.0, 0..=6), make_slit(2, 11.0, 8..=14)],
    };

    let result = run_extraction(&frames, &geometry, &ExtractionConfig::default()).unwrap();

    assert_eq!(result.spec_objs.len(), 2);
    for obj in &result.spec_objs {
        assert!(obj.boxcar.is_some());
        assert!(
            obj.optimal.is_some(),
            "object {} should be optimally extracted",
            obj.label()
        );
    }
    // Each object's model flux lives on its own side of the detector.
    assert!(result.object_model[[65, 3]] > 0.0);
    assert!(result.object_model[[65, 11]] > 0.0);
    assert_eq!(result.object_model[[65, 7]], 0.0);
}
