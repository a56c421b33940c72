//! Extraction pipeline for one detector.
//!
//! Runs the stages in order — allocate records, boxcar, profile fitting,
//! optimal extraction, variance refinement — and collects the shared outputs.
//! Per-object work inside each stage is independent; the two shared images
//! (background correction, object-flux model) are assembled from per-object
//! sparse updates after each parallel section, so a rerun on identical
//! inputs is bit-identical.

use ndarray::Array2;

use crate::boxcar::extract_boxcar;
use crate::config::ExtractionConfig;
use crate::error::ExtractionError;
use crate::frame::FrameSet;
use crate::geometry::SlitGeometry;
use crate::noise::model_variance;
use crate::optimal::extract_optimal;
use crate::profile::{fit_object_profiles, ProfileFit, ProfileObserver};
use crate::specobj::SpecObj;

/// Everything one extraction pass produces for a detector.
#[derive(Debug)]
pub struct ExtractionResult {
    /// Per-object spectra, slit-major order.
    pub spec_objs: Vec<SpecObj>,
    /// Per-object profile outcomes, same order.
    pub profiles: Vec<ProfileFit>,
    /// Shared background-correction image from the boxcar stage.
    pub background_correction: Array2<f64>,
    /// Shared object-flux model image from the optimal stage.
    pub object_model: Array2<f64>,
    /// Variance frame refined with the object-flux model; feed it back as
    /// the variance frame of a second pass for iterative refinement.
    pub refined_variance: Array2<f64>,
}

/// Run one extraction pass over a detector.
pub fn run_extraction(
    frames: &FrameSet,
    geometry: &SlitGeometry,
    config: &ExtractionConfig,
) -> Result<ExtractionResult, ExtractionError> {
    run_extraction_with_observer(frames, geometry, config, None)
}

/// [`run_extraction`] with a profile observer attached to the fit stage's
/// success path (QA plotting, diagnostics capture).
pub fn run_extraction_with_observer(
    frames: &FrameSet,
    geometry: &SlitGeometry,
    config: &ExtractionConfig,
    observer: Option<&mut dyn ProfileObserver>,
) -> Result<ExtractionResult, ExtractionError> {
    geometry.validate(frames)?;

    let mut spec_objs: Vec<SpecObj> = Vec::with_capacity(geometry.object_count());
    for slit in &geometry.slits {
        for (o, region) in slit.objects.iter().enumerate() {
            spec_objs.push(SpecObj::new(slit.id, o, region.trace.clone()));
        }
    }

    let background_correction = extract_boxcar(frames, geometry, &mut spec_objs, config)?;
    let profiles = fit_object_profiles(frames, geometry, &spec_objs, config, observer)?;
    let object_model = extract_optimal(frames, geometry, &profiles, &mut spec_objs, config)?;
    let refined_variance = model_variance(
        &frames.sky.view(),
        &object_model.view(),
        config.read_noise,
    );

    Ok(ExtractionResult {
        spec_objs,
        profiles,
        background_correction,
        object_model,
        refined_variance,
    })
}
