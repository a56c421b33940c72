//! Spectral extraction engine for slit spectrograph detector frames.
//!
//! Collapses each traced object's 2-D light distribution into a 1-D spectrum
//! (wavelength, flux, variance, quality mask) per detector, per slit, per
//! object, given calibrated frames and trace geometry from upstream
//! collaborators.
//!
//! # Module Organization
//!
//! ## Extraction stages
//! - **boxcar**: summation over the object footprint with local background
//!   re-fitting
//! - **profile**: empirical spatial-profile estimation (Gaussian/Moffat,
//!   robust weighted fitting)
//! - **optimal**: Horne extraction with the fitted profile as a matched
//!   filter
//! - **pipeline**: per-detector orchestration of the stages
//!
//! ## Supporting pieces
//! - **noise**: safe inverse variance and the refined variance frame
//! - **stats**: median, sigma clipping, weighted linear fits
//! - **frame / geometry / specobj**: detector frames, trace geometry inputs,
//!   per-object output records
//! - **flags**: per-row quality bits
//! - **config / error**: tunables and the fatal-error taxonomy
//!
//! # Data Flow
//!
//! trace geometry + frames → boxcar → (boxcar spectra) → profile fitter →
//! (profile models) → optimal extractor → (optimal spectra + object model) →
//! refined variance. The refined variance frame can feed a second pass;
//! a single pass is the default.

pub mod boxcar;
pub mod config;
pub mod error;
pub mod flags;
pub mod frame;
pub mod geometry;
pub mod noise;
pub mod optimal;
pub mod pipeline;
pub mod profile;
pub mod specobj;
pub mod stats;

// Re-export key functionality for easier access
pub use boxcar::{boxcar_center, extract_boxcar};
pub use config::{ExtractionConfig, WavelengthMode};
pub use error::ExtractionError;
pub use frame::FrameSet;
pub use geometry::{ObjectRegion, Slit, SlitGeometry};
pub use optimal::extract_optimal;
pub use pipeline::{run_extraction, run_extraction_with_observer, ExtractionResult};
pub use profile::{
    fit_object_profiles, FittedProfile, ProfileFit, ProfileKind, ProfileObserver, ProfileSamples,
    SkipReason,
};
pub use specobj::{BoxcarSpectrum, OptimalSpectrum, SpecObj};
