//! Extraction configuration.
//!
//! Groups the tunables of the extraction stages. The signal-regime
//! boundaries are instrument-dependent heuristics, not part of the
//! algorithm's correctness contract, so they live here rather than as
//! literals in the stages.

use serde::{Deserialize, Serialize};

use crate::profile::ProfileKind;

/// Wavelength calibration mode of the input wavelength frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WavelengthMode {
    /// Physical wavelengths; values below the physical floor are fatal.
    Calibrated,
    /// Raw pixel indices stand in for wavelengths; no floor check.
    Pixel,
}

/// Configuration for the extraction pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Spatial profile model fitted for optimal extraction.
    pub profile: ProfileKind,

    /// Wavelength calibration mode of the wavelength frame.
    pub wavelength_mode: WavelengthMode,

    /// Boxcar counts a row must exceed to qualify for profile fitting.
    pub profile_count_floor: f64,

    /// Qualifying rows above which an object is in the high-signal regime
    /// and its profile is fitted.
    pub high_signal_rows: usize,

    /// Qualifying rows at or below which an object is in the low-signal
    /// regime; between this and `high_signal_rows` the profile is
    /// explicitly skipped as marginal.
    pub low_signal_rows: usize,

    /// Rejection threshold, in standard deviations, for the background
    /// sigma clip and the robust profile-fit iteration.
    pub clip_sigma: f64,

    /// Polynomial order of the per-row background fit (0 or 1).
    pub background_fit_order: usize,

    /// Detector read noise in counts, used by the refined variance frame.
    pub read_noise: f64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            profile: ProfileKind::Gaussian,
            wavelength_mode: WavelengthMode::Calibrated,
            profile_count_floor: 25.0,
            high_signal_rows: 100,
            low_signal_rows: 10,
            clip_sigma: 3.0,
            background_fit_order: 1,
            read_noise: 0.0,
        }
    }
}

impl ExtractionConfig {
    /// Save to a JSON file.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Load from a JSON file.
    ///
    /// An unknown profile kind or wavelength mode fails here, at
    /// configuration load, rather than mid-extraction.
    pub fn load_from_file(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}
