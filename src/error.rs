use thiserror::Error;

/// Fatal errors that abort extraction for the current detector.
///
/// These indicate corrupted upstream geometry or calibration, not noisy data.
/// Per-object degradations (failed profile fits, low signal) are not errors;
/// they are recorded as [`crate::profile::ProfileFit::Skipped`] outcomes.
#[derive(Error, Debug)]
pub enum ExtractionError {
    /// A frame's dimensions do not match the rest of the frame set.
    #[error("frame '{name}' has shape {actual:?}, expected {expected:?}")]
    FrameShape {
        /// Name of the offending frame.
        name: &'static str,
        /// Shape shared by the rest of the frame set.
        expected: (usize, usize),
        /// Shape of the offending frame.
        actual: (usize, usize),
    },

    /// An object's weight or slit-position image does not match the frames.
    #[error("object {object} in slit {slit}: '{name}' has shape {actual:?}, expected {expected:?}")]
    RegionShape {
        /// Slit label (1-based).
        slit: u32,
        /// Object index within the slit.
        object: usize,
        /// Name of the offending image.
        name: &'static str,
        /// Expected frame shape.
        expected: (usize, usize),
        /// Shape of the offending image.
        actual: (usize, usize),
    },

    /// A trace does not span the frame's dispersion rows.
    #[error("object {object} in slit {slit}: trace has {actual} rows, expected {expected}")]
    TraceLength {
        /// Slit label (1-based).
        slit: u32,
        /// Object index within the slit.
        object: usize,
        /// Number of dispersion rows in the frames.
        expected: usize,
        /// Length of the offending trace.
        actual: usize,
    },

    /// The trace stored on a spectrum record disagrees with the geometry's
    /// trace at fill time.
    #[error("object {object} in slit {slit}: stored trace does not match extraction trace")]
    TraceMismatch {
        /// Slit label (1-based).
        slit: u32,
        /// Object index within the slit.
        object: usize,
    },

    /// Optimal extraction produced a wavelength below the physical floor
    /// while wavelength calibration is not in pixel mode.
    #[error(
        "object {object} in slit {slit}: wavelength {value:.4} below physical floor at row {row}"
    )]
    WavelengthBelowFloor {
        /// Slit label (1-based).
        slit: u32,
        /// Object index within the slit.
        object: usize,
        /// Dispersion row of the offending value.
        row: usize,
        /// The offending wavelength.
        value: f64,
    },

    /// Profile fitting was requested for an object whose boxcar spectrum has
    /// not been filled.
    #[error("object {object} in slit {slit}: boxcar spectrum not yet extracted")]
    MissingBoxcar {
        /// Slit label (1-based).
        slit: u32,
        /// Object index within the slit.
        object: usize,
    },
}
