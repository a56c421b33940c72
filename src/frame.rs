//! Calibrated detector frames consumed by the extraction stages.
//!
//! Frames are 2-D arrays indexed `[row, column]` with rows along the
//! dispersion (wavelength) axis and columns along the spatial
//! (cross-dispersion) axis.

use ndarray::Array2;

use crate::error::ExtractionError;

/// The per-detector frame set: science counts, variance, sky background,
/// per-pixel wavelength, and the binary cosmic-ray and bad-pixel masks
/// (1 = affected).
///
/// Construction validates that every frame shares one shape; a mismatch is a
/// caller error, not a data condition.
#[derive(Debug, Clone)]
pub struct FrameSet {
    /// Science counts.
    pub science: Array2<f64>,
    /// Variance of the science counts.
    pub variance: Array2<f64>,
    /// Sky background estimate.
    pub sky: Array2<f64>,
    /// Wavelength of each pixel.
    pub wave: Array2<f64>,
    /// Cosmic-ray mask, 1 = hit.
    pub cr_mask: Array2<u8>,
    /// Bad detector pixel mask, 1 = bad.
    pub bad_pixel: Array2<u8>,
}

impl FrameSet {
    /// Bundle the frames, validating that all shapes agree.
    pub fn new(
        science: Array2<f64>,
        variance: Array2<f64>,
        sky: Array2<f64>,
        wave: Array2<f64>,
        cr_mask: Array2<u8>,
        bad_pixel: Array2<u8>,
    ) -> Result<Self, ExtractionError> {
        let expected = science.dim();
        let check = |name: &'static str, actual: (usize, usize)| {
            if actual == expected {
                Ok(())
            } else {
                Err(ExtractionError::FrameShape {
                    name,
                    expected,
                    actual,
                })
            }
        };
        check("variance", variance.dim())?;
        check("sky", sky.dim())?;
        check("wave", wave.dim())?;
        check("cr_mask", cr_mask.dim())?;
        check("bad_pixel", bad_pixel.dim())?;

        Ok(Self {
            science,
            variance,
            sky,
            wave,
            cr_mask,
            bad_pixel,
        })
    }

    /// Frame shape as `(rows, columns)`.
    pub fn dim(&self) -> (usize, usize) {
        self.science.dim()
    }

    /// Number of dispersion rows.
    pub fn nrows(&self) -> usize {
        self.science.nrows()
    }

    /// Number of cross-dispersion columns.
    pub fn ncols(&self) -> usize {
        self.science.ncols()
    }
}
