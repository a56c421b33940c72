//! Per-object output records.
//!
//! A [`SpecObj`] is allocated once per traced object before extraction and
//! filled in stages: the boxcar extractor populates [`BoxcarSpectrum`], the
//! optimal extractor (when a profile fit succeeded) populates
//! [`OptimalSpectrum`]. Per-row arrays always span the frame's dispersion
//! rows and are never resized; rows may only be masked or zeroed.

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

/// Boxcar extraction results for one object, indexed by dispersion row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoxcarSpectrum {
    /// Weighted-mean wavelength per row.
    pub wave: Array1<f64>,
    /// Background-subtracted summed counts per row.
    pub counts: Array1<f64>,
    /// Summed variance per row.
    pub var: Array1<f64>,
    /// Weighted-mean sky per row (counts per pixel).
    pub sky: Array1<f64>,
    /// Per-row quality flags (see [`crate::flags`]).
    pub mask: Array1<u32>,
    /// Median spatial extraction width in pixels.
    pub size: f64,
}

/// Optimal (profile-weighted) extraction results for one object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimalSpectrum {
    /// Profile-weighted wavelength per row.
    pub wave: Array1<f64>,
    /// Optimally extracted counts per row.
    pub counts: Array1<f64>,
    /// Variance of the optimal counts per row.
    pub var: Array1<f64>,
    /// FWHM of the fitted spatial profile, in pixels.
    pub fwhm: f64,
}

/// The per-object output record.
#[derive(Debug, Clone)]
pub struct SpecObj {
    /// Slit label (1-based) this object belongs to.
    pub slit_id: u32,
    /// Object index within the slit.
    pub object_index: usize,
    /// The object's trace, stored at allocation for fill-time validation.
    pub trace: Array1<f64>,
    /// Boxcar results; filled by the boxcar extractor.
    pub boxcar: Option<BoxcarSpectrum>,
    /// Optimal results; filled only when a profile fit succeeded.
    pub optimal: Option<OptimalSpectrum>,
}

impl SpecObj {
    /// Allocate the record for one traced object.
    pub fn new(slit_id: u32, object_index: usize, trace: Array1<f64>) -> Self {
        Self {
            slit_id,
            object_index,
            trace,
            boxcar: None,
            optimal: None,
        }
    }

    /// Verify that an extraction-time trace matches the stored one.
    ///
    /// A mismatch means the geometry handed to extraction is not the
    /// geometry this record was allocated for, which is fatal upstream
    /// corruption.
    pub fn check_trace(&self, trace: &ArrayView1<f64>) -> bool {
        if self.trace.len() != trace.len() {
            return false;
        }
        self.trace
            .iter()
            .zip(trace.iter())
            .all(|(a, b)| (a - b).abs() < 1e-8)
    }

    /// Short identifier for log messages.
    pub fn label(&self) -> String {
        format!("S{:02}-O{:02}", self.slit_id, self.object_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_check_trace_accepts_match() {
        let obj = SpecObj::new(1, 0, array![1.0, 2.0, 3.0]);
        let same = array![1.0, 2.0, 3.0];
        assert!(obj.check_trace(&same.view()));
    }

    #[test]
    fn test_check_trace_rejects_shifted_trace() {
        let obj = SpecObj::new(1, 0, array![1.0, 2.0, 3.0]);
        let shifted = array![1.0, 2.0, 3.5];
        assert!(!obj.check_trace(&shifted.view()));
    }

    #[test]
    fn test_check_trace_rejects_length_mismatch() {
        let obj = SpecObj::new(1, 0, array![1.0, 2.0, 3.0]);
        let short = array![1.0, 2.0];
        assert!(!obj.check_trace(&short.view()));
    }

    #[test]
    fn test_label_format() {
        let obj = SpecObj::new(3, 1, array![0.0]);
        assert_eq!(obj.label(), "S03-O01");
    }
}
