//! Slit and object geometry produced by the trace-finding collaborator.
//!
//! A slit is a logical grouping of detector columns sharing one spectral
//! trace, identified by a 1-based label in the slit-index map. Each slit
//! owns zero or more traced objects; an object's footprint on the detector
//! is described by weight images over the full frame.

use ndarray::{Array1, Array2};

use crate::error::ExtractionError;
use crate::frame::FrameSet;

/// One traced object within a slit.
#[derive(Debug, Clone)]
pub struct ObjectRegion {
    /// Object-region weights in [0, 1] over the full frame; all zero if the
    /// object has no assigned extraction footprint.
    pub object_weights: Array2<f64>,
    /// Background-region weights in [0, 1] over the full frame; all zero if
    /// no local background region was assigned.
    pub background_weights: Array2<f64>,
    /// Expected center column of the object per dispersion row.
    pub trace: Array1<f64>,
    /// Fractional cross-slit coordinate of each pixel relative to the
    /// object's trace; the abscissa of the spatial profile fit.
    pub slit_position: Array2<f64>,
}

/// A slit and the objects traced within it.
#[derive(Debug, Clone)]
pub struct Slit {
    /// 1-based label matching the slit-index map.
    pub id: u32,
    /// Objects traced within this slit.
    pub objects: Vec<ObjectRegion>,
}

/// Full trace geometry for one detector.
#[derive(Debug, Clone)]
pub struct SlitGeometry {
    /// Per-pixel slit label; 0 marks pixels outside any slit.
    pub slit_map: Array2<u32>,
    /// The slits, with their traced objects.
    pub slits: Vec<Slit>,
}

impl SlitGeometry {
    /// Validate the geometry against a frame set: the slit map and every
    /// object image must share the frame shape, and every trace must span
    /// the dispersion rows.
    pub fn validate(&self, frames: &FrameSet) -> Result<(), ExtractionError> {
        let expected = frames.dim();
        if self.slit_map.dim() != expected {
            return Err(ExtractionError::FrameShape {
                name: "slit_map",
                expected,
                actual: self.slit_map.dim(),
            });
        }

        for slit in &self.slits {
            for (o, region) in slit.objects.iter().enumerate() {
                let check = |name: &'static str, actual: (usize, usize)| {
                    if actual == expected {
                        Ok(())
                    } else {
                        Err(ExtractionError::RegionShape {
                            slit: slit.id,
                            object: o,
                            name,
                            expected,
                            actual,
                        })
                    }
                };
                check("object_weights", region.object_weights.dim())?;
                check("background_weights", region.background_weights.dim())?;
                check("slit_position", region.slit_position.dim())?;

                if region.trace.len() != expected.0 {
                    return Err(ExtractionError::TraceLength {
                        slit: slit.id,
                        object: o,
                        expected: expected.0,
                        actual: region.trace.len(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Total number of traced objects across all slits.
    pub fn object_count(&self) -> usize {
        self.slits.iter().map(|s| s.objects.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn frames(dim: (usize, usize)) -> FrameSet {
        FrameSet::new(
            Array2::zeros(dim),
            Array2::ones(dim),
            Array2::zeros(dim),
            Array2::zeros(dim),
            Array2::zeros(dim),
            Array2::zeros(dim),
        )
        .unwrap()
    }

    fn region(dim: (usize, usize)) -> ObjectRegion {
        ObjectRegion {
            object_weights: Array2::zeros(dim),
            background_weights: Array2::zeros(dim),
            trace: Array1::zeros(dim.0),
            slit_position: Array2::zeros(dim),
        }
    }

    #[test]
    fn test_validate_accepts_consistent_geometry() {
        let dim = (6, 4);
        let geometry = SlitGeometry {
            slit_map: Array2::ones(dim),
            slits: vec![Slit {
                id: 1,
                objects: vec![region(dim)],
            }],
        };
        assert!(geometry.validate(&frames(dim)).is_ok());
        assert_eq!(geometry.object_count(), 1);
    }

    #[test]
    fn test_validate_rejects_bad_trace_length() {
        let dim = (6, 4);
        let mut bad = region(dim);
        bad.trace = Array1::zeros(5);
        let geometry = SlitGeometry {
            slit_map: Array2::ones(dim),
            slits: vec![Slit {
                id: 1,
                objects: vec![bad],
            }],
        };
        assert!(matches!(
            geometry.validate(&frames(dim)),
            Err(ExtractionError::TraceLength {
                expected: 6,
                actual: 5,
                ..
            })
        ));
    }

    #[test]
    fn test_validate_rejects_region_shape() {
        let dim = (6, 4);
        let mut bad = region(dim);
        bad.slit_position = Array2::zeros((6, 5));
        let geometry = SlitGeometry {
            slit_map: Array2::ones(dim),
            slits: vec![Slit {
                id: 1,
                objects: vec![bad],
            }],
        };
        assert!(matches!(
            geometry.validate(&frames(dim)),
            Err(ExtractionError::RegionShape {
                name: "slit_position",
                ..
            })
        ));
    }
}
