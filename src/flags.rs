//! Per-row quality flags for extracted spectra.
//!
//! Each dispersion row of an extracted spectrum carries a bit mask recording
//! pixel-level conditions that affected its weighted sums. Flags combine by
//! bitwise OR; a mask of 0 means the row is clean.

/// Row contained a flagged bad detector pixel with nonzero extraction weight.
pub const BAD_PIXEL: u32 = 1 << 0;

/// Row contained a cosmic-ray hit with nonzero extraction weight.
pub const COSMIC_RAY: u32 = 1 << 1;

/// Summed flux for the row was non-finite; flux, variance and sky were zeroed.
pub const NON_FINITE: u32 = 1 << 5;

/// True if `mask` carries `flag` (any of its bits).
pub fn has_flag(mask: u32, flag: u32) -> bool {
    mask & flag != 0
}
