//! HRTF filter bank
//!
//! - Band-domain filters for every measured direction and ear
//! - Magnitude-only counterparts and per-direction ITDs
//! - Diffuse-field / reference-head equalisation
//! - Staged rebuilding at reinit granularity (`builder`)

pub mod builder;
pub mod diffuse_eq;
pub mod reference_head;

use std::sync::Arc;

use ndarray::{Array2, Array4, ArrayView4};
use num_complex::Complex32;
use rf_dsp::{FilterbankConverter, NUM_BANDS};

use crate::geometry::GainTable;
use crate::position::Direction;
use crate::NUM_EARS;

pub use builder::{BankBuilder, BuildSettings};

/// Band-domain filters of one generation
#[derive(Debug, Clone)]
pub struct FilterBank {
    /// Complex filters [sets, bands, ears, dirs]
    pub hrtf_fb: Array4<Complex32>,
    /// Magnitudes of `hrtf_fb`
    pub hrtf_mag: Array4<f32>,
    /// ITDs in seconds [sets, dirs]
    pub itds: Array2<f32>,
}

impl FilterBank {
    /// Assemble a bank from equalised filters, deriving magnitudes
    pub fn new(hrtf_fb: Array4<Complex32>, itds: Array2<f32>) -> Self {
        let hrtf_mag = hrtf_fb.mapv(|h| h.norm());
        Self {
            hrtf_fb,
            hrtf_mag,
            itds,
        }
    }

    pub fn num_sets(&self) -> usize {
        self.hrtf_fb.dim().0
    }

    pub fn num_directions(&self) -> usize {
        self.hrtf_fb.dim().3
    }

    /// Filter set used by source channel `channel`
    ///
    /// One set serves every channel; with one set per emitter, channel `c`
    /// uses set `c` (the last set for channels beyond the emitter count).
    pub fn set_for_channel(&self, channel: usize) -> usize {
        channel.min(self.num_sets().saturating_sub(1))
    }
}

/// Convert impulses [sets, dirs, ears, len] to filters [sets, bands, ears, dirs]
pub fn impulses_to_filters(impulses: ArrayView4<f32>) -> Array4<Complex32> {
    let (sets, dirs, ears, len) = impulses.dim();
    let mut fb = Array4::zeros((sets, NUM_BANDS, ears, dirs));
    let mut converter = FilterbankConverter::new();
    let mut impulse = vec![0.0f32; len];
    let mut coeffs = vec![Complex32::new(0.0, 0.0); NUM_BANDS];

    for s in 0..sets {
        for d in 0..dirs {
            for e in 0..ears {
                for (n, x) in impulse.iter_mut().enumerate() {
                    *x = impulses[[s, d, e, n]];
                }
                converter.convert_into(&impulse, &mut coeffs);
                for (band, &c) in coeffs.iter().enumerate() {
                    fb[[s, band, e, d]] = c;
                }
            }
        }
    }
    fb
}

/// Grid metadata exposed to the host
#[derive(Debug, Clone, PartialEq)]
pub struct GridInfo {
    /// Measured directions
    pub directions: Vec<Direction>,
    /// Impulse length as loaded
    pub loaded_len: usize,
    /// Sample rate as loaded
    pub loaded_fs: f32,
    /// Impulse length after resampling
    pub runtime_len: usize,
    /// Sample rate after resampling
    pub runtime_fs: f32,
    /// Built-in grid in use
    pub is_default: bool,
    /// 3-D triangulation (false for a 2-D ring)
    pub is_3d: bool,
    /// Triangles (or ring segments) in the gain table
    pub num_triangles: usize,
    /// Independent filter sets
    pub num_sets: usize,
    /// Emitter directions of a multi-emitter file
    pub emitters: Option<Vec<Direction>>,
}

impl GridInfo {
    pub fn num_directions(&self) -> usize {
        self.directions.len()
    }
}

/// Everything the audio thread reads, built and replaced as a unit
#[derive(Debug)]
pub struct Generation {
    /// Monotonic build counter
    pub id: u64,
    pub table: Arc<GainTable>,
    pub bank: FilterBank,
    pub grid: Arc<GridInfo>,
    /// Band centre frequencies at the host rate
    pub centre_freqs: Vec<f32>,
}

pub(crate) fn check_shape(fb: &Array4<Complex32>, dirs: usize) -> bool {
    let (_, bands, ears, d) = fb.dim();
    bands == NUM_BANDS && ears == NUM_EARS && d == dirs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_impulse_layout_transposed_into_bands() {
        let mut imp = ndarray::Array4::zeros((2, 3, 2, 4));
        // Set 1, direction 2, right ear: unit impulse
        imp[[1, 2, 1, 0]] = 1.0;
        let fb = impulses_to_filters(imp.view());
        assert_eq!(fb.dim(), (2, NUM_BANDS, 2, 3));
        for band in 0..NUM_BANDS {
            assert!((fb[[1, band, 1, 2]].re - 1.0).abs() < 1e-6);
            assert!(fb[[1, band, 0, 2]].norm() < 1e-9);
            assert!(fb[[0, band, 1, 2]].norm() < 1e-9);
        }
        assert!(check_shape(&fb, 3));
    }

    #[test]
    fn test_set_selection_per_channel() {
        let single = FilterBank::new(Array4::zeros((1, NUM_BANDS, 2, 1)), Array2::zeros((1, 1)));
        assert_eq!(single.set_for_channel(0), 0);
        assert_eq!(single.set_for_channel(40), 0);

        let multi = FilterBank::new(Array4::zeros((3, NUM_BANDS, 2, 1)), Array2::zeros((3, 1)));
        assert_eq!(multi.set_for_channel(1), 1);
        assert_eq!(multi.set_for_channel(7), 2);
    }

    #[test]
    fn test_magnitudes_follow_filters() {
        let fb = Array4::from_elem((1, NUM_BANDS, 2, 2), Complex32::new(3.0, 4.0));
        let bank = FilterBank::new(fb, Array2::zeros((1, 2)));
        assert!(bank.hrtf_mag.iter().all(|&m| (m - 5.0).abs() < 1e-6));
    }
}
