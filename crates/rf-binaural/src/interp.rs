//! Runtime HRTF interpolation
//!
//! Looks up the (at most three) measured directions surrounding a query
//! direction and blends their filters into one filter per band and ear.
//! Results are cached per source channel; a channel is only recomputed when
//! its dirty bit is set.

use std::f32::consts::PI;

use ndarray::{Array3, ArrayView2};
use num_complex::Complex32;
use rf_dsp::NUM_BANDS;

use crate::bank::Generation;
use crate::config::InterpMode;
use crate::position::Direction;
use crate::{MAX_NUM_INPUTS, NUM_EARS};

/// Above this frequency no interaural phase is imposed
pub const ITD_PHASE_CUTOFF_HZ: f32 = 1500.0;

/// Per-channel interpolated filters
#[derive(Debug, Clone)]
pub struct Interpolator {
    /// [channels, bands, ears]
    filters: Array3<Complex32>,
    /// Number of channel recomputations so far
    recomputations: u64,
}

impl Default for Interpolator {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpolator {
    pub fn new() -> Self {
        Self {
            filters: Array3::zeros((MAX_NUM_INPUTS, NUM_BANDS, NUM_EARS)),
            recomputations: 0,
        }
    }

    /// Recompute `channel` if its bit in `dirty` is set, clearing the bit.
    ///
    /// Returns true if the filter was recomputed.
    pub fn refresh(
        &mut self,
        channel: usize,
        dirty: &mut u64,
        generation: &Generation,
        direction: Direction,
        mode: InterpMode,
    ) -> bool {
        let bit = 1u64 << channel;
        if *dirty & bit == 0 {
            return false;
        }
        self.interpolate(channel, generation, direction, mode);
        *dirty &= !bit;
        true
    }

    /// Unconditionally recompute the filter of `channel`
    pub fn interpolate(
        &mut self,
        channel: usize,
        generation: &Generation,
        direction: Direction,
        mode: InterpMode,
    ) {
        let (idx, weights) = generation.table.lookup(direction.azimuth, direction.elevation);
        let bank = &generation.bank;
        let set = bank.set_for_channel(channel);
        let mut out = self.filters.index_axis_mut(ndarray::Axis(0), channel);

        match mode {
            InterpMode::Tri => {
                for band in 0..NUM_BANDS {
                    for ear in 0..NUM_EARS {
                        let mut acc = Complex32::new(0.0, 0.0);
                        for (&d, &w) in idx.iter().zip(&weights) {
                            acc += bank.hrtf_fb[[set, band, ear, d]] * w;
                        }
                        out[[band, ear]] = acc;
                    }
                }
            }
            InterpMode::TriPs => {
                let itd: f32 = idx
                    .iter()
                    .zip(&weights)
                    .map(|(&d, &w)| bank.itds[[set, d]] * w)
                    .sum();

                for band in 0..NUM_BANDS {
                    let freq = generation.centre_freqs.get(band).copied().unwrap_or(0.0);
                    let ipd = if freq < ITD_PHASE_CUTOFF_HZ {
                        wrap_phase(2.0 * PI * freq * itd) / 2.0
                    } else {
                        0.0
                    };
                    let phase = Complex32::from_polar(1.0, ipd);

                    let mut mags = [0.0f32; NUM_EARS];
                    for (ear, mag) in mags.iter_mut().enumerate() {
                        for (&d, &w) in idx.iter().zip(&weights) {
                            *mag += bank.hrtf_mag[[set, band, ear, d]] * w;
                        }
                    }
                    // Left ear leads for positive ITD
                    out[[band, 0]] = phase * mags[0];
                    out[[band, 1]] = phase.conj() * mags[1];
                }
            }
        }

        self.recomputations += 1;
    }

    /// Cached filter of `channel` [bands, ears]
    pub fn filter(&self, channel: usize) -> ArrayView2<'_, Complex32> {
        self.filters.index_axis(ndarray::Axis(0), channel)
    }

    pub fn recomputations(&self) -> u64 {
        self.recomputations
    }
}

/// Wrap a phase into [-π, π)
fn wrap_phase(phase: f32) -> f32 {
    (phase + PI).rem_euclid(2.0 * PI) - PI
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use ndarray::{Array2, Array4};

    use crate::bank::{FilterBank, GridInfo};
    use crate::geometry::GainTable;

    /// Four-direction ring with constant per-direction filters
    fn ring_generation() -> Generation {
        let dirs: Vec<Direction> = [0.0, 90.0, 180.0, -90.0]
            .iter()
            .map(|&a| Direction::new(a, 0.0))
            .collect();
        let table = GainTable::build(&dirs, 2.0, 5.0).unwrap();
        let fb = Array4::from_shape_fn((1, NUM_BANDS, NUM_EARS, dirs.len()), |(_, _, e, d)| {
            Complex32::new(1.0 + d as f32, e as f32)
        });
        let itds = Array2::from_shape_fn((1, dirs.len()), |(_, d)| match d {
            1 => 6e-4,
            3 => -6e-4,
            _ => 0.0,
        });
        let grid = GridInfo {
            directions: dirs.clone(),
            loaded_len: 1,
            loaded_fs: 48000.0,
            runtime_len: 1,
            runtime_fs: 48000.0,
            is_default: false,
            is_3d: false,
            num_triangles: table.num_triangles(),
            num_sets: 1,
            emitters: None,
        };
        Generation {
            id: 1,
            table: Arc::new(table),
            bank: FilterBank::new(fb, itds),
            grid: Arc::new(grid),
            centre_freqs: rf_dsp::centre_frequencies(48000.0),
        }
    }

    #[test]
    fn test_measured_direction_reproduces_filter() {
        let generation = ring_generation();
        let mut interp = Interpolator::new();
        interp.interpolate(0, &generation, Direction::new(90.0, 0.0), InterpMode::Tri);
        let f = interp.filter(0);
        assert!((f[[10, 0]] - Complex32::new(2.0, 0.0)).norm() < 1e-5);
        assert!((f[[10, 1]] - Complex32::new(2.0, 1.0)).norm() < 1e-5);
    }

    #[test]
    fn test_tri_blends_between_neighbours() {
        let generation = ring_generation();
        let mut interp = Interpolator::new();
        interp.interpolate(3, &generation, Direction::new(45.0, 0.0), InterpMode::Tri);
        // Halfway between filters 1 and 2
        assert!((interp.filter(3)[[0, 0]].re - 1.5).abs() < 1e-4);
    }

    #[test]
    fn test_phase_separated_mode_imposes_itd_phase_below_cutoff() {
        let generation = ring_generation();
        let mut interp = Interpolator::new();
        interp.interpolate(0, &generation, Direction::new(90.0, 0.0), InterpMode::TriPs);
        let f = interp.filter(0);

        // Band 2 = 375 Hz, left ear phase advanced, right ear mirrored
        let expected = wrap_phase(2.0 * PI * 375.0 * 6e-4) / 2.0;
        assert!((f[[2, 0]].arg() - expected).abs() < 1e-4);
        assert!((f[[2, 1]].arg() + expected).abs() < 1e-4);
        assert!((f[[2, 0]].norm() - 2.0).abs() < 1e-4);

        // Band 20 = 3.75 kHz, zero phase
        assert!(f[[20, 0]].im.abs() < 1e-6);
        assert!(f[[20, 1]].im.abs() < 1e-6);
    }

    #[test]
    fn test_clean_channel_is_not_recomputed() {
        let generation = ring_generation();
        let mut interp = Interpolator::new();
        let mut dirty = 0b1u64;

        let dir = Direction::new(30.0, 0.0);
        assert!(interp.refresh(0, &mut dirty, &generation, dir, InterpMode::Tri));
        let first = interp.filter(0).to_owned();
        assert_eq!(interp.recomputations(), 1);
        assert_eq!(dirty, 0);

        assert!(!interp.refresh(0, &mut dirty, &generation, dir, InterpMode::Tri));
        assert_eq!(interp.recomputations(), 1);
        assert_eq!(interp.filter(0), first);
    }

    #[test]
    fn test_wrap_phase_range() {
        assert!((wrap_phase(3.0 * PI) + PI).abs() < 1e-5);
        assert!((wrap_phase(0.5) - 0.5).abs() < 1e-6);
        assert!((wrap_phase(-0.5) + 0.5).abs() < 1e-6);
    }
}
