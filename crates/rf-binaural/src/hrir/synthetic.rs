//! Built-in default HRIR grid
//!
//! A spherical-head model sampled over the full sphere:
//! - Woodworth ITD for a 8.75 cm head
//! - Broadband ILD plus a one-pole head shadow on the far ear
//! - An elevation-dependent pinna reflection
//!
//! Deterministic, so every "default" rebuild yields identical filters.

use std::sync::OnceLock;

use ndarray::Array4;

use super::HrirData;
use crate::position::Direction;

/// Sample rate of the default grid
pub const DEFAULT_HRIR_FS: f32 = 48000.0;

/// Impulse length of the default grid
pub const DEFAULT_HRIR_LEN: usize = 128;

/// Angular step of the default grid (degrees)
const GRID_STEP: usize = 10;

const HEAD_RADIUS: f32 = 0.0875;
const SPEED_OF_SOUND: f32 = 343.0;

/// Onset of the direct sound at the near ear
const ONSET: f32 = 8.0;

/// Directions of the default grid: both poles plus rings every 10°
pub fn default_directions() -> Vec<Direction> {
    let mut dirs = vec![Direction::new(0.0, -90.0)];
    for el in (-80..=80).step_by(GRID_STEP) {
        for az in (-180..180).step_by(GRID_STEP) {
            dirs.push(Direction::new(az as f32, el as f32));
        }
    }
    dirs.push(Direction::new(0.0, 90.0));
    dirs
}

/// The default grid, generated once per process
pub fn default_hrirs() -> &'static HrirData {
    static DEFAULT: OnceLock<HrirData> = OnceLock::new();
    DEFAULT.get_or_init(generate)
}

fn generate() -> HrirData {
    let directions = default_directions();
    let mut impulses = Array4::zeros((1, directions.len(), 2, DEFAULT_HRIR_LEN));

    for (d, dir) in directions.iter().enumerate() {
        let (left, right) = synthesize(dir, DEFAULT_HRIR_FS, DEFAULT_HRIR_LEN);
        for n in 0..DEFAULT_HRIR_LEN {
            impulses[[0, d, 0, n]] = left[n];
            impulses[[0, d, 1, n]] = right[n];
        }
    }

    HrirData {
        directions,
        sample_rate: DEFAULT_HRIR_FS,
        impulses,
        emitters: None,
    }
}

/// Model ITD in seconds, positive when the left ear leads
pub fn model_itd(dir: &Direction) -> f32 {
    let lateral = dir.to_cartesian()[1].clamp(-1.0, 1.0);
    let theta = lateral.asin();
    (HEAD_RADIUS / SPEED_OF_SOUND) * (theta + theta.sin())
}

/// Generate one left/right HRIR pair
pub fn synthesize(dir: &Direction, sample_rate: f32, length: usize) -> (Vec<f32>, Vec<f32>) {
    let mut left = vec![0.0f32; length];
    let mut right = vec![0.0f32; length];

    // +1 = fully left
    let lateral = dir.to_cartesian()[1].clamp(-1.0, 1.0);
    let itd_samples = model_itd(dir) * sample_rate;
    let left_delay = ONSET + (-itd_samples).max(0.0);
    let right_delay = ONSET + itd_samples.max(0.0);

    let left_gain = 0.7 + 0.3 * lateral;
    let right_gain = 0.7 - 0.3 * lateral;

    // Pinna echo arrives later for sources below
    let elev_norm = (dir.elevation + 90.0) / 180.0;
    let pinna_delay = 2.0 + 6.0 * (1.0 - elev_norm);
    let pinna_gain = 0.25 * (dir.elevation.to_radians().cos() * 0.5 + 0.5);

    let sigma = 1.0f32;
    let pulse = |t: f32, centre: f32| {
        let x = t - centre;
        (-x * x / (2.0 * sigma * sigma)).exp()
    };

    for i in 0..length {
        let t = i as f32;
        left[i] = left_gain
            * (pulse(t, left_delay) + pinna_gain * pulse(t, left_delay + pinna_delay));
        right[i] = right_gain
            * (pulse(t, right_delay) + pinna_gain * pulse(t, right_delay + pinna_delay));
    }

    // Head shadow on the far ear
    let shadow = lateral.abs();
    let coeff = 1.0 - 0.7 * shadow;
    let far = if lateral > 0.0 { &mut right } else { &mut left };
    if shadow > 1e-3 {
        let mut state = 0.0f32;
        for s in far.iter_mut() {
            state += coeff * (*s - state);
            *s = state;
        }
    }

    (left, right)
}
