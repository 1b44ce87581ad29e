//! Scene rotation (yaw / pitch / roll)
//!
//! Directions are rotated as row vectors, `v' = v · R`. With no flips a
//! positive yaw moves a frontal source to the left (+azimuth), a positive
//! pitch moves it up and a positive roll lifts the left side.

use nalgebra::{Matrix3, RowVector3};

use crate::config::RotationOrder;
use crate::params::RotationSettings;
use crate::position::Direction;
use crate::MAX_NUM_INPUTS;

fn yaw_matrix(deg: f32) -> Matrix3<f32> {
    let (s, c) = deg.to_radians().sin_cos();
    Matrix3::new(c, s, 0.0, -s, c, 0.0, 0.0, 0.0, 1.0)
}

fn pitch_matrix(deg: f32) -> Matrix3<f32> {
    let (s, c) = deg.to_radians().sin_cos();
    Matrix3::new(c, 0.0, s, 0.0, 1.0, 0.0, -s, 0.0, c)
}

fn roll_matrix(deg: f32) -> Matrix3<f32> {
    let (s, c) = deg.to_radians().sin_cos();
    Matrix3::new(1.0, 0.0, 0.0, 0.0, c, s, 0.0, -s, c)
}

/// Rotation matrix for the given settings
pub fn rotation_matrix(settings: &RotationSettings) -> Matrix3<f32> {
    let sign = |flip: bool| if flip { -1.0 } else { 1.0 };
    let rz = yaw_matrix(sign(settings.flip_yaw) * settings.yaw);
    let ry = pitch_matrix(sign(settings.flip_pitch) * settings.pitch);
    let rx = roll_matrix(sign(settings.flip_roll) * settings.roll);

    match settings.order {
        RotationOrder::YawPitchRoll => rz * ry * rx,
        RotationOrder::RollPitchYaw => rx * ry * rz,
    }
}

/// Rotate a single direction
pub fn rotate(matrix: &Matrix3<f32>, dir: Direction) -> Direction {
    let [x, y, z] = dir.to_cartesian();
    let v = RowVector3::new(x, y, z);
    let r = v * matrix;
    Direction::from_cartesian([r[0], r[1], r[2]])
}

/// Holds the current matrix and the rotated source directions
#[derive(Debug, Clone)]
pub struct RotationEngine {
    matrix: Matrix3<f32>,
    rotated: [Direction; MAX_NUM_INPUTS],
}

impl Default for RotationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RotationEngine {
    pub fn new() -> Self {
        Self {
            matrix: Matrix3::identity(),
            rotated: [Direction::default(); MAX_NUM_INPUTS],
        }
    }

    /// Rebuild the matrix and rotate the first `directions.len()` sources
    pub fn rotate_all(&mut self, settings: &RotationSettings, directions: &[Direction]) {
        self.matrix = rotation_matrix(settings);
        for (out, &dir) in self.rotated.iter_mut().zip(directions) {
            *out = rotate(&self.matrix, dir);
        }
    }

    pub fn rotated(&self, channel: usize) -> Direction {
        self.rotated[channel]
    }
}
