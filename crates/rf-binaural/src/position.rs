//! Direction types and angle conventions
//!
//! Head-related coordinates: x points forward, y to the left, z up.
//! Azimuth is measured counter-clockwise from the front (positive = left),
//! elevation positive upward. Stored angles live in [-180, 180] × [-90, 90].

use serde::{Deserialize, Serialize};

/// A direction on the unit sphere, in degrees
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Direction {
    /// Azimuth in degrees (-180 to 180, 0 = front, positive = left)
    pub azimuth: f32,
    /// Elevation in degrees (-90 to 90, positive = up)
    pub elevation: f32,
}

impl Direction {
    pub fn new(azimuth: f32, elevation: f32) -> Self {
        Self { azimuth, elevation }
    }

    /// Build from degrees, normalising azimuth and clamping elevation
    pub fn normalized(azimuth: f32, elevation: f32) -> Self {
        Self {
            azimuth: wrap_azimuth(azimuth),
            elevation: clamp_elevation(elevation),
        }
    }

    /// Unit Cartesian vector
    pub fn to_cartesian(&self) -> [f32; 3] {
        let az = self.azimuth.to_radians();
        let el = self.elevation.to_radians();
        let cos_el = el.cos();
        [cos_el * az.cos(), cos_el * az.sin(), el.sin()]
    }

    /// Direction of a (not necessarily unit) Cartesian vector
    pub fn from_cartesian(v: [f32; 3]) -> Self {
        let [x, y, z] = v;
        let horizontal = (x * x + y * y).sqrt();
        if horizontal < 1e-12 && z.abs() < 1e-12 {
            return Self::default();
        }
        Self {
            azimuth: y.atan2(x).to_degrees(),
            elevation: z.atan2(horizontal).to_degrees(),
        }
    }
}

/// Wrap an azimuth in degrees into [-180, 180].
///
/// 185 becomes -175 and -185 becomes 175. Values already in range are kept,
/// including both ±180.
pub fn wrap_azimuth(azimuth: f32) -> f32 {
    if (-180.0..=180.0).contains(&azimuth) {
        return azimuth;
    }
    let wrapped = (azimuth + 180.0).rem_euclid(360.0) - 180.0;
    wrapped.clamp(-180.0, 180.0)
}

/// Clamp an elevation in degrees into [-90, 90]
pub fn clamp_elevation(elevation: f32) -> f32 {
    elevation.clamp(-90.0, 90.0)
}

/// Normalise an emitter/measurement position given in spherical degrees where
/// elevation may exceed ±90 (folded over the pole) and azimuth may be 0..360.
pub fn fold_spherical(azimuth: f32, elevation: f32) -> Direction {
    let mut azi = azimuth;
    let mut elev = (elevation + 180.0).rem_euclid(360.0) - 180.0;
    if elev > 90.0 {
        elev = 180.0 - elev;
        azi += 180.0;
    } else if elev < -90.0 {
        elev = -180.0 - elev;
        azi += 180.0;
    }
    Direction::normalized(azi, elev)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_azimuth_wraparound() {
        assert_abs_diff_eq!(wrap_azimuth(185.0), -175.0, epsilon = 1e-4);
        assert_abs_diff_eq!(wrap_azimuth(-185.0), 175.0, epsilon = 1e-4);
        assert_abs_diff_eq!(wrap_azimuth(270.0), -90.0, epsilon = 1e-4);
        assert_abs_diff_eq!(wrap_azimuth(725.0), 5.0, epsilon = 1e-3);
        assert_eq!(wrap_azimuth(180.0), 180.0);
        assert_eq!(wrap_azimuth(-180.0), -180.0);
        assert_eq!(wrap_azimuth(42.0), 42.0);
    }

    #[test]
    fn test_elevation_clamped() {
        assert_eq!(clamp_elevation(95.0), 90.0);
        assert_eq!(clamp_elevation(-120.0), -90.0);
        assert_eq!(clamp_elevation(30.0), 30.0);
    }

    #[test]
    fn test_cartesian_round_trip_convention() {
        let left = Direction::new(90.0, 0.0).to_cartesian();
        assert_abs_diff_eq!(left[1], 1.0, epsilon = 1e-6);

        let up = Direction::new(0.0, 90.0).to_cartesian();
        assert_abs_diff_eq!(up[2], 1.0, epsilon = 1e-6);

        let d = Direction::from_cartesian(Direction::new(-120.0, 35.0).to_cartesian());
        assert_abs_diff_eq!(d.azimuth, -120.0, epsilon = 1e-3);
        assert_abs_diff_eq!(d.elevation, 35.0, epsilon = 1e-3);
    }

    #[test]
    fn test_fold_over_pole() {
        let d = fold_spherical(10.0, 100.0);
        assert_abs_diff_eq!(d.elevation, 80.0, epsilon = 1e-4);
        assert_abs_diff_eq!(d.azimuth, -170.0, epsilon = 1e-4);

        let d = fold_spherical(350.0, 0.0);
        assert_abs_diff_eq!(d.azimuth, -10.0, epsilon = 1e-4);
    }
}
