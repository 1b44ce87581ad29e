//! Diffuse-field equalisation
//!
//! Divides every filter by the energy-weighted average response over all
//! measured directions and both ears, per band and per filter set.

use ndarray::{Array4, Axis};
use num_complex::Complex32;

use crate::geometry::GainTable;
use crate::position::Direction;

/// Default cap on the directions for which integration weights are computed
pub const MAX_WEIGHTED_DIRECTIONS: usize = 3600;

/// Smallest diffuse-field magnitude divided by
const MIN_CTF: f32 = 1e-8;

/// Quadrature weights of the measurement grid, summing to one.
///
/// Each 3-D hull triangle contributes a third of its spherical area to each
/// of its vertices; on a 2-D ring each direction gets half the arc to either
/// neighbour. Returns `None` when the triangulation covers no area.
pub fn grid_weights(table: &GainTable, directions: &[Direction]) -> Option<Vec<f32>> {
    let mut weights = vec![0.0f64; directions.len()];
    let unit = |i: usize| {
        let [x, y, z] = directions[i].to_cartesian();
        nalgebra::Vector3::new(x as f64, y as f64, z as f64).normalize()
    };

    for &[a, b, c] in table.triangles() {
        if a >= directions.len() || b >= directions.len() || c >= directions.len() {
            return None;
        }
        if table.is_3d() {
            let (va, vb, vc) = (unit(a), unit(b), unit(c));
            // Van Oosterom & Strackee solid angle
            let numer = va.dot(&vb.cross(&vc)).abs();
            let denom = 1.0 + va.dot(&vb) + vb.dot(&vc) + vc.dot(&va);
            let area = 2.0 * numer.atan2(denom);
            for v in [a, b, c] {
                weights[v] += area / 3.0;
            }
        } else {
            let arc = unit(a).dot(&unit(b)).clamp(-1.0, 1.0).acos();
            weights[a] += arc / 2.0;
            weights[b] += arc / 2.0;
        }
    }

    let total: f64 = weights.iter().sum();
    if !(total.is_finite() && total > 1e-12) {
        return None;
    }
    Some(weights.into_iter().map(|w| (w / total) as f32).collect())
}

/// Integration weights with the degraded-quality fallbacks applied
pub fn integration_weights(
    table: &GainTable,
    directions: &[Direction],
    max_directions: usize,
) -> Vec<f32> {
    let n = directions.len();
    let uniform = || vec![1.0 / n.max(1) as f32; n];

    if n > max_directions {
        log::warn!(
            "{n} HRIR directions exceed the integration weight cap ({max_directions}), using uniform weights"
        );
        return uniform();
    }
    grid_weights(table, directions).unwrap_or_else(|| {
        log::warn!("Could not compute grid integration weights, using uniform weights");
        uniform()
    })
}

/// Equalise `hrtf_fb` [sets, bands, ears, dirs] in place
pub fn apply_diffuse_field_eq(hrtf_fb: &mut Array4<Complex32>, weights: &[f32]) {
    for mut set in hrtf_fb.axis_iter_mut(Axis(0)) {
        for mut band in set.axis_iter_mut(Axis(0)) {
            let mut energy = 0.0f32;
            for ear in band.axis_iter(Axis(0)) {
                for (h, &w) in ear.iter().zip(weights) {
                    energy += w * h.norm_sqr();
                }
            }
            let ctf = (energy / crate::NUM_EARS as f32).sqrt().max(MIN_CTF);
            band.mapv_inplace(|h| h / ctf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hrir::synthetic::default_directions;

    fn ring(n: usize) -> Vec<Direction> {
        (0..n)
            .map(|i| Direction::new(-180.0 + 360.0 * i as f32 / n as f32, 0.0))
            .collect()
    }

    #[test]
    fn test_3d_weights_sum_to_one_and_favour_sparse_regions() {
        let dirs = default_directions();
        let table = GainTable::build(&dirs, 2.0, 5.0).unwrap();
        let w = grid_weights(&table, &dirs).unwrap();
        let sum: f32 = w.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);

        // Equator points cover more area than points near the poles
        let equator = dirs.iter().position(|d| d.elevation == 0.0).unwrap();
        let high = dirs.iter().position(|d| d.elevation == 80.0).unwrap();
        assert!(w[equator] > w[high]);
    }

    #[test]
    fn test_uniform_ring_weights() {
        let dirs = ring(8);
        let table = GainTable::build(&dirs, 2.0, 5.0).unwrap();
        let w = grid_weights(&table, &dirs).unwrap();
        for &v in &w {
            assert!((v - 0.125).abs() < 1e-5);
        }
    }

    #[test]
    fn test_cap_falls_back_to_uniform() {
        let dirs = ring(8);
        let table = GainTable::build(&dirs, 2.0, 5.0).unwrap();
        let w = integration_weights(&table, &dirs, 4);
        assert!(w.iter().all(|&v| (v - 0.125).abs() < 1e-6));
    }

    #[test]
    fn test_equalised_bank_has_flat_diffuse_field() {
        let dirs = 4;
        let bands = 5;
        let mut fb = Array4::from_shape_fn((2, bands, 2, dirs), |(s, b, e, d)| {
            Complex32::new(1.0 + (s + b) as f32 * 0.5 + e as f32 * 0.1, d as f32 * 0.2)
        });
        let weights = vec![0.25; dirs];
        apply_diffuse_field_eq(&mut fb, &weights);

        for s in 0..2 {
            for b in 0..bands {
                let mut energy = 0.0;
                for e in 0..2 {
                    for d in 0..dirs {
                        energy += weights[d] * fb[[s, b, e, d]].norm_sqr();
                    }
                }
                assert!((energy / 2.0 - 1.0).abs() < 1e-4, "set {s} band {b}: {energy}");
            }
        }
    }

    #[test]
    fn test_silent_bank_stays_finite() {
        let mut fb = Array4::from_elem((1, 3, 2, 2), Complex32::new(0.0, 0.0));
        apply_diffuse_field_eq(&mut fb, &[0.5, 0.5]);
        assert!(fb.iter().all(|h| h.re.is_finite() && h.im.is_finite()));
    }
}
