//! VBAP gain table over an irregular measurement grid
//!
//! Maps a regular azimuth × elevation query grid onto at most three measured
//! directions with amplitude-normalised weights:
//! - 3-D grids: vector-base amplitude panning over the convex hull triangles
//! - 2-D rings (all measurements at one elevation): pairwise panning between
//!   azimuth neighbours, one elevation row
//!
//! The table is stored compressed: `[cells, 3]` index and weight arrays.

use nalgebra::{Matrix2, Matrix3, RowVector2, RowVector3, Vector2, Vector3};
use ndarray::Array2;

use super::hull::convex_hull;
use crate::error::GeometryError;
use crate::position::{wrap_azimuth, Direction};

/// Negative gain tolerated when testing triangle containment
const CONTAINMENT_TOL: f64 = -1e-5;

/// Elevation span (relative to 180°) below which a grid is treated as a ring
const FLAT_GRID_TOL: f32 = 1e-6;

/// Compressed direction → (measurement, weight) lookup
#[derive(Debug, Clone)]
pub struct GainTable {
    /// Measurement indices per cell [cells, 3]
    idx: Array2<usize>,
    /// Weights per cell [cells, 3], summing to one
    weights: Array2<f32>,
    /// Azimuth resolution (degrees)
    azi_res: f32,
    /// Elevation resolution (degrees)
    elev_res: f32,
    /// Cells per elevation row
    n_azi: usize,
    /// Elevation rows (1 for 2-D grids)
    n_elev: usize,
    /// True when built by 3-D triangulation
    is_3d: bool,
    /// Number of measured directions the table indexes
    n_dirs: usize,
    /// Hull triangles (3-D) or neighbour pairs as degenerate triangles (2-D)
    triangles: Vec<[usize; 3]>,
}

/// True when every direction shares (approximately) one elevation
pub fn is_flat_grid(directions: &[Direction]) -> bool {
    let (min, max) = directions
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), d| {
            (lo.min(d.elevation), hi.max(d.elevation))
        });
    directions.is_empty() || (max - min) / 180.0 < FLAT_GRID_TOL
}

impl GainTable {
    /// Build a gain table for `directions` at the given query resolution
    pub fn build(
        directions: &[Direction],
        azi_res: f32,
        elev_res: f32,
    ) -> Result<Self, GeometryError> {
        if !(azi_res > 0.0 && elev_res > 0.0 && azi_res.is_finite() && elev_res.is_finite()) {
            return Err(GeometryError::InvalidResolution {
                azi: azi_res,
                elev: elev_res,
            });
        }

        let n_azi = (360.0 / azi_res + 0.5) as usize + 1;
        if is_flat_grid(directions) {
            Self::build_2d(directions, azi_res, elev_res, n_azi)
        } else {
            let n_elev = (180.0 / elev_res + 0.5) as usize + 1;
            Self::build_3d(directions, azi_res, elev_res, n_azi, n_elev)
        }
    }

    fn build_3d(
        directions: &[Direction],
        azi_res: f32,
        elev_res: f32,
        n_azi: usize,
        n_elev: usize,
    ) -> Result<Self, GeometryError> {
        let points: Vec<Vector3<f64>> = directions.iter().map(unit_vector).collect();

        // Faces not enclosing the listener (e.g. the cap of a hemispherical
        // grid) are not usable for panning
        let triangles: Vec<[usize; 3]> = convex_hull(&points)?
            .into_iter()
            .filter(|f| {
                let [a, b, c] = f.map(|i| points[i]);
                (b - a).cross(&(c - a)).dot(&a) > 1e-9
            })
            .collect();
        if triangles.is_empty() {
            return Err(GeometryError::EmptyHull);
        }

        let inverses: Vec<Option<Matrix3<f64>>> = triangles
            .iter()
            .map(|f| {
                let [a, b, c] = f.map(|i| points[i]);
                Matrix3::from_rows(&[a.transpose(), b.transpose(), c.transpose()]).try_inverse()
            })
            .collect();

        let cells = n_azi * n_elev;
        let mut idx = Array2::zeros((cells, 3));
        let mut weights = Array2::zeros((cells, 3));

        for row in 0..n_elev {
            let elev = (-90.0 + row as f32 * elev_res).min(90.0);
            for col in 0..n_azi {
                let azi = -180.0 + col as f32 * azi_res;
                let target = unit_vector(&Direction::new(azi, elev)).transpose();

                let mut best: Option<(usize, RowVector3<f64>, f64)> = None;
                for (t, inv) in inverses.iter().enumerate() {
                    let Some(inv) = inv else { continue };
                    let g: RowVector3<f64> = target * inv;
                    let min_g = g.min();
                    if best.as_ref().is_none_or(|(_, _, m)| min_g > *m) {
                        best = Some((t, g, min_g));
                    }
                    if min_g > CONTAINMENT_TOL {
                        break;
                    }
                }

                let Some((t, g, _)) = best else {
                    return Err(GeometryError::Degenerate("no invertible triangle".into()));
                };
                let g = g.map(|x| x.max(0.0));
                let sum = g.sum();
                let cell = row * n_azi + col;
                for k in 0..3 {
                    idx[[cell, k]] = triangles[t][k];
                    weights[[cell, k]] = if sum > 1e-12 {
                        (g[k] / sum) as f32
                    } else {
                        1.0 / 3.0
                    };
                }
            }
        }

        Ok(Self {
            idx,
            weights,
            azi_res,
            elev_res,
            n_azi,
            n_elev,
            is_3d: true,
            n_dirs: directions.len(),
            triangles,
        })
    }

    fn build_2d(
        directions: &[Direction],
        azi_res: f32,
        elev_res: f32,
        n_azi: usize,
    ) -> Result<Self, GeometryError> {
        let mut order: Vec<usize> = (0..directions.len()).collect();
        order.sort_by(|&a, &b| directions[a].azimuth.total_cmp(&directions[b].azimuth));
        // Duplicated azimuths add nothing to a ring
        order.dedup_by(|a, b| (directions[*a].azimuth - directions[*b].azimuth).abs() < 1e-4);
        // -180 and 180 are the same direction
        if let (Some(&first), Some(&last)) = (order.first(), order.last()) {
            if order.len() > 1
                && angle_diff(directions[first].azimuth, directions[last].azimuth) < 1e-4
            {
                order.pop();
            }
        }
        if order.len() < 2 {
            return Err(GeometryError::TooFewDirections {
                min: 2,
                got: order.len(),
            });
        }

        let pairs: Vec<(usize, usize)> = (0..order.len())
            .map(|i| (order[i], order[(i + 1) % order.len()]))
            .collect();

        let mut idx = Array2::zeros((n_azi, 3));
        let mut weights = Array2::zeros((n_azi, 3));

        for col in 0..n_azi {
            let azi = -180.0 + col as f32 * azi_res;
            let (pair, start) = pairs
                .iter()
                .enumerate()
                .find_map(|(p, &(a, _))| {
                    let from = directions[a].azimuth;
                    let arc = angle_diff(directions[pairs[p].1].azimuth, from);
                    let offset = angle_diff(azi, from);
                    (offset <= arc + 1e-4).then_some((p, from))
                })
                .unwrap_or((0, directions[pairs[0].0].azimuth));

            let (a, b) = pairs[pair];
            let arc = angle_diff(directions[b].azimuth, start);
            let offset = angle_diff(azi, start).min(arc);
            let (ga, gb) = pair_gains(offset, arc);

            let sum = ga + gb;
            idx[[col, 0]] = a;
            idx[[col, 1]] = b;
            weights[[col, 0]] = ga / sum;
            weights[[col, 1]] = gb / sum;
        }

        Ok(Self {
            idx,
            weights,
            azi_res,
            elev_res,
            n_azi,
            n_elev: 1,
            is_3d: false,
            n_dirs: directions.len(),
            triangles: pairs.iter().map(|&(a, b)| [a, b, b]).collect(),
        })
    }

    /// Cell index of the query direction nearest `(azimuth, elevation)` degrees
    pub fn cell_index(&self, azimuth: f32, elevation: f32) -> usize {
        let azi = (wrap_azimuth(azimuth) + 180.0).rem_euclid(360.0);
        let col = ((azi / self.azi_res + 0.5) as usize).min(self.n_azi - 1);
        let row = if self.is_3d {
            let elev = elevation.clamp(-90.0, 90.0) + 90.0;
            ((elev / self.elev_res + 0.5) as usize).min(self.n_elev - 1)
        } else {
            0
        };
        row * self.n_azi + col
    }

    /// The (measurement index, weight) triplet for a query direction
    pub fn lookup(&self, azimuth: f32, elevation: f32) -> ([usize; 3], [f32; 3]) {
        let cell = self.cell_index(azimuth, elevation);
        (
            [self.idx[[cell, 0]], self.idx[[cell, 1]], self.idx[[cell, 2]]],
            [
                self.weights[[cell, 0]],
                self.weights[[cell, 1]],
                self.weights[[cell, 2]],
            ],
        )
    }

    pub fn indices(&self) -> &Array2<usize> {
        &self.idx
    }

    pub fn weights(&self) -> &Array2<f32> {
        &self.weights
    }

    pub fn num_cells(&self) -> usize {
        self.n_azi * self.n_elev
    }

    pub fn is_3d(&self) -> bool {
        self.is_3d
    }

    pub fn num_directions(&self) -> usize {
        self.n_dirs
    }

    /// Hull triangles; in 2-D each ring segment `[a, b, b]`
    pub fn triangles(&self) -> &[[usize; 3]] {
        &self.triangles
    }

    /// Number of triangles (3-D) or ring segments (2-D)
    pub fn num_triangles(&self) -> usize {
        self.triangles.len()
    }
}

fn unit_vector(d: &Direction) -> Vector3<f64> {
    let [x, y, z] = d.to_cartesian();
    Vector3::new(x as f64, y as f64, z as f64).normalize()
}

/// Counter-clockwise angle from `from` to `to`, in [0, 360)
fn angle_diff(to: f32, from: f32) -> f32 {
    (to - from).rem_euclid(360.0)
}

/// Gains for a point `offset` degrees into an arc of `arc` degrees
fn pair_gains(offset: f32, arc: f32) -> (f32, f32) {
    if arc < 1e-6 {
        return (1.0, 0.0);
    }
    if arc < 179.0 {
        // 2-D VBAP in the plane of the arc
        let (sa, ca) = arc.to_radians().sin_cos();
        let (so, co) = offset.to_radians().sin_cos();
        let base = Matrix2::from_rows(&[RowVector2::new(1.0, 0.0), RowVector2::new(ca, sa)]);
        if let Some(inv) = base.try_inverse() {
            let g = Vector2::new(co, so).transpose() * inv;
            let (ga, gb) = (g[0].max(0.0), g[1].max(0.0));
            if ga + gb > 1e-9 {
                return (ga, gb);
            }
        }
    }
    let t = offset / arc;
    (1.0 - t, t)
}
