//! Incremental 3-D convex hull over unit direction vectors

use std::collections::HashSet;

use nalgebra::Vector3;

use crate::error::GeometryError;

/// Distance tolerance for the visibility test
const HULL_EPS: f64 = 1e-9;

struct Face {
    v: [usize; 3],
    normal: Vector3<f64>,
    offset: f64,
}

impl Face {
    fn new(points: &[Vector3<f64>], v: [usize; 3]) -> Option<Self> {
        let [a, b, c] = v.map(|i| points[i]);
        let normal = (b - a).cross(&(c - a));
        let norm = normal.norm();
        if norm < 1e-15 {
            return None;
        }
        let normal = normal / norm;
        Some(Self {
            v,
            normal,
            offset: normal.dot(&a),
        })
    }

    fn distance(&self, p: &Vector3<f64>) -> f64 {
        self.normal.dot(p) - self.offset
    }

    fn flipped(self) -> Self {
        Self {
            v: [self.v[0], self.v[2], self.v[1]],
            normal: -self.normal,
            offset: -self.offset,
        }
    }
}

/// Outward-facing triangles of the convex hull of `points`.
///
/// Vertices are wound counter-clockwise seen from outside. Points that fall
/// inside (or on) the hull, including duplicates, are not used as vertices.
pub fn convex_hull(points: &[Vector3<f64>]) -> Result<Vec<[usize; 3]>, GeometryError> {
    if points.len() < 4 {
        return Err(GeometryError::TooFewDirections {
            min: 4,
            got: points.len(),
        });
    }

    let seed = initial_tetrahedron(points)?;
    let centroid = seed.iter().map(|&i| points[i]).sum::<Vector3<f64>>() / 4.0;

    let mut faces: Vec<Face> = Vec::with_capacity(2 * points.len());
    for v in [
        [seed[0], seed[1], seed[2]],
        [seed[0], seed[1], seed[3]],
        [seed[0], seed[2], seed[3]],
        [seed[1], seed[2], seed[3]],
    ] {
        let face = Face::new(points, v).ok_or_else(|| {
            GeometryError::Degenerate("initial simplex has a zero-area face".into())
        })?;
        faces.push(if face.distance(&centroid) > 0.0 { face.flipped() } else { face });
    }

    let mut visible_edges: HashSet<(usize, usize)> = HashSet::new();
    for (i, p) in points.iter().enumerate() {
        if seed.contains(&i) {
            continue;
        }

        visible_edges.clear();
        for face in faces.iter().filter(|f| f.distance(p) > HULL_EPS) {
            let [a, b, c] = face.v;
            visible_edges.extend([(a, b), (b, c), (c, a)]);
        }
        if visible_edges.is_empty() {
            continue;
        }

        faces.retain(|f| f.distance(p) <= HULL_EPS);
        for &(a, b) in &visible_edges {
            if visible_edges.contains(&(b, a)) {
                continue;
            }
            // Horizon edge: keep the visible face's winding
            if let Some(face) = Face::new(points, [a, b, i]) {
                faces.push(face);
            }
        }
    }

    if faces.is_empty() {
        return Err(GeometryError::EmptyHull);
    }
    Ok(faces.into_iter().map(|f| f.v).collect())
}

fn initial_tetrahedron(points: &[Vector3<f64>]) -> Result<[usize; 4], GeometryError> {
    let p0 = 0;
    let p1 = argmax(points, |p| (p - points[p0]).norm());
    if (points[p1] - points[p0]).norm() < HULL_EPS {
        return Err(GeometryError::Degenerate("all directions coincide".into()));
    }

    let axis = (points[p1] - points[p0]).normalize();
    let p2 = argmax(points, |p| (p - points[p0]).cross(&axis).norm());
    if (points[p2] - points[p0]).cross(&axis).norm() < HULL_EPS {
        return Err(GeometryError::Degenerate("all directions are collinear".into()));
    }

    let normal = (points[p1] - points[p0])
        .cross(&(points[p2] - points[p0]))
        .normalize();
    let p3 = argmax(points, |p| (p - points[p0]).dot(&normal).abs());
    if (points[p3] - points[p0]).dot(&normal).abs() < HULL_EPS {
        return Err(GeometryError::Degenerate("all directions are coplanar".into()));
    }

    Ok([p0, p1, p2, p3])
}

fn argmax(points: &[Vector3<f64>], score: impl Fn(&Vector3<f64>) -> f64) -> usize {
    let mut best = 0;
    let mut best_score = f64::NEG_INFINITY;
    for (i, p) in points.iter().enumerate() {
        let s = score(p);
        if s > best_score {
            best = i;
            best_score = s;
        }
    }
    best
}
