//! HRIR measurement data
//!
//! - `HrirData` - measured directions plus one or more impulse sets
//! - `HrirLoader` - file loading seam, with a JSON implementation
//! - `synthetic` - built-in default grid
//! - `itd` - interaural time difference estimation

pub mod itd;
pub mod json;
pub mod synthetic;

use std::path::Path;

use ndarray::Array4;

use crate::error::LoadError;
use crate::position::{fold_spherical, Direction};
use crate::NUM_EARS;

pub use itd::estimate_itds;
pub use json::JsonHrirLoader;
pub use synthetic::default_hrirs;

/// Emitter (source) positions carried by a multi-emitter BRIR file
#[derive(Debug, Clone, PartialEq)]
pub enum EmitterLayout {
    /// Positions in metres, head-related Cartesian axes
    Cartesian(Vec<[f32; 3]>),
    /// (azimuth, elevation) degrees, possibly outside the stored ranges
    Spherical(Vec<[f32; 2]>),
}

impl EmitterLayout {
    pub fn len(&self) -> usize {
        match self {
            EmitterLayout::Cartesian(p) => p.len(),
            EmitterLayout::Spherical(p) => p.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Emitter directions in [-180, 180] × [-90, 90]
    pub fn directions(&self) -> Vec<Direction> {
        match self {
            EmitterLayout::Cartesian(p) => p.iter().map(|&v| Direction::from_cartesian(v)).collect(),
            EmitterLayout::Spherical(p) => {
                p.iter().map(|&[azi, elev]| fold_spherical(azi, elev)).collect()
            }
        }
    }
}

/// A measured (or generated) HRIR grid
#[derive(Debug, Clone)]
pub struct HrirData {
    /// Measurement directions, normalised
    pub directions: Vec<Direction>,
    /// Sample rate of `impulses`
    pub sample_rate: f32,
    /// Impulses [sets, dirs, ears, len]
    pub impulses: Array4<f32>,
    /// Emitter layout, one emitter per impulse set
    pub emitters: Option<EmitterLayout>,
}

impl HrirData {
    /// Validate and normalise raw measurement data
    pub fn new(
        directions: Vec<Direction>,
        sample_rate: f32,
        impulses: Array4<f32>,
        emitters: Option<EmitterLayout>,
    ) -> Result<Self, LoadError> {
        let (sets, dirs, ears, len) = impulses.dim();
        if directions.is_empty() || dirs == 0 {
            return Err(LoadError::EmptyGrid);
        }
        if ears != NUM_EARS {
            return Err(LoadError::ReceiverCount(ears));
        }
        if dirs != directions.len() || sets == 0 || len == 0 {
            return Err(LoadError::Dimensions(format!(
                "{} directions but impulses are [{sets}, {dirs}, {ears}, {len}]",
                directions.len()
            )));
        }
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(LoadError::SampleRate(sample_rate));
        }
        if let Some(layout) = &emitters {
            if layout.len() != sets {
                return Err(LoadError::Dimensions(format!(
                    "{} emitters for {sets} impulse sets",
                    layout.len()
                )));
            }
        }

        // Files commonly store azimuth as 0..360
        let directions = directions
            .into_iter()
            .map(|d| Direction::normalized(d.azimuth, d.elevation))
            .collect();

        Ok(Self {
            directions,
            sample_rate,
            impulses,
            emitters,
        })
    }

    pub fn num_sets(&self) -> usize {
        self.impulses.dim().0
    }

    pub fn num_directions(&self) -> usize {
        self.directions.len()
    }

    /// Impulse length in samples
    pub fn len(&self) -> usize {
        self.impulses.dim().3
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Source of HRIR data on disk
pub trait HrirLoader: Send + Sync {
    /// Read and validate the file at `path`
    fn open(&self, path: &Path) -> Result<HrirData, LoadError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_wrong_receiver_count() {
        let impulses = Array4::zeros((1, 2, 3, 16));
        let dirs = vec![Direction::new(0.0, 0.0), Direction::new(90.0, 0.0)];
        assert!(matches!(
            HrirData::new(dirs, 48000.0, impulses, None),
            Err(LoadError::ReceiverCount(3))
        ));
    }

    #[test]
    fn test_normalises_directions() {
        let impulses = Array4::zeros((1, 1, 2, 8));
        let data = HrirData::new(vec![Direction::new(270.0, 0.0)], 44100.0, impulses, None).unwrap();
        assert!((data.directions[0].azimuth + 90.0).abs() < 1e-4);
    }

    #[test]
    fn test_emitter_count_must_match_sets() {
        let impulses = Array4::zeros((2, 1, 2, 8));
        let layout = EmitterLayout::Spherical(vec![[0.0, 0.0]]);
        assert!(matches!(
            HrirData::new(vec![Direction::default()], 48000.0, impulses, Some(layout)),
            Err(LoadError::Dimensions(_))
        ));
    }

    #[test]
    fn test_emitter_normalisation() {
        let cart = EmitterLayout::Cartesian(vec![[0.0, 2.0, 0.0], [1.0, 0.0, 1.0]]);
        let dirs = cart.directions();
        assert!((dirs[0].azimuth - 90.0).abs() < 1e-4);
        assert!((dirs[1].elevation - 45.0).abs() < 1e-4);

        let sph = EmitterLayout::Spherical(vec![[400.0, -100.0]]);
        let d = sph.directions()[0];
        assert!((d.elevation + 80.0).abs() < 1e-4);
        assert!((d.azimuth + 140.0).abs() < 1e-3);
    }
}
