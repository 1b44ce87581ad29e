//! JSON HRIR container
//!
//! ```json
//! {
//!   "sample_rate": 48000,
//!   "receivers": 2,
//!   "directions_deg": [[0.0, 0.0], [30.0, 0.0]],
//!   "impulses": [[[[1.0, 0.5], [0.8, 0.2]], [[0.9, 0.1], [0.4, 0.3]]]],
//!   "emitters": { "units": "metre", "positions": [[1.0, 0.0, 0.0]] }
//! }
//! ```
//!
//! `impulses` is nested [sets][directions][ears][samples]. `emitters` is
//! optional; with `"units": "degree"` positions are [azimuth, elevation(, r)].

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use ndarray::Array4;
use serde::{Deserialize, Serialize};

use super::{EmitterLayout, HrirData, HrirLoader};
use crate::error::LoadError;
use crate::position::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmitterUnits {
    Metre,
    Degree,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmitterFile {
    pub units: EmitterUnits,
    pub positions: Vec<Vec<f32>>,
}

/// On-disk layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HrirFile {
    pub sample_rate: f32,
    pub receivers: usize,
    pub directions_deg: Vec<[f32; 2]>,
    pub impulses: Vec<Vec<Vec<Vec<f32>>>>,
    #[serde(default)]
    pub emitters: Option<EmitterFile>,
}

impl HrirFile {
    /// Validate and convert into measurement data
    pub fn into_data(self) -> Result<HrirData, LoadError> {
        if self.receivers != crate::NUM_EARS {
            return Err(LoadError::ReceiverCount(self.receivers));
        }
        if self.directions_deg.is_empty() {
            return Err(LoadError::EmptyGrid);
        }

        let sets = self.impulses.len();
        let dirs = self.directions_deg.len();
        let len = self
            .impulses
            .first()
            .and_then(|s| s.first())
            .and_then(|d| d.first())
            .map_or(0, Vec::len);

        let mut flat = Vec::with_capacity(sets * dirs * crate::NUM_EARS * len);
        for (s, set) in self.impulses.iter().enumerate() {
            if set.len() != dirs {
                return Err(LoadError::Dimensions(format!(
                    "set {s} has {} directions, expected {dirs}",
                    set.len()
                )));
            }
            for (d, ears) in set.iter().enumerate() {
                if ears.len() != self.receivers {
                    return Err(LoadError::ReceiverCount(ears.len()));
                }
                for ear in ears {
                    if ear.len() != len {
                        return Err(LoadError::Dimensions(format!(
                            "set {s} direction {d}: {} samples, expected {len}",
                            ear.len()
                        )));
                    }
                    flat.extend_from_slice(ear);
                }
            }
        }

        let impulses = Array4::from_shape_vec((sets, dirs, crate::NUM_EARS, len), flat)
            .map_err(|e| LoadError::Dimensions(e.to_string()))?;

        let emitters = self.emitters.map(parse_emitters).transpose()?;
        let directions = self
            .directions_deg
            .iter()
            .map(|&[azi, elev]| Direction::new(azi, elev))
            .collect();

        HrirData::new(directions, self.sample_rate, impulses, emitters)
    }
}

fn parse_emitters(file: EmitterFile) -> Result<EmitterLayout, LoadError> {
    match file.units {
        EmitterUnits::Metre => file
            .positions
            .iter()
            .map(|p| match p.as_slice() {
                &[x, y, z] => Ok([x, y, z]),
                _ => Err(LoadError::Dimensions(format!(
                    "cartesian emitter needs 3 coordinates, got {}",
                    p.len()
                ))),
            })
            .collect::<Result<_, _>>()
            .map(EmitterLayout::Cartesian),
        EmitterUnits::Degree => file
            .positions
            .iter()
            .map(|p| match p.as_slice() {
                &[azi, elev] | &[azi, elev, _] => Ok([azi, elev]),
                _ => Err(LoadError::Dimensions(format!(
                    "spherical emitter needs 2 or 3 coordinates, got {}",
                    p.len()
                ))),
            })
            .collect::<Result<_, _>>()
            .map(EmitterLayout::Spherical),
    }
}

/// Loads [`HrirFile`] JSON documents
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonHrirLoader;

impl JsonHrirLoader {
    pub fn parse_str(&self, json: &str) -> Result<HrirData, LoadError> {
        let file: HrirFile = serde_json::from_str(json)?;
        file.into_data()
    }
}

impl HrirLoader for JsonHrirLoader {
    fn open(&self, path: &Path) -> Result<HrirData, LoadError> {
        let reader = BufReader::new(File::open(path)?);
        let file: HrirFile = serde_json::from_reader(reader)?;
        file.into_data()
    }
}
