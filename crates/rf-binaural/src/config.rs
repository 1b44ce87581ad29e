//! Renderer configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BinauralError, BinauralResult};
use crate::MAX_NUM_INPUTS;

/// How the three nearest measured filters are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum InterpMode {
    /// Weighted sum of the complex filters
    #[default]
    Tri = 0,
    /// Weighted magnitudes and ITD, phase rebuilt from the ITD
    TriPs = 1,
}

impl InterpMode {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => InterpMode::TriPs,
            _ => InterpMode::Tri,
        }
    }
}

/// Diffuse-field equalisation variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum DiffuseEqMode {
    /// Weighted average response of the loaded set
    #[default]
    DiffuseField = 0,
    /// Fixed reference (dummy) head response
    ReferenceHead = 1,
}

impl DiffuseEqMode {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => DiffuseEqMode::ReferenceHead,
            _ => DiffuseEqMode::DiffuseField,
        }
    }
}

/// Order the rotation angles are applied in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum RotationOrder {
    #[default]
    YawPitchRoll = 0,
    RollPitchYaw = 1,
}

impl RotationOrder {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => RotationOrder::RollPitchYaw,
            _ => RotationOrder::YawPitchRoll,
        }
    }
}

/// Binaural renderer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinauralConfig {
    /// Host sample rate (Hz)
    pub sample_rate: f32,
    /// Initial number of sources
    pub num_sources: usize,
    /// Interpolation policy
    pub interp_mode: InterpMode,
    /// Apply diffuse-field equalisation
    pub diffuse_eq: bool,
    /// Equalisation variant
    pub diffuse_eq_mode: DiffuseEqMode,
    /// Gain table resolution (azimuth, elevation) in degrees
    pub table_resolution: (f32, f32),
    /// Samples of each impulse used for ITD estimation
    pub itd_prefix_len: usize,
    /// Above this many directions, uniform integration weights are used
    pub max_weighted_dirs: usize,
    /// Use the built-in HRIR grid
    pub use_default_hrirs: bool,
    /// HRIR file, used when `use_default_hrirs` is false
    pub hrir_path: Option<PathBuf>,
    /// Background reinit worker poll interval (ms)
    pub reinit_poll_interval_ms: u64,
}

impl Default for BinauralConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000.0,
            num_sources: 1,
            interp_mode: InterpMode::Tri,
            diffuse_eq: true,
            diffuse_eq_mode: DiffuseEqMode::DiffuseField,
            table_resolution: (2.0, 5.0),
            itd_prefix_len: crate::hrir::itd::DEFAULT_ITD_PREFIX,
            max_weighted_dirs: crate::bank::diffuse_eq::MAX_WEIGHTED_DIRECTIONS,
            use_default_hrirs: true,
            hrir_path: None,
            reinit_poll_interval_ms: 10,
        }
    }
}

impl BinauralConfig {
    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> BinauralResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| BinauralError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> BinauralResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json(&self) -> BinauralResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| BinauralError::Config(e.to_string()))
    }

    /// Check value ranges
    pub fn validate(&self) -> BinauralResult<()> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(BinauralError::Config(format!(
                "sample rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if !(1..=MAX_NUM_INPUTS).contains(&self.num_sources) {
            return Err(BinauralError::Config(format!(
                "num_sources must be in 1..={MAX_NUM_INPUTS}, got {}",
                self.num_sources
            )));
        }
        let (azi, elev) = self.table_resolution;
        if !(azi > 0.0 && elev > 0.0 && azi <= 90.0 && elev <= 90.0) {
            return Err(BinauralError::Config(format!(
                "table resolution must be in (0, 90], got {azi} x {elev}"
            )));
        }
        if self.itd_prefix_len == 0 {
            return Err(BinauralError::Config("itd_prefix_len must be nonzero".into()));
        }
        if self.reinit_poll_interval_ms == 0 {
            return Err(BinauralError::Config(
                "reinit_poll_interval_ms must be nonzero".into(),
            ));
        }
        Ok(())
    }
}
