//! Error types for binaural rendering

use thiserror::Error;

/// Gain-table / triangulation failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    /// Not enough directions to triangulate
    #[error("Too few directions: need at least {min}, got {got}")]
    TooFewDirections { min: usize, got: usize },

    /// All directions lie on a plane through the listener (or a single point)
    #[error("Degenerate direction set: {0}")]
    Degenerate(String),

    /// Triangulation produced no usable faces
    #[error("Convex hull has no faces")]
    EmptyHull,

    /// Zero or negative table resolution
    #[error("Invalid gain table resolution: {azi}° x {elev}°")]
    InvalidResolution { azi: f32, elev: f32 },
}

/// HRIR file loading failures
#[derive(Error, Debug)]
pub enum LoadError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed container
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Receiver (ear) count other than two
    #[error("Invalid receiver count: expected 2, got {0}")]
    ReceiverCount(usize),

    /// Array sizes disagree with the declared layout
    #[error("Unexpected dimensions: {0}")]
    Dimensions(String),

    /// No measurement directions
    #[error("HRIR file contains no directions")]
    EmptyGrid,

    /// Unusable sample rate
    #[error("Invalid sample rate: {0}")]
    SampleRate(f32),
}

/// Binaural renderer error types
#[derive(Error, Debug)]
pub enum BinauralError {
    /// Gain-table construction failed
    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),

    /// HRIR data could not be loaded
    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    /// Resampling to the host rate failed
    #[error("Resample error: {0}")]
    Resample(#[from] rf_dsp::ResampleError),

    /// No valid filter bank could be built, not even from the default grid
    #[error("Initialisation failed: {0}")]
    Init(String),

    /// Source index out of range
    #[error("Source index {index} out of range (max {max})")]
    SourceIndex { index: usize, max: usize },

    /// Rejected configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Background worker could not be started
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for binaural operations
pub type BinauralResult<T> = Result<T, BinauralError>;
