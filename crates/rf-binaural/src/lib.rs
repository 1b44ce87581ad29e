//! ReelForge Binaural Renderer
//!
//! Renders up to 64 point sources to two ear signals by interpolating a
//! measured HRTF set in the STFT sub-band domain.
//!
//! ## Pipeline
//! - VBAP gain table over the convex hull of the measurement grid
//!   (2-D ring or 3-D sphere, detected automatically)
//! - HRTF filter bank with ITDs and diffuse-field equalisation
//! - Per-source interpolation (complex blend or magnitude/ITD blend)
//! - Scene rotation (yaw / pitch / roll)
//! - Sub-band mix, 1/√N scaling, inverse STFT
//!
//! ## Threading
//! [`Binauraliser::process`] is real-time safe: it never blocks and renders
//! silence while the filter bank is being rebuilt. Rebuilds run from
//! [`Binauraliser::perform_reinit`], polled by a background worker or by the
//! host.

pub mod bank;
pub mod binauraliser;
pub mod config;
pub mod geometry;
pub mod hrir;
pub mod interp;
pub mod params;
pub mod position;
pub mod renderer;
pub mod rotation;
pub mod state;
pub mod worker;

mod error;

pub use binauraliser::Binauraliser;
pub use config::{BinauralConfig, DiffuseEqMode, InterpMode, RotationOrder};
pub use error::{BinauralError, BinauralResult, GeometryError, LoadError};
pub use hrir::{HrirData, HrirLoader, JsonHrirLoader};
pub use position::Direction;
pub use state::{CodecStatus, ProcStatus, ReinitMode};

/// Maximum number of sources
pub const MAX_NUM_INPUTS: usize = 64;

/// Number of ears (output channels)
pub const NUM_EARS: usize = 2;

/// Samples per processed block
pub const FRAME_SIZE: usize = rf_dsp::HOP_SIZE;

/// STFT hops per block
pub const TIME_SLOTS: usize = FRAME_SIZE / rf_dsp::HOP_SIZE;

/// Output delay in samples, for host latency compensation
pub const PROCESSING_DELAY: usize = rf_dsp::STFT_DELAY;

const _: () = assert!(FRAME_SIZE % rf_dsp::HOP_SIZE == 0);
