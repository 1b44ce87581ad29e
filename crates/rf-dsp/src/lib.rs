//! rf-dsp: DSP building blocks for ReelForge
//!
//! Signal-processing pieces shared by the renderers.
//!
//! ## Modules
//! - `stft` - Fixed-hop STFT analysis/synthesis filterbank, band centre
//!   frequencies and FIR → band coefficient conversion
//! - `resample` - Offline sinc resampling of impulse response sets

pub mod resample;
pub mod stft;

pub use resample::{resample, resampled_len, ResampleError};
pub use stft::{
    centre_frequencies, fir_to_filterbank_coeffs, FilterbankConverter, Stft, HOP_SIZE, NUM_BANDS,
    STFT_DELAY, STFT_FRAME_LEN,
};

/// Trait for stateful DSP processors
pub trait Processor: Send {
    /// Reset processor state
    fn reset(&mut self);

    /// Get latency in samples
    fn latency(&self) -> usize {
        0
    }
}
