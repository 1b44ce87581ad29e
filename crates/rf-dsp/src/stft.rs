//! Short-time Fourier analysis/synthesis filterbank
//!
//! Fixed-hop, 50% overlap STFT used as a sub-band filterbank:
//! - `HOP_SIZE` samples per time slot, frame length `2 * HOP_SIZE`
//! - Square-root periodic Hann on both analysis and synthesis, so the
//!   overlap-added product window sums to exactly one
//! - `NUM_BANDS = HOP_SIZE + 1` real-FFT bins per slot
//!
//! A unit filter (every band multiplied by 1) reconstructs the input delayed
//! by `HOP_SIZE` samples. All buffers are allocated in [`Stft::new`]; the
//! `forward`/`inverse` calls never allocate.

use std::f32::consts::PI;
use std::sync::Arc;

use ndarray::{Array3, ArrayView2, ArrayViewMut2};
use num_complex::Complex32;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

use crate::Processor;

/// Samples per time slot
pub const HOP_SIZE: usize = 128;

/// Analysis frame length
pub const STFT_FRAME_LEN: usize = 2 * HOP_SIZE;

/// Number of frequency bands per time slot
pub const NUM_BANDS: usize = HOP_SIZE + 1;

/// Delay (in samples) between a signal entering `forward` and leaving `inverse`
pub const STFT_DELAY: usize = HOP_SIZE;

/// Multi-channel STFT filterbank
pub struct Stft {
    /// Number of analysed channels
    num_in: usize,
    /// Number of synthesised channels
    num_out: usize,
    /// sqrt-Hann window, shared by analysis and synthesis
    window: Vec<f32>,
    fft_forward: Arc<dyn RealToComplex<f32>>,
    fft_inverse: Arc<dyn ComplexToReal<f32>>,
    /// Sliding input history, `STFT_FRAME_LEN` samples per input channel
    history: Vec<f32>,
    /// Overlap-add accumulator, `STFT_FRAME_LEN` samples per output channel
    ola: Vec<f32>,
    time_buf: Vec<f32>,
    spec_buf: Vec<Complex32>,
    forward_scratch: Vec<Complex32>,
    inverse_scratch: Vec<Complex32>,
}

impl Stft {
    /// Create a filterbank with `num_in` analysis and `num_out` synthesis channels
    pub fn new(num_in: usize, num_out: usize) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let fft_forward = planner.plan_fft_forward(STFT_FRAME_LEN);
        let fft_inverse = planner.plan_fft_inverse(STFT_FRAME_LEN);

        // Periodic Hann, square-rooted
        let window = (0..STFT_FRAME_LEN)
            .map(|i| {
                let hann = 0.5 * (1.0 - (2.0 * PI * i as f32 / STFT_FRAME_LEN as f32).cos());
                hann.sqrt()
            })
            .collect();

        let forward_scratch = fft_forward.make_scratch_vec();
        let inverse_scratch = fft_inverse.make_scratch_vec();

        Self {
            num_in,
            num_out,
            window,
            fft_forward,
            fft_inverse,
            history: vec![0.0; num_in * STFT_FRAME_LEN],
            ola: vec![0.0; num_out * STFT_FRAME_LEN],
            time_buf: vec![0.0; STFT_FRAME_LEN],
            spec_buf: vec![Complex32::new(0.0, 0.0); NUM_BANDS],
            forward_scratch,
            inverse_scratch,
        }
    }

    /// Analyse `input` [channels, frame] into `output` [bands, channels, slots].
    ///
    /// The frame length must be a multiple of `HOP_SIZE`; only the first
    /// `frame / HOP_SIZE` slots of `output` are written. Channels beyond the
    /// filterbank's input count are ignored.
    pub fn forward(&mut self, input: ArrayView2<f32>, output: &mut Array3<Complex32>) {
        let (in_ch, frame) = input.dim();
        let slots = (frame / HOP_SIZE).min(output.dim().2);
        let channels = in_ch.min(self.num_in).min(output.dim().1);

        for ch in 0..channels {
            for slot in 0..slots {
                let hist = &mut self.history[ch * STFT_FRAME_LEN..(ch + 1) * STFT_FRAME_LEN];
                hist.copy_within(HOP_SIZE.., 0);
                for (i, dst) in hist[HOP_SIZE..].iter_mut().enumerate() {
                    *dst = input[[ch, slot * HOP_SIZE + i]];
                }

                for ((t, &h), &w) in self.time_buf.iter_mut().zip(hist.iter()).zip(&self.window) {
                    *t = h * w;
                }
                let res = self.fft_forward.process_with_scratch(
                    &mut self.time_buf,
                    &mut self.spec_buf,
                    &mut self.forward_scratch,
                );
                debug_assert!(res.is_ok(), "forward FFT buffer length mismatch");

                for (band, &bin) in self.spec_buf.iter().enumerate() {
                    output[[band, ch, slot]] = bin;
                }
            }
        }
    }

    /// Synthesise `input` [bands, channels, slots] into `output` [channels, frame].
    pub fn inverse(&mut self, input: &Array3<Complex32>, mut output: ArrayViewMut2<f32>) {
        let (bands, in_ch, in_slots) = input.dim();
        let (out_ch, frame) = output.dim();
        let slots = (frame / HOP_SIZE).min(in_slots);
        let channels = out_ch.min(self.num_out).min(in_ch);
        let norm = 1.0 / STFT_FRAME_LEN as f32;

        for ch in 0..channels {
            for slot in 0..slots {
                for (band, bin) in self.spec_buf.iter_mut().enumerate() {
                    *bin = if band < bands {
                        input[[band, ch, slot]]
                    } else {
                        Complex32::new(0.0, 0.0)
                    };
                }
                // DC and Nyquist must be real for the C2R transform
                self.spec_buf[0].im = 0.0;
                self.spec_buf[NUM_BANDS - 1].im = 0.0;

                let res = self.fft_inverse.process_with_scratch(
                    &mut self.spec_buf,
                    &mut self.time_buf,
                    &mut self.inverse_scratch,
                );
                debug_assert!(res.is_ok(), "inverse FFT buffer length mismatch");

                let acc = &mut self.ola[ch * STFT_FRAME_LEN..(ch + 1) * STFT_FRAME_LEN];
                for ((a, &t), &w) in acc.iter_mut().zip(&self.time_buf).zip(&self.window) {
                    *a += t * w * norm;
                }

                for (i, &a) in acc[..HOP_SIZE].iter().enumerate() {
                    output[[ch, slot * HOP_SIZE + i]] = a;
                }
                acc.copy_within(HOP_SIZE.., 0);
                acc[HOP_SIZE..].fill(0.0);
            }
        }
    }
}

impl Processor for Stft {
    fn reset(&mut self) {
        self.history.fill(0.0);
        self.ola.fill(0.0);
    }

    fn latency(&self) -> usize {
        STFT_DELAY
    }
}

/// Centre frequency (Hz) of every band at `sample_rate`
pub fn centre_frequencies(sample_rate: f32) -> Vec<f32> {
    (0..NUM_BANDS)
        .map(|k| k as f32 * sample_rate / STFT_FRAME_LEN as f32)
        .collect()
}

/// Converts FIR filters to band-domain coefficients.
///
/// Each coefficient is the impulse's transfer function at a band centre, so
/// multiplying a band by it approximates convolution with the impulse.
/// Impulses longer than one frame are folded modulo `STFT_FRAME_LEN` first,
/// which leaves the sampled transfer function unchanged.
pub struct FilterbankConverter {
    fft: Arc<dyn RealToComplex<f32>>,
    folded: Vec<f32>,
    scratch: Vec<Complex32>,
}

impl FilterbankConverter {
    pub fn new() -> Self {
        let fft = RealFftPlanner::<f32>::new().plan_fft_forward(STFT_FRAME_LEN);
        let scratch = fft.make_scratch_vec();
        Self {
            fft,
            folded: vec![0.0; STFT_FRAME_LEN],
            scratch,
        }
    }

    /// Write the `NUM_BANDS` coefficients of `impulse` into `coeffs`
    pub fn convert_into(&mut self, impulse: &[f32], coeffs: &mut [Complex32]) {
        self.folded.fill(0.0);
        for (n, &h) in impulse.iter().enumerate() {
            self.folded[n % STFT_FRAME_LEN] += h;
        }
        if coeffs.len() < NUM_BANDS {
            return;
        }
        let res = self.fft.process_with_scratch(
            &mut self.folded,
            &mut coeffs[..NUM_BANDS],
            &mut self.scratch,
        );
        debug_assert!(res.is_ok(), "filterbank FFT buffer length mismatch");
    }

    pub fn convert(&mut self, impulse: &[f32]) -> Vec<Complex32> {
        let mut coeffs = vec![Complex32::new(0.0, 0.0); NUM_BANDS];
        self.convert_into(impulse, &mut coeffs);
        coeffs
    }
}

impl Default for FilterbankConverter {
    fn default() -> Self {
        Self::new()
    }
}

/// Band-domain coefficients of an FIR filter, see [`FilterbankConverter`]
pub fn fir_to_filterbank_coeffs(impulse: &[f32]) -> Vec<Complex32> {
    FilterbankConverter::new().convert(impulse)
}
