//! Block processing pipeline
//!
//! One fixed-size frame per call:
//! inputs → gain → STFT → (rotate) → interpolate → sub-band mix →
//! 1/√N scaling → inverse STFT → two ear outputs.
//!
//! All buffers are allocated up front.

use std::sync::Arc;

use ndarray::{s, Array2, Array3};
use num_complex::Complex32;
use rf_dsp::{Processor, Stft, NUM_BANDS};

use crate::bank::Generation;
use crate::interp::Interpolator;
use crate::params::{SharedParams, ALL_CHANNELS};
use crate::position::Direction;
use crate::rotation::RotationEngine;
use crate::{FRAME_SIZE, MAX_NUM_INPUTS, NUM_EARS, TIME_SLOTS};

/// Gains this close to unity are not applied
const UNITY_GAIN_TOLERANCE: f32 = 1e-6;

/// Audio-thread state
pub struct Renderer {
    stft: Stft,
    /// Source signals [MAX_NUM_INPUTS, FRAME_SIZE]
    inputs: Array2<f32>,
    /// Source sub-bands [bands, MAX_NUM_INPUTS, slots]
    inputs_tf: Array3<Complex32>,
    /// Ear sub-bands [bands, NUM_EARS, slots]
    outputs_tf: Array3<Complex32>,
    /// Ear signals [NUM_EARS, FRAME_SIZE]
    outputs: Array2<f32>,
    interp: Interpolator,
    rotation: RotationEngine,
    generation: Option<Arc<Generation>>,
    /// Channels needing re-interpolation
    dirty: u64,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer {
    pub fn new() -> Self {
        Self {
            stft: Stft::new(MAX_NUM_INPUTS, NUM_EARS),
            inputs: Array2::zeros((MAX_NUM_INPUTS, FRAME_SIZE)),
            inputs_tf: Array3::zeros((NUM_BANDS, MAX_NUM_INPUTS, TIME_SLOTS)),
            outputs_tf: Array3::zeros((NUM_BANDS, NUM_EARS, TIME_SLOTS)),
            outputs: Array2::zeros((NUM_EARS, FRAME_SIZE)),
            interp: Interpolator::new(),
            rotation: RotationEngine::new(),
            generation: None,
            dirty: ALL_CHANNELS,
        }
    }

    /// Install a new generation; every channel is re-interpolated
    pub fn set_generation(&mut self, generation: Arc<Generation>) {
        self.generation = Some(generation);
        self.dirty = ALL_CHANNELS;
    }

    /// Render one frame of `FRAME_SIZE` samples.
    ///
    /// Returns false without touching `outputs` if no filter bank is installed.
    pub fn render(
        &mut self,
        params: &SharedParams,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
    ) -> bool {
        let Some(generation) = self.generation.clone() else {
            return false;
        };
        let n_sources = params.num_sources().min(MAX_NUM_INPUTS);

        // Copy, zero-padding missing channels
        for (ch, mut row) in self.inputs.outer_iter_mut().enumerate() {
            match inputs.get(ch) {
                Some(src) if ch < n_sources => {
                    let n = src.len().min(FRAME_SIZE);
                    for (dst, &x) in row.iter_mut().zip(&src[..n]) {
                        *dst = x;
                    }
                    row.slice_mut(s![n..]).fill(0.0);
                }
                _ => row.fill(0.0),
            }
        }

        for ch in 0..n_sources {
            let gain = params.gain(ch);
            if (gain - 1.0).abs() > UNITY_GAIN_TOLERANCE {
                self.inputs.row_mut(ch).mapv_inplace(|x| x * gain);
            }
        }

        self.stft.forward(self.inputs.view(), &mut self.inputs_tf);

        self.dirty |= params.take_dirty();
        let rotate = params.rotation_enabled();
        if rotate && params.take_rotation_dirty() {
            let directions: [Direction; MAX_NUM_INPUTS] =
                std::array::from_fn(|ch| params.direction(ch));
            self.rotation
                .rotate_all(&params.rotation(), &directions[..n_sources]);
            self.dirty = ALL_CHANNELS;
        }

        let mode = params.interp_mode();
        for ch in 0..n_sources {
            let direction = if rotate {
                self.rotation.rotated(ch)
            } else {
                params.direction(ch)
            };
            if self
                .interp
                .refresh(ch, &mut self.dirty, &generation, direction, mode)
            {
                params.count_recomputation();
            }
        }

        // Sub-band mix
        self.outputs_tf.fill(Complex32::new(0.0, 0.0));
        for ch in 0..n_sources {
            let filter = self.interp.filter(ch);
            for band in 0..NUM_BANDS {
                for ear in 0..NUM_EARS {
                    let h = filter[[band, ear]];
                    for slot in 0..TIME_SLOTS {
                        self.outputs_tf[[band, ear, slot]] += h * self.inputs_tf[[band, ch, slot]];
                    }
                }
            }
        }

        let scale = 1.0 / (n_sources as f32).sqrt();
        self.outputs_tf.mapv_inplace(|x| x * scale);

        self.stft.inverse(&self.outputs_tf, self.outputs.view_mut());

        for (ch, out) in outputs.iter_mut().enumerate() {
            if ch < NUM_EARS {
                for (dst, &s) in out.iter_mut().zip(self.outputs.row(ch)) {
                    *dst = s;
                }
            } else {
                out.fill(0.0);
            }
        }
        true
    }
}

impl Processor for Renderer {
    fn reset(&mut self) {
        self.stft.reset();
        self.inputs.fill(0.0);
        self.inputs_tf.fill(Complex32::new(0.0, 0.0));
        self.outputs_tf.fill(Complex32::new(0.0, 0.0));
        self.outputs.fill(0.0);
        self.dirty = ALL_CHANNELS;
    }

    fn latency(&self) -> usize {
        self.stft.latency()
    }
}
