//! Offline resampling of impulse response sets
//!
//! Wraps a rubato sinc resampler for whole-signal conversion. The resampler's
//! own group delay is removed and the tail is flushed, so the output is time
//! aligned with the input and exactly `ceil(len * out_fs / in_fs)` long.

use ndarray::{Array2, ArrayView2};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use thiserror::Error;

/// Resampling errors
#[derive(Debug, Error)]
pub enum ResampleError {
    #[error("Failed to create resampler: {0}")]
    Construction(#[from] rubato::ResamplerConstructionError),

    #[error("Failed to process samples: {0}")]
    Process(#[from] rubato::ResampleError),

    #[error("Invalid sample rate: {0}")]
    InvalidRate(f64),

    #[error("Nothing to resample")]
    Empty,
}

/// Output length of a signal of `len` samples converted from `in_fs` to `out_fs`
pub fn resampled_len(len: usize, in_fs: f64, out_fs: f64) -> usize {
    (len as f64 * out_fs / in_fs).ceil() as usize
}

/// Resample every row of `impulses` [signals, len] from `in_fs` to `out_fs`.
///
/// Returns the resampled rows and their new common length. Equal rates pass
/// the input through unchanged.
pub fn resample(
    impulses: ArrayView2<f32>,
    in_fs: f64,
    out_fs: f64,
) -> Result<(Array2<f32>, usize), ResampleError> {
    for fs in [in_fs, out_fs] {
        if !(fs.is_finite() && fs > 0.0) {
            return Err(ResampleError::InvalidRate(fs));
        }
    }

    let (signals, len) = impulses.dim();
    if signals == 0 || len == 0 {
        return Err(ResampleError::Empty);
    }

    if (in_fs - out_fs).abs() < f64::EPSILON {
        return Ok((impulses.to_owned(), len));
    }

    let ratio = out_fs / in_fs;
    let new_len = resampled_len(len, in_fs, out_fs);

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window: WindowFunction::Blackman,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, len, signals)?;
    let delay = resampler.output_delay();

    let wave_in: Vec<Vec<f32>> = impulses.rows().into_iter().map(|r| r.to_vec()).collect();
    let mut collected = resampler.process(&wave_in, None)?;

    // Flush with silence until the delayed tail is out
    while collected.first().map_or(0, Vec::len) < delay + new_len {
        let tail = resampler.process_partial(None::<&[Vec<f32>]>, None)?;
        let produced = tail.first().map_or(0, Vec::len);
        if produced == 0 {
            break;
        }
        for (dst, src) in collected.iter_mut().zip(tail) {
            dst.extend(src);
        }
    }

    let mut out = Array2::zeros((signals, new_len));
    for (mut row, samples) in out.rows_mut().into_iter().zip(&collected) {
        if samples.len() <= delay {
            continue;
        }
        let available = (samples.len() - delay).min(new_len);
        for (dst, &src) in row.iter_mut().zip(&samples[delay..delay + available]) {
            *dst = src;
        }
    }

    log::debug!(
        "Resampled {signals} impulses {in_fs} Hz -> {out_fs} Hz ({len} -> {new_len} samples)"
    );

    Ok((out, new_len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_rates_pass_through() {
        let input = Array2::from_shape_fn((3, 16), |(r, c)| (r * 16 + c) as f32);
        let (out, len) = resample(input.view(), 48000.0, 48000.0).unwrap();
        assert_eq!(len, 16);
        assert_eq!(out, input);
    }

    #[test]
    fn test_upsample_doubles_length() {
        let input = Array2::from_shape_fn((2, 101), |(_, c)| (c as f32 * 0.1).sin());
        let (out, len) = resample(input.view(), 48000.0, 96000.0).unwrap();
        assert_eq!(len, 202);
        assert_eq!(out.dim(), (2, 202));
        assert!(out.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_downsample_keeps_low_frequency_tone() {
        let len = 2048;
        let freq = 500.0;
        let input = Array2::from_shape_fn((1, len), |(_, n)| {
            (2.0 * std::f32::consts::PI * freq * n as f32 / 48000.0).sin()
        });
        let (out, new_len) = resample(input.view(), 48000.0, 44100.0).unwrap();
        assert_eq!(new_len, resampled_len(len, 48000.0, 44100.0));

        // Compare the middle, away from edge transients
        for n in 200..new_len - 200 {
            let expected = (2.0 * std::f32::consts::PI * freq * n as f32 / 44100.0).sin();
            assert!((out[[0, n]] - expected).abs() < 0.1, "n={n}");
        }
    }

    #[test]
    fn test_rejects_invalid_input() {
        let input = Array2::<f32>::zeros((1, 8));
        assert!(matches!(
            resample(input.view(), 0.0, 48000.0),
            Err(ResampleError::InvalidRate(_))
        ));
        let empty = Array2::<f32>::zeros((0, 8));
        assert!(matches!(
            resample(empty.view(), 44100.0, 48000.0),
            Err(ResampleError::Empty)
        ));
    }
}
