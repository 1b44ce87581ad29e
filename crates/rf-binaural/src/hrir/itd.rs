//! Interaural time difference estimation

use ndarray::{Array2, ArrayView1, ArrayView4};

/// Default analysis prefix (samples)
pub const DEFAULT_ITD_PREFIX: usize = 1000;

/// Largest physically plausible ITD searched (seconds)
const MAX_ITD_SECONDS: f32 = 1.5e-3;

/// Lowpass cutoff applied before correlation; ITD cues live below ~1.5 kHz
const ANALYSIS_CUTOFF_HZ: f32 = 750.0;

/// Estimate one ITD per set and direction, in seconds.
///
/// `impulses` is [sets, dirs, ears, len]. Only the first `prefix` samples of
/// each impulse are analysed. Positive values mean the left ear leads.
pub fn estimate_itds(impulses: ArrayView4<f32>, sample_rate: f32, prefix: usize) -> Array2<f32> {
    let (sets, dirs, _, len) = impulses.dim();
    let n = len.min(prefix.max(1));
    let max_lag = ((MAX_ITD_SECONDS * sample_rate).ceil() as usize).min(n.saturating_sub(1));

    let mut left = vec![0.0f32; n];
    let mut right = vec![0.0f32; n];
    let mut itds = Array2::zeros((sets, dirs));

    for s in 0..sets {
        for d in 0..dirs {
            lowpass_into(impulses.slice(ndarray::s![s, d, 0, ..n]), &mut left, sample_rate);
            lowpass_into(impulses.slice(ndarray::s![s, d, 1, ..n]), &mut right, sample_rate);
            itds[[s, d]] = xcorr_lag(&left, &right, max_lag) / sample_rate;
        }
    }
    itds
}

fn lowpass_into(input: ArrayView1<f32>, out: &mut [f32], sample_rate: f32) {
    let coeff = 1.0 - (-2.0 * std::f32::consts::PI * ANALYSIS_CUTOFF_HZ / sample_rate).exp();
    let mut state = 0.0f32;
    for (o, &x) in out.iter_mut().zip(input.iter()) {
        state += coeff * (x - state);
        *o = state;
    }
}

/// Lag (fractional samples) maximising `sum(left[n] * right[n + lag])`
fn xcorr_lag(left: &[f32], right: &[f32], max_lag: usize) -> f32 {
    let corr = |lag: isize| -> f32 {
        let n = left.len() as isize;
        let (start, end) = (0.max(-lag), n.min(n - lag));
        (start..end)
            .map(|i| left[i as usize] * right[(i + lag) as usize])
            .sum()
    };

    let max_lag = max_lag as isize;
    let mut best_lag = 0isize;
    let mut best = f32::NEG_INFINITY;
    for lag in -max_lag..=max_lag {
        let c = corr(lag);
        if c > best {
            best = c;
            best_lag = lag;
        }
    }

    if best <= 0.0 {
        return 0.0;
    }

    // Parabolic refinement around the peak
    if best_lag > -max_lag && best_lag < max_lag {
        let (a, b, c) = (corr(best_lag - 1), best, corr(best_lag + 1));
        let denom = a - 2.0 * b + c;
        if denom.abs() > 1e-12 {
            let delta = (0.5 * (a - c) / denom).clamp(-0.5, 0.5);
            return best_lag as f32 + delta;
        }
    }
    best_lag as f32
}
