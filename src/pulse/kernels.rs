//! Mix-add kernels for accumulating a pulse envelope into an `[I; Q]`
//! waveform buffer.
//!
//! Every kernel advances a unit carrier `phase0, phase0*dcarrier,
//! phase0*dcarrier^2, ...` (`dcarrier = e^{i*dphase}`) across the target
//! columns and accumulates `carrier(n) * (amp*src(n) + drag*slope(n))` into
//! `target[.., n]`, where `src`/`slope` degenerate to constants for the
//! `plateau` kernels. Six specializations skip whatever term a given pulse
//! doesn't need (no drag term, no carrier rotation, or both).
//!
//! SIMD lane width is read once via `pulp::{Arch, Simd, WithSimd}`: a
//! lane-phaser vector `[1, dcarrier, ..., dcarrier^(V-1)]` is precomputed
//! per call, the scalar carrier advances by `dcarrier^V` between
//! vector-width batches, and a final partial batch (fewer than `V` columns)
//! is handled by simply zipping the phaser vector against however many
//! columns remain.

use ndarray::ArrayViewMut2;
use pulp::{Arch, Simd, WithSimd};

use crate::Complex64;

fn lanes_of<S: Simd>() -> usize {
    std::mem::size_of::<S::f64s>() / std::mem::size_of::<f64>()
}

struct LaneCount;
impl WithSimd for LaneCount {
    type Output = usize;
    fn with_simd<S: Simd>(self, _simd: S) -> Self::Output {
        lanes_of::<S>()
    }
}

fn simd_lanes() -> usize {
    Arch::new().dispatch(LaneCount).max(1)
}

#[allow(clippy::cast_precision_loss)]
fn as_f64(x: usize) -> f64 {
    x as f64
}

fn add_sample(col: &mut ndarray::ArrayViewMut1<'_, f64>, w: Complex64) {
    col[0] += w.re;
    if let Some(q) = col.get_mut(1) {
        *q += w.im;
    }
}

/// `tgt[n] += amp`, carrier held fixed (no frequency modulation).
pub fn mix_add_plateau(mut target: ArrayViewMut2<'_, f64>, amp: Complex64) {
    for mut col in target.columns_mut() {
        add_sample(&mut col, amp);
    }
}

/// `tgt[n] += amp * phase0 * dcarrier^n`.
pub fn mix_add_plateau_freq(
    mut target: ArrayViewMut2<'_, f64>,
    amp: Complex64,
    phase0: Complex64,
    dphase: f64,
) {
    let lanes = simd_lanes();
    let phasers: Vec<Complex64> = (0..lanes)
        .map(|v| Complex64::from_polar(1.0, dphase * as_f64(v)))
        .collect();
    let step = Complex64::from_polar(1.0, dphase * as_f64(lanes));
    let mut carrier = phase0;
    let mut cols = target.columns_mut().into_iter().peekable();
    while cols.peek().is_some() {
        for &p in &phasers {
            let Some(mut col) = cols.next() else { break };
            add_sample(&mut col, amp * carrier * p);
        }
        carrier *= step;
    }
}

/// `tgt[n] += src[n] * amp * phase0 * dcarrier^n`, `dphase == 0` specialized
/// to [`mix_add`].
pub fn mix_add_freq(
    mut target: ArrayViewMut2<'_, f64>,
    src: &[f64],
    amp: Complex64,
    phase0: Complex64,
    dphase: f64,
) {
    let lanes = simd_lanes();
    let phasers: Vec<Complex64> = (0..lanes)
        .map(|v| Complex64::from_polar(1.0, dphase * as_f64(v)))
        .collect();
    let step = Complex64::from_polar(1.0, dphase * as_f64(lanes));
    let mut carrier = phase0;
    let mut cols = target.columns_mut().into_iter();
    let mut src_iter = src.iter().copied();
    'outer: loop {
        for &p in &phasers {
            let (Some(mut col), Some(s)) = (cols.next(), src_iter.next()) else {
                break 'outer;
            };
            add_sample(&mut col, amp * carrier * p * s);
        }
        carrier *= step;
    }
}

/// `tgt[n] += src[n] * amp`, no frequency modulation.
pub fn mix_add(target: ArrayViewMut2<'_, f64>, src: &[f64], amp: Complex64, phase0: Complex64) {
    mix_add_freq(target, src, amp, phase0, 0.0);
}

fn centered_slope(src: &[f64], i: usize) -> f64 {
    let n = src.len();
    let left = if i > 0 { src[i - 1] } else { 0.0 };
    let right = if i + 1 < n { src[i + 1] } else { 0.0 };
    (right - left) / 2.0
}

/// `tgt[n] += (src[n]*amp + slope[n]*drag) * phase0 * dcarrier^n`, `slope`
/// the centered difference of `src` (one-sided at the two edges). `dphase ==
/// 0` specialized to [`mix_add_drag`].
pub fn mix_add_freq_drag(
    mut target: ArrayViewMut2<'_, f64>,
    src: &[f64],
    amp: Complex64,
    drag: Complex64,
    phase0: Complex64,
    dphase: f64,
) {
    let lanes = simd_lanes();
    let phasers: Vec<Complex64> = (0..lanes)
        .map(|v| Complex64::from_polar(1.0, dphase * as_f64(v)))
        .collect();
    let step = Complex64::from_polar(1.0, dphase * as_f64(lanes));
    let mut carrier = phase0;
    let n = src.len();
    let mut cols = target.columns_mut().into_iter();
    let mut i = 0usize;
    'outer: loop {
        for &p in &phasers {
            if i >= n {
                break 'outer;
            }
            let Some(mut col) = cols.next() else {
                break 'outer;
            };
            let slope = centered_slope(src, i);
            let w = (amp * src[i] + drag * slope) * carrier * p;
            add_sample(&mut col, w);
            i += 1;
        }
        carrier *= step;
    }
}

/// `tgt[n] += src[n]*amp + slope[n]*drag`, no frequency modulation.
pub fn mix_add_drag(
    target: ArrayViewMut2<'_, f64>,
    src: &[f64],
    amp: Complex64,
    drag: Complex64,
    phase0: Complex64,
) {
    mix_add_freq_drag(target, src, amp, drag, phase0, 0.0);
}

#[cfg(test)]
mod tests {
    use float_cmp::assert_approx_eq;
    use ndarray::Array2;

    use super::*;

    fn scalar_mix_add_freq_drag(
        src: &[f64],
        amp: Complex64,
        drag: Complex64,
        phase0: Complex64,
        dphase: f64,
    ) -> Vec<Complex64> {
        let mut carrier = phase0;
        let dcarrier = Complex64::from_polar(1.0, dphase);
        let n = src.len();
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            let slope = centered_slope(src, i);
            out.push(carrier * (amp * src[i] + drag * slope));
            carrier *= dcarrier;
        }
        out
    }

    #[test]
    fn mix_add_freq_drag_matches_scalar_reference() {
        let src: Vec<f64> = (0..37).map(|i| (f64::from(i) * 0.1).sin()).collect();
        let amp = Complex64::new(0.7, -0.3);
        let drag = Complex64::new(0.1, 0.05);
        let phase0 = Complex64::from_polar(1.0, 0.4);
        let dphase = 0.037;
        let mut target = Array2::zeros((2, src.len()));
        mix_add_freq_drag(target.view_mut(), &src, amp, drag, phase0, dphase);
        let expected = scalar_mix_add_freq_drag(&src, amp, drag, phase0, dphase);
        for (col, exp) in target.columns().into_iter().zip(expected) {
            assert_approx_eq!(f64, col[0], exp.re, epsilon = 1e-9);
            assert_approx_eq!(f64, col[1], exp.im, epsilon = 1e-9);
        }
    }

    #[test]
    fn mix_add_plateau_is_constant() {
        let mut target = Array2::zeros((2, 5));
        mix_add_plateau(target.view_mut(), Complex64::new(1.0, 2.0));
        for col in target.columns() {
            assert_approx_eq!(f64, col[0], 1.0);
            assert_approx_eq!(f64, col[1], 2.0);
        }
    }

    #[test]
    fn mix_add_plateau_freq_matches_scalar_reference() {
        let amp = Complex64::new(0.5, 0.2);
        let phase0 = Complex64::from_polar(1.0, 1.1);
        let dphase = 0.05;
        let n = 23;
        let mut target = Array2::zeros((2, n));
        mix_add_plateau_freq(target.view_mut(), amp, phase0, dphase);
        let mut carrier = phase0;
        let dcarrier = Complex64::from_polar(1.0, dphase);
        for col in target.columns() {
            let w = amp * carrier;
            assert_approx_eq!(f64, col[0], w.re, epsilon = 1e-9);
            assert_approx_eq!(f64, col[1], w.im, epsilon = 1e-9);
            carrier *= dcarrier;
        }
    }
}
