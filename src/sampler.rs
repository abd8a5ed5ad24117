//! Waveform sampler: turns a channel's [`pulse::List`] into sampled
//! `[lanes; length]` columns.
//!
//! Dispatches into the six specialized kernels of [`pulse::kernels`] instead
//! of one generic pair, walks [`pulse::envelope_cache::Envelope::Split`]'s
//! three segments instead of assuming one contiguous buffer, and lets
//! `allow_oversize` clip a pulse that runs past the buffer instead of always
//! failing.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use ndarray::{s, Array2, ArrayViewMut2};

use crate::{
    buffer::IqBuffer,
    pulse::{self, envelope_cache, kernels, List, PulseAmplitude, ResolvedBin},
    quant::{AlignedIndex, Frequency, Time},
    Complex64,
};

/// One contiguous run within an envelope: real samples, or a constant-`1.0`
/// run synthesized from its length (the [`envelope_cache::Envelope::Split`]
/// plateau).
enum Segment {
    Samples(Arc<Vec<f64>>),
    Plateau(usize),
}

fn segments_of(envelope: envelope_cache::Envelope) -> (Vec<Segment>, usize) {
    let len = envelope.len();
    let segments = match envelope {
        envelope_cache::Envelope::Contiguous(v) => vec![Segment::Samples(v)],
        envelope_cache::Envelope::Split {
            left_edge,
            right_edge,
            plateau_len,
        } => vec![
            Segment::Samples(left_edge),
            Segment::Plateau(plateau_len),
            Segment::Samples(right_edge),
        ],
    };
    (segments, len)
}

fn carrier_at(phase0: Complex64, dphase: f64, n: usize) -> Complex64 {
    if dphase == 0.0 {
        phase0
    } else {
        #[allow(clippy::cast_precision_loss)]
        let angle = dphase * n as f64;
        phase0 * Complex64::from_polar(1.0, angle)
    }
}

fn dispatch_samples(
    target: ArrayViewMut2<'_, f64>,
    src: &[f64],
    amp: Complex64,
    drag: Complex64,
    carrier0: Complex64,
    dphase: f64,
) {
    let has_drag = drag != Complex64::new(0.0, 0.0);
    match (dphase == 0.0, has_drag) {
        (true, true) => kernels::mix_add_drag(target, src, amp, drag, carrier0),
        (true, false) => kernels::mix_add(target, src, amp, carrier0),
        (false, true) => kernels::mix_add_freq_drag(target, src, amp, drag, carrier0, dphase),
        (false, false) => kernels::mix_add_freq(target, src, amp, carrier0, dphase),
    }
}

fn dispatch_plateau(target: ArrayViewMut2<'_, f64>, amp: Complex64, carrier0: Complex64, dphase: f64) {
    if dphase == 0.0 {
        kernels::mix_add_plateau(target, amp * carrier0);
    } else {
        kernels::mix_add_plateau_freq(target, amp, carrier0, dphase);
    }
}

/// Renders `segments` (total length `env_len`) into `waveform`, stopping
/// after `use_len` samples — `use_len < env_len` only when `allow_oversize`
/// clipped the pulse to what remains in the buffer.
fn render_segments(
    mut waveform: ArrayViewMut2<'_, f64>,
    segments: &[Segment],
    use_len: usize,
    amp: Complex64,
    drag: Complex64,
    phase0: Complex64,
    dphase: f64,
) {
    let mut consumed = 0usize;
    for segment in segments {
        if consumed >= use_len {
            break;
        }
        let remaining = use_len - consumed;
        let carrier0 = carrier_at(phase0, dphase, consumed);
        match segment {
            Segment::Samples(src) => {
                let take = remaining.min(src.len());
                let target = waveform.slice_mut(s![.., consumed..consumed + take]);
                dispatch_samples(target, &src[..take], amp, drag, carrier0, dphase);
                consumed += take;
            }
            Segment::Plateau(len) => {
                let take = remaining.min(*len);
                let target = waveform.slice_mut(s![.., consumed..consumed + take]);
                dispatch_plateau(target, amp, carrier0, dphase);
                consumed += take;
            }
        }
    }
}

/// Samples one `(time, amplitude)` item of a resolved bin into `waveform`
/// (already the full channel-length buffer).
fn render_pulse(
    bin: &ResolvedBin,
    time: Time,
    amplitude: PulseAmplitude,
    waveform: &mut ArrayViewMut2<'_, f64>,
    sample_rate: Frequency,
    align_level: i32,
    allow_oversize: bool,
) -> Result<()> {
    let total_len = waveform.shape()[1];
    let t_start = time + bin.delay;
    let i_frac_start = AlignedIndex::new(t_start, sample_rate, align_level)
        .context("could not align pulse start to the sample grid")?;
    if i_frac_start.value() < 0.0 {
        bail!(
            "pulse start time {} is negative; adjust channel delay or schedule",
            t_start.value()
        );
    }
    let i_start = i_frac_start
        .ceil_to_usize()
        .expect("non-negative index already checked");
    if i_start >= total_len {
        if allow_oversize {
            return Ok(());
        }
        bail!("pulse start index {i_start} is out of range for a channel of length {total_len}");
    }
    let index_offset = i_frac_start.index_offset();
    let dt = 1.0 / sample_rate.value();
    #[allow(clippy::cast_precision_loss)]
    let t_index = i_start as f64 * dt;
    let phase0_cycles = bin.global_freq.value() * (t_index - bin.delay.value())
        + bin.local_freq.value() * index_offset.value() * dt;
    let dphase_cycles = (bin.global_freq.value() + bin.local_freq.value()) * dt;
    let phase0 = Complex64::from_polar(1.0, phase0_cycles * std::f64::consts::TAU);
    let dphase = dphase_cycles * std::f64::consts::TAU;

    let (segments, env_len) = if let Some(shape) = bin.envelope.shape() {
        let envelope = envelope_cache::get_envelope(
            shape,
            bin.envelope.width(),
            bin.envelope.plateau(),
            index_offset,
            sample_rate,
        );
        segments_of(envelope)
    } else {
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let i_plateau = (bin.envelope.plateau().value() * sample_rate.value()).ceil() as usize;
        (vec![Segment::Plateau(i_plateau)], i_plateau)
    };

    let avail = total_len - i_start;
    let use_len = if avail < env_len {
        if !allow_oversize {
            #[allow(clippy::cast_precision_loss)]
            let end_time = env_len as f64 * dt + t_start.value();
            bail!("pulse end time {end_time} is out of range for the channel buffer");
        }
        avail
    } else {
        env_len
    };

    let drag = if bin.envelope.shape().is_some() {
        amplitude.drag * sample_rate.value()
    } else {
        Complex64::new(0.0, 0.0)
    };
    let target = waveform.slice_mut(s![.., i_start..i_start + use_len]);
    render_segments(target, &segments, use_len, amplitude.amp, drag, phase0, dphase);
    Ok(())
}

/// Samples an entire channel [`pulse::List`] into a fresh `[lanes; length]`
/// buffer: bins are grouped by their (already-folded) filter chain so each
/// chain's IIR/FIR stages run once over the chain's own rendered segment,
/// not once per pulse.
pub(crate) fn sample_list(
    list: &List,
    lanes: usize,
    length: usize,
    sample_rate: Frequency,
    align_level: i32,
    allow_oversize: bool,
) -> Result<Array2<f64>> {
    let mut out = IqBuffer::new(lanes, length, true);
    for (filter, bins) in list.resolved_bins_by_filter() {
        let mut scratch = IqBuffer::new(lanes, length, true);
        for bin in &bins {
            for &(time, amplitude) in &bin.items {
                render_pulse(
                    bin,
                    time,
                    amplitude,
                    &mut scratch.view_mut()?,
                    sample_rate,
                    align_level,
                    allow_oversize,
                )
                .context("failed to sample a pulse")?;
            }
        }
        for stage in filter.stages() {
            if let Some(sos) = stage.iir_sos() {
                pulse::apply_iir_inplace(&mut scratch.view_mut()?, sos);
            }
            if let Some(taps) = stage.fir_taps() {
                pulse::apply_fir_inplace(&mut scratch.view_mut()?, taps);
            }
        }
        out.add_assign(&scratch)?;
    }
    Ok(out.release())
}

#[cfg(test)]
mod tests {
    use float_cmp::assert_approx_eq;

    use super::*;
    use crate::{
        pulse::{Envelope, ListBuilder},
        quant::{Amplitude, Phase},
        shape::Shape,
    };

    fn freq(v: f64) -> Frequency {
        Frequency::new(v).unwrap()
    }
    fn time(v: f64) -> Time {
        Time::new(v).unwrap()
    }
    fn amp(v: f64) -> Amplitude {
        Amplitude::new(v).unwrap()
    }

    #[test]
    fn rectangular_pulse_samples_as_a_flat_plateau() {
        let mut b = ListBuilder::new(amp(1e-6), time(1e-12));
        b.push(
            Envelope::new(None, time(0.0), time(5e-9)),
            freq(0.0),
            freq(0.0),
            time(0.0),
            amp(1.0),
            0.0,
            Phase::ZERO,
        );
        let list = b.build();
        let out = sample_list(&list, 2, 20, freq(1e9), 0, false).unwrap();
        assert_approx_eq!(f64, out[[0, 0]], 1.0, epsilon = 1e-9);
        assert_approx_eq!(f64, out[[0, 4]], 1.0, epsilon = 1e-9);
        assert_approx_eq!(f64, out[[0, 6]], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn hann_pulse_vanishes_at_its_own_edges() {
        let mut b = ListBuilder::new(amp(1e-6), time(1e-12));
        b.push(
            Envelope::new(Some(Shape::new_hann()), time(10e-9), time(0.0)),
            freq(0.0),
            freq(0.0),
            time(0.0),
            amp(1.0),
            0.0,
            Phase::ZERO,
        );
        let list = b.build();
        let out = sample_list(&list, 2, 20, freq(1e9), 0, false).unwrap();
        assert_approx_eq!(f64, out[[0, 0]], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn oversize_pulse_fails_without_allow_oversize() {
        let mut b = ListBuilder::new(amp(1e-6), time(1e-12));
        b.push(
            Envelope::new(None, time(0.0), time(100e-9)),
            freq(0.0),
            freq(0.0),
            time(0.0),
            amp(1.0),
            0.0,
            Phase::ZERO,
        );
        let list = b.build();
        assert!(sample_list(&list, 1, 10, freq(1e9), 0, false).is_err());
        assert!(sample_list(&list, 1, 10, freq(1e9), 0, true).is_ok());
    }

    #[test]
    fn negative_start_time_always_fails() {
        let mut b = ListBuilder::new(amp(1e-6), time(1e-12));
        b.push(
            Envelope::new(None, time(0.0), time(5e-9)),
            freq(0.0),
            freq(0.0),
            time(0.0),
            amp(1.0),
            0.0,
            Phase::ZERO,
        );
        let list = b.build().time_shifted(time(-10e-9));
        assert!(sample_list(&list, 1, 10, freq(1e9), 0, true).is_err());
    }
}
