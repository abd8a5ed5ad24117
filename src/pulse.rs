//! Bucketed, time-sorted pulse list and the builder that assembles it from
//! phase-tracked `play` calls.
//!
//! A [`List`] groups pulses into bins keyed by `(envelope, global_freq,
//! local_freq, delay, filter)`; within a bin, items are kept time-sorted
//! with near-coincident entries merged. [`List`] also carries a lazy
//! `time_offset`/`amplitude_multiplier`/`filter` overlay so `time_shifted`,
//! `scaled`, and `filtered` are cheap — the only operation that walks every
//! item is [`List::sum`], used to combine several lists into one.

pub mod envelope_cache;
pub(crate) mod fir;
pub(crate) mod iir;
pub mod kernels;

use std::{hash::Hash, sync::Arc};

use float_cmp::approx_eq;
use hashbrown::HashMap;
use itertools::Itertools as _;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut2, Axis, azip};
use num::Complex;

type Complex64 = Complex<f64>;

use crate::{
    quant::{Amplitude, Frequency, Phase, Time},
    shape::Shape,
};

/// A pulse envelope.
///
/// If `shape` is `None`, the constructor folds `width` into `plateau` and
/// zeroes `width`, so a rectangular pulse and a zero-width shaped pulse
/// compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Envelope {
    shape: Option<Shape>,
    width: Time,
    plateau: Time,
}

impl Envelope {
    #[must_use]
    pub fn new(mut shape: Option<Shape>, mut width: Time, mut plateau: Time) -> Self {
        if shape.is_none() {
            plateau += width;
            width = Time::ZERO;
        }
        if width == Time::ZERO {
            shape = None;
        }
        Self {
            shape,
            width,
            plateau,
        }
    }

    #[must_use]
    pub fn shape(&self) -> Option<&Shape> {
        self.shape.as_ref()
    }

    #[must_use]
    pub const fn width(&self) -> Time {
        self.width
    }

    #[must_use]
    pub const fn plateau(&self) -> Time {
        self.plateau
    }
}

/// One stage of a filter chain: an optional cascaded-biquad section (`sos`,
/// applied first) and optional FIR taps (applied after). Two `FilterSpec`s
/// built from equal coefficients but separate calls are deliberately
/// distinct, since identity (not value) is what a bin key compares.
#[derive(Debug)]
struct FilterSpecInner {
    iir_sos: Option<Array2<f64>>,
    fir_taps: Option<Array1<f64>>,
}

#[derive(Debug, Clone)]
pub struct FilterSpec(Arc<FilterSpecInner>);

impl FilterSpec {
    #[must_use]
    pub fn new(iir_sos: Option<Array2<f64>>, fir_taps: Option<Array1<f64>>) -> Self {
        Self(Arc::new(FilterSpecInner { iir_sos, fir_taps }))
    }

    #[must_use]
    pub fn iir_sos(&self) -> Option<ArrayView2<'_, f64>> {
        self.0.iir_sos.as_ref().map(ndarray::Array2::view)
    }

    #[must_use]
    pub fn fir_taps(&self) -> Option<ArrayView1<'_, f64>> {
        self.0.fir_taps.as_ref().map(ndarray::Array1::view)
    }
}

impl PartialEq for FilterSpec {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for FilterSpec {}

impl Hash for FilterSpec {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::ptr::hash(Arc::as_ptr(&self.0), state);
    }
}

/// An ordered chain of [`FilterSpec`] stages, applied first-to-last.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FilterChain(Arc<Vec<FilterSpec>>);

impl FilterChain {
    #[must_use]
    pub fn identity() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn push(&self, stage: FilterSpec) -> Self {
        let mut stages = (*self.0).clone();
        stages.push(stage);
        Self(Arc::new(stages))
    }

    fn append(&self, tail: &Self) -> Self {
        if tail.0.is_empty() {
            return self.clone();
        }
        if self.0.is_empty() {
            return tail.clone();
        }
        let mut stages = (*self.0).clone();
        stages.extend(tail.0.iter().cloned());
        Self(Arc::new(stages))
    }

    #[must_use]
    pub fn stages(&self) -> &[FilterSpec] {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ListBin {
    envelope: Envelope,
    global_freq: Frequency,
    local_freq: Frequency,
    delay: Time,
    filter: FilterChain,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct PulseAmplitude {
    /// Amplitude of the pulse.
    pub(crate) amp: Complex64,
    /// Drag amplitude of the pulse (not yet multiplied by sample rate).
    pub(crate) drag: Complex64,
}

impl std::ops::Add for PulseAmplitude {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            amp: self.amp + other.amp,
            drag: self.drag + other.drag,
        }
    }
}

impl std::ops::Mul<Complex64> for PulseAmplitude {
    type Output = Self;

    fn mul(self, rhs: Complex64) -> Self {
        Self {
            amp: self.amp * rhs,
            drag: self.drag * rhs,
        }
    }
}

type Bins = HashMap<ListBin, Vec<(Time, PulseAmplitude)>>;

/// A single resolved bin, with its owning list's `time_offset`/`filter`
/// overlay already folded in and its items pre-scaled by
/// `amplitude_multiplier`, ready for the waveform sampler.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedBin {
    pub(crate) envelope: Envelope,
    pub(crate) global_freq: Frequency,
    pub(crate) local_freq: Frequency,
    pub(crate) delay: Time,
    pub(crate) filter: FilterChain,
    pub(crate) items: Vec<(Time, PulseAmplitude)>,
}

/// An immutable, bucketed pulse list for one channel: the output of
/// [`ListBuilder::build`] and of [`List::sum`].
#[derive(Debug, Clone)]
pub struct List {
    items: Arc<Bins>,
    time_offset: Time,
    amplitude_multiplier: Complex64,
    filter: FilterChain,
}

impl Default for List {
    fn default() -> Self {
        Self {
            items: Arc::new(HashMap::new()),
            time_offset: Time::ZERO,
            amplitude_multiplier: Complex64::new(1.0, 0.0),
            filter: FilterChain::identity(),
        }
    }
}

impl List {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() || self.amplitude_multiplier == Complex64::new(0.0, 0.0)
    }

    /// Returns a copy shifted later in time by `dt` (earlier if negative).
    #[must_use]
    pub fn time_shifted(&self, dt: Time) -> Self {
        let mut out = self.clone();
        out.time_offset += dt;
        out
    }

    /// Returns a copy with every amplitude multiplied by `lambda`.
    #[must_use]
    pub fn scaled(&self, lambda: Complex64) -> Self {
        let mut out = self.clone();
        out.amplitude_multiplier *= lambda;
        out
    }

    /// Returns a copy with `stage` appended to the filter chain applied at
    /// sampling time.
    #[must_use]
    pub fn filtered(&self, stage: FilterSpec) -> Self {
        let mut out = self.clone();
        out.filter = out.filter.push(stage);
        out
    }

    /// Folds this list's overlay into each of its bins and groups the
    /// result by (already-folded) filter chain, for the waveform sampler to
    /// batch filter application.
    pub(crate) fn resolved_bins_by_filter(&self) -> Vec<(FilterChain, Vec<ResolvedBin>)> {
        let mut groups: Vec<(FilterChain, Vec<ResolvedBin>)> = Vec::new();
        if self.amplitude_multiplier == Complex64::new(0.0, 0.0) {
            return groups;
        }
        let near_one = (self.amplitude_multiplier - Complex64::new(1.0, 0.0)).norm() == 0.0;
        for (bin, items) in self.items.iter() {
            let filter = bin.filter.append(&self.filter);
            let items = if near_one {
                items.clone()
            } else {
                items
                    .iter()
                    .map(|&(t, a)| (t, a * self.amplitude_multiplier))
                    .collect()
            };
            let resolved = ResolvedBin {
                envelope: bin.envelope.clone(),
                global_freq: bin.global_freq,
                local_freq: bin.local_freq,
                delay: bin.delay + self.time_offset,
                filter: filter.clone(),
                items,
            };
            match groups.iter_mut().find(|(f, _)| *f == filter) {
                Some((_, v)) => v.push(resolved),
                None => groups.push((filter, vec![resolved])),
            }
        }
        groups
    }

    /// Combines several lists into one, folding each list's overlay into
    /// its bins' `delay`/`filter` and merging items within `time_tol` of
    /// one another. This is the only pulse-list operation that walks every
    /// item rather than just adjusting an overlay.
    #[must_use]
    pub fn sum<'a, I>(lists: I, time_tol: Time, amp_tol: Amplitude) -> Self
    where
        I: IntoIterator<Item = &'a List>,
    {
        let mut out: Bins = HashMap::new();
        for list in lists {
            if list.amplitude_multiplier.norm() <= amp_tol.value() {
                continue;
            }
            let near_one = (list.amplitude_multiplier - Complex64::new(1.0, 0.0)).norm()
                <= amp_tol.value();
            for (bin, items) in list.items.iter() {
                let key = ListBin {
                    envelope: bin.envelope.clone(),
                    global_freq: bin.global_freq,
                    local_freq: bin.local_freq,
                    delay: bin.delay + list.time_offset,
                    filter: bin.filter.append(&list.filter),
                };
                let scaled_items: Vec<(Time, PulseAmplitude)> = if near_one {
                    items.clone()
                } else {
                    items
                        .iter()
                        .map(|&(t, a)| (t, a * list.amplitude_multiplier))
                        .collect()
                };
                merge_into(out.entry(key).or_default(), scaled_items, time_tol);
            }
        }
        Self {
            items: Arc::new(out),
            time_offset: Time::ZERO,
            amplitude_multiplier: Complex64::new(1.0, 0.0),
            filter: FilterChain::identity(),
        }
    }
}

/// Merges a freshly-scaled, already time-sorted item run into an
/// accumulator, combining items within `time_tol` by summed amplitude.
fn merge_into(
    acc: &mut Vec<(Time, PulseAmplitude)>,
    mut new_items: Vec<(Time, PulseAmplitude)>,
    time_tol: Time,
) {
    new_items.sort_unstable_by_key(|(t, _)| *t);
    let merged = std::mem::take(acc)
        .into_iter()
        .merge_by(new_items, |a, b| a.0 <= b.0)
        .coalesce(|a, b| {
            if approx_eq!(f64, a.0.value(), b.0.value(), epsilon = time_tol.value()) {
                Ok((a.0, a.1 + b.1))
            } else {
                Err((a, b))
            }
        })
        .collect();
    *acc = merged;
}

#[derive(Debug, Clone)]
pub struct ListBuilder {
    items: Bins,
    amp_tolerance: Amplitude,
    time_tolerance: Time,
}

impl ListBuilder {
    #[must_use]
    pub fn new(amp_tolerance: Amplitude, time_tolerance: Time) -> Self {
        Self {
            items: HashMap::new(),
            amp_tolerance,
            time_tolerance,
        }
    }

    /// Appends a complex-amplitude pulse to bin `(envelope, global_freq,
    /// local_freq, delay, filter = identity)`. Dropped if `|amplitude|` is
    /// within tolerance of zero.
    pub(crate) fn add(
        &mut self,
        envelope: Envelope,
        global_freq: Frequency,
        local_freq: Frequency,
        delay: Time,
        time: Time,
        amplitude: Complex64,
        drag_amplitude: Complex64,
    ) {
        if amplitude.norm() <= self.amp_tolerance.value() {
            return;
        }
        let bin = ListBin {
            envelope,
            global_freq,
            local_freq,
            delay,
            filter: FilterChain::identity(),
        };
        self.items.entry(bin).or_default().push((
            time,
            PulseAmplitude {
                amp: amplitude,
                drag: drag_amplitude,
            },
        ));
    }

    /// Converts a real amplitude/cycle-phase pulse into the complex form
    /// and appends it with `delay = 0`. Dropped if `amp_real` is within
    /// tolerance of zero.
    #[allow(clippy::too_many_arguments)]
    pub fn push(
        &mut self,
        envelope: Envelope,
        global_freq: Frequency,
        local_freq: Frequency,
        time: Time,
        amp_real: Amplitude,
        drag_coef: f64,
        phase: Phase,
    ) {
        if approx_eq!(
            f64,
            amp_real.value(),
            0.0,
            epsilon = self.amp_tolerance.value()
        ) {
            return;
        }
        let amp = amp_real.value() * phase.phasor();
        let drag = amp * Complex64::i() * drag_coef;
        self.add(envelope, global_freq, local_freq, Time::ZERO, time, amp, drag);
    }

    /// Sorts and merges near-coincident items per bin, producing an
    /// immutable [`List`].
    #[must_use]
    pub fn build(self) -> List {
        let mut items = self.items;
        for pulses in items.values_mut() {
            pulses.sort_unstable_by_key(|(time, _)| *time);
            let mut write = 0;
            for read in 1..pulses.len() {
                if approx_eq!(
                    f64,
                    pulses[write].0.value(),
                    pulses[read].0.value(),
                    epsilon = self.time_tolerance.value()
                ) {
                    pulses[write].1 = pulses[write].1 + pulses[read].1;
                } else {
                    write += 1;
                    pulses[write] = pulses[read];
                }
            }
            pulses.truncate(write + 1);
        }
        List {
            items: Arc::new(items),
            time_offset: Time::ZERO,
            amplitude_multiplier: Complex64::new(1.0, 0.0),
            filter: FilterChain::identity(),
        }
    }
}

/// Applies a static 2x2 real mixer-imbalance matrix to an `[I; Q]` buffer,
/// column by column.
pub fn apply_iq_inplace(waveform: &mut ArrayViewMut2<'_, f64>, iq_matrix: ArrayView2<'_, f64>) {
    assert!(matches!(waveform.shape(), [2, _]));
    assert!(matches!(iq_matrix.shape(), [2, 2]));
    for mut col in waveform.columns_mut() {
        let y = [
            iq_matrix[(0, 0)].mul_add(col[0], iq_matrix[(0, 1)] * col[1]),
            iq_matrix[(1, 0)].mul_add(col[0], iq_matrix[(1, 1)] * col[1]),
        ];
        col[0] = y[0];
        col[1] = y[1];
    }
}

/// Adds a constant per-lane DC offset in place.
pub fn apply_offset_inplace(waveform: &mut ArrayViewMut2<'_, f64>, offset: ArrayView1<'_, f64>) {
    assert!(waveform.shape()[0] == offset.len());
    azip!((mut row in waveform.axis_iter_mut(Axis(0)), &offset in &offset) row += offset);
}

/// Runs a cascaded-biquad ("second-order sections") IIR filter over each
/// lane, in place.
pub fn apply_iir_inplace(waveform: &mut ArrayViewMut2<'_, f64>, sos: ArrayView2<'_, f64>) {
    self::iir::iir_filter_inplace(waveform.view_mut(), sos)
        .expect("`sos` shape should be validated when the channel is configured");
}

/// Runs an FIR filter over each lane, in place.
pub fn apply_fir_inplace(waveform: &mut ArrayViewMut2<'_, f64>, taps: ArrayView1<'_, f64>) {
    self::fir::filter_inplace(waveform.view_mut(), taps);
}
