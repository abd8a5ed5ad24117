//! Orchestrator: the public entry point. Wires the render pass
//! ([`crate::executor`]) into the post-process DAG ([`crate::postprocess`])
//! into the waveform sampler ([`crate::sampler`]), one task per channel via
//! `rayon`.

use anyhow::{bail, Context, Result};
use hashbrown::HashMap;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rayon::prelude::*;

use crate::{
    error::{self, Error},
    executor::{Executor, OscState},
    postprocess::DagBuilder,
    pulse::{self, List},
    quant::{Amplitude, ChannelId, Frequency, ShapeId, Time},
    sampler,
    schedule::ElementRef,
    shape::Shape,
    Complex64,
};

/// A channel's sample-rate, length, and output post-processing. Built with
/// `with_*` setters that each validate their own field; cross-field
/// invariants (e.g. `is_real` vs `iq_matrix`) are checked once, in
/// [`generate_waveforms_with_states`].
#[derive(Debug, Clone)]
pub struct Channel {
    base_freq: Frequency,
    sample_rate: Frequency,
    length: usize,
    delay: Time,
    align_level: i32,
    iq_matrix: Option<Array2<f64>>,
    offset: Option<Array1<f64>>,
    iir: Option<Array2<f64>>,
    fir: Option<Array1<f64>>,
    filter_offset: bool,
    is_real: bool,
}

impl Channel {
    pub fn new(base_freq: Frequency, sample_rate: Frequency, length: usize) -> Result<Self> {
        if !sample_rate.is_finite() || sample_rate.value() <= 0.0 {
            bail!("channel sample_rate must be positive and finite, got {sample_rate}");
        }
        if length == 0 {
            bail!("channel length must be at least 1 sample");
        }
        Ok(Self {
            base_freq,
            sample_rate,
            length,
            delay: Time::ZERO,
            align_level: -10,
            iq_matrix: None,
            offset: None,
            iir: None,
            fir: None,
            filter_offset: false,
            is_real: false,
        })
    }

    pub fn with_delay(mut self, delay: Time) -> Result<Self> {
        if !delay.is_finite() {
            bail!("channel delay must be finite, got {delay}");
        }
        self.delay = delay;
        Ok(self)
    }

    #[must_use]
    pub const fn with_align_level(mut self, align_level: i32) -> Self {
        self.align_level = align_level;
        self
    }

    pub fn with_iq_matrix(mut self, iq_matrix: Array2<f64>) -> Result<Self> {
        if iq_matrix.shape() != [2, 2] {
            bail!("iq_matrix must be 2x2, got {:?}", iq_matrix.shape());
        }
        self.iq_matrix = Some(iq_matrix);
        Ok(self)
    }

    pub fn with_offset(mut self, offset: Array1<f64>) -> Result<Self> {
        if offset.is_empty() {
            bail!("offset must have at least one lane");
        }
        self.offset = Some(offset);
        Ok(self)
    }

    pub fn with_iir(mut self, sos: Array2<f64>) -> Result<Self> {
        if sos.ncols() != 6 {
            bail!(
                "iir second-order-sections must have 6 columns, got {}",
                sos.ncols()
            );
        }
        self.iir = Some(sos);
        Ok(self)
    }

    #[must_use]
    pub fn with_fir(mut self, taps: Array1<f64>) -> Self {
        self.fir = Some(taps);
        self
    }

    #[must_use]
    pub const fn with_filter_offset(mut self, filter_offset: bool) -> Self {
        self.filter_offset = filter_offset;
        self
    }

    #[must_use]
    pub const fn with_is_real(mut self, is_real: bool) -> Self {
        self.is_real = is_real;
        self
    }

    #[must_use]
    pub const fn base_freq(&self) -> Frequency {
        self.base_freq
    }

    #[must_use]
    pub const fn sample_rate(&self) -> Frequency {
        self.sample_rate
    }

    #[must_use]
    pub const fn length(&self) -> usize {
        self.length
    }

    #[must_use]
    pub const fn delay(&self) -> Time {
        self.delay
    }

    #[must_use]
    pub const fn align_level(&self) -> i32 {
        self.align_level
    }

    #[must_use]
    pub const fn filter_offset(&self) -> bool {
        self.filter_offset
    }

    #[must_use]
    pub const fn is_real(&self) -> bool {
        self.is_real
    }

    #[must_use]
    pub const fn lanes(&self) -> usize {
        if self.is_real {
            1
        } else {
            2
        }
    }

    #[must_use]
    pub fn iq_matrix(&self) -> Option<ArrayView2<'_, f64>> {
        self.iq_matrix.as_ref().map(Array2::view)
    }

    #[must_use]
    pub fn offset(&self) -> Option<ArrayView1<'_, f64>> {
        self.offset.as_ref().map(Array1::view)
    }

    #[must_use]
    pub fn iir(&self) -> Option<ArrayView2<'_, f64>> {
        self.iir.as_ref().map(Array2::view)
    }

    #[must_use]
    pub fn fir(&self) -> Option<ArrayView1<'_, f64>> {
        self.fir.as_ref().map(Array1::view)
    }

    fn validate(&self) -> Result<()> {
        if self.is_real && self.iq_matrix.is_some() {
            bail!("a channel cannot be both is_real and have an iq_matrix");
        }
        if let Some(offset) = &self.offset {
            if offset.len() != self.lanes() {
                bail!(
                    "offset has {} lanes but the channel has {}",
                    offset.len(),
                    self.lanes()
                );
            }
        }
        Ok(())
    }
}

/// Tolerances and crosstalk configuration for a single [`generate_waveforms`]
/// call. Built via [`GenerateOptionsBuilder`], or used as-is through
/// `Default` for the documented defaults.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    time_tolerance: Time,
    amp_tolerance: Amplitude,
    allow_oversize: bool,
    crosstalk: Option<(Array2<Complex64>, Vec<ChannelId>)>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            time_tolerance: Time::new(1e-12).expect("1e-12 is finite"),
            amp_tolerance: Amplitude::new(0.1 / 65536.0).expect("0.1/65536 is finite"),
            allow_oversize: false,
            crosstalk: None,
        }
    }
}

impl GenerateOptions {
    #[must_use]
    pub const fn time_tolerance(&self) -> Time {
        self.time_tolerance
    }

    #[must_use]
    pub const fn amp_tolerance(&self) -> Amplitude {
        self.amp_tolerance
    }

    #[must_use]
    pub const fn allow_oversize(&self) -> bool {
        self.allow_oversize
    }

    #[must_use]
    pub fn crosstalk(&self) -> Option<(ArrayView2<'_, Complex64>, &[ChannelId])> {
        self.crosstalk
            .as_ref()
            .map(|(matrix, names)| (matrix.view(), names.as_slice()))
    }
}

/// Builds a [`GenerateOptions`], mirroring [`crate::schedule::ElementCommonBuilder`]:
/// `&mut self` setters plus a `validate`/`build` pair.
#[derive(Debug, Clone)]
pub struct GenerateOptionsBuilder(GenerateOptions);

impl Default for GenerateOptionsBuilder {
    fn default() -> Self {
        Self(GenerateOptions::default())
    }
}

impl GenerateOptionsBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn time_tolerance(&mut self, time_tolerance: Time) -> &mut Self {
        self.0.time_tolerance = time_tolerance;
        self
    }

    pub const fn amp_tolerance(&mut self, amp_tolerance: Amplitude) -> &mut Self {
        self.0.amp_tolerance = amp_tolerance;
        self
    }

    pub const fn allow_oversize(&mut self, allow_oversize: bool) -> &mut Self {
        self.0.allow_oversize = allow_oversize;
        self
    }

    pub fn crosstalk(&mut self, matrix: Array2<Complex64>, channel_names: Vec<ChannelId>) -> &mut Self {
        self.0.crosstalk = Some((matrix, channel_names));
        self
    }

    pub fn validate(&self) -> Result<()> {
        let v = &self.0;
        if !v.time_tolerance.is_finite() || v.time_tolerance.value() < 0.0 {
            bail!("time_tolerance must be non-negative and finite, got {}", v.time_tolerance);
        }
        if !v.amp_tolerance.is_finite() || v.amp_tolerance.value() < 0.0 {
            bail!("amp_tolerance must be non-negative and finite, got {}", v.amp_tolerance);
        }
        if let Some((matrix, names)) = &v.crosstalk {
            let n = names.len();
            if matrix.nrows() != n || matrix.ncols() != n {
                bail!("crosstalk matrix must be {n}x{n} to match its {n} channel_names");
            }
        }
        Ok(())
    }

    pub fn build(&self) -> Result<GenerateOptions> {
        self.validate()?;
        Ok(self.0.clone())
    }
}

fn validate_inputs(channels: &HashMap<ChannelId, Channel>, options: &GenerateOptions) -> Result<()> {
    if channels.is_empty() {
        bail!("at least one channel must be configured");
    }
    for (name, channel) in channels {
        channel
            .validate()
            .with_context(|| format!("channel '{name}'"))?;
    }
    if let Some((_, names)) = options.crosstalk() {
        for name in names {
            if !channels.contains_key(name) {
                bail!("crosstalk channel '{name}' is not a configured channel");
            }
        }
    }
    Ok(())
}

/// Builds the post-process DAG: every channel gets a `Source → Delay`
/// chain; channels named in `options.crosstalk()` instead feed a shared
/// `Matrix` node, whose per-row taps are each delayed by their own channel's
/// `delay` before becoming that channel's terminal node.
fn run_postprocess_dag(
    channels: &HashMap<ChannelId, Channel>,
    pulse_lists: &HashMap<ChannelId, List>,
    options: &GenerateOptions,
) -> Result<HashMap<ChannelId, List>> {
    let mut builder = DagBuilder::new();
    let source_ids: HashMap<ChannelId, usize> = pulse_lists
        .iter()
        .map(|(name, list)| (name.clone(), builder.source(list.clone())))
        .collect();

    let mut terminal_ids: HashMap<ChannelId, usize> = HashMap::new();

    if let Some((matrix, names)) = options.crosstalk() {
        let inputs: Vec<usize> = names.iter().map(|name| source_ids[name]).collect();
        let rows = builder.matrix(inputs, matrix.to_owned())?;
        for (name, row_id) in names.iter().zip(rows) {
            let delay = channels[name].delay();
            terminal_ids.insert(name.clone(), builder.delay(vec![row_id], delay));
        }
    }

    for (name, channel) in channels {
        if terminal_ids.contains_key(name) {
            continue;
        }
        let source_id = source_ids[name];
        terminal_ids.insert(name.clone(), builder.delay(vec![source_id], channel.delay()));
    }

    let ids: Vec<usize> = terminal_ids.values().copied().collect();
    let mut results = builder.execute(&ids, options.time_tolerance(), options.amp_tolerance())?;
    terminal_ids
        .into_iter()
        .map(|(name, id)| {
            let list = results
                .remove(&id)
                .ok_or_else(|| anyhow::anyhow!("post-process DAG produced no output for '{name}'"))?;
            Ok((name, list))
        })
        .collect()
}

/// `iq_matrix`, then `offset`/`iir`/`fir` in the order `filter_offset`
/// selects.
fn apply_channel_post_process(waveform: &mut Array2<f64>, channel: &Channel) {
    let mut view = waveform.view_mut();
    if let Some(iq_matrix) = channel.iq_matrix() {
        pulse::apply_iq_inplace(&mut view, iq_matrix);
    }
    if channel.filter_offset() {
        if let Some(offset) = channel.offset() {
            pulse::apply_offset_inplace(&mut view, offset);
        }
        if let Some(sos) = channel.iir() {
            pulse::apply_iir_inplace(&mut view, sos);
        }
        if let Some(taps) = channel.fir() {
            pulse::apply_fir_inplace(&mut view, taps);
        }
    } else {
        if let Some(sos) = channel.iir() {
            pulse::apply_iir_inplace(&mut view, sos);
        }
        if let Some(taps) = channel.fir() {
            pulse::apply_fir_inplace(&mut view, taps);
        }
        if let Some(offset) = channel.offset() {
            pulse::apply_offset_inplace(&mut view, offset);
        }
    }
}

fn sample_and_post_process(
    channels: &HashMap<ChannelId, Channel>,
    lists: &HashMap<ChannelId, List>,
    options: &GenerateOptions,
) -> Result<HashMap<ChannelId, Array2<f64>>, Error> {
    channels
        .par_iter()
        .map(|(name, channel)| {
            let list = &lists[name];
            let mut waveform = sampler::sample_list(
                list,
                channel.lanes(),
                channel.length(),
                channel.sample_rate(),
                channel.align_level(),
                options.allow_oversize(),
            )
            .with_context(|| format!("channel '{name}'"))
            .map_err(error::from_out_of_range)?;
            apply_channel_post_process(&mut waveform, channel);
            Ok((name.clone(), waveform))
        })
        .collect()
}

/// Compiles `schedule` against `channels`/`shapes` and returns one sampled
/// `[lanes; length]` waveform per channel. `channels` with no `Play` in
/// `schedule` still come back as all-zero buffers of their configured shape.
pub fn generate_waveforms(
    channels: &HashMap<ChannelId, Channel>,
    shapes: &HashMap<ShapeId, Shape>,
    schedule: &ElementRef,
    options: &GenerateOptions,
) -> Result<HashMap<ChannelId, Array2<f64>>, Error> {
    generate_waveforms_with_states(channels, shapes, schedule, options, None).map(|(waveforms, _)| waveforms)
}

/// As [`generate_waveforms`], but seeds each channel's oscillator from
/// `states` (falling back to `OscState::new(channel.base_freq())` for any
/// channel `states` doesn't mention) and also returns the oscillator state
/// each channel ended in, so a later call can continue its phase/frequency
/// trajectory.
pub fn generate_waveforms_with_states(
    channels: &HashMap<ChannelId, Channel>,
    shapes: &HashMap<ShapeId, Shape>,
    schedule: &ElementRef,
    options: &GenerateOptions,
    states: Option<&HashMap<ChannelId, OscState>>,
) -> Result<(HashMap<ChannelId, Array2<f64>>, HashMap<ChannelId, OscState>), Error> {
    validate_inputs(channels, options).map_err(error::from_invalid_input)?;

    let mut executor = Executor::new(options.amp_tolerance(), options.time_tolerance());
    for (name, channel) in channels {
        let osc = states
            .and_then(|s| s.get(name))
            .copied()
            .unwrap_or_else(|| OscState::new(channel.base_freq()));
        executor.add_channel_with_state(name.clone(), osc);
    }
    for (name, shape) in shapes {
        executor.add_shape(name.clone(), shape.clone());
    }
    executor.execute(schedule).map_err(error::from_layout)?;

    let new_states = executor.states();
    let pulse_lists = executor.into_result();

    let post_processed = run_postprocess_dag(channels, &pulse_lists, options)
        .map_err(|err| Error::internal_invariant(format!("{err:#}")))?;

    let waveforms = sample_and_post_process(channels, &post_processed, options)?;

    Ok((waveforms, new_states))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        quant::{Amplitude as Amp, Phase},
        schedule::{Element, ElementCommonBuilder, Play},
    };

    fn freq(v: f64) -> Frequency {
        Frequency::new(v).unwrap()
    }
    fn time(v: f64) -> Time {
        Time::new(v).unwrap()
    }
    fn amp(v: f64) -> Amp {
        Amp::new(v).unwrap()
    }

    fn play_schedule(channel: &str, width: f64) -> ElementRef {
        Arc::new(Element::new(
            ElementCommonBuilder::new().build().unwrap(),
            Play::new(ChannelId::new(channel), None, amp(1.0), time(width)).unwrap(),
        ))
    }

    fn one_channel_map(name: &str, length: usize) -> HashMap<ChannelId, Channel> {
        let mut channels = HashMap::new();
        channels.insert(
            ChannelId::new(name),
            Channel::new(Frequency::ZERO, freq(1e9), length).unwrap(),
        );
        channels
    }

    #[test]
    fn rectangular_pulse_end_to_end() {
        let channels = one_channel_map("a", 20);
        let shapes = HashMap::new();
        let schedule = play_schedule("a", 5e-9);
        let options = GenerateOptions::default();
        let waveforms = generate_waveforms(&channels, &shapes, &schedule, &options).unwrap();
        let waveform = &waveforms[&ChannelId::new("a")];
        assert_eq!(waveform.shape(), &[2, 20]);
        assert!((waveform[[0, 0]] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn unconfigured_channel_in_schedule_fails_during_render() {
        let channels = one_channel_map("a", 20);
        let shapes = HashMap::new();
        let schedule = play_schedule("missing", 5e-9);
        let options = GenerateOptions::default();
        let err = generate_waveforms(&channels, &shapes, &schedule, &options).unwrap_err();
        assert!(matches!(err, Error::Layout { .. }));
    }

    #[test]
    fn channel_never_played_comes_back_as_zeros() {
        let mut channels = one_channel_map("a", 10);
        channels.insert(
            ChannelId::new("b"),
            Channel::new(Frequency::ZERO, freq(1e9), 10).unwrap(),
        );
        let shapes = HashMap::new();
        let schedule = play_schedule("a", 2e-9);
        let options = GenerateOptions::default();
        let waveforms = generate_waveforms(&channels, &shapes, &schedule, &options).unwrap();
        let unplayed = &waveforms[&ChannelId::new("b")];
        assert!(unplayed.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn states_round_trip_through_a_second_call() {
        let channels = one_channel_map("a", 20);
        let shapes = HashMap::new();
        let options = GenerateOptions::default();

        let shift = Arc::new(Element::new(
            ElementCommonBuilder::new().build().unwrap(),
            crate::schedule::ShiftPhase::new(ChannelId::new("a"), Phase::new(0.25).unwrap()).unwrap(),
        ));
        let (_, states) =
            generate_waveforms_with_states(&channels, &shapes, &shift, &options, None).unwrap();
        assert_eq!(states[&ChannelId::new("a")].phase, Phase::new(0.25).unwrap());

        let schedule = play_schedule("a", 2e-9);
        let (_, states2) =
            generate_waveforms_with_states(&channels, &shapes, &schedule, &options, Some(&states)).unwrap();
        assert_eq!(states2[&ChannelId::new("a")].phase, Phase::new(0.25).unwrap());
    }

    #[test]
    fn is_real_channel_rejects_an_iq_matrix() {
        let channel = Channel::new(Frequency::ZERO, freq(1e9), 10)
            .unwrap()
            .with_is_real(true)
            .with_iq_matrix(Array2::eye(2))
            .unwrap();
        assert!(channel.validate().is_err());
    }

    #[test]
    fn crosstalk_identity_matrix_matches_uncoupled_output() {
        let mut channels = one_channel_map("a", 20);
        channels.insert(
            ChannelId::new("b"),
            Channel::new(Frequency::ZERO, freq(1e9), 20).unwrap(),
        );
        let shapes = HashMap::new();
        let schedule = Arc::new(Element::new(
            ElementCommonBuilder::new().build().unwrap(),
            crate::schedule::Stack::new()
                .with_direction(crate::schedule::Direction::Forward)
                .with_children(vec![play_schedule("a", 5e-9), play_schedule("b", 5e-9)]),
        ));

        let plain = generate_waveforms(&channels, &shapes, &schedule, &GenerateOptions::default()).unwrap();

        let mut builder = GenerateOptionsBuilder::new();
        let identity = Array2::from_shape_fn((2, 2), |(r, c)| {
            if r == c {
                Complex64::new(1.0, 0.0)
            } else {
                Complex64::new(0.0, 0.0)
            }
        });
        builder.crosstalk(identity, vec![ChannelId::new("a"), ChannelId::new("b")]);
        let options = builder.build().unwrap();
        let crossed = generate_waveforms(&channels, &shapes, &schedule, &options).unwrap();

        for name in ["a", "b"] {
            let id = ChannelId::new(name);
            for (l, r) in plain[&id].iter().zip(crossed[&id].iter()) {
                assert!((l - r).abs() < 1e-9);
            }
        }
    }
}
