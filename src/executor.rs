//! Phase-tracking render pass: walks the arranged schedule tree once,
//! keeping one oscillator (`base_freq`, `delta_freq`, `phase`) per channel
//! and appending each `Play` as a pulse into that channel's
//! [`pulse::ListBuilder`].
//!
//! Rather than separate measure/arrange/render stages over an
//! `ArrangedElement` arena, this walks [`schedule::Element`] directly:
//! `render` resolves one element's own margin/alignment, `render_variant`
//! dispatches leaves into a channel update and hands containers off to their
//! `arrange_children` to recurse into.

use anyhow::{anyhow, bail, Result};
use hashbrown::HashMap;

use crate::{
    pulse::{Envelope, List, ListBuilder},
    quant::{Amplitude, ChannelId, Frequency, Phase, ShapeId, Time},
    schedule::{self, Element, ElementRef, ElementVariant, Measure},
    shape::Shape,
};

/// A channel's oscillator state, carried across `generate_waveforms_with_states`
/// calls so a later schedule can continue the phase/frequency trajectory left
/// by an earlier one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OscState {
    pub base_freq: Frequency,
    pub delta_freq: Frequency,
    pub phase: Phase,
}

impl OscState {
    #[must_use]
    pub const fn new(base_freq: Frequency) -> Self {
        Self {
            base_freq,
            delta_freq: Frequency::ZERO,
            phase: Phase::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
struct Channel {
    base_freq: Frequency,
    delta_freq: Frequency,
    phase: Phase,
    pulses: ListBuilder,
}

impl Channel {
    fn from_state(state: OscState, amp_tolerance: Amplitude, time_tolerance: Time) -> Self {
        Self {
            base_freq: state.base_freq,
            delta_freq: state.delta_freq,
            phase: state.phase,
            pulses: ListBuilder::new(amp_tolerance, time_tolerance),
        }
    }

    fn state(&self) -> OscState {
        OscState {
            base_freq: self.base_freq,
            delta_freq: self.delta_freq,
            phase: self.phase,
        }
    }

    /// `shift_freq`/`set_freq` adjust `phase` so the carrier's phase at
    /// `time` is unchanged by the jump in `delta_freq` — only its slope
    /// changes from `time` onward.
    fn shift_freq(&mut self, delta_freq: Frequency, time: Time) {
        self.phase += -delta_freq * time;
        self.delta_freq += delta_freq;
    }

    fn set_freq(&mut self, freq: Frequency, time: Time) {
        let delta_freq = freq - self.delta_freq;
        self.phase += -delta_freq * time;
        self.delta_freq = freq;
    }

    fn shift_phase(&mut self, delta_phase: Phase) {
        self.phase += delta_phase;
    }

    fn set_phase(&mut self, phase: Phase, time: Time) {
        self.phase = phase - self.delta_freq * time;
    }

    fn total_freq(&self) -> Frequency {
        self.base_freq + self.delta_freq
    }

    /// Exchanges the two channels' instantaneous phase at `time`, each
    /// keeping its own `delta_freq` afterward.
    fn swap_phase(&mut self, other: &mut Self, time: Time) {
        let delta_freq = self.total_freq() - other.total_freq();
        let (phase1, phase2) = (self.phase, other.phase);
        self.phase = phase2 - delta_freq * time;
        other.phase = phase1 + delta_freq * time;
    }

    #[allow(clippy::too_many_arguments)]
    fn add_pulse(
        &mut self,
        shape: Option<Shape>,
        time: Time,
        width: Time,
        plateau: Time,
        amplitude: Amplitude,
        drag_coef: f64,
        freq: Frequency,
        phase: Phase,
    ) {
        let envelope = Envelope::new(shape, width, plateau);
        let global_freq = self.total_freq();
        self.pulses
            .push(envelope, global_freq, freq, time, amplitude, drag_coef, phase);
    }
}

/// Owns one [`Channel`] per configured channel id and the shape table
/// `Play` elements look their envelope shape up in.
#[derive(Debug)]
pub(crate) struct Executor {
    channels: HashMap<ChannelId, Channel>,
    shapes: HashMap<ShapeId, Shape>,
    amp_tolerance: Amplitude,
    time_tolerance: Time,
}

impl Executor {
    pub(crate) fn new(amp_tolerance: Amplitude, time_tolerance: Time) -> Self {
        Self {
            channels: HashMap::new(),
            shapes: HashMap::new(),
            amp_tolerance,
            time_tolerance,
        }
    }

    pub(crate) fn add_channel(&mut self, name: ChannelId, base_freq: Frequency) {
        self.add_channel_with_state(name, OscState::new(base_freq));
    }

    pub(crate) fn add_channel_with_state(&mut self, name: ChannelId, state: OscState) {
        self.channels.insert(
            name,
            Channel::from_state(state, self.amp_tolerance, self.time_tolerance),
        );
    }

    pub(crate) fn add_shape(&mut self, name: ShapeId, shape: Shape) {
        self.shapes.insert(name, shape);
    }

    /// Measures `root` against an unbounded duration and renders it starting
    /// at `Time::ZERO`: `measure(∞) → arrange(0, duration) → render`.
    pub(crate) fn execute(&mut self, root: &ElementRef) -> Result<()> {
        let duration = root.measure(Time::INFINITY);
        self.render(root, Time::ZERO, duration)
    }

    pub(crate) fn states(&self) -> HashMap<ChannelId, OscState> {
        self.channels
            .iter()
            .map(|(id, channel)| (id.clone(), channel.state()))
            .collect()
    }

    pub(crate) fn into_result(self) -> HashMap<ChannelId, List> {
        self.channels
            .into_iter()
            .map(|(id, channel)| (id, channel.pulses.build()))
            .collect()
    }

    fn channel_mut(&mut self, id: &ChannelId) -> Result<&mut Channel> {
        self.channels
            .get_mut(id)
            .ok_or_else(|| anyhow!("unknown channel {id}"))
    }

    fn render(&mut self, element: &Element, time: Time, final_duration: Time) -> Result<()> {
        if element.common.phantom() {
            return Ok(());
        }
        let (inner_time, inner_available) = element.inner_slot(time, final_duration);
        let desired = element.variant.measure(inner_available);
        let (offset, slot_duration) =
            schedule::align(desired, inner_available, element.common.alignment());
        self.render_variant(&element.variant, inner_time + offset, slot_duration)
    }

    fn render_variant(&mut self, variant: &ElementVariant, time: Time, duration: Time) -> Result<()> {
        match variant {
            ElementVariant::Play(e) => {
                let shape = e
                    .shape_id()
                    .map(|id| {
                        self.shapes
                            .get(id)
                            .cloned()
                            .ok_or_else(|| anyhow!("unknown shape {id}"))
                    })
                    .transpose()?;
                let width = e.width();
                let plateau = if e.flexible() {
                    (duration - width).max(Time::ZERO)
                } else {
                    e.plateau()
                };
                self.channel_mut(e.channel_id())?.add_pulse(
                    shape,
                    time,
                    width,
                    plateau,
                    e.amplitude(),
                    e.drag_coef(),
                    e.frequency(),
                    e.phase(),
                );
                Ok(())
            }
            ElementVariant::ShiftPhase(e) => {
                self.channel_mut(e.channel_id())?.shift_phase(e.phase());
                Ok(())
            }
            ElementVariant::SetPhase(e) => {
                self.channel_mut(e.channel_id())?.set_phase(e.phase(), time);
                Ok(())
            }
            ElementVariant::ShiftFreq(e) => {
                self.channel_mut(e.channel_id())?.shift_freq(e.frequency(), time);
                Ok(())
            }
            ElementVariant::SetFreq(e) => {
                self.channel_mut(e.channel_id())?.set_freq(e.frequency(), time);
                Ok(())
            }
            ElementVariant::SwapPhase(e) => {
                let (ch1, ch2) = (e.channel_id1(), e.channel_id2());
                if ch1 == ch2 {
                    return Ok(());
                }
                let [channel, other] = self
                    .channels
                    .get_many_mut([ch1, ch2])
                    .ok_or_else(|| anyhow!("unknown channel in SwapPhase"))?;
                channel.swap_phase(other, time);
                Ok(())
            }
            ElementVariant::Barrier(_) => Ok(()),
            ElementVariant::Stack(s) => self.render_children(s.arrange_children(duration), time),
            ElementVariant::Absolute(a) => self.render_children(a.arrange_children(duration), time),
            ElementVariant::Grid(g) => self.render_children(g.arrange_children(duration), time),
            ElementVariant::Repeat(r) => self.render_children(r.arrange_children(duration), time),
        }
    }

    fn render_children(
        &mut self,
        children: Vec<(ElementRef, Time, Time)>,
        time: Time,
    ) -> Result<()> {
        for (child, offset, slot) in children {
            self.render(&child, time + offset, slot)?;
        }
        Ok(())
    }
}
