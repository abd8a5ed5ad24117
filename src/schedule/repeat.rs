//! Uniform repetition: a single child is measured once and
//! replayed `count` times, `spacing` apart.

use anyhow::{bail, Result};

use crate::{
    quant::{ChannelId, Time},
    schedule::{ElementRef, Measure},
};

#[derive(Debug, Clone)]
pub struct Repeat {
    child: ElementRef,
    count: usize,
    spacing: Time,
}

impl Repeat {
    #[must_use]
    pub const fn new(child: ElementRef, count: usize) -> Self {
        Self {
            child,
            count,
            spacing: Time::ZERO,
        }
    }

    pub fn with_spacing(mut self, spacing: Time) -> Result<Self> {
        if !spacing.value().is_finite() || spacing.value() < 0.0 {
            bail!("Invalid spacing {spacing:?}");
        }
        self.spacing = spacing;
        Ok(self)
    }

    #[must_use]
    pub const fn count(&self) -> usize {
        self.count
    }

    #[must_use]
    pub const fn spacing(&self) -> Time {
        self.spacing
    }

    /// The per-repetition budget handed to the (single) measure of the
    /// child: `(bound - spacing*(count-1)) / count`.
    fn slot(&self, bound: Time) -> Time {
        let n = self.count as f64;
        ((bound - self.spacing * (n - 1.0)) / n).max(Time::ZERO)
    }

    /// `count` copies of `(child, k*(child.duration+spacing), child.duration)`.
    pub(crate) fn arrange_children(&self, final_duration: Time) -> Vec<(ElementRef, Time, Time)> {
        if self.count == 0 {
            return vec![];
        }
        let slot = self.slot(final_duration);
        let child_duration = self.child.measure(slot);
        let step = child_duration + self.spacing;
        (0..self.count)
            .map(|k| {
                #[allow(clippy::cast_precision_loss)]
                let offset = step * (k as f64);
                (self.child.clone(), offset, child_duration)
            })
            .collect()
    }
}

impl Measure for Repeat {
    fn measure(&self, max_duration: Time) -> Time {
        if self.count == 0 {
            return Time::ZERO;
        }
        let n = self.count as f64;
        let slot = self.slot(max_duration);
        let child_duration = self.child.measure(slot);
        child_duration * n + self.spacing * (n - 1.0)
    }

    fn channels(&self) -> &[ChannelId] {
        self.child.channels()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        quant::Amplitude,
        schedule::{Element, ElementCommonBuilder, Play},
    };

    fn play_element(channel: &str, width: f64) -> ElementRef {
        Arc::new(Element::new(
            ElementCommonBuilder::new().build().unwrap(),
            Play::new(
                ChannelId::new(channel),
                None,
                Amplitude::new(1.0).unwrap(),
                Time::new(width).unwrap(),
            )
            .unwrap(),
        ))
    }

    #[test]
    fn desired_duration_matches_count_times_child_plus_spacing() {
        let repeat = Repeat::new(play_element("a", 10.0), 3)
            .with_spacing(Time::new(2.0).unwrap())
            .unwrap();
        assert_eq!(repeat.measure(Time::INFINITY), Time::new(34.0).unwrap());
    }

    #[test]
    fn zero_count_has_no_duration_and_no_children() {
        let repeat = Repeat::new(play_element("a", 10.0), 0);
        assert_eq!(repeat.measure(Time::INFINITY), Time::ZERO);
        assert!(repeat.arrange_children(Time::ZERO).is_empty());
    }

    #[test]
    fn instances_are_spaced_by_child_duration_plus_spacing() {
        let repeat = Repeat::new(play_element("a", 10.0), 3)
            .with_spacing(Time::new(2.0).unwrap())
            .unwrap();
        let arranged = repeat.arrange_children(Time::new(34.0).unwrap());
        let offsets: Vec<f64> = arranged.iter().map(|(_, o, _)| o.value()).collect();
        assert_eq!(offsets, vec![0.0, 12.0, 24.0]);
    }
}
