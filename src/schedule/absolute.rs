//! Explicit-time placement: every child is measured
//! independently against the container's own bound and placed at its
//! stated start time — children are never packed against one another, and
//! may overlap.

use anyhow::{bail, Result};

use crate::{
    quant::{ChannelId, Time},
    schedule::{merge_channel_ids, ElementRef, Measure},
};

#[derive(Debug, Clone)]
pub struct Entry {
    time: Time,
    element: ElementRef,
}

impl Entry {
    #[must_use]
    pub const fn new(element: ElementRef) -> Self {
        Self {
            time: Time::ZERO,
            element,
        }
    }

    pub fn with_time(mut self, time: Time) -> Result<Self> {
        if !time.value().is_finite() || time.value() < 0.0 {
            bail!("Invalid time {time:?}");
        }
        self.time = time;
        Ok(self)
    }

    #[must_use]
    pub const fn time(&self) -> Time {
        self.time
    }
}

#[derive(Debug, Clone, Default)]
pub struct Absolute {
    children: Vec<Entry>,
    channel_ids: Vec<ChannelId>,
}

impl Absolute {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_children(mut self, children: Vec<Entry>) -> Self {
        self.channel_ids = merge_channel_ids(children.iter().map(|e| e.element.channels()));
        self.children = children;
        self
    }

    /// `(child, stated_time, child_desired)` for each child, each measured
    /// again against `final_duration` (the same bound `measure` used).
    pub(crate) fn arrange_children(&self, final_duration: Time) -> Vec<(ElementRef, Time, Time)> {
        self.children
            .iter()
            .map(|e| {
                (
                    e.element.clone(),
                    e.time,
                    e.element.measure(final_duration),
                )
            })
            .collect()
    }
}

impl Measure for Absolute {
    fn measure(&self, max_duration: Time) -> Time {
        self.children
            .iter()
            .map(|e| e.time + e.element.measure(max_duration))
            .fold(Time::ZERO, Time::max)
    }

    fn channels(&self) -> &[ChannelId] {
        &self.channel_ids
    }
}
