//! Column-based layout: children are placed into named
//! columns — each `fixed(v)`, `auto`, or `star(w)` — and a child spanning
//! more than one column only grows the columns it doesn't fit in yet.

mod helper;

use std::str::FromStr;

use anyhow::{bail, Result};

use crate::{
    quant::{ChannelId, Time},
    schedule::{grid::helper::Helper, merge_channel_ids, ElementRef, Measure},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LengthKind {
    Fixed,
    Auto,
    Star,
}

/// One grid column's sizing rule. `value` is the fixed width for
/// [`Length::fixed`], the star weight for [`Length::star`], and unused
/// (`0.0`) for [`Length::auto`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Length {
    kind: LengthKind,
    pub(crate) value: f64,
}

impl Length {
    pub fn fixed(value: f64) -> Result<Self> {
        if !value.is_finite() || value < 0.0 {
            bail!("Invalid fixed column length {value}");
        }
        Ok(Self {
            kind: LengthKind::Fixed,
            value,
        })
    }

    #[must_use]
    pub const fn auto() -> Self {
        Self {
            kind: LengthKind::Auto,
            value: 0.0,
        }
    }

    pub fn star(weight: f64) -> Result<Self> {
        if !weight.is_finite() || weight <= 0.0 {
            bail!("Invalid star column weight {weight}");
        }
        Ok(Self {
            kind: LengthKind::Star,
            value: weight,
        })
    }

    #[must_use]
    pub const fn is_fixed(&self) -> bool {
        matches!(self.kind, LengthKind::Fixed)
    }

    #[must_use]
    pub const fn is_auto(&self) -> bool {
        matches!(self.kind, LengthKind::Auto)
    }

    #[must_use]
    pub const fn is_star(&self) -> bool {
        matches!(self.kind, LengthKind::Star)
    }
}

impl FromStr for Length {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("auto") {
            return Ok(Self::auto());
        }
        if let Some(rest) = s.strip_suffix('*') {
            let weight = if rest.is_empty() { 1.0 } else { rest.parse()? };
            return Self::star(weight);
        }
        Self::fixed(s.parse()?)
    }
}

#[derive(Debug, Clone)]
pub struct Entry {
    element: ElementRef,
    column: usize,
    span: usize,
}

impl Entry {
    #[must_use]
    pub const fn new(element: ElementRef) -> Self {
        Self {
            element,
            column: 0,
            span: 1,
        }
    }

    #[must_use]
    pub const fn with_column(mut self, column: usize) -> Self {
        self.column = column;
        self
    }

    pub fn with_span(mut self, span: usize) -> Result<Self> {
        if span == 0 {
            bail!("Span should be greater than 0");
        }
        self.span = span;
        Ok(self)
    }
}

#[derive(Debug, Clone)]
pub struct Grid {
    children: Vec<Entry>,
    columns: Vec<Length>,
    channel_ids: Vec<ChannelId>,
}

impl Grid {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_columns(mut self, columns: Vec<Length>) -> Self {
        self.columns = if columns.is_empty() {
            vec![Length::star(1.0).expect("1.0 is a valid star weight")]
        } else {
            columns
        };
        self
    }

    #[must_use]
    pub fn with_children(mut self, children: Vec<Entry>) -> Self {
        self.channel_ids = merge_channel_ids(children.iter().map(|e| e.element.channels()));
        self.children = children;
        self
    }

    #[must_use]
    pub fn columns(&self) -> &[Length] {
        &self.columns
    }

    /// `(child, offset, slot_duration)` for each child: `offset` is the
    /// start of its spanned columns after growing them to fit
    /// `final_duration`, and `slot_duration` their summed width. The
    /// child's own alignment then places it inside that span when
    /// [`crate::executor`] recurses into it.
    pub(crate) fn arrange_children(&self, final_duration: Time) -> Vec<(ElementRef, Time, Time)> {
        let mut helper = Helper::new(&self.columns);
        size_columns(&mut helper, &self.children);
        helper.expand_to_fit(final_duration);
        let column_starts = helper.column_starts();
        self.children
            .iter()
            .map(|entry| {
                let span = helper.normalize_span(entry.column, entry.span);
                let (start, span) = (span.start(), span.span());
                let offset = column_starts[start];
                let span_duration = column_starts[start + span] - offset;
                (entry.element.clone(), offset, span_duration)
            })
            .collect()
    }
}

impl Default for Grid {
    fn default() -> Self {
        Self {
            children: vec![],
            columns: vec![Length::star(1.0).expect("1.0 is a valid star weight")],
            channel_ids: vec![],
        }
    }
}

impl Measure for Grid {
    fn measure(&self, _max_duration: Time) -> Time {
        let mut helper = Helper::new(&self.columns);
        size_columns(&mut helper, &self.children);
        helper.into_column_sizes().into_iter().sum()
    }

    fn channels(&self) -> &[ChannelId] {
        &self.channel_ids
    }
}

/// Grows `helper`'s column sizes to fit every child measured at
/// `Time::INFINITY`, single-span children first so a spanning child only
/// grows whatever room the solo children in its span haven't already
/// claimed (a two-pass sizing).
fn size_columns(helper: &mut Helper<'_>, children: &[Entry]) {
    let spans: Vec<_> = children
        .iter()
        .map(|e| {
            let duration = e.element.measure(Time::INFINITY);
            (helper.normalize_span(e.column, e.span), duration)
        })
        .collect();
    for &(span, duration) in &spans {
        if span.span() == 1 {
            helper.expand_span_to_fit(span, duration);
        }
    }
    for &(span, duration) in &spans {
        if span.span() != 1 {
            helper.expand_span_to_fit(span, duration);
        }
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
    fn single_star_column_gives_each_child_the_full_width() {
        let grid = Grid::new().with_children(vec![
            Entry::new(play_element("a", 10.0)),
            Entry::new(play_element("b", 30.0)),
        ]);
        assert_eq!(grid.measure(Time::INFINITY), Time::new(30.0).unwrap());
    }

    #[test]
    fn two_columns_place_children_side_by_side() {
        let grid = Grid::new()
            .with_columns(vec![Length::auto(), Length::auto()])
            .with_children(vec![
                Entry::new(play_element("a", 10.0)).with_column(0),
                Entry::new(play_element("b", 20.0)).with_column(1),
            ]);
        let arranged = grid.arrange_children(Time::new(30.0).unwrap());
        let offsets: Vec<f64> = arranged.iter().map(|(_, o, _)| o.value()).collect();
        assert_eq!(offsets, vec![0.0, 10.0]);
    }

    #[test]
    fn length_parses_fixed_auto_and_star() {
        assert!("1.5".parse::<Length>().unwrap().is_fixed());
        assert!("auto".parse::<Length>().unwrap().is_auto());
        assert!("*".parse::<Length>().unwrap().is_star());
        assert_eq!("2*".parse::<Length>().unwrap().value, 2.0);
    }
}
