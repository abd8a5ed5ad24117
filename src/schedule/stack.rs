//! Greedy per-channel packing: children are laid out one
//! after another, but only constrained by the channels they actually touch
//! — two children that share no channel can overlap.

mod helper;

use crate::{
    quant::{ChannelId, Time},
    schedule::{merge_channel_ids, stack::helper::Helper, ElementRef, Measure},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

#[derive(Debug, Clone)]
pub struct Stack {
    children: Vec<ElementRef>,
    direction: Direction,
    channel_ids: Vec<ChannelId>,
}

impl Stack {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    #[must_use]
    pub fn with_children(mut self, children: Vec<ElementRef>) -> Self {
        let channel_ids = merge_channel_ids(children.iter().map(|e| e.channels()));
        self.children = children;
        self.channel_ids = channel_ids;
        self
    }

    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// `(child, offset, slot_duration)` for each child, laid out within
    /// `final_duration` (also the bound fed back into each child's own
    /// `measure` call — see [`layout`]).
    pub(crate) fn arrange_children(&self, final_duration: Time) -> Vec<(ElementRef, Time, Time)> {
        let (_, timings) = layout(&self.children, &self.channel_ids, self.direction, final_duration);
        self.children
            .iter()
            .cloned()
            .zip(timings)
            .map(|(child, (offset, duration))| {
                let final_offset = match self.direction {
                    Direction::Forward => offset,
                    Direction::Backward => final_duration - offset - duration,
                };
                (child, final_offset, duration)
            })
            .collect()
    }
}

impl Default for Stack {
    fn default() -> Self {
        Self {
            children: vec![],
            direction: Direction::Backward,
            channel_ids: vec![],
        }
    }
}

impl Measure for Stack {
    fn measure(&self, max_duration: Time) -> Time {
        layout(&self.children, &self.channel_ids, self.direction, max_duration).0
    }

    fn channels(&self) -> &[ChannelId] {
        &self.channel_ids
    }
}

/// Walks `children` in `direction` order, handing each one the space still
/// left over on the channels it touches (`max_duration - usage`) as its own
/// `max_duration` bound. Returns the overall usage plus each
/// child's `(offset, duration)` in original order.
fn layout<I>(
    children: I,
    channels: &[ChannelId],
    direction: Direction,
    max_duration: Time,
) -> (Time, Vec<(Time, Time)>)
where
    I: IntoIterator,
    I::IntoIter: DoubleEndedIterator,
    I::Item: Measure,
{
    let mut helper = Helper::new(channels);
    let timings = map_and_collect_by_direction(children, direction, |child| {
        let child_channels = child.channels();
        let leftover = (max_duration - helper.get_usage(child_channels)).max(Time::ZERO);
        let child_duration = child.measure(leftover);
        let child_offset = helper.get_usage(child_channels);
        helper.update_usage(child_offset + child_duration, child_channels);
        (child_offset, child_duration)
    });
    (helper.into_max_usage(), timings)
}

/// Map by direction but collect in the original order.
fn map_and_collect_by_direction<I, F, T>(source: I, direction: Direction, mut f: F) -> Vec<T>
where
    I: IntoIterator,
    I::IntoIter: DoubleEndedIterator,
    F: FnMut(I::Item) -> T,
{
    let mut ret: Vec<_> = if direction == Direction::Backward {
        source.into_iter().rev().map(f).collect()
    } else {
        source.into_iter().map(f).collect()
    };
    if direction == Direction::Backward {
        ret.reverse();
    }
    ret
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::schedule::MockMeasure;

    #[test_case(Direction::Forward; "forward")]
    #[test_case(Direction::Backward; "backward")]
    fn collect_by_direction(direction: Direction) {
        let v = [1, 2, 3];

        let mut count = 0;
        let res = map_and_collect_by_direction(&v, direction, |&i| {
            match direction {
                Direction::Forward => assert_eq!(i, v[count]),
                Direction::Backward => assert_eq!(i, v[v.len() - 1 - count]),
            }
            count += 1;
            i
        });

        assert_eq!(res, v);
    }

    #[test_case(Direction::Forward, &[0.0, 10.0, 30.0]; "forward")]
    #[test_case(Direction::Backward, &[50.0, 30.0, 0.0]; "backward")]
    fn test_measure_no_channels(direction: Direction, offsets: &[f64]) {
        let children = [10.0, 20.0, 30.0].map(|duration| {
            let mut mock = MockMeasure::new();
            mock.expect_measure()
                .return_const(Time::new(duration).unwrap());
            mock.expect_channels().return_const(vec![]);
            mock
        });

        let (total_duration, child_timings) = layout(&children, &[], direction, Time::INFINITY);

        assert_eq!(total_duration, Time::new(60.0).unwrap());
        assert_eq!(
            child_timings
                .into_iter()
                .map(|(offset, _)| offset)
                .collect::<Vec<_>>(),
            offsets
                .iter()
                .map(|&x| Time::new(x).unwrap())
                .collect::<Vec<_>>()
        );
    }

    /// Test case diagram:
    ///
    /// ```text
    ///            +----+   +----+   +----+
    /// ch[0] -----| 10 |---|    |---| 20 |-----
    ///            +----+   |    |   +----+
    ///                     | 20 |
    ///            +----+   |    |   +----+
    /// ch[1] -----| 20 |---|    |---| 10 |-----
    ///            +----+   +----+   +----+
    /// ```
    #[test_case(Direction::Forward, &[0.0, 0.0, 20.0, 40.0, 40.0]; "forward")]
    #[test_case(Direction::Backward, &[40.0, 40.0, 20.0, 0.0, 0.0]; "backward")]
    fn test_measure_with_channels(direction: Direction, offsets: &[f64]) {
        let children = [
            create_mock(10.0, &[0]),
            create_mock(20.0, &[1]),
            create_mock(20.0, &[0, 1]),
            create_mock(20.0, &[0]),
            create_mock(10.0, &[1]),
        ];
        let channels = (0..2).map(create_channel).collect::<Vec<_>>();

        let (total_duration, child_timings) = layout(&children, &channels, direction, Time::INFINITY);

        assert_eq!(total_duration, Time::new(60.0).unwrap());
        assert_eq!(
            child_timings
                .into_iter()
                .map(|(offset, _)| offset.value())
                .collect::<Vec<_>>(),
            offsets
        );

        fn create_channel(i: usize) -> ChannelId {
            ChannelId::new(i.to_string())
        }
        fn create_mock(duration: f64, channels: &[usize]) -> MockMeasure {
            let mut mock = MockMeasure::new();
            mock.expect_measure()
                .return_const(Time::new(duration).unwrap());
            mock.expect_channels()
                .return_const(channels.iter().copied().map(create_channel).collect());
            mock
        }
    }

    fn play_element(channel: &str, width: f64) -> ElementRef {
        use crate::{
            quant::{Amplitude, ChannelId},
            schedule::{Element, ElementCommonBuilder, Play},
        };
        std::sync::Arc::new(Element::new(
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
    fn arrange_children_packs_toward_direction_end_under_slack() {
        let children = vec![play_element("a", 10.0), play_element("a", 20.0)];
        let total = Time::new(30.0).unwrap();
        let final_duration = Time::new(50.0).unwrap();

        let forward = Stack::new()
            .with_direction(Direction::Forward)
            .with_children(children.clone());
        assert_eq!(forward.measure(Time::INFINITY), total);
        let arranged = forward.arrange_children(final_duration);
        let offsets: Vec<f64> = arranged.iter().map(|(_, o, _)| o.value()).collect();
        assert_eq!(offsets, vec![0.0, 10.0]);

        let backward = Stack::new()
            .with_direction(Direction::Backward)
            .with_children(children);
        assert_eq!(backward.measure(Time::INFINITY), total);
        let arranged = backward.arrange_children(final_duration);
        let offsets: Vec<f64> = arranged.iter().map(|(_, o, _)| o.value()).collect();
        assert_eq!(offsets, vec![20.0, 30.0]);
    }
}
