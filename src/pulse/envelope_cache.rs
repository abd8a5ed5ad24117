//! Memoized envelope sampling.
//!
//! `get_envelope` is keyed on `(shape, width, plateau, index_offset,
//! sample_rate)` and memoized behind a fixed-size LRU. Values above
//! [`PLATEAU_THRESHOLD`] samples are stored as [`Envelope::Split`] — only
//! the rising/falling edges are memoized, and the plateau itself (known to
//! be constant `1.0`) is synthesized by the caller instead of being
//! materialized and cached.

use std::sync::{Arc, Mutex, OnceLock};

use cached::{Cached, SizedCache};

use crate::{
    quant::{AlignedIndex, Frequency, Time},
    shape::Shape,
};

/// Above this many plateau samples, the cache stores only the two edges
/// (the plateau is constant and synthesized by the caller), not the full
/// envelope.
pub const PLATEAU_THRESHOLD: usize = 128;

/// Fixed LRU capacity for the envelope cache.
pub const CACHE_CAPACITY: usize = 666;

/// A cached envelope sample, shared immutably by every in-flight sampler
/// task that looked it up.
#[derive(Debug, Clone)]
pub enum Envelope {
    /// One contiguous buffer covering the whole shaped region.
    Contiguous(Arc<Vec<f64>>),
    /// `left_edge` then an implicit run of `plateau_len` samples at `1.0`
    /// then `right_edge`; used once the plateau run is long enough that
    /// materializing it would waste memory and cache slots.
    Split {
        left_edge: Arc<Vec<f64>>,
        right_edge: Arc<Vec<f64>>,
        plateau_len: usize,
    },
}

impl Envelope {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Contiguous(v) => v.len(),
            Self::Split {
                left_edge,
                right_edge,
                plateau_len,
            } => left_edge.len() + plateau_len + right_edge.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Key {
    shape: Shape,
    width: Time,
    plateau: Time,
    index_offset: AlignedIndex,
    sample_rate: Frequency,
}

fn cache() -> &'static Mutex<SizedCache<Key, Envelope>> {
    static CACHE: OnceLock<Mutex<SizedCache<Key, Envelope>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(SizedCache::with_size(CACHE_CAPACITY)))
}

fn time_to_index(t: f64, sr: f64) -> usize {
    debug_assert!(t >= 0.0, "time must be non-negative");
    debug_assert!(sr > 0.0, "sample rate must be positive");
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    {
        (t * sr).ceil() as usize
    }
}

fn sample_contiguous(shape: &Shape, width: f64, plateau: f64, t_offset: f64, dt: f64) -> Vec<f64> {
    let t1 = width / 2.0 - t_offset;
    let t2 = width / 2.0 + plateau - t_offset;
    let t3 = width + plateau - t_offset;
    let sample_rate = 1.0 / dt;
    let length = time_to_index(t3, sample_rate);
    let plateau_start_index = time_to_index(t1, sample_rate);
    let plateau_end_index = time_to_index(t2, sample_rate);
    let mut envelope = vec![0.0; length];
    let x0 = -t1 / width;
    let dx = dt / width;
    if plateau == 0.0 {
        shape.sample_array(x0, dx, &mut envelope);
    } else {
        shape.sample_array(x0, dx, &mut envelope[..plateau_start_index]);
        envelope[plateau_start_index..plateau_end_index].fill(1.0);
        #[allow(clippy::cast_precision_loss)]
        let x2 = (plateau_end_index as f64).mul_add(dt, -t2) / width;
        shape.sample_array(x2, dx, &mut envelope[plateau_end_index..]);
    }
    envelope
}

fn build(shape: &Shape, width: f64, plateau: f64, index_offset: f64, sample_rate: f64) -> Envelope {
    let dt = 1.0 / sample_rate;
    let t_offset = index_offset * dt;
    let plateau_len = time_to_index(width / 2.0 + plateau - t_offset, sample_rate)
        - time_to_index(width / 2.0 - t_offset, sample_rate);
    if plateau_len < PLATEAU_THRESHOLD {
        return Envelope::Contiguous(Arc::new(sample_contiguous(
            shape, width, plateau, t_offset, dt,
        )));
    }
    // Split form: sample only the rising and falling edges, each with its
    // own half-width "plateau" of zero so the shape call sees the same
    // window it would in the contiguous case.
    let t1 = width / 2.0 - t_offset;
    let x0 = -t1 / width;
    let dx = dt / width;
    let left_len = time_to_index(t1, sample_rate);
    let mut left_edge = vec![0.0; left_len];
    shape.sample_array(x0, dx, &mut left_edge);

    let t2 = width / 2.0 + plateau - t_offset;
    let plateau_end_index = time_to_index(t2, sample_rate);
    let t3 = width + plateau - t_offset;
    let total_len = time_to_index(t3, sample_rate);
    let right_len = total_len - plateau_end_index;
    let mut right_edge = vec![0.0; right_len];
    #[allow(clippy::cast_precision_loss)]
    let x2 = (plateau_end_index as f64).mul_add(dt, -t2) / width;
    shape.sample_array(x2, dx, &mut right_edge);

    Envelope::Split {
        left_edge: Arc::new(left_edge),
        right_edge: Arc::new(right_edge),
        plateau_len,
    }
}

/// Looks up (or computes and caches) the envelope for a shaped pulse with
/// the given width/plateau, sampled at `sample_rate` starting `index_offset`
/// samples into the rising edge.
pub fn get_envelope(
    shape: &Shape,
    width: Time,
    plateau: Time,
    index_offset: AlignedIndex,
    sample_rate: Frequency,
) -> Envelope {
    let key = Key {
        shape: shape.clone(),
        width,
        plateau,
        index_offset,
        sample_rate,
    };
    if let Some(hit) = cache()
        .lock()
        .expect("cache lock poisoned")
        .cache_get(&key)
    {
        return hit.clone();
    }
    let envelope = build(
        shape,
        width.value(),
        plateau.value(),
        index_offset.value(),
        sample_rate.value(),
    );
    cache()
        .lock()
        .expect("cache lock poisoned")
        .cache_set(key, envelope.clone());
    envelope
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate(v: f64) -> Frequency {
        Frequency::new(v).unwrap()
    }
    fn time(v: f64) -> Time {
        Time::new(v).unwrap()
    }

    #[test]
    fn short_plateau_is_contiguous() {
        let shape = Shape::new_hann();
        let zero_offset = AlignedIndex::new(Time::ZERO, rate(100.0), 0).unwrap();
        let env = get_envelope(&shape, time(0.1), time(0.0), zero_offset, rate(100.0));
        assert!(matches!(env, Envelope::Contiguous(_)));
    }

    #[test]
    fn long_plateau_is_split() {
        let shape = Shape::new_hann();
        let zero_offset = AlignedIndex::new(Time::ZERO, rate(1000.0), 0).unwrap();
        let env = get_envelope(&shape, time(0.01), time(1.0), zero_offset, rate(1000.0));
        assert!(matches!(env, Envelope::Split { .. }));
        assert!(env.len() > PLATEAU_THRESHOLD);
    }

    #[test]
    fn repeated_lookup_returns_equal_shape() {
        let shape = Shape::new_hann();
        let zero_offset = AlignedIndex::new(Time::ZERO, rate(100.0), 0).unwrap();
        let a = get_envelope(&shape, time(0.1), time(0.0), zero_offset, rate(100.0));
        let b = get_envelope(&shape, time(0.1), time(0.0), zero_offset, rate(100.0));
        assert_eq!(a.len(), b.len());
    }
}
