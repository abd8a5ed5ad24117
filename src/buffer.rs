//! Pooled, aligned IQ sample buffer.
//!
//! Represents a channel's waveform as an `ndarray::Array2<f64>` with one row
//! per lane (`[I; Q]` for a complex channel, a single row for a real one)
//! rather than a `Vec<Complex64>`. That shape is what `pulse::apply_iq_inplace`,
//! `pulse::fir`, and `pulse::iir` already operate on, and it is what lets a
//! real-valued channel skip the wasted imaginary lane instead of carrying a
//! component that is always zero.
//!
//! `IqBuffer` adds release-once-and-fail-after semantics, which plain
//! `ndarray` has no notion of.

use ndarray::{Array2, ArrayView2, ArrayViewMut2, Axis};

use crate::error::Error;

/// A single channel's working sample array: `lanes` rows (1 for a
/// real-valued channel, 2 for `[I; Q]`) by `length` columns.
///
/// Exclusively owned by whichever task constructed it; moved, never shared,
/// until [`IqBuffer::release`] hands its contents back to the caller.
#[derive(Debug, Clone)]
pub struct IqBuffer {
    samples: Option<Array2<f64>>,
}

impl IqBuffer {
    /// Allocate a `lanes x length` buffer. `clear` is accepted for parity
    /// with the pooled-buffer API; every buffer is zero-filled on
    /// construction since `ndarray` has no raw-uninit `Array2` that is safe
    /// to hand out through this API.
    #[must_use]
    pub fn new(lanes: usize, length: usize, _clear: bool) -> Self {
        Self {
            samples: Some(Array2::zeros((lanes, length))),
        }
    }

    fn samples(&self) -> Result<&Array2<f64>, Error> {
        self.samples
            .as_ref()
            .ok_or_else(|| Error::internal_invariant("IQ buffer accessed after release"))
    }

    fn samples_mut(&mut self) -> Result<&mut Array2<f64>, Error> {
        self.samples
            .as_mut()
            .ok_or_else(|| Error::internal_invariant("IQ buffer accessed after release"))
    }

    pub fn lanes(&self) -> Result<usize, Error> {
        Ok(self.samples()?.shape()[0])
    }

    pub fn len(&self) -> Result<usize, Error> {
        Ok(self.samples()?.shape()[1])
    }

    pub fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.len()? == 0)
    }

    pub fn view(&self) -> Result<ArrayView2<'_, f64>, Error> {
        Ok(self.samples()?.view())
    }

    pub fn view_mut(&mut self) -> Result<ArrayViewMut2<'_, f64>, Error> {
        Ok(self.samples_mut()?.view_mut())
    }

    /// A non-owning mutable view over columns `[start, start+len)`, or the
    /// rest of the buffer when `len` is `None`.
    pub fn slice_mut(
        &mut self,
        start: usize,
        len: Option<usize>,
    ) -> Result<ArrayViewMut2<'_, f64>, Error> {
        let samples = self.samples_mut()?;
        let total = samples.shape()[1];
        let end = len.map_or(total, |l| start + l);
        if end > total || start > end {
            return Err(Error::out_of_range("buffer slice out of bounds"));
        }
        Ok(samples.slice_mut(ndarray::s![.., start..end]))
    }

    pub fn fill(&mut self, value: f64) -> Result<(), Error> {
        self.samples_mut()?.fill(value);
        Ok(())
    }

    pub fn clear(&mut self) -> Result<(), Error> {
        self.fill(0.0)
    }

    /// Add another buffer's samples element-wise, in place. Both buffers
    /// must have the same shape.
    pub fn add_assign(&mut self, other: &Self) -> Result<(), Error> {
        let other_view = other.samples()?.view();
        let this = self.samples_mut()?;
        if this.shape() != other_view.shape() {
            return Err(Error::internal_invariant(
                "cannot sum IQ buffers of different shapes",
            ));
        }
        this.zip_mut_with(&other_view, |y, x| *y += x);
        Ok(())
    }

    /// Add `offset[lane]` to every sample in that lane, in place.
    pub fn add_offset_assign(&mut self, offset: ArrayView2<'_, f64>) -> Result<(), Error> {
        let this = self.samples_mut()?;
        if this.shape()[0] != offset.len() {
            return Err(Error::internal_invariant(
                "offset length does not match channel lane count",
            ));
        }
        for (mut row, &off) in this.axis_iter_mut(Axis(0)).zip(&offset) {
            row += off;
        }
        Ok(())
    }

    /// Consumes the buffer, returning its contents. Accessing this buffer
    /// again after release fails with [`Error::InternalInvariant`]; a clone
    /// taken before release keeps its own independent copy.
    #[must_use]
    pub fn release(mut self) -> Array2<f64> {
        self.samples.take().unwrap_or_else(|| Array2::zeros((0, 0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_empty_buffer_is_valid() {
        let buf = IqBuffer::new(2, 0, true);
        assert_eq!(buf.len().unwrap(), 0);
        assert!(buf.is_empty().unwrap());
    }

    #[test]
    fn access_after_release_fails() {
        let mut buf = IqBuffer { samples: None };
        assert!(buf.len().is_err());
        assert!(buf.fill(0.0).is_err());
    }

    #[test]
    fn add_assign_sums_elementwise() {
        let mut a = IqBuffer::new(2, 2, true);
        a.fill(1.0).unwrap();
        let mut b = IqBuffer::new(2, 2, true);
        b.fill(2.0).unwrap();
        a.add_assign(&b).unwrap();
        let out = a.release();
        assert!(out.iter().all(|&v| (v - 3.0).abs() < 1e-12));
    }

    #[test]
    fn real_channel_uses_single_lane() {
        let buf = IqBuffer::new(1, 8, true);
        assert_eq!(buf.lanes().unwrap(), 1);
    }
}
