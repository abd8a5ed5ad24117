//! Value-type newtypes for time, frequency, phase and amplitude, plus the
//! string-interned channel/shape/label identifiers.
//!
//! Kept as `NotNan<f64>` wrappers (via the `ordered-float` crate) so every
//! quantity is `Eq + Hash + Ord` and can be used directly as a bin-key
//! component in [`crate::pulse`].

use std::{
    fmt,
    ops::{Add, AddAssign, Div, Mul, Neg, Sub},
    sync::Arc,
};

use anyhow::{anyhow, Result};
use ordered_float::NotNan;

use crate::Complex64;

macro_rules! scalar_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(NotNan<f64>);

        impl $name {
            pub const ZERO: Self = Self(unsafe { NotNan::new_unchecked(0.0) });

            pub fn new(value: f64) -> Result<Self> {
                NotNan::new(value)
                    .map(Self)
                    .map_err(|_| anyhow!("NaN in {} value", stringify!($name)))
            }

            #[must_use]
            pub fn value(self) -> f64 {
                self.0.into_inner()
            }

            #[must_use]
            pub fn is_finite(self) -> bool {
                self.0.into_inner().is_finite()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.value())
            }
        }

        impl Add for $name {
            type Output = Self;
            fn add(self, rhs: Self) -> Self {
                Self(self.0 + rhs.0)
            }
        }

        impl AddAssign for $name {
            fn add_assign(&mut self, rhs: Self) {
                self.0 += rhs.0;
            }
        }

        impl Sub for $name {
            type Output = Self;
            fn sub(self, rhs: Self) -> Self {
                Self(self.0 - rhs.0)
            }
        }

        impl Neg for $name {
            type Output = Self;
            fn neg(self) -> Self {
                Self(-self.0)
            }
        }

        impl Mul<f64> for $name {
            type Output = Self;
            fn mul(self, rhs: f64) -> Self {
                Self::new(self.value() * rhs).expect("finite scale of a finite quantity")
            }
        }

        impl Div<f64> for $name {
            type Output = Self;
            fn div(self, rhs: f64) -> Self {
                Self::new(self.value() / rhs).expect("finite scale of a finite quantity")
            }
        }

        impl std::iter::Sum for $name {
            fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
                iter.fold(Self::ZERO, Add::add)
            }
        }
    };
}

scalar_newtype!(Time);
scalar_newtype!(Frequency);
scalar_newtype!(Phase);
scalar_newtype!(Amplitude);

impl Time {
    pub const INFINITY: Self = Self(unsafe { NotNan::new_unchecked(f64::INFINITY) });
}

/// `freq(Hz) * time(s) = phase(cycles)`.
impl Mul<Time> for Frequency {
    type Output = Phase;
    fn mul(self, rhs: Time) -> Phase {
        Phase::new(self.value() * rhs.value()).expect("finite product of finite quantities")
    }
}

impl Phase {
    /// Phase in radians (`2*pi*cycles`).
    #[must_use]
    pub fn radians(self) -> f64 {
        self.value() * std::f64::consts::TAU
    }

    /// Unit phasor `e^{i*2*pi*cycles}`.
    #[must_use]
    pub fn phasor(self) -> Complex64 {
        Complex64::from_polar(1.0, self.radians())
    }

    /// Reduce to the canonical range `[0, 1)`.
    #[must_use]
    pub fn wrapped(self) -> Self {
        let v = self.value().rem_euclid(1.0);
        Self::new(v).expect("rem_euclid of a finite value is finite")
    }
}

/// Sub-sample-grid-aligned sample index, per the `align_level` mechanism:
/// `align_level = k` snaps a pulse start to a multiple of
/// `2^k / sample_rate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlignedIndex(NotNan<f64>);

impl AlignedIndex {
    pub fn new(time: Time, sample_rate: Frequency, align_level: i32) -> Result<Self> {
        fn scaleb(x: f64, s: i32) -> f64 {
            x * f64::from(s).exp2()
        }
        let scaled_sr = scaleb(sample_rate.value(), -align_level);
        let i = (time.value() * scaled_sr).ceil();
        let aligned_index = scaleb(i, align_level);
        NotNan::new(aligned_index)
            .map(Self)
            .map_err(|_| anyhow!("invalid index offset"))
    }

    #[must_use]
    pub fn value(&self) -> f64 {
        self.0.into_inner()
    }

    #[must_use]
    pub fn ceil(&self) -> Self {
        Self(NotNan::new(self.0.ceil()).expect("ceil of a finite value is finite"))
    }

    /// `ceil(self) - self`, always in `[0, 1)`.
    #[must_use]
    pub fn index_offset(&self) -> Self {
        Self(
            NotNan::new(self.0.ceil() - self.0.into_inner())
                .expect("difference of finite values is finite"),
        )
    }

    /// `ceil(self)` as a non-negative sample index, or `None` if negative.
    #[must_use]
    pub fn ceil_to_usize(&self) -> Option<usize> {
        let v = self.0.ceil();
        if v < 0.0 {
            None
        } else {
            #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
            Some(v as usize)
        }
    }
}

macro_rules! interned_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub Arc<str>);

        impl $name {
            #[must_use]
            pub fn new(s: impl Into<Arc<str>>) -> Self {
                Self(s.into())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::new(s)
            }
        }
    };
}

interned_id!(ChannelId);
interned_id!(ShapeId);
interned_id!(Label);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_wraps_into_unit_interval() {
        let p = Phase::new(1.25).unwrap();
        assert!((p.wrapped().value() - 0.25).abs() < 1e-12);
        let p = Phase::new(-0.25).unwrap();
        assert!((p.wrapped().value() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn aligned_index_offset_is_in_unit_interval() {
        let t = Time::new(1.0000001).unwrap();
        let idx = AlignedIndex::new(t, Frequency::new(1.0).unwrap(), 0).unwrap();
        let off = idx.index_offset().value();
        assert!((0.0..1.0).contains(&off));
    }
}
