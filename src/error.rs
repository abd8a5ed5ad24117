//! Public error type returned at the crate boundary.
//!
//! Internal code keeps using `anyhow::Result` with `.context()`; [`Error`]
//! only gets constructed once, when [`crate::orchestrator`] turns the
//! accumulated `anyhow::Error` chain into one of these four variants on the
//! way out.

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum Error {
    /// A caller-supplied value is out of domain: negative duration, NaN
    /// amplitude, unknown channel/shape id, conflicting channel config.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// The schedule tree could not be measured/arranged: conflicting
    /// duration constraints, a column that cannot fit its children, etc.
    #[error("layout error: {message}")]
    Layout { message: String },

    /// A computed waveform index or duration exceeded a buffer/channel
    /// bound (and `allow_oversize` was not set).
    #[error("value out of range: {message}")]
    OutOfRange { message: String },

    /// An invariant the implementation relies on did not hold; this
    /// indicates a bug rather than bad input.
    #[error("internal invariant violated: {message}")]
    InternalInvariant { message: String },
}

impl Error {
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn layout(message: impl Into<String>) -> Self {
        Self::Layout {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::OutOfRange {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn internal_invariant(message: impl Into<String>) -> Self {
        Self::InternalInvariant {
            message: message.into(),
        }
    }
}

/// Maps an `anyhow::Error` produced by an internal stage into the public
/// [`Error`] variant for that stage, keeping the original message chain.
///
/// The three phases are schedule layout, waveform range checks, and
/// everything else (treated as invalid input).
pub(crate) fn from_layout(err: anyhow::Error) -> Error {
    Error::layout(format!("{err:#}"))
}

pub(crate) fn from_out_of_range(err: anyhow::Error) -> Error {
    Error::out_of_range(format!("{err:#}"))
}

pub(crate) fn from_invalid_input(err: anyhow::Error) -> Error {
    Error::invalid_input(format!("{err:#}"))
}
