//! Compiles a hierarchical pulse schedule into per-channel IQ waveforms.
//!
//! The pipeline is `schedule tree -> measure/arrange -> phase-tracking render
//! -> per-channel pulse list -> post-process DAG -> waveform sampler`.
//! [`generate_waveforms`] is the single entry point external callers should
//! use.

#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

pub mod buffer;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod postprocess;
pub mod pulse;
pub mod quant;
pub mod sampler;
pub mod schedule;
pub mod shape;

use num::Complex;

pub(crate) type Complex64 = Complex<f64>;

pub use error::Error;
pub use orchestrator::{
    generate_waveforms, generate_waveforms_with_states, Channel, GenerateOptions,
    GenerateOptionsBuilder,
};
