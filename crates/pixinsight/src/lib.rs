//! PixInsight integration.
//!
//! PixInsight is treated as a black box reached through its command line
//! and a shared handshake directory (see [`handshake`]). [`runner`]
//! exposes the [`ExternalRunner`] trait the pipeline is written against
//! and the [`PixInsightCli`] implementation.

pub mod error;
pub mod handshake;
pub mod params;
pub mod runner;

pub use error::PixInsightError;
pub use runner::{CalibrationJob, ExternalRunner, PixInsightCli, RunReport, RunnerConfig, StackJob};
