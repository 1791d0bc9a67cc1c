//! Domain logic for the skystack astrophotography pipeline.
//!
//! Everything in this crate is synchronous and free of process
//! management: frame metadata extraction, FITS header access,
//! frame grouping, master calibration selection, naming conventions
//! and the calibration ledger model. The `pixinsight` and `pipeline`
//! crates build the I/O-heavy orchestration on top of it.

pub mod config;
pub mod error;
pub mod fits;
pub mod frame;
pub mod grouping;
pub mod ledger;
pub mod metadata;
pub mod naming;
pub mod selection;
pub mod types;
