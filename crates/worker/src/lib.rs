//! Library target of the `skystack-worker` binary.
//!
//! Exposes command parsing and environment configuration so they can be
//! tested without running the binary.

pub mod command;
pub mod config;
