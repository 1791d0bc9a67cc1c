//! Calibration and master-stacking orchestration.
//!
//! Ties the domain logic of `skystack-core` to the external application
//! driven by `skystack-pixinsight`. Everything here runs sequentially:
//! the handshake directory admits one external run at a time.

pub mod calibrate;
pub mod error;
pub mod planner;
pub mod scan;
pub mod stacking;

pub use calibrate::{CalibrationDirs, CalibrationOrchestrator, CalibrationReport, FrameOutcome};
pub use error::PipelineError;
pub use stacking::{MasterStacker, StackingReport};
