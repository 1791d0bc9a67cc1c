//! Configuration structs shared by the extraction, grouping and selection
//! engines.
//!
//! Built once at startup (see `skystack-worker`'s `WorkerConfig::from_env`)
//! and handed to each component by reference. Nothing in this crate reads
//! the environment directly.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Default window, in days, when searching for a master flat.
pub const DEFAULT_FLAT_SEARCH_DAYS: u32 = 4;

/// Default window, in calendar months, when searching for a master dark.
pub const DEFAULT_DARK_SEARCH_MONTHS: u32 = 3;

/// Default absolute rotation tolerance, in degrees.
pub const DEFAULT_ROTATION_TOLERANCE: f64 = 0.5;

/// Default day window when grouping raw flats for stacking.
pub const DEFAULT_FLAT_STACK_DAYS: u32 = 30;

/// Default day window when grouping raw darks for stacking.
pub const DEFAULT_DARK_STACK_DAYS: u32 = 0;

// ---------------------------------------------------------------------------
// Header keywords
// ---------------------------------------------------------------------------

/// FITS keyword names for each instrument attribute.
///
/// Capture software differs in what it writes (`SET-TEMP` vs `CCD-TEMP`,
/// `ROTATANG` vs `ROTATOR`), so every keyword is configurable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderKeys {
    pub filter: String,
    pub rotation: String,
    pub gain: String,
    pub offset: String,
    pub exposure: String,
    pub temperature: String,
    /// Full observation timestamp, e.g. `DATE-OBS`.
    pub timestamp: String,
    /// Frame type, e.g. `IMAGETYP`. Only written, never matched on.
    pub image_type: String,
}

impl Default for HeaderKeys {
    fn default() -> Self {
        Self {
            filter: "FILTER".into(),
            rotation: "ROTATANG".into(),
            gain: "GAIN".into(),
            offset: "OFFSET".into(),
            exposure: "EXPTIME".into(),
            temperature: "SET-TEMP".into(),
            timestamp: "DATE-OBS".into(),
            image_type: "IMAGETYP".into(),
        }
    }
}

impl HeaderKeys {
    /// Keywords read from every frame header.
    pub fn read_keywords(&self) -> [&str; 7] {
        [
            &self.filter,
            &self.rotation,
            &self.gain,
            &self.offset,
            &self.exposure,
            &self.temperature,
            &self.timestamp,
        ]
    }
}

// ---------------------------------------------------------------------------
// Date source
// ---------------------------------------------------------------------------

/// Which of the two date-parsing strategies is authoritative.
///
/// A run uses exactly one source for every light and raw calibration
/// frame. Masters always take their date from their file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateSource {
    /// First `YYYY-MM-DD` directory or file-name prefix, innermost first.
    #[default]
    PathSegment,
    /// The header timestamp keyword (see [`HeaderKeys::timestamp`]).
    HeaderTimestamp,
}

impl std::str::FromStr for DateSource {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "path" | "path_segment" => Ok(Self::PathSegment),
            "header" | "header_timestamp" => Ok(Self::HeaderTimestamp),
            other => Err(CoreError::Validation(format!(
                "Invalid date source '{other}'. Must be one of: path, header"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// Tolerances used when pairing light frames with master calibrations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingConfig {
    pub flat_search_days: u32,
    pub dark_search_months: u32,
    pub rotation_tolerance: f64,
    pub date_source: DateSource,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            flat_search_days: DEFAULT_FLAT_SEARCH_DAYS,
            dark_search_months: DEFAULT_DARK_SEARCH_MONTHS,
            rotation_tolerance: DEFAULT_ROTATION_TOLERANCE,
            date_source: DateSource::default(),
        }
    }
}

impl MatchingConfig {
    /// Reject tolerances that would make every comparison meaningless.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.rotation_tolerance.is_finite() || self.rotation_tolerance < 0.0 {
            return Err(CoreError::Validation(format!(
                "Rotation tolerance must be a non-negative number, got {}",
                self.rotation_tolerance
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Stacking
// ---------------------------------------------------------------------------

/// Day windows used when grouping raw calibration frames into masters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackingConfig {
    pub flat_group_days: u32,
    pub dark_group_days: u32,
}

impl Default for StackingConfig {
    fn default() -> Self {
        Self {
            flat_group_days: DEFAULT_FLAT_STACK_DAYS,
            dark_group_days: DEFAULT_DARK_STACK_DAYS,
        }
    }
}
