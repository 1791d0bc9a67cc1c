//! Frame records: the normalized, typed view of one exposure file.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::ObservationDate;

/// Token rendered in keys and ledgers for an absent value.
pub const ABSENT_TOKEN: &str = "None";

// ---------------------------------------------------------------------------
// Attributes
// ---------------------------------------------------------------------------

/// Instrument attributes a frame can be grouped or matched on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    Filter,
    Rotation,
    Gain,
    Offset,
    Exposure,
    Temperature,
}

impl Attribute {
    pub fn name(self) -> &'static str {
        match self {
            Self::Filter => "filter",
            Self::Rotation => "rotation",
            Self::Gain => "gain",
            Self::Offset => "offset",
            Self::Exposure => "exposure",
            Self::Temperature => "temperature",
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Projection of a single attribute, absent-preserving.
///
/// Floats are held rounded to three decimals so that projections compare
/// and render identically.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Text(String),
    Integer(i64),
    Number(f64),
    Absent,
}

impl AttributeValue {
    fn number(value: Option<f64>) -> Self {
        value.map_or(Self::Absent, |v| Self::Number(round3(v)))
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Number(n) => write!(f, "{n:?}"),
            Self::Absent => f.write_str(ABSENT_TOKEN),
        }
    }
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

// ---------------------------------------------------------------------------
// Frame record
// ---------------------------------------------------------------------------

/// One physical exposure file.
///
/// Built once per scan and never mutated. Every numeric field is either a
/// real number or `None`; a header value that fails conversion is stored as
/// `None` rather than as text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub path: PathBuf,
    pub filter: Option<String>,
    pub rotation: Option<f64>,
    pub gain: Option<i64>,
    pub offset: Option<i64>,
    /// Seconds; `0.0` when the header has no usable exposure.
    pub exposure_seconds: f64,
    pub temperature: Option<f64>,
    pub observation_date: Option<ObservationDate>,
}

impl FrameRecord {
    /// Record with every attribute absent, used when a frame is unreadable.
    pub fn absent(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            filter: None,
            rotation: None,
            gain: None,
            offset: None,
            exposure_seconds: 0.0,
            temperature: None,
            observation_date: None,
        }
    }

    /// Project a single attribute.
    pub fn attribute(&self, attribute: Attribute) -> AttributeValue {
        match attribute {
            Attribute::Filter => self
                .filter
                .clone()
                .map_or(AttributeValue::Absent, AttributeValue::Text),
            Attribute::Rotation => AttributeValue::number(self.rotation),
            Attribute::Gain => self.gain.map_or(AttributeValue::Absent, AttributeValue::Integer),
            Attribute::Offset => self
                .offset
                .map_or(AttributeValue::Absent, AttributeValue::Integer),
            Attribute::Exposure => AttributeValue::number(Some(self.exposure_seconds)),
            Attribute::Temperature => AttributeValue::number(self.temperature),
        }
    }

    /// File name as text, for logs and output naming.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Master candidates
// ---------------------------------------------------------------------------

/// A previously produced master calibration frame.
///
/// `master_date` comes from the master's file name (`..._DDMMYYYY.fits`),
/// independently of the record's own observation date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterCandidate {
    pub record: FrameRecord,
    pub master_date: Option<ObservationDate>,
}

impl MasterCandidate {
    pub fn path(&self) -> &Path {
        &self.record.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_record_has_zero_exposure() {
        let record = FrameRecord::absent("/data/a.fits");
        assert_eq!(record.exposure_seconds, 0.0);
        assert_eq!(record.attribute(Attribute::Gain), AttributeValue::Absent);
        assert_eq!(record.attribute(Attribute::Exposure), AttributeValue::Number(0.0));
    }

    #[test]
    fn rotation_projection_rounds_to_three_decimals() {
        let mut a = FrameRecord::absent("a.fits");
        let mut b = FrameRecord::absent("b.fits");
        a.rotation = Some(12.34561);
        b.rotation = Some(12.3459);
        assert_eq!(a.attribute(Attribute::Rotation), b.attribute(Attribute::Rotation));
        assert_eq!(a.attribute(Attribute::Rotation).to_string(), "12.346");
    }

    #[test]
    fn values_render_for_keys() {
        assert_eq!(AttributeValue::Text("Ha".into()).to_string(), "Ha");
        assert_eq!(AttributeValue::Integer(100).to_string(), "100");
        assert_eq!(AttributeValue::Number(600.0).to_string(), "600.0");
        assert_eq!(AttributeValue::Absent.to_string(), "None");
    }

    #[test]
    fn file_name_is_extracted() {
        let record = FrameRecord::absent("/data/LIGHT/M31/2025-01-12/L_0001.fits");
        assert_eq!(record.file_name(), "L_0001.fits");
    }
}
