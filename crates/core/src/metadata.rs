//! Metadata extraction: header reading, defensive casting and date parsing.
//!
//! [`MetadataExtractor::extract`] is total. A frame whose header cannot be
//! read yields a record with every attribute absent and a warning in the
//! log; scanners that must skip such frames use
//! [`MetadataExtractor::try_extract`] instead.
//!
//! Two date strategies exist and can disagree for the same frame. A
//! [`DateSource`] picks the authoritative one for the whole run.

use std::collections::BTreeMap;
use std::path::{Component, Path};

use chrono::{NaiveDate, NaiveDateTime};

use crate::config::{DateSource, HeaderKeys};
use crate::error::CoreError;
use crate::fits::{self, HeaderValue};
use crate::frame::{FrameRecord, MasterCandidate};
use crate::types::ObservationDate;

/// Timestamp layout of the header observation keyword.
pub const HEADER_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Date layout of light and raw calibration directory names.
pub const PATH_DATE_FORMAT: &str = "%Y-%m-%d";

/// Date layout at the end of master file names.
pub const MASTER_DATE_FORMAT: &str = "%d%m%Y";

/// Uppercased keyword -> value.
pub type HeaderMap = BTreeMap<String, HeaderValue>;

// ---------------------------------------------------------------------------
// Header readers
// ---------------------------------------------------------------------------

/// Source of raw header key/value pairs for a frame.
pub trait HeaderReader {
    /// Read `keywords` from the header, reporting why it could not be read.
    /// Keywords the header lacks are simply absent from the map.
    fn read_header(&self, path: &Path, keywords: &[&str]) -> Result<HeaderMap, CoreError>;
}

/// Reads the primary HDU header of a FITS file on disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct FitsHeaderReader;

impl HeaderReader for FitsHeaderReader {
    fn read_header(&self, path: &Path, keywords: &[&str]) -> Result<HeaderMap, CoreError> {
        let header = fits::read_header(path, keywords)?;
        Ok(header
            .into_iter()
            .map(|(k, v)| (k.to_ascii_uppercase(), v))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// Builds [`FrameRecord`]s from frame headers and paths.
#[derive(Debug, Clone)]
pub struct MetadataExtractor<R = FitsHeaderReader> {
    keys: HeaderKeys,
    date_source: DateSource,
    reader: R,
}

impl MetadataExtractor<FitsHeaderReader> {
    pub fn new(keys: &HeaderKeys, date_source: DateSource) -> Self {
        Self::with_reader(keys, date_source, FitsHeaderReader)
    }
}

impl<R: HeaderReader> MetadataExtractor<R> {
    pub fn with_reader(keys: &HeaderKeys, date_source: DateSource, reader: R) -> Self {
        Self {
            keys: keys.clone(),
            date_source,
            reader,
        }
    }

    pub fn keys(&self) -> &HeaderKeys {
        &self.keys
    }

    /// Extract a record, never failing.
    pub fn extract(&self, path: &Path) -> FrameRecord {
        self.try_extract(path).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "Frame metadata unreadable");
            FrameRecord::absent(path)
        })
    }

    /// Extract a record, surfacing header read failures.
    pub fn try_extract(&self, path: &Path) -> Result<FrameRecord, CoreError> {
        let header = self.reader.read_header(path, &self.keys.read_keywords())?;
        Ok(self.record_from_header(path, &header))
    }

    /// Extract a master candidate; its date comes from the file name.
    pub fn try_extract_master(&self, path: &Path) -> Result<MasterCandidate, CoreError> {
        let record = self.try_extract(path)?;
        let master_date = parse_date_from_master_path(path);
        if master_date.is_none() {
            tracing::warn!(path = %path.display(), "Master file name carries no DDMMYYYY date");
        }
        Ok(MasterCandidate {
            record,
            master_date,
        })
    }

    /// Normalize an already-read header.
    pub fn record_from_header(&self, path: &Path, header: &HeaderMap) -> FrameRecord {
        let get = |key: &str| header.get(&key.to_ascii_uppercase());

        let filter = get(&self.keys.filter)
            .and_then(HeaderValue::as_text)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let exposure_seconds = get(&self.keys.exposure)
            .and_then(HeaderValue::as_f64)
            .filter(|e| *e >= 0.0)
            .unwrap_or(0.0);

        let observation_date = match self.date_source {
            DateSource::PathSegment => parse_date_from_path(path),
            DateSource::HeaderTimestamp => get(&self.keys.timestamp)
                .and_then(HeaderValue::as_text)
                .and_then(|s| parse_date_from_header(&s)),
        };

        FrameRecord {
            path: path.to_path_buf(),
            filter,
            rotation: get(&self.keys.rotation).and_then(HeaderValue::as_f64),
            gain: get(&self.keys.gain).and_then(HeaderValue::as_i64),
            offset: get(&self.keys.offset).and_then(HeaderValue::as_i64),
            exposure_seconds,
            temperature: get(&self.keys.temperature).and_then(HeaderValue::as_f64),
            observation_date,
        }
    }
}

// ---------------------------------------------------------------------------
// Date parsing
// ---------------------------------------------------------------------------

/// Parse the calendar date out of a header timestamp such as
/// `2025-01-12T21:04:33` (fractional seconds tolerated).
pub fn parse_date_from_header(timestamp: &str) -> Option<ObservationDate> {
    let timestamp = timestamp.trim();
    NaiveDateTime::parse_from_str(timestamp, HEADER_TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .map(|dt| dt.date())
}

/// Find the first path component, innermost first, whose text before the
/// first `_` parses as `YYYY-MM-DD`.
pub fn parse_date_from_path(path: &Path) -> Option<ObservationDate> {
    path.components().rev().find_map(|component| match component {
        Component::Normal(part) => {
            let part = part.to_string_lossy();
            let head = part.split('_').next().unwrap_or_default();
            NaiveDate::parse_from_str(head, PATH_DATE_FORMAT).ok()
        }
        _ => None,
    })
}

/// Parse the `DDMMYYYY` token that ends a master file stem.
pub fn parse_date_from_master_path(path: &Path) -> Option<ObservationDate> {
    let stem = path.file_stem()?.to_string_lossy();
    let token = stem.rsplit('_').next()?;
    NaiveDate::parse_from_str(token, MASTER_DATE_FORMAT).ok()
}

// ---------------------------------------------------------------------------
// Header writing
// ---------------------------------------------------------------------------

/// Header cards describing `record`'s instrument attributes.
///
/// Absent attributes become [`HeaderValue::Undefined`] so stale values are
/// cleared.
pub fn header_cards(
    record: &FrameRecord,
    keys: &HeaderKeys,
    image_type: Option<&str>,
) -> Vec<(String, HeaderValue)> {
    let float = |v: Option<f64>| v.map_or(HeaderValue::Undefined, HeaderValue::Float);
    let int = |v: Option<i64>| v.map_or(HeaderValue::Undefined, HeaderValue::Int);

    let mut cards = vec![
        (
            keys.filter.clone(),
            record
                .filter
                .clone()
                .map_or(HeaderValue::Undefined, HeaderValue::Str),
        ),
        (keys.rotation.clone(), float(record.rotation)),
        (keys.gain.clone(), int(record.gain)),
        (keys.offset.clone(), int(record.offset)),
        (keys.exposure.clone(), HeaderValue::Float(record.exposure_seconds)),
        (keys.temperature.clone(), float(record.temperature)),
    ];
    if let Some(kind) = image_type {
        cards.push((keys.image_type.clone(), HeaderValue::Str(kind.to_string())));
    }
    cards
}

/// Write `record`'s attributes into the primary header of the FITS file at
/// `path`, replacing existing values. Absent attributes remove their keyword.
pub fn write_frame_header(
    path: &Path,
    record: &FrameRecord,
    keys: &HeaderKeys,
    image_type: Option<&str>,
) -> Result<(), CoreError> {
    fits::update_header(path, &header_cards(record, keys, image_type))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
