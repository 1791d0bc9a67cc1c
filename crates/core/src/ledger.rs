//! Calibration ledger: the persisted per-target record of calibration
//! outcomes.
//!
//! One `calibration_log.json` lives in each output target directory:
//!
//! ```json
//! {
//!   "Target name": "M31",
//!   "12-01-2025": {
//!     "Ha": {
//!       "600.0": {
//!         "flat_master": "/MASTERS/FLAT/masterFlat_Ha__10012025.fits",
//!         "dark_master": "/MASTERS/DARK/masterDark_600s__12112024.fits",
//!         "num lights": 1,
//!         "num calibrated": 1,
//!         "failed lights": []
//!       }
//!     }
//!   }
//! }
//! ```
//!
//! Entries only ever grow; nothing here deletes a date, filter or exposure.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::frame::ABSENT_TOKEN;
use crate::types::ObservationDate;

/// File name of the ledger inside an output target directory.
pub const LEDGER_FILE_NAME: &str = "calibration_log.json";

/// Layout of the date keys.
pub const LEDGER_DATE_FORMAT: &str = "%d-%m-%Y";

/// Ledger location for an output target directory.
pub fn ledger_path(target_dir: &Path) -> PathBuf {
    target_dir.join(LEDGER_FILE_NAME)
}

/// Date key, e.g. `12-01-2025`.
pub fn date_key(date: ObservationDate) -> String {
    date.format(LEDGER_DATE_FORMAT).to_string()
}

/// Filter key; absent filters are recorded under `None`.
pub fn filter_key(filter: Option<&str>) -> String {
    filter.unwrap_or(ABSENT_TOKEN).to_string()
}

/// Exposure key, e.g. `600.0`.
pub fn exposure_key(seconds: f64) -> String {
    format!("{seconds:?}")
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// Outcome counters for one (date, filter, exposure) slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub flat_master: String,
    pub dark_master: String,
    #[serde(rename = "num lights", default)]
    pub total_lights: u64,
    #[serde(rename = "num calibrated", default)]
    pub calibrated_count: u64,
    #[serde(rename = "failed lights", default)]
    pub failed_paths: Vec<String>,
}

impl LedgerEntry {
    fn new(flat_master: &Path, dark_master: &Path) -> Self {
        Self {
            flat_master: flat_master.display().to_string(),
            dark_master: dark_master.display().to_string(),
            total_lights: 0,
            calibrated_count: 0,
            failed_paths: Vec::new(),
        }
    }

    /// Fold one finished batch into the counters.
    pub fn record_batch(&mut self, total: usize, calibrated: usize, failed: &[PathBuf]) {
        self.total_lights += total as u64;
        self.calibrated_count += calibrated as u64;
        self.failed_paths
            .extend(failed.iter().map(|p| p.display().to_string()));
    }
}

type ExposureMap = BTreeMap<String, LedgerEntry>;
type FilterMap = BTreeMap<String, ExposureMap>;

/// The whole ledger of one output target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationLedger {
    #[serde(rename = "Target name")]
    pub target_name: String,
    #[serde(flatten)]
    pub dates: BTreeMap<String, FilterMap>,
}

impl CalibrationLedger {
    pub fn new(target_name: impl Into<String>) -> Self {
        Self {
            target_name: target_name.into(),
            dates: BTreeMap::new(),
        }
    }

    /// Read the ledger at `path`.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path).map_err(|e| CoreError::io(path, e))?;
        serde_json::from_str(&text).map_err(|source| CoreError::Ledger {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load the ledger of `target_dir`, creating and persisting an empty
    /// one on first use.
    pub fn load_or_create(target_dir: &Path, target_name: &str) -> Result<Self, CoreError> {
        let path = ledger_path(target_dir);
        if path.exists() {
            return Self::load(&path);
        }
        let ledger = Self::new(target_name);
        ledger.save(&path)?;
        tracing::info!(path = %path.display(), "Created calibration ledger");
        Ok(ledger)
    }

    /// Write the ledger as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        let json = serde_json::to_string_pretty(self).map_err(|source| CoreError::Ledger {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(|e| CoreError::io(path, e))
    }

    /// Slot for a batch, created with the batch's masters if new. An
    /// existing slot keeps the masters it was first recorded with.
    pub fn entry_mut(
        &mut self,
        date: ObservationDate,
        filter: Option<&str>,
        exposure_seconds: f64,
        flat_master: &Path,
        dark_master: &Path,
    ) -> &mut LedgerEntry {
        self.dates
            .entry(date_key(date))
            .or_default()
            .entry(filter_key(filter))
            .or_default()
            .entry(exposure_key(exposure_seconds))
            .or_insert_with(|| LedgerEntry::new(flat_master, dark_master))
    }

    /// Look up a slot without creating it.
    pub fn entry(
        &self,
        date: ObservationDate,
        filter: Option<&str>,
        exposure_seconds: f64,
    ) -> Option<&LedgerEntry> {
        self.dates
            .get(&date_key(date))?
            .get(&filter_key(filter))?
            .get(&exposure_key(exposure_seconds))
    }

    /// Totals across every slot.
    pub fn summary(&self) -> LedgerSummary {
        let mut summary = LedgerSummary::default();
        for filters in self.dates.values() {
            for (filter, exposures) in filters {
                for (exposure, entry) in exposures {
                    let seconds = exposure.parse::<f64>().unwrap_or(0.0).trunc();
                    let integrated = seconds * entry.calibrated_count as f64;
                    *summary
                        .integration_seconds_by_filter
                        .entry(filter.clone())
                        .or_default() += integrated;
                    summary.total_integration_seconds += integrated;
                    summary.calibrated += entry.calibrated_count;
                    summary.failed += entry.failed_paths.len() as u64;
                }
            }
        }
        summary
    }
}

/// Aggregate view of a ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LedgerSummary {
    pub integration_seconds_by_filter: BTreeMap<String, f64>,
    pub total_integration_seconds: f64,
    pub calibrated: u64,
    pub failed: u64,
}

impl LedgerSummary {
    pub fn total_integration_hours(&self) -> f64 {
        self.total_integration_seconds / 3600.0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use assert_matches::assert_matches;

    fn date() -> ObservationDate {
        NaiveDate::from_ymd_opt(2025, 1, 12).unwrap()
    }

    #[test]
    fn keys_match_persisted_layout() {
        assert_eq!(date_key(date()), "12-01-2025");
        assert_eq!(exposure_key(600.0), "600.0");
        assert_eq!(exposure_key(0.5), "0.5");
        assert_eq!(filter_key(None), "None");
    }

    #[test]
    fn serializes_with_target_name_and_nested_dates() {
        let mut ledger = CalibrationLedger::new("M31");
        ledger
            .entry_mut(date(), Some("Ha"), 600.0, Path::new("/f.fits"), Path::new("/d.fits"))
            .record_batch(2, 1, &[PathBuf::from("/LIGHT/M31/b.fits")]);

        let value = serde_json::to_value(&ledger).unwrap();
        assert_eq!(value["Target name"], "M31");
        let entry = &value["12-01-2025"]["Ha"]["600.0"];
        assert_eq!(entry["flat_master"], "/f.fits");
        assert_eq!(entry["num lights"], 2);
        assert_eq!(entry["num calibrated"], 1);
        assert_eq!(entry["failed lights"][0], "/LIGHT/M31/b.fits");
    }

    #[test]
    fn existing_slot_accumulates_and_keeps_masters() {
        let mut ledger = CalibrationLedger::new("M31");
        ledger
            .entry_mut(date(), Some("Ha"), 600.0, Path::new("/f1"), Path::new("/d1"))
            .record_batch(3, 3, &[]);
        ledger
            .entry_mut(date(), Some("Ha"), 600.0, Path::new("/f2"), Path::new("/d2"))
            .record_batch(2, 1, &[PathBuf::from("/x.fits")]);

        let entry = ledger.entry(date(), Some("Ha"), 600.0).unwrap();
        assert_eq!(entry.flat_master, "/f1");
        assert_eq!(entry.total_lights, 5);
        assert_eq!(entry.calibrated_count, 4);
        assert_eq!(entry.failed_paths, vec!["/x.fits".to_string()]);
    }

    #[test]
    fn load_or_create_persists_then_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let created = CalibrationLedger::load_or_create(dir.path(), "M42").unwrap();
        assert!(ledger_path(dir.path()).exists());
        assert_eq!(created.target_name, "M42");

        let mut ledger = created;
        ledger
            .entry_mut(date(), None, 120.0, Path::new("/f"), Path::new("/d"))
            .record_batch(1, 1, &[]);
        ledger.save(&ledger_path(dir.path())).unwrap();

        let reloaded = CalibrationLedger::load_or_create(dir.path(), "ignored").unwrap();
        assert_eq!(reloaded, ledger);
    }

    #[test]
    fn reads_ledger_written_by_older_runs() {
        let dir = tempfile::tempdir().unwrap();
        let path = ledger_path(dir.path());
        std::fs::write(
            &path,
            r#"{"Target name": "M31", "12-01-2025": {"Ha": {"600.0": {
                "flat_master": "/f", "dark_master": "/d",
                "num lights": 0, "num calibrated": 4, "failed lights": ["/a"]}}}}"#,
        )
        .unwrap();
        let ledger = CalibrationLedger::load(&path).unwrap();
        assert_eq!(ledger.entry(date(), Some("Ha"), 600.0).unwrap().calibrated_count, 4);
    }

    #[test]
    fn corrupt_ledger_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = ledger_path(dir.path());
        std::fs::write(&path, "{not json").unwrap();
        assert_matches!(CalibrationLedger::load(&path), Err(CoreError::Ledger { .. }));
    }

    #[test]
    fn summary_totals_integration_time() {
        let mut ledger = CalibrationLedger::new("M31");
        ledger
            .entry_mut(date(), Some("Ha"), 600.0, Path::new("/f"), Path::new("/d"))
            .record_batch(4, 3, &[PathBuf::from("/bad")]);
        ledger
            .entry_mut(date(), Some("OIII"), 300.0, Path::new("/f"), Path::new("/d"))
            .record_batch(2, 2, &[]);

        let summary = ledger.summary();
        assert_eq!(summary.integration_seconds_by_filter["Ha"], 1800.0);
        assert_eq!(summary.integration_seconds_by_filter["OIII"], 600.0);
        assert_eq!(summary.total_integration_seconds, 2400.0);
        assert_eq!(summary.calibrated, 5);
        assert_eq!(summary.failed, 1);
        assert!((summary.total_integration_hours() - 2400.0 / 3600.0).abs() < 1e-12);
    }
}
