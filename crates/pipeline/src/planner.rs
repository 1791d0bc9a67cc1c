//! Calibration planning: pairing lights with masters and batching them.
//!
//! Every light either joins exactly one [`CalibrationBatch`] or is recorded
//! as skipped for lack of a master. Lights whose header cannot be read, or
//! that sit outside a `LIGHT/<target>` tree, are logged and dropped.

use std::path::{Path, PathBuf};

use skystack_core::config::MatchingConfig;
use skystack_core::frame::{FrameRecord, MasterCandidate};
use skystack_core::metadata::{HeaderReader, MetadataExtractor};
use skystack_core::naming::target_name;
use skystack_core::selection::{IgnoreFlags, MasterSelector, TimeWindow};
use skystack_core::types::ObservationDate;
use skystack_pixinsight::CalibrationJob;

/// Lights sharing this key are calibrated in one external run.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchKey {
    pub flat_master: PathBuf,
    pub dark_master: PathBuf,
    pub output_dir: PathBuf,
    pub exposure_seconds: f64,
    pub filter: Option<String>,
    pub date: ObservationDate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationBatch {
    pub key: BatchKey,
    pub lights: Vec<PathBuf>,
}

impl CalibrationBatch {
    pub fn job(&self) -> CalibrationJob {
        CalibrationJob {
            lights: self.lights.clone(),
            master_flat: self.key.flat_master.clone(),
            master_dark: self.key.dark_master.clone(),
            output_dir: self.key.output_dir.clone(),
            date: self.key.date,
        }
    }
}

/// Which master could not be found for a light.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingMaster {
    Flat,
    Dark,
    Both,
}

/// Batches in first-seen order, plus lights that had no master.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationPlan {
    pub batches: Vec<CalibrationBatch>,
    pub skipped: Vec<(PathBuf, MissingMaster)>,
}

impl CalibrationPlan {
    /// Distinct output target directories, in first-seen order.
    pub fn output_dirs(&self) -> Vec<&Path> {
        let mut dirs: Vec<&Path> = Vec::new();
        for batch in &self.batches {
            if !dirs.contains(&batch.key.output_dir.as_path()) {
                dirs.push(&batch.key.output_dir);
            }
        }
        dirs
    }

    fn add(&mut self, key: BatchKey, light: PathBuf) {
        match self.batches.iter_mut().find(|b| b.key == key) {
            Some(batch) => batch.lights.push(light),
            None => self.batches.push(CalibrationBatch {
                key,
                lights: vec![light],
            }),
        }
    }
}

/// Builds a [`CalibrationPlan`] from light paths and master pools.
pub struct CalibrationPlanner<'a, R: HeaderReader> {
    extractor: &'a MetadataExtractor<R>,
    selector: MasterSelector,
    flat_window: TimeWindow,
    dark_window: TimeWindow,
}

impl<'a, R: HeaderReader> CalibrationPlanner<'a, R> {
    pub fn new(extractor: &'a MetadataExtractor<R>, matching: &MatchingConfig) -> Self {
        Self {
            extractor,
            selector: MasterSelector::new(matching),
            flat_window: TimeWindow::days(matching.flat_search_days),
            dark_window: TimeWindow::months(matching.dark_search_months),
        }
    }

    pub fn plan(
        &self,
        lights: &[PathBuf],
        flats: &[MasterCandidate],
        darks: &[MasterCandidate],
        output_root: &Path,
    ) -> CalibrationPlan {
        let mut plan = CalibrationPlan::default();

        for path in lights {
            let light = match self.extractor.try_extract(path) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable light");
                    continue;
                }
            };
            let Some(target) = target_name(path) else {
                tracing::warn!(path = %path.display(), "Light is not inside a LIGHT/<target> directory");
                continue;
            };

            match self.select_masters(&light, flats, darks) {
                Ok((flat, dark, date)) => plan.add(
                    BatchKey {
                        flat_master: flat.path().to_path_buf(),
                        dark_master: dark.path().to_path_buf(),
                        output_dir: output_root.join(target),
                        exposure_seconds: light.exposure_seconds,
                        filter: light.filter.clone(),
                        date,
                    },
                    light.path,
                ),
                Err(missing) => {
                    tracing::debug!(path = %path.display(), ?missing, "No matching master, skipping light");
                    plan.skipped.push((light.path, missing));
                }
            }
        }

        tracing::info!(
            batches = plan.batches.len(),
            skipped = plan.skipped.len(),
            "Planned calibration",
        );
        plan
    }

    fn select_masters<'p>(
        &self,
        light: &FrameRecord,
        flats: &'p [MasterCandidate],
        darks: &'p [MasterCandidate],
    ) -> Result<(&'p MasterCandidate, &'p MasterCandidate, ObservationDate), MissingMaster> {
        // An undated light cannot satisfy any time window.
        let Some(date) = light.observation_date else {
            return Err(MissingMaster::Both);
        };
        let flat = self
            .selector
            .select_best(flats, light, date, &self.flat_window, IgnoreFlags::FLAT);
        let dark = self
            .selector
            .select_best(darks, light, date, &self.dark_window, IgnoreFlags::DARK);
        match (flat, dark) {
            (Some(flat), Some(dark)) => Ok((flat, dark, date)),
            (None, Some(_)) => Err(MissingMaster::Flat),
            (Some(_), None) => Err(MissingMaster::Dark),
            (None, None) => Err(MissingMaster::Both),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::NaiveDate;
    use skystack_core::config::{DateSource, HeaderKeys};
    use skystack_core::error::CoreError;
    use skystack_core::fits::HeaderValue;
    use skystack_core::metadata::HeaderMap;

    use super::*;

    /// Serves headers by file name.
    struct StubReader(BTreeMap<String, HeaderMap>);

    impl HeaderReader for StubReader {
        fn read_header(&self, path: &Path, _keywords: &[&str]) -> Result<HeaderMap, CoreError> {
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            self.0
                .get(&name)
                .cloned()
                .ok_or_else(|| {
                    CoreError::io(path, std::io::Error::new(std::io::ErrorKind::NotFound, "no such stub"))
                })
        }
    }

    fn light_header(filter: &str, exposure: f64) -> HeaderMap {
        HeaderMap::from([
            ("FILTER".to_string(), HeaderValue::Str(filter.into())),
            ("GAIN".to_string(), HeaderValue::Int(100)),
            ("OFFSET".to_string(), HeaderValue::Int(8)),
            ("EXPTIME".to_string(), HeaderValue::Float(exposure)),
            ("SET-TEMP".to_string(), HeaderValue::Float(-20.0)),
        ])
    }

    fn master(path: &str, filter: Option<&str>, exposure: f64, date: (i32, u32, u32)) -> MasterCandidate {
        let mut record = FrameRecord::absent(path);
        record.filter = filter.map(Into::into);
        record.gain = Some(100);
        record.offset = Some(8);
        record.exposure_seconds = exposure;
        record.temperature = Some(-20.0);
        MasterCandidate {
            record,
            master_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2),
        }
    }

    fn extractor(headers: &[(&str, HeaderMap)]) -> MetadataExtractor<StubReader> {
        let stub = StubReader(
            headers
                .iter()
                .map(|(n, h)| (n.to_string(), h.clone()))
                .collect(),
        );
        MetadataExtractor::with_reader(&HeaderKeys::default(), DateSource::PathSegment, stub)
    }

    #[test]
    fn lights_with_same_setup_share_a_batch() {
        let ex = extractor(&[
            ("L1.fits", light_header("Ha", 600.0)),
            ("L2.fits", light_header("Ha", 600.0)),
            ("L3.fits", light_header("OIII", 600.0)),
        ]);
        let lights = vec![
            PathBuf::from("/LIGHT/M31/2025-01-12/L1.fits"),
            PathBuf::from("/LIGHT/M31/2025-01-12/L2.fits"),
            PathBuf::from("/LIGHT/M31/2025-01-12/L3.fits"),
        ];
        let flats = vec![
            master("/MF/masterFlat_Ha__10012025.fits", Some("Ha"), 2.0, (2025, 1, 10)),
            master("/MF/masterFlat_OIII__11012025.fits", Some("OIII"), 3.0, (2025, 1, 11)),
        ];
        let darks = vec![master("/MD/masterDark_600s__12112024.fits", None, 600.0, (2024, 11, 12))];

        let plan = CalibrationPlanner::new(&ex, &MatchingConfig::default()).plan(
            &lights,
            &flats,
            &darks,
            Path::new("/CAL"),
        );

        assert!(plan.skipped.is_empty());
        assert_eq!(plan.batches.len(), 2);
        assert_eq!(plan.batches[0].lights.len(), 2);
        assert_eq!(plan.batches[0].key.filter.as_deref(), Some("Ha"));
        assert_eq!(plan.batches[0].key.output_dir, PathBuf::from("/CAL/M31"));
        assert_eq!(plan.batches[1].key.flat_master, flats[1].path());
        assert_eq!(plan.output_dirs(), vec![Path::new("/CAL/M31")]);
    }

    #[test]
    fn missing_dark_skips_the_light() {
        let ex = extractor(&[("L1.fits", light_header("Ha", 600.0))]);
        let lights = vec![PathBuf::from("/LIGHT/M31/2025-01-12/L1.fits")];
        let flats = vec![master("/MF/f.fits", Some("Ha"), 2.0, (2025, 1, 10))];
        let darks = vec![master("/MD/d.fits", None, 600.0, (2024, 6, 1))];

        let plan = CalibrationPlanner::new(&ex, &MatchingConfig::default()).plan(
            &lights,
            &flats,
            &darks,
            Path::new("/CAL"),
        );
        assert!(plan.batches.is_empty());
        assert_eq!(plan.skipped, vec![(lights[0].clone(), MissingMaster::Dark)]);
    }

    #[test]
    fn unreadable_and_untargeted_lights_are_dropped() {
        let ex = extractor(&[("stray.fits", light_header("Ha", 600.0))]);
        let lights = vec![
            PathBuf::from("/LIGHT/M31/2025-01-12/missing.fits"),
            PathBuf::from("/elsewhere/2025-01-12/stray.fits"),
        ];
        let plan = CalibrationPlanner::new(&ex, &MatchingConfig::default()).plan(
            &lights,
            &[],
            &[],
            Path::new("/CAL"),
        );
        assert_eq!(plan, CalibrationPlan::default());
    }

    #[test]
    fn undated_light_has_no_master() {
        let ex = extractor(&[("L1.fits", light_header("Ha", 600.0))]);
        let lights = vec![PathBuf::from("/LIGHT/M31/undated/L1.fits")];
        let flats = vec![master("/MF/f.fits", Some("Ha"), 2.0, (2025, 1, 10))];
        let plan = CalibrationPlanner::new(&ex, &MatchingConfig::default()).plan(
            &lights,
            &flats,
            &flats,
            Path::new("/CAL"),
        );
        assert_eq!(plan.skipped[0].1, MissingMaster::Both);
    }
}
