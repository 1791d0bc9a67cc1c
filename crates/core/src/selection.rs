//! Master calibration selection.
//!
//! A light frame is paired with a master flat or dark by scanning a pool of
//! [`MasterCandidate`]s. Every attribute rule is a hard reject unless its
//! `ignore_*` flag is set; gain and offset can never be ignored.
//!
//! The pool is scanned in order and the **last** candidate satisfying all
//! rules wins. Candidates are not ranked by date distance, so callers that
//! want the closest master must order the pool accordingly.

use crate::config::MatchingConfig;
use crate::error::CoreError;
use crate::frame::{FrameRecord, MasterCandidate};
use crate::types::ObservationDate;

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Which attribute checks to skip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IgnoreFlags {
    pub exposure: bool,
    pub filter: bool,
    pub temperature: bool,
    pub rotation: bool,
}

impl IgnoreFlags {
    /// Flats are matched regardless of exposure and temperature.
    pub const FLAT: Self = Self {
        exposure: true,
        filter: false,
        temperature: true,
        rotation: false,
    };

    /// Darks are matched regardless of filter and rotation.
    pub const DARK: Self = Self {
        exposure: false,
        filter: true,
        temperature: false,
        rotation: true,
    };
}

/// Acceptable distance between a master's date and the light's date.
///
/// A candidate passes when it satisfies either bound that is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    days: Option<u32>,
    months: Option<u32>,
}

impl TimeWindow {
    /// Build a window; at least one bound is required.
    pub fn new(days: Option<u32>, months: Option<u32>) -> Result<Self, CoreError> {
        if days.is_none() && months.is_none() {
            return Err(CoreError::Validation(
                "A time window needs a day bound, a month bound, or both".into(),
            ));
        }
        Ok(Self { days, months })
    }

    pub fn days(days: u32) -> Self {
        Self {
            days: Some(days),
            months: None,
        }
    }

    pub fn months(months: u32) -> Self {
        Self {
            days: None,
            months: Some(months),
        }
    }

    /// Whether `candidate` falls within the window around `target`.
    pub fn accepts(&self, candidate: ObservationDate, target: ObservationDate) -> bool {
        let within_days = self
            .days
            .is_some_and(|d| (candidate - target).num_days().abs() <= i64::from(d));
        let within_months = self
            .months
            .is_some_and(|m| month_difference(candidate, target) <= i64::from(m));
        within_days || within_months
    }
}

/// `|12 * Δyears + Δmonths|`, ignoring the day of month.
pub fn month_difference(a: ObservationDate, b: ObservationDate) -> i64 {
    use chrono::Datelike;
    let years = i64::from(a.year() - b.year());
    let months = i64::from(a.month()) - i64::from(b.month());
    (years * 12 + months).abs()
}

/// Why a candidate was rejected. Used only for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Exposure,
    Filter,
    Gain,
    Offset,
    Temperature,
    Rotation,
    MissingDate,
    OutsideWindow,
}

// ---------------------------------------------------------------------------
// Selector
// ---------------------------------------------------------------------------

/// Applies the matching rules with a configured rotation tolerance.
#[derive(Debug, Clone)]
pub struct MasterSelector {
    rotation_tolerance: f64,
}

impl MasterSelector {
    pub fn new(config: &MatchingConfig) -> Self {
        Self {
            rotation_tolerance: config.rotation_tolerance,
        }
    }

    /// Check a single candidate against the target attributes and date.
    pub fn evaluate(
        &self,
        candidate: &MasterCandidate,
        target: &FrameRecord,
        target_date: ObservationDate,
        window: &TimeWindow,
        ignore: IgnoreFlags,
    ) -> Result<(), Rejection> {
        let master = &candidate.record;

        if !ignore.exposure && master.exposure_seconds != target.exposure_seconds {
            return Err(Rejection::Exposure);
        }
        if !ignore.filter && master.filter != target.filter {
            return Err(Rejection::Filter);
        }
        if master.gain != target.gain {
            return Err(Rejection::Gain);
        }
        if master.offset != target.offset {
            return Err(Rejection::Offset);
        }
        if !ignore.temperature {
            if let Some(temp) = master.temperature {
                if target.temperature != Some(temp) {
                    return Err(Rejection::Temperature);
                }
            }
        }
        if !ignore.rotation {
            if let Some(rot) = master.rotation {
                let within = target
                    .rotation
                    .is_some_and(|t| (rot - t).abs() <= self.rotation_tolerance);
                if !within {
                    return Err(Rejection::Rotation);
                }
            }
        }

        let master_date = candidate.master_date.ok_or(Rejection::MissingDate)?;
        if !window.accepts(master_date, target_date) {
            return Err(Rejection::OutsideWindow);
        }
        Ok(())
    }

    /// Select the last candidate in `pool` that satisfies every rule.
    pub fn select_best<'a>(
        &self,
        pool: &'a [MasterCandidate],
        target: &FrameRecord,
        target_date: ObservationDate,
        window: &TimeWindow,
        ignore: IgnoreFlags,
    ) -> Option<&'a MasterCandidate> {
        let mut best = None;
        for candidate in pool {
            match self.evaluate(candidate, target, target_date, window, ignore) {
                Ok(()) => best = Some(candidate),
                Err(reason) => tracing::debug!(
                    master = %candidate.path().display(),
                    light = %target.path.display(),
                    ?reason,
                    "Master rejected",
                ),
            }
        }
        best
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate};

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> ObservationDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn light() -> FrameRecord {
        FrameRecord {
            path: "/LIGHT/M31/2025-01-12/L_0001.fits".into(),
            filter: Some("Ha".into()),
            rotation: Some(45.0),
            gain: Some(100),
            offset: Some(8),
            exposure_seconds: 600.0,
            temperature: Some(-20.0),
            observation_date: Some(date(2025, 1, 12)),
        }
    }

    fn candidate(name: &str, master_date: ObservationDate) -> MasterCandidate {
        let mut record = light();
        record.path = format!("/MASTERS/{name}.fits").into();
        record.observation_date = None;
        MasterCandidate {
            record,
            master_date: Some(master_date),
        }
    }

    fn selector() -> MasterSelector {
        MasterSelector::new(&MatchingConfig::default())
    }

    #[test]
    fn empty_pool_selects_nothing() {
        let target = light();
        let chosen = selector().select_best(
            &[],
            &target,
            date(2025, 1, 12),
            &TimeWindow::days(4),
            IgnoreFlags::FLAT,
        );
        assert!(chosen.is_none());
    }

    #[test]
    fn last_eligible_candidate_wins_over_closest() {
        let target = light();
        let target_date = date(2025, 1, 12);
        let pool = vec![
            candidate("near", target_date - Duration::days(1)),
            candidate("far", target_date - Duration::days(9)),
        ];
        let chosen = selector()
            .select_best(&pool, &target, target_date, &TimeWindow::days(10), IgnoreFlags::FLAT)
            .unwrap();
        assert_eq!(chosen.path().to_str(), Some("/MASTERS/far.fits"));
    }

    #[test]
    fn day_window_is_inclusive() {
        let target = light();
        let target_date = date(2025, 1, 12);
        let pool = vec![candidate("edge", date(2025, 1, 16))];
        let s = selector();
        assert!(s
            .select_best(&pool, &target, target_date, &TimeWindow::days(4), IgnoreFlags::FLAT)
            .is_some());
        assert!(s
            .select_best(&pool, &target, target_date, &TimeWindow::days(3), IgnoreFlags::FLAT)
            .is_none());
    }

    #[test]
    fn month_window_ignores_day_of_month() {
        assert_eq!(month_difference(date(2025, 1, 31), date(2024, 10, 1)), 3);
        assert_eq!(month_difference(date(2024, 10, 1), date(2025, 1, 31)), 3);
        let window = TimeWindow::months(3);
        assert!(window.accepts(date(2024, 10, 1), date(2025, 1, 31)));
        assert!(!window.accepts(date(2024, 9, 30), date(2025, 1, 1)));
    }

    #[test]
    fn window_requires_a_bound() {
        assert!(TimeWindow::new(None, None).is_err());
        let both = TimeWindow::new(Some(1), Some(0)).unwrap();
        assert!(both.accepts(date(2025, 1, 20), date(2025, 1, 2)), "month bound alone suffices");
    }

    #[test]
    fn gain_and_offset_are_never_ignored() {
        let target = light();
        let mut pool = vec![candidate("gain", date(2025, 1, 12))];
        pool[0].record.gain = Some(0);
        let everything = IgnoreFlags {
            exposure: true,
            filter: true,
            temperature: true,
            rotation: true,
        };
        let s = selector();
        let window = TimeWindow::days(4);
        assert_eq!(
            s.evaluate(&pool[0], &target, date(2025, 1, 12), &window, everything),
            Err(Rejection::Gain)
        );
        pool[0].record.gain = Some(100);
        pool[0].record.offset = None;
        assert_eq!(
            s.evaluate(&pool[0], &target, date(2025, 1, 12), &window, everything),
            Err(Rejection::Offset)
        );
    }

    #[test]
    fn temperature_only_checked_when_master_has_one() {
        let target = light();
        let mut master = candidate("dark", date(2025, 1, 12));
        let window = TimeWindow::months(3);
        let s = selector();

        master.record.temperature = Some(-10.0);
        assert_eq!(
            s.evaluate(&master, &target, date(2025, 1, 12), &window, IgnoreFlags::DARK),
            Err(Rejection::Temperature)
        );
        master.record.temperature = None;
        assert_eq!(
            s.evaluate(&master, &target, date(2025, 1, 12), &window, IgnoreFlags::DARK),
            Ok(())
        );
    }

    #[test]
    fn rotation_tolerance_applies_to_flats() {
        let target = light();
        let mut master = candidate("flat", date(2025, 1, 12));
        let window = TimeWindow::days(4);
        let s = selector();

        master.record.rotation = Some(45.4);
        assert!(s
            .evaluate(&master, &target, date(2025, 1, 12), &window, IgnoreFlags::FLAT)
            .is_ok());
        master.record.rotation = Some(46.0);
        assert_eq!(
            s.evaluate(&master, &target, date(2025, 1, 12), &window, IgnoreFlags::FLAT),
            Err(Rejection::Rotation)
        );
        master.record.rotation = None;
        assert!(s
            .evaluate(&master, &target, date(2025, 1, 12), &window, IgnoreFlags::FLAT)
            .is_ok());
    }

    #[test]
    fn exposure_and_filter_respect_flags() {
        let target = light();
        let mut master = candidate("m", date(2025, 1, 12));
        master.record.exposure_seconds = 2.5;
        master.record.filter = Some("OIII".into());
        let window = TimeWindow::days(4);
        let s = selector();

        assert_eq!(
            s.evaluate(&master, &target, date(2025, 1, 12), &window, IgnoreFlags::default()),
            Err(Rejection::Exposure)
        );
        assert_eq!(
            s.evaluate(&master, &target, date(2025, 1, 12), &window, IgnoreFlags::FLAT),
            Err(Rejection::Filter)
        );
        assert_eq!(
            s.evaluate(&master, &target, date(2025, 1, 12), &window, IgnoreFlags::DARK),
            Err(Rejection::Exposure)
        );
    }

    #[test]
    fn undated_master_is_rejected() {
        let target = light();
        let mut master = candidate("m", date(2025, 1, 12));
        master.master_date = None;
        assert_eq!(
            selector().evaluate(
                &master,
                &target,
                date(2025, 1, 12),
                &TimeWindow::days(4),
                IgnoreFlags::FLAT
            ),
            Err(Rejection::MissingDate)
        );
    }
}
