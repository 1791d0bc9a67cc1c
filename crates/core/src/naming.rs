//! File and directory naming conventions.
//!
//! Calibrated outputs, master frames and output targets are all located by
//! name alone, so every component that produces or looks for one of these
//! files goes through the functions here.

use std::path::{Component, Path, PathBuf};

use crate::frame::{Attribute, AttributeValue, FrameRecord};
use crate::metadata::MASTER_DATE_FORMAT;
use crate::types::ObservationDate;

/// Directory component whose child names the observing target.
pub const LIGHT_DIR: &str = "LIGHT";

/// Directory that consumed calibration frames are moved into.
pub const USED_DIR: &str = "USED";

/// Rendering of an absent field in master file names.
pub const MISSING_FIELD: &str = "NA";

/// Extensions the calibration step may produce, in lookup order.
pub const CALIBRATED_EXTENSIONS: [&str; 2] = ["fits", "xisf"];

/// Suffix appended to a light's stem by calibration.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use skystack_core::naming::calibrated_prefix;
///
/// let date = NaiveDate::from_ymd_opt(2025, 1, 12).unwrap();
/// assert_eq!(calibrated_prefix(date), "__12012025_c");
/// ```
pub fn calibrated_prefix(date: ObservationDate) -> String {
    format!("__{}_c", date.format(MASTER_DATE_FORMAT))
}

/// The two files calibration may produce for `light` inside `output_dir`.
///
/// `L_0001.fits` dated 2025-01-12 becomes `L_0001__12012025_c.fits` or
/// `L_0001__12012025_c.xisf`.
pub fn calibrated_output_paths(
    output_dir: &Path,
    light: &Path,
    date: ObservationDate,
) -> [PathBuf; 2] {
    let stem = light
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let prefix = calibrated_prefix(date);
    CALIBRATED_EXTENSIONS.map(|ext| output_dir.join(format!("{stem}{prefix}.{ext}")))
}

/// Name of the directory directly below `LIGHT`, if any.
pub fn target_name(path: &Path) -> Option<String> {
    let mut parts = path.components().filter_map(|c| match c {
        Component::Normal(part) => Some(part.to_string_lossy()),
        _ => None,
    });
    parts.by_ref().find(|p| p == LIGHT_DIR)?;
    let target = parts.next()?;
    // The frame file itself is not a target directory.
    if path.file_name().is_some_and(|n| n.to_string_lossy() == target) {
        return None;
    }
    Some(target.into_owned())
}

/// Whether `path` lies inside a `USED` directory.
pub fn is_used(path: &Path) -> bool {
    path.components()
        .any(|c| matches!(c, Component::Normal(p) if p == USED_DIR))
}

// ---------------------------------------------------------------------------
// Masters
// ---------------------------------------------------------------------------

/// Kind of master calibration frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MasterKind {
    Flat,
    Dark,
}

impl MasterKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Flat => "Flat",
            Self::Dark => "Dark",
        }
    }

    /// Value written to the image-type header card.
    pub fn image_type(self) -> &'static str {
        match self {
            Self::Flat => "Master Flat",
            Self::Dark => "Master Dark",
        }
    }

    /// Fields rendered into the file name, with their unit suffix. Covers
    /// every attribute the kind is grouped on.
    fn name_fields(self) -> &'static [(Attribute, &'static str)] {
        match self {
            Self::Flat => &[
                (Attribute::Filter, ""),
                (Attribute::Exposure, "s"),
                (Attribute::Gain, "gain"),
                (Attribute::Offset, "offset"),
                (Attribute::Rotation, "degrees"),
            ],
            Self::Dark => &[
                (Attribute::Exposure, "s"),
                (Attribute::Temperature, "C"),
                (Attribute::Gain, "gain"),
                (Attribute::Offset, "offset"),
            ],
        }
    }
}

/// File name of a master built from frames like `record`.
///
/// Every grouping attribute of `kind` appears in the name, rendered from the
/// same three-decimal projection the grouping engine compares, so distinct
/// groups on one date never share a name. Absent fields render as `NA`. The
/// date is always the group's first date.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use skystack_core::frame::FrameRecord;
/// use skystack_core::naming::{master_file_name, MasterKind};
///
/// let mut dark = FrameRecord::absent("/DARK/2024-11-12/D_0001.fits");
/// dark.exposure_seconds = 600.0;
/// dark.temperature = Some(-20.0);
/// dark.gain = Some(100);
/// dark.offset = Some(8);
/// let date = NaiveDate::from_ymd_opt(2024, 11, 12).unwrap();
/// assert_eq!(
///     master_file_name(MasterKind::Dark, &dark, date),
///     "masterDark_600s_-20C_100gain_8offset__12112024.fits",
/// );
/// ```
pub fn master_file_name(kind: MasterKind, record: &FrameRecord, date: ObservationDate) -> String {
    let mut name = format!("master{}", kind.label());
    for (attribute, unit) in kind.name_fields() {
        name.push('_');
        name.push_str(&name_field(record, *attribute));
        name.push_str(unit);
    }
    name.push_str("__");
    name.push_str(&date.format(MASTER_DATE_FORMAT).to_string());
    name.push_str(".fits");
    name
}

fn name_field(record: &FrameRecord, attribute: Attribute) -> String {
    match record.attribute(attribute) {
        AttributeValue::Text(s) => s,
        AttributeValue::Integer(i) => i.to_string(),
        // `600.0` renders as `600`, `12.7` as `12.7`.
        AttributeValue::Number(n) => n.to_string(),
        AttributeValue::Absent => MISSING_FIELD.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> ObservationDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn calibrated_outputs_share_stem_and_suffix() {
        let [fits, xisf] = calibrated_output_paths(
            Path::new("/CAL/M31"),
            Path::new("/LIGHT/M31/2025-01-12/L_0001.fits"),
            ymd(2025, 1, 12),
        );
        assert_eq!(fits, PathBuf::from("/CAL/M31/L_0001__12012025_c.fits"));
        assert_eq!(xisf, PathBuf::from("/CAL/M31/L_0001__12012025_c.xisf"));
    }

    #[test]
    fn target_is_child_of_light() {
        assert_eq!(
            target_name(Path::new("/data/LIGHT/M31/2025-01-12/L_0001.fits")).as_deref(),
            Some("M31")
        );
        assert_eq!(target_name(Path::new("/data/FLAT/2025-01-12/F.fits")), None);
        assert_eq!(target_name(Path::new("/data/LIGHT/L_0001.fits")), None);
    }

    #[test]
    fn used_directories_are_detected() {
        assert!(is_used(Path::new("/FLAT/2025-01-10/USED/F_0001.fits")));
        assert!(!is_used(Path::new("/FLAT/2025-01-10/UNUSED/F_0001.fits")));
    }

    #[test]
    fn flat_master_name() {
        let mut flat = FrameRecord::absent("/FLAT/2025-01-10/F_0001.fits");
        flat.filter = Some("Ha".into());
        flat.exposure_seconds = 300.0;
        flat.gain = Some(100);
        flat.offset = Some(8);
        flat.rotation = Some(12.7);
        assert_eq!(
            master_file_name(MasterKind::Flat, &flat, ymd(2025, 1, 10)),
            "masterFlat_Ha_300s_100gain_8offset_12.7degrees__10012025.fits"
        );
    }

    #[test]
    fn names_differ_for_every_grouping_attribute() {
        let date = ymd(2025, 1, 10);
        let mut base = FrameRecord::absent("/FLAT/2025-01-10/F_0001.fits");
        base.filter = Some("Ha".into());
        base.exposure_seconds = 2.5;
        base.gain = Some(100);
        base.offset = Some(8);
        base.rotation = Some(91.25);
        base.temperature = Some(-10.0);

        for kind in [MasterKind::Flat, MasterKind::Dark] {
            let name = master_file_name(kind, &base, date);
            for (attribute, _) in kind.name_fields() {
                let mut other = base.clone();
                match attribute {
                    Attribute::Filter => other.filter = Some("OIII".into()),
                    Attribute::Rotation => other.rotation = Some(91.3),
                    Attribute::Gain => other.gain = Some(101),
                    Attribute::Offset => other.offset = Some(30),
                    Attribute::Exposure => other.exposure_seconds = 2.25,
                    Attribute::Temperature => other.temperature = Some(-10.5),
                }
                assert_ne!(master_file_name(kind, &other, date), name, "{kind:?} {attribute}");
            }
        }
    }

    #[test]
    fn absent_fields_render_na() {
        let flat = FrameRecord::absent("/FLAT/F.fits");
        assert_eq!(
            master_file_name(MasterKind::Flat, &flat, ymd(2025, 1, 10)),
            "masterFlat_NA_0s_NAgain_NAoffset_NAdegrees__10012025.fits"
        );
    }

    #[test]
    fn master_kind_labels() {
        assert_eq!(MasterKind::Flat.image_type(), "Master Flat");
        assert_eq!(MasterKind::Dark.label(), "Dark");
    }
}
