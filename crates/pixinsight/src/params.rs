//! Parameter documents read by the PixInsight scripts.
//!
//! Field names are part of the contract with the JavaScript side and must
//! not change.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// `params.json` for the calibration script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationParams {
    pub master_flat: PathBuf,
    pub master_dark: PathBuf,
    pub output_dir: PathBuf,
    /// Appended to each light's stem, e.g. `__12012025_c`.
    pub prefix: String,
}

/// `params.json` for the stacking script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackParams {
    pub output_path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calibration_params_use_script_field_names() {
        let params = CalibrationParams {
            master_flat: "/M/flat.fits".into(),
            master_dark: "/M/dark.fits".into(),
            output_dir: "/CAL/M31".into(),
            prefix: "__12012025_c".into(),
        };
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value["master_flat"], "/M/flat.fits");
        assert_eq!(value["master_dark"], "/M/dark.fits");
        assert_eq!(value["output_dir"], "/CAL/M31");
        assert_eq!(value["prefix"], "__12012025_c");
    }

    #[test]
    fn stack_params_hold_only_output_path() {
        let value = serde_json::to_value(StackParams {
            output_path: "/MASTERS/FLAT/m.fits".into(),
        })
        .unwrap();
        assert_eq!(value, serde_json::json!({ "output_path": "/MASTERS/FLAT/m.fits" }));
    }
}
