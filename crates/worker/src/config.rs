//! Worker configuration, read once from the environment at startup.
//!
//! [`WorkerConfig::from_env`] documents every variable and its default.
//! Directory existence is checked separately by
//! [`WorkerConfig::validate_dirs`], per sub-command.

use std::path::{Path, PathBuf};
use std::time::Duration;

use skystack_core::config::{
    DateSource, HeaderKeys, MatchingConfig, StackingConfig, DEFAULT_DARK_SEARCH_MONTHS,
    DEFAULT_DARK_STACK_DAYS, DEFAULT_FLAT_SEARCH_DAYS, DEFAULT_FLAT_STACK_DAYS,
    DEFAULT_ROTATION_TOLERANCE,
};
use skystack_core::error::CoreError;
use skystack_pipeline::CalibrationDirs;
use skystack_pixinsight::RunnerConfig;

use crate::command::Command;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("{var} points to a missing directory: {path}")]
    MissingDirectory { var: &'static str, path: PathBuf },

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Data directories of the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct DataDirs {
    pub light: PathBuf,
    pub calibrated: PathBuf,
    pub flat: PathBuf,
    pub dark: PathBuf,
    pub flat_master: PathBuf,
    pub dark_master: PathBuf,
}

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub dirs: DataDirs,
    pub header_keys: HeaderKeys,
    pub matching: MatchingConfig,
    pub stacking: StackingConfig,
    pub runner: RunnerConfig,
    /// Start a fresh PixInsight instance before processing.
    pub launch_pixinsight: bool,
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                     | Default                                  |
    /// |-----------------------------|------------------------------------------|
    /// | `DATA_DIR`                  | `.`                                      |
    /// | `LIGHT_DIR`                 | `$DATA_DIR/LIGHT`                        |
    /// | `CALIBRATED_DIR`            | `$DATA_DIR/CALIBRATED`                   |
    /// | `FLAT_DIR`                  | `$DATA_DIR/FLAT`                         |
    /// | `DARK_DIR`                  | `$DATA_DIR/DARK`                         |
    /// | `FLAT_MASTER_DIR`           | `$DATA_DIR/MASTERS/FLAT`                 |
    /// | `DARK_MASTER_DIR`           | `$DATA_DIR/MASTERS/DARK`                 |
    /// | `HEADER_FILTER_KEY`         | `FILTER`                                 |
    /// | `HEADER_ROTATION_KEY`       | `ROTATANG`                               |
    /// | `HEADER_GAIN_KEY`           | `GAIN`                                   |
    /// | `HEADER_OFFSET_KEY`         | `OFFSET`                                 |
    /// | `HEADER_EXPTIME_KEY`        | `EXPTIME`                                |
    /// | `HEADER_TEMPERATURE_KEY`    | `SET-TEMP`                               |
    /// | `HEADER_TIMESTAMP_KEY`      | `DATE-OBS`                               |
    /// | `HEADER_IMAGE_TYPE_KEY`     | `IMAGETYP`                               |
    /// | `DATE_SOURCE`               | `path` (`path` or `header`)              |
    /// | `FLAT_SEARCH_DAYS`          | `4`                                      |
    /// | `DARK_SEARCH_MONTHS`        | `3`                                      |
    /// | `ROTATION_TOLERANCE`        | `0.5`                                    |
    /// | `FLAT_STACK_DAYS`           | `30`                                     |
    /// | `DARK_STACK_DAYS`           | `0`                                      |
    /// | `PIXINSIGHT_EXE`            | `C:\Program Files\PixInsight\bin\PixInsight.exe` |
    /// | `PIXINSIGHT_HANDSHAKE_DIR`  | `C:/Temp/PixStack`                       |
    /// | `PIXINSIGHT_INSTANCE`       | unset (default instance)                 |
    /// | `PIXINSIGHT_LAUNCH_SCRIPT`  | `pixscripts/launch_pix_helper.js`        |
    /// | `PIXINSIGHT_STACK_SCRIPT`   | `pixscripts/basic_stack_script.js`       |
    /// | `PIXINSIGHT_CALIBRATION_SCRIPT` | `pixscripts/calibration_script.js`   |
    /// | `PIXINSIGHT_POLL_MS`        | `1000`                                   |
    /// | `PIXINSIGHT_TIMEOUT_SECS`   | `7200`                                   |
    /// | `PIXINSIGHT_LAUNCH`         | `false`                                  |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);

        let data_dir = env.path("DATA_DIR", Path::new("."));
        let dirs = DataDirs {
            light: env.path("LIGHT_DIR", &data_dir.join("LIGHT")),
            calibrated: env.path("CALIBRATED_DIR", &data_dir.join("CALIBRATED")),
            flat: env.path("FLAT_DIR", &data_dir.join("FLAT")),
            dark: env.path("DARK_DIR", &data_dir.join("DARK")),
            flat_master: env.path("FLAT_MASTER_DIR", &data_dir.join("MASTERS").join("FLAT")),
            dark_master: env.path("DARK_MASTER_DIR", &data_dir.join("MASTERS").join("DARK")),
        };

        let defaults = HeaderKeys::default();
        let header_keys = HeaderKeys {
            filter: env.string("HEADER_FILTER_KEY", &defaults.filter),
            rotation: env.string("HEADER_ROTATION_KEY", &defaults.rotation),
            gain: env.string("HEADER_GAIN_KEY", &defaults.gain),
            offset: env.string("HEADER_OFFSET_KEY", &defaults.offset),
            exposure: env.string("HEADER_EXPTIME_KEY", &defaults.exposure),
            temperature: env.string("HEADER_TEMPERATURE_KEY", &defaults.temperature),
            timestamp: env.string("HEADER_TIMESTAMP_KEY", &defaults.timestamp),
            image_type: env.string("HEADER_IMAGE_TYPE_KEY", &defaults.image_type),
        };

        let date_source = match env.get("DATE_SOURCE") {
            Some(value) => value.parse::<DateSource>()?,
            None => DateSource::default(),
        };
        let matching = MatchingConfig {
            flat_search_days: env.parse("FLAT_SEARCH_DAYS", DEFAULT_FLAT_SEARCH_DAYS)?,
            dark_search_months: env.parse("DARK_SEARCH_MONTHS", DEFAULT_DARK_SEARCH_MONTHS)?,
            rotation_tolerance: env.parse("ROTATION_TOLERANCE", DEFAULT_ROTATION_TOLERANCE)?,
            date_source,
        };
        matching.validate()?;

        let stacking = StackingConfig {
            flat_group_days: env.parse("FLAT_STACK_DAYS", DEFAULT_FLAT_STACK_DAYS)?,
            dark_group_days: env.parse("DARK_STACK_DAYS", DEFAULT_DARK_STACK_DAYS)?,
        };

        let base = RunnerConfig::default();
        let instance = match env.get("PIXINSIGHT_INSTANCE") {
            Some(value) => Some(parse_value("PIXINSIGHT_INSTANCE", &value)?),
            None => None,
        };
        let poll_ms: u64 = env.parse("PIXINSIGHT_POLL_MS", 1000)?;
        let timeout_secs: u64 = env.parse("PIXINSIGHT_TIMEOUT_SECS", 2 * 60 * 60)?;
        let runner = RunnerConfig {
            executable: env.path("PIXINSIGHT_EXE", &base.executable),
            handshake_dir: env.path("PIXINSIGHT_HANDSHAKE_DIR", &base.handshake_dir),
            instance,
            launch_script: env.path("PIXINSIGHT_LAUNCH_SCRIPT", &base.launch_script),
            stack_script: env.path("PIXINSIGHT_STACK_SCRIPT", &base.stack_script),
            calibration_script: env.path("PIXINSIGHT_CALIBRATION_SCRIPT", &base.calibration_script),
            poll_interval: Duration::from_millis(poll_ms),
            timeout: Duration::from_secs(timeout_secs),
        };

        Ok(Self {
            dirs,
            header_keys,
            matching,
            stacking,
            runner,
            launch_pixinsight: env.parse("PIXINSIGHT_LAUNCH", false)?,
        })
    }

    /// Check that every input directory `command` reads from exists.
    pub fn validate_dirs(&self, command: Command) -> Result<(), ConfigError> {
        let required: Vec<(&'static str, &Path)> = match command {
            Command::Calibrate => vec![
                ("LIGHT_DIR", self.dirs.light.as_path()),
                ("FLAT_MASTER_DIR", self.dirs.flat_master.as_path()),
                ("DARK_MASTER_DIR", self.dirs.dark_master.as_path()),
            ],
            Command::StackFlats => vec![("FLAT_DIR", self.dirs.flat.as_path())],
            Command::StackDarks => vec![("DARK_DIR", self.dirs.dark.as_path())],
        };
        for (var, path) in required {
            if !path.is_dir() {
                return Err(ConfigError::MissingDirectory {
                    var,
                    path: path.to_path_buf(),
                });
            }
        }
        Ok(())
    }

    pub fn calibration_dirs(&self) -> CalibrationDirs {
        CalibrationDirs {
            light_dir: self.dirs.light.clone(),
            flat_master_dir: self.dirs.flat_master.clone(),
            dark_master_dir: self.dirs.dark_master.clone(),
            output_dir: self.dirs.calibrated.clone(),
        }
    }
}

struct Env<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    /// Value of `key`; empty values count as unset.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn path(&self, key: &str, default: &Path) -> PathBuf {
        self.get(key)
            .map(PathBuf::from)
            .unwrap_or_else(|| default.to_path_buf())
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            Some(value) => parse_value(key, &value),
            None => Ok(default),
        }
    }
}

fn parse_value<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use assert_matches::assert_matches;

    fn load(vars: &[(&str, &str)]) -> Result<WorkerConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = load(&[]).unwrap();
        assert_eq!(config.dirs.light, PathBuf::from("./LIGHT"));
        assert_eq!(config.dirs.flat_master, Path::new(".").join("MASTERS").join("FLAT"));
        assert_eq!(config.matching, MatchingConfig::default());
        assert_eq!(config.stacking, StackingConfig::default());
        assert_eq!(config.runner.instance, None);
        assert_eq!(config.runner.poll_interval, Duration::from_secs(1));
        assert_eq!(config.runner.timeout, Duration::from_secs(7200));
        assert!(!config.launch_pixinsight);
    }

    #[test]
    fn overrides_are_applied() {
        let config = load(&[
            ("DATA_DIR", "/astro"),
            ("DARK_MASTER_DIR", "/masters/dark"),
            ("HEADER_TEMPERATURE_KEY", "CCD-TEMP"),
            ("DATE_SOURCE", "header"),
            ("FLAT_SEARCH_DAYS", "7"),
            ("PIXINSIGHT_INSTANCE", "2"),
            ("PIXINSIGHT_LAUNCH", "true"),
        ])
        .unwrap();
        assert_eq!(config.dirs.light, PathBuf::from("/astro/LIGHT"));
        assert_eq!(config.dirs.dark_master, PathBuf::from("/masters/dark"));
        assert_eq!(config.header_keys.temperature, "CCD-TEMP");
        assert_eq!(config.matching.date_source, DateSource::HeaderTimestamp);
        assert_eq!(config.matching.flat_search_days, 7);
        assert_eq!(config.runner.instance, Some(2));
        assert!(config.launch_pixinsight);
    }

    #[test]
    fn empty_values_fall_back_to_defaults() {
        let config = load(&[("PIXINSIGHT_INSTANCE", "  "), ("FLAT_STACK_DAYS", "")]).unwrap();
        assert_eq!(config.runner.instance, None);
        assert_eq!(config.stacking.flat_group_days, 30);
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        assert_matches!(
            load(&[("DARK_SEARCH_MONTHS", "three")]),
            Err(ConfigError::Invalid { var: "DARK_SEARCH_MONTHS", .. })
        );
        assert_matches!(
            load(&[("ROTATION_TOLERANCE", "-1")]),
            Err(ConfigError::Core(CoreError::Validation(_)))
        );
        assert_matches!(
            load(&[("DATE_SOURCE", "exif")]),
            Err(ConfigError::Core(CoreError::Validation(_)))
        );
    }

    #[test]
    fn missing_input_directory_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("FLAT")).unwrap();
        let config = load(&[("DATA_DIR", dir.path().to_str().unwrap())]).unwrap();

        assert!(config.validate_dirs(Command::StackFlats).is_ok());
        assert_matches!(
            config.validate_dirs(Command::Calibrate),
            Err(ConfigError::MissingDirectory { var: "LIGHT_DIR", .. })
        );
    }
}
