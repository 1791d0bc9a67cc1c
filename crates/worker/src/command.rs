//! Command-line sub-commands.

use std::fmt;
use std::str::FromStr;

/// Sub-command selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Calibrate lights against the master pools.
    Calibrate,
    /// Build master flats from raw flats.
    StackFlats,
    /// Build master darks from raw darks.
    StackDarks,
}

impl Command {
    pub const USAGE: &'static str = "usage: skystack-worker <calibrate|stack-flats|stack-darks>";

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Calibrate => "calibrate",
            Self::StackFlats => "stack-flats",
            Self::StackDarks => "stack-darks",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "calibrate" => Ok(Self::Calibrate),
            "stack-flats" => Ok(Self::StackFlats),
            "stack-darks" => Ok(Self::StackDarks),
            other => Err(format!("Unknown command '{other}'. {}", Self::USAGE)),
        }
    }
}
