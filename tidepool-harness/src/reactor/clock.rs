//! Clock selection for reactor passes.

use std::fmt;
use std::str::FromStr;

use tidepool_core::ArgumentError;

/// How time advances inside a reactor pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockMode {
    /// Real wall-clock time. Timers wait for real.
    #[default]
    Wall,
    /// Logical time. The clock starts paused and jumps straight to the next
    /// timer whenever the loop is idle, so deadlines are exact and instant.
    Logical,
}

impl ClockMode {
    /// Whether this mode skips idle periods.
    pub fn is_logical(self) -> bool {
        matches!(self, ClockMode::Logical)
    }
}

impl fmt::Display for ClockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockMode::Wall => f.write_str("wall"),
            ClockMode::Logical => f.write_str("logical"),
        }
    }
}

impl FromStr for ClockMode {
    type Err = ArgumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wall" | "real" => Ok(ClockMode::Wall),
            "logical" | "sim" | "paused" => Ok(ClockMode::Logical),
            other => Err(ArgumentError::InvalidArgument {
                operation: "clock".to_string(),
                reason: format!("unknown clock mode `{other}`"),
            }),
        }
    }
}
