use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// One of the five independent priority lanes.
///
/// Each lane is driven by its own host timing signal. Ordering guarantees
/// hold within a lane only; lanes never observe or block each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum Lane {
    /// Flushed at the next microtask checkpoint.
    MicroTask,
    /// Flushed on the next frame tick.
    #[default]
    Render,
    /// Flushed after a timer delay.
    MacroTask,
    /// Flushed right after the frame tick has been processed.
    PostRender,
    /// Flushed when the host is idle.
    Idle,
}

impl Lane {
    /// All lanes, in index order.
    pub const ALL: [Lane; 5] = [
        Lane::MicroTask,
        Lane::Render,
        Lane::MacroTask,
        Lane::PostRender,
        Lane::Idle,
    ];

    /// Number of lanes.
    pub const COUNT: usize = Self::ALL.len();

    /// Stable index of this lane, usable for fixed-size per-lane tables.
    pub const fn index(self) -> usize {
        match self {
            Lane::MicroTask => 0,
            Lane::Render => 1,
            Lane::MacroTask => 2,
            Lane::PostRender => 3,
            Lane::Idle => 4,
        }
    }

    /// The camelCase name used in config files and logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Lane::MicroTask => "microTask",
            Lane::Render => "render",
            Lane::MacroTask => "macroTask",
            Lane::PostRender => "postRender",
            Lane::Idle => "idle",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lane {
    type Err = ConfigError;

    /// Accepts the camelCase name, case-insensitively, with or without
    /// `-`/`_` separators (`post-render`, `POST_RENDER`, `postRender`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "microtask" => Ok(Lane::MicroTask),
            "render" => Ok(Lane::Render),
            "macrotask" => Ok(Lane::MacroTask),
            "postrender" => Ok(Lane::PostRender),
            "idle" => Ok(Lane::Idle),
            _ => Err(ConfigError::Invalid(format!("unknown lane '{s}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_match_all_order() {
        for (i, lane) in Lane::ALL.iter().enumerate() {
            assert_eq!(lane.index(), i);
        }
    }

    #[test]
    fn default_is_render() {
        assert_eq!(Lane::default(), Lane::Render);
    }

    #[test]
    fn parse_accepts_separators_and_case() {
        assert_eq!("postRender".parse::<Lane>().unwrap(), Lane::PostRender);
        assert_eq!("post-render".parse::<Lane>().unwrap(), Lane::PostRender);
        assert_eq!("MACRO_TASK".parse::<Lane>().unwrap(), Lane::MacroTask);
        assert!("frame".parse::<Lane>().is_err());
    }

    #[test]
    fn serde_uses_camel_case() {
        let json = serde_json::to_string(&Lane::MicroTask).unwrap();
        assert_eq!(json, "\"microTask\"");
        let lane: Lane = serde_json::from_str("\"postRender\"").unwrap();
        assert_eq!(lane, Lane::PostRender);
    }

    #[test]
    fn display_round_trips_through_from_str() {
        for lane in Lane::ALL {
            assert_eq!(lane.to_string().parse::<Lane>().unwrap(), lane);
        }
    }
}
