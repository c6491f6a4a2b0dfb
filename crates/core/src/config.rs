use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::lane::Lane;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

// ── Scheduler config ──────────────────────────────────────────

/// Scheduler configuration, typically parsed from TOML.
///
/// Every field has a default, so an empty document is a valid config.
/// Host timing fields only matter for the tokio host; the manual host
/// used in tests ignores them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound on recycled task records kept per lane.
    #[serde(default = "default_pool_capacity")]
    pub pool_capacity: usize,
    /// Lane used when a producer does not name one.
    #[serde(default)]
    pub default_lane: Lane,
    /// Frame period driving the render and postRender lanes.
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    /// How long the idle lane waits before it is considered idle.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Timer delay for the macroTask lane.
    #[serde(default)]
    pub macro_task_delay_ms: u64,
}

fn default_pool_capacity() -> usize { 64 }
fn default_frame_interval_ms() -> u64 { 16 }
fn default_idle_timeout_ms() -> u64 { 50 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pool_capacity: default_pool_capacity(),
            default_lane: Lane::default(),
            frame_interval_ms: default_frame_interval_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            macro_task_delay_ms: 0,
        }
    }
}

impl SchedulerConfig {
    /// Parse config from a TOML string, then apply `LANES_*` env overrides.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Build config from defaults plus environment variables
    /// (call `load_dotenv()` first).
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Convention: `LANES_KEY` overrides `key`. Unparseable values are ignored.
    /// - `LANES_POOL_CAPACITY`
    /// - `LANES_DEFAULT_LANE`
    /// - `LANES_FRAME_INTERVAL_MS`
    /// - `LANES_IDLE_TIMEOUT_MS`
    /// - `LANES_MACRO_TASK_DELAY_MS`
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(env_opt);
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("LANES_POOL_CAPACITY").and_then(|v| v.parse().ok()) {
            self.pool_capacity = v;
        }
        if let Some(v) = lookup("LANES_DEFAULT_LANE").and_then(|v| v.parse().ok()) {
            self.default_lane = v;
        }
        if let Some(v) = lookup("LANES_FRAME_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            self.frame_interval_ms = v;
        }
        if let Some(v) = lookup("LANES_IDLE_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.idle_timeout_ms = v;
        }
        if let Some(v) = lookup("LANES_MACRO_TASK_DELAY_MS").and_then(|v| v.parse().ok()) {
            self.macro_task_delay_ms = v;
        }
    }

    /// Validate value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "frame_interval_ms must be greater than zero".into(),
            ));
        }
        if self.idle_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "idle_timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn macro_task_delay(&self) -> Duration {
        Duration::from_millis(self.macro_task_delay_ms)
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Scheduler config loaded:");
        tracing::info!("  pool:    capacity={}", self.pool_capacity);
        tracing::info!("  lanes:   default={}", self.default_lane);
        tracing::info!(
            "  timing:  frame={}ms, idle={}ms, macro_delay={}ms",
            self.frame_interval_ms,
            self.idle_timeout_ms,
            self.macro_task_delay_ms
        );
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.pool_capacity, 64);
        assert_eq!(config.default_lane, Lane::Render);
        assert_eq!(config.frame_interval(), Duration::from_millis(16));
        assert_eq!(config.idle_timeout(), Duration::from_millis(50));
        assert_eq!(config.macro_task_delay(), Duration::ZERO);
    }

    #[test]
    fn parse_empty_toml_yields_defaults() {
        let config: SchedulerConfig = toml::from_str("").unwrap();
        assert_eq!(config, SchedulerConfig::default());
    }

    #[test]
    fn parse_full_toml() {
        let toml = r#"
pool_capacity = 8
default_lane = "macroTask"
frame_interval_ms = 33
idle_timeout_ms = 200
macro_task_delay_ms = 4
"#;
        let config: SchedulerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.pool_capacity, 8);
        assert_eq!(config.default_lane, Lane::MacroTask);
        assert_eq!(config.frame_interval_ms, 33);
        assert_eq!(config.idle_timeout_ms, 200);
        assert_eq!(config.macro_task_delay_ms, 4);
    }

    #[test]
    fn unknown_lane_is_a_parse_error() {
        let err = toml::from_str::<SchedulerConfig>("default_lane = \"frame\"");
        assert!(err.is_err());
    }

    #[test]
    fn overrides_apply_and_ignore_garbage() {
        let vars: HashMap<&str, &str> = [
            ("LANES_POOL_CAPACITY", "3"),
            ("LANES_DEFAULT_LANE", "idle"),
            ("LANES_FRAME_INTERVAL_MS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = SchedulerConfig::default();
        config.apply_overrides_from(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.pool_capacity, 3);
        assert_eq!(config.default_lane, Lane::Idle);
        assert_eq!(config.frame_interval_ms, 16);
    }

    #[test]
    fn validate_rejects_zero_frame_interval() {
        let config = SchedulerConfig {
            frame_interval_ms: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn from_file_missing_is_io_error() {
        let err = SchedulerConfig::from_file("/nonexistent/lanes.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
