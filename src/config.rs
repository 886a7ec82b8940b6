use crate::error::{StagelineError, StagelineResult};
use crate::logger::LogLevel;
use serde::{Deserialize, Serialize};

/// Environment variable holding the minimum level a pipeline logs at
pub const ENV_LOG_LEVEL: &str = "STAGELINE_LOG_LEVEL";

/// Environment variable toggling per-step reports on `RunResult`
pub const ENV_RECORD_STEPS: &str = "STAGELINE_RECORD_STEPS";

/// Engine configuration carried by every built pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Minimum level of execution messages this pipeline emits
    pub log_level: LogLevel,

    /// Collect a `StepReport` for every top-level step of a run
    pub record_step_reports: bool,

    /// Include dataset sizes in step log messages
    pub log_item_counts: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            record_step_reports: true,
            log_item_counts: true,
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    /// Read overrides from the process environment, falling back to defaults
    pub fn from_env() -> StagelineResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`EngineConfig::from_env`] but with an injectable lookup
    pub fn from_lookup<F>(lookup: F) -> StagelineResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = EngineConfigBuilder::new();

        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            builder = builder.log_level_str(&level)?;
        }
        if let Some(flag) = lookup(ENV_RECORD_STEPS) {
            builder = builder.record_step_reports(parse_flag(ENV_RECORD_STEPS, &flag)?);
        }

        builder.build()
    }

    /// Whether a message at `level` passes this configuration
    pub fn allows(&self, level: LogLevel) -> bool {
        level >= self.log_level
    }
}

fn parse_flag(key: &str, value: &str) -> StagelineResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(StagelineError::Config(format!(
            "{} must be a boolean, got '{}'",
            key, other
        ))),
    }
}

/// Builder for constructing EngineConfig instances with a fluent API
///
/// # Example
/// ```
/// use stageline::config::EngineConfig;
/// use stageline::logger::LogLevel;
///
/// let config = EngineConfig::builder()
///     .log_level(LogLevel::Debug)
///     .record_step_reports(false)
///     .build()
///     .unwrap();
/// assert!(!config.record_step_reports);
/// ```
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    log_level: Option<LogLevel>,
    record_step_reports: Option<bool>,
    log_item_counts: Option<bool>,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = Some(level);
        self
    }

    /// Set the log level from its textual name
    pub fn log_level_str(mut self, level: &str) -> StagelineResult<Self> {
        let parsed = LogLevel::parse(level).ok_or_else(|| {
            StagelineError::Config(format!("Unknown log level: {}", level))
        })?;
        self.log_level = Some(parsed);
        Ok(self)
    }

    pub fn record_step_reports(mut self, record: bool) -> Self {
        self.record_step_reports = Some(record);
        self
    }

    pub fn log_item_counts(mut self, enabled: bool) -> Self {
        self.log_item_counts = Some(enabled);
        self
    }

    pub fn build(self) -> StagelineResult<EngineConfig> {
        let defaults = EngineConfig::default();
        Ok(EngineConfig {
            log_level: self.log_level.unwrap_or(defaults.log_level),
            record_step_reports: self
                .record_step_reports
                .unwrap_or(defaults.record_step_reports),
            log_item_counts: self.log_item_counts.unwrap_or(defaults.log_item_counts),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.log_level, LogLevel::Info);
        assert!(config.record_step_reports);
        assert!(config.allows(LogLevel::Warn));
        assert!(!config.allows(LogLevel::Debug));
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            (ENV_LOG_LEVEL, "debug"),
            (ENV_RECORD_STEPS, "off"),
        ]))
        .unwrap();
        assert_eq!(config.log_level, LogLevel::Debug);
        assert!(!config.record_step_reports);
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        let err = EngineConfig::from_lookup(lookup(&[(ENV_LOG_LEVEL, "loud")])).unwrap_err();
        assert!(matches!(err, StagelineError::Config(_)));

        let err = EngineConfig::from_lookup(lookup(&[(ENV_RECORD_STEPS, "maybe")])).unwrap_err();
        assert!(err.to_string().contains(ENV_RECORD_STEPS));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: EngineConfig =
            serde_json::from_value(serde_json::json!({ "log_level": "warn" })).unwrap();
        assert_eq!(config.log_level, LogLevel::Warn);
        assert!(config.log_item_counts);
    }
}
