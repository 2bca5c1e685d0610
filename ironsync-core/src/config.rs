// ironsync-core/src/config.rs
// Process-level settings shared by models, builders and the sync engine

use crate::error::{IronSyncError, Result};
use crate::logging::LogLevel;
use serde::Deserialize;
use serde_json::Value;

/// What the sync engine does when one target document fails to persist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FanOutPolicy {
    /// Attempt every target, log each failure, then surface the first one
    #[default]
    ContinueOnError,
    /// Stop at the first failing target
    AbortOnFirstError,
}

impl FanOutPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "continue" | "continue_on_error" => Some(FanOutPolicy::ContinueOnError),
            "abort" | "abort_on_first_error" => Some(FanOutPolicy::AbortOnFirstError),
            _ => None,
        }
    }
}

/// Column names stamped on save; `None` disables the stamp
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TimestampColumns {
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl Default for TimestampColumns {
    fn default() -> Self {
        TimestampColumns {
            created_at: Some("createdAt".to_string()),
            updated_at: Some("updatedAt".to_string()),
        }
    }
}

impl TimestampColumns {
    pub fn disabled() -> Self {
        TimestampColumns {
            created_at: None,
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IronSyncConfig {
    /// Page size used when `paginate` is called without a limit
    pub per_page: u64,
    /// Embedded identity key; the only correlation key of embedded copies
    pub primary_id_column: String,
    /// Collection holding the auto-increment counters
    pub counters_collection: String,
    pub fan_out: FanOutPolicy,
    pub timestamps: TimestampColumns,
    pub log_level: Option<String>,
}

impl Default for IronSyncConfig {
    fn default() -> Self {
        IronSyncConfig {
            per_page: 15,
            primary_id_column: "id".to_string(),
            counters_collection: "MasterMind".to_string(),
            fan_out: FanOutPolicy::default(),
            timestamps: TimestampColumns::default(),
            log_level: None,
        }
    }
}

impl IronSyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON object; missing keys keep their defaults
    pub fn from_json(value: &Value) -> Result<Self> {
        let config: IronSyncConfig = serde_json::from_value(value.clone())?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `IRONSYNC_PER_PAGE`, `IRONSYNC_FAN_OUT` and `IRONSYNC_LOG`
    pub fn from_env() -> Result<Self> {
        let mut config = IronSyncConfig::default();

        if let Ok(raw) = std::env::var("IRONSYNC_PER_PAGE") {
            config.per_page = raw.trim().parse().map_err(|_| {
                IronSyncError::Config(format!("IRONSYNC_PER_PAGE is not a number: {}", raw))
            })?;
        }

        if let Ok(raw) = std::env::var("IRONSYNC_FAN_OUT") {
            config.fan_out = FanOutPolicy::parse(&raw).ok_or_else(|| {
                IronSyncError::Config(format!("IRONSYNC_FAN_OUT is not a policy: {}", raw))
            })?;
        }

        if let Ok(raw) = std::env::var(crate::logging::LOG_ENV_VAR) {
            config.log_level = Some(raw);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_per_page(mut self, per_page: u64) -> Self {
        self.per_page = per_page;
        self
    }

    pub fn with_fan_out(mut self, fan_out: FanOutPolicy) -> Self {
        self.fan_out = fan_out;
        self
    }

    pub fn with_timestamps(mut self, timestamps: TimestampColumns) -> Self {
        self.timestamps = timestamps;
        self
    }

    /// Push the configured log level into the global logger
    pub fn apply_log_level(&self) {
        if let Some(level) = self.log_level.as_deref().and_then(LogLevel::parse) {
            crate::logging::set_log_level(level);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.per_page == 0 {
            return Err(IronSyncError::Config("per_page must be positive".to_string()));
        }
        if self.primary_id_column.is_empty() {
            return Err(IronSyncError::Config(
                "primary_id_column cannot be empty".to_string(),
            ));
        }
        if let Some(level) = &self.log_level {
            if LogLevel::parse(level).is_none() {
                return Err(IronSyncError::Config(format!("Unknown log level: {}", level)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = IronSyncConfig::default();
        assert_eq!(config.per_page, 15);
        assert_eq!(config.primary_id_column, "id");
        assert_eq!(config.counters_collection, "MasterMind");
        assert_eq!(config.fan_out, FanOutPolicy::ContinueOnError);
        assert_eq!(config.timestamps.created_at.as_deref(), Some("createdAt"));
    }

    #[test]
    fn test_from_json_partial() {
        let config = IronSyncConfig::from_json(&json!({
            "per_page": 50,
            "fan_out": "abort_on_first_error",
            "timestamps": {"created_at": null}
        }))
        .unwrap();

        assert_eq!(config.per_page, 50);
        assert_eq!(config.fan_out, FanOutPolicy::AbortOnFirstError);
        assert_eq!(config.timestamps.created_at, None);
        assert_eq!(config.timestamps.updated_at.as_deref(), Some("updatedAt"));
        assert_eq!(config.primary_id_column, "id");
    }

    #[test]
    fn test_from_json_rejects_zero_page() {
        let result = IronSyncConfig::from_json(&json!({"per_page": 0}));
        assert!(matches!(result, Err(IronSyncError::Config(_))));
    }

    #[test]
    fn test_from_json_rejects_unknown_level() {
        let result = IronSyncConfig::from_json(&json!({"log_level": "loud"}));
        assert!(result.unwrap_err().to_string().contains("Unknown log level"));
    }

    #[test]
    fn test_fan_out_parse() {
        assert_eq!(FanOutPolicy::parse("continue"), Some(FanOutPolicy::ContinueOnError));
        assert_eq!(FanOutPolicy::parse("ABORT"), Some(FanOutPolicy::AbortOnFirstError));
        assert_eq!(FanOutPolicy::parse("retry"), None);
    }
}
