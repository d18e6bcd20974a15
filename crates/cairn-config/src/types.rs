//! Configuration types.
//!
//! ```toml
//! [store]
//! segments = 32
//! durable = true
//! lock_timeout_ms = 5000
//!
//! [session]
//! lock_on_read = true
//! default_max_inactive_interval_secs = 1800
//!
//! [logging]
//! level = "info"
//! json = false
//! ```

use serde::{Deserialize, Serialize};

use cairn_session::FactoryConfig;
use cairn_store::StoreConfig;

use crate::{ConfigError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CairnConfig {
    /// Store settings.
    pub store: StoreConfig,

    /// Session metadata factory settings.
    pub session: FactoryConfig,

    /// Logging settings.
    pub logging: LoggingConfig,
}

impl CairnConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values that parse but make no sense.
    pub fn validate(&self) -> Result<()> {
        if self.store.segments == 0 {
            return Err(ConfigError::Invalid {
                field: "store.segments".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.session.default_max_inactive_interval_secs < 0 {
            return Err(ConfigError::Invalid {
                field: "session.default_max_inactive_interval_secs".to_string(),
                reason: "must not be negative".to_string(),
            });
        }
        Ok(())
    }
}

/// Logging settings consumed by the binary's subscriber setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (e.g. `info`, `cairn_session=debug`).
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        let config = CairnConfig::from_toml("").unwrap();
        assert_eq!(config, CairnConfig::default());
    }

    #[test]
    fn test_parse_sections() {
        let config = CairnConfig::from_toml(
            r#"
            [store]
            segments = 4
            durable = true

            [session]
            lock_on_read = false

            [logging]
            json = true
            "#,
        )
        .unwrap();

        assert_eq!(config.store.segments, 4);
        assert!(config.store.durable);
        assert_eq!(config.store.lock_timeout_ms, 10_000);
        assert!(!config.session.lock_on_read);
        assert_eq!(config.session.default_max_inactive_interval_secs, 1800);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_zero_segments_rejected() {
        let err = CairnConfig::from_toml("[store]\nsegments = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_negative_interval_rejected() {
        let err = CairnConfig::from_toml("[session]\ndefault_max_inactive_interval_secs = -1\n")
            .unwrap_err();
        assert!(err.to_string().contains("default_max_inactive_interval_secs"));
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = CairnConfig::new();
        config.store.durable = true;
        config.logging.level = "debug".to_string();

        let parsed = CairnConfig::from_toml(&config.to_toml().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }
}
