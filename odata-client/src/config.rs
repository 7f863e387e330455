//! Client configuration
//!
//! Loaded from `~/.config/odata-client/config.toml` (platform config dir),
//! then overridden by environment variables, which may come from a `.env`
//! file:
//!
//! | Variable | Field |
//! |---|---|
//! | `ODATA_SERVICE_ROOT` | `service_root` |
//! | `ODATA_TOKEN` | `bearer_token` |
//! | `ODATA_MAX_RETRIES` | `resilience.retry.max_retries` |
//! | `ODATA_RETRY_DELAY_MS` | `resilience.retry.delay_ms` |

use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::api::operations::BatchFormat;
use crate::api::resilience::ResilienceConfig;
use crate::error::{ODataError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub service_root: String,
    pub bearer_token: Option<String>,
    pub resilience: ResilienceConfig,
    pub batch_format: BatchFormat,
    /// Sent as `Prefer: odata.maxpagesize=<n>` on every request
    pub max_page_size: Option<u32>,
}

/// Default location of the config file
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("odata-client")
        .join("config.toml")
}

impl ClientConfig {
    /// Load the default config file (if any) and apply environment overrides
    ///
    /// The result is not validated; callers apply their own overrides first.
    pub fn load() -> Result<Self> {
        // a missing .env file is fine
        let _ = dotenvy::dotenv();
        let mut config = Self::from_file(&config_path())?;
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Read a TOML config file; a missing file yields the defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| ODataError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
            .map_err(|e| ODataError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ODataError::Config(e.to_string()))
    }

    /// Override fields from environment variables supplied by `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(root) = lookup("ODATA_SERVICE_ROOT") {
            self.service_root = root;
        }
        if let Some(token) = lookup("ODATA_TOKEN") {
            self.bearer_token = Some(token);
        }
        if let Some(retries) = lookup("ODATA_MAX_RETRIES") {
            self.resilience.retry.max_retries = parse_env("ODATA_MAX_RETRIES", &retries)?;
        }
        if let Some(delay) = lookup("ODATA_RETRY_DELAY_MS") {
            self.resilience.retry.delay_ms = parse_env("ODATA_RETRY_DELAY_MS", &delay)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.service_root.is_empty() {
            return Err(ODataError::Config(
                "no service root configured (set service_root or ODATA_SERVICE_ROOT)".to_string(),
            ));
        }
        if !self.service_root.starts_with("http://") && !self.service_root.starts_with("https://") {
            return Err(ODataError::Config(format!(
                "service root must be an http(s) URL: {}",
                self.service_root
            )));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ODataError::Config(format!("{} is not a valid number: '{}'", name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_from_toml() {
        let config = ClientConfig::from_toml(
            r#"
service_root = "https://services.odata.org/V4/TripPinService"
batch_format = "json"
max_page_size = 50

[resilience.retry]
max_retries = 1
"#,
        )
        .unwrap();

        assert_eq!(config.service_root, "https://services.odata.org/V4/TripPinService");
        assert_eq!(config.batch_format, BatchFormat::Json);
        assert_eq!(config.max_page_size, Some(50));
        assert_eq!(config.resilience.retry.max_retries, 1);
        assert_eq!(config.resilience.retry.delay_ms, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("ODATA_SERVICE_ROOT", "https://example.com/odata"),
            ("ODATA_TOKEN", "secret"),
            ("ODATA_MAX_RETRIES", "7"),
        ]);
        let mut config = ClientConfig::default();
        config
            .apply_env(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.service_root, "https://example.com/odata");
        assert_eq!(config.bearer_token.as_deref(), Some("secret"));
        assert_eq!(config.resilience.retry.max_retries, 7);
        assert_eq!(config.resilience.retry.delay_ms, 500);
    }

    #[test]
    fn test_invalid_env_number() {
        let mut config = ClientConfig::default();
        let err = config
            .apply_env(|name| (name == "ODATA_RETRY_DELAY_MS").then(|| "fast".to_string()))
            .unwrap_err();
        assert!(matches!(err, ODataError::Config(ref m) if m.contains("ODATA_RETRY_DELAY_MS")));
    }

    #[test]
    fn test_validate() {
        assert!(ClientConfig::default().validate().is_err());
        let config = ClientConfig {
            service_root: "ftp://x".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = ClientConfig::from_file(Path::new("/nonexistent/odata-client.toml")).unwrap();
        assert_eq!(config, ClientConfig::default());
    }
}
