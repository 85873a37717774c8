//! Client configuration file
//!
//! One TOML file carries every layer's section. Missing sections and fields
//! fall back to defaults, so an empty file is a valid configuration.

use anyhow::{Context, Result};
use corider_dispatch::DispatchConfig;
use corider_session::SessionConfig;
use corider_transport::TransportConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub transport: TransportConfig,
    pub session: SessionConfig,
    pub dispatch: DispatchConfig,
    /// Where the logged-in session is persisted between invocations
    pub session_file: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            session: SessionConfig::default(),
            dispatch: DispatchConfig::default(),
            session_file: PathBuf::from(".corider/session.json"),
        }
    }
}

impl ClientConfig {
    /// Load and validate `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            Self::parse(&text)
                .with_context(|| format!("Failed to parse config {}", path.display()))?
        } else {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.transport
            .validate()
            .map_err(|e| anyhow::anyhow!("transport: {e}"))?;
        self.session
            .validate()
            .map_err(|e| anyhow::anyhow!("session: {e}"))?;
        self.dispatch
            .validate()
            .map_err(|e| anyhow::anyhow!("dispatch: {e}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_the_default() {
        let config = ClientConfig::parse("").unwrap();
        assert_eq!(config, ClientConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn sections_override_only_what_they_name() {
        let config = ClientConfig::parse(
            r#"
            session_file = "/tmp/rider.json"

            [transport]
            base_url = "https://dispatch.example.edu/api/v1"
            channel_url = "wss://dispatch.example.edu"

            [dispatch.reconciler]
            gap_hold_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.session_file, PathBuf::from("/tmp/rider.json"));
        assert_eq!(config.transport.base_url, "https://dispatch.example.edu/api/v1");
        assert_eq!(
            config.transport.rest_timeout_ms,
            TransportConfig::default().rest_timeout_ms
        );
        assert_eq!(config.dispatch.reconciler.gap_hold_ms, 500);
        assert_eq!(config.session, SessionConfig::default());
    }

    #[test]
    fn invalid_sections_are_reported_by_name() {
        let config = ClientConfig::parse(
            r#"
            [transport]
            channel_url = "http://not-a-websocket"
            "#,
        )
        .unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.starts_with("transport:"), "{err}");
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn load_reads_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[dispatch]\nmax_rejections = 5\n").unwrap();
        let config = ClientConfig::load(&path).unwrap();
        assert_eq!(config.dispatch.max_rejections, 5);
    }
}
