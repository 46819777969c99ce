//! Orchestrator configuration.
//!
//! Everything has a sensible default so embedding UIs can use
//! `PreviewConfig::default()` without shipping a config file. When a TOML
//! file is provided, unknown keys are warned about (via `serde_ignored`)
//! instead of rejected, so older configs keep working across upgrades.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Tunables for the preview orchestrator.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Log ring capacity (entries), oldest dropped past this bound.
    pub log_capacity: usize,
    /// Maximum dev-server launch attempts before settling in Error.
    pub max_run_attempts: u32,
    /// Inclusive candidate port range for run retries.
    pub port_min: u16,
    pub port_max: u16,
    /// Extra environment for the long-running server process. The selected
    /// candidate port is always injected as `PORT` on top of this.
    pub server_env: BTreeMap<String, String>,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        let mut server_env = BTreeMap::new();
        server_env.insert("NODE_ENV".to_string(), "development".to_string());
        Self {
            log_capacity: 100,
            max_run_attempts: 5,
            port_min: 3000,
            port_max: 8999,
            server_env,
        }
    }
}

impl PreviewConfig {
    /// Parse from TOML text, warning on unknown keys instead of failing.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let de = toml::de::Deserializer::parse(text).context("invalid TOML syntax")?;
        let config: PreviewConfig = serde_ignored::deserialize(de, |path| {
            tracing::warn!("unknown config key ignored: {path}");
        })
        .context("invalid preview config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.port_min <= self.port_max,
            "port_min ({}) must not exceed port_max ({})",
            self.port_min,
            self.port_max
        );
        anyhow::ensure!(self.max_run_attempts > 0, "max_run_attempts must be at least 1");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let config = PreviewConfig::default();
        assert_eq!(config.log_capacity, 100);
        assert_eq!(config.max_run_attempts, 5);
        assert!(config.port_min <= config.port_max);
        assert_eq!(
            config.server_env.get("NODE_ENV").map(String::as_str),
            Some("development")
        );
    }

    #[test]
    fn parses_partial_toml() {
        let config = PreviewConfig::from_toml_str("max_run_attempts = 3\nport_min = 4000\n")
            .expect("partial config should parse");
        assert_eq!(config.max_run_attempts, 3);
        assert_eq!(config.port_min, 4000);
        // untouched fields keep defaults
        assert_eq!(config.log_capacity, 100);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let config = PreviewConfig::from_toml_str("log_capacity = 50\nno_such_key = true\n")
            .expect("unknown keys should not fail the parse");
        assert_eq!(config.log_capacity, 50);
    }

    #[test]
    fn rejects_inverted_port_range() {
        assert!(PreviewConfig::from_toml_str("port_min = 9000\nport_max = 3000\n").is_err());
    }

    #[test]
    fn rejects_zero_attempts() {
        assert!(PreviewConfig::from_toml_str("max_run_attempts = 0\n").is_err());
    }
}
