//! Configuration Manager

use super::{ForwardingRule, Settings};
use crate::Result;
use anyhow::{bail, Context};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// Prefix for environment variable overrides
pub const ENV_PREFIX: &str = "TCPFWD_";

/// Manages settings and rule loading
pub struct ConfigManager;

impl ConfigManager {
    /// Load settings from a TOML file, falling back to defaults when it does not exist
    pub fn load_settings_from_file(path: &Path) -> Result<Settings> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read settings file: {}", path.display()))?;

            let settings: Settings = toml::from_str(&content)
                .with_context(|| format!("Failed to parse settings file: {}", path.display()))?;

            Ok(settings)
        } else {
            Ok(Settings::default())
        }
    }

    /// Apply `TCPFWD_*` environment variables on top of `settings`
    pub fn apply_env_overrides(settings: &mut Settings) -> Result<()> {
        Self::apply_overrides_from(settings, |key| std::env::var(key).ok())
    }

    /// Apply overrides using an arbitrary variable lookup
    pub fn apply_overrides_from<F>(settings: &mut Settings, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(host) = var("LISTEN_HOST") {
            settings.listen_host = host;
        }

        if let Some(buffer_size) = var("BUFFER_SIZE") {
            settings.buffer_size = buffer_size
                .parse::<usize>()
                .with_context(|| format!("Invalid {}BUFFER_SIZE: {}", ENV_PREFIX, buffer_size))?;
        }

        if let Some(log_level) = var("LOG_LEVEL") {
            settings.log_level = log_level;
        }

        if let Some(log_dir) = var("LOG_DIR") {
            settings.log_dir = PathBuf::from(log_dir);
        }

        if let Some(log_to_file) = var("LOG_TO_FILE") {
            settings.log_to_file = log_to_file
                .parse::<bool>()
                .with_context(|| format!("Invalid {}LOG_TO_FILE: {}", ENV_PREFIX, log_to_file))?;
        }

        Ok(())
    }

    /// Load the forwarding rules from a JSON file
    pub fn load_rules_from_file(path: &Path) -> Result<Vec<ForwardingRule>> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Could not open rules file: {}", path.display()))?;

        Self::parse_rules(&content)
            .with_context(|| format!("Could not decode rules file: {}", path.display()))
    }

    /// Decode a JSON array of `{ "target": "host:port", "port": N }` records
    pub fn parse_rules(content: &str) -> Result<Vec<ForwardingRule>> {
        let rules: Vec<ForwardingRule> = serde_json::from_str(content)?;
        Ok(rules)
    }
}

impl Settings {
    /// Validate the settings
    pub fn validate(&self) -> Result<()> {
        if self.listen_host.parse::<IpAddr>().is_err() {
            bail!("listen_host must be an IP address, got '{}'", self.listen_host);
        }

        if self.buffer_size < 1024 {
            bail!("buffer_size must be at least 1024 bytes");
        }

        if self.buffer_size > 1024 * 1024 {
            bail!("buffer_size cannot exceed 1MB");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            bail!("log_level must be one of: {}", valid_log_levels.join(", "));
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        listen_host: Option<&str>,
        buffer_size: Option<usize>,
        log_level: Option<&str>,
        log_dir: Option<&Path>,
        no_log_file: bool,
    ) {
        if let Some(host) = listen_host {
            self.listen_host = host.to_string();
        }

        if let Some(buffer_size) = buffer_size {
            self.buffer_size = buffer_size;
        }

        if let Some(level) = log_level {
            self.log_level = level.to_string();
        }

        if let Some(dir) = log_dir {
            self.log_dir = dir.to_path_buf();
        }

        if no_log_file {
            self.log_to_file = false;
        }
    }
}
