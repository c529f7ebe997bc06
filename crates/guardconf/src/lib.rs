//! Configuration loading for earguard.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/earguard/config.toml` (system)
//! 2. `~/.config/earguard/config.toml` (user)
//! 3. `./earguard.toml` or the `--config` path (local override)
//! 4. Environment variables (`EARGUARD_*`, `RUST_LOG`)
//!
//! Tables merge key by key, so a file only needs the values it changes.
//!
//! # Example Config
//!
//! ```toml
//! [mute]
//! timeout_ms = 2000
//! fatal_policy = "exit"
//!
//! [guard]
//! unmute_delay_ms = 1000
//! public_ports = ["speaker", "hdmi", "displayport"]
//! private_ports = ["headphones", "headset"]
//!
//! [telemetry]
//! log_level = "info"
//! ```

pub mod loader;
pub mod sections;

pub use loader::{discover_config_files_with_override, expand_path, ConfigSources};
pub use sections::{FatalMode, GuardSection, MonitorConfig, MuteConfig, TelemetryConfig};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete earguard configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GuardConfig {
    #[serde(default)]
    pub mute: MuteConfig,

    #[serde(default)]
    pub guard: GuardSection,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl GuardConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with an optional CLI path replacing `./earguard.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let files = loader::discover_config_files_with_override(config_path);
        let (mut config, mut sources) = Self::from_files(&files)?;

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Layer the given files over the compiled defaults. No env overrides.
    pub fn from_files(files: &[PathBuf]) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in files {
            let table = loader::load_table(path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path.clone());
        }

        let mut config: GuardConfig =
            toml::Value::Table(merged)
                .try_into()
                .map_err(|e: toml::de::Error| ConfigError::Parse {
                    path: files.last().cloned().unwrap_or_default(),
                    message: e.to_string(),
                })?;

        config.monitor.pw_dump = expand_path(&config.monitor.pw_dump.to_string_lossy());

        Ok((config, sources))
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        // Build TOML manually for nicer formatting
        let mut output = String::new();

        output.push_str("# earguard configuration\n\n");

        output.push_str("[mute]\n");
        output.push_str(&format!("timeout_ms = {}\n", self.mute.timeout_ms));
        output.push_str(&format!("fatal_policy = \"{}\"\n", self.mute.fatal_policy));
        output.push_str(&format!("remote = {}\n", quote(&self.mute.remote)));

        output.push_str("\n[guard]\n");
        output.push_str(&format!("unmute_delay_ms = {}\n", self.guard.unmute_delay_ms));
        output.push_str(&format!("pause_players = {}\n", self.guard.pause_players));
        output.push_str(&format!("public_ports = {}\n", quote_list(&self.guard.public_ports)));
        output.push_str(&format!("private_ports = {}\n", quote_list(&self.guard.private_ports)));

        output.push_str("\n[monitor]\n");
        output.push_str(&format!(
            "pw_dump = {}\n",
            quote(&self.monitor.pw_dump.to_string_lossy())
        ));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!("log_level = {}\n", quote(&self.telemetry.log_level)));

        output
    }
}

fn quote(s: &str) -> String {
    toml::Value::String(s.to_string()).to_string()
}

fn quote_list(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|s| quote(s)).collect();
    format!("[{}]", quoted.join(", "))
}
