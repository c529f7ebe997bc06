//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, FatalMode, GuardConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/earguard/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("earguard/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("earguard.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a TOML file into a raw table, checking it against the schema.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_table(&contents, path)
}

fn parse_table(contents: &str, path: &Path) -> Result<toml::Table, ConfigError> {
    let parse_err = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };

    let table: toml::Table = contents
        .parse()
        .map_err(|e: toml::de::Error| parse_err(e.to_string()))?;

    // Reject bad values here, while the offending file is still known.
    toml::Value::Table(table.clone())
        .try_into::<GuardConfig>()
        .map_err(|e| parse_err(e.to_string()))?;

    Ok(table)
}

/// Merge `overlay` into `base`. Nested tables merge key by key; any other
/// value in `overlay` replaces the one in `base`.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut GuardConfig, sources: &mut ConfigSources) {
    apply_env_overrides_from(config, sources, |name| env::var(name).ok());
}

/// Apply overrides read through `lookup` instead of the process environment.
pub fn apply_env_overrides_from<F>(config: &mut GuardConfig, sources: &mut ConfigSources, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let mut apply = |name: &str, set: &mut dyn FnMut(String) -> bool| {
        if let Some(v) = lookup(name) {
            if set(v) {
                sources.env_overrides.push(name.to_string());
            }
        }
    };

    apply("EARGUARD_TIMEOUT_MS", &mut |v| {
        v.parse::<u64>().map(|ms| config.mute.timeout_ms = ms).is_ok()
    });
    apply("EARGUARD_FATAL_POLICY", &mut |v| {
        v.parse::<FatalMode>()
            .map(|mode| config.mute.fatal_policy = mode)
            .is_ok()
    });
    apply("EARGUARD_REMOTE", &mut |v| {
        config.mute.remote = v;
        true
    });
    apply("EARGUARD_UNMUTE_DELAY_MS", &mut |v| {
        v.parse::<u64>().map(|ms| config.guard.unmute_delay_ms = ms).is_ok()
    });
    apply("EARGUARD_PAUSE_PLAYERS", &mut |v| {
        v.parse::<bool>().map(|on| config.guard.pause_players = on).is_ok()
    });
    apply("EARGUARD_PW_DUMP", &mut |v| {
        config.monitor.pw_dump = expand_path(&v);
        true
    });
    apply("EARGUARD_LOG_LEVEL", &mut |v| {
        config.telemetry.log_level = v;
        true
    });
    // Also support RUST_LOG
    apply("RUST_LOG", &mut |v| {
        config.telemetry.log_level = v;
        true
    });
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(stripped);
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        // $VAR/rest/of/path
        let (var_name, rest) = match stripped.find('/') {
            Some(slash_pos) => (&stripped[..slash_pos], Some(&stripped[slash_pos + 1..])),
            None => (stripped, None),
        };
        if let Ok(var_value) = env::var(var_name) {
            let base = PathBuf::from(var_value);
            return match rest {
                Some(rest) => base.join(rest),
                None => base,
            };
        }
    }
    PathBuf::from(path)
}
