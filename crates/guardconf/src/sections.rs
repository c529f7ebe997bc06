//! Config sections. Every field has a compiled default so a partial file
//! only overrides what it names.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// What to do when the PipeWire connection breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FatalMode {
    /// Terminate the process with status 1.
    #[default]
    Exit,
    /// Fail pending and later calls; the caller decides.
    Propagate,
}

impl std::str::FromStr for FatalMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "exit" => Ok(Self::Exit),
            "propagate" => Ok(Self::Propagate),
            other => Err(format!("unknown fatal policy '{}'", other)),
        }
    }
}

impl std::fmt::Display for FatalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exit => f.write_str("exit"),
            Self::Propagate => f.write_str("propagate"),
        }
    }
}

/// The mute session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MuteConfig {
    /// Bound on the wait for the server's acknowledgment.
    /// Default: 2000
    #[serde(default = "MuteConfig::default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub fatal_policy: FatalMode,

    /// PipeWire remote name. Empty means the default remote.
    #[serde(default)]
    pub remote: String,
}

impl MuteConfig {
    fn default_timeout_ms() -> u64 {
        2000
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn remote(&self) -> Option<&str> {
        Some(self.remote.as_str()).filter(|r| !r.is_empty())
    }
}

impl Default for MuteConfig {
    fn default() -> Self {
        Self {
            timeout_ms: Self::default_timeout_ms(),
            fatal_policy: FatalMode::default(),
            remote: String::new(),
        }
    }
}

/// Reaction to an output switch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardSection {
    /// How long the sink stays muted after a switch.
    /// Default: 1000
    #[serde(default = "GuardSection::default_unmute_delay_ms")]
    pub unmute_delay_ms: u64,

    #[serde(default = "GuardSection::default_pause_players")]
    pub pause_players: bool,

    /// Port-type keywords of devices anyone in the room can hear.
    #[serde(default = "GuardSection::default_public_ports")]
    pub public_ports: Vec<String>,

    /// Port-type keywords of personal devices.
    #[serde(default = "GuardSection::default_private_ports")]
    pub private_ports: Vec<String>,
}

impl GuardSection {
    fn default_unmute_delay_ms() -> u64 {
        1000
    }

    fn default_pause_players() -> bool {
        true
    }

    fn default_public_ports() -> Vec<String> {
        vec!["speaker".into(), "hdmi".into(), "displayport".into()]
    }

    fn default_private_ports() -> Vec<String> {
        vec!["headphones".into(), "headset".into()]
    }

    pub fn unmute_delay(&self) -> Duration {
        Duration::from_millis(self.unmute_delay_ms)
    }
}

impl Default for GuardSection {
    fn default() -> Self {
        Self {
            unmute_delay_ms: Self::default_unmute_delay_ms(),
            pause_players: Self::default_pause_players(),
            public_ports: Self::default_public_ports(),
            private_ports: Self::default_private_ports(),
        }
    }
}

/// Graph monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// `pw-dump` executable. Looked up on PATH unless it contains a slash.
    #[serde(default = "MonitorConfig::default_pw_dump")]
    pub pw_dump: PathBuf,
}

impl MonitorConfig {
    fn default_pw_dump() -> PathBuf {
        PathBuf::from("pw-dump")
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            pw_dump: Self::default_pw_dump(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level or `EnvFilter` directive.
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_mode_parse() {
        assert_eq!("exit".parse::<FatalMode>().unwrap(), FatalMode::Exit);
        assert_eq!("Propagate".parse::<FatalMode>().unwrap(), FatalMode::Propagate);
        assert!("abort".parse::<FatalMode>().is_err());
    }

    #[test]
    fn test_empty_remote_is_default() {
        let mute = MuteConfig::default();
        assert_eq!(mute.remote(), None);
        assert_eq!(mute.timeout(), Duration::from_secs(2));
    }
}
