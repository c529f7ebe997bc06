//! Wires the monitor, graph state, and guard together.

use std::sync::Arc;

use anyhow::{Context, Result};
use guardconf::{FatalMode, GuardConfig};
use pwmute::{FatalPolicy, MuteOptions, MuteSession};
use tracing::{info, warn};

use crate::graph::AudioGraph;
use crate::guard::{Guard, GuardSettings};
use crate::players::MprisPlayers;
use crate::route::RouteClassifier;

pub fn mute_options(config: &GuardConfig) -> MuteOptions {
    MuteOptions {
        timeout: config.mute.timeout(),
        fatal_policy: match config.mute.fatal_policy {
            FatalMode::Exit => FatalPolicy::Exit,
            FatalMode::Propagate => FatalPolicy::Propagate,
        },
        remote: config.mute.remote().map(str::to_string),
    }
}

pub fn connect(config: &GuardConfig) -> Result<MuteSession> {
    MuteSession::connect(mute_options(config)).context("Failed to connect to PipeWire")
}

/// Watch the graph until the monitor ends. Returning at all means the
/// daemon should exit.
pub fn run(config: &GuardConfig) -> Result<()> {
    info!("earguard {} starting", env!("CARGO_PKG_VERSION"));

    let session = Arc::new(connect(config)?);
    let guard = Guard::new(
        session.clone(),
        Arc::new(MprisPlayers),
        GuardSettings::from_config(&config.guard),
    );
    let mut graph = AudioGraph::new(RouteClassifier::from_config(&config.guard));

    let result = crate::monitor::run(&config.monitor.pw_dump, |batch| {
        for trigger in graph.apply_batch(&batch) {
            guard.handle(trigger);
        }
    });

    match result {
        Ok(batches) => warn!("graph monitor ended after {} update(s)", batches),
        Err(e) => warn!("graph monitor failed: {}", e),
    }
    info!("shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mute_options_from_config() {
        let mut config = GuardConfig::default();
        config.mute.timeout_ms = 1500;
        config.mute.fatal_policy = FatalMode::Propagate;

        let options = mute_options(&config);
        assert_eq!(options.timeout, std::time::Duration::from_millis(1500));
        assert_eq!(options.fatal_policy, FatalPolicy::Propagate);
        assert_eq!(options.remote, None);

        config.mute.remote = "pipewire-0".to_string();
        assert_eq!(mute_options(&config).remote.as_deref(), Some("pipewire-0"));
    }
}
