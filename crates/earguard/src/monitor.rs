//! Graph monitor: a `pw-dump --monitor` child and its JSON stream.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};

use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Failed to start {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("{0} has no stdout")]
    NoStdout(String),

    #[error("Failed to decode graph update: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Decode a stream of JSON arrays, handing each to `on_batch`.
///
/// Returns `Ok` at end of stream and an error on the first undecodable
/// batch. Either way the watch is over.
pub fn watch<R, F>(reader: R, mut on_batch: F) -> Result<usize, MonitorError>
where
    R: Read,
    F: FnMut(Vec<Value>),
{
    let mut batches = 0;
    for batch in serde_json::Deserializer::from_reader(reader).into_iter::<Vec<Value>>() {
        on_batch(batch?);
        batches += 1;
    }
    Ok(batches)
}

/// Start `pw-dump --monitor --no-colors` with stdout piped.
pub fn spawn_pw_dump(pw_dump: &Path) -> Result<Child, MonitorError> {
    Command::new(pw_dump)
        .args(["--monitor", "--no-colors"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|source| MonitorError::Spawn {
            command: pw_dump.display().to_string(),
            source,
        })
}

/// Run the monitor until its output ends, then reap the child.
pub fn run<F>(pw_dump: &Path, on_batch: F) -> Result<usize, MonitorError>
where
    F: FnMut(Vec<Value>),
{
    let mut child = spawn_pw_dump(pw_dump)?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| MonitorError::NoStdout(pw_dump.display().to_string()))?;

    info!("watching graph events from {}", pw_dump.display());
    let result = watch(std::io::BufReader::new(stdout), on_batch);

    if let Err(e) = &result {
        warn!("{}", e);
    }
    let _ = child.kill();
    match child.wait() {
        Ok(status) => warn!("{} exited: {}", pw_dump.display(), status),
        Err(e) => warn!("Failed to reap {}: {}", pw_dump.display(), e),
    }

    result
}
