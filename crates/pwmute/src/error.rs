//! Error types for session setup and mute requests.

use std::time::Duration;

/// A failure reported by the remote substrate (PipeWire or a test double).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct SubstrateError {
    pub message: String,
}

impl SubstrateError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors from [`MuteSession::initialize`](crate::MuteSession::initialize).
///
/// Each variant names the acquisition step that failed. Everything acquired
/// before that step has already been released when the error is returned.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("Failed to spawn event thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),

    #[error("Failed to create event loop: {0}")]
    Loop(SubstrateError),

    #[error("Failed to create context: {0}")]
    Context(SubstrateError),

    #[error("Failed to connect to PipeWire: {0}")]
    Connect(SubstrateError),

    #[error("Failed to get registry: {0}")]
    Registry(SubstrateError),

    #[error("Failed to create command channel: {0}")]
    Channel(SubstrateError),

    #[error("Event thread exited before reporting ready")]
    Startup,
}

/// Errors from [`MuteSession::set_mute`](crate::MuteSession::set_mute).
///
/// None of these are fatal to the session; they are also logged when returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MuteError {
    #[error("Failed to bind node {node_id}: {reason}")]
    BindFailed { node_id: u32, reason: String },

    #[error("Failed to submit volume for node {node_id}: {reason}")]
    Submit { node_id: u32, reason: String },

    #[error("Timed out after {timeout:?} waiting for node {node_id}")]
    Timeout { node_id: u32, timeout: Duration },

    #[error("Connection to PipeWire was lost")]
    Disconnected,

    #[error("Session is shut down")]
    NotConnected,
}
