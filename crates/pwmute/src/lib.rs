//! pwmute - synchronous PipeWire node mute
//!
//! A [`MuteSession`] owns one PipeWire connection driven by a dedicated event
//! thread. [`MuteSession::set_mute`] binds the node, submits a `Props` param
//! with every channel volume set to 0.0 or 1.0, and blocks until the server
//! acknowledges it or the timeout elapses. Calls are serialized; only one
//! request is in flight at a time.
//!
//! ```no_run
//! use pwmute::{MuteOptions, MuteSession};
//!
//! let session = MuteSession::connect(MuteOptions::default())?;
//! session.set_mute(42, true)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod directory;
pub mod error;
pub mod protocol;
pub mod session;
pub mod substrate;
pub mod volume;

#[cfg(feature = "pipewire")]
pub mod pipewire_remote;

#[cfg(test)]
mod fake;

pub use directory::ObjectDirectory;
pub use error::{InitError, MuteError, SubstrateError};
pub use protocol::{EventSink, FatalPolicy, DEFAULT_TIMEOUT};
pub use session::{MuteOptions, MuteSession};
pub use substrate::{
    Command, CommandSender, Connector, CoreError, LoopControl, NodeProxy, RemoteCore,
    RemoteDirectory,
};
pub use volume::{ChannelVolumes, CHANNEL_COUNT};

#[cfg(feature = "pipewire")]
pub use pipewire_remote::PipeWireConnector;
