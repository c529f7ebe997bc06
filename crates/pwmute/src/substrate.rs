//! Boundary between the mute protocol and the server connection.
//!
//! Everything behind these traits lives on the event thread: the loop, the
//! context, the core connection, the registry and every bound proxy. The only
//! piece that crosses threads is the [`CommandSender`], which callers use to
//! hand work to the loop.
//!
//! ```text
//!  caller thread                       event thread
//!  ─────────────                       ────────────
//!  set_mute()                          RemoteCore::run()
//!     │  Command::SetVolume ──────────────► dispatch
//!     │                                      │ RemoteDirectory::bind()
//!     │                                      │ NodeProxy::set_volumes() -> seq
//!     ▼                                      ▼
//!  PendingSlot::wait()  ◄──── notify ─── EventSink::acknowledge(seq)
//!     │  Command::Release ────────────────► drop proxy
//! ```

use crate::error::{InitError, SubstrateError};
use crate::protocol::EventSink;
use crate::volume::ChannelVolumes;

/// Object id of the core connection itself.
pub const CORE_ID: u32 = 0;

/// Work handed from a caller thread to the event thread.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Bind `node_id` and push `volumes` to it, tagged with the request generation.
    SetVolume {
        generation: u64,
        node_id: u32,
        volumes: ChannelVolumes,
    },
    /// Drop the proxy bound for `generation`, if it is still held.
    Release { generation: u64 },
    /// Leave the event loop.
    Stop,
}

/// What the event loop should do after dispatching a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Quit,
}

/// An error event emitted by the core connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreError {
    pub id: u32,
    pub seq: i32,
    pub res: i32,
    pub message: String,
}

impl CoreError {
    /// A broken pipe, or any error raised against the core object, means the
    /// connection itself is gone.
    pub fn is_fatal(&self) -> bool {
        self.res == -libc::EPIPE || self.id == CORE_ID
    }
}

/// Establishes a session. Moved onto the event thread and consumed there.
pub trait Connector: Send + 'static {
    type Core: RemoteCore;

    /// Create the loop and context, connect, and register the error observer
    /// so that fatal errors reach `events`.
    fn connect(self, events: EventSink) -> Result<Self::Core, InitError>;
}

/// A live connection, owned by the event thread.
pub trait RemoteCore: Sized + 'static {
    type Directory: RemoteDirectory;
    type Sender: CommandSender;

    /// Acquire the object directory. Called once per session.
    fn directory(&self) -> Result<Self::Directory, InitError>;

    /// Take the sending half of the loop's command channel.
    fn command_sender(&mut self) -> Result<Self::Sender, InitError>;

    /// Dispatch events and commands until `dispatch` returns [`LoopControl::Quit`].
    fn run<F>(self, dispatch: F)
    where
        F: FnMut(Command) -> LoopControl + 'static;
}

/// The remote registry of bindable objects.
pub trait RemoteDirectory: 'static {
    type Node: NodeProxy;

    /// Bind a node id to a fresh local proxy. Dropping the proxy removes its
    /// observer and destroys it.
    fn bind(&self, node_id: u32) -> Result<Self::Node, SubstrateError>;
}

/// A short-lived local proxy for one remote node.
pub trait NodeProxy {
    /// Local proxy id, used to attribute asynchronous errors to this proxy.
    fn proxy_id(&self) -> u32;

    /// Submit a `Props` parameter carrying `volumes`. Returns the sequence
    /// number the acknowledgment will carry.
    fn set_volumes(&self, volumes: &ChannelVolumes) -> Result<i32, SubstrateError>;
}

/// Thread-safe handle for waking the event loop with a [`Command`].
pub trait CommandSender: Send + 'static {
    fn send(&self, command: Command) -> Result<(), SubstrateError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core_error(id: u32, res: i32) -> CoreError {
        CoreError {
            id,
            seq: 0,
            res,
            message: "test".to_string(),
        }
    }

    #[test]
    fn test_broken_pipe_is_fatal() {
        assert!(core_error(17, -32).is_fatal());
    }

    #[test]
    fn test_core_object_error_is_fatal() {
        assert!(core_error(CORE_ID, -2).is_fatal());
    }

    #[test]
    fn test_proxy_error_is_not_fatal() {
        // unknown global on a freshly bound proxy
        assert!(!core_error(5, -2).is_fatal());
    }
}
