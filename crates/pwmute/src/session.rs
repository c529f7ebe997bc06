//! Connection manager and the public mute entry point.

use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::directory::ObjectDirectory;
use crate::error::{InitError, MuteError};
use crate::protocol::{Dispatcher, EventSink, FatalPolicy, PendingSlot, DEFAULT_TIMEOUT};
use crate::substrate::{Command, CommandSender, Connector, RemoteCore};
use crate::volume::ChannelVolumes;

const EVENT_THREAD_NAME: &str = "pwmute-loop";

/// Session options.
#[derive(Debug, Clone)]
pub struct MuteOptions {
    /// How long `set_mute` waits for the server to acknowledge.
    pub timeout: Duration,
    /// Reaction to a broken connection.
    pub fatal_policy: FatalPolicy,
    /// PipeWire remote to connect to; `None` uses the default.
    pub remote: Option<String>,
}

impl Default for MuteOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            fatal_policy: FatalPolicy::default(),
            remote: None,
        }
    }
}

type BoxedSender = Box<dyn CommandSender>;

/// A connection to the server plus the event thread that drives it.
///
/// `set_mute` may be called from any number of threads; calls run one at a
/// time. Dropping the session shuts it down.
pub struct MuteSession {
    /// Also the request gate: held by a caller for its whole request.
    commands: Mutex<Option<BoxedSender>>,
    slot: Arc<PendingSlot>,
    thread_handle: Option<JoinHandle<()>>,
    timeout: Duration,
    #[cfg(test)]
    gate: GateOccupancy,
}

impl MuteSession {
    /// Connect to the local PipeWire server.
    #[cfg(feature = "pipewire")]
    pub fn connect(options: MuteOptions) -> Result<Self, InitError> {
        let connector = crate::pipewire_remote::PipeWireConnector::new(options.remote.clone());
        Self::initialize(connector, options)
    }

    /// Start the event thread and establish the session on it.
    ///
    /// Returns once the loop is running. On error the event thread has
    /// already exited and released everything it acquired.
    pub fn initialize<C: Connector>(connector: C, options: MuteOptions) -> Result<Self, InitError> {
        let slot = Arc::new(PendingSlot::new());
        let events = EventSink::new(Arc::clone(&slot), options.fatal_policy);
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);

        let slot_for_thread = Arc::clone(&slot);
        let thread_handle = thread::Builder::new()
            .name(EVENT_THREAD_NAME.to_string())
            .spawn(move || run_event_thread(connector, events, slot_for_thread, ready_tx))?;

        match ready_rx.recv() {
            Ok(Ok(sender)) => {
                info!(
                    "mute session ready (timeout {:?}, fatal policy {:?})",
                    options.timeout, options.fatal_policy
                );
                Ok(Self {
                    commands: Mutex::new(Some(sender)),
                    slot,
                    thread_handle: Some(thread_handle),
                    timeout: options.timeout,
                    #[cfg(test)]
                    gate: GateOccupancy::default(),
                })
            }
            Ok(Err(e)) => {
                let _ = thread_handle.join();
                error!("mute session failed to start: {}", e);
                Err(e)
            }
            Err(_) => {
                let _ = thread_handle.join();
                Err(InitError::Startup)
            }
        }
    }

    /// Mute or unmute `node_id`, waiting for the server to confirm.
    ///
    /// Failures are logged and returned; none of them end the session except
    /// [`MuteError::Disconnected`].
    pub fn set_mute(&self, node_id: u32, mute: bool) -> Result<(), MuteError> {
        let commands = self.commands.lock().unwrap_or_else(PoisonError::into_inner);
        #[cfg(test)]
        let _inside = self.gate.enter();
        let Some(sender) = commands.as_ref() else {
            warn!("set_mute on node {} after shutdown", node_id);
            return Err(MuteError::NotConnected);
        };

        let generation = self.slot.begin(node_id)?;
        let volumes = ChannelVolumes::for_mute(mute);
        if let Err(e) = sender.send(Command::SetVolume {
            generation,
            node_id,
            volumes,
        }) {
            warn!("Failed to reach event loop for node {}: {}", node_id, e);
            return Err(MuteError::Disconnected);
        }
        let _release = ReleaseOnDrop {
            sender: &**sender,
            generation,
        };

        let result = self.slot.wait(generation, self.timeout);
        match &result {
            Ok(()) => debug!("node {} mute={} confirmed", node_id, mute),
            Err(MuteError::BindFailed { .. }) => {}
            Err(MuteError::Timeout { .. }) => {
                warn!("set param timeout or error for node {}", node_id)
            }
            Err(e) => warn!("set mute={} on node {} failed: {}", mute, node_id, e),
        }
        result
    }

    /// Stop the event thread and release the connection. Safe to call twice.
    pub fn shutdown(&mut self) {
        let sender = self
            .commands
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            if let Err(e) = sender.send(Command::Stop) {
                debug!("event loop already stopped: {}", e);
            }
        }
        if let Some(handle) = self.thread_handle.take() {
            debug!("Waiting for event thread to stop...");
            let _ = handle.join();
            info!("mute session shut down");
        }
    }
}

impl Drop for MuteSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Counts callers holding the request gate.
#[cfg(test)]
#[derive(Default)]
struct GateOccupancy {
    current: std::sync::atomic::AtomicUsize,
    max: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl GateOccupancy {
    fn enter(&self) -> GateInside<'_> {
        use std::sync::atomic::Ordering::SeqCst;
        let now = self.current.fetch_add(1, SeqCst) + 1;
        self.max.fetch_max(now, SeqCst);
        GateInside(self)
    }

    fn max(&self) -> usize {
        self.max.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
struct GateInside<'a>(&'a GateOccupancy);

#[cfg(test)]
impl Drop for GateInside<'_> {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
    }
}

/// Hands the request's proxy back to the event thread on every exit path.
struct ReleaseOnDrop<'a> {
    sender: &'a dyn CommandSender,
    generation: u64,
}

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        let _ = self.sender.send(Command::Release {
            generation: self.generation,
        });
    }
}

fn run_event_thread<C: Connector>(
    connector: C,
    events: EventSink,
    slot: Arc<PendingSlot>,
    ready: mpsc::SyncSender<Result<BoxedSender, InitError>>,
) {
    let mut core = match connector.connect(events) {
        Ok(core) => core,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let directory = match ObjectDirectory::acquire(&core) {
        Ok(directory) => directory,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let sender = match core.command_sender() {
        Ok(sender) => sender,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let sender: BoxedSender = Box::new(sender);
    if ready.send(Ok(sender)).is_err() {
        return;
    }

    let mut dispatcher = Dispatcher::new(directory, slot);
    core.run(move |command| dispatcher.handle(command));
    debug!("event thread exiting");
}
