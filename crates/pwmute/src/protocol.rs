//! Synchronous parameter-set protocol.
//!
//! One [`PendingSlot`] per session holds the single in-flight request. The
//! caller resets it and blocks on its condition variable; the event thread
//! fills in the sequence number after submitting and flips the completion
//! flag when the matching acknowledgment arrives. The slot mutex is only ever
//! held briefly by the event thread, inside callbacks, and is released by the
//! caller for the duration of its wait.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, error, trace, warn};

use crate::directory::ObjectDirectory;
use crate::error::MuteError;
use crate::substrate::{Command, CoreError, LoopControl, NodeProxy, RemoteDirectory};
use crate::volume::ChannelVolumes;

/// Bound on how long `set_mute` waits for the server.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// What to do when the connection itself is reported broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FatalPolicy {
    /// Terminate the process at once with `_exit(1)`, skipping unwinding,
    /// atexit handlers and stdio flushing.
    #[default]
    Exit,
    /// Mark the session disconnected and fail the waiting and all later requests.
    Propagate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Phase {
    Idle,
    Binding,
    Submitted { seq: i32 },
    Acknowledged,
    BindFailed(String),
    SubmitFailed(String),
}

#[derive(Debug)]
pub(crate) struct PendingRequest {
    generation: u64,
    node_id: u32,
    proxy_id: Option<u32>,
    phase: Phase,
    done: bool,
    disconnected: bool,
}

impl PendingRequest {
    fn in_flight(&self) -> bool {
        matches!(self.phase, Phase::Binding | Phase::Submitted { .. })
    }
}

/// The process's single pending-request record and its wakeup.
#[derive(Debug)]
pub(crate) struct PendingSlot {
    state: Mutex<PendingRequest>,
    wake: Condvar,
}

impl PendingSlot {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(PendingRequest {
                generation: 0,
                node_id: 0,
                proxy_id: None,
                phase: Phase::Idle,
                done: false,
                disconnected: false,
            }),
            wake: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PendingRequest> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a new request for `node_id`, clearing the completion flag.
    pub(crate) fn begin(&self, node_id: u32) -> Result<u64, MuteError> {
        let mut state = self.lock();
        if state.disconnected {
            return Err(MuteError::Disconnected);
        }
        state.generation += 1;
        state.node_id = node_id;
        state.proxy_id = None;
        state.phase = Phase::Binding;
        state.done = false;
        Ok(state.generation)
    }

    /// Block until request `generation` leaves the in-flight phases or
    /// `timeout` elapses.
    ///
    /// Spurious wakeups and acknowledgments for other sequence numbers put the
    /// caller back to sleep for the remainder of the same deadline.
    pub(crate) fn wait(&self, generation: u64, timeout: Duration) -> Result<(), MuteError> {
        let guard = self.lock();
        let (mut state, _) = self
            .wake
            .wait_timeout_while(guard, timeout, |s| {
                s.generation == generation && s.in_flight() && !s.disconnected
            })
            .unwrap_or_else(PoisonError::into_inner);

        let node_id = state.node_id;
        let outcome = if state.disconnected {
            Err(MuteError::Disconnected)
        } else {
            match &state.phase {
                Phase::Acknowledged => Ok(()),
                Phase::BindFailed(reason) => Err(MuteError::BindFailed {
                    node_id,
                    reason: reason.clone(),
                }),
                Phase::SubmitFailed(reason) => Err(MuteError::Submit {
                    node_id,
                    reason: reason.clone(),
                }),
                _ => Err(MuteError::Timeout { node_id, timeout }),
            }
        };

        // Late acknowledgments for this generation must not complete it now.
        state.phase = Phase::Idle;
        state.proxy_id = None;
        outcome
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        let state = self.lock();
        state.generation == generation && state.phase == Phase::Binding
    }

    pub(crate) fn bound(&self, generation: u64, proxy_id: u32) {
        let mut state = self.lock();
        if state.generation == generation && state.phase == Phase::Binding {
            state.proxy_id = Some(proxy_id);
        }
    }

    pub(crate) fn submitted(&self, generation: u64, seq: i32) {
        let mut state = self.lock();
        if state.generation == generation && state.phase == Phase::Binding {
            trace!("request {} submitted with seq {}", generation, seq);
            state.phase = Phase::Submitted { seq };
        }
    }

    pub(crate) fn bind_failed(&self, generation: u64, reason: String) {
        self.finish(generation, Phase::BindFailed(reason));
    }

    pub(crate) fn submit_failed(&self, generation: u64, reason: String) {
        self.finish(generation, Phase::SubmitFailed(reason));
    }

    fn finish(&self, generation: u64, phase: Phase) {
        let mut state = self.lock();
        if state.generation == generation && state.in_flight() {
            state.phase = phase;
            self.wake.notify_all();
        }
    }

    /// Completion path: runs on the event thread.
    pub(crate) fn acknowledge(&self, seq: i32) {
        let mut state = self.lock();
        match state.phase {
            Phase::Submitted { seq: pending } if pending == seq => {
                state.done = true;
                state.phase = Phase::Acknowledged;
                self.wake.notify_all();
            }
            _ => trace!("ignoring acknowledgment for seq {}", seq),
        }
    }

    /// An asynchronous error against the in-flight proxy means it never bound.
    pub(crate) fn proxy_failed(&self, proxy_id: u32, reason: &str) {
        let mut state = self.lock();
        if state.proxy_id == Some(proxy_id) && state.in_flight() {
            state.phase = Phase::BindFailed(reason.to_string());
            self.wake.notify_all();
        }
    }

    pub(crate) fn disconnect(&self) {
        let mut state = self.lock();
        state.disconnected = true;
        self.wake.notify_all();
    }

    #[cfg(test)]
    pub(crate) fn is_done(&self) -> bool {
        self.lock().done
    }
}

/// Event-thread entry points into the protocol, handed to the substrate.
#[derive(Debug, Clone)]
pub struct EventSink {
    slot: Arc<PendingSlot>,
    policy: FatalPolicy,
}

impl EventSink {
    pub(crate) fn new(slot: Arc<PendingSlot>, policy: FatalPolicy) -> Self {
        Self { slot, policy }
    }

    /// The server finished the request carrying `seq`.
    pub fn acknowledge(&self, seq: i32) {
        self.slot.acknowledge(seq);
    }

    /// The core connection reported an error.
    pub fn core_error(&self, err: CoreError) {
        error!(
            "core error: id:{} seq:{} res:{}: {}",
            err.id, err.seq, err.res, err.message
        );

        if !err.is_fatal() {
            self.slot.proxy_failed(err.id, &err.message);
            return;
        }

        match self.policy {
            FatalPolicy::Exit => {
                error!("PipeWire connection lost, exiting immediately");
                // No atexit handlers or stdio flush: a caller may hold locks
                // those would need.
                // SAFETY: _exit only terminates the process.
                unsafe { libc::_exit(1) }
            }
            FatalPolicy::Propagate => {
                warn!("PipeWire connection lost, session disconnected");
                self.slot.disconnect();
            }
        }
    }
}

/// Event-thread side of the protocol: turns commands into binds and submits,
/// and owns the proxy of the request in flight.
pub(crate) struct Dispatcher<D: RemoteDirectory> {
    directory: ObjectDirectory<D>,
    slot: Arc<PendingSlot>,
    in_flight: Option<(u64, D::Node)>,
}

impl<D: RemoteDirectory> Dispatcher<D> {
    pub(crate) fn new(directory: ObjectDirectory<D>, slot: Arc<PendingSlot>) -> Self {
        Self {
            directory,
            slot,
            in_flight: None,
        }
    }

    pub(crate) fn handle(&mut self, command: Command) -> LoopControl {
        match command {
            Command::SetVolume {
                generation,
                node_id,
                volumes,
            } => {
                self.in_flight = None;
                self.submit(generation, node_id, &volumes);
                LoopControl::Continue
            }
            Command::Release { generation } => {
                if matches!(self.in_flight, Some((held, _)) if held == generation) {
                    self.in_flight = None;
                    trace!("released proxy for request {}", generation);
                }
                LoopControl::Continue
            }
            Command::Stop => {
                self.in_flight = None;
                LoopControl::Quit
            }
        }
    }

    fn submit(&mut self, generation: u64, node_id: u32, volumes: &ChannelVolumes) {
        if !self.slot.is_current(generation) {
            debug!("dropping stale request {} for node {}", generation, node_id);
            return;
        }

        let node = match self.directory.bind(node_id) {
            Ok(node) => node,
            Err(e) => {
                self.slot.bind_failed(generation, e.to_string());
                return;
            }
        };
        self.slot.bound(generation, node.proxy_id());

        match node.set_volumes(volumes) {
            Ok(seq) => self.slot.submitted(generation, seq),
            Err(e) => self.slot.submit_failed(generation, e.to_string()),
        }
        self.in_flight = Some((generation, node));
    }
}
