//! In-process stand-in for the PipeWire server, used by the tests.
//!
//! Counts every resource it hands out so tests can check that failed setups
//! and shutdowns release everything, and records every payload it receives.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{InitError, SubstrateError};
use crate::protocol::EventSink;
use crate::substrate::{
    Command, CommandSender, Connector, CoreError, LoopControl, NodeProxy, RemoteCore,
    RemoteDirectory,
};
use crate::volume::ChannelVolumes;

/// Offset added to the real sequence number for deliberately wrong acks.
const WRONG_SEQ_OFFSET: i32 = 1000;

/// How the fake server answers a submitted volume.
#[derive(Debug, Clone, Copy)]
pub(crate) enum AckMode {
    Prompt,
    Never,
    /// An unrelated sequence first, the right one after the delay.
    WrongThenRight(Duration),
    WrongOnly,
}

/// Setup step at which `connect`/`directory` should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailAt {
    Loop,
    Context,
    Connect,
    Registry,
}

#[derive(Debug, Default)]
struct Counters {
    acquired: AtomicUsize,
    live: AtomicUsize,
}

struct Resource {
    counters: Arc<Counters>,
}

impl Resource {
    fn acquire(counters: &Arc<Counters>) -> Self {
        counters.acquired.fetch_add(1, Ordering::SeqCst);
        counters.live.fetch_add(1, Ordering::SeqCst);
        Self {
            counters: Arc::clone(counters),
        }
    }
}

impl Drop for Resource {
    fn drop(&mut self) {
        self.counters.live.fetch_sub(1, Ordering::SeqCst);
    }
}

enum FakeMessage {
    Command(Command),
    Ack(i32),
    Error(CoreError),
}

struct FakeState {
    nodes: HashSet<u32>,
    ack: AckMode,
    fail_at: Option<FailAt>,
    payloads: Vec<(u32, ChannelVolumes)>,
    next_seq: i32,
    next_proxy: u32,
    binds: usize,
    live_nodes: usize,
    injector: Option<mpsc::Sender<FakeMessage>>,
}

#[derive(Clone)]
pub(crate) struct FakeServer {
    state: Arc<Mutex<FakeState>>,
    counters: Arc<Counters>,
}

impl FakeServer {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                nodes: HashSet::new(),
                ack: AckMode::Prompt,
                fail_at: None,
                payloads: Vec::new(),
                next_seq: 1,
                next_proxy: 3,
                binds: 0,
                live_nodes: 0,
                injector: None,
            })),
            counters: Arc::new(Counters::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn with_node(self, node_id: u32) -> Self {
        self.state().nodes.insert(node_id);
        self
    }

    pub(crate) fn with_ack(self, ack: AckMode) -> Self {
        self.state().ack = ack;
        self
    }

    pub(crate) fn failing_at(self, stage: FailAt) -> Self {
        self.state().fail_at = Some(stage);
        self
    }

    pub(crate) fn connector(&self) -> FakeConnector {
        FakeConnector {
            server: self.clone(),
        }
    }

    /// A directory detached from any event loop; acknowledgments go nowhere.
    pub(crate) fn directory(&self) -> FakeDirectory {
        let (acks, _) = mpsc::channel();
        FakeDirectory {
            server: self.clone(),
            acks,
            _registry: None,
        }
    }

    pub(crate) fn binds(&self) -> usize {
        self.state().binds
    }

    pub(crate) fn live_nodes(&self) -> usize {
        self.state().live_nodes
    }

    pub(crate) fn payloads(&self) -> Vec<(u32, ChannelVolumes)> {
        self.state().payloads.clone()
    }

    pub(crate) fn live_resources(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }

    pub(crate) fn acquired_resources(&self) -> usize {
        self.counters.acquired.load(Ordering::SeqCst)
    }

    pub(crate) fn wait_for_payloads(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.state().payloads.len() >= count {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    /// Deliver a core error on the event thread, as the server would.
    pub(crate) fn inject_error(&self, error: CoreError) {
        if let Some(injector) = self.state().injector.as_ref() {
            let _ = injector.send(FakeMessage::Error(error));
        }
    }

    fn acquire(&self, stage: FailAt) -> Result<Resource, SubstrateError> {
        if self.state().fail_at == Some(stage) {
            return Err(SubstrateError::new(format!("{:?} unavailable", stage)));
        }
        Ok(Resource::acquire(&self.counters))
    }
}

pub(crate) struct FakeConnector {
    server: FakeServer,
}

impl Connector for FakeConnector {
    type Core = FakeCore;

    fn connect(self, events: EventSink) -> Result<FakeCore, InitError> {
        let event_loop = self.server.acquire(FailAt::Loop).map_err(InitError::Loop)?;
        let context = self.server.acquire(FailAt::Context).map_err(InitError::Context)?;
        let connection = self.server.acquire(FailAt::Connect).map_err(InitError::Connect)?;

        let (sender, receiver) = mpsc::channel();
        self.server.state().injector = Some(sender.clone());

        Ok(FakeCore {
            _resources: vec![connection, context, event_loop],
            server: self.server,
            events,
            acks: sender.clone(),
            sender: Some(sender),
            receiver,
        })
    }
}

pub(crate) struct FakeCore {
    _resources: Vec<Resource>,
    server: FakeServer,
    events: EventSink,
    acks: mpsc::Sender<FakeMessage>,
    sender: Option<mpsc::Sender<FakeMessage>>,
    receiver: mpsc::Receiver<FakeMessage>,
}

impl RemoteCore for FakeCore {
    type Directory = FakeDirectory;
    type Sender = FakeSender;

    fn directory(&self) -> Result<FakeDirectory, InitError> {
        let registry = self
            .server
            .acquire(FailAt::Registry)
            .map_err(InitError::Registry)?;
        Ok(FakeDirectory {
            server: self.server.clone(),
            acks: self.acks.clone(),
            _registry: Some(registry),
        })
    }

    fn command_sender(&mut self) -> Result<FakeSender, InitError> {
        self.sender
            .take()
            .map(FakeSender)
            .ok_or_else(|| InitError::Channel(SubstrateError::new("sender already taken")))
    }

    fn run<F>(self, mut dispatch: F)
    where
        F: FnMut(Command) -> LoopControl + 'static,
    {
        for message in self.receiver.iter() {
            match message {
                FakeMessage::Command(command) => {
                    if dispatch(command) == LoopControl::Quit {
                        break;
                    }
                }
                FakeMessage::Ack(seq) => self.events.acknowledge(seq),
                FakeMessage::Error(error) => self.events.core_error(error),
            }
        }
    }
}

pub(crate) struct FakeSender(mpsc::Sender<FakeMessage>);

impl CommandSender for FakeSender {
    fn send(&self, command: Command) -> Result<(), SubstrateError> {
        self.0
            .send(FakeMessage::Command(command))
            .map_err(|_| SubstrateError::new("event loop has stopped"))
    }
}

pub(crate) struct FakeDirectory {
    server: FakeServer,
    acks: mpsc::Sender<FakeMessage>,
    _registry: Option<Resource>,
}

impl RemoteDirectory for FakeDirectory {
    type Node = FakeNode;

    fn bind(&self, node_id: u32) -> Result<FakeNode, SubstrateError> {
        let mut state = self.server.state();
        if !state.nodes.contains(&node_id) {
            return Err(SubstrateError::new(format!("unknown global {}", node_id)));
        }
        state.binds += 1;
        state.live_nodes += 1;
        let proxy_id = state.next_proxy;
        state.next_proxy += 1;

        Ok(FakeNode {
            server: self.server.clone(),
            acks: self.acks.clone(),
            node_id,
            proxy_id,
        })
    }
}

pub(crate) struct FakeNode {
    server: FakeServer,
    acks: mpsc::Sender<FakeMessage>,
    node_id: u32,
    proxy_id: u32,
}

impl NodeProxy for FakeNode {
    fn proxy_id(&self) -> u32 {
        self.proxy_id
    }

    fn set_volumes(&self, volumes: &ChannelVolumes) -> Result<i32, SubstrateError> {
        let mut state = self.server.state();
        state.payloads.push((self.node_id, *volumes));
        let seq = state.next_seq;
        state.next_seq += 1;

        match state.ack {
            AckMode::Prompt => {
                let _ = self.acks.send(FakeMessage::Ack(seq));
            }
            AckMode::Never => {}
            AckMode::WrongOnly => {
                let _ = self.acks.send(FakeMessage::Ack(seq + WRONG_SEQ_OFFSET));
            }
            AckMode::WrongThenRight(delay) => {
                let _ = self.acks.send(FakeMessage::Ack(seq + WRONG_SEQ_OFFSET));
                let acks = self.acks.clone();
                thread::spawn(move || {
                    thread::sleep(delay);
                    let _ = acks.send(FakeMessage::Ack(seq));
                });
            }
        }
        Ok(seq)
    }
}

impl Drop for FakeNode {
    fn drop(&mut self) {
        self.server.state().live_nodes -= 1;
    }
}
