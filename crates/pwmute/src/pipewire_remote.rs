//! PipeWire substrate
//!
//! Every PipeWire object here is created on, used from, and dropped on the
//! event thread. Callers reach the loop only through a `pipewire::channel`.
//!
//! Acknowledgment of a `set_param` is a core roundtrip: after submitting the
//! `Props` param the proxy issues `core.sync()`, and the per-request `done`
//! observer reports that sequence back. The server answers syncs in order, so
//! a matching `done` means the param has been processed.
//!
//! ```text
//! caller ── pw::channel ──► MainLoop (event thread)
//!                              │ registry.bind(node)
//!                              │ node.set_param(Props { channelVolumes: [v; 8] })
//!                              │ core.sync(0) -> seq
//!                              ▼
//!                          core "done"(PW_ID_CORE, seq) ──► EventSink::acknowledge
//! ```

use std::cell::RefCell;

use pipewire as pw;
use pw::proxy::ProxyT;
use pw::spa;
use pw::spa::pod::Pod;
use tracing::{debug, info};

use crate::error::{InitError, SubstrateError};
use crate::protocol::EventSink;
use crate::substrate::{
    Command, CommandSender, Connector, CoreError, LoopControl, NodeProxy, RemoteCore,
    RemoteDirectory,
};
use crate::volume::ChannelVolumes;

/// Node interface version requested when binding.
const NODE_VERSION: u32 = 3;

/// Connects to a PipeWire daemon, optionally a named remote.
#[derive(Debug, Clone, Default)]
pub struct PipeWireConnector {
    remote: Option<String>,
}

impl PipeWireConnector {
    pub fn new(remote: Option<String>) -> Self {
        Self {
            remote: remote.filter(|name| !name.is_empty()),
        }
    }
}

impl Connector for PipeWireConnector {
    type Core = PipeWireCore;

    fn connect(self, events: EventSink) -> Result<PipeWireCore, InitError> {
        // Safe to call multiple times
        pw::init();

        let mainloop = pw::main_loop::MainLoopRc::new(None)
            .map_err(|e| InitError::Loop(SubstrateError::new(e.to_string())))?;
        let context = pw::context::ContextRc::new(&mainloop, None)
            .map_err(|e| InitError::Context(SubstrateError::new(e.to_string())))?;

        let core = match &self.remote {
            Some(remote) => context.connect_rc(Some(pw::properties::properties! {
                *pw::keys::REMOTE_NAME => remote.as_str(),
            })),
            None => context.connect_rc(None),
        }
        .map_err(|e| InitError::Connect(SubstrateError::new(e.to_string())))?;

        let error_events = events.clone();
        let error_listener = core
            .add_listener_local()
            .error(move |id, seq, res, message| {
                error_events.core_error(CoreError {
                    id,
                    seq,
                    res,
                    message: message.to_string(),
                });
            })
            .register();

        let (sender, receiver) = pw::channel::channel::<Command>();

        info!(
            "connected to PipeWire{}",
            self.remote
                .as_deref()
                .map(|r| format!(" remote {}", r))
                .unwrap_or_default()
        );

        Ok(PipeWireCore {
            _error_listener: error_listener,
            sender: Some(sender),
            receiver: Some(receiver),
            events,
            core,
            _context: context,
            mainloop,
        })
    }
}

/// Live PipeWire connection. Fields drop in declaration order: observer,
/// core, context, loop.
pub struct PipeWireCore {
    _error_listener: pw::core::Listener,
    sender: Option<pw::channel::Sender<Command>>,
    receiver: Option<pw::channel::Receiver<Command>>,
    events: EventSink,
    core: pw::core::CoreRc,
    _context: pw::context::ContextRc,
    mainloop: pw::main_loop::MainLoopRc,
}

impl RemoteCore for PipeWireCore {
    type Directory = PipeWireDirectory;
    type Sender = PipeWireSender;

    fn directory(&self) -> Result<PipeWireDirectory, InitError> {
        let registry = self
            .core
            .get_registry_rc()
            .map_err(|e| InitError::Registry(SubstrateError::new(e.to_string())))?;
        Ok(PipeWireDirectory {
            registry,
            core: self.core.clone(),
            events: self.events.clone(),
        })
    }

    fn command_sender(&mut self) -> Result<PipeWireSender, InitError> {
        self.sender
            .take()
            .map(PipeWireSender)
            .ok_or_else(|| InitError::Channel(SubstrateError::new("sender already taken")))
    }

    fn run<F>(mut self, dispatch: F)
    where
        F: FnMut(Command) -> LoopControl + 'static,
    {
        let Some(receiver) = self.receiver.take() else {
            return;
        };

        let dispatch = RefCell::new(dispatch);
        let mainloop_weak = self.mainloop.downgrade();
        let _attached = receiver.attach(self.mainloop.loop_(), move |command| {
            if (dispatch.borrow_mut())(command) == LoopControl::Quit {
                if let Some(mainloop) = mainloop_weak.upgrade() {
                    mainloop.quit();
                }
            }
        });

        info!("PipeWire event loop running");
        self.mainloop.run();
        info!("PipeWire event loop exited");
    }
}

/// Sending half of the loop's command channel.
pub struct PipeWireSender(pw::channel::Sender<Command>);

impl CommandSender for PipeWireSender {
    fn send(&self, command: Command) -> Result<(), SubstrateError> {
        self.0
            .send(command)
            .map_err(|_| SubstrateError::new("event loop has stopped"))
    }
}

/// The session's registry handle.
pub struct PipeWireDirectory {
    registry: pw::registry::RegistryRc,
    core: pw::core::CoreRc,
    events: EventSink,
}

impl RemoteDirectory for PipeWireDirectory {
    type Node = PipeWireNode;

    fn bind(&self, node_id: u32) -> Result<PipeWireNode, SubstrateError> {
        // Bind straight from the id; the registry is never enumerated.
        let global: pw::registry::GlobalObject<&spa::utils::dict::DictRef> =
            pw::registry::GlobalObject {
                id: node_id,
                permissions: pw::permissions::PermissionFlags::all(),
                type_: pw::types::ObjectType::Node,
                version: NODE_VERSION,
                props: None,
            };
        let node: pw::node::Node = self
            .registry
            .bind(&global)
            .map_err(|e| SubstrateError::new(format!("registry bind: {}", e)))?;
        let proxy_id = node.upcast_ref().id();

        let events = self.events.clone();
        let done_listener = self
            .core
            .add_listener_local()
            .done(move |id, seq| {
                if id == pw::core::PW_ID_CORE {
                    events.acknowledge(seq.seq());
                }
            })
            .register();

        Ok(PipeWireNode {
            _done_listener: done_listener,
            node,
            core: self.core.clone(),
            proxy_id,
        })
    }
}

/// A bound node plus its per-request observer. Dropping it removes the
/// observer, then destroys the proxy.
pub struct PipeWireNode {
    _done_listener: pw::core::Listener,
    node: pw::node::Node,
    core: pw::core::CoreRc,
    proxy_id: u32,
}

impl NodeProxy for PipeWireNode {
    fn proxy_id(&self) -> u32 {
        self.proxy_id
    }

    fn set_volumes(&self, volumes: &ChannelVolumes) -> Result<i32, SubstrateError> {
        let bytes = props_pod(volumes)?;
        let pod = Pod::from_bytes(&bytes)
            .ok_or_else(|| SubstrateError::new("Failed to create Pod from bytes"))?;

        self.node
            .set_param(spa::param::ParamType::Props, 0, pod);
        let pending = self
            .core
            .sync(0)
            .map_err(|e| SubstrateError::new(format!("core sync: {}", e)))?;

        debug!(
            "set channelVolumes {:?} on proxy {} (seq {})",
            volumes.as_slice().first(),
            self.proxy_id,
            pending.seq()
        );
        Ok(pending.seq())
    }
}

/// Serialize a `Props` object with a single `channelVolumes` float array.
fn props_pod(volumes: &ChannelVolumes) -> Result<Vec<u8>, SubstrateError> {
    use spa::pod::serialize::PodSerializer;
    use spa::pod::{Object, Property, PropertyFlags, Value, ValueArray};

    let props = Value::Object(Object {
        type_: spa::sys::SPA_TYPE_OBJECT_Props,
        id: spa::sys::SPA_PARAM_Props,
        properties: vec![Property {
            key: spa::sys::SPA_PROP_channelVolumes,
            flags: PropertyFlags::empty(),
            value: Value::ValueArray(ValueArray::Float(volumes.as_slice().to_vec())),
        }],
    });

    let bytes = PodSerializer::serialize(std::io::Cursor::new(Vec::new()), &props)
        .map_err(|e| SubstrateError::new(format!("Failed to serialize Props: {:?}", e)))?
        .0
        .into_inner();
    Ok(bytes)
}
