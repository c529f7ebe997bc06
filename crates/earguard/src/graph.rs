//! PipeWire graph state as seen through `pw-dump --monitor`.
//!
//! Tracks nodes, devices, and the default sink, and decides when an output
//! switch should trigger the guard: the sink moved (or its device re-routed)
//! from a private port to a public one without the user asking for it.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, trace};

use crate::route::RouteClassifier;

pub const NODE_TYPE: &str = "PipeWire:Interface:Node";
pub const DEVICE_TYPE: &str = "PipeWire:Interface:Device";
pub const METADATA_TYPE: &str = "PipeWire:Interface:Metadata";

/// Metadata key for the sink currently in use.
pub const DEFAULT_SINK_KEY: &str = "default.audio.sink";
/// Metadata key written when the user picks a sink explicitly.
pub const CONFIGURED_SINK_KEY: &str = "default.configured.audio.sink";

#[derive(Debug, Deserialize)]
struct ObjectHeader {
    id: u32,
    #[serde(rename = "type", default)]
    kind: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Node {
    pub id: u32,
    #[serde(default)]
    pub info: NodeInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeInfo {
    #[serde(default)]
    pub props: NodeProps,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeProps {
    #[serde(rename = "node.name", default)]
    pub name: String,
    #[serde(rename = "device.id", default)]
    pub device_id: Option<u32>,
    #[serde(rename = "media.class", default)]
    pub media_class: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Device {
    pub id: u32,
    #[serde(default)]
    pub info: DeviceInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceInfo {
    #[serde(default)]
    pub props: DeviceProps,
    #[serde(default)]
    pub params: DeviceParams,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceProps {
    #[serde(rename = "device.name", default)]
    pub name: String,
    #[serde(rename = "device.alias", default)]
    pub alias: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceParams {
    #[serde(rename = "Route", default)]
    pub routes: Vec<Route>,
}

/// One entry of a device's `Route` param.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Route {
    #[serde(default)]
    pub index: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub direction: String,
    #[serde(default)]
    pub priority: i64,
    /// Flat list: a count, then alternating keys and values.
    #[serde(default)]
    pub info: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct MetadataUpdate {
    #[serde(default)]
    metadata: Vec<MetadataEntry>,
}

#[derive(Debug, Deserialize)]
struct MetadataEntry {
    #[serde(default)]
    key: String,
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    /// The default sink's device switched its active output route.
    RouteChange,
    /// The default sink moved to another device.
    DefaultSinkChange,
}

/// A request to protect `node_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub node_id: u32,
    pub reason: TriggerReason,
}

pub struct AudioGraph {
    nodes: HashMap<u32, Node>,
    devices: HashMap<u32, Device>,
    default_sink: Option<String>,
    user_operation: bool,
    classifier: RouteClassifier,
}

impl AudioGraph {
    pub fn new(classifier: RouteClassifier) -> Self {
        Self {
            nodes: HashMap::new(),
            devices: HashMap::new(),
            default_sink: None,
            user_operation: false,
            classifier,
        }
    }

    pub fn default_sink(&self) -> Option<&str> {
        self.default_sink.as_deref()
    }

    pub fn node(&self, id: u32) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn device(&self, id: u32) -> Option<&Device> {
        self.devices.get(&id)
    }

    /// Apply one `pw-dump` batch in order.
    pub fn apply_batch(&mut self, objects: &[Value]) -> Vec<Trigger> {
        objects
            .iter()
            .flat_map(|object| self.apply(object))
            .collect()
    }

    /// Apply one object. Unknown types and undecodable objects are skipped.
    pub fn apply(&mut self, object: &Value) -> Vec<Trigger> {
        let header = match ObjectHeader::deserialize(object) {
            Ok(header) => header,
            Err(e) => {
                trace!("skipping object: {}", e);
                return Vec::new();
            }
        };

        // Removals arrive as `{"id": N, "info": null}`, without a type.
        if object.get("info") == Some(&Value::Null) {
            self.remove(header.id);
            return Vec::new();
        }

        match header.kind.as_str() {
            NODE_TYPE => {
                if let Ok(node) = Node::deserialize(object) {
                    self.nodes.insert(node.id, node);
                }
                Vec::new()
            }
            DEVICE_TYPE => match Device::deserialize(object) {
                Ok(device) => self.on_device(device).into_iter().collect(),
                Err(e) => {
                    debug!("undecodable device {}: {}", header.id, e);
                    Vec::new()
                }
            },
            METADATA_TYPE => match MetadataUpdate::deserialize(object) {
                Ok(update) => self.on_metadata(update.metadata),
                Err(e) => {
                    debug!("undecodable metadata {}: {}", header.id, e);
                    Vec::new()
                }
            },
            _ => Vec::new(),
        }
    }

    fn remove(&mut self, id: u32) {
        if self.nodes.remove(&id).is_some() {
            trace!("node {} removed", id);
        }
        if self.devices.remove(&id).is_some() {
            trace!("device {} removed", id);
        }
    }

    fn node_by_name(&self, name: &str) -> Option<&Node> {
        self.nodes.values().find(|node| node.info.props.name == name)
    }

    fn device_of_sink(&self, name: &str) -> Option<u32> {
        self.node_by_name(name)?.info.props.device_id
    }

    fn on_device(&mut self, device: Device) -> Option<Trigger> {
        let trigger = self.route_change(&device);
        self.devices.insert(device.id, device);
        trigger
    }

    fn route_change(&self, updated: &Device) -> Option<Trigger> {
        let sink = self.default_sink.as_deref()?;
        let sink_node = self.node_by_name(sink)?;
        if sink_node.info.props.device_id != Some(updated.id) {
            return None;
        }
        let previous = self.devices.get(&updated.id)?;

        if self.classifier.is_private(previous) && self.classifier.is_public(updated) {
            info!(
                "output route of {} switched to a public port, protecting node {}",
                sink, sink_node.id
            );
            return Some(Trigger {
                node_id: sink_node.id,
                reason: TriggerReason::RouteChange,
            });
        }
        None
    }

    fn on_metadata(&mut self, entries: Vec<MetadataEntry>) -> Vec<Trigger> {
        let mut triggers = Vec::new();

        for entry in entries {
            if entry.key != DEFAULT_SINK_KEY && entry.key != CONFIGURED_SINK_KEY {
                continue;
            }
            let Some(name) = sink_name(&entry.value) else {
                continue;
            };

            if entry.key == CONFIGURED_SINK_KEY {
                self.user_operation = true;
                continue;
            }

            if let Some(trigger) = self.sink_change(&name) {
                triggers.push(trigger);
            }

            if self.default_sink.is_none() {
                info!("default sink is {}", name);
            } else {
                debug!("default sink changed to {}", name);
            }
            self.default_sink = Some(name);
            self.user_operation = false;
        }

        triggers
    }

    fn sink_change(&self, name: &str) -> Option<Trigger> {
        let current = self.default_sink.as_deref()?;
        let old_device = self.devices.get(&self.device_of_sink(current)?)?;
        let new_device = self.devices.get(&self.device_of_sink(name)?)?;
        let node = self.node_by_name(name)?;

        if self.user_operation {
            debug!("sink change to {} was chosen by the user", name);
            return None;
        }

        if self.classifier.is_private(old_device) && self.classifier.is_public(new_device) {
            info!(
                "default sink moved from {} to {}, protecting node {}",
                current, name, node.id
            );
            return Some(Trigger {
                node_id: node.id,
                reason: TriggerReason::DefaultSinkChange,
            });
        }
        None
    }
}

/// Extract the sink name from a metadata value. It arrives as an object,
/// as a string holding JSON, or as a bare (possibly quoted) name.
fn sink_name(value: &Value) -> Option<String> {
    let name = match value {
        Value::Object(map) => map.get("name")?.as_str()?.to_string(),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => map.get("name")?.as_str()?.to_string(),
            _ => s.trim_matches('"').to_string(),
        },
        _ => return None,
    };
    Some(name).filter(|n| !n.is_empty())
}
