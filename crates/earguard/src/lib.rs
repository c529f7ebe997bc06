//! earguard - keeps private audio private when the output switches.
//!
//! Watches the PipeWire graph and, when the default sink moves from
//! headphones to speakers without the user choosing it, mutes the sink
//! briefly and pauses media players.

pub mod daemon;
pub mod graph;
pub mod guard;
pub mod monitor;
pub mod players;
pub mod route;

pub use graph::{AudioGraph, Trigger, TriggerReason};
pub use guard::{Guard, GuardSettings, NodeMuter};
pub use players::{MprisPlayers, PlayerControl};
pub use route::RouteClassifier;
