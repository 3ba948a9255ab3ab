//! Lock-step simulation of distributed message-passing algorithms.
//!
//! A user supplies a per-node [`NodeScript`]; the engine instantiates one
//! logical process per network node, wires them with latency-bearing
//! links, and runs the whole topology forward in discrete logical
//! timesteps. One worker thread per node plus a single driver thread are
//! kept in lock step by a barrier, so the global clock only advances once
//! every node has quiesced. The run produces an ordered log of every
//! send/receive/pause/failure event plus a per-node CPU-time table.
//!
//! ```no_run
//! use stepsim_mp::{
//!     LinkConfig, Message, NetworkConfig, Network, NodeContext, NodeScript,
//!     SimulationConfig, SimulationRunner,
//! };
//!
//! struct Ping;
//!
//! impl NodeScript for Ping {
//!     fn execute(&mut self, ctx: &NodeContext) {
//!         if ctx.is_initiator() {
//!             ctx.send(0, &Message::new("PING", "hello").unwrap());
//!         } else {
//!             let msg = ctx.receive();
//!             assert_eq!(msg.tag(), "PING");
//!         }
//!     }
//! }
//!
//! let mut config = NetworkConfig::new(2);
//! config.initiator = Some(0);
//! config.add_link(LinkConfig::new(0, 1)).unwrap();
//! let network = Network::build(&config, |_| Box::new(Ping) as Box<dyn NodeScript>).unwrap();
//! let runner = SimulationRunner::new(network, SimulationConfig::new(10)).unwrap();
//! let results = runner.run();
//! assert_eq!(results.messages().len(), 1);
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod event_log;
pub mod events;
pub mod link;
pub mod message;
pub mod network;
pub mod node;
pub mod results;
pub mod runner;
pub mod scheduler;
pub mod script;
mod util;

pub use config::{KillConfig, LinkConfig, NetworkConfig, SimulationConfig};
pub use context::NodeContext;
pub use error::SimulationError;
pub use event_log::EventLog;
pub use events::{EventKind, FailureCause, SimulationEvent, EVENT_NOTIFY_THRESHOLD};
pub use link::{Link, LinkId, MIN_LATENCY};
pub use message::{Message, MessageId, MessageStore, MAX_DATA_LENGTH, MAX_TAG_LENGTH};
pub use network::Network;
pub use node::{NodeId, NodeProcess};
pub use results::SimulationResults;
pub use runner::SimulationRunner;
pub use scheduler::EventScheduler;
pub use script::NodeScript;
pub use stepsim_core::SimulationState;
