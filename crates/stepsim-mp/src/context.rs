//! The API surface handed to user scripts.

use std::sync::Arc;

use crate::message::Message;
use crate::node::NodeProcess;

/// Handle through which a [`NodeScript`](crate::NodeScript) interacts with
/// its node.
///
/// Neighbours are addressed by index in `0..neighbour_count()`; indices
/// are stable for the whole run but carry no meaning beyond identity.
pub struct NodeContext {
    node: Arc<NodeProcess>,
}

impl NodeContext {
    pub(crate) fn new(node: Arc<NodeProcess>) -> Self {
        Self { node }
    }

    /// Sends a copy of `message` to the given neighbour. It arrives after
    /// the connecting link's latency.
    pub fn send(&self, neighbour: usize, message: &Message) {
        self.node.send(neighbour, message);
    }

    /// Sends a copy of `message` to every neighbour.
    pub fn send_all(&self, message: &Message) {
        self.node.send_all(message);
    }

    /// Waits for a message from any neighbour.
    ///
    /// Messages are delivered in arrival order across all links, so no
    /// single busy link can starve the others. Blocks until one is
    /// available.
    pub fn receive(&self) -> Message {
        self.node.receive(None)
    }

    /// Waits for a message from the given neighbour. Blocks until one is
    /// available.
    pub fn receive_from(&self, neighbour: usize) -> Message {
        self.node.receive(Some(neighbour))
    }

    /// Suspends the node for the given number of timesteps (at least 1).
    pub fn pause(&self, timesteps: u64) {
        self.node.pause(timesteps);
    }

    /// Records a colour change for this node at the current timestep.
    pub fn set_colour(&self, colour: u32) {
        self.node.set_colour(colour);
    }

    /// The number of neighbours connected to this node.
    pub fn neighbour_count(&self) -> usize {
        self.node.neighbour_count()
    }

    /// The public identifier of this node.
    pub fn machine_id(&self) -> u64 {
        self.node.machine_id()
    }

    /// Whether this node is the single initiator of the network.
    pub fn is_initiator(&self) -> bool {
        self.node.is_initiator()
    }
}
