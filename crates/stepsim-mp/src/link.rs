//! Latency-bearing channel between two nodes.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Mutex;

use crate::message::MessageId;
use crate::node::NodeId;

/// Identifier of a link within the network arena.
pub type LinkId = usize;

/// The minimum latency of a link, in ticks.
pub const MIN_LATENCY: u64 = 1;

/// An arrived message waiting in a link queue, ordered by send timestep.
///
/// Note: this ordering is inverted so that the earliest send pops first
/// from a max-heap. Ties between equal send timesteps resolve by message
/// id, which is not part of the contract.
#[derive(Clone, Copy, Eq, PartialEq)]
pub(crate) struct QueuedMessage {
    pub sent_at: u64,
    pub message: MessageId,
}

impl Ord for QueuedMessage {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .sent_at
            .cmp(&self.sent_at)
            .then_with(|| other.message.cmp(&self.message))
    }
}

impl PartialOrd for QueuedMessage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A bidirectional channel between two neighbouring nodes.
///
/// The topology (endpoints and latency) is immutable after creation; the
/// two per-direction queues hold messages that have arrived at an endpoint
/// but have not been read yet, in non-decreasing send-timestep order.
pub struct Link {
    id: LinkId,
    source: NodeId,
    target: NodeId,
    latency: u64,
    // One queue per receiving endpoint: [0] for source, [1] for target.
    queues: [Mutex<BinaryHeap<QueuedMessage>>; 2],
}

impl Link {
    pub(crate) fn new(id: LinkId, source: NodeId, target: NodeId, latency: u64) -> Self {
        assert!(source != target, "link endpoints must differ");
        assert!(latency >= MIN_LATENCY, "link latency less than minimum");
        Self {
            id,
            source,
            target,
            latency,
            queues: [Mutex::new(BinaryHeap::new()), Mutex::new(BinaryHeap::new())],
        }
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn source(&self) -> NodeId {
        self.source
    }

    pub fn target(&self) -> NodeId {
        self.target
    }

    /// Transit time of the link in ticks.
    pub fn latency(&self) -> u64 {
        self.latency
    }

    /// The endpoint opposite to `node`.
    pub fn opposite(&self, node: NodeId) -> NodeId {
        if node == self.source {
            self.target
        } else if node == self.target {
            self.source
        } else {
            panic!("node {} is not an endpoint of link {}", node, self.id)
        }
    }

    fn queue_index(&self, receiver: NodeId) -> usize {
        if receiver == self.source {
            0
        } else if receiver == self.target {
            1
        } else {
            panic!("node {} is not an endpoint of link {}", receiver, self.id)
        }
    }

    /// Queues an arrived message for the given receiving endpoint.
    pub(crate) fn queue_message(&self, receiver: NodeId, entry: QueuedMessage) {
        self.queues[self.queue_index(receiver)].lock().unwrap().push(entry);
    }

    /// Pops the earliest-sent message waiting for the given endpoint.
    pub(crate) fn pop_message(&self, receiver: NodeId) -> Option<QueuedMessage> {
        self.queues[self.queue_index(receiver)].lock().unwrap().pop()
    }

    /// The number of messages waiting for the given endpoint.
    pub fn message_count(&self, receiver: NodeId) -> usize {
        self.queues[self.queue_index(receiver)].lock().unwrap().len()
    }

    /// Removes a specific message from the given endpoint's queue.
    pub(crate) fn remove_message(&self, receiver: NodeId, message: MessageId) {
        self.queues[self.queue_index(receiver)]
            .lock()
            .unwrap()
            .retain(|entry| entry.message != message);
    }
}
