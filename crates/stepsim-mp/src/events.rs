//! The tagged simulation event type.
//!
//! One enum covers both event families (node lifecycle and message
//! transit). Application behaviour lives in the scheduler's dispatch, and
//! the driver-facing reaction goes through listener callbacks, instead of
//! per-type virtual overrides.

use serde::Serialize;

use crate::message::MessageId;
use crate::node::NodeId;

/// Events with a priority at or below this value are republished to
/// external listeners after being processed. 0 is the most important.
pub const EVENT_NOTIFY_THRESHOLD: u8 = 2;

const DEFAULT_PRIORITY: u8 = 5;
const FAILURE_PRIORITY: u8 = 2;
const KILL_PRIORITY: u8 = 2;

/// Why a node failed.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// User code panicked with the given message.
    Script(String),
    /// The engine API was used from an illegal state, e.g. a send during
    /// setup. Kept distinct from plain script panics so misuse cannot be
    /// confused with platform-level faults.
    ProtocolViolation(String),
    /// The execution profiler terminated the node for exceeding its CPU
    /// timeout.
    Timeout,
}

/// The payload of a simulation event.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventKind {
    /// A message was handed to its link.
    MessageSent { message: MessageId },
    /// A message finished transit and reached its target's inbox.
    MessageArrival { message: MessageId },
    /// A message was dequeued by a `receive` call.
    MessageRead { message: MessageId },
    /// A node started a pause of the given duration.
    NodePause { node: NodeId, duration: u64 },
    /// The matching end of a pause.
    NodeUnpause { node: NodeId },
    /// A node blocked waiting for a message.
    NodeReceiveBlock { node: NodeId },
    /// A receive-blocked node resumed.
    NodeReceiveBlockResume { node: NodeId },
    /// A node changed its display colour.
    ColourChange { node: NodeId, colour: u32 },
    /// A node failed and left the simulation.
    NodeFailure { node: NodeId, cause: FailureCause },
    /// A prescribed halt of a node.
    NodeKill { node: NodeId },
}

/// A discrete occurrence at a logical timestep.
///
/// The timestep is either fixed at creation or left unassigned, in which
/// case the scheduler stamps it with its current cursor on submission.
#[derive(Clone, Debug, Serialize)]
pub struct SimulationEvent {
    timestep: Option<u64>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl SimulationEvent {
    /// An event fixed to occur at the given timestep.
    pub fn new(timestep: u64, kind: EventKind) -> Self {
        Self {
            timestep: Some(timestep),
            kind,
        }
    }

    /// An event to be stamped with the scheduler's current timestep.
    pub fn at_current(kind: EventKind) -> Self {
        Self { timestep: None, kind }
    }

    /// The timestep the event occurs at, if assigned yet.
    pub fn timestep(&self) -> Option<u64> {
        self.timestep
    }

    pub(crate) fn stamp(&mut self, timestep: u64) {
        assert!(
            self.timestep.is_none(),
            "attempted to stamp an event that already has a timestep"
        );
        self.timestep = Some(timestep);
    }

    /// Importance of the event; 0 is the most important.
    pub fn priority(&self) -> u8 {
        match self.kind {
            EventKind::NodeFailure { .. } => FAILURE_PRIORITY,
            EventKind::NodeKill { .. } => KILL_PRIORITY,
            _ => DEFAULT_PRIORITY,
        }
    }

    /// The node the event concerns, for node-family events.
    pub fn node(&self) -> Option<NodeId> {
        match self.kind {
            EventKind::NodePause { node, .. }
            | EventKind::NodeUnpause { node }
            | EventKind::NodeReceiveBlock { node }
            | EventKind::NodeReceiveBlockResume { node }
            | EventKind::ColourChange { node, .. }
            | EventKind::NodeFailure { node, .. }
            | EventKind::NodeKill { node } => Some(node),
            _ => None,
        }
    }

    /// The message the event concerns, for message-family events.
    pub fn message(&self) -> Option<MessageId> {
        match self.kind {
            EventKind::MessageSent { message }
            | EventKind::MessageArrival { message }
            | EventKind::MessageRead { message } => Some(message),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamping_assigns_the_timestep_once() {
        let mut event = SimulationEvent::at_current(EventKind::NodeUnpause { node: 0 });
        assert_eq!(event.timestep(), None);
        event.stamp(4);
        assert_eq!(event.timestep(), Some(4));
    }

    #[test]
    #[should_panic(expected = "already has a timestep")]
    fn stamping_twice_panics() {
        let mut event = SimulationEvent::new(1, EventKind::NodeUnpause { node: 0 });
        event.stamp(2);
    }

    #[test]
    fn failures_pass_the_notify_threshold() {
        let failure = SimulationEvent::new(
            0,
            EventKind::NodeFailure {
                node: 1,
                cause: FailureCause::Timeout,
            },
        );
        let read = SimulationEvent::new(0, EventKind::MessageRead { message: 0 });
        assert!(failure.priority() <= EVENT_NOTIFY_THRESHOLD);
        assert!(read.priority() > EVENT_NOTIFY_THRESHOLD);
    }

    #[test]
    fn serializes_with_event_type_tag() {
        let event = SimulationEvent::new(3, EventKind::ColourChange { node: 2, colour: 0xff0000 });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_type"], "colour_change");
        assert_eq!(value["timestep"], 3);
        assert_eq!(value["node"], 2);
    }
}
