//! Message definition and the store of transmitted messages.

use std::fmt::{Error, Formatter};
use std::sync::Mutex;

use serde::Serialize;

use crate::error::SimulationError;
use crate::link::LinkId;
use crate::node::NodeId;

/// Identifier of a transmitted message within the [`MessageStore`].
pub type MessageId = usize;

/// The maximum length of a message tag.
pub const MAX_TAG_LENGTH: usize = 32;
/// The maximum length of a message payload.
pub const MAX_DATA_LENGTH: usize = 4096;

/// A message exchanged between two neighbouring nodes.
///
/// User code constructs a message from a tag and a payload. The engine
/// never transmits the constructed value itself: every send registers a
/// fresh copy, so resending a received message cannot alias state with the
/// original. Send data (endpoints and link) is attached to the copy exactly
/// once, and the send/arrival timesteps are stamped exactly once each as
/// the corresponding events are processed.
#[derive(Clone, Serialize)]
pub struct Message {
    tag: String,
    data: String,
    source: Option<NodeId>,
    target: Option<NodeId>,
    sent_at: Option<u64>,
    arrived_at: Option<u64>,
    #[serde(skip)]
    link: Option<LinkId>,
    #[serde(skip)]
    source_index: Option<usize>,
}

impl Message {
    /// Creates a message, validating the tag and payload lengths.
    pub fn new<T>(tag: T, data: T) -> Result<Self, SimulationError>
    where
        T: Into<String>,
    {
        let tag = tag.into();
        let data = data.into();
        if tag.len() > MAX_TAG_LENGTH {
            return Err(SimulationError::TagTooLong {
                len: tag.len(),
                max: MAX_TAG_LENGTH,
            });
        }
        if data.len() > MAX_DATA_LENGTH {
            return Err(SimulationError::PayloadTooLarge {
                len: data.len(),
                max: MAX_DATA_LENGTH,
            });
        }
        Ok(Self {
            tag,
            data,
            source: None,
            target: None,
            sent_at: None,
            arrived_at: None,
            link: None,
            source_index: None,
        })
    }

    /// Creates a message carrying a numeric payload.
    pub fn numeric<T>(tag: T, value: i64) -> Result<Self, SimulationError>
    where
        T: Into<String>,
    {
        Self::new(tag.into(), value.to_string())
    }

    /// The message tag.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The message payload.
    pub fn data(&self) -> &str {
        &self.data
    }

    /// The payload parsed as a number, if it is one.
    pub fn numeric_data(&self) -> Option<i64> {
        self.data.parse().ok()
    }

    /// Simulation id of the sender, once send data is attached.
    pub fn source(&self) -> Option<NodeId> {
        self.source
    }

    /// Simulation id of the recipient, once send data is attached.
    pub fn target(&self) -> Option<NodeId> {
        self.target
    }

    /// The timestep the message was sent at, once marked.
    pub fn sent_at(&self) -> Option<u64> {
        self.sent_at
    }

    /// The timestep the message arrived at, once marked.
    pub fn arrived_at(&self) -> Option<u64> {
        self.arrived_at
    }

    /// The index of the sender as seen from the recipient's neighbour
    /// list. Present on received messages only.
    pub fn source_index(&self) -> Option<usize> {
        self.source_index
    }

    pub(crate) fn link(&self) -> Option<LinkId> {
        self.link
    }

    /// Fresh copy for transmission: same tag and payload, no send data.
    pub(crate) fn clone_for_send(&self) -> Self {
        Self {
            tag: self.tag.clone(),
            data: self.data.clone(),
            source: None,
            target: None,
            sent_at: None,
            arrived_at: None,
            link: None,
            source_index: None,
        }
    }

    pub(crate) fn attach_send_data(&mut self, source: NodeId, target: NodeId, link: LinkId) {
        assert!(
            self.source.is_none() && self.target.is_none(),
            "attempted to attach send data to a message twice"
        );
        assert!(
            source != target,
            "attempted to attach send data with the same source and target node"
        );
        self.source = Some(source);
        self.target = Some(target);
        self.link = Some(link);
    }

    pub(crate) fn mark_sent(&mut self, timestep: u64) {
        assert!(self.sent_at.is_none(), "attempted to mark message as sent twice");
        self.sent_at = Some(timestep);
    }

    pub(crate) fn mark_arrived(&mut self, timestep: u64) {
        assert!(
            self.arrived_at.is_none(),
            "attempted to mark message as arrived twice"
        );
        let sent_at = self
            .sent_at
            .expect("attempted to mark a message as arrived before it was sent");
        assert!(
            timestep > sent_at,
            "attempted to mark message as arrived at or before its send timestep"
        );
        self.arrived_at = Some(timestep);
    }

    pub(crate) fn set_source_index(&mut self, index: usize) {
        self.source_index = Some(index);
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{} {}", self.tag, self.data)
    }
}

/// Central store of every transmitted message.
///
/// Holds the single authoritative copy of each in-flight or delivered
/// message; link queues, inboxes, events and the event log all refer to
/// entries by [`MessageId`]. Timestamp marking goes through the store so
/// that the exactly-once invariants hold regardless of which thread
/// processes the corresponding event.
pub struct MessageStore {
    messages: Mutex<Vec<Message>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
        }
    }

    /// Registers a transmitted message and returns its id.
    pub(crate) fn register(&self, message: Message) -> MessageId {
        let mut messages = self.messages.lock().unwrap();
        messages.push(message);
        messages.len() - 1
    }

    /// A copy of the message with the given id.
    pub fn get(&self, id: MessageId) -> Message {
        self.messages.lock().unwrap()[id].clone()
    }

    pub(crate) fn mark_sent(&self, id: MessageId, timestep: u64) {
        self.messages.lock().unwrap()[id].mark_sent(timestep);
    }

    pub(crate) fn mark_arrived(&self, id: MessageId, timestep: u64) {
        self.messages.lock().unwrap()[id].mark_arrived(timestep);
    }

    /// The number of transmitted messages.
    pub fn len(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn snapshot(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsent_message_has_no_timestamps() {
        let msg = Message::new("PING", "data").unwrap();
        assert_eq!(msg.sent_at(), None);
        assert_eq!(msg.arrived_at(), None);
        assert_eq!(msg.source(), None);
        assert_eq!(msg.target(), None);
    }

    #[test]
    fn rejects_overlong_tag() {
        let tag = "x".repeat(MAX_TAG_LENGTH + 1);
        let err = Message::new(tag.clone(), "data".to_string()).unwrap_err();
        assert_eq!(
            err,
            SimulationError::TagTooLong {
                len: tag.len(),
                max: MAX_TAG_LENGTH
            }
        );
    }

    #[test]
    fn rejects_overlong_payload() {
        let data = "x".repeat(MAX_DATA_LENGTH + 1);
        assert!(matches!(
            Message::new("TAG".to_string(), data),
            Err(SimulationError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn numeric_payload_round_trips() {
        let msg = Message::numeric("N", -17).unwrap();
        assert_eq!(msg.numeric_data(), Some(-17));
        assert_eq!(Message::new("N", "nan").unwrap().numeric_data(), None);
    }

    #[test]
    fn clone_for_send_strips_send_data() {
        let mut msg = Message::new("PING", "data").unwrap();
        msg.attach_send_data(0, 1, 0);
        msg.mark_sent(3);
        msg.mark_arrived(4);
        let copy = msg.clone_for_send();
        assert_eq!(copy.sent_at(), None);
        assert_eq!(copy.arrived_at(), None);
        assert_eq!(copy.source(), None);
    }

    #[test]
    #[should_panic(expected = "send data to a message twice")]
    fn attaching_send_data_twice_panics() {
        let mut msg = Message::new("PING", "data").unwrap();
        msg.attach_send_data(0, 1, 0);
        msg.attach_send_data(0, 1, 0);
    }

    #[test]
    #[should_panic(expected = "same source and target")]
    fn attaching_self_send_panics() {
        let mut msg = Message::new("PING", "data").unwrap();
        msg.attach_send_data(2, 2, 0);
    }

    #[test]
    #[should_panic(expected = "sent twice")]
    fn marking_sent_twice_panics() {
        let mut msg = Message::new("PING", "data").unwrap();
        msg.mark_sent(1);
        msg.mark_sent(2);
    }

    #[test]
    #[should_panic(expected = "arrived twice")]
    fn marking_arrived_twice_panics() {
        let mut msg = Message::new("PING", "data").unwrap();
        msg.mark_sent(1);
        msg.mark_arrived(2);
        msg.mark_arrived(3);
    }

    #[test]
    #[should_panic(expected = "before it was sent")]
    fn marking_arrival_before_send_panics() {
        let mut msg = Message::new("PING", "data").unwrap();
        msg.mark_arrived(2);
    }

    #[test]
    #[should_panic(expected = "at or before its send timestep")]
    fn arrival_must_be_after_send() {
        let mut msg = Message::new("PING", "data").unwrap();
        msg.mark_sent(5);
        msg.mark_arrived(5);
    }

    #[test]
    fn store_assigns_sequential_ids() {
        let store = MessageStore::new();
        let a = store.register(Message::new("A", "1").unwrap());
        let b = store.register(Message::new("B", "2").unwrap());
        assert_eq!((a, b), (0, 1));
        assert_eq!(store.get(b).tag(), "B");
        assert_eq!(store.len(), 2);
    }
}
