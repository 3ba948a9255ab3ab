//! Append-only record of processed events.

use std::collections::HashMap;

use crate::events::SimulationEvent;
use crate::message::MessageId;

/// The ordered log of every processed event, plus a deduplicated table of
/// the messages those events refer to.
///
/// Message references are compacted: the first event mentioning a message
/// assigns it the next table slot, and every later mention maps to the
/// same slot. The table order is what the result encoding publishes.
#[derive(Default)]
pub struct EventLog {
    events: Vec<SimulationEvent>,
    message_slots: HashMap<MessageId, usize>,
    message_order: Vec<MessageId>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a processed event, registering its message reference on
    /// first occurrence.
    pub(crate) fn add(&mut self, event: &SimulationEvent) {
        if let Some(message) = event.message() {
            if !self.message_slots.contains_key(&message) {
                self.message_slots.insert(message, self.message_order.len());
                self.message_order.push(message);
            }
        }
        self.events.push(event.clone());
    }

    /// All processed events, in processing order.
    pub fn events(&self) -> &[SimulationEvent] {
        &self.events
    }

    /// The events processed at the given timestep.
    pub fn events_at(&self, timestep: u64) -> Vec<&SimulationEvent> {
        self.events
            .iter()
            .filter(|e| e.timestep() == Some(timestep))
            .collect()
    }

    /// The compact table id assigned to a message, if any event referred
    /// to it.
    pub fn message_slot(&self, message: MessageId) -> Option<usize> {
        self.message_slots.get(&message).copied()
    }

    /// Message ids in table order (first occurrence in the log).
    pub fn messages(&self) -> &[MessageId] {
        &self.message_order
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[test]
    fn deduplicates_message_references() {
        let mut log = EventLog::new();
        log.add(&SimulationEvent::new(0, EventKind::MessageSent { message: 7 }));
        log.add(&SimulationEvent::new(1, EventKind::MessageArrival { message: 7 }));
        log.add(&SimulationEvent::new(1, EventKind::MessageSent { message: 9 }));
        log.add(&SimulationEvent::new(1, EventKind::MessageRead { message: 7 }));

        assert_eq!(log.len(), 4);
        assert_eq!(log.message_slot(7), Some(0));
        assert_eq!(log.message_slot(9), Some(1));
        assert_eq!(log.messages(), &[7, 9]);
    }

    #[test]
    fn events_at_filters_by_timestep() {
        let mut log = EventLog::new();
        log.add(&SimulationEvent::new(0, EventKind::NodeReceiveBlock { node: 0 }));
        log.add(&SimulationEvent::new(2, EventKind::NodeUnpause { node: 0 }));
        log.add(&SimulationEvent::new(2, EventKind::NodeReceiveBlock { node: 1 }));
        assert_eq!(log.events_at(2).len(), 2);
        assert_eq!(log.events_at(1).len(), 0);
    }
}
