//! The final output of a run.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde_json::{json, Value};

use crate::event_log::EventLog;
use crate::events::SimulationEvent;
use crate::message::Message;
use crate::node::NodeId;

/// Everything a run produces: the ordered event log, the deduplicated
/// message table and the per-node per-timestep CPU-time table.
///
/// The JSON encoding follows the schema consumed by external reporting
/// tooling: each event entry carries its type tag, timestep and
/// type-specific fields, with message references compacted into indices
/// into the `messages` table; CPU times are nanoseconds.
pub struct SimulationResults {
    log: EventLog,
    messages: Vec<Message>,
    cpu_times: HashMap<NodeId, BTreeMap<u64, Duration>>,
}

impl SimulationResults {
    pub(crate) fn new(
        log: EventLog,
        messages: Vec<Message>,
        cpu_times: HashMap<NodeId, BTreeMap<u64, Duration>>,
    ) -> Self {
        Self {
            log,
            messages,
            cpu_times,
        }
    }

    /// All processed events in processing order.
    pub fn events(&self) -> &[SimulationEvent] {
        self.log.events()
    }

    /// The events processed at one timestep.
    pub fn events_at(&self, timestep: u64) -> Vec<&SimulationEvent> {
        self.log.events_at(timestep)
    }

    /// The event log itself.
    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// The deduplicated message table, in first-occurrence order.
    pub fn messages(&self) -> Vec<&Message> {
        self.log
            .messages()
            .iter()
            .map(|id| &self.messages[*id])
            .collect()
    }

    /// A message by its compact table id.
    pub fn message(&self, slot: usize) -> &Message {
        &self.messages[self.log.messages()[slot]]
    }

    /// CPU time spent by each node in each timestep.
    pub fn cpu_times(&self) -> &HashMap<NodeId, BTreeMap<u64, Duration>> {
        &self.cpu_times
    }

    /// Total CPU time spent by one node across the run.
    pub fn total_cpu_time(&self, node: NodeId) -> Duration {
        self.cpu_times
            .get(&node)
            .map(|per_tick| per_tick.values().sum())
            .unwrap_or(Duration::ZERO)
    }

    /// Encodes the results for external tooling.
    pub fn to_json(&self) -> Value {
        let events: Vec<Value> = self
            .log
            .events()
            .iter()
            .map(|event| {
                let mut value = serde_json::to_value(event).expect("event serialization failed");
                if let Some(message) = event.message() {
                    let slot = self
                        .log
                        .message_slot(message)
                        .expect("logged message missing from table");
                    let obj = value.as_object_mut().expect("event is not a JSON object");
                    obj.remove("message");
                    obj.insert("message_id".to_string(), json!(slot));
                }
                value
            })
            .collect();

        let messages: Vec<Value> = self
            .messages()
            .iter()
            .map(|m| serde_json::to_value(m).expect("message serialization failed"))
            .collect();

        let mut cpu_times = serde_json::Map::new();
        let mut nodes: Vec<_> = self.cpu_times.keys().collect();
        nodes.sort();
        for node in nodes {
            let per_tick: serde_json::Map<String, Value> = self.cpu_times[node]
                .iter()
                .map(|(tick, time)| (tick.to_string(), json!(time.as_nanos() as u64)))
                .collect();
            cpu_times.insert(node.to_string(), Value::Object(per_tick));
        }

        json!({
            "events": events,
            "messages": messages,
            "cpu_times": cpu_times,
        })
    }
}
