//! Discrete-event scheduling and dispatch.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex};

use crate::event_log::EventLog;
use crate::events::{EventKind, SimulationEvent, EVENT_NOTIFY_THRESHOLD};
use crate::message::MessageStore;
use crate::network::Network;
use crate::node::NodeId;
use crate::util::t;

/// Sentinel result for events whose target node is already dead; such
/// events are dropped without logging or notification.
struct DeadNode;

type Listener = Box<dyn Fn(&SimulationEvent) + Send + Sync>;

/// A scheduled event, ordered by timestep with a submission sequence as
/// tie-break (inverted for min-first popping). The relative order of
/// same-timestep events is not part of the contract.
struct QueuedEvent {
    timestep: u64,
    seq: u64,
    event: SimulationEvent,
}

impl Eq for QueuedEvent {}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .timestep
            .cmp(&self.timestep)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct SchedulerInner {
    queue: BinaryHeap<QueuedEvent>,
    cursor: u64,
    limit: u64,
    next_seq: u64,
    log: EventLog,
}

/// Orders and applies simulation events.
///
/// Events are submitted from node workers (immediately processed when they
/// land on the current timestep), from the driver's drain loop and from
/// the profiler's timeout path; a single internal lock serializes them.
/// Processing an event advances the cursor to its timestep, applies its
/// effect on the network (which may schedule follow-up events), appends it
/// to the log and republishes it to listeners if its priority passes the
/// notify threshold.
///
/// Listeners are invoked with the scheduler lock held and must not call
/// back into it.
pub struct EventScheduler {
    network: Arc<Network>,
    store: Arc<MessageStore>,
    inner: Mutex<SchedulerInner>,
    listeners: Mutex<Vec<Listener>>,
}

impl EventScheduler {
    /// Creates a scheduler that refuses to process events at or past
    /// `limit`.
    pub(crate) fn new(network: Arc<Network>, store: Arc<MessageStore>, limit: u64) -> Arc<Self> {
        assert!(limit >= 1, "invalid process limit: {}", limit);
        Arc::new(Self {
            network,
            store,
            inner: Mutex::new(SchedulerInner {
                queue: BinaryHeap::new(),
                cursor: 0,
                limit,
                next_seq: 0,
                log: EventLog::new(),
            }),
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// The timestep the scheduler has advanced to.
    pub fn current_timestep(&self) -> u64 {
        self.inner.lock().unwrap().cursor
    }

    /// Registers a callback for events passing the notify threshold.
    pub fn add_listener<F>(&self, listener: F)
    where
        F: Fn(&SimulationEvent) + Send + Sync + 'static,
    {
        self.listeners.lock().unwrap().push(Box::new(listener));
    }

    /// Submits an event.
    ///
    /// An event without a timestep is stamped with the current cursor.
    /// Scheduling before the cursor is an engine bug and panics. An event
    /// landing exactly on the cursor is processed synchronously when
    /// `immediate` is set, so that a side effect of processing another
    /// same-tick event takes effect without waiting a phantom drain cycle;
    /// otherwise it is enqueued.
    pub fn schedule(&self, mut event: SimulationEvent, immediate: bool) {
        let mut inner = self.inner.lock().unwrap();
        let timestep = match event.timestep() {
            Some(t) => t,
            None => {
                event.stamp(inner.cursor);
                inner.cursor
            }
        };
        assert!(
            timestep >= inner.cursor,
            "attempted to schedule event at past timestep {} (current {})",
            timestep,
            inner.cursor
        );
        if timestep == inner.cursor && immediate {
            self.process_locked(&mut inner, event);
        } else {
            Self::enqueue_locked(&mut inner, timestep, event);
        }
    }

    /// Processes the earliest pending event. Panics if none is pending.
    pub(crate) fn process_next(&self) {
        let mut inner = self.inner.lock().unwrap();
        let queued = inner
            .queue
            .pop()
            .expect("attempted to process event where none was waiting");
        self.process_locked(&mut inner, queued.event);
    }

    /// The timestep of the earliest pending event, if any.
    pub fn next_event_timestep(&self) -> Option<u64> {
        self.inner.lock().unwrap().queue.peek().map(|q| q.timestep)
    }

    /// The number of pending events.
    pub fn pending_events(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    /// Hands over the event log, leaving an empty one behind.
    pub(crate) fn take_log(&self) -> EventLog {
        std::mem::take(&mut self.inner.lock().unwrap().log)
    }

    fn enqueue_locked(inner: &mut SchedulerInner, timestep: u64, event: SimulationEvent) {
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.queue.push(QueuedEvent { timestep, seq, event });
    }

    fn process_locked(&self, inner: &mut SchedulerInner, event: SimulationEvent) {
        let timestep = event.timestep().expect("processing an unstamped event");
        inner.cursor = timestep;
        assert!(
            timestep < inner.limit,
            "attempted to process event past process limit {}",
            inner.limit
        );
        t!("[{}] {:?}", timestep, event.kind);
        if self.apply(inner, &event).is_err() {
            // Target node already dead: drop silently.
            return;
        }
        inner.log.add(&event);
        if event.priority() <= EVENT_NOTIFY_THRESHOLD {
            for listener in self.listeners.lock().unwrap().iter() {
                listener(&event);
            }
        }
    }

    /// The event's effect on the simulation.
    fn apply(&self, inner: &mut SchedulerInner, event: &SimulationEvent) -> Result<(), DeadNode> {
        let timestep = event.timestep().expect("applying an unstamped event");
        match &event.kind {
            EventKind::MessageSent { message } => {
                self.store.mark_sent(*message, timestep);
                let msg = self.store.get(*message);
                let link = self.network.link(msg.link().expect("sent message without link"));
                let arrival = timestep + link.latency();
                Self::enqueue_locked(
                    inner,
                    arrival,
                    SimulationEvent::new(arrival, EventKind::MessageArrival { message: *message }),
                );
            }
            EventKind::MessageArrival { message } => {
                self.store.mark_arrived(*message, timestep);
                let msg = self.store.get(*message);
                let target = self.network.node(msg.target().expect("arrival without target"));
                let link = self.network.link(msg.link().expect("arrival without link"));
                target.queue_message(
                    link,
                    *message,
                    msg.source().expect("arrival without source"),
                    msg.sent_at().expect("arrival of unsent message"),
                    timestep,
                );
            }
            EventKind::MessageRead { .. } => {}
            EventKind::NodePause { node, duration } => {
                self.dead_check(*node)?;
                let wake = timestep + duration;
                Self::enqueue_locked(
                    inner,
                    wake,
                    SimulationEvent::new(wake, EventKind::NodeUnpause { node: *node }),
                );
            }
            EventKind::NodeUnpause { node } => {
                self.dead_check(*node)?;
                self.network.node(*node).unpause();
            }
            EventKind::NodeReceiveBlock { node }
            | EventKind::NodeReceiveBlockResume { node }
            | EventKind::ColourChange { node, .. } => {
                self.dead_check(*node)?;
            }
            EventKind::NodeFailure { .. } => {}
            EventKind::NodeKill { node } => {
                self.network.node(*node).halt(true);
            }
        }
        Ok(())
    }

    fn dead_check(&self, node: NodeId) -> Result<(), DeadNode> {
        if self.network.node(node).state().is_dead() {
            Err(DeadNode)
        } else {
            Ok(())
        }
    }
}
