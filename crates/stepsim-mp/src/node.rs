//! The simulated node: state machine, inbox and worker thread.

use std::any::Any;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, OnceLock, RwLock, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use log::warn;

use stepsim_core::{ExecutionProfiler, ProfiledProcess, SimulationState, StepBarrier, ThreadCpuClock};

use crate::context::NodeContext;
use crate::events::{EventKind, FailureCause, SimulationEvent};
use crate::link::{Link, LinkId, QueuedMessage};
use crate::message::{Message, MessageId, MessageStore};
use crate::scheduler::EventScheduler;
use crate::script::NodeScript;
use crate::util::t;

/// Identifier of a node within the network arena.
pub type NodeId = usize;

/// Panic payload used to unwind user code when a halted node reaches a
/// cancellation point. Recognized at the node boundary and never reported
/// as a failure.
pub(crate) struct HaltSignal;

/// Panic payload for engine API misuse inside user code.
pub(crate) struct ProtocolViolation(pub String);

fn misuse(message: String) -> ! {
    panic::panic_any(ProtocolViolation(message))
}

/// The node's handles into the running simulation, attached when its
/// worker is spawned.
pub(crate) struct EngineHandle {
    pub scheduler: Weak<EventScheduler>,
    pub barrier: Arc<StepBarrier>,
    pub profiler: Arc<ExecutionProfiler>,
    pub store: Arc<MessageStore>,
    pub links: Arc<Vec<Link>>,
}

#[derive(Clone, Copy)]
struct Neighbour {
    node: NodeId,
    link: LinkId,
}

struct WorkerInfo {
    thread: ThreadId,
    clock: Option<ThreadCpuClock>,
}

/// A message waiting in a node's inbox, ordered by arrival timestep.
///
/// Inverted ordering for min-first popping from a max-heap; arrival ties
/// resolve by message id but that is not part of the contract.
#[derive(Clone, Copy, Eq, PartialEq)]
struct InboxEntry {
    arrived_at: u64,
    message: MessageId,
    source: NodeId,
    link: LinkId,
}

impl Ord for InboxEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .arrived_at
            .cmp(&self.arrived_at)
            .then_with(|| other.message.cmp(&self.message))
    }
}

impl PartialOrd for InboxEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct NodeInner {
    state: SimulationState,
    inbox: BinaryHeap<InboxEntry>,
    expected_sender: Option<NodeId>,
    cancelled: bool,
}

/// One simulated vertex of the network.
///
/// Owns a merged inbox across all neighbour links (ordered by arrival
/// timestep), the node's lifecycle state and the worker thread executing
/// the user script. All engine interaction of the script funnels through
/// here.
///
/// Lock discipline: the node lock (`inner`) is never held across calls
/// into the scheduler or the barrier, and link queues are only touched
/// while holding `inner`. The sweeper-facing cancellation flag is checked
/// at every engine entry point before anything else.
pub struct NodeProcess {
    me: Weak<NodeProcess>,
    ident: OnceLock<(NodeId, u64)>,
    initiator: bool,
    neighbours: RwLock<Vec<Neighbour>>,
    script: Mutex<Option<Box<dyn NodeScript>>>,
    inner: Mutex<NodeInner>,
    state_changed: Condvar,
    engine: OnceLock<EngineHandle>,
    worker: OnceLock<WorkerInfo>,
}

impl NodeProcess {
    /// Creates an unattached node running the given script.
    pub fn new(script: Box<dyn NodeScript>, initiator: bool) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            ident: OnceLock::new(),
            initiator,
            neighbours: RwLock::new(Vec::new()),
            script: Mutex::new(Some(script)),
            inner: Mutex::new(NodeInner {
                state: SimulationState::PreSimulation,
                inbox: BinaryHeap::new(),
                expected_sender: None,
                cancelled: false,
            }),
            state_changed: Condvar::new(),
            engine: OnceLock::new(),
            worker: OnceLock::new(),
        })
    }

    /// Assigns the node's simulation id and machine-id scramble offset.
    /// May be called exactly once.
    pub(crate) fn set_simulation_id(&self, id: NodeId, scramble: u64) {
        self.ident
            .set((id, scramble))
            .unwrap_or_else(|_| panic!("attempted to set node simulation id twice"));
    }

    /// The node's unique id within the simulation.
    pub fn simulation_id(&self) -> NodeId {
        self.ident.get().expect("node simulation id not assigned").0
    }

    /// The node's public identifier: simulation id plus scramble offset.
    pub fn machine_id(&self) -> u64 {
        let (id, scramble) = *self.ident.get().expect("node simulation id not assigned");
        id as u64 + scramble
    }

    /// Whether this node is the single initiator of the network.
    pub fn is_initiator(&self) -> bool {
        self.initiator
    }

    pub fn neighbour_count(&self) -> usize {
        self.neighbours.read().unwrap().len()
    }

    /// Wires a neighbour in at the next free index. Indices are permanent
    /// once assigned.
    pub(crate) fn add_neighbour(&self, node: NodeId, link: LinkId) {
        let mut neighbours = self.neighbours.write().unwrap();
        assert!(
            neighbours.iter().all(|n| n.node != node),
            "attempted to add duplicate neighbour {}",
            node
        );
        neighbours.push(Neighbour { node, link });
    }

    /// The neighbour index of the given node, if it is a neighbour.
    pub fn index_of(&self, node: NodeId) -> Option<usize> {
        self.neighbours.read().unwrap().iter().position(|n| n.node == node)
    }

    /// The current lifecycle state of the node.
    pub fn state(&self) -> SimulationState {
        self.inner.lock().unwrap().state
    }

    fn neighbour(&self, index: usize) -> Neighbour {
        let neighbours = self.neighbours.read().unwrap();
        match neighbours.get(index) {
            Some(n) => *n,
            None => misuse(format!(
                "neighbour index {} out of range for node {} with {} neighbours",
                index,
                self.simulation_id(),
                neighbours.len()
            )),
        }
    }

    fn engine(&self) -> &EngineHandle {
        self.engine.get().expect("node is not attached to a simulation")
    }

    fn scheduler(&self) -> Arc<EventScheduler> {
        self.engine()
            .scheduler
            .upgrade()
            .expect("event scheduler dropped while node still running")
    }

    fn raise(&self, kind: EventKind) {
        self.scheduler().schedule(SimulationEvent::at_current(kind), true);
    }

    fn worker_thread(&self) -> ThreadId {
        self.worker.get().expect("node worker not started").thread
    }

    /// Unwinds via the halt signal if the node has been cancelled. Called
    /// at every engine entry point, before any other lock is taken.
    fn checkpoint(&self) {
        if self.inner.lock().unwrap().cancelled {
            panic::panic_any(HaltSignal);
        }
    }

    /// Transitions the lifecycle state and drives the profiler: entering
    /// `Simulating` starts tracking, leaving it stops.
    fn set_state(&self, state: SimulationState) {
        let prev = {
            let mut inner = self.inner.lock().unwrap();
            let prev = inner.state;
            inner.state = state;
            self.state_changed.notify_all();
            prev
        };
        if state == SimulationState::Simulating {
            let me = self.me.upgrade().expect("node dropped while running");
            self.engine().profiler.track(me);
        } else if prev == SimulationState::Simulating {
            self.engine().profiler.untrack(self);
        }
    }

    // ------------------------------------------------------------------
    // Worker lifecycle
    // ------------------------------------------------------------------

    /// Attaches the engine handles and starts the worker thread, blocking
    /// the caller until the node has at least entered setup.
    pub(crate) fn spawn(&self, engine: EngineHandle) -> JoinHandle<()> {
        self.engine
            .set(engine)
            .unwrap_or_else(|_| panic!("attempted to spawn node {} twice", self.simulation_id()));
        let node = self.me.upgrade().expect("node dropped before spawn");
        let handle = thread::Builder::new()
            .name(format!("node-{}", self.simulation_id()))
            .spawn(move || node.run())
            .expect("failed to spawn node worker thread");
        let mut inner = self.inner.lock().unwrap();
        while inner.state == SimulationState::PreSimulation {
            inner = self.state_changed.wait(inner).unwrap();
        }
        handle
    }

    fn run(self: Arc<Self>) {
        let clock = match ThreadCpuClock::for_current_thread() {
            Ok(clock) => Some(clock),
            Err(err) => {
                warn!("no CPU clock for node {} worker: {}", self.simulation_id(), err);
                None
            }
        };
        self.worker
            .set(WorkerInfo {
                thread: thread::current().id(),
                clock,
            })
            .unwrap_or_else(|_| panic!("node worker info set twice"));

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.set_state(SimulationState::Setup);
            let mut script = self
                .script
                .lock()
                .unwrap()
                .take()
                .expect("node script already taken");
            let ctx = NodeContext::new(Arc::clone(&self));
            script.setup(&ctx);
            self.set_state(SimulationState::Simulating);
            script.execute(&ctx);
            self.set_state(SimulationState::Completed);
            // Stay parked until the driver tears the simulation down.
            self.engine().barrier.wait();
        }));

        if let Err(payload) = result {
            if !payload.is::<HaltSignal>() {
                let cause = failure_cause(payload);
                self.raise(EventKind::NodeFailure {
                    node: self.simulation_id(),
                    cause,
                });
                self.set_state(SimulationState::NodeError);
                self.engine().barrier.wait();
            }
        }
        self.set_state(SimulationState::PostSimulation);
    }

    // ------------------------------------------------------------------
    // Script-facing operations (run on the worker thread)
    // ------------------------------------------------------------------

    pub(crate) fn send(&self, neighbour: usize, message: &Message) {
        self.checkpoint();
        if self.state() == SimulationState::Setup {
            misuse("called send from setup".to_string());
        }
        let n = self.neighbour(neighbour);
        let mut copy = message.clone_for_send();
        copy.attach_send_data(self.simulation_id(), n.node, n.link);
        let id = self.engine().store.register(copy);
        t!("node {} --> {} {:?}", self.simulation_id(), n.node, message);
        self.raise(EventKind::MessageSent { message: id });
    }

    pub(crate) fn send_all(&self, message: &Message) {
        for index in 0..self.neighbour_count() {
            self.send(index, message);
        }
    }

    pub(crate) fn receive(&self, from: Option<usize>) -> Message {
        self.checkpoint();
        if self.state() == SimulationState::Setup {
            misuse("called receive from setup".to_string());
        }
        let expected = match from {
            Some(index) => Some(self.neighbour(index).node),
            None => {
                if self.neighbour_count() == 0 {
                    misuse("called receive on a node with no neighbours".to_string());
                }
                None
            }
        };

        loop {
            if let Some((entry, view)) = self.try_take(expected) {
                t!("node {} <-- {} {:?}", self.simulation_id(), entry.source, view);
                self.raise(EventKind::MessageRead { message: entry.message });
                return view;
            }

            let must_block = {
                let mut inner = self.inner.lock().unwrap();
                if inner.cancelled {
                    panic::panic_any(HaltSignal);
                }
                if Self::has_matching(&inner, expected) {
                    // A message slipped in between the pop attempt and
                    // taking the lock; retry the pop.
                    false
                } else {
                    inner.expected_sender = expected;
                    true
                }
            };
            if !must_block {
                continue;
            }

            self.set_state(SimulationState::ReceiveBlock);
            self.raise(EventKind::NodeReceiveBlock {
                node: self.simulation_id(),
            });
            self.engine().barrier.wait();
            self.checkpoint();
            self.raise(EventKind::NodeReceiveBlockResume {
                node: self.simulation_id(),
            });
        }
    }

    fn has_matching(inner: &NodeInner, expected: Option<NodeId>) -> bool {
        inner
            .inbox
            .iter()
            .any(|entry| expected.map_or(true, |source| entry.source == source))
    }

    /// Dequeues the next matching message: the earliest arrival across all
    /// links, or the earliest send on one specific link. Keeps the link
    /// queue and the inbox consistent under the node lock.
    fn try_take(&self, expected: Option<NodeId>) -> Option<(InboxEntry, Message)> {
        let links = &self.engine().links;
        let mut inner = self.inner.lock().unwrap();
        let entry = match expected {
            None => {
                let entry = inner.inbox.pop()?;
                links[entry.link].remove_message(self.simulation_id(), entry.message);
                entry
            }
            Some(source) => {
                let link_id = self.neighbour(self.index_of(source).unwrap()).link;
                let queued = links[link_id].pop_message(self.simulation_id())?;
                let mut entry = None;
                let drained: Vec<InboxEntry> = std::mem::take(&mut inner.inbox).into_vec();
                for item in drained {
                    if item.message == queued.message {
                        entry = Some(item);
                    } else {
                        inner.inbox.push(item);
                    }
                }
                entry.expect("link queue and inbox out of sync")
            }
        };
        drop(inner);
        let mut view = self.engine().store.get(entry.message);
        view.set_source_index(self.index_of(entry.source).expect("message from non-neighbour"));
        Some((entry, view))
    }

    pub(crate) fn pause(&self, timesteps: u64) {
        self.checkpoint();
        if self.state() == SimulationState::Setup {
            misuse("called pause from setup".to_string());
        }
        if timesteps < 1 {
            misuse("pause duration must be at least 1 timestep".to_string());
        }
        let state = self.state();
        if state != SimulationState::Simulating {
            misuse(format!("paused node outside of simulation, in state {:?}", state));
        }
        self.raise(EventKind::NodePause {
            node: self.simulation_id(),
            duration: timesteps,
        });
        self.set_state(SimulationState::Paused);
        self.engine().barrier.wait();
        self.checkpoint();
    }

    pub(crate) fn set_colour(&self, colour: u32) {
        self.checkpoint();
        if self.state() == SimulationState::Setup {
            misuse("called set_colour from setup".to_string());
        }
        self.raise(EventKind::ColourChange {
            node: self.simulation_id(),
            colour,
        });
    }

    // ------------------------------------------------------------------
    // Driver-facing operations
    // ------------------------------------------------------------------

    /// Delivers an arrived message into the link queue and the inbox,
    /// waking the node if it is blocked on a matching receive.
    pub(crate) fn queue_message(
        &self,
        link: &Link,
        message: MessageId,
        source: NodeId,
        sent_at: u64,
        arrived_at: u64,
    ) {
        let wake = {
            let mut inner = self.inner.lock().unwrap();
            link.queue_message(self.simulation_id(), QueuedMessage { sent_at, message });
            inner.inbox.push(InboxEntry {
                arrived_at,
                message,
                source,
                link: link.id(),
            });
            if inner.state == SimulationState::ReceiveBlock
                && inner.expected_sender.map_or(true, |s| s == source)
            {
                inner.expected_sender = None;
                true
            } else {
                false
            }
        };
        if wake {
            self.set_state(SimulationState::Simulating);
            self.engine().barrier.release(self.worker_thread());
        }
    }

    /// Ends a pause. The node must currently be paused.
    pub(crate) fn unpause(&self) {
        let state = self.state();
        assert!(
            state == SimulationState::Paused,
            "attempted to unpause node {} in state {:?}",
            self.simulation_id(),
            state
        );
        self.set_state(SimulationState::Simulating);
        self.engine().barrier.release(self.worker_thread());
    }

    /// Gracefully stops the node: flags cancellation, frees it from the
    /// barrier and waits until its worker has unwound to post-simulation.
    ///
    /// Interruption never surfaces past the node boundary; the worker
    /// unwinds through the halt signal without running further user code.
    ///
    /// With `hold_barrier_slot` set (a halt while the simulation keeps
    /// running, i.e. a prescribed kill), a surrogate follower is parked in
    /// the dead node's place so the driver's barrier threshold still
    /// accounts for every node. Teardown halts pass `false`; the driver
    /// never waits on the barrier again.
    pub(crate) fn halt(&self, hold_barrier_slot: bool) {
        {
            let mut inner = self.inner.lock().unwrap();
            match inner.state {
                SimulationState::PreSimulation => {
                    panic!("attempted to halt non-executing node {}", self.simulation_id())
                }
                SimulationState::PostSimulation | SimulationState::Timeout => return,
                _ => {}
            }
            inner.cancelled = true;
        }
        self.set_state(SimulationState::Halted);
        let worker = self.worker_thread();
        let barrier = &self.engine().barrier;
        if barrier.contains(worker) {
            barrier.release(worker);
        }
        let mut inner = self.inner.lock().unwrap();
        while inner.state != SimulationState::PostSimulation {
            inner = self.state_changed.wait(inner).unwrap();
        }
        drop(inner);
        if hold_barrier_slot {
            self.park_surrogate();
        }
    }

    /// Parks a stand-in follower holding a dead node's barrier slot.
    fn park_surrogate(&self) {
        let barrier = Arc::clone(&self.engine().barrier);
        thread::Builder::new()
            .name(format!("node-{}-surrogate", self.simulation_id()))
            .spawn(move || barrier.wait())
            .expect("failed to spawn surrogate barrier follower");
    }
}

impl ProfiledProcess for NodeProcess {
    fn process_id(&self) -> usize {
        self.simulation_id()
    }

    fn cpu_time(&self) -> Duration {
        self.worker
            .get()
            .and_then(|w| w.clock)
            .map(|c| c.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    /// The profiler's timeout path. Raises a failure event with the
    /// timeout cause, moves the node to `Timeout` and parks a surrogate
    /// follower in its place so the barrier threshold still accounts for
    /// every node. The runaway worker itself unwinds at its next engine
    /// call; a loop that never makes one cannot be preempted.
    fn kill(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.state != SimulationState::Simulating {
                // Lost the race with a voluntary block; nothing to do.
                return;
            }
            inner.cancelled = true;
        }
        self.raise(EventKind::NodeFailure {
            node: self.simulation_id(),
            cause: FailureCause::Timeout,
        });
        self.set_state(SimulationState::Timeout);
        self.park_surrogate();
    }
}

fn failure_cause(payload: Box<dyn Any + Send>) -> FailureCause {
    if let Some(violation) = payload.downcast_ref::<ProtocolViolation>() {
        FailureCause::ProtocolViolation(violation.0.clone())
    } else if let Some(message) = payload.downcast_ref::<&'static str>() {
        FailureCause::Script((*message).to_string())
    } else if let Some(message) = payload.downcast_ref::<String>() {
        FailureCause::Script(message.clone())
    } else {
        FailureCause::Script("unknown panic".to_string())
    }
}
