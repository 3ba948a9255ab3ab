//! The simulation driver.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use colored::Color;
use log::{debug, warn};

use stepsim_core::log::get_colored;
use stepsim_core::{ExecutionProfiler, SimulationState, StepBarrier};

use crate::config::SimulationConfig;
use crate::error::SimulationError;
use crate::events::{EventKind, SimulationEvent};
use crate::message::MessageStore;
use crate::network::Network;
use crate::node::{EngineHandle, NodeId};
use crate::results::SimulationResults;
use crate::scheduler::EventScheduler;

/// Drives a network through the simulation: spawns the node workers, runs
/// the main timestep loop against the event scheduler and the step
/// barrier, and assembles the final results.
///
/// The constructing thread is the driver; `simulate_until` and `run` must
/// be called from it. The global timestep advances only once every worker
/// has quiesced for the current micro-step, so within one tick each event
/// is fully absorbed (the woken node has run to its next blocking point)
/// before the next one is processed.
pub struct SimulationRunner {
    network: Arc<Network>,
    store: Arc<MessageStore>,
    scheduler: Arc<EventScheduler>,
    barrier: Arc<StepBarrier>,
    profiler: Arc<ExecutionProfiler>,
    length: u64,
    timestep: Option<u64>,
    state: SimulationState,
    workers: HashMap<NodeId, JoinHandle<()>>,
}

impl SimulationRunner {
    /// Validates the configuration and prepares the run. Prescribed kills
    /// are resolved against the network and enqueued before anything
    /// starts; all configuration errors surface here, never mid-run.
    pub fn new(network: Network, config: SimulationConfig) -> Result<Self, SimulationError> {
        if config.length < 1 {
            return Err(SimulationError::InvalidLength);
        }
        if let Some(timeout) = config.node_timeout {
            if timeout.is_zero() {
                return Err(SimulationError::InvalidTimeout);
            }
        }
        if network.node_count() == 0 {
            return Err(SimulationError::EmptyNetwork);
        }

        let network = Arc::new(network);
        let store = Arc::new(MessageStore::new());
        let profiler = Arc::new(ExecutionProfiler::new(network.node_count(), config.node_timeout));
        let barrier = Arc::new(StepBarrier::new(network.node_count()));
        let scheduler = EventScheduler::new(Arc::clone(&network), Arc::clone(&store), config.length);

        for kill in network.prescribed_kills() {
            if kill.node >= network.node_count() {
                return Err(SimulationError::UnknownKillTarget { node: kill.node });
            }
            scheduler.schedule(
                SimulationEvent::new(kill.timestep, EventKind::NodeKill { node: kill.node }),
                false,
            );
        }

        scheduler.add_listener(|event| {
            if let EventKind::NodeFailure { node, cause } = &event.kind {
                warn!(
                    "[{} {}] node {} failed at timestep {}: {:?}",
                    get_colored("WARN", Color::Yellow),
                    "simulation",
                    node,
                    event.timestep().unwrap_or_default(),
                    cause
                );
            }
        });

        Ok(Self {
            network,
            store,
            scheduler,
            barrier,
            profiler,
            length: config.length,
            timestep: None,
            state: SimulationState::PreSimulation,
            workers: HashMap::new(),
        })
    }

    /// The configured run length in timesteps.
    pub fn simulation_length(&self) -> u64 {
        self.length
    }

    /// The timestep the simulation is currently at, once started.
    pub fn current_timestep(&self) -> Option<u64> {
        self.timestep
    }

    /// The whole-run lifecycle state.
    pub fn state(&self) -> SimulationState {
        self.state
    }

    pub fn network(&self) -> &Arc<Network> {
        &self.network
    }

    pub fn scheduler(&self) -> &Arc<EventScheduler> {
        &self.scheduler
    }

    /// Runs the whole simulation and returns its results.
    pub fn run(mut self) -> SimulationResults {
        let length = self.length;
        self.simulate_until(length);
        self.finish()
    }

    /// Advances the simulation up to (but not past the events of)
    /// `stop_step`.
    ///
    /// The first call performs startup: every worker is spawned (each
    /// spawn blocks until that node has entered setup, for deterministic
    /// startup ordering), then the driver waits for all nodes to reach
    /// their first blocking point before computing the first timestep.
    pub fn simulate_until(&mut self, stop_step: u64) {
        assert_eq!(
            thread::current().id(),
            self.barrier.leader(),
            "the simulation must be driven by the thread that created the runner"
        );
        assert!(
            self.state != SimulationState::PostSimulation,
            "attempted to simulate after teardown"
        );
        let stop_step = stop_step.min(self.length);

        if self.state == SimulationState::PreSimulation {
            debug!("starting {} node workers", self.network.node_count());
            self.state = SimulationState::Setup;
            self.profiler.increment_timestep(0);
            for node in self.network.nodes() {
                let engine = EngineHandle {
                    scheduler: Arc::downgrade(&self.scheduler),
                    barrier: Arc::clone(&self.barrier),
                    profiler: Arc::clone(&self.profiler),
                    store: Arc::clone(&self.store),
                    links: self.network.links_arc(),
                };
                let handle = node.spawn(engine);
                self.workers.insert(node.simulation_id(), handle);
            }
            self.state = SimulationState::Simulating;
            self.barrier.wait();
            let first = self.scheduler.next_event_timestep();
            self.advance_to(first);
        }

        while self.timestep.expect("timestep unset while simulating") < stop_step {
            let next = loop {
                self.scheduler.process_next();
                self.barrier.wait();
                let next = self.scheduler.next_event_timestep();
                if next != self.timestep {
                    break next;
                }
            };
            self.advance_to(next);
            if let Some(timestep) = next {
                self.profiler.increment_timestep(timestep);
            }
        }

        self.barrier.wait();
    }

    /// Halts every node, releases barrier stragglers, joins the workers
    /// and assembles the results.
    fn finish(mut self) -> SimulationResults {
        debug!("simulation reached timestep {:?}, tearing down", self.timestep);
        for node in self.network.nodes() {
            node.halt(false);
        }
        self.barrier.release_all();
        for (id, handle) in self.workers.drain() {
            if self.network.node(id).state() == SimulationState::Timeout {
                // Runaway worker that never hit a cancellation point; it
                // stays detached (see the profiler docs).
                continue;
            }
            let _ = handle.join();
        }
        self.state = SimulationState::PostSimulation;
        self.timestep = None;
        SimulationResults::new(
            self.scheduler.take_log(),
            self.store.snapshot(),
            self.profiler.times(),
        )
    }

    /// Moves the visible timestep forward, clamped to the run length.
    /// Advancement is only legal while simulating and must strictly
    /// increase.
    fn advance_to(&mut self, next: Option<u64>) {
        assert!(
            self.state == SimulationState::Simulating,
            "unable to advance timestep when out of simulation"
        );
        let target = next.unwrap_or(self.length).min(self.length);
        if let Some(current) = self.timestep {
            assert!(
                target > current,
                "attempted to advance to past timestep {} (current {})",
                target,
                current
            );
        }
        self.timestep = Some(target);
    }
}
