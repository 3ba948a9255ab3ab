//! Per-process CPU accounting and timeout enforcement.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use colored::Color;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use log::warn;

use crate::log::get_colored;

// How many times the sweeper tests for timed out processes per timeout
// interval.
const TIME_CHECKS_PER_TIMEOUT: u32 = 5;

/// A process whose execution time the profiler can observe and which it
/// can terminate when the configured timeout is exceeded.
pub trait ProfiledProcess: Send + Sync {
    /// Stable identifier of the process within the simulation.
    fn process_id(&self) -> usize;

    /// CPU time consumed so far by the process worker thread.
    fn cpu_time(&self) -> Duration;

    /// Force-terminates the process.
    ///
    /// Termination is cooperative: the implementation must stop the process
    /// from affecting the simulation and must leave the profiler untracked
    /// for it, but a worker that never re-enters the engine cannot be
    /// preempted.
    fn kill(&self);
}

struct TrackedProcess {
    process: Arc<dyn ProfiledProcess>,
    start: Duration,
}

struct ProfilerState {
    timestep: Option<u64>,
    tracked: HashMap<usize, TrackedProcess>,
    times: HashMap<usize, BTreeMap<u64, Duration>>,
}

struct Sweeper {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

/// Tracks the CPU time each simulated process spends per logical timestep
/// and, when a timeout is configured, terminates processes that exceed it.
///
/// A process is tracked while it is actively simulating and untracked at
/// every blocking point; the delta between the two CPU samples is
/// accumulated into the process total for the current timestep. The
/// timeout sweep is the only mechanism that can interrupt a process that
/// never voluntarily blocks.
pub struct ExecutionProfiler {
    state: Arc<Mutex<ProfilerState>>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl ExecutionProfiler {
    /// Creates a profiler for `process_count` processes.
    ///
    /// If `timeout` is given, a background sweeper thread is started that
    /// checks tracked processes several times per timeout interval and
    /// kills any whose CPU delta exceeds it. Panics if the timeout is zero.
    pub fn new(process_count: usize, timeout: Option<Duration>) -> Self {
        let mut times = HashMap::with_capacity(process_count);
        for id in 0..process_count {
            times.insert(id, BTreeMap::new());
        }
        let state = Arc::new(Mutex::new(ProfilerState {
            timestep: None,
            tracked: HashMap::new(),
            times,
        }));
        let sweeper = timeout.map(|timeout| {
            assert!(!timeout.is_zero(), "process timeout must be positive");
            Self::spawn_sweeper(Arc::clone(&state), timeout)
        });
        Self {
            state,
            sweeper: Mutex::new(sweeper),
        }
    }

    fn spawn_sweeper(state: Arc<Mutex<ProfilerState>>, timeout: Duration) -> Sweeper {
        let interval = (timeout / TIME_CHECKS_PER_TIMEOUT).max(Duration::from_millis(1));
        let (shutdown, rx) = bounded::<()>(0);
        let handle = thread::Builder::new()
            .name("profiler-sweep".to_string())
            .spawn(move || loop {
                match rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => Self::sweep(&state, timeout),
                    _ => return,
                }
            })
            .expect("failed to spawn profiler sweeper thread");
        Sweeper { shutdown, handle }
    }

    fn sweep(state: &Mutex<ProfilerState>, timeout: Duration) {
        let victims: Vec<Arc<dyn ProfiledProcess>> = {
            let state = state.lock().unwrap();
            state
                .tracked
                .values()
                .filter(|t| t.process.cpu_time().saturating_sub(t.start) > timeout)
                .map(|t| Arc::clone(&t.process))
                .collect()
        };
        // Kill outside the lock: the kill path re-enters untrack().
        for process in victims {
            warn!(
                target: "profiler",
                "[{} profiler] Process {} exceeded its execution timeout and is being terminated",
                get_colored("WARN", Color::Yellow),
                process.process_id()
            );
            process.kill();
        }
    }

    /// Starts tracking a process that has resumed active simulation.
    ///
    /// Panics if the process is already tracked.
    pub fn track(&self, process: Arc<dyn ProfiledProcess>) {
        let mut state = self.state.lock().unwrap();
        let id = process.process_id();
        assert!(
            !state.tracked.contains_key(&id),
            "attempted to track already tracked process {}",
            id
        );
        let start = process.cpu_time();
        state.tracked.insert(id, TrackedProcess { process, start });
    }

    /// Stops tracking a process that has reached a blocking point and
    /// accumulates the elapsed CPU delta into the current timestep.
    ///
    /// Panics if the process is not currently tracked.
    pub fn untrack(&self, process: &dyn ProfiledProcess) {
        let mut state = self.state.lock().unwrap();
        let id = process.process_id();
        let entry = state
            .tracked
            .remove(&id)
            .unwrap_or_else(|| panic!("attempted to untrack process {} without tracking it", id));
        let delta = process.cpu_time().saturating_sub(entry.start);
        let timestep = state
            .timestep
            .expect("profiler timestep was not initialized before tracking");
        *state
            .times
            .entry(id)
            .or_default()
            .entry(timestep)
            .or_default() += delta;
    }

    /// Whether the process is currently tracked.
    pub fn is_tracked(&self, process_id: usize) -> bool {
        self.state.lock().unwrap().tracked.contains_key(&process_id)
    }

    /// Advances the timestep CPU deltas are accumulated into.
    ///
    /// Must be called by the driver exactly once per advancing tick, with a
    /// strictly increasing value, and only while no process is tracked.
    pub fn increment_timestep(&self, timestep: u64) {
        let mut state = self.state.lock().unwrap();
        assert!(
            state.tracked.is_empty(),
            "attempted to advance profiler timestep while processes are tracked"
        );
        if let Some(current) = state.timestep {
            assert!(
                timestep > current,
                "attempted to profile past timestep {} (current {})",
                timestep,
                current
            );
        }
        state.timestep = Some(timestep);
    }

    /// Snapshot of the per-process, per-timestep CPU time table.
    pub fn times(&self) -> HashMap<usize, BTreeMap<u64, Duration>> {
        self.state.lock().unwrap().times.clone()
    }
}

impl Drop for ExecutionProfiler {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.lock().unwrap().take() {
            drop(sweeper.shutdown);
            let _ = sweeper.handle.join();
        }
    }
}
