//! Lifecycle states shared by nodes and the simulation driver.

use serde::Serialize;

/// Lifecycle of a simulated node (and, at the whole-run level, of the
/// simulation itself).
///
/// The happy path is `PreSimulation → Setup → Simulating → Completed →
/// PostSimulation`, with `Simulating` alternating with the two blocking
/// states while user code waits on messages or pauses. `NodeError`,
/// `Halted` and `Timeout` are the alternate exits; all of them funnel into
/// `PostSimulation` once the worker has unwound.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SimulationState {
    /// Created but not yet handed to a worker thread.
    PreSimulation,
    /// Worker started, user `setup()` running.
    Setup,
    /// User `execute()` running on the worker.
    Simulating,
    /// Blocked inside `receive()` waiting for a message.
    ReceiveBlock,
    /// Blocked inside `pause()` waiting for the matching unpause.
    Paused,
    /// User code returned normally; worker parked until teardown.
    Completed,
    /// User code panicked; worker parked until teardown.
    NodeError,
    /// Halt requested by the driver; worker is unwinding.
    Halted,
    /// Force-terminated by the execution profiler.
    Timeout,
    /// Worker has fully unwound.
    PostSimulation,
}

impl SimulationState {
    /// True for the states in which the worker is parked on the barrier
    /// waiting to be woken by the driver.
    pub fn is_blocked(&self) -> bool {
        matches!(self, SimulationState::ReceiveBlock | SimulationState::Paused)
    }

    /// True once the node can no longer make progress.
    ///
    /// A timed-out node counts as dead even though its runaway thread may
    /// still be spinning: no event will ever be applied to it again.
    pub fn is_dead(&self) -> bool {
        matches!(self, SimulationState::PostSimulation | SimulationState::Timeout)
    }
}
