//! The user-code contract.

use crate::context::NodeContext;

/// Behaviour of one node in the simulated algorithm.
///
/// Each node runs its script on a dedicated worker: `setup` once before the
/// simulation clock starts, then `execute` once from timestep 0. All
/// interaction with the network goes through the [`NodeContext`] — sending,
/// receiving, pausing and colouring. Blocking calls (`receive`, `pause`)
/// suspend the worker until the simulation wakes it.
///
/// A panic escaping either method fails this node only: the engine records
/// a failure event and the rest of the simulation continues.
pub trait NodeScript: Send {
    /// Called once before simulation starts.
    ///
    /// The machine id is available here, but `send`, `receive`, `pause`
    /// and `set_colour` are not: calling them from setup is a protocol
    /// violation that fails the node.
    fn setup(&mut self, _ctx: &NodeContext) {}

    /// The node's algorithm. Called once, at timestep 0.
    fn execute(&mut self, ctx: &NodeContext);
}
