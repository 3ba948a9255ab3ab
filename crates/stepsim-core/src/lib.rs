#![warn(missing_docs)]

//! Lock-step simulation machinery shared by the StepSim crates.
//!
//! This crate knows nothing about networks or messages. It provides the
//! concurrency primitives the message-passing layer is built on: the
//! [`StepBarrier`] rendezvous between a driver thread and its node workers,
//! the [`ExecutionProfiler`] that accounts per-node CPU time and enforces
//! execution timeouts, and the [`SimulationState`] lifecycle shared by nodes
//! and the simulation as a whole.

pub mod barrier;
pub mod cputime;
pub mod log;
pub mod profiler;
pub mod state;

pub use barrier::StepBarrier;
pub use cputime::ThreadCpuClock;
pub use profiler::{ExecutionProfiler, ProfiledProcess};
pub use state::SimulationState;
