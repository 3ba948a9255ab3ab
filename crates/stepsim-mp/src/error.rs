//! User-facing error types.
//!
//! These cover everything a caller can get wrong before a simulation
//! starts: malformed messages, malformed topologies and invalid run
//! configurations. Faults *inside* a running simulation never surface as
//! errors — user-code failures become failure events confined to their
//! node, and engine invariant violations are bugs and panic.

use thiserror::Error;

/// Validation failure raised before any node worker is started.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SimulationError {
    /// Message tag longer than the allowed maximum.
    #[error("message tag is {len} characters long, limit is {max}")]
    TagTooLong { len: usize, max: usize },
    /// Message payload longer than the allowed maximum.
    #[error("message payload is {len} bytes long, limit is {max}")]
    PayloadTooLarge { len: usize, max: usize },
    /// The topology has no nodes.
    #[error("network must contain at least one node")]
    EmptyNetwork,
    /// Link latency below the one-tick minimum.
    #[error("link latency must be at least 1 tick")]
    InvalidLatency,
    /// Link endpoint outside the node range.
    #[error("link endpoint {node} does not exist in a network of {node_count} nodes")]
    UnknownLinkEndpoint { node: usize, node_count: usize },
    /// A link between the two nodes was already configured.
    #[error("link between nodes {source_node} and {target_node} already exists")]
    DuplicateLink { source_node: usize, target_node: usize },
    /// A link may not connect a node to itself.
    #[error("link source and target must differ (node {node})")]
    SelfLink { node: usize },
    /// Configured initiator outside the node range.
    #[error("initiator {node} does not exist in a network of {node_count} nodes")]
    UnknownInitiator { node: usize, node_count: usize },
    /// Prescribed kill references a node outside the node range.
    #[error("prescribed kill references unknown node {node}")]
    UnknownKillTarget { node: usize },
    /// The simulation must run for at least one timestep.
    #[error("simulation length must be at least 1 timestep")]
    InvalidLength,
    /// A configured node timeout must be positive.
    #[error("node execution timeout must be positive")]
    InvalidTimeout,
}
