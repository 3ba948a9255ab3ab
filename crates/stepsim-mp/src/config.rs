//! Topology and run configuration.
//!
//! These structs are the contract with the external topology provider:
//! plain serde-derived data, validated before anything is built. Reading
//! or writing them from files is the caller's business.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SimulationError;
use crate::link::MIN_LATENCY;
use crate::node::NodeId;

/// One edge of the topology.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub source: NodeId,
    pub target: NodeId,
    pub latency: u64,
}

impl LinkConfig {
    /// A link with the minimum (unit) latency.
    pub fn new(source: NodeId, target: NodeId) -> Self {
        Self {
            source,
            target,
            latency: MIN_LATENCY,
        }
    }

    pub fn with_latency(source: NodeId, target: NodeId, latency: u64) -> Self {
        Self { source, target, latency }
    }
}

/// A prescribed halt of a node at a fixed timestep.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillConfig {
    pub node: NodeId,
    pub timestep: u64,
}

/// The topology of a simulated network.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub node_count: usize,
    #[serde(default)]
    pub links: Vec<LinkConfig>,
    /// Add a uniform random offset to the public machine ids.
    #[serde(default)]
    pub scramble_ids: bool,
    /// Explicit initiator node; one is chosen by the seeded RNG if absent.
    #[serde(default)]
    pub initiator: Option<NodeId>,
    /// Seed for initiator selection and id scrambling.
    #[serde(default)]
    pub seed: u64,
    /// Prescribed node kills.
    #[serde(default)]
    pub kills: Vec<KillConfig>,
}

impl NetworkConfig {
    pub fn new(node_count: usize) -> Self {
        Self {
            node_count,
            links: Vec::new(),
            scramble_ids: false,
            initiator: None,
            seed: 0,
            kills: Vec::new(),
        }
    }

    /// Adds a link, validating it against the current topology.
    pub fn add_link(&mut self, link: LinkConfig) -> Result<(), SimulationError> {
        self.check_link(&link)?;
        self.links.push(link);
        Ok(())
    }

    /// Schedules a node to be halted at the given timestep.
    pub fn add_kill(&mut self, node: NodeId, timestep: u64) {
        self.kills.push(KillConfig { node, timestep });
    }

    fn check_link(&self, link: &LinkConfig) -> Result<(), SimulationError> {
        check_link_shape(self.node_count, link)?;
        let pair = ordered(link.source, link.target);
        if self
            .links
            .iter()
            .any(|l| ordered(l.source, l.target) == pair)
        {
            return Err(SimulationError::DuplicateLink {
                source_node: link.source,
                target_node: link.target,
            });
        }
        Ok(())
    }

    /// Full validation, for configs that were built externally.
    pub fn validate(&self) -> Result<(), SimulationError> {
        if self.node_count == 0 {
            return Err(SimulationError::EmptyNetwork);
        }
        let mut seen = HashSet::new();
        for link in &self.links {
            check_link_shape(self.node_count, link)?;
            if !seen.insert(ordered(link.source, link.target)) {
                return Err(SimulationError::DuplicateLink {
                    source_node: link.source,
                    target_node: link.target,
                });
            }
        }
        if let Some(initiator) = self.initiator {
            if initiator >= self.node_count {
                return Err(SimulationError::UnknownInitiator {
                    node: initiator,
                    node_count: self.node_count,
                });
            }
        }
        for kill in &self.kills {
            if kill.node >= self.node_count {
                return Err(SimulationError::UnknownKillTarget { node: kill.node });
            }
        }
        Ok(())
    }
}

/// Run parameters for the simulation driver.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Number of timesteps to simulate; no event at or past this tick is
    /// processed.
    pub length: u64,
    /// CPU-time budget per node between blocking points; a node exceeding
    /// it is force-terminated by the profiler. `None` disables the sweep.
    #[serde(default)]
    pub node_timeout: Option<Duration>,
}

impl SimulationConfig {
    pub fn new(length: u64) -> Self {
        Self {
            length,
            node_timeout: None,
        }
    }

    pub fn with_node_timeout(length: u64, node_timeout: Duration) -> Self {
        Self {
            length,
            node_timeout: Some(node_timeout),
        }
    }
}

fn check_link_shape(node_count: usize, link: &LinkConfig) -> Result<(), SimulationError> {
    if link.source >= node_count {
        return Err(SimulationError::UnknownLinkEndpoint {
            node: link.source,
            node_count,
        });
    }
    if link.target >= node_count {
        return Err(SimulationError::UnknownLinkEndpoint {
            node: link.target,
            node_count,
        });
    }
    if link.source == link.target {
        return Err(SimulationError::SelfLink { node: link.source });
    }
    if link.latency < MIN_LATENCY {
        return Err(SimulationError::InvalidLatency);
    }
    Ok(())
}

fn ordered(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}
