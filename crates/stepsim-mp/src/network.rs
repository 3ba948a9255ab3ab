//! The network arena: nodes and links owned in one place.

use std::sync::Arc;

use rand::Rng;
use rand::SeedableRng;
use rand_pcg::Pcg64;

use crate::config::{KillConfig, NetworkConfig};
use crate::error::SimulationError;
use crate::link::{Link, LinkId};
use crate::node::{NodeId, NodeProcess};
use crate::script::NodeScript;

/// The simulated network.
///
/// Owns every node and link; everything else refers to them by integer id.
/// Topology is immutable once built. Construction assigns simulation ids
/// in creation order, picks the initiator and (optionally) the machine-id
/// scramble offset from the seeded RNG, and wires each link into both of
/// its endpoints' neighbour lists.
pub struct Network {
    nodes: Vec<Arc<NodeProcess>>,
    links: Arc<Vec<Link>>,
    kills: Vec<KillConfig>,
}

impl Network {
    /// Builds a network from a validated topology, instantiating one
    /// script per node through `factory`.
    pub fn build<F>(config: &NetworkConfig, mut factory: F) -> Result<Self, SimulationError>
    where
        F: FnMut(NodeId) -> Box<dyn NodeScript>,
    {
        config.validate()?;
        let mut rng = Pcg64::seed_from_u64(config.seed);
        let initiator = config
            .initiator
            .unwrap_or_else(|| rng.gen_range(0..config.node_count));
        let scramble = if config.scramble_ids {
            rng.gen_range(0..config.node_count) as u64
        } else {
            0
        };

        let nodes: Vec<Arc<NodeProcess>> = (0..config.node_count)
            .map(|id| {
                let node = NodeProcess::new(factory(id), id == initiator);
                node.set_simulation_id(id, scramble);
                node
            })
            .collect();

        let mut links = Vec::with_capacity(config.links.len());
        for (id, lc) in config.links.iter().enumerate() {
            let link = Link::new(id, lc.source, lc.target, lc.latency);
            nodes[lc.source].add_neighbour(lc.target, id);
            nodes[lc.target].add_neighbour(lc.source, id);
            links.push(link);
        }

        Ok(Self {
            nodes,
            links: Arc::new(links),
            kills: config.kills.clone(),
        })
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn node(&self, id: NodeId) -> &Arc<NodeProcess> {
        &self.nodes[id]
    }

    pub fn nodes(&self) -> &[Arc<NodeProcess>] {
        &self.nodes
    }

    pub fn link(&self, id: LinkId) -> &Link {
        &self.links[id]
    }

    pub(crate) fn links_arc(&self) -> Arc<Vec<Link>> {
        Arc::clone(&self.links)
    }

    pub(crate) fn prescribed_kills(&self) -> &[KillConfig] {
        &self.kills
    }
}
