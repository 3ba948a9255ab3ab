//! Leader election on a balanced binary tree: candidate ids flood up the
//! tree, the agreed maximum floods back down.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use stepsim_mp::{
    LinkConfig, Message, Network, NetworkConfig, NodeContext, NodeScript, SimulationConfig,
    SimulationRunner,
};

const GREEN: u32 = 0x00ff00;
const RED: u32 = 0xff0000;
const GREY: u32 = 0x808080;

struct TreeLeader {
    node: usize,
    elected: Arc<Mutex<HashMap<usize, i64>>>,
}

impl NodeScript for TreeLeader {
    fn execute(&mut self, ctx: &NodeContext) {
        // Wait for candidates from all neighbours but one; the silent one
        // is the parent for this wave.
        let mut replied: HashMap<usize, i64> = HashMap::new();
        while replied.len() + 1 < ctx.neighbour_count() {
            let candidate = ctx.receive();
            replied.insert(
                candidate.source_index().unwrap(),
                candidate.numeric_data().unwrap(),
            );
        }

        let mut leader = ctx.machine_id() as i64;
        let mut parent = 0;
        for index in 0..ctx.neighbour_count() {
            match replied.get(&index) {
                Some(candidate) => leader = leader.max(*candidate),
                None => parent = index,
            }
        }

        ctx.send(parent, &Message::numeric("CANDIDATE", leader).unwrap());
        ctx.set_colour(GREEN);

        let mut verdict = ctx.receive_from(parent);
        if verdict.tag() == "CANDIDATE" {
            leader = leader.max(verdict.numeric_data().unwrap());
            verdict = Message::numeric("LEADER", leader).unwrap();
        }
        leader = verdict.numeric_data().unwrap();
        for index in 0..ctx.neighbour_count() {
            if index != parent {
                ctx.send(index, &verdict);
            }
        }

        if leader == ctx.machine_id() as i64 {
            ctx.set_colour(RED);
        } else {
            ctx.set_colour(GREY);
        }
        self.elected.lock().unwrap().insert(self.node, leader);
    }
}

#[test]
fn every_node_elects_the_maximum_machine_id() {
    // Balanced binary tree, depth 2: 0 <- {1, 2}, 1 <- {3, 4}, 2 <- {5, 6}.
    let mut config = NetworkConfig::new(7);
    config.initiator = Some(0);
    config.scramble_ids = true;
    config.seed = 2024;
    for (parent, child) in [(0, 1), (0, 2), (1, 3), (1, 4), (2, 5), (2, 6)] {
        config.add_link(LinkConfig::new(parent, child)).unwrap();
    }

    let elected: Arc<Mutex<HashMap<usize, i64>>> = Arc::new(Mutex::new(HashMap::new()));
    let sink = Arc::clone(&elected);
    let network = Network::build(&config, move |node| {
        Box::new(TreeLeader {
            node,
            elected: Arc::clone(&sink),
        }) as Box<dyn NodeScript>
    })
    .unwrap();

    let expected_leader = network
        .nodes()
        .iter()
        .map(|n| n.machine_id() as i64)
        .max()
        .unwrap();

    let runner = SimulationRunner::new(network, SimulationConfig::new(50)).unwrap();
    let results = runner.run();

    let elected = elected.lock().unwrap();
    assert_eq!(elected.len(), 7, "every node must reach a verdict");
    for node in 0..7 {
        assert_eq!(elected[&node], expected_leader, "node {} disagrees", node);
    }

    // Exactly one node won and painted itself red.
    let reds = results
        .events()
        .iter()
        .filter(|e| matches!(e.kind, stepsim_mp::EventKind::ColourChange { colour: RED, .. }))
        .count();
    assert_eq!(reds, 1);
}
