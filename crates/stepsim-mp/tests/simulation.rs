//! Whole-simulation scenarios on small topologies.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use stepsim_mp::{
    EventKind, FailureCause, LinkConfig, Message, Network, NetworkConfig, NodeContext, NodeScript,
    SimulationConfig, SimulationRunner, SimulationState,
};

type Recorded<T> = Arc<Mutex<T>>;

struct Idle;

impl NodeScript for Idle {
    fn execute(&mut self, _ctx: &NodeContext) {}
}

struct SendOnce {
    message: Message,
}

impl NodeScript for SendOnce {
    fn execute(&mut self, ctx: &NodeContext) {
        ctx.send(0, &self.message);
    }
}

struct ReceiveOnce {
    received: Recorded<Vec<Message>>,
}

impl NodeScript for ReceiveOnce {
    fn execute(&mut self, ctx: &NodeContext) {
        let msg = ctx.receive();
        self.received.lock().unwrap().push(msg);
    }
}

struct ReceiveForever;

impl NodeScript for ReceiveForever {
    fn execute(&mut self, ctx: &NodeContext) {
        loop {
            ctx.receive();
        }
    }
}

fn line(node_count: usize) -> NetworkConfig {
    let mut config = NetworkConfig::new(node_count);
    config.initiator = Some(0);
    for i in 1..node_count {
        config.add_link(LinkConfig::new(i - 1, i)).unwrap();
    }
    config
}

#[test]
fn hello_crosses_a_unit_latency_link() {
    let _ = env_logger::builder().is_test(true).try_init();
    let received: Recorded<Vec<Message>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);

    let network = Network::build(&line(2), move |id| -> Box<dyn NodeScript> {
        match id {
            0 => Box::new(SendOnce {
                message: Message::new("HELLO", "HELLO").unwrap(),
            }),
            _ => Box::new(ReceiveOnce {
                received: Arc::clone(&sink),
            }),
        }
    })
    .unwrap();
    let runner = SimulationRunner::new(network, SimulationConfig::new(10)).unwrap();
    let results = runner.run();

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].tag(), "HELLO");
    assert_eq!(received[0].data(), "HELLO");
    assert_eq!(received[0].sent_at(), Some(0));
    assert_eq!(received[0].arrived_at(), Some(1));
    assert_eq!(received[0].source_index(), Some(0));

    let sent_at = results
        .events()
        .iter()
        .find_map(|e| match e.kind {
            EventKind::MessageSent { .. } => e.timestep(),
            _ => None,
        })
        .unwrap();
    let arrival_at = results
        .events()
        .iter()
        .find_map(|e| match e.kind {
            EventKind::MessageArrival { .. } => e.timestep(),
            _ => None,
        })
        .unwrap();
    let read_at = results
        .events()
        .iter()
        .find_map(|e| match e.kind {
            EventKind::MessageRead { .. } => e.timestep(),
            _ => None,
        })
        .unwrap();
    assert_eq!((sent_at, arrival_at, read_at), (0, 1, 1));

    assert_eq!(results.messages().len(), 1);
    assert_eq!(results.message(0).tag(), "HELLO");
}

#[test]
fn pause_schedules_the_matching_unpause() {
    struct PauseOnce;

    impl NodeScript for PauseOnce {
        fn execute(&mut self, ctx: &NodeContext) {
            ctx.pause(3);
        }
    }

    let config = line(1);
    let network =
        Network::build(&config, |_| Box::new(PauseOnce) as Box<dyn NodeScript>).unwrap();
    let results = SimulationRunner::new(network, SimulationConfig::new(10))
        .unwrap()
        .run();

    let pause = results
        .events()
        .iter()
        .find(|e| matches!(e.kind, EventKind::NodePause { .. }))
        .unwrap();
    let unpause = results
        .events()
        .iter()
        .find(|e| matches!(e.kind, EventKind::NodeUnpause { .. }))
        .unwrap();
    assert_eq!(pause.timestep(), Some(0));
    assert_eq!(unpause.timestep(), Some(3));
}

#[test]
fn arrival_order_interleaves_links() {
    struct Stagger {
        first_delay: Option<u64>,
        tags: Vec<&'static str>,
        gap: u64,
    }

    impl NodeScript for Stagger {
        fn execute(&mut self, ctx: &NodeContext) {
            if let Some(delay) = self.first_delay {
                ctx.pause(delay);
            }
            let mut first = true;
            for tag in &self.tags {
                if !first {
                    ctx.pause(self.gap);
                }
                first = false;
                ctx.send(0, &Message::new(*tag, "x").unwrap());
            }
        }
    }

    let received: Recorded<Vec<Message>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);

    struct ReceiveMany {
        count: usize,
        received: Recorded<Vec<Message>>,
    }

    impl NodeScript for ReceiveMany {
        fn execute(&mut self, ctx: &NodeContext) {
            for _ in 0..self.count {
                let msg = ctx.receive();
                self.received.lock().unwrap().push(msg);
            }
        }
    }

    let mut config = NetworkConfig::new(3);
    config.initiator = Some(0);
    config.add_link(LinkConfig::new(0, 2)).unwrap();
    config.add_link(LinkConfig::new(1, 2)).unwrap();

    let network = Network::build(&config, move |id| -> Box<dyn NodeScript> {
        match id {
            // A0 sent at 0, A1 sent at 2 (arrive at 1 and 3).
            0 => Box::new(Stagger {
                first_delay: None,
                tags: vec!["A0", "A1"],
                gap: 2,
            }),
            // B sent at 1 (arrives at 2).
            1 => Box::new(Stagger {
                first_delay: Some(1),
                tags: vec!["B"],
                gap: 1,
            }),
            _ => Box::new(ReceiveMany {
                count: 3,
                received: Arc::clone(&sink),
            }),
        }
    })
    .unwrap();
    SimulationRunner::new(network, SimulationConfig::new(10))
        .unwrap()
        .run();

    let tags: Vec<String> = received
        .lock()
        .unwrap()
        .iter()
        .map(|m| m.tag().to_string())
        .collect();
    // One busy link does not starve the other: delivery follows arrival
    // order across links.
    assert_eq!(tags, vec!["A0", "B", "A1"]);
}

#[test]
fn receive_from_filters_by_neighbour() {
    let received: Recorded<Vec<Message>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);

    struct ReceiveSpecific {
        received: Recorded<Vec<Message>>,
    }

    impl NodeScript for ReceiveSpecific {
        fn execute(&mut self, ctx: &NodeContext) {
            // Ask for neighbour 1 first even though neighbour 0's message
            // arrives just as early.
            let from_second = ctx.receive_from(1);
            let any = ctx.receive();
            let mut sink = self.received.lock().unwrap();
            sink.push(from_second);
            sink.push(any);
        }
    }

    let mut config = NetworkConfig::new(3);
    config.initiator = Some(0);
    config.add_link(LinkConfig::new(0, 2)).unwrap();
    config.add_link(LinkConfig::new(1, 2)).unwrap();

    let network = Network::build(&config, move |id| -> Box<dyn NodeScript> {
        match id {
            0 => Box::new(SendOnce {
                message: Message::new("X", "from-0").unwrap(),
            }),
            1 => Box::new(SendOnce {
                message: Message::new("Y", "from-1").unwrap(),
            }),
            _ => Box::new(ReceiveSpecific {
                received: Arc::clone(&sink),
            }),
        }
    })
    .unwrap();
    SimulationRunner::new(network, SimulationConfig::new(10))
        .unwrap()
        .run();

    let received = received.lock().unwrap();
    assert_eq!(received[0].tag(), "Y");
    assert_eq!(received[0].source_index(), Some(1));
    assert_eq!(received[1].tag(), "X");
}

#[test]
fn resending_a_received_message_transmits_a_fresh_copy() {
    let received: Recorded<Vec<Message>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);

    struct Relay;

    impl NodeScript for Relay {
        fn execute(&mut self, ctx: &NodeContext) {
            let msg = ctx.receive();
            // Forward the received message object as-is; the engine must
            // transmit a copy rather than alias it.
            ctx.send(1, &msg);
        }
    }

    let network = Network::build(&line(3), move |id| -> Box<dyn NodeScript> {
        match id {
            0 => Box::new(SendOnce {
                message: Message::new("HOP", "payload").unwrap(),
            }),
            1 => Box::new(Relay),
            _ => Box::new(ReceiveOnce {
                received: Arc::clone(&sink),
            }),
        }
    })
    .unwrap();
    let results = SimulationRunner::new(network, SimulationConfig::new(10))
        .unwrap()
        .run();

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].data(), "payload");

    let messages = results.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(
        (messages[0].sent_at(), messages[0].arrived_at()),
        (Some(0), Some(1))
    );
    assert_eq!(
        (messages[1].sent_at(), messages[1].arrived_at()),
        (Some(1), Some(2))
    );
}

#[test]
fn broadcast_reaches_every_neighbour() {
    struct Flood {
        received: Recorded<Vec<Message>>,
    }

    impl NodeScript for Flood {
        fn execute(&mut self, ctx: &NodeContext) {
            if ctx.is_initiator() {
                ctx.send_all(&Message::new("FLOOD", "wave").unwrap());
            } else {
                let msg = ctx.receive();
                self.received.lock().unwrap().push(msg);
            }
        }
    }

    let received: Recorded<Vec<Message>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);

    let mut config = NetworkConfig::new(3);
    config.initiator = Some(0);
    config.add_link(LinkConfig::new(0, 1)).unwrap();
    config.add_link(LinkConfig::with_latency(0, 2, 4)).unwrap();

    let network = Network::build(&config, move |_| {
        Box::new(Flood {
            received: Arc::clone(&sink),
        }) as Box<dyn NodeScript>
    })
    .unwrap();
    let results = SimulationRunner::new(network, SimulationConfig::new(10))
        .unwrap()
        .run();

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 2);
    // Per-link latencies apply independently.
    let mut arrivals: Vec<u64> = received.iter().map(|m| m.arrived_at().unwrap()).collect();
    arrivals.sort_unstable();
    assert_eq!(arrivals, vec![1, 4]);
    assert_eq!(results.messages().len(), 2);
}

#[test]
fn prescribed_kill_stops_the_node_at_its_timestep() {
    // The victim pauses past its own death so a stale unpause event is
    // left behind; it must be dropped silently, not applied or logged.
    struct PauseThenListen;

    impl NodeScript for PauseThenListen {
        fn execute(&mut self, ctx: &NodeContext) {
            ctx.pause(6);
            loop {
                ctx.receive();
            }
        }
    }

    let mut config = NetworkConfig::new(4);
    config.initiator = Some(0);
    config.add_link(LinkConfig::new(0, 1)).unwrap();
    config.add_link(LinkConfig::new(0, 2)).unwrap();
    config.add_link(LinkConfig::new(0, 3)).unwrap();
    config.add_kill(3, 5);

    let network = Network::build(&config, |id| -> Box<dyn NodeScript> {
        match id {
            0 => Box::new(Idle),
            3 => Box::new(PauseThenListen),
            _ => Box::new(ReceiveForever),
        }
    })
    .unwrap();
    let runner = SimulationRunner::new(network, SimulationConfig::new(10)).unwrap();

    // Observe the victim's state the moment the kill event is processed.
    let seen: Recorded<Vec<(u64, SimulationState)>> = Arc::new(Mutex::new(Vec::new()));
    let observer = Arc::clone(&seen);
    let net = Arc::clone(runner.network());
    runner.scheduler().add_listener(move |event| {
        if let EventKind::NodeKill { node } = event.kind {
            observer
                .lock()
                .unwrap()
                .push((event.timestep().unwrap(), net.node(node).state()));
        }
    });

    let net = Arc::clone(runner.network());
    let results = runner.run();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    // By the time the kill event is republished the node has fully
    // unwound, exactly at timestep 5.
    assert_eq!(*seen.first().unwrap(), (5, SimulationState::PostSimulation));

    let kill = results
        .events()
        .iter()
        .find(|e| matches!(e.kind, EventKind::NodeKill { node: 3 }))
        .unwrap();
    assert_eq!(kill.timestep(), Some(5));
    // No event concerning node 3 after the kill.
    assert!(results
        .events()
        .iter()
        .all(|e| e.node() != Some(3) || e.timestep() <= Some(5)));
    for node in net.nodes() {
        assert_eq!(node.state(), SimulationState::PostSimulation);
    }
}

#[test]
fn a_panicking_node_fails_alone() {
    struct Explode;

    impl NodeScript for Explode {
        fn execute(&mut self, _ctx: &NodeContext) {
            panic!("boom");
        }
    }

    struct PauseAndFinish;

    impl NodeScript for PauseAndFinish {
        fn execute(&mut self, ctx: &NodeContext) {
            ctx.pause(2);
            ctx.set_colour(0x00ff00);
        }
    }

    let network = Network::build(&line(3), |id| -> Box<dyn NodeScript> {
        match id {
            1 => Box::new(Explode),
            _ => Box::new(PauseAndFinish),
        }
    })
    .unwrap();
    let runner = SimulationRunner::new(network, SimulationConfig::new(10)).unwrap();
    let net = Arc::clone(runner.network());
    let results = runner.run();

    let failures: Vec<_> = results
        .events()
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::NodeFailure { node, cause } => Some((*node, cause.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, 1);
    assert!(matches!(&failures[0].1, FailureCause::Script(m) if m == "boom"));

    // The others ran to completion: both paused, unpaused and recoloured.
    let unpauses = results
        .events()
        .iter()
        .filter(|e| matches!(e.kind, EventKind::NodeUnpause { .. }))
        .count();
    let colours = results
        .events()
        .iter()
        .filter(|e| matches!(e.kind, EventKind::ColourChange { .. }))
        .count();
    assert_eq!((unpauses, colours), (2, 2));
    for node in net.nodes() {
        assert_eq!(node.state(), SimulationState::PostSimulation);
    }
}

#[test]
fn engine_calls_during_setup_fail_the_node() {
    struct SendsInSetup;

    impl NodeScript for SendsInSetup {
        fn setup(&mut self, ctx: &NodeContext) {
            ctx.send(0, &Message::new("EARLY", "x").unwrap());
        }

        fn execute(&mut self, _ctx: &NodeContext) {}
    }

    let network = Network::build(&line(2), |id| -> Box<dyn NodeScript> {
        match id {
            0 => Box::new(SendsInSetup),
            _ => Box::new(Idle),
        }
    })
    .unwrap();
    let results = SimulationRunner::new(network, SimulationConfig::new(5))
        .unwrap()
        .run();

    let failure = results
        .events()
        .iter()
        .find_map(|e| match &e.kind {
            EventKind::NodeFailure { node, cause } => Some((*node, cause.clone())),
            _ => None,
        })
        .unwrap();
    assert_eq!(failure.0, 0);
    assert!(matches!(failure.1, FailureCause::ProtocolViolation(_)));
    // Nothing was transmitted.
    assert!(results.messages().is_empty());
}

#[test]
fn machine_ids_are_scrambled_but_unique() {
    let seen: Recorded<HashMap<usize, u64>> = Arc::new(Mutex::new(HashMap::new()));

    struct RecordId {
        id: usize,
        seen: Recorded<HashMap<usize, u64>>,
    }

    impl NodeScript for RecordId {
        fn setup(&mut self, ctx: &NodeContext) {
            // The machine id must already be available during setup.
            self.seen.lock().unwrap().insert(self.id, ctx.machine_id());
        }

        fn execute(&mut self, _ctx: &NodeContext) {}
    }

    let mut config = line(4);
    config.scramble_ids = true;
    config.seed = 99;
    let sink = Arc::clone(&seen);
    let network = Network::build(&config, move |id| {
        Box::new(RecordId {
            id,
            seen: Arc::clone(&sink),
        }) as Box<dyn NodeScript>
    })
    .unwrap();
    SimulationRunner::new(network, SimulationConfig::new(3))
        .unwrap()
        .run();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 4);
    let offset = seen[&0];
    for (id, machine_id) in seen.iter() {
        assert_eq!(*machine_id, *id as u64 + offset);
    }
}

#[test]
fn rejects_invalid_run_configs() {
    let network = Network::build(&line(2), |_| Box::new(Idle) as Box<dyn NodeScript>).unwrap();
    assert!(SimulationRunner::new(network, SimulationConfig::new(0)).is_err());

    let network = Network::build(&line(2), |_| Box::new(Idle) as Box<dyn NodeScript>).unwrap();
    let config = SimulationConfig {
        length: 5,
        node_timeout: Some(std::time::Duration::ZERO),
    };
    assert!(SimulationRunner::new(network, config).is_err());
}
