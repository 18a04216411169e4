use mac_lab_abstract::{ConfigError, PacketId, Scenario};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info};

use crate::channel::Channel;
use crate::engine::Scheduler;
use crate::node::{Node, SimContext};
use crate::trace::{NodeCounters, SimulationReport, TraceWriter};

/// One complete simulation run. Owns everything mutable — scheduler,
/// channel, nodes, RNG, log — so replications across seeds are just
/// independent instances.
pub struct Simulation {
    scheduler: Scheduler,
    channel: Channel,
    nodes: Vec<Node>,
    rng: StdRng,
    trace: TraceWriter,
    next_packet_id: PacketId,
    horizon: f64,
}

impl Simulation {
    /// Build the topology. Fails fast on an invalid scenario; the event
    /// loop is never entered on a bad configuration.
    pub fn new(scenario: &Scenario, trace: TraceWriter) -> Result<Self, ConfigError> {
        scenario.validate()?;
        let config = &scenario.config;
        let mut channel = Channel::new(config.range, config.realistic_propagation);
        let mut nodes = Vec::with_capacity(scenario.nodes.len());
        for spec in &scenario.nodes {
            let id = channel.register_node(spec.x, spec.y);
            nodes.push(Node::new(id, spec, config)?);
        }
        Ok(Self {
            scheduler: Scheduler::new(),
            channel,
            nodes,
            rng: StdRng::seed_from_u64(config.seed),
            trace,
            next_packet_id: 0,
            horizon: config.horizon,
        })
    }

    /// Seed every node's arrival process, then dispatch events in
    /// (time, insertion) order until the queue drains or the horizon is
    /// reached. The log written so far stays valid either way.
    pub fn run(&mut self) -> anyhow::Result<SimulationReport> {
        info!(
            nodes = self.nodes.len(),
            horizon = self.horizon,
            "starting simulation"
        );
        for i in 0..self.nodes.len() {
            let mut ctx = SimContext {
                scheduler: &mut self.scheduler,
                channel: &self.channel,
                rng: &mut self.rng,
                trace: &mut self.trace,
                next_packet_id: &mut self.next_packet_id,
            };
            self.nodes[i].initialize(&mut ctx);
        }
        let mut dispatched: u64 = 0;
        while let Some(event) = self.scheduler.pop_within(self.horizon) {
            debug!(
                time = event.time,
                kind = event.kind.name(),
                dst = event.dst,
                "dispatching"
            );
            let node = &mut self.nodes[event.dst];
            let mut ctx = SimContext {
                scheduler: &mut self.scheduler,
                channel: &self.channel,
                rng: &mut self.rng,
                trace: &mut self.trace,
                next_packet_id: &mut self.next_packet_id,
            };
            node.handle_event(event, &mut ctx);
            dispatched += 1;
        }
        self.trace.finish()?;
        info!(
            dispatched,
            duration = self.scheduler.now(),
            "simulation complete"
        );
        Ok(self.report())
    }

    pub fn now(&self) -> f64 {
        self.scheduler.now()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn report(&self) -> SimulationReport {
        let mut nodes = self.trace.counters().to_vec();
        nodes.resize_with(self.nodes.len(), NodeCounters::default);
        for node in &self.nodes {
            let entry = &mut nodes[node.id()];
            entry.transmitted = node.transmitted();
            entry.queued_at_end = node.queue_len() as u64;
        }
        SimulationReport {
            duration: self.scheduler.now(),
            nodes,
        }
    }
}

#[cfg(test)]
mod tests {
    use mac_lab_abstract::{DistributionSpec, NodeSpec, Protocol, Scenario, SimConfig};

    use super::Simulation;
    use crate::trace::{MemoryTraceBuffer, SimulationReport, TraceWriter};

    fn scenario(config: SimConfig, nodes: Vec<NodeSpec>) -> Scenario {
        Scenario {
            name: "test".to_string(),
            description: String::new(),
            config,
            nodes,
        }
    }

    fn aloha(x: f64, y: f64) -> NodeSpec {
        NodeSpec {
            x,
            y,
            protocol: Protocol::Aloha,
            persistence: None,
        }
    }

    fn with_protocol(x: f64, y: f64, protocol: Protocol, persistence: Option<f64>) -> NodeSpec {
        NodeSpec {
            x,
            y,
            protocol,
            persistence,
        }
    }

    fn run(scenario: &Scenario) -> (SimulationReport, String) {
        let buffer = MemoryTraceBuffer::new();
        let mut sim = Simulation::new(scenario, TraceWriter::to_writer(buffer.clone()))
            .expect("valid scenario");
        let report = sim.run().expect("run to completion");
        let log = String::from_utf8(buffer.contents()).expect("utf8 log");
        (report, log)
    }

    fn count_events(log: &str, event: &str) -> usize {
        log.lines()
            .filter(|line| line.split(',').nth(3) == Some(event))
            .count()
    }

    /// Two nodes 1 m apart under ALOHA with packets longer than the
    /// inter-arrival gap: nearly everything collides.
    #[test]
    fn saturated_aloha_pair_mostly_collides() {
        let config = SimConfig {
            datarate: 8_000_000.0,
            seed: 42,
            interarrival: DistributionSpec::Constant { value: 0.0005 },
            size: DistributionSpec::Constant { value: 1000.0 },
            processing: DistributionSpec::Constant { value: 1e-6 },
            ..SimConfig::default()
        };
        let (report, log) = run(&scenario(config, vec![aloha(0.0, 0.0), aloha(1.0, 0.0)]));

        for counters in &report.nodes {
            let incoming = counters.received + counters.corrupted + counters.corrupted_by_channel;
            assert!(incoming > 0, "saturated channel must see traffic");
            assert!(
                counters.corrupted * 2 > incoming,
                "expected most receptions corrupted, got {} of {incoming}",
                counters.corrupted
            );
            // Disk reception: the channel itself never corrupts.
            assert_eq!(counters.corrupted_by_channel, 0);
            // Unbounded queue: nothing is dropped.
            assert_eq!(counters.queue_dropped, 0);
        }
        assert_eq!(count_events(&log, "CORRUPTED_BY_CHANNEL"), 0);
        assert_eq!(count_events(&log, "QUEUE_DROPPED"), 0);
    }

    /// Two nodes 200 m apart with 100 m range never hear each other.
    #[test]
    fn out_of_range_pair_sees_no_receptions() {
        let config = SimConfig {
            seed: 7,
            interarrival: DistributionSpec::Constant { value: 0.0005 },
            size: DistributionSpec::Constant { value: 1000.0 },
            ..SimConfig::default()
        };
        let (report, log) = run(&scenario(config, vec![aloha(0.0, 0.0), aloha(200.0, 0.0)]));

        for counters in &report.nodes {
            assert!(counters.generated > 0);
            assert_eq!(
                counters.received + counters.corrupted + counters.corrupted_by_channel,
                0
            );
        }
        assert_eq!(
            count_events(&log, "GENERATED"),
            (report.nodes[0].generated + report.nodes[1].generated) as usize
        );
        assert_eq!(count_events(&log, "RECEIVED"), 0);
        assert_eq!(count_events(&log, "CORRUPTED"), 0);
    }

    /// A single node transmits everything it generates and receives
    /// nothing, regardless of offered load.
    #[test]
    fn single_node_transmits_all_and_receives_nothing() {
        let config = SimConfig {
            seed: 3,
            interarrival: DistributionSpec::Exponential { mean: 0.002 },
            size: DistributionSpec::Uniform { min: 32.0, max: 1500.0 },
            ..SimConfig::default()
        };
        let (report, log) = run(&scenario(config, vec![aloha(0.0, 0.0)]));

        let counters = &report.nodes[0];
        assert!(counters.generated > 100);
        assert_eq!(counters.queue_dropped, 0);
        assert_eq!(
            counters.generated,
            counters.transmitted + counters.queued_at_end
        );
        assert_eq!(count_events(&log, "RECEIVED"), 0);
        assert_eq!(count_events(&log, "CORRUPTED"), 0);
    }

    /// Every frame put on the air produces exactly one terminal reception
    /// record per neighbor of the transmitter.
    #[test]
    fn receptions_match_transmissions_times_neighbors() {
        // Arrivals at 0.4 and 0.8 s; all frames end well before the horizon.
        let config = SimConfig {
            seed: 11,
            interarrival: DistributionSpec::Constant { value: 0.4 },
            size: DistributionSpec::Constant { value: 1000.0 },
            processing: DistributionSpec::Constant { value: 1e-6 },
            ..SimConfig::default()
        };
        let nodes = vec![aloha(0.0, 0.0), aloha(0.0, 0.0), aloha(0.0, 0.0)];
        let (report, _log) = run(&scenario(config, nodes));

        let transmitted: u64 = report.nodes.iter().map(|n| n.transmitted).sum();
        let terminals: u64 = report
            .nodes
            .iter()
            .map(|n| n.received + n.corrupted + n.corrupted_by_channel)
            .sum();
        assert_eq!(transmitted, 6);
        // Each of the three co-located nodes has two neighbors.
        assert_eq!(terminals, transmitted * 2);
    }

    /// Packet conservation at each node: everything generated is either
    /// transmitted, still queued, or was dropped.
    #[test]
    fn generated_packets_are_conserved() {
        let config = SimConfig {
            queue: 2,
            seed: 42,
            interarrival: DistributionSpec::Constant { value: 0.0005 },
            size: DistributionSpec::Constant { value: 1000.0 },
            ..SimConfig::default()
        };
        let scenario = scenario(config, vec![aloha(0.0, 0.0), aloha(1.0, 0.0)]);
        let buffer = MemoryTraceBuffer::new();
        let mut sim = Simulation::new(&scenario, TraceWriter::to_writer(buffer.clone()))
            .expect("valid scenario");
        let report = sim.run().expect("run to completion");

        for (counters, node) in report.nodes.iter().zip(sim.nodes()) {
            assert!(counters.queue_dropped > 0, "bounded queue must overflow");
            assert_eq!(
                counters.generated,
                counters.transmitted + counters.queued_at_end + counters.queue_dropped
            );
            assert_eq!(node.receiving_count(), 0);
        }
    }

    /// Trivial carrier sensing avoids most of the collisions ALOHA suffers
    /// under the same seed and load.
    #[test]
    fn carrier_sensing_collides_less_than_aloha() {
        let config = SimConfig {
            datarate: 1_000_000.0,
            maxsize: 500,
            seed: 5,
            horizon: 2.0,
            interarrival: DistributionSpec::Exponential { mean: 0.01 },
            size: DistributionSpec::Constant { value: 500.0 },
            processing: DistributionSpec::Constant { value: 1e-6 },
            ..SimConfig::default()
        };
        let topology = |protocol| {
            (0..10)
                .map(|_| with_protocol(0.0, 0.0, protocol, None))
                .collect::<Vec<_>>()
        };
        let (aloha_report, _) = run(&scenario(config.clone(), topology(Protocol::Aloha)));
        let (trivial_report, _) = run(&scenario(config, topology(Protocol::Trivial)));

        let corrupted = |report: &SimulationReport| -> u64 {
            report.nodes.iter().map(|n| n.corrupted).sum()
        };
        let incoming = |report: &SimulationReport| -> u64 {
            report
                .nodes
                .iter()
                .map(|n| n.received + n.corrupted + n.corrupted_by_channel)
                .sum()
        };
        assert!(incoming(&aloha_report) > 0 && incoming(&trivial_report) > 0);
        let aloha_rate = corrupted(&aloha_report) as f64 / incoming(&aloha_report) as f64;
        let trivial_rate = corrupted(&trivial_report) as f64 / incoming(&trivial_report) as f64;
        assert!(
            trivial_rate < aloha_rate,
            "trivial {trivial_rate} vs aloha {aloha_rate}"
        );
    }

    /// p-persistent sensing with p = 0 under rising load: the drop rate
    /// grows with the offered load and the disk channel never corrupts.
    #[test]
    fn simple_zero_persistence_drop_rate_grows_with_load() {
        let base = SimConfig {
            datarate: 1_000_000.0,
            maxsize: 500,
            queue: 5,
            seed: 9,
            horizon: 0.5,
            size: DistributionSpec::Constant { value: 500.0 },
            processing: DistributionSpec::Constant { value: 1e-6 },
            ..SimConfig::default()
        };
        let topology: Vec<_> = (0..10)
            .map(|_| with_protocol(0.0, 0.0, Protocol::Simple, Some(0.0)))
            .collect();

        let mut drop_rates = Vec::new();
        for mean in [0.01, 0.001, 0.0001] {
            let config = SimConfig {
                interarrival: DistributionSpec::Exponential { mean },
                ..base.clone()
            };
            let (report, _) = run(&scenario(config, topology.clone()));
            let generated: u64 = report.nodes.iter().map(|n| n.generated).sum();
            let dropped: u64 = report.nodes.iter().map(|n| n.queue_dropped).sum();
            let corrupted_by_channel: u64 =
                report.nodes.iter().map(|n| n.corrupted_by_channel).sum();
            assert_eq!(corrupted_by_channel, 0);
            drop_rates.push(dropped as f64 / generated as f64);
        }
        assert!(
            drop_rates[0] < drop_rates[1] && drop_rates[1] < drop_rates[2],
            "drop rates not monotone: {drop_rates:?}"
        );
    }

    /// Realistic reception near the range boundary: the correct-reception
    /// probability collapses to 1 - 0.99^(1/3), so nearly every clean frame
    /// is lost to the channel.
    #[test]
    fn realistic_reception_near_boundary_corrupts_most_frames() {
        let config = SimConfig {
            realistic_propagation: true,
            seed: 21,
            horizon: 2.0,
            interarrival: DistributionSpec::Exponential { mean: 0.005 },
            size: DistributionSpec::Constant { value: 1000.0 },
            ..SimConfig::default()
        };
        let (report, _) = run(&scenario(config, vec![aloha(0.0, 0.0), aloha(99.0, 0.0)]));

        let channel_lost: u64 = report.nodes.iter().map(|n| n.corrupted_by_channel).sum();
        let received: u64 = report.nodes.iter().map(|n| n.received).sum();
        assert!(channel_lost > 0, "boundary reception must lose frames");
        assert!(
            channel_lost > received,
            "p = {:.4} should lose most frames, got {received} received vs {channel_lost} lost",
            1.0 - 0.99f64.powf(1.0 / 3.0)
        );
    }

    /// The determinism contract: identical inputs, byte-identical logs.
    #[test]
    fn identical_runs_produce_identical_logs() {
        let config = SimConfig {
            seed: 1234,
            interarrival: DistributionSpec::Exponential { mean: 0.001 },
            size: DistributionSpec::Uniform { min: 32.0, max: 1500.0 },
            processing: DistributionSpec::Exponential { mean: 1e-5 },
            horizon: 0.5,
            ..SimConfig::default()
        };
        let nodes = vec![
            aloha(0.0, 0.0),
            with_protocol(10.0, 0.0, Protocol::Trivial, None),
            with_protocol(0.0, 10.0, Protocol::Simple, Some(0.5)),
        ];
        let scenario = scenario(config, nodes);

        let (_, first) = run(&scenario);
        let (_, second) = run(&scenario);
        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    /// An invalid configuration never reaches the event loop.
    #[test]
    fn invalid_scenarios_fail_at_construction() {
        let config = SimConfig {
            datarate: -5.0,
            ..SimConfig::default()
        };
        let bad = scenario(config, vec![aloha(0.0, 0.0)]);
        let result = Simulation::new(&bad, TraceWriter::to_writer(MemoryTraceBuffer::new()));
        assert!(result.is_err());

        let missing_persistence = scenario(
            SimConfig::default(),
            vec![with_protocol(0.0, 0.0, Protocol::Simple, None)],
        );
        let result = Simulation::new(
            &missing_persistence,
            TraceWriter::to_writer(MemoryTraceBuffer::new()),
        );
        assert!(result.is_err());
    }
}
