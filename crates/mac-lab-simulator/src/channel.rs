use mac_lab_abstract::Packet;
use tracing::debug;

use crate::engine::{Event, EventKind, NodeId, Scheduler};

/// Speed of light in m/s, used to compute propagation delay.
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// The shared broadcast medium. Knows where every node sits, which nodes
/// can hear each other, and delivers the start of every transmission to the
/// transmitter's neighbors. The end of reception is scheduled by the
/// receiving node itself.
#[derive(Debug)]
pub struct Channel {
    range: f64,
    realistic_propagation: bool,
    positions: Vec<(f64, f64)>,
    /// Neighbor lists in registration order. Iteration order is part of the
    /// determinism contract.
    neighbors: Vec<Vec<NodeId>>,
}

impl Channel {
    pub fn new(range: f64, realistic_propagation: bool) -> Self {
        Self {
            range,
            realistic_propagation,
            positions: Vec::new(),
            neighbors: Vec::new(),
        }
    }

    /// Add a node at (x, y), linking it with every registered node closer
    /// than the communication range. Returns the new node's id.
    pub fn register_node(&mut self, x: f64, y: f64) -> NodeId {
        let id = self.positions.len();
        self.positions.push((x, y));
        self.neighbors.push(Vec::new());
        for other in 0..id {
            if self.distance(id, other) < self.range {
                self.neighbors[other].push(id);
                self.neighbors[id].push(other);
            }
        }
        debug!(
            node = id,
            neighbors = self.neighbors[id].len(),
            "registered node"
        );
        id
    }

    pub fn node_count(&self) -> usize {
        self.positions.len()
    }

    pub fn neighbors(&self, node: NodeId) -> &[NodeId] {
        &self.neighbors[node]
    }

    pub fn distance(&self, a: NodeId, b: NodeId) -> f64 {
        let (ax, ay) = self.positions[a];
        let (bx, by) = self.positions[b];
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }

    /// Notify every neighbor of `source` that a frame is on the air: each
    /// gets its own copy of the packet, delayed by distance / c. Under
    /// realistic propagation the copy also carries the distance-dependent
    /// probability of correct reception.
    pub fn start_transmission(&self, source: NodeId, packet: &Packet, scheduler: &mut Scheduler) {
        for &neighbor in &self.neighbors[source] {
            let distance = self.distance(source, neighbor);
            let propagation_delay = distance / SPEED_OF_LIGHT;
            let mut copy = packet.clone();
            if self.realistic_propagation {
                copy.correct_reception_probability = 1.0 - (distance / self.range).powf(1.0 / 3.0);
            }
            scheduler.schedule(Event {
                time: scheduler.now() + propagation_delay,
                kind: EventKind::StartRx { packet: copy },
                dst: neighbor,
                src: source,
            });
        }
    }
}
