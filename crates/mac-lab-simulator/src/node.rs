use std::collections::VecDeque;

use mac_lab_abstract::{
    ConfigError, DistributionSpec, NodeSpec, Packet, PacketId, PacketState, Protocol, SimConfig,
};
use rand::Rng;
use rand::rngs::StdRng;
use tracing::debug;

use crate::channel::Channel;
use crate::distribution::Sampler;
use crate::engine::{Event, EventHandle, EventKind, NodeId, Scheduler};
use crate::trace::TraceWriter;

/// Carrier sense window for the trivial and simple schemes.
const SENSE_TIME: f64 = 50e-6;
/// Slack added to the longest possible frame when arming the RX timeout.
const RX_TIMEOUT_GUARD: f64 = 10e-6;

/// What the node is currently trying to do. Channel occupancy is tracked
/// separately by `receiving_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacState {
    Idle,
    Tx,
    Rx,
    Proc,
    Sensing,
    /// Waiting to transmit after deferring in p-persistent carrier sensing.
    Wt,
}

/// Engine services handed to a node for the duration of one event dispatch.
pub struct SimContext<'a> {
    pub scheduler: &'a mut Scheduler,
    pub channel: &'a Channel,
    pub rng: &'a mut StdRng,
    pub trace: &'a mut TraceWriter,
    pub next_packet_id: &'a mut PacketId,
}

impl SimContext<'_> {
    fn alloc_packet_id(&mut self) -> PacketId {
        let id = *self.next_packet_id;
        *self.next_packet_id += 1;
        id
    }
}

/// One contender on the shared medium: generates traffic, queues it, and
/// runs the MAC state machine of its configured protocol.
pub struct Node {
    id: NodeId,
    datarate: f64,
    queue_capacity: usize,
    protocol: Protocol,
    persistence: f64,
    interarrival: Sampler,
    size: Sampler,
    processing: Sampler,
    /// Backoff draw for the p-persistent wait.
    wt_delay: Sampler,
    /// How long the node tolerates staying in RX without decoding anything:
    /// the airtime of a maximum-size frame plus a small guard.
    rx_timeout_delay: f64,
    state: MacState,
    queue: VecDeque<u32>,
    current_pkt: Option<Packet>,
    /// Frames whose START_RX fired but whose END_RX has not, regardless of
    /// what this node is doing.
    receiving_count: u32,
    rx_timeout: Option<EventHandle>,
    end_sensing: Option<EventHandle>,
    wt_timeout: Option<EventHandle>,
    transmitted: u64,
}

impl Node {
    pub fn new(id: NodeId, spec: &NodeSpec, config: &SimConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        spec.validate(id)?;
        let persistence = match spec.protocol {
            Protocol::Simple => spec
                .persistence
                .ok_or(ConfigError::MissingPersistence { node: id })?,
            _ => spec.persistence.unwrap_or(0.0),
        };
        let max_tx_time = f64::from(config.maxsize) * 8.0 / config.datarate;
        Ok(Self {
            id,
            datarate: config.datarate,
            queue_capacity: config.queue,
            protocol: spec.protocol,
            persistence,
            interarrival: Sampler::from_spec(&config.interarrival, "interarrival")?,
            size: Sampler::from_spec(&config.size, "size")?,
            processing: Sampler::from_spec(&config.processing, "processing")?,
            wt_delay: Sampler::from_spec(
                &DistributionSpec::Exponential {
                    mean: 10.0 * max_tx_time,
                },
                "wt backoff",
            )?,
            rx_timeout_delay: max_tx_time + RX_TIMEOUT_GUARD,
            state: MacState::Idle,
            queue: VecDeque::new(),
            current_pkt: None,
            receiving_count: 0,
            rx_timeout: None,
            end_sensing: None,
            wt_timeout: None,
            transmitted: 0,
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn state(&self) -> MacState {
        self.state
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn receiving_count(&self) -> u32 {
        self.receiving_count
    }

    /// Packets handed to the channel so far, including one still on the air.
    pub fn transmitted(&self) -> u64 {
        self.transmitted
    }

    /// Starts node operation: records the initial state and schedules the
    /// first packet arrival.
    pub fn initialize(&mut self, ctx: &mut SimContext) {
        ctx.trace.log_state(ctx.scheduler.now(), self.id);
        self.schedule_next_arrival(ctx);
    }

    pub fn handle_event(&mut self, event: Event, ctx: &mut SimContext) {
        assert_eq!(
            event.dst, self.id,
            "event for node {} dispatched to node {}",
            event.dst, self.id
        );
        match event.kind {
            EventKind::PacketArrival => self.handle_arrival(ctx),
            EventKind::StartRx { packet } => self.handle_start_rx(packet, event.src, ctx),
            EventKind::EndRx { packet } => self.handle_end_rx(packet, event.src, ctx),
            EventKind::EndTx { packet } => self.handle_end_tx(&packet, ctx),
            EventKind::EndProc => self.handle_end_proc(ctx),
            EventKind::RxTimeout => self.handle_rx_timeout(ctx),
            EventKind::EndSensing => self.handle_end_sensing(ctx),
            EventKind::WtTimeout => self.handle_wt_timeout(ctx),
        }
    }

    fn set_state(&mut self, next: MacState, ctx: &mut SimContext) {
        debug!(node = self.id, from = ?self.state, to = ?next, "state transition");
        self.state = next;
        ctx.trace.log_state(ctx.scheduler.now(), self.id);
    }

    fn schedule_next_arrival(&mut self, ctx: &mut SimContext) {
        let arrival = self.interarrival.sample(ctx.rng);
        ctx.scheduler.schedule(Event {
            time: ctx.scheduler.now() + arrival,
            kind: EventKind::PacketArrival,
            dst: self.id,
            src: self.id,
        });
    }

    fn sample_size(&mut self, rng: &mut StdRng) -> u32 {
        self.size.sample(rng).round().max(1.0) as u32
    }

    /// A new packet is ready at this node. Transmit right away if idle,
    /// queue it otherwise, and keep the arrival process going.
    fn handle_arrival(&mut self, ctx: &mut SimContext) {
        let size = self.sample_size(ctx.rng);
        ctx.trace.log_generated(ctx.scheduler.now(), self.id, size);
        if self.state == MacState::Idle {
            assert!(
                self.queue.is_empty(),
                "node {}: idle with {} queued packets",
                self.id,
                self.queue.len()
            );
            self.transmit_packet(size, ctx);
            self.set_state(MacState::Tx, ctx);
        } else if self.queue_capacity == 0 || self.queue.len() < self.queue_capacity {
            self.queue.push_back(size);
            debug!(node = self.id, queue = self.queue.len(), "packet queued");
        } else {
            ctx.trace.log_queue_drop(ctx.scheduler.now(), self.id, size);
        }
        self.schedule_next_arrival(ctx);
    }

    /// A frame starts arriving. Whether the node can decode it depends on
    /// what it is doing and on how many other frames are already in the air.
    fn handle_start_rx(&mut self, packet: Packet, src: NodeId, ctx: &mut SimContext) {
        let mut packet = packet;
        if self.state == MacState::Idle && self.receiving_count == 0 {
            packet = self.receive_packet(packet, ctx);
        } else if self.state == MacState::Idle {
            // Another signal is in the air while we sit idle. Only ALOHA can
            // get here: after a transmission it resumes without sensing, so
            // frames that started meanwhile went undetected and this one is
            // lost as well.
            assert_eq!(
                self.protocol,
                Protocol::Aloha,
                "node {}: idle with frames in the air under carrier sensing",
                self.id
            );
            packet.set_state(PacketState::Corrupted);
        } else if self.state == MacState::Sensing && self.receiving_count == 0 {
            assert!(
                self.protocol.uses_carrier_sensing(),
                "node {}: sensing under ALOHA",
                self.id
            );
            if let Some(handle) = self.end_sensing.take() {
                ctx.scheduler.cancel(handle);
            }
            packet = self.receive_packet(packet, ctx);
        } else if self.state == MacState::Wt && self.receiving_count == 0 {
            assert_eq!(
                self.protocol,
                Protocol::Simple,
                "node {}: waiting to transmit without p-persistence",
                self.id
            );
            if let Some(handle) = self.wt_timeout.take() {
                ctx.scheduler.cancel(handle);
            }
            packet = self.receive_packet(packet, ctx);
        } else {
            // Busy transmitting, decoding, or processing. The frame we are
            // decoding, if any, collides with the new one; the new one is
            // undecodable either way.
            if self.state == MacState::Rx
                && let Some(current) = self.current_pkt.as_mut()
            {
                current.set_state(PacketState::Corrupted);
            }
            packet.set_state(PacketState::Corrupted);
        }
        ctx.scheduler.schedule(Event {
            time: ctx.scheduler.now() + packet.duration(),
            kind: EventKind::EndRx { packet },
            dst: self.id,
            src,
        });
        self.receiving_count += 1;
    }

    /// Lock onto a frame: the channel at this node must be clear.
    fn receive_packet(&mut self, mut packet: Packet, ctx: &mut SimContext) -> Packet {
        assert_eq!(
            self.receiving_count, 0,
            "node {}: locking onto a frame with others in the air",
            self.id
        );
        assert!(
            self.current_pkt.is_none(),
            "node {}: locking onto a frame while already decoding",
            self.id
        );
        assert!(
            self.rx_timeout.is_none(),
            "node {}: RX timeout already armed",
            self.id
        );
        packet.set_state(PacketState::Receiving);
        self.current_pkt = Some(packet.clone());
        self.rx_timeout = Some(ctx.scheduler.schedule(Event {
            time: ctx.scheduler.now() + self.rx_timeout_delay,
            kind: EventKind::RxTimeout,
            dst: self.id,
            src: self.id,
        }));
        self.set_state(MacState::Rx, ctx);
        packet
    }

    /// A frame stopped arriving. Decide its fate if we were decoding it,
    /// and resume operation once the channel drains.
    fn handle_end_rx(&mut self, packet: Packet, src: NodeId, ctx: &mut SimContext) {
        assert!(
            self.protocol == Protocol::Aloha || self.state != MacState::Idle,
            "node {}: idle with frames in the air under carrier sensing",
            self.id
        );
        let mut packet = packet;
        if let Some(current) = &self.current_pkt
            && current.id() == packet.id()
        {
            assert_eq!(
                self.state,
                MacState::Rx,
                "node {}: END_RX for the decoded frame outside RX",
                self.id
            );
            // Collisions since START_RX were recorded on our copy; the
            // event's copy is stale.
            packet = current.clone();
        }
        if self.state == MacState::Rx {
            if packet.state() == PacketState::Receiving {
                // The frame survived every overlap. Whether it decodes
                // correctly depends on the channel: always under the disk
                // model, else with the distance-dependent probability.
                let draw: f64 = ctx.rng.random();
                if draw <= packet.correct_reception_probability {
                    packet.set_state(PacketState::Received);
                } else {
                    packet.set_state(PacketState::CorruptedByChannel);
                }
                assert!(
                    self.current_pkt
                        .as_ref()
                        .is_some_and(|current| current.id() == packet.id()),
                    "node {}: decoded a frame it was not locked onto",
                    self.id
                );
            }
            if self
                .current_pkt
                .as_ref()
                .is_some_and(|current| current.id() == packet.id())
            {
                self.current_pkt = None;
            }
            // We may hold no current packet here: an overlapping frame that
            // outlives the one we decoded keeps us in RX until it ends.
            if self.receiving_count == 1 {
                self.switch_to_proc(ctx);
                match self.rx_timeout.take() {
                    Some(handle) => ctx.scheduler.cancel(handle),
                    None => unreachable!("node {}: in RX without an armed timeout", self.id),
                }
            }
        } else if self.state == MacState::Sensing
            && self.receiving_count == 1
            && self.end_sensing.is_none()
        {
            // The sense window expired on a busy channel and this is the
            // last frame on the air: the channel just became free.
            assert!(
                self.protocol.uses_carrier_sensing(),
                "node {}: sensing under ALOHA",
                self.id
            );
            if self.queue.is_empty() {
                self.set_state(MacState::Idle, ctx);
            } else {
                self.handle_transmission(ctx);
            }
        }
        assert!(
            self.receiving_count > 0,
            "node {}: END_RX without a matching START_RX",
            self.id
        );
        self.receiving_count -= 1;
        ctx.trace
            .log_reception(ctx.scheduler.now(), src, self.id, &packet);
    }

    /// The node sat in RX longer than any single frame can last, so every
    /// overlapping frame has ended meanwhile. Forces progress to PROC.
    fn handle_rx_timeout(&mut self, ctx: &mut SimContext) {
        assert_eq!(
            self.state,
            MacState::Rx,
            "node {}: RX timeout outside RX",
            self.id
        );
        assert!(
            self.current_pkt.is_none(),
            "node {}: RX timeout while still decoding",
            self.id
        );
        self.switch_to_proc(ctx);
        self.rx_timeout = None;
    }

    fn handle_end_tx(&mut self, packet: &Packet, ctx: &mut SimContext) {
        assert_eq!(
            self.state,
            MacState::Tx,
            "node {}: END_TX outside TX",
            self.id
        );
        match self.current_pkt.take() {
            Some(current) => assert_eq!(
                current.id(),
                packet.id(),
                "node {}: END_TX for a frame it was not transmitting",
                self.id
            ),
            None => unreachable!("node {}: END_TX with no frame in flight", self.id),
        }
        self.switch_to_proc(ctx);
    }

    fn switch_to_proc(&mut self, ctx: &mut SimContext) {
        let proc_time = self.processing.sample(ctx.rng);
        ctx.scheduler.schedule(Event {
            time: ctx.scheduler.now() + proc_time,
            kind: EventKind::EndProc,
            dst: self.id,
            src: self.id,
        });
        self.set_state(MacState::Proc, ctx);
    }

    fn handle_end_proc(&mut self, ctx: &mut SimContext) {
        assert_eq!(
            self.state,
            MacState::Proc,
            "node {}: END_PROC outside PROC",
            self.id
        );
        if self.protocol.uses_carrier_sensing() {
            self.enter_sensing(ctx);
        } else if self.queue.is_empty() {
            self.set_state(MacState::Idle, ctx);
        } else {
            self.handle_transmission(ctx);
        }
    }

    fn enter_sensing(&mut self, ctx: &mut SimContext) {
        assert!(
            self.protocol.uses_carrier_sensing(),
            "node {}: sensing under ALOHA",
            self.id
        );
        assert!(
            self.end_sensing.is_none(),
            "node {}: sense window already open",
            self.id
        );
        self.end_sensing = Some(ctx.scheduler.schedule(Event {
            time: ctx.scheduler.now() + SENSE_TIME,
            kind: EventKind::EndSensing,
            dst: self.id,
            src: self.id,
        }));
        self.set_state(MacState::Sensing, ctx);
    }

    fn handle_end_sensing(&mut self, ctx: &mut SimContext) {
        assert!(
            self.protocol.uses_carrier_sensing(),
            "node {}: END_SENSING under ALOHA",
            self.id
        );
        assert_eq!(
            self.state,
            MacState::Sensing,
            "node {}: END_SENSING outside SENSING",
            self.id
        );
        self.end_sensing = None;
        if self.receiving_count == 0 {
            if self.queue.is_empty() {
                self.set_state(MacState::Idle, ctx);
            } else {
                self.handle_transmission(ctx);
            }
        } else if self.protocol == Protocol::Simple && !self.queue.is_empty() {
            let draw: f64 = ctx.rng.random();
            if draw > self.persistence {
                self.set_state(MacState::Wt, ctx);
                self.schedule_wt_timeout(ctx);
            }
            // On the persistent draw the node keeps waiting in SENSING with
            // no window open; the END_RX that frees the channel moves it on.
        }
        // Trivial carrier sensing with a busy channel: wait for END_RX.
    }

    fn schedule_wt_timeout(&mut self, ctx: &mut SimContext) {
        assert_eq!(
            self.protocol,
            Protocol::Simple,
            "node {}: WT backoff without p-persistence",
            self.id
        );
        assert_eq!(
            self.state,
            MacState::Wt,
            "node {}: WT backoff outside WT",
            self.id
        );
        assert!(
            self.end_sensing.is_none(),
            "node {}: WT backoff with a sense window open",
            self.id
        );
        assert!(
            self.wt_timeout.is_none(),
            "node {}: WT backoff already armed",
            self.id
        );
        let delay = self.wt_delay.sample(ctx.rng);
        self.wt_timeout = Some(ctx.scheduler.schedule(Event {
            time: ctx.scheduler.now() + delay,
            kind: EventKind::WtTimeout,
            dst: self.id,
            src: self.id,
        }));
    }

    fn handle_wt_timeout(&mut self, ctx: &mut SimContext) {
        assert_eq!(
            self.protocol,
            Protocol::Simple,
            "node {}: WT timeout without p-persistence",
            self.id
        );
        assert_eq!(
            self.state,
            MacState::Wt,
            "node {}: WT timeout outside WT",
            self.id
        );
        assert!(
            !self.queue.is_empty(),
            "node {}: waiting to transmit with an empty queue",
            self.id
        );
        self.wt_timeout = None;
        if self.receiving_count == 0 {
            self.handle_transmission(ctx);
        } else {
            let draw: f64 = ctx.rng.random();
            if draw > self.persistence {
                self.schedule_wt_timeout(ctx);
            } else {
                // Back to 1-p mode: wait passively for the channel to drain.
                self.set_state(MacState::Sensing, ctx);
            }
        }
    }

    /// Dequeue the head packet and put it on the air.
    fn handle_transmission(&mut self, ctx: &mut SimContext) {
        let size = match self.queue.pop_front() {
            Some(size) => size,
            None => unreachable!("node {}: transmission with an empty queue", self.id),
        };
        self.transmit_packet(size, ctx);
        self.set_state(MacState::Tx, ctx);
        debug!(node = self.id, queue = self.queue.len(), "dequeued head packet");
    }

    /// Generate a packet of the given size, notify the channel, and
    /// schedule the end of our own transmission.
    fn transmit_packet(&mut self, size: u32, ctx: &mut SimContext) {
        assert!(
            self.current_pkt.is_none(),
            "node {}: transmitting with a frame already in flight",
            self.id
        );
        let duration = f64::from(size) * 8.0 / self.datarate;
        let packet = Packet::new(ctx.alloc_packet_id(), size, duration);
        ctx.channel.start_transmission(self.id, &packet, ctx.scheduler);
        ctx.scheduler.schedule(Event {
            time: ctx.scheduler.now() + duration,
            kind: EventKind::EndTx {
                packet: packet.clone(),
            },
            dst: self.id,
            src: self.id,
        });
        self.transmitted += 1;
        self.current_pkt = Some(packet);
    }
}
