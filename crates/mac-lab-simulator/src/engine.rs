use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use mac_lab_abstract::Packet;
use ordered_float::OrderedFloat;

pub type NodeId = usize;

/// What happened, and to whom. RX/TX events carry the frame involved; the
/// rest are pure timers.
#[derive(Debug, Clone)]
pub enum EventKind {
    PacketArrival,
    StartRx { packet: Packet },
    EndRx { packet: Packet },
    EndTx { packet: Packet },
    EndProc,
    RxTimeout,
    EndSensing,
    WtTimeout,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::PacketArrival => "PACKET_ARRIVAL",
            EventKind::StartRx { .. } => "START_RX",
            EventKind::EndRx { .. } => "END_RX",
            EventKind::EndTx { .. } => "END_TX",
            EventKind::EndProc => "END_PROC",
            EventKind::RxTimeout => "RX_TIMEOUT",
            EventKind::EndSensing => "END_SENSING",
            EventKind::WtTimeout => "WT_TIMEOUT",
        }
    }
}

/// A pending occurrence. `src` is the transmitter for RX events and the
/// destination itself for everything else.
#[derive(Debug, Clone)]
pub struct Event {
    pub time: f64,
    pub kind: EventKind,
    pub dst: NodeId,
    pub src: NodeId,
}

/// Opaque token returned by [`Scheduler::schedule`], used to cancel the
/// event before it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle(u64);

#[derive(Debug)]
struct QueuedEvent {
    time: OrderedFloat<f64>,
    seq: u64,
    event: Event,
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for QueuedEvent {}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse comparison for time: smallest time pops first, ties broken
        // by insertion order.
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Priority queue of pending events keyed by (time, insertion order), owner
/// of the simulated clock.
///
/// Cancellation tombstones the handle; tombstoned entries are skipped at pop
/// without advancing the clock.
#[derive(Debug, Default)]
pub struct Scheduler {
    queue: BinaryHeap<QueuedEvent>,
    cancelled: HashSet<u64>,
    next_seq: u64,
    clock: f64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current simulated time in seconds. Monotonically non-decreasing.
    pub fn now(&self) -> f64 {
        self.clock
    }

    pub fn len(&self) -> usize {
        self.queue.len() - self.cancelled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn schedule(&mut self, event: Event) -> EventHandle {
        assert!(
            event.time >= self.clock,
            "{} for node {} scheduled at {} with clock already at {}",
            event.kind.name(),
            event.dst,
            event.time,
            self.clock
        );
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(QueuedEvent {
            time: OrderedFloat(event.time),
            seq,
            event,
        });
        EventHandle(seq)
    }

    /// Remove a previously scheduled event. Cancelling a handle that was
    /// never issued is a programming error.
    pub fn cancel(&mut self, handle: EventHandle) {
        debug_assert!(handle.0 < self.next_seq, "cancelling unknown event handle");
        self.cancelled.insert(handle.0);
    }

    /// Time of the next live event, pruning tombstones from the top.
    pub fn peek_time(&mut self) -> Option<f64> {
        self.prune();
        self.queue.peek().map(|entry| entry.time.into_inner())
    }

    /// Pop the next live event and advance the clock to its time.
    pub fn pop(&mut self) -> Option<Event> {
        self.pop_within(f64::INFINITY)
    }

    /// Pop the next live event if it fires strictly before `horizon`.
    /// Leaves later events in the queue and the clock untouched otherwise.
    pub fn pop_within(&mut self, horizon: f64) -> Option<Event> {
        self.prune();
        if self.queue.peek()?.time.into_inner() >= horizon {
            return None;
        }
        let entry = self.queue.pop()?;
        self.clock = entry.event.time;
        Some(entry.event)
    }

    fn prune(&mut self) {
        while let Some(entry) = self.queue.peek() {
            if !self.cancelled.contains(&entry.seq) {
                break;
            }
            if let Some(dropped) = self.queue.pop() {
                self.cancelled.remove(&dropped.seq);
            }
        }
    }
}
