use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use mac_lab_abstract::{Packet, PacketState};
use serde::Serialize;

use crate::engine::NodeId;

/// Event classes of the output log. The serialized names are a
/// compatibility contract with the downstream aggregation tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TraceEvent {
    Generated,
    QueueDropped,
    Received,
    Corrupted,
    CorruptedByChannel,
    State,
}

/// One line of the event log: `time,src,dst,event,size`.
#[derive(Debug, Clone, Serialize)]
struct TraceRecord {
    time: f64,
    src: NodeId,
    dst: NodeId,
    event: TraceEvent,
    size: u32,
}

/// Per-node tallies of the log records, accumulated as they are written.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct NodeCounters {
    pub generated: u64,
    pub queue_dropped: u64,
    pub received: u64,
    pub corrupted: u64,
    pub corrupted_by_channel: u64,
    /// Packets handed to the channel. Filled in by the driver.
    pub transmitted: u64,
    /// Packets still waiting in the queue when the run ended.
    pub queued_at_end: u64,
}

/// Writes the per-event CSV log and keeps running totals for the report.
/// Write errors are deferred: handlers stay infallible, and the first error
/// surfaces from [`TraceWriter::finish`] when the run completes.
pub struct TraceWriter {
    writer: csv::Writer<Box<dyn Write>>,
    counters: Vec<NodeCounters>,
    error: Option<csv::Error>,
}

impl TraceWriter {
    pub fn to_path(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::to_writer(BufWriter::new(file)))
    }

    pub fn to_writer(writer: impl Write + 'static) -> Self {
        let sink: Box<dyn Write> = Box::new(writer);
        Self {
            writer: csv::Writer::from_writer(sink),
            counters: Vec::new(),
            error: None,
        }
    }

    pub fn log_state(&mut self, time: f64, node: NodeId) {
        self.write(TraceRecord {
            time,
            src: node,
            dst: node,
            event: TraceEvent::State,
            size: 0,
        });
    }

    pub fn log_generated(&mut self, time: f64, node: NodeId, size: u32) {
        self.node_mut(node).generated += 1;
        self.write(TraceRecord {
            time,
            src: node,
            dst: node,
            event: TraceEvent::Generated,
            size,
        });
    }

    pub fn log_queue_drop(&mut self, time: f64, node: NodeId, size: u32) {
        self.node_mut(node).queue_dropped += 1;
        self.write(TraceRecord {
            time,
            src: node,
            dst: node,
            event: TraceEvent::QueueDropped,
            size,
        });
    }

    /// Record the terminal outcome of a frame at its receiver.
    pub fn log_reception(&mut self, time: f64, src: NodeId, dst: NodeId, packet: &Packet) {
        let event = match packet.state() {
            PacketState::Received => TraceEvent::Received,
            PacketState::Corrupted => TraceEvent::Corrupted,
            PacketState::CorruptedByChannel => TraceEvent::CorruptedByChannel,
            other => unreachable!(
                "packet {} ended reception at node {dst} in non-terminal state {other:?}",
                packet.id()
            ),
        };
        let counters = self.node_mut(dst);
        match event {
            TraceEvent::Received => counters.received += 1,
            TraceEvent::Corrupted => counters.corrupted += 1,
            TraceEvent::CorruptedByChannel => counters.corrupted_by_channel += 1,
            _ => unreachable!(),
        }
        self.write(TraceRecord {
            time,
            src,
            dst,
            event,
            size: packet.size(),
        });
    }

    pub fn counters(&self) -> &[NodeCounters] {
        &self.counters
    }

    /// Flush the sink and surface the first deferred write error, if any.
    pub fn finish(&mut self) -> anyhow::Result<()> {
        if let Some(err) = self.error.take() {
            return Err(err.into());
        }
        self.writer.flush()?;
        Ok(())
    }

    fn write(&mut self, record: TraceRecord) {
        if self.error.is_some() {
            return;
        }
        if let Err(err) = self.writer.serialize(&record) {
            self.error = Some(err);
        }
    }

    fn node_mut(&mut self, node: NodeId) -> &mut NodeCounters {
        if node >= self.counters.len() {
            self.counters.resize_with(node + 1, NodeCounters::default);
        }
        &mut self.counters[node]
    }
}

/// Shared in-memory sink, so tests can read back the CSV a simulation
/// produced.
#[derive(Clone, Default)]
pub struct MemoryTraceBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl MemoryTraceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.bytes.lock().expect("trace buffer poisoned").clone()
    }
}

impl Write for MemoryTraceBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes
            .lock()
            .expect("trace buffer poisoned")
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Serializable end-of-run summary, one entry per node.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// Simulated seconds covered by the run.
    pub duration: f64,
    pub nodes: Vec<NodeCounters>,
}

#[cfg(test)]
mod tests {
    use mac_lab_abstract::{Packet, PacketState};

    use super::{MemoryTraceBuffer, TraceWriter};

    #[test]
    fn writes_the_stable_header_and_fields() {
        let buffer = MemoryTraceBuffer::new();
        let mut trace = TraceWriter::to_writer(buffer.clone());
        trace.log_state(0.0, 1);
        trace.log_generated(0.25, 1, 1000);
        let mut packet = Packet::new(0, 1000, 0.001);
        packet.set_state(PacketState::Receiving);
        packet.set_state(PacketState::Received);
        trace.log_reception(0.5, 0, 1, &packet);
        trace.finish().expect("flush");

        let text = String::from_utf8(buffer.contents()).expect("utf8");
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("time,src,dst,event,size"));
        assert_eq!(lines.next(), Some("0.0,1,1,STATE,0"));
        assert_eq!(lines.next(), Some("0.25,1,1,GENERATED,1000"));
        assert_eq!(lines.next(), Some("0.5,0,1,RECEIVED,1000"));
    }

    #[test]
    fn counters_track_written_records() {
        let mut trace = TraceWriter::to_writer(MemoryTraceBuffer::new());
        trace.log_generated(0.1, 2, 500);
        trace.log_generated(0.2, 2, 600);
        trace.log_queue_drop(0.2, 2, 600);
        let counters = trace.counters();
        assert_eq!(counters[2].generated, 2);
        assert_eq!(counters[2].queue_dropped, 1);
        assert_eq!(counters[0].generated, 0);
    }
}
