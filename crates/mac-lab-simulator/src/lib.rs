pub mod channel;
pub mod distribution;
pub mod engine;
pub mod node;
pub mod sim;
pub mod trace;

pub use channel::{Channel, SPEED_OF_LIGHT};
pub use engine::{Event, EventHandle, EventKind, NodeId, Scheduler};
pub use node::{MacState, Node};
pub use sim::Simulation;
pub use trace::{MemoryTraceBuffer, NodeCounters, SimulationReport, TraceWriter};
