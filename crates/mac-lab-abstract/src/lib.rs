pub mod config;
pub mod distribution;
pub mod error;
pub mod packet;
pub mod scenario;

pub use config::SimConfig;
pub use distribution::DistributionSpec;
pub use error::ConfigError;
pub use packet::{Packet, PacketId, PacketState};
pub use scenario::{NodeSpec, Protocol, Scenario};
