use serde::{Deserialize, Serialize};

use crate::config::SimConfig;
use crate::error::ConfigError;

/// Medium access scheme run by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Unslotted ALOHA: transmit as soon as a packet is ready.
    Aloha,
    /// Non-persistent carrier sensing: sense, transmit only on idle.
    Trivial,
    /// p-persistent carrier sensing: on busy, defer with probability 1 - p.
    Simple,
}

impl Protocol {
    pub fn uses_carrier_sensing(&self) -> bool {
        matches!(self, Protocol::Trivial | Protocol::Simple)
    }
}

/// One node of the topology as written in a scenario file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Position in meters.
    pub x: f64,
    pub y: f64,
    pub protocol: Protocol,
    /// Probability of transmitting after sensing a busy channel. Required
    /// for `simple`, ignored otherwise.
    pub persistence: Option<f64>,
}

impl NodeSpec {
    pub fn validate(&self, node: usize) -> Result<(), ConfigError> {
        if let Some(value) = self.persistence {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::PersistenceOutOfRange { node, value });
            }
        }
        if self.protocol == Protocol::Simple && self.persistence.is_none() {
            return Err(ConfigError::MissingPersistence { node });
        }
        Ok(())
    }
}

/// A complete simulation input: global parameters plus the topology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: SimConfig,
    pub nodes: Vec<NodeSpec>,
}

impl Scenario {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.config.validate()?;
        if self.nodes.is_empty() {
            return Err(ConfigError::EmptyTopology);
        }
        for (id, node) in self.nodes.iter().enumerate() {
            node.validate(id)?;
        }
        Ok(())
    }
}
