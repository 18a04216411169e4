use serde::{Deserialize, Serialize};

use crate::distribution::DistributionSpec;
use crate::error::ConfigError;

/// Global simulation parameters, shared by every node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Transmission speed in bits per second.
    pub datarate: f64,
    /// Per-node queue capacity in packets. 0 means unbounded.
    pub queue: usize,
    /// Maximum packet size in bytes. Bounds the RX timeout and the
    /// p-persistent wait.
    pub maxsize: u32,
    /// Communication range in meters.
    pub range: f64,
    /// Probabilistic reception depending on distance, instead of the disk
    /// model.
    pub realistic_propagation: bool,
    /// Simulated time horizon in seconds.
    pub horizon: f64,
    /// RNG seed for the whole run.
    pub seed: u64,
    /// Inter-arrival time between generated packets, in seconds.
    pub interarrival: DistributionSpec,
    /// Packet size, in bytes.
    pub size: DistributionSpec,
    /// Processing time after a transmission or reception, in seconds.
    pub processing: DistributionSpec,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            datarate: 8_000_000.0,
            queue: 0,
            maxsize: 1500,
            range: 100.0,
            realistic_propagation: false,
            horizon: 1.0,
            seed: 0,
            interarrival: DistributionSpec::Exponential { mean: 0.001 },
            size: DistributionSpec::Uniform { min: 32.0, max: 1500.0 },
            processing: DistributionSpec::Constant { value: 1e-6 },
        }
    }
}

impl SimConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (param, value) in [
            ("datarate", self.datarate),
            ("maxsize", self.maxsize as f64),
            ("range", self.range),
            ("horizon", self.horizon),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::NonPositive { param, value });
            }
        }
        self.interarrival.validate("interarrival")?;
        self.size.validate("size")?;
        self.processing.validate("processing")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::SimConfig;

    #[test]
    fn default_config_is_valid() {
        assert!(SimConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_nonpositive_datarate() {
        let config = SimConfig {
            datarate: -1.0,
            ..SimConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
