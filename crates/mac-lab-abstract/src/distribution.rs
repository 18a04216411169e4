use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Declarative description of a sampling distribution, as written in a
/// scenario file. The simulator crate turns a spec into an actual sampler
/// backed by the per-run RNG; this type only carries the parameters and
/// validates them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DistributionSpec {
    /// Always returns `value`.
    Constant { value: f64 },
    /// Uniform over `[min, max)`.
    Uniform { min: f64, max: f64 },
    /// Exponential with the given mean (rate = 1 / mean).
    Exponential { mean: f64 },
}

impl DistributionSpec {
    /// Fail fast on parameters that cannot produce a nonnegative real.
    pub fn validate(&self, param: &'static str) -> Result<(), ConfigError> {
        match *self {
            DistributionSpec::Constant { value } => {
                if !value.is_finite() || value < 0.0 {
                    return Err(ConfigError::InvalidDistribution {
                        param,
                        reason: format!("constant value {value} must be a nonnegative real"),
                    });
                }
            }
            DistributionSpec::Uniform { min, max } => {
                if !min.is_finite() || !max.is_finite() || min < 0.0 || min > max {
                    return Err(ConfigError::InvalidDistribution {
                        param,
                        reason: format!("uniform bounds [{min}, {max}) must satisfy 0 <= min <= max"),
                    });
                }
            }
            DistributionSpec::Exponential { mean } => {
                if !mean.is_finite() || mean <= 0.0 {
                    return Err(ConfigError::InvalidDistribution {
                        param,
                        reason: format!("exponential mean {mean} must be positive"),
                    });
                }
            }
        }
        Ok(())
    }

    /// Expected value of the distribution. Used by the launcher to encode
    /// the inter-arrival setting into the output file name.
    pub fn mean(&self) -> f64 {
        match *self {
            DistributionSpec::Constant { value } => value,
            DistributionSpec::Uniform { min, max } => (min + max) / 2.0,
            DistributionSpec::Exponential { mean } => mean,
        }
    }
}
