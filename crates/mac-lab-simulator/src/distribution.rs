use mac_lab_abstract::{ConfigError, DistributionSpec};
use rand::rngs::StdRng;
use rand_distr::{Distribution, Exp, Uniform};

/// A distribution spec bound to concrete `rand_distr` samplers. Built once
/// at construction so a malformed spec fails before the event loop starts.
#[derive(Debug, Clone, Copy)]
pub enum Sampler {
    Constant(f64),
    Uniform(Uniform<f64>),
    Exponential(Exp<f64>),
}

impl Sampler {
    pub fn from_spec(spec: &DistributionSpec, param: &'static str) -> Result<Self, ConfigError> {
        spec.validate(param)?;
        match *spec {
            DistributionSpec::Constant { value } => Ok(Sampler::Constant(value)),
            DistributionSpec::Uniform { min, max } => {
                let inner =
                    Uniform::new(min, max).map_err(|err| ConfigError::InvalidDistribution {
                        param,
                        reason: err.to_string(),
                    })?;
                Ok(Sampler::Uniform(inner))
            }
            DistributionSpec::Exponential { mean } => {
                let inner =
                    Exp::new(1.0 / mean).map_err(|err| ConfigError::InvalidDistribution {
                        param,
                        reason: err.to_string(),
                    })?;
                Ok(Sampler::Exponential(inner))
            }
        }
    }

    /// Draw the next nonnegative real.
    pub fn sample(&self, rng: &mut StdRng) -> f64 {
        match self {
            Sampler::Constant(value) => *value,
            Sampler::Uniform(inner) => inner.sample(rng),
            Sampler::Exponential(inner) => inner.sample(rng),
        }
    }
}
