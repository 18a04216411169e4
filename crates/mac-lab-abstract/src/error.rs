use thiserror::Error;

/// Errors raised while validating a scenario, before the event loop starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("node {node}: persistence is required for simple carrier sensing")]
    MissingPersistence { node: usize },

    #[error("node {node}: persistence must be within [0, 1], got {value}")]
    PersistenceOutOfRange { node: usize, value: f64 },

    #[error("{param} must be positive, got {value}")]
    NonPositive { param: &'static str, value: f64 },

    #[error("invalid {param} distribution: {reason}")]
    InvalidDistribution {
        param: &'static str,
        reason: String,
    },

    #[error("a scenario needs at least one node")]
    EmptyTopology,
}
