use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    GraphValidation(#[from] GraphValidationError),

    #[error("layout did not stabilize within {elapsed:?} ({iterations} iterations)")]
    SimulationTimeout { iterations: usize, elapsed: Duration },

    #[error("layout was cancelled before the first tick completed")]
    Cancelled,
}

/// Structurally invalid configuration. Out-of-range numbers are clamped instead.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("layout bounds must be finite and positive (got {width} x {height})")]
    InvalidBounds { width: f64, height: f64 },

    #[error("unknown layout preset: {name}")]
    UnknownPreset { name: String },

    #[error("invalid layout config JSON: {message}")]
    Json { message: String },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphValidationError {
    #[error("graph has no nodes")]
    EmptyGraph,

    #[error("graph contains a duplicate node id: {node_id}")]
    DuplicateNode { node_id: String },

    #[error("graph contains an edge with a missing endpoint: {edge_id} -> {node_id}")]
    MissingEndpoint { edge_id: String, node_id: String },
}
