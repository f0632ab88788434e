use thiserror::Error;

/// Failures that abort an analysis run.
#[derive(Debug, Error)]
pub enum ImuError {
    /// Required column(s) absent from the input.
    #[error("schema error: missing column(s) {}", .0.join(", "))]
    Schema(Vec<String>),
    /// Fewer samples remain than a stage requires.
    #[error("insufficient data: {0}")]
    InsufficientData(String),
    /// Caller-supplied configuration violates a stage constraint.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, ImuError>;
