use thiserror::Error;

/// Top-level error type for the Stratus system.
///
/// The validation variants (`MissingCustomerId`, `MissingInstanceId`,
/// `MissingGroupId`) are returned synchronously to callers before any query
/// executes. `Storage` wraps backing-store failures on reads and writes.
/// `Sweep` is reserved for asynchronous expiry deletions and is never
/// surfaced to the caller whose write triggered the evaluation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StratusError {
    #[error("must provide a customer id")]
    MissingCustomerId,

    #[error("must provide an instance id")]
    MissingInstanceId,

    #[error("must provide a group id")]
    MissingGroupId,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Sweep error: {0}")]
    Sweep(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StratusError {
    /// Whether this error is a request-validation failure rather than a
    /// backing-store failure.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            StratusError::MissingCustomerId
                | StratusError::MissingInstanceId
                | StratusError::MissingGroupId
        )
    }
}

impl From<toml::de::Error> for StratusError {
    fn from(err: toml::de::Error) -> Self {
        StratusError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for StratusError {
    fn from(err: toml::ser::Error) -> Self {
        StratusError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for StratusError {
    fn from(err: serde_json::Error) -> Self {
        StratusError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Stratus operations.
pub type Result<T> = std::result::Result<T, StratusError>;
