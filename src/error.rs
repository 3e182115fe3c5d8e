//! Top-level error types for Switchboard.

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required environment variable: {0}")]
    MissingKey(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Form-state store errors.
///
/// A failed rewrite leaves the in-memory flag set; durability is retried on
/// the next mutation. Callers log and continue — the reply path never fails
/// on a store error.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to persist form state to {path}: {source}")]
    Persist {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Reply-generation errors from the assistant collaborator.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("no assistant credential configured")]
    NotConfigured,

    #[error("completion request failed: {0}")]
    Request(String),

    #[error("completion response carried no text")]
    EmptyCompletion,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Outbound sink errors (CRM mirror, platform reply, team alert).
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("{sink} request failed: {message}")]
    Request { sink: &'static str, message: String },

    #[error("{sink} returned status {status}: {body}")]
    Status {
        sink: &'static str,
        status: u16,
        body: String,
    },

    #[error("smtp delivery failed: {0}")]
    Smtp(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
