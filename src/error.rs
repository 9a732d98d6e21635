//! Error types for mailguard.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Mailbox session error: {0}")]
    Session(#[from] SessionError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Poll loop error: {0}")]
    Poll(#[from] PollError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mailbox session errors.
///
/// Per-call failures (a `NO`/`BAD` reply, an unparsable response) are recoverable:
/// the caller skips the message or the cycle. Connection-level failures mean the
/// session is gone and are reported upward.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Failed to connect to {host}:{port}: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Authentication failed for {username}")]
    AuthFailed { username: String },

    #[error("IMAP command {command} failed: {reason}")]
    Command { command: String, reason: String },

    #[error("Mailbox connection closed: {0}")]
    Disconnected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Whether this error means the session can no longer be used.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Command { .. })
    }
}

/// Vectorizer / model inference errors.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Feature vector has {got} dimensions, model expects {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Model is not fitted: {0}")]
    NotFitted(String),

    #[error("Inference failed: {0}")]
    Inference(String),
}

/// Model training and persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Model file not found: {0}")]
    NotFound(String),

    #[error("Invalid dataset: {0}")]
    Dataset(String),

    #[error("Training failed: {0}")]
    Training(String),

    #[error("Unsupported label convention {found:?}, expected {expected:?}")]
    LabelConvention { expected: String, found: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-message pipeline errors. These never escape a poll cycle.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Fetch failed for message {id}: {source}")]
    Fetch {
        id: String,
        #[source]
        source: SessionError,
    },

    #[error("Classification failed at {stage} stage: {source}")]
    Classification {
        stage: &'static str,
        #[source]
        source: ClassifierError,
    },

    #[error("Quarantine failed for message {id}: {source}")]
    Quarantine {
        id: String,
        #[source]
        source: SessionError,
    },
}

/// Conditions that end the poll loop.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("Mailbox session lost: {0}")]
    SessionFatal(#[source] SessionError),

    #[error("Poll worker failed: {0}")]
    Worker(String),
}

/// Result type alias for mailguard.
pub type Result<T> = std::result::Result<T, Error>;
