//! Error types for mugo-zap.

use std::time::Duration;

/// Top-level error type for the bot.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistence errors from the remote store.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Request to {table} failed: {reason}")]
    Request { table: String, reason: String },

    #[error("{table} responded with status {status}: {body}")]
    Status {
        table: String,
        status: u16,
        body: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

/// Messaging channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to send message on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Reply generator errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },
}

/// Errors raised while dispatching one inbound event.
///
/// These never reach the webhook response; the dispatcher logs them with the
/// failing step and answers the provider as if all went well.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("step {step} failed: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: Box<Error>,
    },
}

impl DispatchError {
    pub fn at(step: &'static str, err: impl Into<Error>) -> Self {
        Self::Step {
            step,
            source: Box::new(err.into()),
        }
    }

    /// Name of the dispatch step that failed.
    pub fn step(&self) -> &'static str {
        match self {
            Self::Step { step, .. } => step,
        }
    }
}
