//! Error types for Inbox Sentry.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Mailbox protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),
}

/// Configuration-related errors. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Session establishment errors. Abort the current cycle only.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Authentication failed for {host}: {reason}")]
    Authentication { host: String, reason: String },

    #[error("Connection to {host} failed: {reason}")]
    Connection { host: String, reason: String },
}

/// Per-message mailbox operation errors. The affected message is skipped.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Server rejected {command}: {response}")]
    CommandRejected { command: String, response: String },

    #[error("Connection closed by server")]
    ConnectionClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reply transmission errors. The message is still marked read.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build reply: {0}")]
    Build(String),

    #[error("SMTP transport failed: {0}")]
    Transport(String),
}

/// Result type alias for the responder.
pub type Result<T> = std::result::Result<T, Error>;
