//! Error types for pop3-client

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error on {addr} during {command}: {source}")]
    Transport {
        addr: String,
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Not a compatible POP3 server at {addr}: {greeting:?}")]
    ProtocolMismatch { addr: String, greeting: String },

    #[error("Couldn't authenticate {username} at {addr} using {method}: {detail}")]
    AuthFailure {
        addr: String,
        username: String,
        method: String,
        detail: String,
    },

    /// The connection to a server without UIDL support was lost. The
    /// synthesized identifiers of that session cannot be re-mapped onto a
    /// new one, so the engine refuses to reconnect.
    #[error("Can not re-connect reliably to {addr}: server does not support UIDL")]
    DegradedResumeRefused { addr: String },

    #[error("No such message: {id}")]
    NotFound { id: String },

    #[error("{addr} rejected {command}: {reply}")]
    ServerNegative {
        addr: String,
        command: String,
        reply: String,
    },

    #[error("Malformed reply from {addr} to {command}: {line:?}")]
    MalformedReply {
        addr: String,
        command: String,
        line: String,
    },
}

impl Error {
    /// Whether the error means the connection itself is unusable, as
    /// opposed to the server refusing a command.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Tls(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
