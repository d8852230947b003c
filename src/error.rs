//! Error types for the mixing pipeline and peer rebroadcast.

use std::time::Duration;

/// Failures that abort the admission-to-storage sequence for one event.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// An admission policy refused the event.
    #[error("{0}")]
    Rejected(String),

    /// Open HTTP submission is only available while the pubkey allowlist is empty.
    #[error("This relay is not open for public submissions")]
    SubmissionsClosed,

    /// HTTP submission without any content.
    #[error("Content cannot be empty")]
    EmptyContent,

    /// The relay identity could not sign the mixed event.
    #[error("failed to sign mixed event: {0}")]
    Signing(#[from] SignError),

    /// The store refused the mixed event.
    #[error("failed to save mixed event: {0}")]
    Storage(#[source] anyhow::Error),
}

impl PipelineError {
    /// Machine-readable NIP-01 prefix used in `OK` messages.
    pub fn prefix(&self) -> &'static str {
        match self {
            PipelineError::Rejected(_) | PipelineError::SubmissionsClosed => "blocked",
            PipelineError::EmptyContent => "invalid",
            PipelineError::Signing(_) | PipelineError::Storage(_) => "error",
        }
    }

    /// Message sent back to a WebSocket publisher, e.g. `blocked: pubkey not whitelisted`.
    pub fn client_message(&self) -> String {
        format!("{}: {}", self.prefix(), self)
    }
}

/// Relay identity failures.
#[derive(Debug, thiserror::Error)]
pub enum SignError {
    #[error("relay private key is not valid hex: {0}")]
    NotHex(#[from] hex::FromHexError),

    #[error("invalid relay private key: {0}")]
    InvalidKey(#[from] secp256k1::Error),

    #[error("failed to hash event: {0}")]
    Hash(#[source] anyhow::Error),
}

/// Failure talking to one peer relay. Collected as strings, never propagated.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("failed to connect to relay {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to publish event to relay {url}: {source}")]
    Publish {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("timed out rebroadcasting to relay {url} after {after:?}")]
    Timeout { url: String, after: Duration },
}
