//! Error kinds the core distinguishes, per the error-handling design.
//!
//! Most call sites propagate with `anyhow::Result`/`?`; [`A2rchiError`] exists
//! for the handful of places a caller needs to branch on error *kind* rather
//! than just log or display it (HTTP status mapping, scheduler bookkeeping).

use thiserror::Error;

/// A typed error kind distinguished by callers that need more than a message.
#[derive(Debug, Error)]
pub enum A2rchiError {
    /// Malformed or missing required configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// A single file could not be loaded or chunked during reconciliation.
    #[error("failed to load resource {hash}: {reason}")]
    ResourceLoad { hash: String, reason: String },

    /// A single remote call made by a collector failed.
    #[error("collector '{collector}' failed on item '{item}': {reason}")]
    Collector {
        collector: String,
        item: String,
        reason: String,
    },

    /// A pipeline invocation failed in a way that must be surfaced to the caller.
    #[error("pipeline '{pipeline}' failed: {reason}")]
    Pipeline { pipeline: String, reason: String },

    /// A conversation was requested by a client identity that does not own it.
    #[error("client '{client_id}' may not access conversation '{conversation_id}'")]
    ConversationAccess {
        client_id: String,
        conversation_id: String,
    },

    /// `server_received_ts - client_sent_ts` exceeded the client's declared
    /// budget before the LLM was ever invoked.
    #[error("request exceeded its {client_timeout_ms}ms deadline by the time it reached the server ({elapsed_ms}ms elapsed)")]
    DeadlineExceeded { elapsed_ms: u64, client_timeout_ms: u64 },
}

impl A2rchiError {
    /// The HTTP-style status class this error kind maps to.
    pub fn status_code(&self) -> u16 {
        match self {
            A2rchiError::Config(_) => 500,
            A2rchiError::ResourceLoad { .. } => 500,
            A2rchiError::Collector { .. } => 502,
            A2rchiError::Pipeline { .. } => 500,
            A2rchiError::ConversationAccess { .. } => 403,
            A2rchiError::DeadlineExceeded { .. } => 408,
        }
    }
}
