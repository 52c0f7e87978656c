//! Error types for STAN client operations.
//!
//! The taxonomy distinguishes fatal conditions (transport loss, framing
//! violations) from recoverable ones (a message for a torn-down
//! subscription); the dispatch loop decides per variant whether to
//! propagate or log and continue.

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a STAN session.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport unreachable, closed, or a write failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Protocol framing violation in the inbound byte stream.
    ///
    /// Not retried: a persistently malformed stream means a protocol
    /// version mismatch or a framing bug on one side.
    #[error("stream error: {0}")]
    Stream(String),

    /// Invalid subscription configuration, detected before any network I/O.
    #[error("subscription error: {0}")]
    Subscription(String),

    /// A wire sid that is not present in the registry.
    ///
    /// Recovered at the dispatch boundary: the server may still be
    /// delivering to a subscription that was torn down mid-flight.
    #[error("subscription not found: {0}")]
    SubscriptionNotFound(String),

    /// Server-reported error (`-ERR` or a non-empty error field in a
    /// STAN response). Session-ending; no automatic reconnect.
    #[error("server error: {0}")]
    Nats(String),
}

impl Error {
    /// Returns true if this is a transport-level failure.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Returns true if this error aborts the session rather than a
    /// single operation.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Stream(_) | Error::Nats(_))
    }
}
