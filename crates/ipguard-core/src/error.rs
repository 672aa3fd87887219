//! Error types for the ipguard system
//!
//! Every fallible operation in the crate returns [`Result`]. The engine
//! decides how to react to a failure from its [`ErrorKind`]: some kinds are
//! retried inside the phase that produced them, others end the cycle at once.

use thiserror::Error;

/// Result type alias for ipguard operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the ipguard system
#[derive(Error, Debug)]
pub enum Error {
    /// Network or HTTP failure while fetching a threat feed
    #[error("Feed unreachable: {0}")]
    FeedUnreachable(String),

    /// The feed returned nothing although the stored snapshot is non-empty
    #[error("Feed returned no addresses while {previous} are currently applied")]
    FeedEmpty {
        /// Size of the snapshot that was kept
        previous: usize,
    },

    /// Disk failure while saving the snapshot
    #[error("Snapshot persistence failed: {0}")]
    Persist(String),

    /// The firewall rejected the supplied credentials
    #[error("Firewall authentication failed: {0}")]
    RemoteAuth(String),

    /// The firewall reported an application-level error in its response body
    #[error("Firewall API error: {0}")]
    RemoteApi(String),

    /// Network or HTTP failure while talking to the firewall
    #[error("Firewall unreachable: {0}")]
    RemoteTransport(String),

    /// Threat level outside of [0, 100]
    #[error("Invalid threat level {0}: must be between 0 and 100")]
    InvalidThreatLevel(i64),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The engine was stopped while the operation was in flight
    #[error("Operation cancelled: engine is stopping")]
    Cancelled,

    /// Filesystem errors outside of the save path
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse classification of an [`Error`], cheap to copy into cycle results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    FeedUnreachable,
    FeedEmpty,
    PersistFailure,
    RemoteAuthFailure,
    RemoteApiFailure,
    RemoteTransportFailure,
    InvalidThreatLevel,
    Config,
    Cancelled,
}

impl Error {
    /// Create a feed transport error
    pub fn feed_unreachable(msg: impl Into<String>) -> Self {
        Self::FeedUnreachable(msg.into())
    }

    /// Create a persistence error
    pub fn persist(msg: impl Into<String>) -> Self {
        Self::Persist(msg.into())
    }

    /// Create a firewall authentication error
    pub fn remote_auth(msg: impl Into<String>) -> Self {
        Self::RemoteAuth(msg.into())
    }

    /// Create a firewall application error
    pub fn remote_api(msg: impl Into<String>) -> Self {
        Self::RemoteApi(msg.into())
    }

    /// Create a firewall transport error
    pub fn remote_transport(msg: impl Into<String>) -> Self {
        Self::RemoteTransport(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::FeedUnreachable(_) => ErrorKind::FeedUnreachable,
            Error::FeedEmpty { .. } => ErrorKind::FeedEmpty,
            Error::Persist(_) | Error::Io(_) | Error::Json(_) => ErrorKind::PersistFailure,
            Error::RemoteAuth(_) => ErrorKind::RemoteAuthFailure,
            Error::RemoteApi(_) => ErrorKind::RemoteApiFailure,
            Error::RemoteTransport(_) => ErrorKind::RemoteTransportFailure,
            Error::InvalidThreatLevel(_) => ErrorKind::InvalidThreatLevel,
            Error::Config(_) => ErrorKind::Config,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether a phase-scoped retry may recover from this error
    ///
    /// Credentials and disk problems will not fix themselves within the
    /// retry window, so only transport and device-reported errors qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::FeedUnreachable
                | ErrorKind::RemoteTransportFailure
                | ErrorKind::RemoteApiFailure
        )
    }
}
