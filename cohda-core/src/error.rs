//! Error taxonomy shared by all cohda crates.

use thiserror::Error;

/// Result type for cohda operations.
pub type Result<T> = std::result::Result<T, CohdaError>;

/// Errors that can occur while setting up or running a negotiation.
#[derive(Error, Debug)]
pub enum CohdaError {
    /// Invalid session or file configuration. Fatal before any
    /// negotiation starts.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A unit's catalogue has no schedule matching the requested horizon.
    /// Fatal for that agent; the controller aborts the negotiation.
    #[error("no schedules available: {0}")]
    ScheduleUnavailable(String),

    /// A peer, host or observer could not be reached. Soft during a live
    /// negotiation, fatal during setup.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
