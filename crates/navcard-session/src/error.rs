//! Error types for device sessions

use navcard_core::error::Error;
use navcard_core::identity::PeripheralIdentity;
use thiserror::Error;

/// Session level errors
#[derive(Debug, Error)]
pub enum SessionError {
    /// Nothing on the bus is a known programmer
    #[error("No supported card programmer found")]
    NoProgrammer,

    /// Bringing the programmer to operational firmware failed
    #[error("Failed to initialize {identity}: {source}")]
    Staging {
        identity: PeripheralIdentity,
        #[source]
        source: Error,
    },

    /// The operational programmer could not be opened
    #[error("Failed to open {identity}: {source}")]
    Open {
        identity: PeripheralIdentity,
        #[source]
        source: Error,
    },

    /// A card operation failed
    #[error(transparent)]
    Card(#[from] Error),
}

impl SessionError {
    /// Underlying core error, if any
    pub fn core(&self) -> Option<&Error> {
        match self {
            SessionError::NoProgrammer => None,
            SessionError::Staging { source, .. } | SessionError::Open { source, .. } => {
                Some(source)
            }
            SessionError::Card(e) => Some(e),
        }
    }
}

/// Result type for session operations
pub type Result<T> = std::result::Result<T, SessionError>;
