//! Bridge error types

use crate::capability::{CapabilityError, CapabilityErrorKind};
use crate::model::RecordRef;
use thiserror::Error;

/// Error surfaced to callers of the bridge
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Local tracker is not available")]
    SessionUnavailable,

    #[error("Shared record not found: {0}")]
    RecordNotFound(String),

    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error("Bridge runtime has stopped")]
    Stopped,
}

impl BridgeError {
    /// Classify a failure reported by the local tracker
    pub fn from_session(error: CapabilityError) -> Self {
        match error.kind {
            CapabilityErrorKind::Unavailable => Self::SessionUnavailable,
            _ => Self::Capability(error),
        }
    }

    /// Classify a failure reported by the record store for `target`
    pub fn from_record(error: CapabilityError, target: &RecordRef) -> Self {
        match error.kind {
            CapabilityErrorKind::NotFound => Self::RecordNotFound(target.to_string()),
            _ => Self::Capability(error),
        }
    }
}
