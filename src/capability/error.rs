//! Capability error types

use thiserror::Error;

/// Error reported by an external capability, with classification
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct CapabilityError {
    pub kind: CapabilityErrorKind,
    pub message: String,
}

impl CapabilityError {
    pub fn new(kind: CapabilityErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(CapabilityErrorKind::Unavailable, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(CapabilityErrorKind::NotFound, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(CapabilityErrorKind::Network, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(CapabilityErrorKind::Auth, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(CapabilityErrorKind::InvalidResponse, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(CapabilityErrorKind::Rejected, message)
    }
}

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityErrorKind {
    /// The collaborator is not reachable right now
    Unavailable,
    /// Record, combatant or document does not exist
    NotFound,
    /// Network issues, timeouts, 5xx
    Network,
    /// Credential missing, expired or refused
    Auth,
    /// The collaborator answered with something unparseable
    InvalidResponse,
    /// The collaborator refused the write
    Rejected,
}

impl CapabilityErrorKind {
    /// Whether the next sync cycle can reasonably expect a different outcome
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Unavailable | Self::Network)
    }
}
