//! Signaling failure taxonomy.

use thiserror::Error;

use crate::call::InvalidTransition;

/// Failures reported back to the endpoint that triggered them.
///
/// Every variant is recoverable: the coordinator answers the offending
/// endpoint with a structured event and leaves the registry and the
/// active-call set exactly as they were.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    #[error("identifier \"{0}\" is already registered")]
    DuplicateIdentifier(String),

    #[error("\"{0}\" is not reachable")]
    TargetUnreachable(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("no active call with \"{0}\"")]
    NoActiveCall(String),

    #[error("register an identifier first")]
    NotRegistered,
}

impl SignalError {
    /// Stable machine-readable code carried on REJECTED and ERROR events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateIdentifier(_) => "DUPLICATE_IDENTIFIER",
            Self::TargetUnreachable(_) => "TARGET_UNREACHABLE",
            Self::InvalidTransition(_) => "INVALID_TRANSITION",
            Self::NoActiveCall(_) => "NO_ACTIVE_CALL",
            Self::NotRegistered => "NOT_REGISTERED",
        }
    }
}

impl From<InvalidTransition> for SignalError {
    fn from(err: InvalidTransition) -> Self {
        Self::InvalidTransition(err.to_string())
    }
}
