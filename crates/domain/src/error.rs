//! Error classification shared across the service.

use serde::Serialize;

/// Coarse classification of every failure the service can report.
///
/// Each layer keeps its own error enum and maps its variants onto one of
/// these kinds. Transports decide what to do from the kind alone: the HTTP
/// layer picks a status code, the consumer decides between ack and requeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// Malformed input. Never retried.
    Validation,
    /// A referenced entity does not exist.
    NotFound,
    /// The operation is illegal for the entity's current state.
    InvalidState,
    /// A state-dependent business rule is not met.
    Precondition,
    /// A duplicate was detected and resolved without repeating side effects.
    Conflict,
    /// The store or the bus is unavailable. Safe to retry.
    TransientInfra,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::Precondition => "precondition",
            ErrorKind::Conflict => "conflict",
            ErrorKind::TransientInfra => "transient_infra",
        }
    }

    /// Returns true if retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::TransientInfra)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_infra_errors_are_retryable() {
        assert!(ErrorKind::TransientInfra.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
        assert!(!ErrorKind::NotFound.is_retryable());
        assert!(!ErrorKind::InvalidState.is_retryable());
        assert!(!ErrorKind::Precondition.is_retryable());
        assert!(!ErrorKind::Conflict.is_retryable());
    }
}
