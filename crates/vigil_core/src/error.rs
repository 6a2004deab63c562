//! Core error types for vigil.
//!
//! Every per-task and per-check failure is folded into a [`CoreError`] so it
//! can be reported as a structured status plus message. Only graph-integrity
//! violations ([`ErrorKind::Input`]) abort a cycle.

use serde::{Deserialize, Serialize};

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Coarse error category, stable across releases and safe to serialize
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Rejected synchronously, no side effects
    Input,
    /// A resource pool could not satisfy a request
    ResourceExhausted,
    /// Forced cancellation after a deadline
    Timeout,
    /// An action reported failure
    Execution,
    /// A rollback step failed
    Rollback,
    /// Operation was cancelled by the caller
    Cancelled,
    /// Lookup failed
    NotFound,
    /// Anything else
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Input => "input",
            Self::ResourceExhausted => "resource_exhausted",
            Self::Timeout => "timeout",
            Self::Execution => "execution",
            Self::Rollback => "rollback",
            Self::Cancelled => "cancelled",
            Self::NotFound => "not_found",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// Invalid caller input
    #[error("Invalid input for {field}: {reason}")]
    InvalidInput {
        /// Offending field
        field: String,
        /// Why it was rejected
        reason: String,
    },

    /// Dependency cycle in a workflow
    #[error("Cyclic dependency detected at task {task_id}")]
    CyclicDependency {
        /// A task that participates in the cycle
        task_id: String,
    },

    /// Resource pool shortfall
    #[error("Resource exhausted in pool {pool}: requested {requested}, available {available}")]
    ResourceExhausted {
        /// Pool name
        pool: String,
        /// Amount asked for
        requested: u64,
        /// Amount left at the time of the request
        available: u64,
    },

    /// Timeout
    #[error("Timeout: {operation} exceeded {timeout_ms}ms")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Deadline that was exceeded
        timeout_ms: u64,
    },

    /// Action failure
    #[error("Execution failed: {message}")]
    Execution {
        /// Failure message from the action
        message: String,
    },

    /// Rollback step failure
    #[error("Rollback of {task_id} failed: {message}")]
    Rollback {
        /// Task being rolled back
        task_id: String,
        /// Failure message
        message: String,
    },

    /// Not found
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind
        kind: String,
        /// Entity id
        id: String,
    },

    /// Already exists
    #[error("{kind} already exists: {id}")]
    AlreadyExists {
        /// Entity kind
        kind: String,
        /// Entity id
        id: String,
    },

    /// Cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Internal error (for unexpected errors)
    #[error("Internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl CoreError {
    /// Shorthand for [`CoreError::InvalidInput`]
    #[must_use]
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`CoreError::NotFound`]
    #[must_use]
    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Category of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput { .. } | Self::CyclicDependency { .. } | Self::AlreadyExists { .. } => {
                ErrorKind::Input
            }
            Self::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Execution { .. } => ErrorKind::Execution,
            Self::Rollback { .. } => ErrorKind::Rollback,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Whether a retry could plausibly succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Execution | ErrorKind::Timeout)
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidInput {
            field: "json".to_string(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::not_found("Workflow", "wf_123");
        assert_eq!(format!("{}", err), "Workflow not found: wf_123");

        let err = CoreError::ResourceExhausted {
            pool: "cpu".to_string(),
            requested: 60,
            available: 40,
        };
        let s = err.to_string();
        assert!(s.contains("cpu"));
        assert!(s.contains("60"));
        assert!(s.contains("40"));
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(
            CoreError::CyclicDependency { task_id: "a".into() }.kind(),
            ErrorKind::Input
        );
        assert_eq!(CoreError::invalid("options", "empty").kind(), ErrorKind::Input);
        assert_eq!(CoreError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(ErrorKind::ResourceExhausted.to_string(), "resource_exhausted");
    }

    #[test]
    fn test_retryable() {
        assert!(CoreError::Execution { message: "boom".into() }.is_retryable());
        assert!(
            CoreError::Timeout {
                operation: "task".into(),
                timeout_ms: 10
            }
            .is_retryable()
        );
        assert!(
            !CoreError::ResourceExhausted {
                pool: "cpu".into(),
                requested: 1,
                available: 0
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_error_equality() {
        assert_eq!(CoreError::Cancelled, CoreError::Cancelled);
        assert_ne!(CoreError::Cancelled, CoreError::invalid("x", "y"));
    }
}
