//! Identifiers for vigil entities.
//!
//! Workflows, decisions and alerts get random UUIDs. Tasks are named by the
//! caller because dependency edges refer to them by name.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random id
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Derive a stable id from a name
            #[must_use]
            pub fn from_name(name: &str) -> Self {
                Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()))
            }

            /// Get as UUID
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "_{}"), self.0)
            }
        }
    };
}

uuid_id!(
    /// Workflow identifier
    WorkflowId,
    "wf"
);

uuid_id!(
    /// Decision identifier
    DecisionId,
    "dec"
);

uuid_id!(
    /// Alert identifier
    AlertId,
    "alert"
);

/// Task identifier, unique within its workflow
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Create from a name
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the name
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Id of the compensating task run when this one is rolled back
    #[must_use]
    pub fn rollback_id(&self) -> Self {
        Self(format!("{}_rollback", self.0))
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_creation() {
        assert_ne!(WorkflowId::new(), WorkflowId::new());
        assert_ne!(AlertId::new(), AlertId::new());
    }

    #[test]
    fn test_id_display() {
        assert!(WorkflowId::new().to_string().starts_with("wf_"));
        assert!(DecisionId::new().to_string().starts_with("dec_"));
        assert!(AlertId::new().to_string().starts_with("alert_"));
    }

    #[test]
    fn test_from_name_is_stable() {
        assert_eq!(WorkflowId::from_name("deploy"), WorkflowId::from_name("deploy"));
        assert_ne!(WorkflowId::from_name("deploy"), WorkflowId::from_name("other"));
    }

    #[test]
    fn test_task_id_rollback() {
        let id = TaskId::from("migrate");
        assert_eq!(id.rollback_id().as_str(), "migrate_rollback");
        assert_eq!(id.to_string(), "migrate");
    }

    #[test]
    fn test_task_id_serde_transparent() {
        let id = TaskId::from("a");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"a\"");
    }
}
