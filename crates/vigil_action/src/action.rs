//! The Action capability.
//!
//! Every task type resolves to one [`Action`]. External adapters
//! (notifications, API calls, data pipelines, repository automation)
//! implement it and are registered at startup.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use vigil_core::CoreError;

/// Successful action output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionOutput {
    /// Structured result
    #[serde(default)]
    pub data: Value,
    /// Optional human-readable summary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ActionOutput {
    /// Output carrying `data`
    #[must_use]
    pub fn new(data: Value) -> Self {
        Self {
            data,
            message: None,
        }
    }

    /// Output with no data
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Attach a message
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Action failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    /// The action ran and failed
    #[error("action failed: {0}")]
    Failed(String),

    /// Parameters were unusable
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// The downstream system could not be reached
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl From<ActionError> for CoreError {
    fn from(err: ActionError) -> Self {
        CoreError::Execution {
            message: err.to_string(),
        }
    }
}

/// A handler for one task type
#[async_trait]
pub trait Action: Send + Sync {
    /// Task type this action handles
    fn action_type(&self) -> &str;

    /// Short description for listings
    fn description(&self) -> &str {
        ""
    }

    /// Run the action.
    ///
    /// The future may be dropped at any await point when the task times out
    /// or its workflow is cancelled.
    ///
    /// # Errors
    ///
    /// Returns an [`ActionError`] when the action does not succeed
    async fn execute(&self, parameters: &Value) -> Result<ActionOutput, ActionError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Action for Echo {
        fn action_type(&self) -> &str {
            "echo"
        }

        async fn execute(&self, parameters: &Value) -> Result<ActionOutput, ActionError> {
            Ok(ActionOutput::new(parameters.clone()))
        }
    }

    #[tokio::test]
    async fn test_action_execute() {
        let out = Echo.execute(&json!({"x": 1})).await.unwrap();
        assert_eq!(out.data, json!({"x": 1}));
        assert_eq!(Echo.description(), "");
    }

    #[test]
    fn test_action_error_into_core() {
        let err: CoreError = ActionError::Unavailable("smtp".into()).into();
        assert_eq!(err.kind(), vigil_core::ErrorKind::Execution);
        assert!(err.to_string().contains("smtp"));
    }
}
