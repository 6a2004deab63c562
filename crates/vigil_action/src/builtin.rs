//! Small actions that ship with the crate.

use crate::action::{Action, ActionError, ActionOutput};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;

/// Succeeds immediately, echoing its parameters
#[derive(Debug, Clone)]
pub struct NoopAction {
    action_type: String,
}

impl NoopAction {
    /// Registered as `noop`
    #[must_use]
    pub fn new() -> Self {
        Self::named("noop")
    }

    /// Registered under a custom type
    #[must_use]
    pub fn named(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
        }
    }
}

impl Default for NoopAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Action for NoopAction {
    fn action_type(&self) -> &str {
        &self.action_type
    }

    fn description(&self) -> &str {
        "does nothing"
    }

    async fn execute(&self, parameters: &Value) -> Result<ActionOutput, ActionError> {
        Ok(ActionOutput::new(parameters.clone()))
    }
}

type Handler = dyn Fn(Value) -> BoxFuture<'static, Result<ActionOutput, ActionError>> + Send + Sync;

/// Adapts an async closure into an [`Action`]
pub struct FnAction {
    action_type: String,
    handler: Box<Handler>,
}

impl FnAction {
    /// Wrap `handler` under `action_type`
    pub fn new<F, Fut>(action_type: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ActionOutput, ActionError>> + Send + 'static,
    {
        Self {
            action_type: action_type.into(),
            handler: Box::new(move |params| Box::pin(handler(params))),
        }
    }
}

impl std::fmt::Debug for FnAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnAction")
            .field("action_type", &self.action_type)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Action for FnAction {
    fn action_type(&self) -> &str {
        &self.action_type
    }

    async fn execute(&self, parameters: &Value) -> Result<ActionOutput, ActionError> {
        (self.handler)(parameters.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_noop_echoes() {
        let out = NoopAction::new().execute(&json!([1, 2])).await.unwrap();
        assert_eq!(out.data, json!([1, 2]));
    }

    #[tokio::test]
    async fn test_fn_action() {
        let action = FnAction::new("double", |params: Value| async move {
            let n = params["n"]
                .as_i64()
                .ok_or_else(|| ActionError::InvalidParameters("n missing".into()))?;
            Ok(ActionOutput::new(json!(n * 2)))
        });
        assert_eq!(action.action_type(), "double");
        assert_eq!(action.execute(&json!({"n": 4})).await.unwrap().data, json!(8));
        assert!(matches!(
            action.execute(&json!({})).await,
            Err(ActionError::InvalidParameters(_))
        ));
    }
}
