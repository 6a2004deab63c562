//! Sources of decision input for the autonomous cycle.

use crate::context::DecisionContext;
use crate::option::DecisionOption;
use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use vigil_core::CoreResult;

/// Supplies the context and candidate options for each decision cycle.
///
/// An empty option list means there is nothing to decide this cycle.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    /// Snapshot of the current context
    async fn decision_context(&self) -> CoreResult<DecisionContext>;

    /// Options to choose from right now
    async fn candidate_options(&self) -> CoreResult<Vec<DecisionOption>>;
}

/// Provider returning fixed input, replaceable at runtime
#[derive(Debug, Default)]
pub struct StaticContextProvider {
    input: Mutex<(DecisionContext, Vec<DecisionOption>)>,
}

impl StaticContextProvider {
    /// Provider for `context` and `options`
    #[must_use]
    pub fn new(context: DecisionContext, options: Vec<DecisionOption>) -> Self {
        Self {
            input: Mutex::new((context, options)),
        }
    }

    /// Replace the input served from now on
    pub fn set(&self, context: DecisionContext, options: Vec<DecisionOption>) {
        *self.input.lock().unwrap_or_else(PoisonError::into_inner) = (context, options);
    }
}

#[async_trait]
impl ContextProvider for StaticContextProvider {
    async fn decision_context(&self) -> CoreResult<DecisionContext> {
        Ok(self.input.lock().unwrap_or_else(PoisonError::into_inner).0.clone())
    }

    async fn candidate_options(&self) -> CoreResult<Vec<DecisionOption>> {
        Ok(self.input.lock().unwrap_or_else(PoisonError::into_inner).1.clone())
    }
}
