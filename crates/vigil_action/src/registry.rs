//! Action registry mapping task types to handlers.

use crate::action::Action;
use indexmap::IndexMap;
use std::sync::{Arc, PoisonError, RwLock};
use vigil_core::CoreError;

/// Error from registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A handler for this type already exists
    #[error("Action already registered: {action_type}")]
    AlreadyRegistered {
        /// Task type
        action_type: String,
    },

    /// No enabled handler for this type
    #[error("Unknown action type: {action_type}")]
    UnknownAction {
        /// Task type
        action_type: String,
    },
}

impl From<RegistryError> for CoreError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::AlreadyRegistered { action_type } => CoreError::AlreadyExists {
                kind: "Action".to_string(),
                id: action_type,
            },
            RegistryError::UnknownAction { action_type } => CoreError::NotFound {
                kind: "Action".to_string(),
                id: action_type,
            },
        }
    }
}

/// Entry for a registered action
#[derive(Clone)]
pub struct ActionEntry {
    /// The handler
    pub action: Arc<dyn Action>,
    /// Whether lookups may return it
    pub enabled: bool,
}

impl std::fmt::Debug for ActionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionEntry")
            .field("action_type", &self.action.action_type())
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Registry of actions keyed by task type
#[derive(Debug, Default)]
pub struct ActionRegistry {
    actions: IndexMap<String, ActionEntry>,
}

impl ActionRegistry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action under its own type
    ///
    /// # Errors
    ///
    /// Returns error if the type is already taken
    pub fn register(&mut self, action: Arc<dyn Action>) -> Result<(), RegistryError> {
        let action_type = action.action_type().to_string();
        if self.actions.contains_key(&action_type) {
            return Err(RegistryError::AlreadyRegistered { action_type });
        }
        tracing::debug!(%action_type, "registered action");
        self.actions.insert(
            action_type,
            ActionEntry {
                action,
                enabled: true,
            },
        );
        Ok(())
    }

    /// Register or replace an action
    pub fn upsert(&mut self, action: Arc<dyn Action>) {
        let action_type = action.action_type().to_string();
        self.actions.insert(
            action_type,
            ActionEntry {
                action,
                enabled: true,
            },
        );
    }

    /// Resolve the handler for a task type
    ///
    /// # Errors
    ///
    /// Returns `UnknownAction` if the type is missing or disabled
    pub fn get(&self, action_type: &str) -> Result<Arc<dyn Action>, RegistryError> {
        self.actions
            .get(action_type)
            .filter(|e| e.enabled)
            .map(|e| Arc::clone(&e.action))
            .ok_or_else(|| RegistryError::UnknownAction {
                action_type: action_type.to_string(),
            })
    }

    /// Whether an enabled handler exists
    #[must_use]
    pub fn contains(&self, action_type: &str) -> bool {
        self.actions.get(action_type).is_some_and(|e| e.enabled)
    }

    /// Enabled task types in registration order
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        self.actions
            .iter()
            .filter(|(_, e)| e.enabled)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Enable or disable a handler
    ///
    /// # Errors
    ///
    /// Returns error if the type was never registered
    pub fn set_enabled(&mut self, action_type: &str, enabled: bool) -> Result<(), RegistryError> {
        self.actions
            .get_mut(action_type)
            .map(|e| e.enabled = enabled)
            .ok_or_else(|| RegistryError::UnknownAction {
                action_type: action_type.to_string(),
            })
    }

    /// Remove a handler
    ///
    /// # Errors
    ///
    /// Returns error if the type was never registered
    pub fn unregister(&mut self, action_type: &str) -> Result<(), RegistryError> {
        self.actions
            .shift_remove(action_type)
            .map(|_| ())
            .ok_or_else(|| RegistryError::UnknownAction {
                action_type: action_type.to_string(),
            })
    }

    /// Number of enabled handlers
    #[must_use]
    pub fn count(&self) -> usize {
        self.actions.values().filter(|e| e.enabled).count()
    }

    /// Whether no handler is enabled
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }
}

/// Registry shared between the executor and whoever populates it
#[derive(Debug, Default)]
pub struct SharedActionRegistry {
    inner: RwLock<ActionRegistry>,
}

impl SharedActionRegistry {
    /// Create a new shared registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an already populated registry
    #[must_use]
    pub fn from_registry(registry: ActionRegistry) -> Self {
        Self {
            inner: RwLock::new(registry),
        }
    }

    /// Register an action
    ///
    /// # Errors
    ///
    /// Returns error if the type is already taken
    pub fn register(&self, action: Arc<dyn Action>) -> Result<(), RegistryError> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(action)
    }

    /// Register or replace an action
    pub fn upsert(&self, action: Arc<dyn Action>) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .upsert(action);
    }

    /// Resolve a handler
    ///
    /// # Errors
    ///
    /// Returns `UnknownAction` if the type is missing or disabled
    pub fn get(&self, action_type: &str) -> Result<Arc<dyn Action>, RegistryError> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(action_type)
    }

    /// Enable or disable a handler
    ///
    /// # Errors
    ///
    /// Returns error if the type was never registered
    pub fn set_enabled(&self, action_type: &str, enabled: bool) -> Result<(), RegistryError> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .set_enabled(action_type, enabled)
    }

    /// Enabled task types
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).list()
    }

    /// Whether an enabled handler exists
    #[must_use]
    pub fn contains(&self, action_type: &str) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(action_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::NoopAction;

    fn noop(name: &str) -> Arc<dyn Action> {
        Arc::new(NoopAction::named(name))
    }

    #[test]
    fn test_registry_new() {
        let registry = ActionRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_registry_register_and_get() {
        let mut registry = ActionRegistry::new();
        registry.register(noop("notify")).unwrap();
        assert!(registry.contains("notify"));
        assert_eq!(registry.get("notify").unwrap().action_type(), "notify");
    }

    #[test]
    fn test_registry_register_duplicate() {
        let mut registry = ActionRegistry::new();
        registry.register(noop("notify")).unwrap();
        assert_eq!(
            registry.register(noop("notify")),
            Err(RegistryError::AlreadyRegistered {
                action_type: "notify".into()
            })
        );
    }

    #[test]
    fn test_registry_unknown_type_is_typed_error() {
        let registry = ActionRegistry::new();
        let err = registry.get("missing").err().unwrap();
        assert_eq!(
            err,
            RegistryError::UnknownAction {
                action_type: "missing".into()
            }
        );
        let core: CoreError = err.into();
        assert_eq!(core.kind(), vigil_core::ErrorKind::NotFound);
    }

    #[test]
    fn test_registry_disable_enable() {
        let mut registry = ActionRegistry::new();
        registry.register(noop("notify")).unwrap();

        registry.set_enabled("notify", false).unwrap();
        assert!(!registry.contains("notify"));
        assert!(registry.get("notify").is_err());

        registry.set_enabled("notify", true).unwrap();
        assert!(registry.contains("notify"));
    }

    #[test]
    fn test_registry_unregister() {
        let mut registry = ActionRegistry::new();
        registry.register(noop("a")).unwrap();
        registry.register(noop("b")).unwrap();
        registry.unregister("a").unwrap();
        assert_eq!(registry.list(), vec!["b".to_string()]);
        assert!(registry.unregister("a").is_err());
    }

    #[test]
    fn test_shared_registry() {
        let shared = SharedActionRegistry::new();
        shared.register(noop("a")).unwrap();
        shared.upsert(noop("a"));
        assert!(shared.contains("a"));
        assert_eq!(shared.list().len(), 1);
    }
}
