//! Namespaced function registry.
//!
//! Functions are created, renamed and destroyed only here. Every change is
//! emitted on the event bus and kept in a journal the workbook drains after
//! each edit.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use cellflow_engine::engine::{EventBus, Function, SubscriptionId};

use super::validate_identifier;
use crate::error::{CellflowError, Result};

/// Functions that populate or trigger cells.
pub const CELL_NAMESPACE: &str = "cells";
/// Sort/filter functions for collections.
pub const COLLECTION_NAMESPACE: &str = "collections";

#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct FunctionKey {
    pub namespace: String,
    pub name: String,
}

impl FunctionKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> FunctionKey {
        FunctionKey {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn cell(name: impl Into<String>) -> FunctionKey {
        Self::new(CELL_NAMESPACE, name)
    }

    pub fn collection(name: impl Into<String>) -> FunctionKey {
        Self::new(COLLECTION_NAMESPACE, name)
    }

    fn not_found(&self) -> CellflowError {
        CellflowError::FunctionNotFound {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }
}

impl fmt::Display for FunctionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.namespace, self.name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FunctionEvent {
    Added(FunctionKey),
    Removed(FunctionKey),
    Renamed { from: FunctionKey, to: FunctionKey },
    ScriptChanged(FunctionKey),
    DependenciesChanged(FunctionKey),
}

#[derive(Debug, Default)]
pub struct FunctionTracker {
    functions: BTreeMap<FunctionKey, Function>,
    events: EventBus<FunctionEvent>,
    journal: Vec<FunctionEvent>,
}

impl FunctionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn contains(&self, key: &FunctionKey) -> bool {
        self.functions.contains_key(key)
    }

    pub fn get(&self, key: &FunctionKey) -> Option<&Function> {
        self.functions.get(key)
    }

    pub fn get_mut(&mut self, key: &FunctionKey) -> Option<&mut Function> {
        self.functions.get_mut(key)
    }

    /// Keys in `namespace`, sorted by name.
    pub fn functions_in(&self, namespace: &str) -> Vec<&FunctionKey> {
        self.functions
            .keys()
            .filter(|key| key.namespace == namespace)
            .collect()
    }

    pub fn subscribe(&mut self, handler: impl FnMut(&FunctionEvent) + 'static) -> SubscriptionId {
        self.events.subscribe(handler)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Drain events raised since the last call.
    pub fn take_changes(&mut self) -> Vec<FunctionEvent> {
        std::mem::take(&mut self.journal)
    }

    fn raise(&mut self, event: FunctionEvent) {
        self.events.emit(&event);
        self.journal.push(event);
    }

    /// Look up a function, creating an empty one if absent.
    pub fn get_or_create(&mut self, namespace: &str, name: &str) -> Result<&mut Function> {
        validate_identifier(namespace)?;
        validate_identifier(name)?;
        let key = FunctionKey::new(namespace, name);
        if !self.functions.contains_key(&key) {
            self.functions
                .insert(key.clone(), Function::new(namespace, name, ""));
            self.raise(FunctionEvent::Added(key.clone()));
        }
        self.functions.get_mut(&key).ok_or_else(|| key.not_found())
    }

    /// Register a new function from canonical script text.
    pub fn add_cell_function_to_namespace(
        &mut self,
        namespace: &str,
        name: &str,
        script: &str,
    ) -> Result<FunctionKey> {
        validate_identifier(namespace)?;
        validate_identifier(name)?;
        let key = FunctionKey::new(namespace, name);
        if self.functions.contains_key(&key) {
            return Err(CellflowError::DuplicateFunction {
                namespace: key.namespace,
                name: key.name,
            });
        }
        self.functions
            .insert(key.clone(), Function::new(namespace, name, script));
        self.raise(FunctionEvent::Added(key.clone()));
        Ok(key)
    }

    pub fn remove(&mut self, key: &FunctionKey) -> Result<Function> {
        let function = self.functions.remove(key).ok_or_else(|| key.not_found())?;
        self.raise(FunctionEvent::Removed(key.clone()));
        Ok(function)
    }

    /// The key `key` would have after renaming to `new_name`, without
    /// changing anything.
    pub fn check_rename(&self, key: &FunctionKey, new_name: &str) -> Result<FunctionKey> {
        validate_identifier(new_name)?;
        if !self.functions.contains_key(key) {
            return Err(key.not_found());
        }
        let to = FunctionKey::new(key.namespace.clone(), new_name);
        if to != *key && self.functions.contains_key(&to) {
            return Err(CellflowError::DuplicateFunction {
                namespace: to.namespace,
                name: to.name,
            });
        }
        Ok(to)
    }

    /// Rename within the same namespace.
    pub fn rename(&mut self, key: &FunctionKey, new_name: &str) -> Result<FunctionKey> {
        let to = self.check_rename(key, new_name)?;
        if to == *key {
            return Ok(to);
        }

        let mut function = self.functions.remove(key).ok_or_else(|| key.not_found())?;
        function.set_name(new_name);
        self.functions.insert(to.clone(), function);
        self.raise(FunctionEvent::Renamed {
            from: key.clone(),
            to: to.clone(),
        });
        Ok(to)
    }

    /// Replace a function's canonical script. Returns whether its
    /// dependencies changed.
    pub fn set_script(&mut self, key: &FunctionKey, script: &str) -> Result<bool> {
        let function = self.functions.get_mut(key).ok_or_else(|| key.not_found())?;
        if function.script() == script {
            return Ok(false);
        }
        let changed = function.set_script(script);
        self.raise(FunctionEvent::ScriptChanged(key.clone()));
        if changed {
            self.raise(FunctionEvent::DependenciesChanged(key.clone()));
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_duplicate() {
        let mut functions = FunctionTracker::new();
        let key = functions
            .add_cell_function_to_namespace(CELL_NAMESPACE, "total", "1 + 1")
            .unwrap();
        assert_eq!(key, FunctionKey::cell("total"));
        assert_eq!(functions.get(&key).unwrap().script(), "1 + 1");
        assert!(matches!(
            functions.add_cell_function_to_namespace(CELL_NAMESPACE, "total", "2"),
            Err(CellflowError::DuplicateFunction { .. })
        ));
        assert!(
            functions
                .add_cell_function_to_namespace(COLLECTION_NAMESPACE, "total", "2")
                .is_ok()
        );
        assert_eq!(functions.take_changes().len(), 2);
    }

    #[test]
    fn test_invalid_identifier_creates_nothing() {
        let mut functions = FunctionTracker::new();
        assert!(matches!(
            functions.add_cell_function_to_namespace(CELL_NAMESPACE, "a/b", "1"),
            Err(CellflowError::InvalidIdentifier { .. })
        ));
        assert!(functions.get_or_create(CELL_NAMESPACE, " x").is_err());
        assert!(functions.is_empty());
        assert!(functions.take_changes().is_empty());
    }

    #[test]
    fn test_get_or_create() {
        let mut functions = FunctionTracker::new();
        functions.get_or_create(CELL_NAMESPACE, "f").unwrap();
        functions.get_or_create(CELL_NAMESPACE, "f").unwrap();
        assert_eq!(functions.len(), 1);
        assert_eq!(
            functions.take_changes(),
            vec![FunctionEvent::Added(FunctionKey::cell("f"))]
        );
    }

    #[test]
    fn test_rename() {
        let mut functions = FunctionTracker::new();
        let key = functions
            .add_cell_function_to_namespace(CELL_NAMESPACE, "old", "1")
            .unwrap();
        functions
            .add_cell_function_to_namespace(CELL_NAMESPACE, "taken", "2")
            .unwrap();
        assert!(matches!(
            functions.rename(&key, "taken"),
            Err(CellflowError::DuplicateFunction { .. })
        ));

        let renamed = functions.rename(&key, "new").unwrap();
        assert!(!functions.contains(&key));
        assert_eq!(functions.get(&renamed).unwrap().name(), "new");
        assert_eq!(
            functions.take_changes().last(),
            Some(&FunctionEvent::Renamed { from: key, to: renamed })
        );
    }

    #[test]
    fn test_set_script_events() {
        let mut functions = FunctionTracker::new();
        let key = functions
            .add_cell_function_to_namespace(CELL_NAMESPACE, "f", "1")
            .unwrap();
        functions.take_changes();

        assert!(!functions.set_script(&key, "1").unwrap());
        assert!(functions.take_changes().is_empty());

        assert!(!functions.set_script(&key, "2").unwrap());
        assert_eq!(functions.take_changes(), vec![FunctionEvent::ScriptChanged(key.clone())]);

        assert!(functions.set_script(&key, "CELL(ANCHOR_SHEET, 1, 1).Text").unwrap());
        assert_eq!(
            functions.take_changes(),
            vec![
                FunctionEvent::ScriptChanged(key.clone()),
                FunctionEvent::DependenciesChanged(key.clone()),
            ]
        );
    }

    #[test]
    fn test_remove() {
        let mut functions = FunctionTracker::new();
        let key = functions
            .add_cell_function_to_namespace(CELL_NAMESPACE, "f", "1")
            .unwrap();
        assert!(functions.remove(&key).is_ok());
        assert!(matches!(functions.remove(&key), Err(CellflowError::FunctionNotFound { .. })));
    }
}
