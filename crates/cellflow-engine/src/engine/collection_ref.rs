//! How a script names the collections it reads.
//!
//! A constant reference always names the same collection. A dynamic one
//! wraps a function whose result is the name; the name is recomputed on
//! every request and nothing is cached.

use super::deps::CollectionAccess;
use super::eval::ScriptHost;
use super::events::{EventBus, SubscriptionId};
use super::format::dynamic_to_text;
use super::function::{Function, ReturnType};
use super::location::{Location, LocationReference};

/// Namespace of the functions wrapped by dynamic references.
pub const DYNAMIC_REFERENCE_NAMESPACE: &str = "collection-ref";

/// Raised when a dynamic reference's dependency set changes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionInvalidated {
    pub locations: Vec<LocationReference>,
}

#[derive(Debug)]
pub enum CollectionReference {
    Constant(ConstantCollectionReference),
    Dynamic(DynamicCollectionReference),
}

impl CollectionReference {
    pub fn from_access(access: &CollectionAccess) -> CollectionReference {
        match access {
            CollectionAccess::Constant(name) => {
                CollectionReference::Constant(ConstantCollectionReference::new(name.clone()))
            }
            CollectionAccess::Dynamic(expr) => {
                CollectionReference::Dynamic(DynamicCollectionReference::new(expr.clone()))
            }
        }
    }

    pub fn access(&self) -> CollectionAccess {
        match self {
            CollectionReference::Constant(c) => CollectionAccess::Constant(c.name.clone()),
            CollectionReference::Dynamic(d) => {
                CollectionAccess::Dynamic(d.function.script().to_string())
            }
        }
    }

    /// Name of the referenced collection when evaluated from `anchor`.
    /// Dynamic failures are logged and yield `""`.
    pub fn collection_name(&mut self, host: &dyn ScriptHost, anchor: &Location) -> String {
        match self {
            CollectionReference::Constant(c) => c.name.clone(),
            CollectionReference::Dynamic(d) => d.collection_name(host, anchor),
        }
    }

    /// Locations whose change may change the computed name.
    pub fn locations_that_invalidate(&self, anchor: &Location, max_cells: usize) -> Vec<Location> {
        match self {
            CollectionReference::Constant(_) => Vec::new(),
            CollectionReference::Dynamic(d) => d.function.resolved_locations(anchor, max_cells),
        }
    }

    /// Subscribe to invalidation. Constant references never invalidate and
    /// return `None`.
    pub fn on_invalidated(
        &mut self,
        handler: impl FnMut(&CollectionInvalidated) + 'static,
    ) -> Option<SubscriptionId> {
        match self {
            CollectionReference::Constant(_) => None,
            CollectionReference::Dynamic(d) => Some(d.invalidated.subscribe(handler)),
        }
    }

    /// Drop an invalidation handler. Constant references hold none.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        match self {
            CollectionReference::Constant(_) => false,
            CollectionReference::Dynamic(d) => d.unsubscribe(id),
        }
    }

    /// Point this reference at `access` without replacing it, keeping its
    /// subscribers. A dynamic reference raises invalidation if its
    /// dependencies change. Returns false when the kinds differ or a
    /// constant names another collection.
    pub fn retarget(&mut self, access: &CollectionAccess) -> bool {
        match (self, access) {
            (CollectionReference::Constant(c), CollectionAccess::Constant(name)) => c.name == *name,
            (CollectionReference::Dynamic(d), CollectionAccess::Dynamic(expr)) => {
                d.set_script(expr.clone());
                true
            }
            _ => false,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, CollectionReference::Dynamic(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConstantCollectionReference {
    name: String,
}

impl ConstantCollectionReference {
    pub fn new(name: impl Into<String>) -> Self {
        ConstantCollectionReference { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug)]
pub struct DynamicCollectionReference {
    function: Function,
    invalidated: EventBus<CollectionInvalidated>,
}

impl DynamicCollectionReference {
    pub fn new(expression: impl Into<String>) -> Self {
        DynamicCollectionReference {
            function: Function::new(DYNAMIC_REFERENCE_NAMESPACE, "name", expression)
                .with_return_type(ReturnType::Text),
            invalidated: EventBus::new(),
        }
    }

    pub fn function(&self) -> &Function {
        &self.function
    }

    /// Replace the name expression. Raises invalidation when the
    /// dependency set changed.
    pub fn set_script(&mut self, expression: impl Into<String>) -> bool {
        let changed = self.function.set_script(expression);
        if changed {
            let event = CollectionInvalidated {
                locations: self.function.location_dependencies().to_vec(),
            };
            self.invalidated.emit(&event);
        }
        changed
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.invalidated.unsubscribe(id)
    }

    pub fn collection_name(&mut self, host: &dyn ScriptHost, anchor: &Location) -> String {
        match self.function.run_for_cell(host, anchor) {
            Ok(value) => dynamic_to_text(&value),
            Err(e) => {
                log::warn!(
                    "collection name `{}` failed at {}: {}",
                    self.function.script(),
                    anchor,
                    e
                );
                String::new()
            }
        }
    }
}
