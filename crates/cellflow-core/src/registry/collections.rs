//! Collection registry and view propagation.
//!
//! Owns every [`UserCollection`] and the item store they share. Views link
//! to their base by [`CollectionId`], so renaming a base never breaks a
//! view. Item additions, removals and property changes flow from a base to
//! all of its transitive views.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use cellflow_engine::engine::{EventBus, SubscriptionId, detect_cycle};

use super::validate_identifier;
use crate::collection::{
    ItemId, PropertyValue, SortFilter, SortFilterResult, UserCollection, UserItem,
};
use crate::error::{CellflowError, Result};

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct CollectionId(pub(crate) u64);

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CollectionEvent {
    Added(String),
    Removed(String),
    Renamed { from: String, to: String },
    ItemAdded { collection: String, item: ItemId, index: usize },
    ItemRemoved { collection: String, item: ItemId },
    ItemChanged { item: ItemId, property: String },
    OrderChanged { collection: String },
}

impl CollectionEvent {
    /// Collections whose contents or order this event changes.
    pub fn affected_collections(&self) -> Vec<&str> {
        match self {
            CollectionEvent::Added(name) | CollectionEvent::Removed(name) => vec![name.as_str()],
            CollectionEvent::Renamed { from, to } => vec![from.as_str(), to.as_str()],
            CollectionEvent::ItemAdded { collection, .. }
            | CollectionEvent::ItemRemoved { collection, .. }
            | CollectionEvent::OrderChanged { collection } => vec![collection.as_str()],
            CollectionEvent::ItemChanged { .. } => Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct CollectionTracker {
    collections: BTreeMap<CollectionId, UserCollection>,
    by_name: HashMap<String, CollectionId>,
    items: HashMap<ItemId, UserItem>,
    next_id: u64,
    events: EventBus<CollectionEvent>,
    journal: Vec<CollectionEvent>,
}

impl CollectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&UserCollection> {
        self.by_name.get(name).and_then(|id| self.collections.get(id))
    }

    pub fn get_by_id(&self, id: CollectionId) -> Option<&UserCollection> {
        self.collections.get(&id)
    }

    /// Collection names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_name.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn item(&self, id: ItemId) -> Option<&UserItem> {
        self.items.get(&id)
    }

    /// Items of a collection in order.
    pub fn items_of(&self, name: &str) -> Result<Vec<&UserItem>> {
        let collection = self
            .get(name)
            .ok_or_else(|| CellflowError::CollectionNotFound(name.to_string()))?;
        Ok(collection
            .items()
            .iter()
            .filter_map(|id| self.items.get(id))
            .collect())
    }

    /// Names of the collections sorted or filtered by `function`.
    pub fn collections_using(&self, function: &str) -> Vec<String> {
        self.collections
            .values()
            .filter(|c| c.sort_filter() == Some(function))
            .map(|c| c.name().to_string())
            .collect()
    }

    pub fn subscribe(&mut self, handler: impl FnMut(&CollectionEvent) + 'static) -> SubscriptionId {
        self.events.subscribe(handler)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Drain events raised since the last call.
    pub fn take_changes(&mut self) -> Vec<CollectionEvent> {
        std::mem::take(&mut self.journal)
    }

    fn raise(&mut self, event: CollectionEvent) {
        self.events.emit(&event);
        self.journal.push(event);
    }

    fn id_of(&self, name: &str) -> Result<CollectionId> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| CellflowError::CollectionNotFound(name.to_string()))
    }

    fn name_of(&self, id: CollectionId) -> String {
        self.collections
            .get(&id)
            .map(|c| c.name.clone())
            .unwrap_or_default()
    }

    fn views_of(&self, id: CollectionId) -> Vec<CollectionId> {
        self.collections
            .values()
            .filter(|c| c.base == Some(id))
            .map(|c| c.id)
            .collect()
    }

    /// Links between `id` and an independent collection.
    fn depth(&self, id: CollectionId) -> usize {
        let mut depth = 0;
        let mut current = id;
        while let Some(base) = self.collections.get(&current).and_then(|c| c.base) {
            depth += 1;
            current = base;
            if depth > self.collections.len() {
                break;
            }
        }
        depth
    }

    /// Items of `id` in order, with `extra` appended.
    fn snapshot(&self, id: CollectionId, extra: Option<ItemId>) -> Vec<UserItem> {
        let Some(collection) = self.collections.get(&id) else {
            return Vec::new();
        };
        collection
            .items
            .iter()
            .chain(extra.iter())
            .filter_map(|item| self.items.get(item).cloned())
            .collect()
    }

    fn evaluate(
        &self,
        id: CollectionId,
        snapshot: &[UserItem],
        index: usize,
        eval: &mut dyn SortFilter,
    ) -> SortFilterResult {
        match self.collections.get(&id).and_then(|c| c.sort_filter.as_deref()) {
            Some(function) => eval.evaluate(function, snapshot, index),
            None => SortFilterResult::Keep(0),
        }
    }

    /// Evaluate `item` appended to `id` and insert it. Views skip rejected
    /// items. No events.
    fn place(&mut self, id: CollectionId, item: ItemId, eval: &mut dyn SortFilter) -> Option<usize> {
        let collection = self.collections.get(&id)?;
        if collection.contains(item) || !self.items.contains_key(&item) {
            return None;
        }
        let is_view = collection.is_view();
        let snapshot = self.snapshot(id, Some(item));
        let key = self.evaluate(id, &snapshot, snapshot.len() - 1, eval);
        if is_view && key.is_reject() {
            return None;
        }
        Some(self.collections.get_mut(&id)?.insert_sorted(item, key))
    }

    /// Place `item` in `id` and forward it to every view.
    fn offer(&mut self, id: CollectionId, item: ItemId, eval: &mut dyn SortFilter) {
        let Some(index) = self.place(id, item, eval) else {
            return;
        };
        let collection = self.name_of(id);
        self.raise(CollectionEvent::ItemAdded {
            collection,
            item,
            index,
        });
        for view in self.views_of(id) {
            self.offer(view, item, eval);
        }
    }

    /// Remove `item` from `id` and every transitive view.
    fn withdraw(&mut self, id: CollectionId, item: ItemId) {
        let removed = self
            .collections
            .get_mut(&id)
            .and_then(|c| c.remove(item))
            .is_some();
        if !removed {
            return;
        }
        let collection = self.name_of(id);
        self.raise(CollectionEvent::ItemRemoved { collection, item });
        for view in self.views_of(id) {
            self.withdraw(view, item);
        }
    }

    fn forget_if_orphaned(&mut self, item: ItemId) {
        if !self.collections.values().any(|c| c.contains(item)) {
            log::trace!("dropping orphaned item {}", item);
            self.items.remove(&item);
        }
    }

    /// Register a collection. `base` is recorded even if no such collection
    /// exists yet; linking happens in [`Self::become_view_into_collection`]
    /// or [`Self::link_up_base_collections_after_load`].
    pub fn create_collection(
        &mut self,
        name: &str,
        base: Option<&str>,
        sort_filter: Option<&str>,
    ) -> Result<CollectionId> {
        validate_identifier(name)?;
        if let Some(base) = base {
            validate_identifier(base)?;
        }
        if let Some(function) = sort_filter {
            validate_identifier(function)?;
        }
        if self.by_name.contains_key(name) {
            return Err(CellflowError::DuplicateCollection(name.to_string()));
        }

        let id = CollectionId(self.next_id);
        self.next_id += 1;
        self.collections.insert(
            id,
            UserCollection::new(
                id,
                name.to_string(),
                base.map(str::to_string),
                sort_filter.map(str::to_string),
            ),
        );
        self.by_name.insert(name.to_string(), id);
        self.raise(CollectionEvent::Added(name.to_string()));
        Ok(id)
    }

    pub fn remove_collection(&mut self, name: &str) -> Result<()> {
        let id = self.id_of(name)?;

        // Views stay, detached, with their base name pending.
        for view in self.views_of(id) {
            let items = self.collections.get(&view).map(|c| c.items.clone()).unwrap_or_default();
            for item in items {
                self.withdraw(view, item);
            }
            if let Some(v) = self.collections.get_mut(&view) {
                v.base = None;
            }
        }

        let Some(collection) = self.collections.remove(&id) else {
            return Err(CellflowError::CollectionNotFound(name.to_string()));
        };
        self.by_name.remove(name);
        for item in collection.items {
            self.forget_if_orphaned(item);
        }
        self.raise(CollectionEvent::Removed(name.to_string()));
        Ok(())
    }

    pub fn rename_collection(&mut self, from: &str, to: &str) -> Result<()> {
        validate_identifier(to)?;
        let id = self.id_of(from)?;
        if from == to {
            return Ok(());
        }
        if self.by_name.contains_key(to) {
            return Err(CellflowError::DuplicateCollection(to.to_string()));
        }

        self.by_name.remove(from);
        self.by_name.insert(to.to_string(), id);
        for collection in self.collections.values_mut() {
            if collection.id == id {
                collection.name = to.to_string();
            } else if collection.base == Some(id) {
                collection.base_name = Some(to.to_string());
            }
        }
        self.raise(CollectionEvent::Renamed {
            from: from.to_string(),
            to: to.to_string(),
        });
        Ok(())
    }

    /// Add an item to an independent collection and every view over it.
    pub fn add_item(&mut self, name: &str, item: UserItem, eval: &mut dyn SortFilter) -> Result<ItemId> {
        let id = self.id_of(name)?;
        if self.get(name).is_some_and(|c| c.is_view() || c.is_pending_link()) {
            return Err(CellflowError::CollectionIsView(name.to_string()));
        }
        let item_id = item.id;
        if self.items.contains_key(&item_id) {
            return Err(CellflowError::DuplicateItem(item_id));
        }
        self.items.insert(item_id, item);
        self.offer(id, item_id, eval);
        Ok(item_id)
    }

    /// Remove an item from an independent collection and every view over it.
    pub fn remove_item(&mut self, name: &str, item: ItemId) -> Result<()> {
        let id = self.id_of(name)?;
        let collection = self.get(name).ok_or_else(|| CellflowError::CollectionNotFound(name.to_string()))?;
        if collection.is_view() || collection.is_pending_link() {
            return Err(CellflowError::CollectionIsView(name.to_string()));
        }
        if !collection.contains(item) {
            return Err(CellflowError::ItemNotFound(item));
        }
        self.withdraw(id, item);
        self.forget_if_orphaned(item);
        Ok(())
    }

    /// Change one property and re-evaluate the item everywhere it is, or
    /// could now be, tracked.
    pub fn set_item_property(
        &mut self,
        item: ItemId,
        property: &str,
        value: PropertyValue,
        eval: &mut dyn SortFilter,
    ) -> Result<()> {
        let stored = self.items.get_mut(&item).ok_or(CellflowError::ItemNotFound(item))?;
        if stored.get(property) == Some(&value) {
            return Ok(());
        }
        stored.set(property, value);
        self.raise(CollectionEvent::ItemChanged {
            item,
            property: property.to_string(),
        });
        self.reevaluate_item(item, eval);
        Ok(())
    }

    fn reevaluate_item(&mut self, item: ItemId, eval: &mut dyn SortFilter) {
        // Bases before views, so a view sees its base's final state.
        let mut order: Vec<CollectionId> = self.collections.keys().copied().collect();
        order.sort_by_key(|id| self.depth(*id));

        for id in order {
            let Some(collection) = self.collections.get(&id) else {
                continue;
            };
            let base = collection.base;

            if let Some(index) = collection.position(item) {
                let is_view = collection.is_view();
                let old = collection.key(item);
                let snapshot = self.snapshot(id, None);
                let key = self.evaluate(id, &snapshot, index, eval);
                if Some(key) == old {
                    continue;
                }
                if is_view && key.is_reject() {
                    self.withdraw(id, item);
                    continue;
                }
                if let Some(collection) = self.collections.get_mut(&id) {
                    collection.rekey(item, key);
                }
                let collection = self.name_of(id);
                self.raise(CollectionEvent::OrderChanged { collection });
            } else if let Some(base) = base
                && self.collections.get(&base).is_some_and(|b| b.contains(item))
            {
                self.offer(id, item, eval);
            }
        }
    }

    /// Independent: re-key every item and stable re-order. View: rebuild
    /// from the base, then refresh the views over it.
    pub fn refresh_sort_and_filter(&mut self, name: &str, eval: &mut dyn SortFilter) -> Result<()> {
        let id = self.id_of(name)?;
        self.refresh(id, eval);
        Ok(())
    }

    fn refresh(&mut self, id: CollectionId, eval: &mut dyn SortFilter) {
        let Some(collection) = self.collections.get(&id) else {
            return;
        };
        let name = collection.name.clone();
        let base = collection.base;

        match base {
            None => {
                let snapshot = self.snapshot(id, None);
                let keys: Vec<(ItemId, SortFilterResult)> = (0..snapshot.len())
                    .map(|index| (snapshot[index].id, self.evaluate(id, &snapshot, index, eval)))
                    .collect();
                let Some(collection) = self.collections.get_mut(&id) else {
                    return;
                };
                collection.keys = keys.into_iter().collect();
                if collection.sort_by_keys() {
                    self.raise(CollectionEvent::OrderChanged { collection: name });
                }
            }
            Some(base) => {
                let before = self.collections.get_mut(&id).map(|c| c.clear()).unwrap_or_default();
                let base_items = self
                    .collections
                    .get(&base)
                    .map(|b| b.items.clone())
                    .unwrap_or_default();
                for item in base_items {
                    self.place(id, item, eval);
                }
                let after = self.collections.get(&id).map(|c| c.items.clone()).unwrap_or_default();
                log::debug!("rebuilt view {} ({} -> {} items)", name, before.len(), after.len());

                for item in before.iter().filter(|item| !after.contains(item)) {
                    self.raise(CollectionEvent::ItemRemoved {
                        collection: name.clone(),
                        item: *item,
                    });
                }
                for (index, item) in after.iter().enumerate() {
                    if !before.contains(item) {
                        self.raise(CollectionEvent::ItemAdded {
                            collection: name.clone(),
                            item: *item,
                            index,
                        });
                    }
                }
                let kept_before: Vec<&ItemId> = before.iter().filter(|i| after.contains(i)).collect();
                let kept_after: Vec<&ItemId> = after.iter().filter(|i| before.contains(i)).collect();
                if kept_before != kept_after {
                    self.raise(CollectionEvent::OrderChanged { collection: name });
                }

                for view in self.views_of(id) {
                    self.refresh(view, eval);
                }
            }
        }
    }

    pub fn set_sort_filter(
        &mut self,
        name: &str,
        function: Option<&str>,
        eval: &mut dyn SortFilter,
    ) -> Result<()> {
        if let Some(function) = function {
            validate_identifier(function)?;
        }
        let id = self.id_of(name)?;
        if let Some(collection) = self.collections.get_mut(&id) {
            collection.sort_filter = function.map(str::to_string);
        }
        self.refresh(id, eval);
        Ok(())
    }

    /// Make `name` a live view over `base`. Its own items are dropped.
    pub fn become_view_into_collection(
        &mut self,
        name: &str,
        base: &str,
        eval: &mut dyn SortFilter,
    ) -> Result<()> {
        let id = self.id_of(name)?;
        let base_id = self.id_of(base)?;
        self.check_cycle(id, base_id)?;
        self.link(id, base_id, eval);
        Ok(())
    }

    /// The collection `id` is, or is waiting to become, a view of.
    fn base_of(&self, id: CollectionId) -> Option<CollectionId> {
        let collection = self.collections.get(&id)?;
        collection.base.or_else(|| {
            collection
                .base_name
                .as_ref()
                .and_then(|name| self.by_name.get(name))
                .copied()
        })
    }

    /// Fail if making `id` a view of `base` would close a loop, counting
    /// links that are still pending.
    fn check_cycle(&self, id: CollectionId, base: CollectionId) -> Result<()> {
        let cycle = detect_cycle(&id, |current| {
            if *current == id {
                vec![base]
            } else {
                self.base_of(*current).into_iter().collect()
            }
        });
        match cycle {
            Some(path) => Err(CellflowError::CollectionCycle(
                path.into_iter().map(|c| self.name_of(c)).collect(),
            )),
            None => Ok(()),
        }
    }

    fn link(&mut self, id: CollectionId, base: CollectionId, eval: &mut dyn SortFilter) {
        let base_name = self.name_of(base);
        let Some(collection) = self.collections.get_mut(&id) else {
            return;
        };
        let previous = collection.items.clone();
        collection.base = Some(base);
        collection.base_name = Some(base_name.clone());
        log::debug!("linking {} to base {}", collection.name, base_name);

        self.refresh(id, eval);
        for item in previous {
            self.forget_if_orphaned(item);
        }
    }

    /// Detach from the base; every view item is removed.
    pub fn stop_being_view_into_collection(&mut self, name: &str) -> Result<()> {
        let id = self.id_of(name)?;
        let items = self.collections.get(&id).map(|c| c.items.clone()).unwrap_or_default();
        for item in items {
            self.withdraw(id, item);
        }
        if let Some(collection) = self.collections.get_mut(&id) {
            collection.base = None;
            collection.base_name = None;
        }
        Ok(())
    }

    /// Link every collection whose recorded base is not yet linked. Each
    /// pass links the collections whose base is ready; a pass that makes no
    /// progress means the remaining bases are missing or cyclic.
    pub fn link_up_base_collections_after_load(&mut self, eval: &mut dyn SortFilter) -> Result<usize> {
        let mut linked = 0;
        loop {
            let pending: Vec<CollectionId> = self
                .collections
                .values()
                .filter(|c| c.is_pending_link())
                .map(|c| c.id)
                .collect();
            if pending.is_empty() {
                return Ok(linked);
            }

            let mut progress = false;
            for id in &pending {
                let Some(base) = self
                    .collections
                    .get(id)
                    .and_then(|c| c.base_name.as_ref())
                    .and_then(|name| self.by_name.get(name))
                    .copied()
                else {
                    continue;
                };
                let ready = base != *id
                    && self
                        .collections
                        .get(&base)
                        .is_some_and(|b| !b.is_pending_link());
                if ready {
                    self.check_cycle(*id, base)?;
                    self.link(*id, base, eval);
                    linked += 1;
                    progress = true;
                }
            }

            if !progress {
                let mut names: Vec<String> = pending.into_iter().map(|id| self.name_of(id)).collect();
                names.sort();
                return Err(CellflowError::CollectionLink(names));
            }
        }
    }
}
