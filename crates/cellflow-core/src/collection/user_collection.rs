use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{ItemId, SortFilterResult, SortedListInserter};
use crate::registry::CollectionId;

/// Serializable shape of a collection: everything but its derived contents.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionDefinition {
    pub name: String,
    pub base: Option<String>,
    pub sort_filter: Option<String>,
}

/// A named, ordered list of items. Either independent (items added
/// directly) or a view whose items are the unrejected items of its base.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserCollection {
    pub(crate) id: CollectionId,
    pub(crate) name: String,
    /// Base as recorded, possibly not yet linked.
    pub(crate) base_name: Option<String>,
    pub(crate) base: Option<CollectionId>,
    pub(crate) sort_filter: Option<String>,
    pub(crate) items: Vec<ItemId>,
    pub(crate) keys: HashMap<ItemId, SortFilterResult>,
}

impl UserCollection {
    pub(crate) fn new(
        id: CollectionId,
        name: String,
        base_name: Option<String>,
        sort_filter: Option<String>,
    ) -> Self {
        UserCollection {
            id,
            name,
            base_name,
            base: None,
            sort_filter,
            items: Vec::new(),
            keys: HashMap::new(),
        }
    }

    pub fn id(&self) -> CollectionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_name(&self) -> Option<&str> {
        self.base_name.as_deref()
    }

    pub fn base(&self) -> Option<CollectionId> {
        self.base
    }

    /// Linked to a base collection.
    pub fn is_view(&self) -> bool {
        self.base.is_some()
    }

    /// Names a base that has not been linked yet.
    pub fn is_pending_link(&self) -> bool {
        self.base_name.is_some() && self.base.is_none()
    }

    pub fn sort_filter(&self) -> Option<&str> {
        self.sort_filter.as_deref()
    }

    pub fn items(&self) -> &[ItemId] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, item: ItemId) -> bool {
        self.keys.contains_key(&item)
    }

    pub fn position(&self, item: ItemId) -> Option<usize> {
        self.items.iter().position(|id| *id == item)
    }

    pub fn key(&self, item: ItemId) -> Option<SortFilterResult> {
        self.keys.get(&item).copied()
    }

    pub fn definition(&self) -> CollectionDefinition {
        CollectionDefinition {
            name: self.name.clone(),
            base: self.base_name.clone(),
            sort_filter: self.sort_filter.clone(),
        }
    }

    fn key_at(&self, index: usize) -> SortFilterResult {
        self.keys
            .get(&self.items[index])
            .copied()
            .unwrap_or(SortFilterResult::Reject)
    }

    /// Place `item` by key; returns its index.
    pub(crate) fn insert_sorted(&mut self, item: ItemId, key: SortFilterResult) -> usize {
        let at = SortedListInserter::insertion_index(self.items.len(), &key, |i| self.key_at(i));
        self.items.insert(at, item);
        self.keys.insert(item, key);
        at
    }

    pub(crate) fn remove(&mut self, item: ItemId) -> Option<usize> {
        let at = self.position(item)?;
        self.items.remove(at);
        self.keys.remove(&item);
        Some(at)
    }

    /// Re-place `item` under a new key. Returns true if its index changed.
    pub(crate) fn rekey(&mut self, item: ItemId, key: SortFilterResult) -> bool {
        let Some(before) = self.remove(item) else {
            return false;
        };
        self.insert_sorted(item, key) != before
    }

    /// Stable re-order by the cached keys. Returns true if the order changed.
    pub(crate) fn sort_by_keys(&mut self) -> bool {
        let before = self.items.clone();
        let keys = &self.keys;
        self.items
            .sort_by_key(|id| keys.get(id).copied().unwrap_or(SortFilterResult::Reject));
        self.items != before
    }

    pub(crate) fn clear(&mut self) -> Vec<ItemId> {
        self.keys.clear();
        std::mem::take(&mut self.items)
    }
}
