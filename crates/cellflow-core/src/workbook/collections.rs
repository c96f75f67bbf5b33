use crate::collection::{ItemId, PropertyValue, UserItem};
use crate::error::Result;
use crate::registry::CollectionId;

use super::Workbook;

impl Workbook {
    /// Create a collection. With a `base` that already exists it becomes a
    /// view right away; otherwise the base stays pending until
    /// [`Self::link_up_collections`].
    pub fn create_collection(
        &mut self,
        name: &str,
        base: Option<&str>,
        sort_filter: Option<&str>,
    ) -> Result<CollectionId> {
        let id = self.collections.create_collection(name, base, sort_filter)?;
        if let Some(base) = base
            && self.collections.get(base).is_some()
        {
            let linked = self.with_sort_filter(|collections, eval| {
                collections.become_view_into_collection(name, base, eval)
            });
            if let Err(e) = linked {
                log::warn!("{} left pending on {}: {}", name, base, e);
            }
        }
        self.settle();
        Ok(id)
    }

    pub fn remove_collection(&mut self, name: &str) -> Result<()> {
        let result = self.collections.remove_collection(name);
        self.settle();
        result
    }

    pub fn rename_collection(&mut self, from: &str, to: &str) -> Result<()> {
        let result = self.collections.rename_collection(from, to);
        self.settle();
        result
    }

    pub fn add_item(&mut self, collection: &str, item: UserItem) -> Result<ItemId> {
        let result =
            self.with_sort_filter(|collections, eval| collections.add_item(collection, item, eval));
        self.settle();
        result
    }

    pub fn remove_item(&mut self, collection: &str, item: ItemId) -> Result<()> {
        let result = self.collections.remove_item(collection, item);
        self.settle();
        result
    }

    /// Change one property; every view the item is in re-keys it.
    pub fn set_item_property(
        &mut self,
        item: ItemId,
        property: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<()> {
        let value = value.into();
        let result = self.with_sort_filter(|collections, eval| {
            collections.set_item_property(item, property, value, eval)
        });
        self.settle();
        result
    }

    pub fn set_collection_sort_filter(&mut self, name: &str, function: Option<&str>) -> Result<()> {
        let result = self.with_sort_filter(|collections, eval| {
            collections.set_sort_filter(name, function, eval)
        });
        self.settle();
        result
    }

    pub fn become_view(&mut self, name: &str, base: &str) -> Result<()> {
        let result = self.with_sort_filter(|collections, eval| {
            collections.become_view_into_collection(name, base, eval)
        });
        self.settle();
        result
    }

    pub fn stop_being_view(&mut self, name: &str) -> Result<()> {
        let result = self.collections.stop_being_view_into_collection(name);
        self.settle();
        result
    }

    /// Re-run the collection's sort/filter function over its base.
    pub fn refresh_collection(&mut self, name: &str) -> Result<()> {
        let result = self.with_sort_filter(|collections, eval| {
            collections.refresh_sort_and_filter(name, eval)
        });
        self.settle();
        result
    }

    /// Link views whose bases were loaded after them. Returns how many
    /// were linked.
    pub fn link_up_collections(&mut self) -> Result<usize> {
        let result = self.with_sort_filter(|collections, eval| {
            collections.link_up_base_collections_after_load(eval)
        });
        self.settle();
        result
    }
}
