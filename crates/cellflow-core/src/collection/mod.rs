//! User collections: items, sorted placement and chained views.

mod inserter;
mod item;
mod user_collection;

pub use inserter::{SortFilter, SortFilterResult, SortedListInserter};
pub use item::{ItemId, PropertyValue, UserItem};
pub use user_collection::{CollectionDefinition, UserCollection};
