//! cellflow-core - trackers, registries, collection views and the reactive workbook.

pub mod collection;
pub mod error;
pub mod registry;
pub mod settings;
pub mod tracker;
pub mod workbook;

pub use collection::{ItemId, PropertyValue, SortFilterResult, UserCollection, UserItem};
pub use error::{CellflowError, Result};
pub use registry::{
    CELL_NAMESPACE, COLLECTION_NAMESPACE, CollectionEvent, CollectionId, CollectionTracker,
    FunctionEvent, FunctionKey, FunctionTracker,
};
pub use settings::Settings;
pub use tracker::{Cell, CellEvent, CellId, CellTracker, Sheet, SheetEvent, SheetTracker};
pub use workbook::{RenameConfirmation, Workbook};

pub use cellflow_engine::engine::Location;
