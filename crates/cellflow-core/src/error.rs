//! Error types for cellflow core.

use thiserror::Error;

use cellflow_engine::engine::Location;
use cellflow_engine::error::EngineError;

use crate::collection::ItemId;
use crate::tracker::CellId;

/// Errors that can occur while editing a workbook
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CellflowError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Invalid identifier {name:?}: {reason}")]
    InvalidIdentifier { name: String, reason: &'static str },

    #[error("Cell {0} already exists")]
    DuplicateCell(CellId),

    #[error("Location {0} is already occupied")]
    LocationOccupied(Location),

    #[error("Cell not found: {0}")]
    CellNotFound(String),

    #[error("Function {namespace}::{name} already exists")]
    DuplicateFunction { namespace: String, name: String },

    #[error("Function not found: {namespace}::{name}")]
    FunctionNotFound { namespace: String, name: String },

    #[error("Collection {0} already exists")]
    DuplicateCollection(String),

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Collection {0} is a view; its items come from its base")]
    CollectionIsView(String),

    #[error("Item not found: {0}")]
    ItemNotFound(ItemId),

    #[error("Item {0} already exists")]
    DuplicateItem(ItemId),

    #[error("Collection cycle: {}", .0.join(" -> "))]
    CollectionCycle(Vec<String>),

    #[error("Unresolvable base collections: {}", .0.join(", "))]
    CollectionLink(Vec<String>),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CellflowError>;
