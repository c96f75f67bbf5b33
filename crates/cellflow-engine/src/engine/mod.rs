//! Cellflow engine API.
//!
//! - [`Location`], [`LocationReference`] - Addresses and references to them
//! - [`canonicalize_script`], [`symbolize_script`] - Reference rewriting
//! - [`extract_dependencies`] - Locations and collections a script reads
//! - [`Function`] - Script text, dependencies and compiled callable
//! - [`CollectionReference`] - Constant or computed collection names
//! - [`ScriptHost`], [`RhaiHost`] - Compile and run scripts
//! - [`EventBus`] - Subscribable events
//! - [`detect_cycle`] - Circular dependency detection
//! - [`dynamic_to_text`], [`format_dynamic`] - Values as stored text and for display

pub(crate) mod collection_ref;
pub(crate) mod cycle;
pub(crate) mod deps;
pub(crate) mod eval;
pub(crate) mod events;
pub(crate) mod format;
pub(crate) mod function;
pub(crate) mod location;
pub(crate) mod rewrite;

pub use collection_ref::{
    CollectionInvalidated, CollectionReference, ConstantCollectionReference,
    DYNAMIC_REFERENCE_NAMESPACE, DynamicCollectionReference,
};
pub use cycle::detect_cycle;
pub use deps::{COLLECTION_FN, CollectionAccess, Dependencies, extract_dependencies};
pub use eval::{Compiled, ITEM, ITEMS, INDEX, Invocation, Limits, RhaiHost, ScriptHost, create_engine};
pub use events::{EventBus, SubscriptionId};
pub use format::{dynamic_to_text, format_dynamic, format_number};
pub use function::{CompileOutcome, Function, FunctionState, ReturnType, fingerprint};
pub use location::{
    Axis, Coord, Location, LocationReference, MAX_SHEET_COLUMN, ResolvedBounds, SheetRef,
    col_to_letters, is_plain_sheet_name, letters_to_col,
};
pub use rewrite::{
    ANCHOR_COL, ANCHOR_ROW, ANCHOR_SHEET, CELL_FN, RANGE_FN, canonicalize_script,
    symbolize_script, to_canonical, to_canonical_from_symbolic, to_symbolic,
    try_parse_canonical, try_parse_symbolic,
};

pub use crate::builtins::{CellHandle, CollectionData, Grid, PendingWrite, ScriptModifications};

pub use rhai::{AST, Dynamic};
