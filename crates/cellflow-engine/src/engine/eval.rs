//! Script host: compiles and invokes function scripts.
//!
//! [`ScriptHost`] is the seam between functions and the language runtime.
//! [`RhaiHost`] is the provided implementation: a Rhai engine with the
//! built-ins registered over shared mirrors of cell text and collection
//! items, plus a journal of cell writes made during runs.

use rhai::{Engine, Scope};
use std::sync::{Arc, PoisonError};

use super::location::Location;
use super::rewrite::{ANCHOR_COL, ANCHOR_ROW, ANCHOR_SHEET};
use super::{AST, Dynamic};
use crate::builtins::{CollectionData, Grid, PendingWrite, ScriptModifications};

/// A compiled script, shareable between clones of a function.
pub type Compiled = Arc<AST>;

pub const ITEMS: &str = "ITEMS";
pub const INDEX: &str = "INDEX";
pub const ITEM: &str = "ITEM";

/// Calling convention for a single run.
#[derive(Clone, Copy, Debug)]
pub enum Invocation<'a> {
    /// Cell-bound: `ANCHOR_SHEET`, `ANCHOR_ROW`, `ANCHOR_COL`.
    Cell { anchor: &'a Location },
    /// Sort/filter: `ITEMS`, `INDEX`, `ITEM`.
    Indexed { items: &'a rhai::Array, index: usize },
}

pub trait ScriptHost {
    fn compile(&self, source: &str) -> Result<Compiled, String>;
    fn invoke(&self, compiled: &Compiled, invocation: &Invocation<'_>) -> Result<Dynamic, String>;
}

/// Resource limits applied to every Rhai run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Limits {
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_range_cells: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_operations: 1_000_000,
            max_call_levels: 64,
            max_range_cells: 1_000_000,
        }
    }
}

/// Create a Rhai engine with built-ins registered over the given mirrors.
pub fn create_engine(
    grid: Grid,
    collections: CollectionData,
    modifications: ScriptModifications,
    limits: Limits,
) -> Engine {
    let mut engine = Engine::new();
    engine.set_max_operations(limits.max_operations);
    engine.set_max_call_levels(limits.max_call_levels);
    crate::builtins::register_builtins(
        &mut engine,
        grid,
        collections,
        modifications,
        limits.max_range_cells,
    );
    engine
}

pub struct RhaiHost {
    engine: Engine,
    grid: Grid,
    collections: CollectionData,
    modifications: ScriptModifications,
}

impl RhaiHost {
    pub fn new() -> Self {
        Self::with_limits(Limits::default())
    }

    pub fn with_limits(limits: Limits) -> Self {
        let grid = Grid::default();
        let collections = CollectionData::default();
        let modifications = ScriptModifications::default();
        let engine = create_engine(
            grid.clone(),
            collections.clone(),
            modifications.clone(),
            limits,
        );
        RhaiHost {
            engine,
            grid,
            collections,
            modifications,
        }
    }

    /// Cell text as scripts see it.
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Collection items as scripts see them.
    pub fn collections(&self) -> &CollectionData {
        &self.collections
    }

    pub fn set_cell_text(&self, location: &Location, text: &str) {
        if text.is_empty() {
            self.grid.remove(location);
        } else {
            self.grid.insert(location.clone(), text.to_string());
        }
    }

    pub fn clear_cell_text(&self, location: &Location) {
        self.grid.remove(location);
    }

    pub fn set_collection_items(&self, name: &str, items: rhai::Array) {
        self.collections.insert(name.to_string(), items);
    }

    pub fn remove_collection(&self, name: &str) {
        self.collections.remove(name);
    }

    /// Drain the writes scripts made since the last call.
    pub fn take_modifications(&self) -> Vec<PendingWrite> {
        std::mem::take(
            &mut *self
                .modifications
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }
}

impl Default for RhaiHost {
    fn default() -> Self {
        Self::new()
    }
}

fn scope_for(invocation: &Invocation<'_>) -> Scope<'static> {
    let mut scope = Scope::new();
    match invocation {
        Invocation::Cell { anchor } => {
            scope.push_constant(ANCHOR_SHEET, anchor.sheet.clone());
            scope.push_constant(ANCHOR_ROW, anchor.row);
            scope.push_constant(ANCHOR_COL, anchor.col);
        }
        Invocation::Indexed { items, index } => {
            let item = items.get(*index).cloned().unwrap_or(Dynamic::UNIT);
            scope.push_constant(ITEMS, (*items).clone());
            scope.push_constant(INDEX, *index as i64);
            scope.push_constant_dynamic(ITEM, item);
        }
    }
    scope
}

impl ScriptHost for RhaiHost {
    fn compile(&self, source: &str) -> Result<Compiled, String> {
        self.engine
            .compile(source)
            .map(Arc::new)
            .map_err(|e| e.to_string())
    }

    fn invoke(&self, compiled: &Compiled, invocation: &Invocation<'_>) -> Result<Dynamic, String> {
        let mut scope = scope_for(invocation);
        self.engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, compiled)
            .map_err(|e| e.to_string())
    }
}
