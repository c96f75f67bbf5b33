//! Built-in script functions (Rust) registered on every Rhai engine.
//!
//! Conventions:
//! - Script-facing built-in names are ALL CAPS (e.g. `CELL`, `SUM`).
//! - `CELL`/`RANGE` are the targets of canonical references, so their
//!   argument order matches the canonical spelling: sheet, row, col.
//! - Cell handles are read-only snapshots; `set_text` journals a write that
//!   the caller applies after the run.

use crate::engine::dynamic_to_text;
use crate::engine::location::{Axis, Coord, Location, LocationReference, SheetRef};
use dashmap::DashMap;
use rhai::{Dynamic, Engine, EvalAltResult, Position};

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Text of every live cell, keyed by location.
pub type Grid = Arc<DashMap<Location, String>>;

/// Items of every collection, keyed by collection name.
pub type CollectionData = Arc<DashMap<String, rhai::Array>>;

/// A cell write requested by a script during a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingWrite {
    pub location: Location,
    pub text: String,
}

/// Tracks cell writes made by script builtins, in call order.
pub type ScriptModifications = Arc<Mutex<Vec<PendingWrite>>>;

/// Value a script gets back from `CELL(...)`.
#[derive(Clone)]
pub struct CellHandle {
    pub location: Location,
    pub text: String,
    grid: Grid,
    modifications: ScriptModifications,
}

impl CellHandle {
    /// Typed view of the text: integers, floats and TRUE/FALSE parse,
    /// anything else stays a string. Empty text is `""`.
    pub fn value(&self) -> Dynamic {
        text_to_dynamic(&self.text)
    }

    fn set_text(&mut self, text: String) {
        self.grid.insert(self.location.clone(), text.clone());
        self.text = text.clone();
        self.modifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(PendingWrite {
                location: self.location.clone(),
                text,
            });
    }
}

impl fmt::Debug for CellHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellHandle")
            .field("location", &self.location)
            .field("text", &self.text)
            .finish()
    }
}

pub fn text_to_dynamic(text: &str) -> Dynamic {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Dynamic::from(String::new());
    }
    if let Ok(n) = trimmed.parse::<i64>() {
        return Dynamic::from(n);
    }
    if let Ok(n) = trimmed.parse::<f64>()
        && n.is_finite()
    {
        return Dynamic::from(n);
    }
    match trimmed {
        "TRUE" | "true" => Dynamic::from(true),
        "FALSE" | "false" => Dynamic::from(false),
        _ => Dynamic::from(text.to_string()),
    }
}

fn numeric(value: &Dynamic) -> Option<f64> {
    if let Some(cell) = value.clone().try_cast::<CellHandle>() {
        return numeric(&cell.value());
    }
    if let Ok(n) = value.as_float() {
        return Some(n);
    }
    if let Ok(n) = value.as_int() {
        return Some(n as f64);
    }
    None
}

fn is_blank(value: &Dynamic) -> bool {
    if value.is_unit() {
        return true;
    }
    if let Some(cell) = value.clone().try_cast::<CellHandle>() {
        return cell.text.trim().is_empty();
    }
    matches!(value.clone().into_string(), Ok(s) if s.is_empty())
}

fn invalid_arg(message: &str) -> Box<EvalAltResult> {
    EvalAltResult::ErrorRuntime(message.into(), Position::NONE).into()
}

fn handle(grid: &Grid, modifications: &ScriptModifications, location: Location) -> CellHandle {
    let text = grid
        .get(&location)
        .map(|text| text.value().clone())
        .unwrap_or_default();
    CellHandle {
        location,
        text,
        grid: grid.clone(),
        modifications: modifications.clone(),
    }
}

pub fn register_builtins(
    engine: &mut Engine,
    grid: Grid,
    collections: CollectionData,
    modifications: ScriptModifications,
    max_range_cells: usize,
) {
    engine
        .register_type_with_name::<CellHandle>("Cell")
        .register_get("Text", |cell: &mut CellHandle| cell.text.clone())
        .register_get("Value", |cell: &mut CellHandle| cell.value())
        .register_get("Sheet", |cell: &mut CellHandle| cell.location.sheet.clone())
        .register_get("Row", |cell: &mut CellHandle| cell.location.row)
        .register_get("Column", |cell: &mut CellHandle| cell.location.col)
        .register_fn("is_empty", |cell: &mut CellHandle| cell.text.is_empty())
        .register_fn("to_string", |cell: &mut CellHandle| cell.text.clone())
        .register_fn("to_debug", |cell: &mut CellHandle| {
            format!("Cell({})", cell.location)
        })
        .register_fn("set_text", |cell: &mut CellHandle, value: Dynamic| {
            cell.set_text(dynamic_to_text(&value));
        });

    // CELL(sheet, row, col)
    let grid_cell = grid.clone();
    let mods_cell = modifications.clone();
    engine.register_fn("CELL", move |sheet: &str, row: i64, col: i64| -> CellHandle {
        handle(&grid_cell, &mods_cell, Location::new(sheet, row, col))
    });

    // RANGE(sheet, row, col, rowEnd, colEnd): row-major handles, min -> max
    let grid_range = grid.clone();
    let mods_range = modifications.clone();
    engine.register_fn(
        "RANGE",
        move |sheet: &str,
              row: i64,
              col: i64,
              row_end: i64,
              col_end: i64|
              -> Result<rhai::Array, Box<EvalAltResult>> {
            let reference = LocationReference::range(
                SheetRef::Named(sheet.to_string()),
                Coord::new(Axis::Absolute(row), Axis::Absolute(col)),
                Coord::new(Axis::Absolute(row_end), Axis::Absolute(col_end)),
            );
            let anchor = Location::corner(sheet);
            let Some(locations) = reference.resolve_limited(&anchor, max_range_cells) else {
                return Err(invalid_arg(&format!(
                    "range exceeds {} cells",
                    max_range_cells
                )));
            };
            Ok(locations
                .into_iter()
                .map(|location| Dynamic::from(handle(&grid_range, &mods_range, location)))
                .collect())
        },
    );

    // COLLECTION(name): snapshot of the collection's items, empty if unknown
    let collections_by_name = collections.clone();
    engine.register_fn("COLLECTION", move |name: &str| -> rhai::Array {
        collections_by_name
            .get(name)
            .map(|items| items.value().clone())
            .unwrap_or_default()
    });
    let collections_by_cell = collections.clone();
    engine.register_fn("COLLECTION", move |cell: CellHandle| -> rhai::Array {
        collections_by_cell
            .get(cell.text.as_str())
            .map(|items| items.value().clone())
            .unwrap_or_default()
    });

    engine.register_fn("SUM", |values: rhai::Array| -> f64 {
        values.iter().filter_map(numeric).sum()
    });

    engine.register_fn("AVG", |values: rhai::Array| -> f64 {
        let numbers: Vec<f64> = values.iter().filter_map(numeric).collect();
        if numbers.is_empty() {
            0.0
        } else {
            numbers.iter().sum::<f64>() / numbers.len() as f64
        }
    });

    engine.register_fn("MIN", |values: rhai::Array| -> f64 {
        values
            .iter()
            .filter_map(numeric)
            .reduce(f64::min)
            .unwrap_or(0.0)
    });

    engine.register_fn("MAX", |values: rhai::Array| -> f64 {
        values
            .iter()
            .filter_map(numeric)
            .reduce(f64::max)
            .unwrap_or(0.0)
    });

    // COUNT: non-empty entries
    engine.register_fn("COUNT", |values: rhai::Array| -> i64 {
        values.iter().filter(|value| !is_blank(value)).count() as i64
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Engine, Grid, CollectionData, ScriptModifications) {
        let grid: Grid = Arc::new(DashMap::new());
        let collections: CollectionData = Arc::new(DashMap::new());
        let modifications: ScriptModifications = Arc::new(Mutex::new(Vec::new()));
        let mut engine = Engine::new();
        register_builtins(
            &mut engine,
            grid.clone(),
            collections.clone(),
            modifications.clone(),
            100,
        );
        (engine, grid, collections, modifications)
    }

    #[test]
    fn test_cell_handle_accessors() {
        let (engine, grid, _, _) = setup();
        grid.insert(Location::new("S", 2, 1), "World".into());
        grid.insert(Location::new("S", 3, 1), "41".into());

        let text: String = engine.eval(r#"CELL("S", 2, 1).Text"#).unwrap();
        assert_eq!(text, "World");
        let value: i64 = engine.eval(r#"CELL("S", 3, 1).Value + 1"#).unwrap();
        assert_eq!(value, 42);
        let empty: String = engine.eval(r#"CELL("S", 9, 9).Text"#).unwrap();
        assert_eq!(empty, "");
        let row: i64 = engine.eval(r#"CELL("S", 3, 1).Row"#).unwrap();
        assert_eq!(row, 3);
    }

    #[test]
    fn test_text_to_dynamic() {
        assert_eq!(text_to_dynamic("12").as_int().unwrap(), 12);
        assert_eq!(text_to_dynamic("1.5").as_float().unwrap(), 1.5);
        assert!(text_to_dynamic("TRUE").as_bool().unwrap());
        assert_eq!(text_to_dynamic("nan").into_string().unwrap(), "nan");
        assert_eq!(text_to_dynamic("").into_string().unwrap(), "");
    }

    #[test]
    fn test_range_aggregates() {
        let (engine, grid, _, _) = setup();
        grid.insert(Location::new("S", 1, 1), "1".into());
        grid.insert(Location::new("S", 1, 2), "2".into());
        grid.insert(Location::new("S", 2, 1), "x".into());
        grid.insert(Location::new("S", 2, 2), "4.5".into());

        let sum: f64 = engine.eval(r#"SUM(RANGE("S", 2, 2, 1, 1))"#).unwrap();
        assert_eq!(sum, 7.5);
        let count: i64 = engine.eval(r#"COUNT(RANGE("S", 1, 1, 3, 2))"#).unwrap();
        assert_eq!(count, 4);
        let max: f64 = engine.eval(r#"MAX(RANGE("S", 1, 1, 2, 2))"#).unwrap();
        assert_eq!(max, 4.5);
        let avg: f64 = engine.eval(r#"AVG(RANGE("S", 1, 1, 1, 2))"#).unwrap();
        assert_eq!(avg, 1.5);
    }

    #[test]
    fn test_range_limit() {
        let (engine, _, _, _) = setup();
        assert!(engine.eval::<f64>(r#"SUM(RANGE("S", 1, 1, 100, 100))"#).is_err());
    }

    #[test]
    fn test_set_text_journals_write() {
        let (engine, grid, _, modifications) = setup();
        engine.run(r#"CELL("S", 1, 1).set_text(5)"#).unwrap();
        let writes = modifications.lock().unwrap().clone();
        assert_eq!(
            writes,
            vec![PendingWrite {
                location: Location::new("S", 1, 1),
                text: "5".into(),
            }]
        );
        assert_eq!(
            grid.get(&Location::new("S", 1, 1)).map(|t| t.value().clone()),
            Some("5".to_string())
        );
    }

    #[test]
    fn test_collection_lookup() {
        let (engine, grid, collections, _) = setup();
        collections.insert("Tasks".into(), vec![Dynamic::from(1_i64), Dynamic::from(2_i64)]);
        grid.insert(Location::new("S", 1, 1), "Tasks".into());

        let len: i64 = engine.eval(r#"COLLECTION("Tasks").len()"#).unwrap();
        assert_eq!(len, 2);
        let len: i64 = engine.eval(r#"COLLECTION(CELL("S", 1, 1)).len()"#).unwrap();
        assert_eq!(len, 2);
        let len: i64 = engine.eval(r#"COLLECTION("Missing").len()"#).unwrap();
        assert_eq!(len, 0);
    }
}
