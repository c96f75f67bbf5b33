use cellflow_engine::engine::{Location, canonicalize_script};
use cellflow_engine::error::EngineError;

use super::Workbook;
use crate::error::{CellflowError, Result};
use crate::registry::{CELL_NAMESPACE, FunctionKey};
use crate::tracker::{Cell, CellId};

/// Dimension for row/column operations
#[derive(Copy, Clone)]
enum Dimension {
    Row,
    Column,
}

impl Dimension {
    fn coord(&self, location: &Location) -> i64 {
        match self {
            Dimension::Row => location.row,
            Dimension::Column => location.col,
        }
    }

    /// `location` moved `delta` rows or columns; `None` past the `i64` range.
    fn shift(&self, location: &Location, delta: i64) -> Option<Location> {
        match self {
            Dimension::Row => location.offset(delta, 0),
            Dimension::Column => location.offset(0, delta),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Dimension::Row => "row",
            Dimension::Column => "column",
        }
    }
}

impl Workbook {
    fn cell_not_found(id: CellId) -> CellflowError {
        CellflowError::CellNotFound(id.to_string())
    }

    fn location_of(&self, id: CellId) -> Result<Location> {
        self.cells
            .get(id)
            .map(|cell| cell.location().clone())
            .ok_or_else(|| Self::cell_not_found(id))
    }

    /// Add a fully-formed cell (e.g. from a loader), run its functions and
    /// notify whatever reads its location.
    pub fn add_cell(&mut self, cell: Cell) -> Result<CellId> {
        let location = cell.location().clone();
        let text = cell.text.clone();
        let has_function = cell.has_function();
        let id = self.cells.add_cell(cell)?;
        self.host.set_cell_text(&location, &text);

        if has_function {
            self.recompute_cell(id);
        }
        self.propagate_from(&location);
        self.settle();
        Ok(id)
    }

    /// Set literal text at a location, creating the cell if needed. A
    /// populate function on the cell is dropped; the text replaces it.
    pub fn set_cell_text(&mut self, location: &Location, text: &str) -> Result<CellId> {
        let id = match self.cells.id_at(location) {
            Some(id) => id,
            None => self.cells.add_cell(Cell::new(location.clone()))?,
        };
        let had_populate = self.cells.modify(id, |cell| {
            cell.error = None;
            cell.populate.take().is_some()
        })?;
        if had_populate {
            self.subscribe_cell(id);
        }

        if let Some(location) = self.store_text(id, text.to_string()) {
            self.propagate_from(&location);
        }
        self.settle();
        Ok(id)
    }

    pub fn remove_cell(&mut self, id: CellId) -> Result<Cell> {
        self.unsubscribe_cell(id);
        let cell = self
            .cells
            .remove_cell(id)
            .ok_or_else(|| Self::cell_not_found(id))?;
        self.host.clear_cell_text(cell.location());
        self.propagate_from(cell.location());
        self.settle();
        Ok(cell)
    }

    /// Remove whatever cell is at `location`. Returns it, if there was one.
    pub fn clear_cell(&mut self, location: &Location) -> Result<Option<Cell>> {
        match self.cells.id_at(location) {
            Some(id) => self.remove_cell(id).map(Some),
            None => Ok(None),
        }
    }

    /// Tracker move plus mirror update; no re-evaluation.
    fn relocate(&mut self, id: CellId, to: Location) -> Result<Location> {
        let from = self.location_of(id)?;
        self.cells.move_cell(id, to.clone())?;
        let text = self.cells.get(id).map(|cell| cell.text.clone()).unwrap_or_default();
        self.host.clear_cell_text(&from);
        self.host.set_cell_text(&to, &text);
        Ok(from)
    }

    /// Move a cell. Its relative references now resolve from the new
    /// location; readers of both locations re-run.
    pub fn move_cell(&mut self, id: CellId, to: Location) -> Result<()> {
        let from = self.relocate(id, to.clone())?;
        if from == to {
            return Ok(());
        }
        self.recompute_cell(id);
        self.propagate_from(&from);
        self.propagate_from(&to);
        self.settle();
        Ok(())
    }

    pub fn set_populate_function(&mut self, id: CellId, key: Option<FunctionKey>) -> Result<()> {
        self.cells.modify(id, |cell| {
            cell.populate = key;
            cell.error = None;
        })?;
        self.recompute_checked(id);
        self.settle();
        Ok(())
    }

    pub fn set_trigger_function(&mut self, id: CellId, key: Option<FunctionKey>) -> Result<()> {
        self.cells.modify(id, |cell| {
            cell.trigger = key;
            cell.error = None;
        })?;
        self.subscribe_cell(id);
        self.recompute_cell(id);
        self.settle();
        Ok(())
    }

    /// Give a cell its own populate function from text authored at the
    /// cell (e.g. `return A2.Text;`). Creates or updates `cells::cell_<id>`.
    pub fn set_cell_formula(&mut self, id: CellId, text: &str) -> Result<FunctionKey> {
        let anchor = self.location_of(id)?;
        let script = canonicalize_script(text, &anchor);
        let key = FunctionKey::cell(format!("cell_{}", id));

        if self.functions.contains(&key) {
            self.functions.set_script(&key, &script)?;
        } else {
            self.functions
                .add_cell_function_to_namespace(CELL_NAMESPACE, &key.name, &script)?;
        }
        self.cells.modify(id, |cell| cell.populate = Some(key.clone()))?;
        self.recompute_checked(id);
        self.settle();
        Ok(key)
    }

    pub fn set_cell_property(&mut self, id: CellId, name: &str, value: &str) -> Result<()> {
        self.cells.modify(id, |cell| {
            cell.properties.insert(name.to_string(), value.to_string());
        })
    }

    pub fn set_sheet_order(&mut self, sheet: &str, order: i64) -> Result<()> {
        self.cells.sheets_mut().set_order(sheet, order)
    }

    /// Insert `count` empty rows before `at`.
    pub fn insert_rows(&mut self, sheet: &str, at: i64, count: i64) -> Result<()> {
        self.insert_lines(Dimension::Row, sheet, at, count)
    }

    /// Delete `count` rows starting at `at`; their cells are removed.
    pub fn delete_rows(&mut self, sheet: &str, at: i64, count: i64) -> Result<()> {
        self.delete_lines(Dimension::Row, sheet, at, count)
    }

    pub fn insert_columns(&mut self, sheet: &str, at: i64, count: i64) -> Result<()> {
        self.insert_lines(Dimension::Column, sheet, at, count)
    }

    pub fn delete_columns(&mut self, sheet: &str, at: i64, count: i64) -> Result<()> {
        self.delete_lines(Dimension::Column, sheet, at, count)
    }

    fn out_of_range(dim: Dimension, at: i64, count: i64) -> CellflowError {
        EngineError::InvalidReference(format!(
            "{} {} (count {}) is out of range",
            dim.label(),
            at,
            count
        ))
        .into()
    }

    fn check_lines(dim: Dimension, at: i64, count: i64) -> Result<()> {
        if at < 1 || count < 0 {
            return Err(Self::out_of_range(dim, at, count));
        }
        Ok(())
    }

    /// Pair each cell with its target, or fail before anything moves.
    fn shifted(
        dim: Dimension,
        cells: Vec<(CellId, Location)>,
        delta: i64,
        at: i64,
    ) -> Result<Vec<(CellId, Location)>> {
        cells
            .into_iter()
            .map(|(id, location)| {
                dim.shift(&location, delta)
                    .map(|to| (id, to))
                    .ok_or_else(|| Self::out_of_range(dim, at, delta.abs()))
            })
            .collect()
    }

    /// (id, location) of the cells on `sheet` at or beyond `from` in `dim`.
    fn cells_from(&self, dim: Dimension, sheet: &str, from: i64) -> Vec<(CellId, Location)> {
        self.cells
            .cells_on_sheet(sheet)
            .into_iter()
            .filter(|cell| dim.coord(cell.location()) >= from)
            .map(|cell| (cell.id, cell.location().clone()))
            .collect()
    }

    fn insert_lines(&mut self, dim: Dimension, sheet: &str, at: i64, count: i64) -> Result<()> {
        Self::check_lines(dim, at, count)?;
        if count == 0 {
            return Ok(());
        }

        // Far side first so no move lands on an occupied slot.
        let mut moving = self.cells_from(dim, sheet, at);
        moving.sort_by_key(|(_, location)| std::cmp::Reverse(dim.coord(location)));
        for (id, to) in Self::shifted(dim, moving, count, at)? {
            self.relocate(id, to)?;
        }

        log::debug!("inserted {} {}s at {} on {}", count, dim.label(), at, sheet);
        self.recalculate_all();
        self.settle();
        Ok(())
    }

    fn delete_lines(&mut self, dim: Dimension, sheet: &str, at: i64, count: i64) -> Result<()> {
        Self::check_lines(dim, at, count)?;
        if count == 0 {
            return Ok(());
        }

        // No end means the deleted span runs past the last addressable line.
        let end = at.checked_add(count);
        for (id, _) in self
            .cells_from(dim, sheet, at)
            .into_iter()
            .filter(|(_, location)| end.is_none_or(|end| dim.coord(location) < end))
        {
            self.unsubscribe_cell(id);
            if let Some(cell) = self.cells.remove_cell(id) {
                self.host.clear_cell_text(cell.location());
            }
        }

        let mut moving = match end {
            Some(end) => self.cells_from(dim, sheet, end),
            None => Vec::new(),
        };
        moving.sort_by_key(|(_, location)| dim.coord(location));
        for (id, to) in Self::shifted(dim, moving, -count, at)? {
            self.relocate(id, to)?;
        }

        log::debug!("deleted {} {}s at {} on {}", count, dim.label(), at, sheet);
        self.recalculate_all();
        self.settle();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(row: i64, col: i64) -> Location {
        Location::new("Sheet1", row, col)
    }

    #[test]
    fn test_reactive_recompute() {
        let mut wb = Workbook::new();
        wb.set_cell_text(&loc(2, 1), "World").unwrap();
        let a1 = wb.set_cell_text(&loc(1, 1), "").unwrap();
        wb.set_cell_formula(a1, "return \"Hello\" + A2.Text;").unwrap();
        assert_eq!(wb.cell_text(&loc(1, 1)), Some("HelloWorld"));

        wb.set_cell_text(&loc(2, 1), "There").unwrap();
        assert_eq!(wb.cell_text(&loc(1, 1)), Some("HelloThere"));
        assert_eq!(wb.subscribers_of(&loc(2, 1)), vec![a1]);
    }

    #[test]
    fn test_chain_propagates() {
        let mut wb = Workbook::new();
        wb.set_cell_text(&loc(1, 1), "1").unwrap();
        let b1 = wb.set_cell_text(&loc(1, 2), "").unwrap();
        let c1 = wb.set_cell_text(&loc(1, 3), "").unwrap();
        wb.set_cell_formula(b1, "A1.Value + 1").unwrap();
        wb.set_cell_formula(c1, "B1.Value * 10").unwrap();
        assert_eq!(wb.cell_text(&loc(1, 3)), Some("20"));

        wb.set_cell_text(&loc(1, 1), "4").unwrap();
        assert_eq!(wb.cell_text(&loc(1, 2)), Some("5"));
        assert_eq!(wb.cell_text(&loc(1, 3)), Some("50"));
    }

    #[test]
    fn test_dependents_see_full_precision() {
        let mut wb = Workbook::new();
        let a1 = wb.set_cell_text(&loc(1, 1), "").unwrap();
        let a2 = wb.set_cell_text(&loc(2, 1), "").unwrap();
        wb.set_cell_formula(a1, "1.0 / 3.0").unwrap();
        wb.set_cell_formula(a2, "A1.Value * 3.0").unwrap();
        assert_eq!(wb.cell_text(&loc(2, 1)), Some("1"));
        let stored: f64 = wb.cell_text(&loc(1, 1)).unwrap().parse().unwrap();
        assert_eq!(stored, 1.0 / 3.0);
    }

    #[test]
    fn test_literal_text_replaces_formula() {
        let mut wb = Workbook::new();
        let a1 = wb.set_cell_text(&loc(1, 1), "").unwrap();
        wb.set_cell_formula(a1, "B1.Text").unwrap();
        wb.set_cell_text(&loc(1, 1), "fixed").unwrap();
        wb.set_cell_text(&loc(1, 2), "changed").unwrap();
        assert_eq!(wb.cell_text(&loc(1, 1)), Some("fixed"));
        assert!(wb.subscribers_of(&loc(1, 2)).is_empty());
    }

    #[test]
    fn test_move_cell_re_resolves_relative_references() {
        let mut wb = Workbook::new();
        wb.set_cell_text(&loc(2, 1), "below A1").unwrap();
        wb.set_cell_text(&loc(6, 3), "below C5").unwrap();
        let id = wb.set_cell_text(&loc(1, 1), "").unwrap();
        wb.set_cell_formula(id, "A2.Text").unwrap();
        assert_eq!(wb.cell_text(&loc(1, 1)), Some("below A1"));

        wb.move_cell(id, loc(5, 3)).unwrap();
        assert_eq!(wb.cell_text(&loc(5, 3)), Some("below C5"));
        assert!(wb.cell_text(&loc(1, 1)).is_none());
        assert_eq!(wb.subscribers_of(&loc(6, 3)), vec![id]);
        assert!(wb.subscribers_of(&loc(2, 1)).is_empty());
    }

    #[test]
    fn test_move_onto_occupied_fails() {
        let mut wb = Workbook::new();
        let a = wb.set_cell_text(&loc(1, 1), "a").unwrap();
        wb.set_cell_text(&loc(1, 2), "b").unwrap();
        assert!(matches!(
            wb.move_cell(a, loc(1, 2)),
            Err(CellflowError::LocationOccupied(_))
        ));
        assert_eq!(wb.cell_text(&loc(1, 1)), Some("a"));
    }

    #[test]
    fn test_self_reference_is_recorded_not_panicking() {
        let mut wb = Workbook::new();
        let a1 = wb.set_cell_text(&loc(1, 1), "1").unwrap();
        wb.set_cell_formula(a1, "A1.Value + 1").unwrap();
        let error = wb.cell_error(&loc(1, 1)).unwrap_or_default();
        assert!(error.contains("circular"), "{error}");
    }

    #[test]
    fn test_mutual_recursion_guard() {
        let mut wb = Workbook::new();
        let a1 = wb.set_cell_text(&loc(1, 1), "").unwrap();
        let b1 = wb.set_cell_text(&loc(1, 2), "").unwrap();
        wb.set_cell_formula(a1, "B1.Text + \"a\"").unwrap();
        wb.set_cell_formula(b1, "A1.Text + \"b\"").unwrap();
        let errors = [wb.cell_error(&loc(1, 1)), wb.cell_error(&loc(1, 2))];
        assert!(errors.iter().any(|e| e.is_some_and(|m| m.contains("circular"))));
    }

    #[test]
    fn test_populate_cycle_is_reported_as_locations() {
        let mut wb = Workbook::new();
        let a1 = wb.set_cell_text(&loc(1, 1), "").unwrap();
        let b1 = wb.set_cell_text(&loc(1, 2), "").unwrap();
        wb.set_cell_formula(a1, "B1.Text").unwrap();
        assert!(wb.populate_cycle(a1).is_none());
        wb.set_cell_formula(b1, "A1.Text").unwrap();
        assert_eq!(wb.populate_cycle(b1), Some(vec![loc(1, 2), loc(1, 1), loc(1, 2)]));
    }

    #[test]
    fn test_propagation_depth_limit() {
        let settings = crate::settings::Settings {
            max_propagation_depth: 3,
            ..Default::default()
        };
        let mut wb = Workbook::with_settings(settings);
        let mut ids = Vec::new();
        for col in 2..=6 {
            ids.push(wb.set_cell_text(&loc(1, col), "").unwrap());
        }
        for (i, id) in ids.iter().enumerate() {
            let left = cellflow_engine::engine::col_to_letters(i as i64 + 1).unwrap();
            wb.set_cell_formula(*id, &format!("{}1.Text + \"x\"", left)).unwrap();
        }
        wb.set_cell_text(&loc(1, 1), "go").unwrap();
        assert_eq!(wb.cell_text(&loc(1, 4)), Some("goxxx"));
        assert!(
            wb.cell_error(&loc(1, 5))
                .is_some_and(|e| e.contains("propagation depth"))
        );
    }

    #[test]
    fn test_trigger_writes_back() {
        let mut wb = Workbook::new();
        let key = wb
            .add_function(CELL_NAMESPACE, "log", "CELL(ANCHOR_SHEET, ANCHOR_ROW + 0, ANCHOR_COL + 1).set_text(\"saw \" + CELL(ANCHOR_SHEET, ANCHOR_ROW + 0, ANCHOR_COL - 1).Text)")
            .unwrap();
        let b1 = wb.set_cell_text(&loc(1, 2), "").unwrap();
        wb.set_trigger_function(b1, Some(key)).unwrap();

        wb.set_cell_text(&loc(1, 1), "ping").unwrap();
        assert_eq!(wb.cell_text(&loc(1, 3)), Some("saw ping"));
        assert_eq!(wb.cell_text(&loc(1, 2)), Some(""));
    }

    #[test]
    fn test_insert_and_delete_rows() {
        let mut wb = Workbook::new();
        wb.set_cell_text(&loc(2, 1), "x").unwrap();
        let a1 = wb.set_cell_text(&loc(1, 1), "").unwrap();
        wb.set_cell_formula(a1, "A2.Text").unwrap();

        wb.insert_rows("Sheet1", 1, 2).unwrap();
        assert_eq!(wb.cell_text(&loc(3, 1)), Some("x"));
        assert_eq!(wb.cell_text(&loc(4, 1)), Some("x"));
        assert!(wb.cell_text(&loc(1, 1)).is_none());

        wb.delete_rows("Sheet1", 1, 2).unwrap();
        assert_eq!(wb.cell_text(&loc(1, 1)), Some("x"));
        assert_eq!(wb.cells().get(a1).unwrap().location(), &loc(1, 1));

        wb.delete_rows("Sheet1", 1, 1).unwrap();
        assert!(wb.cells().get(a1).is_none());
        assert_eq!(wb.cell_text(&loc(1, 1)), Some("x"));
    }

    #[test]
    fn test_line_shifts_past_i64_range_fail_without_moving() {
        let mut wb = Workbook::new();
        wb.set_cell_text(&loc(2, 1), "x").unwrap();
        wb.set_cell_text(&loc(1, 3), "y").unwrap();

        assert!(matches!(
            wb.insert_rows("Sheet1", 1, i64::MAX),
            Err(CellflowError::Engine(EngineError::InvalidReference(_)))
        ));
        assert!(wb.insert_columns("Sheet1", 2, i64::MAX).is_err());
        assert_eq!(wb.cell_text(&loc(2, 1)), Some("x"));
        assert_eq!(wb.cell_text(&loc(1, 3)), Some("y"));

        wb.delete_rows("Sheet1", 2, i64::MAX).unwrap();
        assert!(wb.cell_text(&loc(2, 1)).is_none());
        assert_eq!(wb.cell_text(&loc(1, 3)), Some("y"));
    }

    #[test]
    fn test_insert_columns_rejects_header() {
        let mut wb = Workbook::new();
        assert!(wb.insert_columns("Sheet1", 0, 1).is_err());
    }
}
