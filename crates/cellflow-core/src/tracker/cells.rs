//! Cell arena with by-id, by-location and by-sheet indices.
//!
//! Cells live in slots of a `Vec<Option<Cell>>`; freed slots are reused.
//! [`CellTracker::move_cell`] is the only way a cell's location changes, and
//! it updates every index in one step.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use ulid::Ulid;

use cellflow_engine::engine::{EventBus, Location, SubscriptionId};

use super::sheets::SheetTracker;
use crate::error::{CellflowError, Result};
use crate::registry::FunctionKey;

/// Stable identity of a cell, kept across moves.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct CellId(Ulid);

impl CellId {
    pub fn new() -> CellId {
        CellId(Ulid::new())
    }
}

impl Default for CellId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub id: CellId,
    location: Location,
    /// Literal text, or the last result of the populate function.
    pub text: String,
    /// Function whose result becomes the text.
    pub populate: Option<FunctionKey>,
    /// Function run for its side effects when a dependency changes.
    pub trigger: Option<FunctionKey>,
    /// Message from the last failed run.
    pub error: Option<String>,
    pub properties: BTreeMap<String, String>,
}

impl Cell {
    pub fn new(location: Location) -> Cell {
        Cell {
            id: CellId::new(),
            location,
            text: String::new(),
            populate: None,
            trigger: None,
            error: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Cell {
        self.text = text.into();
        self
    }

    pub fn with_populate(mut self, key: FunctionKey) -> Cell {
        self.populate = Some(key);
        self
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// True if `key` is this cell's populate or trigger function.
    pub fn uses_function(&self, key: &FunctionKey) -> bool {
        self.populate.as_ref() == Some(key) || self.trigger.as_ref() == Some(key)
    }

    pub fn has_function(&self) -> bool {
        self.populate.is_some() || self.trigger.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CellEvent {
    Added { id: CellId, location: Location },
    Removed { id: CellId, location: Location },
    Moved { id: CellId, from: Location, to: Location },
    Changed { id: CellId },
}

#[derive(Debug, Default)]
pub struct CellTracker {
    slots: Vec<Option<Cell>>,
    free: Vec<usize>,
    by_id: HashMap<CellId, usize>,
    by_location: HashMap<Location, usize>,
    sheets: SheetTracker,
    events: EventBus<CellEvent>,
}

impl CellTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn sheets(&self) -> &SheetTracker {
        &self.sheets
    }

    pub fn sheets_mut(&mut self) -> &mut SheetTracker {
        &mut self.sheets
    }

    pub fn subscribe(&mut self, handler: impl FnMut(&CellEvent) + 'static) -> SubscriptionId {
        self.events.subscribe(handler)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Index a new cell. Rejects a duplicate id or an occupied location.
    pub fn add_cell(&mut self, cell: Cell) -> Result<CellId> {
        if self.by_id.contains_key(&cell.id) {
            return Err(CellflowError::DuplicateCell(cell.id));
        }
        if self.by_location.contains_key(&cell.location) {
            return Err(CellflowError::LocationOccupied(cell.location.clone()));
        }

        let id = cell.id;
        let location = cell.location.clone();
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(cell);
                slot
            }
            None => {
                self.slots.push(Some(cell));
                self.slots.len() - 1
            }
        };
        self.by_id.insert(id, slot);
        self.by_location.insert(location.clone(), slot);
        self.sheets.attach(&location.sheet, id, location.is_corner());
        log::trace!("cell {} added at {} (slot {})", id, location, slot);

        self.events.emit(&CellEvent::Added { id, location });
        Ok(id)
    }

    /// Remove a cell from both indices and free its slot.
    pub fn remove_cell(&mut self, id: CellId) -> Option<Cell> {
        let slot = self.by_id.remove(&id)?;
        let cell = self.slots.get_mut(slot)?.take()?;
        self.by_location.remove(&cell.location);
        self.sheets.detach(&cell.location.sheet, id);
        self.free.push(slot);
        log::trace!("cell {} removed from {}", id, cell.location);

        self.events.emit(&CellEvent::Removed {
            id,
            location: cell.location.clone(),
        });
        Some(cell)
    }

    pub fn get(&self, id: CellId) -> Option<&Cell> {
        let slot = *self.by_id.get(&id)?;
        self.slots.get(slot)?.as_ref()
    }

    pub fn get_cell(&self, sheet: &str, row: i64, col: i64) -> Option<&Cell> {
        self.get_at(&Location::new(sheet, row, col))
    }

    pub fn get_at(&self, location: &Location) -> Option<&Cell> {
        let slot = *self.by_location.get(location)?;
        self.slots.get(slot)?.as_ref()
    }

    pub fn id_at(&self, location: &Location) -> Option<CellId> {
        self.get_at(location).map(|cell| cell.id)
    }

    pub fn contains(&self, id: CellId) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Cells on a sheet, ordered by row then column.
    pub fn cells_on_sheet(&self, sheet: &str) -> Vec<&Cell> {
        let Some(sheet) = self.sheets.get(sheet) else {
            return Vec::new();
        };
        let mut cells: Vec<&Cell> = sheet.members.iter().filter_map(|id| self.get(*id)).collect();
        cells.sort_by_key(|cell| (cell.location.row, cell.location.col));
        cells
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cell> {
        self.slots.iter().filter_map(|slot| slot.as_ref())
    }

    pub fn ids(&self) -> Vec<CellId> {
        self.iter().map(|cell| cell.id).collect()
    }

    /// Edit a cell in place (its location is not reachable) and raise `Changed`.
    pub fn modify<R>(&mut self, id: CellId, edit: impl FnOnce(&mut Cell) -> R) -> Result<R> {
        let slot = *self
            .by_id
            .get(&id)
            .ok_or_else(|| CellflowError::CellNotFound(id.to_string()))?;
        let cell = self
            .slots
            .get_mut(slot)
            .and_then(|slot| slot.as_mut())
            .ok_or_else(|| CellflowError::CellNotFound(id.to_string()))?;
        let result = edit(cell);
        self.events.emit(&CellEvent::Changed { id });
        Ok(result)
    }

    /// Relocate a cell. Fails if the target holds another cell.
    pub fn move_cell(&mut self, id: CellId, to: Location) -> Result<()> {
        let slot = *self
            .by_id
            .get(&id)
            .ok_or_else(|| CellflowError::CellNotFound(id.to_string()))?;
        let from = match self.slots.get(slot).and_then(|slot| slot.as_ref()) {
            Some(cell) => cell.location.clone(),
            None => return Err(CellflowError::CellNotFound(id.to_string())),
        };
        if from == to {
            return Ok(());
        }
        if self.by_location.contains_key(&to) {
            return Err(CellflowError::LocationOccupied(to));
        }

        self.by_location.remove(&from);
        self.by_location.insert(to.clone(), slot);
        if let Some(Some(cell)) = self.slots.get_mut(slot) {
            cell.location = to.clone();
        }
        self.sheets.relocate(id, &from, &to);
        log::trace!("cell {} moved {} -> {}", id, from, to);

        self.events.emit(&CellEvent::Moved { id, from, to });
        Ok(())
    }
}
