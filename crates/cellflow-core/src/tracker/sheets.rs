//! Sheets are derived from the cells on them: the first cell placed on a
//! sheet creates it, removing or moving away the last one destroys it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use cellflow_engine::engine::{EventBus, Location, SubscriptionId};

use super::CellId;
use crate::error::{CellflowError, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sheet {
    pub name: String,
    /// Display order; lower sorts first.
    pub order: i64,
    /// Cell at the sheet's `(0, 0)` slot, if any.
    pub corner: Option<CellId>,
    pub members: BTreeSet<CellId>,
    /// Creation sequence, the tie-break for equal orders.
    created: u64,
}

impl Sheet {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SheetEvent {
    Added(String),
    Removed(String),
    /// The ordered sheet list changed.
    Reordered,
}

#[derive(Debug, Default)]
pub struct SheetTracker {
    sheets: HashMap<String, Sheet>,
    ordered: Vec<String>,
    next_seq: u64,
    events: EventBus<SheetEvent>,
}

impl SheetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Sheet> {
        self.sheets.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sheets.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.sheets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sheets.is_empty()
    }

    /// Sheet names by (order, creation).
    pub fn ordered_sheets(&self) -> &[String] {
        &self.ordered
    }

    pub fn subscribe(&mut self, handler: impl FnMut(&SheetEvent) + 'static) -> SubscriptionId {
        self.events.subscribe(handler)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    pub fn set_order(&mut self, name: &str, order: i64) -> Result<()> {
        let sheet = self
            .sheets
            .get_mut(name)
            .ok_or_else(|| CellflowError::Config(format!("no sheet named {}", name)))?;
        if sheet.order != order {
            sheet.order = order;
            self.reorder();
        }
        Ok(())
    }

    pub(crate) fn attach(&mut self, name: &str, id: CellId, is_corner: bool) {
        if !self.sheets.contains_key(name) {
            let order = self.sheets.values().map(|s| s.order).max().map_or(0, |m| m + 1);
            let sheet = Sheet {
                name: name.to_string(),
                order,
                corner: None,
                members: BTreeSet::new(),
                created: self.next_seq,
            };
            self.next_seq += 1;
            self.sheets.insert(name.to_string(), sheet);
            log::debug!("sheet {} created", name);
            self.events.emit(&SheetEvent::Added(name.to_string()));
            self.reorder();
        }
        if let Some(sheet) = self.sheets.get_mut(name) {
            sheet.members.insert(id);
            if is_corner {
                sheet.corner = Some(id);
            }
        }
    }

    pub(crate) fn detach(&mut self, name: &str, id: CellId) {
        let Some(sheet) = self.sheets.get_mut(name) else {
            return;
        };
        sheet.members.remove(&id);
        if sheet.corner == Some(id) {
            sheet.corner = None;
        }
        if sheet.members.is_empty() {
            self.sheets.remove(name);
            log::debug!("sheet {} removed", name);
            self.events.emit(&SheetEvent::Removed(name.to_string()));
            self.reorder();
        }
    }

    pub(crate) fn relocate(&mut self, id: CellId, from: &Location, to: &Location) {
        if from.sheet != to.sheet {
            self.attach(&to.sheet, id, to.is_corner());
            self.detach(&from.sheet, id);
            return;
        }
        if let Some(sheet) = self.sheets.get_mut(&to.sheet) {
            if to.is_corner() {
                sheet.corner = Some(id);
            } else if sheet.corner == Some(id) {
                sheet.corner = None;
            }
        }
    }

    fn reorder(&mut self) {
        let mut sheets: Vec<&Sheet> = self.sheets.values().collect();
        sheets.sort_by_key(|s| (s.order, s.created));
        self.ordered = sheets.into_iter().map(|s| s.name.clone()).collect();
        self.events.emit(&SheetEvent::Reordered);
    }
}
