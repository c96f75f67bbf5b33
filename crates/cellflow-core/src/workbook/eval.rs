//! Re-evaluation and propagation.
//!
//! Everything is synchronous: an edit re-runs the cells subscribed to what
//! changed, and each run that changes a cell's text propagates further
//! before returning. `active` holds the cells on the evaluation stack; a
//! cell is never re-entered, and the stack never grows past
//! `max_propagation_depth`. Both cases are recorded as an error on the
//! cell that would have run.

use cellflow_engine::engine::{
    Dynamic, Location, PendingWrite, RhaiHost, detect_cycle, dynamic_to_text,
};
use std::collections::BTreeSet;

use super::Workbook;
use crate::collection::{SortFilter, SortFilterResult, UserItem};
use crate::registry::{
    COLLECTION_NAMESPACE, CollectionEvent, FunctionEvent, FunctionKey, FunctionTracker,
};
use crate::tracker::{Cell, CellId};

/// Runs collection-namespace functions as sort/filter keys.
pub(crate) struct FunctionSortFilter<'a> {
    pub functions: &'a mut FunctionTracker,
    pub host: &'a RhaiHost,
}

impl SortFilter for FunctionSortFilter<'_> {
    fn evaluate(&mut self, function: &str, items: &[UserItem], index: usize) -> SortFilterResult {
        let key = FunctionKey::collection(function);
        let Some(f) = self.functions.get_mut(&key) else {
            log::warn!("sort/filter function {} not found, keeping item", key);
            return SortFilterResult::Keep(0);
        };
        let items: rhai::Array = items.iter().map(UserItem::to_dynamic).collect();
        match f.run_indexed(self.host, &items, index) {
            Ok(value) => SortFilterResult::from_dynamic(&value).unwrap_or_else(|| {
                log::warn!("{} returned {} for item {}, rejecting", key, value.type_name(), index);
                SortFilterResult::Reject
            }),
            Err(e) => {
                log::warn!("{} failed for item {}: {}", key, index, e);
                SortFilterResult::Reject
            }
        }
    }
}

impl Workbook {
    fn record_error(&mut self, id: CellId, message: String) {
        log::debug!("cell {}: {}", id, message);
        if let Err(e) = self.cells.modify(id, |cell| cell.error = Some(message)) {
            log::warn!("could not record error: {}", e);
        }
    }

    fn run_function(&mut self, key: &FunctionKey, anchor: &Location) -> Result<Dynamic, String> {
        let function = self
            .functions
            .get_mut(key)
            .ok_or_else(|| format!("function {} not found", key))?;
        function
            .run_for_cell(&self.host, anchor)
            .map_err(|e| e.to_string())
    }

    /// Set a cell's text in the tracker and the script mirror. Returns the
    /// location if the text changed.
    pub(crate) fn store_text(&mut self, id: CellId, text: String) -> Option<Location> {
        let cell = self.cells.get(id)?;
        if cell.text == text {
            return None;
        }
        let location = cell.location().clone();
        self.host.set_cell_text(&location, &text);
        if let Err(e) = self.cells.modify(id, |cell| cell.text = text) {
            log::warn!("could not store text: {}", e);
            return None;
        }
        Some(location)
    }

    /// Re-run every cell subscribed to `location`.
    pub(crate) fn propagate_from(&mut self, location: &Location) {
        self.propagate_except(location, None);
    }

    fn propagate_except(&mut self, location: &Location, skip: Option<CellId>) {
        let dependents = self.subscribers_of(location);
        for id in dependents.into_iter().filter(|id| Some(*id) != skip) {
            self.recompute_cell(id);
        }
    }

    pub(crate) fn propagate_from_collection(&mut self, name: &str) {
        let dependents = self.collection_subscribers_of(name);
        for id in dependents {
            self.recompute_cell(id);
        }
    }

    /// Run a cell's populate and trigger functions, store the result, apply
    /// script writes and propagate.
    pub(crate) fn recompute_cell(&mut self, id: CellId) {
        if self.active.contains(&id) {
            let chain: Vec<String> = self
                .active
                .iter()
                .filter_map(|active| self.cells.get(*active))
                .map(|cell| cell.location().to_string())
                .collect();
            self.record_error(id, format!("circular reference: {}", chain.join(" -> ")));
            return;
        }
        if self.active.len() >= self.settings.max_propagation_depth {
            log::warn!(
                "propagation depth {} reached at cell {}",
                self.settings.max_propagation_depth,
                id
            );
            self.record_error(
                id,
                format!(
                    "propagation depth {} exceeded",
                    self.settings.max_propagation_depth
                ),
            );
            return;
        }

        let Some(cell) = self.cells.get(id) else {
            return;
        };
        let anchor = cell.location().clone();
        let populate = cell.populate.clone();
        let trigger = cell.trigger.clone();
        if populate.is_none() && trigger.is_none() {
            return;
        }

        self.subscribe_cell(id);
        self.active.push(id);

        let mut error = None;
        let mut text = None;
        if let Some(key) = &populate {
            match self.run_function(key, &anchor) {
                Ok(value) => text = Some(dynamic_to_text(&value)),
                Err(message) => error = Some(message),
            }
        }
        if let Some(key) = &trigger
            && let Err(message) = self.run_function(key, &anchor)
        {
            error.get_or_insert(message);
        }
        let writes = self.host.take_modifications();

        if let Err(e) = self.cells.modify(id, |cell| cell.error = error) {
            log::warn!("could not store result: {}", e);
        }
        if let Some(text) = text
            && let Some(location) = self.store_text(id, text)
        {
            self.propagate_from(&location);
        }
        self.apply_writes(writes, Some(id));

        self.active.pop();
    }

    /// Apply cell writes scripts made, each propagating like an edit except
    /// back into `writer`. Writes to empty locations create cells.
    pub(crate) fn apply_writes(&mut self, writes: Vec<PendingWrite>, writer: Option<CellId>) {
        for write in writes {
            let changed = match self.cells.id_at(&write.location) {
                Some(target) => self.store_text(target, write.text),
                None => {
                    let cell = Cell::new(write.location.clone()).with_text(write.text.clone());
                    match self.cells.add_cell(cell) {
                        Ok(_) => {
                            self.host.set_cell_text(&write.location, &write.text);
                            Some(write.location)
                        }
                        Err(e) => {
                            log::warn!("script write to {} failed: {}", write.location, e);
                            None
                        }
                    }
                }
            };
            if let Some(location) = changed {
                self.propagate_except(&location, writer);
            }
        }
    }

    /// A populate chain leading from `id` back to itself, as locations,
    /// judged from current subscriptions.
    pub fn populate_cycle(&self, id: CellId) -> Option<Vec<Location>> {
        let path = detect_cycle(&id, |cell| {
            self.subscriptions
                .get(cell)
                .map(|subscription| {
                    subscription
                        .locations
                        .iter()
                        .filter_map(|location| self.cells.get_at(location))
                        .filter(|reader| reader.populate.is_some())
                        .map(|reader| reader.id)
                        .collect()
                })
                .unwrap_or_default()
        })?;
        if path.last() != Some(&id) {
            return None;
        }
        Some(
            path.into_iter()
                .filter_map(|cell| self.cells.get(cell).map(|c| c.location().clone()))
                .collect(),
        )
    }

    /// Run a cell whose functions just changed, unless its populate
    /// function closes a cycle.
    pub(crate) fn recompute_checked(&mut self, id: CellId) {
        self.subscribe_cell(id);
        if let Some(cycle) = self.populate_cycle(id) {
            let chain: Vec<String> = cycle.iter().map(ToString::to_string).collect();
            self.record_error(id, format!("circular reference: {}", chain.join(" -> ")));
            return;
        }
        self.recompute_cell(id);
    }

    /// Cells whose populate or trigger function is `key`.
    pub(crate) fn cells_using(&self, key: &FunctionKey) -> Vec<CellId> {
        self.cells
            .iter()
            .filter(|cell| cell.uses_function(key))
            .map(|cell| cell.id)
            .collect()
    }

    /// Re-subscribe and re-run every cell that has a function.
    pub fn recalculate_all(&mut self) {
        let mut cells: Vec<(Location, CellId)> = self
            .cells
            .iter()
            .filter(|cell| cell.has_function())
            .map(|cell| (cell.location().clone(), cell.id))
            .collect();
        cells.sort();
        for (_, id) in &cells {
            self.subscribe_cell(*id);
        }
        for (_, id) in cells {
            self.recompute_cell(id);
        }
    }

    pub(crate) fn with_sort_filter<R>(
        &mut self,
        f: impl FnOnce(&mut crate::registry::CollectionTracker, &mut dyn SortFilter) -> R,
    ) -> R {
        let mut eval = FunctionSortFilter {
            functions: &mut self.functions,
            host: &self.host,
        };
        f(&mut self.collections, &mut eval)
    }

    /// React to function registry changes: re-run the cells using a changed
    /// function and refresh the collections sorted by it.
    fn sync_functions(&mut self) {
        let mut touched: BTreeSet<FunctionKey> = BTreeSet::new();
        for change in self.functions.take_changes() {
            match change {
                FunctionEvent::Added(key)
                | FunctionEvent::Removed(key)
                | FunctionEvent::ScriptChanged(key)
                | FunctionEvent::DependenciesChanged(key) => {
                    touched.insert(key);
                }
                FunctionEvent::Renamed { .. } => {}
            }
        }

        for key in touched {
            if key.namespace == COLLECTION_NAMESPACE {
                for name in self.collections.collections_using(&key.name) {
                    let result = self.with_sort_filter(|collections, eval| {
                        collections.refresh_sort_and_filter(&name, eval)
                    });
                    if let Err(e) = result {
                        log::warn!("refreshing {} failed: {}", name, e);
                    }
                }
            }
            for id in self.cells_using(&key) {
                self.recompute_cell(id);
            }
        }
    }

    /// Mirror changed collections into the script host and re-run their
    /// subscribers.
    fn sync_collections(&mut self) {
        let changes = self.collections.take_changes();
        if changes.is_empty() {
            return;
        }
        let mut affected: BTreeSet<String> = BTreeSet::new();
        for change in &changes {
            affected.extend(change.affected_collections().into_iter().map(str::to_string));
            if let CollectionEvent::ItemChanged { item, .. } = change {
                for name in self.collections.names() {
                    if self
                        .collections
                        .get(name)
                        .is_some_and(|c| c.contains(*item))
                    {
                        affected.insert(name.to_string());
                    }
                }
            }
        }

        for name in &affected {
            match self.collections.items_of(name) {
                Ok(items) => {
                    let items: rhai::Array = items.into_iter().map(UserItem::to_dynamic).collect();
                    self.host.set_collection_items(name, items);
                }
                Err(_) => self.host.remove_collection(name),
            }
        }
        for name in &affected {
            self.propagate_from_collection(name);
        }
    }

    /// Finish an edit: function changes first (they may re-sort
    /// collections), then collection changes, then outstanding writes.
    pub(crate) fn settle(&mut self) {
        self.resubscribe_invalidated();
        self.sync_functions();
        self.sync_collections();
        let writes = self.host.take_modifications();
        self.apply_writes(writes, None);
    }
}
