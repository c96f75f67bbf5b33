use cellflow_engine::engine::{Location, RhaiHost, SubscriptionId};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use crate::registry::{
    CollectionEvent, CollectionTracker, FunctionEvent, FunctionKey, FunctionTracker,
};
use crate::settings::Settings;
use crate::tracker::{CellEvent, CellId, CellTracker, SheetEvent};

/// What one cell's functions read, as last resolved from its location.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Subscription {
    pub locations: Vec<Location>,
    pub collections: Vec<String>,
    /// Invalidation handlers on dynamic collection references, by function
    /// and reference position
    pub watchers: Vec<(FunctionKey, usize, SubscriptionId)>,
}

/// UI-agnostic reactive state: cells, functions, collections, and the
/// subscriptions that connect them.
pub struct Workbook {
    pub(crate) settings: Settings,
    /// Script host; mirrors cell text and collection items for scripts
    pub(crate) host: RhaiHost,
    pub(crate) cells: CellTracker,
    pub(crate) functions: FunctionTracker,
    pub(crate) collections: CollectionTracker,
    /// Reverse dependency map: location -> cells whose functions read it
    pub(crate) location_subscribers: HashMap<Location, BTreeSet<CellId>>,
    /// Reverse dependency map: collection name -> cells whose functions read it
    pub(crate) collection_subscribers: HashMap<String, BTreeSet<CellId>>,
    /// Forward map, used to unsubscribe
    pub(crate) subscriptions: HashMap<CellId, Subscription>,
    /// Cells currently being evaluated, innermost last
    pub(crate) active: Vec<CellId>,
    /// Cells whose dynamic collection references were invalidated
    pub(crate) invalidated: Rc<RefCell<BTreeSet<CellId>>>,
}

impl Workbook {
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    pub fn with_settings(settings: Settings) -> Self {
        let host = RhaiHost::with_limits(settings.limits());
        Workbook {
            settings,
            host,
            cells: CellTracker::new(),
            functions: FunctionTracker::new(),
            collections: CollectionTracker::new(),
            location_subscribers: HashMap::new(),
            collection_subscribers: HashMap::new(),
            subscriptions: HashMap::new(),
            active: Vec::new(),
            invalidated: Rc::new(RefCell::new(BTreeSet::new())),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn cells(&self) -> &CellTracker {
        &self.cells
    }

    pub fn functions(&self) -> &FunctionTracker {
        &self.functions
    }

    pub fn collections(&self) -> &CollectionTracker {
        &self.collections
    }

    pub fn host(&self) -> &RhaiHost {
        &self.host
    }

    pub fn cell_text(&self, location: &Location) -> Option<&str> {
        self.cells.get_at(location).map(|cell| cell.text.as_str())
    }

    pub fn cell_error(&self, location: &Location) -> Option<&str> {
        self.cells.get_at(location).and_then(|cell| cell.error.as_deref())
    }

    /// Cells that re-run when `location` changes.
    pub fn subscribers_of(&self, location: &Location) -> Vec<CellId> {
        self.location_subscribers
            .get(location)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Cells that re-run when the named collection changes.
    pub fn collection_subscribers_of(&self, name: &str) -> Vec<CellId> {
        self.collection_subscribers
            .get(name)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn on_cell_event(&mut self, handler: impl FnMut(&CellEvent) + 'static) -> SubscriptionId {
        self.cells.subscribe(handler)
    }

    pub fn on_sheet_event(&mut self, handler: impl FnMut(&SheetEvent) + 'static) -> SubscriptionId {
        self.cells.sheets_mut().subscribe(handler)
    }

    pub fn on_function_event(
        &mut self,
        handler: impl FnMut(&FunctionEvent) + 'static,
    ) -> SubscriptionId {
        self.functions.subscribe(handler)
    }

    pub fn on_collection_event(
        &mut self,
        handler: impl FnMut(&CollectionEvent) + 'static,
    ) -> SubscriptionId {
        self.collections.subscribe(handler)
    }

    /// Resolve the cell's functions against its current location and
    /// replace its subscriptions.
    pub(crate) fn subscribe_cell(&mut self, id: CellId) {
        self.unsubscribe_cell(id);
        let Some(cell) = self.cells.get(id) else {
            return;
        };
        let anchor = cell.location().clone();
        let keys: Vec<_> = cell.populate.iter().chain(cell.trigger.iter()).cloned().collect();
        let max_cells = self.settings.max_range_cells;

        let mut subscription = Subscription::default();
        for key in keys {
            let Some(function) = self.functions.get_mut(&key) else {
                continue;
            };
            for (index, reference) in function.collection_dependencies_mut().iter_mut().enumerate() {
                let queue = Rc::clone(&self.invalidated);
                let watcher = reference.on_invalidated(move |_| {
                    queue.borrow_mut().insert(id);
                });
                if let Some(watcher) = watcher {
                    subscription.watchers.push((key.clone(), index, watcher));
                }
            }
            subscription
                .locations
                .extend(function.resolved_locations(&anchor, max_cells));
            for reference in function.collection_dependencies() {
                subscription
                    .locations
                    .extend(reference.locations_that_invalidate(&anchor, max_cells));
            }
            subscription
                .collections
                .extend(function.collection_names(&self.host, &anchor));
        }
        subscription.locations.sort();
        subscription.locations.dedup();
        subscription.collections.sort();
        subscription.collections.dedup();

        for location in &subscription.locations {
            self.location_subscribers
                .entry(location.clone())
                .or_default()
                .insert(id);
        }
        for name in &subscription.collections {
            self.collection_subscribers
                .entry(name.clone())
                .or_default()
                .insert(id);
        }
        log::trace!(
            "cell {} at {} reads {} locations, {} collections",
            id,
            anchor,
            subscription.locations.len(),
            subscription.collections.len()
        );
        self.subscriptions.insert(id, subscription);
    }

    pub(crate) fn unsubscribe_cell(&mut self, id: CellId) {
        let Some(subscription) = self.subscriptions.remove(&id) else {
            return;
        };
        for (key, index, watcher) in subscription.watchers {
            if let Some(function) = self.functions.get_mut(&key)
                && let Some(reference) = function.collection_dependencies_mut().get_mut(index)
            {
                reference.unsubscribe(watcher);
            }
        }
        for location in subscription.locations {
            if let Some(ids) = self.location_subscribers.get_mut(&location) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.location_subscribers.remove(&location);
                }
            }
        }
        for name in subscription.collections {
            if let Some(ids) = self.collection_subscribers.get_mut(&name) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.collection_subscribers.remove(&name);
                }
            }
        }
    }

    /// Re-subscribe the cells whose dynamic collection references raised
    /// invalidation.
    pub(crate) fn resubscribe_invalidated(&mut self) {
        let ids = std::mem::take(&mut *self.invalidated.borrow_mut());
        for id in ids {
            log::debug!("collection reference of cell {} invalidated", id);
            self.subscribe_cell(id);
        }
    }
}

impl Default for Workbook {
    fn default() -> Self {
        Self::new()
    }
}
