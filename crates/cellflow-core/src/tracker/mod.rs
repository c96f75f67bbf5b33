//! Location-indexed registries of cells and the sheets they live on.

mod cells;
mod sheets;

pub use cells::{Cell, CellEvent, CellId, CellTracker};
pub use sheets::{Sheet, SheetEvent, SheetTracker};
