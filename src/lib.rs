//! cellflow - reactive cells and collections driven by Rhai functions.
//!
//! [`Workbook`] is the entry point: cells hold text or are populated by
//! functions, functions read other cells and collections, and every edit
//! re-runs whatever read what changed.
//!
//! ```
//! use cellflow::{Location, Workbook};
//!
//! let mut wb = Workbook::new();
//! wb.set_cell_text(&Location::new("Sheet1", 2, 1), "World").unwrap();
//! let a1 = wb.set_cell_text(&Location::new("Sheet1", 1, 1), "").unwrap();
//! wb.set_cell_formula(a1, r#"return "Hello" + A2.Text;"#).unwrap();
//! assert_eq!(wb.cell_text(&Location::new("Sheet1", 1, 1)), Some("HelloWorld"));
//! ```

pub use cellflow_core::*;
pub use cellflow_engine as engine;
