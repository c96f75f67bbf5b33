//! Workbook state and reactive wiring (UI-agnostic).

mod collections;
mod eval;
mod ops;
mod script;
mod state;

pub use state::Workbook;

use crate::registry::FunctionKey;
use crate::tracker::CellId;

/// Asked before a function rename is cascaded to the cells that use it.
pub trait RenameConfirmation {
    /// Return true to rename and point `affected` at the new name. On
    /// false nothing changes.
    fn confirm_rename(&mut self, function: &FunctionKey, new_name: &str, affected: &[CellId]) -> bool;
}

impl<F> RenameConfirmation for F
where
    F: FnMut(&FunctionKey, &str, &[CellId]) -> bool,
{
    fn confirm_rename(&mut self, function: &FunctionKey, new_name: &str, affected: &[CellId]) -> bool {
        self(function, new_name, affected)
    }
}
