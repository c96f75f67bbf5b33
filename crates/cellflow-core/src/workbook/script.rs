//! Function definitions as seen from the workbook: adding, editing,
//! renaming and removing functions, and presenting their text relative to
//! a cell.

use cellflow_engine::engine::{Function, Location, ReturnType, canonicalize_script};

use super::{RenameConfirmation, Workbook};
use crate::error::{CellflowError, Result};
use crate::registry::{COLLECTION_NAMESPACE, FunctionKey};
use crate::tracker::CellId;

impl Workbook {
    fn function_not_found(key: &FunctionKey) -> CellflowError {
        CellflowError::FunctionNotFound {
            namespace: key.namespace.clone(),
            name: key.name.clone(),
        }
    }

    /// Register a function from canonical script text.
    pub fn add_function(&mut self, namespace: &str, name: &str, script: &str) -> Result<FunctionKey> {
        let key = self
            .functions
            .add_cell_function_to_namespace(namespace, name, script)?;
        self.settle();
        Ok(key)
    }

    /// Register a function authored at `anchor`, e.g. `return B2.Text;`.
    pub fn define_function(
        &mut self,
        namespace: &str,
        name: &str,
        text: &str,
        anchor: &Location,
    ) -> Result<FunctionKey> {
        self.add_function(namespace, name, &canonicalize_script(text, anchor))
    }

    /// Replace a function's canonical script. Cells using it re-run and
    /// collections sorted by it are refreshed.
    pub fn set_function_script(&mut self, key: &FunctionKey, script: &str) -> Result<()> {
        self.functions.set_script(key, script)?;
        self.settle();
        Ok(())
    }

    pub fn set_function_script_symbolic(
        &mut self,
        key: &FunctionKey,
        text: &str,
        anchor: &Location,
    ) -> Result<()> {
        self.set_function_script(key, &canonicalize_script(text, anchor))
    }

    pub fn set_function_return_type(&mut self, key: &FunctionKey, return_type: ReturnType) -> Result<()> {
        self.functions
            .get_mut(key)
            .ok_or_else(|| Self::function_not_found(key))?
            .set_return_type(return_type);
        for id in self.cells_using(key) {
            self.recompute_cell(id);
        }
        self.settle();
        Ok(())
    }

    /// Remove a function. Cells still naming it keep the reference and
    /// report an error on their next run.
    pub fn remove_function(&mut self, key: &FunctionKey) -> Result<Function> {
        let function = self.functions.remove(key)?;
        self.settle();
        Ok(function)
    }

    /// Rename a function. Collections sorted by a collection function
    /// always follow the rename. When cells use it, `confirm` is asked
    /// first; a refusal leaves everything unchanged and returns `key`.
    pub fn rename_function(
        &mut self,
        key: &FunctionKey,
        new_name: &str,
        confirm: &mut dyn RenameConfirmation,
    ) -> Result<FunctionKey> {
        let to = self.functions.check_rename(key, new_name)?;
        if to == *key {
            return Ok(to);
        }
        let affected = self.cells_using(key);
        if !affected.is_empty() && !confirm.confirm_rename(key, new_name, &affected) {
            log::info!("rename of {} declined, {} cells use it", key, affected.len());
            return Ok(key.clone());
        }
        for id in &affected {
            self.unsubscribe_cell(*id);
        }
        let to = self.functions.rename(key, new_name)?;

        if key.namespace == COLLECTION_NAMESPACE {
            for name in self.collections.collections_using(&key.name) {
                let result = self.with_sort_filter(|collections, eval| {
                    collections.set_sort_filter(&name, Some(new_name), eval)
                });
                if let Err(e) = result {
                    log::warn!("could not point {} at {}: {}", name, to, e);
                }
            }
        }

        for id in &affected {
            self.cells.modify(*id, |cell| {
                if cell.populate.as_ref() == Some(key) {
                    cell.populate = Some(to.clone());
                }
                if cell.trigger.as_ref() == Some(key) {
                    cell.trigger = Some(to.clone());
                }
            })?;
            self.subscribe_cell(*id);
        }

        self.settle();
        Ok(to)
    }

    /// The function's text as it reads from `anchor`.
    pub fn function_text_at(&self, key: &FunctionKey, anchor: &Location) -> Result<String> {
        self.functions
            .get(key)
            .map(|function| function.symbolic_script(anchor))
            .ok_or_else(|| Self::function_not_found(key))
    }

    /// The function's text as it reads from the cell's location.
    pub fn function_text_for_cell(&self, key: &FunctionKey, id: CellId) -> Result<String> {
        let cell = self
            .cells
            .get(id)
            .ok_or_else(|| CellflowError::CellNotFound(id.to_string()))?;
        self.function_text_at(key, cell.location())
    }
}
