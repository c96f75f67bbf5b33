//! Workbook settings.
//!
//! All fields are optional in TOML; missing ones take the defaults below.
//!
//! ```toml
//! max_propagation_depth = 32
//! max_range_cells = 10000
//! ```

use serde::{Deserialize, Serialize};

use cellflow_engine::engine::Limits;

use crate::error::{CellflowError, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Nested re-evaluations allowed while propagating one edit.
    pub max_propagation_depth: usize,
    /// Largest range a script may read or subscribe to.
    pub max_range_cells: usize,
    /// Rhai operation budget per run (0 = unlimited).
    pub max_operations: u64,
    /// Rhai function call depth per run.
    pub max_call_levels: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            max_propagation_depth: 64,
            max_range_cells: 1_000_000,
            max_operations: 1_000_000,
            max_call_levels: 64,
        }
    }
}

impl Settings {
    pub fn from_toml_str(content: &str) -> Result<Settings> {
        toml::from_str::<Settings>(content).map_err(|e| CellflowError::Config(e.to_string()))
    }

    /// Limits for the script host.
    pub fn limits(&self) -> Limits {
        Limits {
            max_operations: self.max_operations,
            max_call_levels: self.max_call_levels,
            max_range_cells: self.max_range_cells,
        }
    }
}
