//! Named registries for functions and collections.

mod collections;
mod functions;

pub use collections::{CollectionEvent, CollectionId, CollectionTracker};
pub use functions::{CELL_NAMESPACE, COLLECTION_NAMESPACE, FunctionEvent, FunctionKey, FunctionTracker};

use crate::error::{CellflowError, Result};

const FORBIDDEN_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Check a function, namespace or collection name.
pub fn validate_identifier(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        Some("must not be empty")
    } else if name.trim() != name {
        Some("must not start or end with whitespace")
    } else if name == "." || name == ".." {
        Some("must not be . or ..")
    } else if name.chars().any(char::is_control) {
        Some("must not contain control characters")
    } else if name.contains(FORBIDDEN_CHARS) {
        Some("must not contain any of < > : \" / \\ | ? *")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(CellflowError::InvalidIdentifier {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}
