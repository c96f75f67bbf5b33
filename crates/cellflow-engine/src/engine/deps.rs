//! Dependency extraction from canonical scripts.
//!
//! Scans a script once and collects:
//! - every canonical `CELL(...)`/`RANGE(...)` lookup as a [`LocationReference`]
//! - every `COLLECTION(...)` access, either by constant name or by a computed
//!   expression
//!
//! Lookups inside string literals and comments are ignored, and results are
//! de-duplicated in first-seen order.

use regex::Regex;
use std::sync::OnceLock;

use super::location::LocationReference;
use super::rewrite::{canonical_cell_re, canonical_range_re, is_standalone, literal_mask, try_parse_canonical};

pub const COLLECTION_FN: &str = "COLLECTION";

/// How a script names a collection it reads.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum CollectionAccess {
    /// `COLLECTION("Tasks")`
    Constant(String),
    /// `COLLECTION(<expr>)`; the expression text computes the name.
    Dynamic(String),
}

/// Everything a script reads.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Dependencies {
    pub locations: Vec<LocationReference>,
    pub collections: Vec<CollectionAccess>,
}

impl Dependencies {
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty() && self.collections.is_empty()
    }
}

fn collection_call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"\b{}\(", COLLECTION_FN))
            .expect("collection call regex must compile")
    })
}

fn constant_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^"([^"\\\n]*)"$"#).expect("collection name regex must compile")
    })
}

/// Extract every location and collection the script reads.
pub fn extract_dependencies(script: &str) -> Dependencies {
    let mask = literal_mask(script);
    let mut deps = Dependencies::default();

    for re in [canonical_range_re(), canonical_cell_re()] {
        for m in re.find_iter(script) {
            if !is_standalone(script, &mask, m.start(), m.end()) {
                continue;
            }
            if let Some(reference) = try_parse_canonical(m.as_str())
                && !deps.locations.contains(&reference)
            {
                deps.locations.push(reference);
            }
        }
    }

    for m in collection_call_re().find_iter(script) {
        if mask[m.start()] || !preceded_by_code(script, m.start()) {
            continue;
        }
        let Some(argument) = call_argument(script, &mask, m.end()) else {
            continue;
        };
        let argument = argument.trim();
        if argument.is_empty() {
            continue;
        }
        let access = match constant_name_re().captures(argument) {
            Some(caps) => CollectionAccess::Constant(caps[1].to_string()),
            None => CollectionAccess::Dynamic(argument.to_string()),
        };
        if !deps.collections.contains(&access) {
            deps.collections.push(access);
        }
    }

    deps
}

fn preceded_by_code(script: &str, start: usize) -> bool {
    match start.checked_sub(1).and_then(|i| script.as_bytes().get(i)) {
        Some(&b) => !(b == b'.' || b == b'_' || b.is_ascii_alphanumeric()),
        None => true,
    }
}

/// Text between the opening paren (ending at `open_end`) and its matching
/// close paren, skipping parens inside literals.
fn call_argument<'a>(script: &'a str, mask: &[bool], open_end: usize) -> Option<&'a str> {
    let bytes = script.as_bytes();
    let mut depth = 1usize;
    let mut i = open_end;
    while i < bytes.len() {
        if !mask[i] {
            match bytes[i] {
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(&script[open_end..i]);
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::location::{Axis, SheetRef};
    use crate::engine::rewrite::canonicalize_script;
    use crate::engine::Location;

    #[test]
    fn test_extract_dependencies_empty() {
        assert!(extract_dependencies("").is_empty());
        assert!(extract_dependencies("10 + 20").is_empty());
    }

    #[test]
    fn test_extract_dependencies_dedups_in_order() {
        let script = "CELL(ANCHOR_SHEET, ANCHOR_ROW + 1, ANCHOR_COL + 0).Text + \
                      CELL(ANCHOR_SHEET, 2, 2).Value + CELL(ANCHOR_SHEET, ANCHOR_ROW + 1, ANCHOR_COL + 0).Text";
        let deps = extract_dependencies(script);
        assert_eq!(
            deps.locations,
            vec![
                LocationReference::cell(SheetRef::Anchor, Axis::Relative(1), Axis::Relative(0)),
                LocationReference::cell(SheetRef::Anchor, Axis::Absolute(2), Axis::Absolute(2)),
            ]
        );
    }

    #[test]
    fn test_extract_dependencies_ignores_literals() {
        let script = r#""CELL(ANCHOR_SHEET, 1, 1)" // CELL(ANCHOR_SHEET, 2, 2)
            COLLECTION("x(y")"#;
        let deps = extract_dependencies(script);
        assert!(deps.locations.is_empty());
        assert_eq!(deps.collections, vec![CollectionAccess::Constant("x(y".into())]);
    }

    #[test]
    fn test_extract_dependencies_collections() {
        let anchor = Location::new("S", 1, 1);
        let script = canonicalize_script(
            r#"COLLECTION("Tasks").len() + COLLECTION(A2.Text + "_view").len() + COLLECTION("Tasks").len()"#,
            &anchor,
        );
        let deps = extract_dependencies(&script);
        assert_eq!(
            deps.collections,
            vec![
                CollectionAccess::Constant("Tasks".into()),
                CollectionAccess::Dynamic(
                    r#"CELL(ANCHOR_SHEET, ANCHOR_ROW + 1, ANCHOR_COL + 0).Text + "_view""#.into()
                ),
            ]
        );
        assert_eq!(deps.locations.len(), 1);
    }

    #[test]
    fn test_extract_dependencies_includes_ranges() {
        let deps = extract_dependencies("SUM(RANGE(\"Data\", 1, 1, 10, 2))");
        assert_eq!(deps.locations.len(), 1);
        assert!(deps.locations[0].is_range());
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let script = "CELL(ANCHOR_SHEET, 3, 3).Text + COLLECTION(\"a\").len()";
        assert_eq!(extract_dependencies(script), extract_dependencies(script));
    }
}
