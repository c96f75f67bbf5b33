//! Cell locations and the references scripts make to them.
//!
//! A [`Location`] is the concrete `(sheet, row, col)` a live cell occupies.
//! A [`LocationReference`] is how a script points at one or more locations
//! relative to an *anchor* cell; it is resolved against whichever cell runs
//! the script, so a reference authored at one cell keeps working when the
//! script runs elsewhere or the cell moves.
//!
//! # Examples
//!
//! ```ignore
//! let anchor = Location::new("Sheet1", 1, 1);
//! let below = LocationReference::cell(SheetRef::Anchor, Axis::Relative(1), Axis::Relative(0));
//! assert_eq!(below.resolve_start(&anchor), Location::new("Sheet1", 2, 1));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest column the spreadsheet notation is expected to address (`XFD`).
pub const MAX_SHEET_COLUMN: i64 = 16_384;

/// A concrete cell position. Rows and columns are 1-based; values `<= 0`
/// address header slots, and `(0, 0)` is the sheet's corner slot.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Location {
    pub sheet: String,
    pub row: i64,
    pub col: i64,
}

impl Location {
    pub fn new(sheet: impl Into<String>, row: i64, col: i64) -> Location {
        Location {
            sheet: sheet.into(),
            row,
            col,
        }
    }

    /// The corner slot of a sheet.
    pub fn corner(sheet: impl Into<String>) -> Location {
        Location::new(sheet, 0, 0)
    }

    pub fn is_corner(&self) -> bool {
        self.row == 0 && self.col == 0
    }

    /// True for header and corner slots (not data cells).
    pub fn is_header(&self) -> bool {
        self.row <= 0 || self.col <= 0
    }

    /// `None` if either coordinate leaves the `i64` range.
    pub fn offset(&self, delta_row: i64, delta_col: i64) -> Option<Location> {
        Some(Location::new(
            self.sheet.clone(),
            self.row.checked_add(delta_row)?,
            self.col.checked_add(delta_col)?,
        ))
    }

    /// Parse `Sheet1!B3` or `'My Sheet'!B3`.
    pub fn parse(text: &str) -> Option<Location> {
        let (sheet, cell) = text.rsplit_once('!')?;
        let sheet = match sheet.strip_prefix('\'') {
            Some(quoted) => quoted.strip_suffix('\'')?,
            None => sheet,
        };
        if sheet.is_empty() {
            return None;
        }
        let split = cell.find(|c: char| c.is_ascii_digit())?;
        let (letters, digits) = cell.split_at(split);
        let col = letters_to_col(letters)?;
        if digits.starts_with('0') || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let row = digits.parse::<i64>().ok()?;
        Some(Location::new(sheet, row, col))
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_sheet_prefix(f, &self.sheet)?;
        match col_to_letters(self.col) {
            Some(letters) if self.row > 0 => write!(f, "{}{}", letters, self.row),
            _ => write!(f, "R{}C{}", self.row, self.col),
        }
    }
}

fn write_sheet_prefix(f: &mut fmt::Formatter<'_>, sheet: &str) -> fmt::Result {
    if is_plain_sheet_name(sheet) {
        write!(f, "{}!", sheet)
    } else {
        write!(f, "'{}'!", sheet)
    }
}

/// Sheet names that can appear unquoted in front of `!`.
pub fn is_plain_sheet_name(sheet: &str) -> bool {
    let mut chars = sheet.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Convert a 1-based column index to spreadsheet letters (1 -> A, 26 -> Z, 27 -> AA).
/// Returns `None` for columns below 1.
pub fn col_to_letters(col: i64) -> Option<String> {
    if col < 1 {
        return None;
    }
    let mut result = Vec::new();
    let mut n = col as u64;
    while n > 0 {
        n -= 1;
        result.push(b'A' + (n % 26) as u8);
        n /= 26;
    }
    result.reverse();
    String::from_utf8(result).ok()
}

/// Convert uppercase spreadsheet letters to a 1-based column index.
/// Returns `None` for empty input, non `A-Z` characters, or overflow.
pub fn letters_to_col(letters: &str) -> Option<i64> {
    if letters.is_empty() {
        return None;
    }
    let mut acc = 0i64;
    for b in letters.bytes() {
        if !b.is_ascii_uppercase() {
            return None;
        }
        let digit = (b - b'A') as i64 + 1;
        acc = acc.checked_mul(26)?.checked_add(digit)?;
    }
    Some(acc)
}

/// One coordinate of a reference.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum Axis {
    /// A fixed row or column.
    Absolute(i64),
    /// An offset from the anchor's row or column.
    Relative(i64),
}

impl Axis {
    /// `None` when the offset runs past the `i64` range.
    pub fn resolve(self, anchor: i64) -> Option<i64> {
        match self {
            Axis::Absolute(v) => Some(v),
            Axis::Relative(offset) => anchor.checked_add(offset),
        }
    }

    pub fn is_relative(self) -> bool {
        matches!(self, Axis::Relative(_))
    }

    /// Build the axis that lands on `target` from `anchor`.
    pub fn toward(target: i64, anchor: i64, relative: bool) -> Option<Axis> {
        if relative {
            target.checked_sub(anchor).map(Axis::Relative)
        } else {
            Some(Axis::Absolute(target))
        }
    }
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct Coord {
    pub row: Axis,
    pub col: Axis,
}

impl Coord {
    pub fn new(row: Axis, col: Axis) -> Coord {
        Coord { row, col }
    }

    pub fn resolve(&self, anchor: &Location) -> Option<(i64, i64)> {
        Some((self.row.resolve(anchor.row)?, self.col.resolve(anchor.col)?))
    }
}

#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum SheetRef {
    /// Whatever sheet the anchor cell is on.
    Anchor,
    Named(String),
}

/// How a script refers to a cell or a rectangular range, relative to an anchor.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct LocationReference {
    pub sheet: SheetRef,
    pub start: Coord,
    /// Second corner for range references. Not required to be below/right of `start`.
    pub end: Option<Coord>,
}

/// Inclusive bounds of a resolved reference.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedBounds {
    pub sheet: String,
    pub min_row: i64,
    pub min_col: i64,
    pub max_row: i64,
    pub max_col: i64,
}

impl ResolvedBounds {
    pub fn cell_count(&self) -> u64 {
        let rows = self.max_row.abs_diff(self.min_row).saturating_add(1);
        let cols = self.max_col.abs_diff(self.min_col).saturating_add(1);
        rows.saturating_mul(cols)
    }

    pub fn contains(&self, location: &Location) -> bool {
        location.sheet == self.sheet
            && (self.min_row..=self.max_row).contains(&location.row)
            && (self.min_col..=self.max_col).contains(&location.col)
    }
}

impl LocationReference {
    pub fn cell(sheet: SheetRef, row: Axis, col: Axis) -> LocationReference {
        LocationReference {
            sheet,
            start: Coord::new(row, col),
            end: None,
        }
    }

    pub fn range(sheet: SheetRef, start: Coord, end: Coord) -> LocationReference {
        LocationReference {
            sheet,
            start,
            end: Some(end),
        }
    }

    pub fn is_range(&self) -> bool {
        self.end.is_some()
    }

    pub fn sheet_name<'a>(&'a self, anchor: &'a Location) -> &'a str {
        match &self.sheet {
            SheetRef::Anchor => &anchor.sheet,
            SheetRef::Named(name) => name,
        }
    }

    pub fn resolve_start(&self, anchor: &Location) -> Option<Location> {
        let (row, col) = self.start.resolve(anchor)?;
        Some(Location::new(self.sheet_name(anchor), row, col))
    }

    /// `None` when a relative axis leaves the `i64` range from `anchor`.
    pub fn bounds(&self, anchor: &Location) -> Option<ResolvedBounds> {
        let (r1, c1) = self.start.resolve(anchor)?;
        let (r2, c2) = match &self.end {
            Some(end) => end.resolve(anchor)?,
            None => (r1, c1),
        };
        Some(ResolvedBounds {
            sheet: self.sheet_name(anchor).to_string(),
            min_row: r1.min(r2),
            min_col: c1.min(c2),
            max_row: r1.max(r2),
            max_col: c1.max(c2),
        })
    }

    /// Every location the reference covers, row-major from the top-left
    /// corner. Empty if it cannot be resolved from `anchor`.
    pub fn resolve(&self, anchor: &Location) -> Vec<Location> {
        let Some(bounds) = self.bounds(anchor) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for row in bounds.min_row..=bounds.max_row {
            for col in bounds.min_col..=bounds.max_col {
                out.push(Location::new(bounds.sheet.clone(), row, col));
            }
        }
        out
    }

    /// Like [`resolve`](Self::resolve), but gives up on ranges above
    /// `max_cells` and on references that do not resolve.
    pub fn resolve_limited(&self, anchor: &Location, max_cells: usize) -> Option<Vec<Location>> {
        let bounds = self.bounds(anchor)?;
        if bounds.cell_count() > max_cells as u64 {
            return None;
        }
        Some(self.resolve(anchor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_col_to_letters_boundaries() {
        assert_eq!(col_to_letters(1).as_deref(), Some("A"));
        assert_eq!(col_to_letters(26).as_deref(), Some("Z"));
        assert_eq!(col_to_letters(27).as_deref(), Some("AA"));
        assert_eq!(col_to_letters(52).as_deref(), Some("AZ"));
        assert_eq!(col_to_letters(53).as_deref(), Some("BA"));
        assert_eq!(col_to_letters(702).as_deref(), Some("ZZ"));
        assert_eq!(col_to_letters(703).as_deref(), Some("AAA"));
        assert_eq!(col_to_letters(MAX_SHEET_COLUMN).as_deref(), Some("XFD"));
        assert_eq!(col_to_letters(0), None);
        assert_eq!(col_to_letters(-3), None);
    }

    #[test]
    fn test_letters_to_col_rejects_bad_input() {
        assert_eq!(letters_to_col(""), None);
        assert_eq!(letters_to_col("a"), None);
        assert_eq!(letters_to_col("A1"), None);
        assert_eq!(letters_to_col(&"Z".repeat(40)), None);
        assert_eq!(letters_to_col("XFD"), Some(MAX_SHEET_COLUMN));
    }

    #[test]
    fn test_column_bijection_first_thousand() {
        for col in 1..=1000 {
            let letters = col_to_letters(col).unwrap();
            assert!(letters.bytes().all(|b| b.is_ascii_uppercase()));
            assert_eq!(letters_to_col(&letters), Some(col));
        }
    }

    #[test]
    fn test_location_display_and_parse() {
        let loc = Location::new("Sheet1", 3, 2);
        assert_eq!(loc.to_string(), "Sheet1!B3");
        assert_eq!(Location::parse("Sheet1!B3"), Some(loc));

        let spaced = Location::new("My Sheet", 10, 28);
        assert_eq!(spaced.to_string(), "'My Sheet'!AB10");
        assert_eq!(Location::parse("'My Sheet'!AB10"), Some(spaced));

        assert_eq!(Location::corner("S").to_string(), "S!R0C0");
        assert_eq!(Location::parse("S!A0"), None);
        assert_eq!(Location::parse("B3"), None);
    }

    #[test]
    fn test_resolve_inverted_range_iterates_min_to_max() {
        let anchor = Location::new("S", 5, 5);
        let reference = LocationReference::range(
            SheetRef::Anchor,
            Coord::new(Axis::Absolute(2), Axis::Absolute(2)),
            Coord::new(Axis::Relative(-4), Axis::Relative(-4)),
        );
        let cells = reference.resolve(&anchor);
        assert_eq!(
            cells,
            vec![
                Location::new("S", 1, 1),
                Location::new("S", 1, 2),
                Location::new("S", 2, 1),
                Location::new("S", 2, 2),
            ]
        );
    }

    #[test]
    fn test_resolve_against_different_anchor() {
        let reference =
            LocationReference::cell(SheetRef::Anchor, Axis::Relative(1), Axis::Absolute(3));
        assert_eq!(
            reference.resolve_start(&Location::new("A", 1, 1)),
            Some(Location::new("A", 2, 3))
        );
        assert_eq!(
            reference.resolve_start(&Location::new("B", 7, 9)),
            Some(Location::new("B", 8, 3))
        );
    }

    #[test]
    fn test_resolve_limited_skips_huge_ranges() {
        let reference = LocationReference::range(
            SheetRef::Named("S".into()),
            Coord::new(Axis::Absolute(1), Axis::Absolute(1)),
            Coord::new(Axis::Absolute(1000), Axis::Absolute(1000)),
        );
        let anchor = Location::new("S", 1, 1);
        assert!(reference.resolve_limited(&anchor, 1000).is_none());
        assert_eq!(reference.resolve_limited(&anchor, 1_000_000).map(|v| v.len()), Some(1_000_000));
    }

    #[test]
    fn test_resolve_near_i64_limits() {
        let reference =
            LocationReference::cell(SheetRef::Anchor, Axis::Relative(1), Axis::Relative(0));
        let anchor = Location::new("S", i64::MAX, 1);
        assert_eq!(reference.resolve_start(&anchor), None);
        assert!(reference.resolve(&anchor).is_empty());
        assert!(reference.resolve_limited(&anchor, 10).is_none());
        assert_eq!(Axis::toward(1, i64::MIN, true), None);

        let wide = ResolvedBounds {
            sheet: "S".into(),
            min_row: i64::MIN,
            min_col: 1,
            max_row: i64::MAX,
            max_col: 1,
        };
        assert_eq!(wide.cell_count(), u64::MAX);
    }
}
