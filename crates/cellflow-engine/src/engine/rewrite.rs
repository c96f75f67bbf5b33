//! Reference rewriting between symbolic and canonical form.
//!
//! Authors type spreadsheet-style tokens; functions store and execute
//! canonical lookup calls:
//!
//! | symbolic (anchor `S!B2`) | canonical |
//! |--------------------------|-----------|
//! | `B3`                     | `CELL(ANCHOR_SHEET, ANCHOR_ROW + 1, ANCHOR_COL + 0)` |
//! | `$B$3`                   | `CELL(ANCHOR_SHEET, 3, 2)` |
//! | `Other!A$1`              | `CELL("Other", 1, ANCHOR_COL - 1)` |
//! | `A1:$C$4`                | `RANGE(ANCHOR_SHEET, ANCHOR_ROW - 1, ANCHOR_COL - 1, 4, 3)` |
//!
//! A `$` marks the following axis as absolute; unmarked axes are offsets
//! from the anchor. Both directions only touch recognized tokens outside
//! string literals and comments and return anything else unchanged.

use regex::{Captures, Match, Regex};
use std::sync::OnceLock;

use super::location::{
    Axis, Coord, Location, LocationReference, SheetRef, col_to_letters, is_plain_sheet_name,
    letters_to_col,
};

pub const CELL_FN: &str = "CELL";
pub const RANGE_FN: &str = "RANGE";
pub const ANCHOR_SHEET: &str = "ANCHOR_SHEET";
pub const ANCHOR_ROW: &str = "ANCHOR_ROW";
pub const ANCHOR_COL: &str = "ANCHOR_COL";

const SHEET_ARG: &str = r#"(ANCHOR_SHEET|"(?:[^"\\\n]|\\["\\])*")"#;
const ROW_ARG: &str = r"(ANCHOR_ROW [+-] [0-9]+|-?[0-9]+)";
const COL_ARG: &str = r"(ANCHOR_COL [+-] [0-9]+|-?[0-9]+)";

/// Matches canonical single-cell lookups: `CELL(sheet, row, col)`.
pub(crate) fn canonical_cell_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"\b{}\({}, {}, {}\)",
            CELL_FN, SHEET_ARG, ROW_ARG, COL_ARG
        ))
        .expect("canonical cell regex must compile")
    })
}

/// Matches canonical range lookups: `RANGE(sheet, row, col, rowEnd, colEnd)`.
pub(crate) fn canonical_range_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"\b{}\({}, {}, {}, {}, {}\)",
            RANGE_FN, SHEET_ARG, ROW_ARG, COL_ARG, ROW_ARG, COL_ARG
        ))
        .expect("canonical range regex must compile")
    })
}

/// Matches symbolic tokens like `B3`, `$B$3`, `Sheet2!A1:B4`, `'My Sheet'!C$7`.
fn symbolic_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"(?:(?P<sheet>[A-Za-z_][A-Za-z0-9_]*)!|'(?P<qsheet>[^'!\n]+)'!)?",
            r"(?P<c1>\$?)(?P<col1>[A-Z]{1,3})(?P<r1>\$?)(?P<row1>[0-9]+)",
            r"(?::(?P<c2>\$?)(?P<col2>[A-Z]{1,3})(?P<r2>\$?)(?P<row2>[0-9]+))?",
        ))
        .expect("symbolic reference regex must compile")
    })
}

fn whole<'t>(caps: &Captures<'t>) -> Match<'t> {
    caps.get(0).expect("capture group 0 always participates")
}

fn full_match<'t>(re: &Regex, text: &'t str) -> Option<Captures<'t>> {
    re.captures(text)
        .filter(|caps| whole(caps).start() == 0 && whole(caps).end() == text.len())
}

/// Parse an integer only if `text` is exactly its canonical decimal spelling.
fn canonical_int(text: &str) -> Option<i64> {
    let n = text.parse::<i64>().ok()?;
    (n.to_string() == text).then_some(n)
}

fn parse_sheet_arg(text: &str) -> Option<SheetRef> {
    if text == ANCHOR_SHEET {
        return Some(SheetRef::Anchor);
    }
    let quoted = text.strip_prefix('"')?.strip_suffix('"')?;
    let mut name = String::with_capacity(quoted.len());
    let mut chars = quoted.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next()? {
                escaped @ ('"' | '\\') => name.push(escaped),
                _ => return None,
            },
            '"' => return None,
            c => name.push(c),
        }
    }
    if name.is_empty() {
        return None;
    }
    Some(SheetRef::Named(name))
}

fn parse_axis_arg(text: &str, anchor_name: &str) -> Option<Axis> {
    let Some(rest) = text.strip_prefix(anchor_name) else {
        return canonical_int(text).map(Axis::Absolute);
    };
    if let Some(digits) = rest.strip_prefix(" + ") {
        let n = canonical_int(digits)?;
        return (n >= 0).then_some(Axis::Relative(n));
    }
    let digits = rest.strip_prefix(" - ")?;
    let n = canonical_int(digits)?;
    (n > 0).then_some(Axis::Relative(-n))
}

fn format_sheet_arg(sheet: &SheetRef) -> String {
    match sheet {
        SheetRef::Anchor => ANCHOR_SHEET.to_string(),
        SheetRef::Named(name) => {
            format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
        }
    }
}

fn format_axis(axis: Axis, anchor_name: &str) -> String {
    match axis {
        Axis::Absolute(v) => v.to_string(),
        Axis::Relative(offset) if offset < 0 => {
            format!("{} - {}", anchor_name, offset.unsigned_abs())
        }
        Axis::Relative(offset) => format!("{} + {}", anchor_name, offset),
    }
}

fn cell_from_captures(caps: &Captures) -> Option<LocationReference> {
    Some(LocationReference::cell(
        parse_sheet_arg(&caps[1])?,
        parse_axis_arg(&caps[2], ANCHOR_ROW)?,
        parse_axis_arg(&caps[3], ANCHOR_COL)?,
    ))
}

fn range_from_captures(caps: &Captures) -> Option<LocationReference> {
    Some(LocationReference::range(
        parse_sheet_arg(&caps[1])?,
        Coord::new(
            parse_axis_arg(&caps[2], ANCHOR_ROW)?,
            parse_axis_arg(&caps[3], ANCHOR_COL)?,
        ),
        Coord::new(
            parse_axis_arg(&caps[4], ANCHOR_ROW)?,
            parse_axis_arg(&caps[5], ANCHOR_COL)?,
        ),
    ))
}

/// Recognize a canonical `CELL(...)` or `RANGE(...)` expression.
///
/// The canonical form carries no anchor-dependent data, so no anchor is
/// needed. Anything not spelled exactly as [`to_canonical`] would spell it
/// yields `None`.
pub fn try_parse_canonical(expr: &str) -> Option<LocationReference> {
    if let Some(caps) = full_match(canonical_cell_re(), expr) {
        return cell_from_captures(&caps);
    }
    full_match(canonical_range_re(), expr).and_then(|caps| range_from_captures(&caps))
}

/// Spell a reference as a canonical lookup call.
pub fn to_canonical(reference: &LocationReference) -> String {
    let sheet = format_sheet_arg(&reference.sheet);
    let row = format_axis(reference.start.row, ANCHOR_ROW);
    let col = format_axis(reference.start.col, ANCHOR_COL);
    match &reference.end {
        None => format!("{}({}, {}, {})", CELL_FN, sheet, row, col),
        Some(end) => format!(
            "{}({}, {}, {}, {}, {})",
            RANGE_FN,
            sheet,
            row,
            col,
            format_axis(end.row, ANCHOR_ROW),
            format_axis(end.col, ANCHOR_COL)
        ),
    }
}

fn symbolic_corner(
    caps: &Captures,
    groups: [&str; 4],
    anchor: &Location,
) -> Option<Coord> {
    let [col_marker, col_letters, row_marker, row_digits] = groups;
    let col = letters_to_col(caps.name(col_letters)?.as_str())?;
    let digits = caps.name(row_digits)?.as_str();
    if digits.starts_with('0') {
        return None;
    }
    let row = digits.parse::<i64>().ok()?;
    let col_absolute = caps.name(col_marker).is_some_and(|m| !m.is_empty());
    let row_absolute = caps.name(row_marker).is_some_and(|m| !m.is_empty());
    Some(Coord::new(
        Axis::toward(row, anchor.row, !row_absolute)?,
        Axis::toward(col, anchor.col, !col_absolute)?,
    ))
}

fn symbolic_from_captures(caps: &Captures, anchor: &Location) -> Option<LocationReference> {
    let sheet = caps
        .name("sheet")
        .or_else(|| caps.name("qsheet"))
        .map(|m| SheetRef::Named(m.as_str().to_string()))
        .unwrap_or(SheetRef::Anchor);
    let start = symbolic_corner(caps, ["c1", "col1", "r1", "row1"], anchor)?;
    let end = match caps.name("col2") {
        Some(_) => Some(symbolic_corner(caps, ["c2", "col2", "r2", "row2"], anchor)?),
        None => None,
    };
    Some(LocationReference { sheet, start, end })
}

/// Recognize a symbolic token (the whole of `token`) authored at `anchor`.
pub fn try_parse_symbolic(token: &str, anchor: &Location) -> Option<LocationReference> {
    full_match(symbolic_re(), token).and_then(|caps| symbolic_from_captures(&caps, anchor))
}

fn symbolic_corner_text(coord: &Coord, anchor: &Location) -> Option<String> {
    let (row, col) = coord.resolve(anchor)?;
    if row < 1 {
        return None;
    }
    let letters = col_to_letters(col)?;
    let col_marker = if coord.col.is_relative() { "" } else { "$" };
    let row_marker = if coord.row.is_relative() { "" } else { "$" };
    Some(format!("{}{}{}{}", col_marker, letters, row_marker, row))
}

/// Spell a reference as a symbolic token as seen from `anchor`.
///
/// Returns `None` when the reference resolves outside the addressable grid
/// (row or column below 1) or names a sheet that cannot be quoted.
pub fn to_symbolic(reference: &LocationReference, anchor: &Location) -> Option<String> {
    let mut out = String::new();
    if let SheetRef::Named(name) = &reference.sheet
        && name != &anchor.sheet
    {
        if is_plain_sheet_name(name) {
            out.push_str(name);
        } else if name.contains(['\'', '!', '\n']) {
            return None;
        } else {
            out.push('\'');
            out.push_str(name);
            out.push('\'');
        }
        out.push('!');
    }
    out.push_str(&symbolic_corner_text(&reference.start, anchor)?);
    if let Some(end) = &reference.end {
        out.push(':');
        out.push_str(&symbolic_corner_text(end, anchor)?);
    }
    Some(out)
}

/// Turn a symbolic token into its canonical call; unrecognized text is returned unchanged.
pub fn to_canonical_from_symbolic(token: &str, anchor: &Location) -> String {
    match try_parse_symbolic(token, anchor) {
        Some(reference) => to_canonical(&reference),
        None => token.to_string(),
    }
}

/// Per-byte flags marking string literals and comments.
pub(crate) fn literal_mask(script: &str) -> Vec<bool> {
    let bytes = script.as_bytes();
    let mut mask = vec![false; bytes.len()];
    let mut i = 0usize;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'"' | b'`') => {
                let start = i;
                let mut backslashes = 0usize;
                i += 1;
                while i < bytes.len() {
                    let b = bytes[i];
                    if b == b'\\' {
                        backslashes += 1;
                        i += 1;
                        continue;
                    }
                    if b == quote && backslashes.is_multiple_of(2) {
                        break;
                    }
                    backslashes = 0;
                    i += 1;
                }
                let end = (i + 1).min(bytes.len());
                mask[start..end].fill(true);
                i = end;
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                let start = i;
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                mask[start..i].fill(true);
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let start = i;
                let mut depth = 0usize;
                while i < bytes.len() {
                    if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'*') {
                        depth += 1;
                        i += 2;
                    } else if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
                        depth -= 1;
                        i += 2;
                        if depth == 0 {
                            break;
                        }
                    } else {
                        i += 1;
                    }
                }
                let end = i.min(bytes.len());
                mask[start..end].fill(true);
            }
            _ => i += 1,
        }
    }

    mask
}

/// A match may be rewritten only if it starts in code and is not glued to
/// an identifier, a property accessor, or a `$` marker.
pub(crate) fn is_standalone(script: &str, mask: &[bool], start: usize, end: usize) -> bool {
    if mask.get(start).copied().unwrap_or(true) {
        return false;
    }
    let bytes = script.as_bytes();
    if let Some(&prev) = start.checked_sub(1).and_then(|i| bytes.get(i))
        && (prev.is_ascii_alphanumeric() || matches!(prev, b'_' | b'.' | b'$' | b'\'' | b'#'))
    {
        return false;
    }
    if let Some(&next) = bytes.get(end)
        && (next.is_ascii_alphanumeric() || matches!(next, b'_' | b'$' | b'('))
    {
        return false;
    }
    true
}

/// Replace every symbolic token in `script` with its canonical call, as
/// authored at `anchor`.
pub fn canonicalize_script(script: &str, anchor: &Location) -> String {
    let mask = literal_mask(script);
    symbolic_re()
        .replace_all(script, |caps: &Captures| {
            let m = whole(caps);
            if !is_standalone(script, &mask, m.start(), m.end()) {
                return m.as_str().to_string();
            }
            match symbolic_from_captures(caps, anchor) {
                Some(reference) => to_canonical(&reference),
                None => m.as_str().to_string(),
            }
        })
        .into_owned()
}

fn symbolize_with(
    script: &str,
    re: &Regex,
    parse: fn(&Captures) -> Option<LocationReference>,
    anchor: &Location,
) -> String {
    let mask = literal_mask(script);
    re.replace_all(script, |caps: &Captures| {
        let m = whole(caps);
        if !is_standalone(script, &mask, m.start(), m.end()) {
            return m.as_str().to_string();
        }
        parse(caps)
            .and_then(|reference| to_symbolic(&reference, anchor))
            .unwrap_or_else(|| m.as_str().to_string())
    })
    .into_owned()
}

/// Replace every canonical call in `script` with its symbolic token as seen
/// from `anchor`. Calls that cannot be shown symbolically are kept.
pub fn symbolize_script(script: &str, anchor: &Location) -> String {
    let ranges = symbolize_with(script, canonical_range_re(), range_from_captures, anchor);
    symbolize_with(&ranges, canonical_cell_re(), cell_from_captures, anchor)
}
