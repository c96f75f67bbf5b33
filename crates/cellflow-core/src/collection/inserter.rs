//! Sort/filter keys and sorted placement.

use rhai::Dynamic;

use super::UserItem;

/// Outcome of a sort/filter function for one item.
///
/// Derived ordering puts every `Keep` before `Reject`, and `Keep`s by key.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum SortFilterResult {
    Keep(i64),
    Reject,
}

impl SortFilterResult {
    pub fn is_reject(self) -> bool {
        matches!(self, SortFilterResult::Reject)
    }

    /// Interpret a script result: integers are keys, floats round to keys,
    /// `true` keeps with key 0, `false` and `()` reject. `None` for
    /// anything else.
    pub fn from_dynamic(value: &Dynamic) -> Option<SortFilterResult> {
        if value.is_unit() {
            return Some(SortFilterResult::Reject);
        }
        if let Ok(n) = value.as_int() {
            return Some(SortFilterResult::Keep(n));
        }
        if let Ok(n) = value.as_float() {
            return n.is_finite().then(|| SortFilterResult::Keep(n.round() as i64));
        }
        if let Ok(b) = value.as_bool() {
            return Some(if b {
                SortFilterResult::Keep(0)
            } else {
                SortFilterResult::Reject
            });
        }
        None
    }
}

/// Evaluates a named sort/filter function for `items[index]`.
///
/// `items` is a snapshot; the evaluator cannot change the collection it is
/// computing a key for.
pub trait SortFilter {
    fn evaluate(&mut self, function: &str, items: &[UserItem], index: usize) -> SortFilterResult;
}

impl<F> SortFilter for F
where
    F: FnMut(&str, &[UserItem], usize) -> SortFilterResult,
{
    fn evaluate(&mut self, function: &str, items: &[UserItem], index: usize) -> SortFilterResult {
        self(function, items, index)
    }
}

pub struct SortedListInserter;

impl SortedListInserter {
    /// Binary search over `[0, len)` for where `key` goes: after the last
    /// position whose key is `<= key`, so equal keys keep insertion order.
    pub fn insertion_index<K: Ord>(len: usize, key: &K, mut key_at: impl FnMut(usize) -> K) -> usize {
        let mut lo = 0;
        let mut hi = len;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if key_at(mid) <= *key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }
}
