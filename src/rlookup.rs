//! Field-value schema and per-result row storage.
//!
//! `RLookup` is the query-planning-time directory of field names; `RLookupKey`
//! is a handle into it; `RLookupRow` is the per-`SearchResult` value map a
//! result carries as it flows downstream. A row checks the precomputed sort
//! vector before falling back to its dynamic (loaded-at-query-time) overlay.

use std::cmp::Ordering;
use std::sync::Arc;

use smallvec::SmallVec;

/// A single field value, as carried in a sort vector or the dynamic overlay.
///
/// A closed, always-comparable enum, so field comparison
/// (`sorter::compare_values`) is infallible. Cross-type comparisons are
/// ordered `Null < Double < Str`.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Double(f64),
    Str(String),
}

pub fn compare_values(a: &FieldValue, b: &FieldValue) -> Ordering {
    use FieldValue::*;
    match (a, b) {
        (Double(x), Double(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Str(x), Str(y)) => x.cmp(y),
        (Null, Null) => Ordering::Equal,
        (Null, _) => Ordering::Less,
        (_, Null) => Ordering::Greater,
        (Double(_), Str(_)) => Ordering::Less,
        (Str(_), Double(_)) => Ordering::Greater,
    }
}

/// A precomputed, dense array of sort-relevant field values, shared (via
/// `Arc`) between a document's metadata and every result row built from it.
#[derive(Debug, Default)]
pub struct SortVector(Vec<Option<FieldValue>>);

impl SortVector {
    pub fn new(values: Vec<Option<FieldValue>>) -> Self {
        Self(values)
    }

    pub fn get(&self, slot: usize) -> Option<&FieldValue> {
        self.0.get(slot).and_then(|v| v.as_ref())
    }
}

/// A handle to a named field, created once during query planning and shared
/// (via `Arc`) by every stage and row that references it.
#[derive(Debug, PartialEq, Eq)]
pub struct RLookupKey {
    pub name: String,
    /// This key's position in the dense row array (`RLookupRow`'s dynamic
    /// overlay is keyed by this).
    pub row_index: usize,
    /// This key's slot in a document's precomputed sort vector, if any.
    pub sort_vector_slot: Option<usize>,
}

/// The query-time directory of known field names. A thin, append-only
/// registry: planning creates keys up front, and every later stage refers to
/// them by the `Arc<RLookupKey>` handle rather than by name.
#[derive(Debug, Default)]
pub struct RLookup {
    keys: Vec<Arc<RLookupKey>>,
}

impl RLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new field, assigning it the next dense row index.
    pub fn declare(&mut self, name: impl Into<String>, sort_vector_slot: Option<usize>) -> Arc<RLookupKey> {
        let row_index = self.keys.len();
        let key = Arc::new(RLookupKey { name: name.into(), row_index, sort_vector_slot });
        self.keys.push(key.clone());
        key
    }

    pub fn get(&self, name: &str) -> Option<&Arc<RLookupKey>> {
        self.keys.iter().find(|k| k.name == name)
    }

    pub fn keys(&self) -> &[Arc<RLookupKey>] {
        &self.keys
    }
}

/// Per-result value map: the precomputed sort vector (shared, never copied)
/// plus a small dynamic overlay for fields loaded at query time.
#[derive(Debug, Default, Clone)]
pub struct RLookupRow {
    pub sv: Option<Arc<SortVector>>,
    dyn_values: SmallVec<[(usize, FieldValue); 4]>,
}

impl RLookupRow {
    pub fn write_key(&mut self, key: &RLookupKey, value: FieldValue) {
        if let Some(slot) = self.dyn_values.iter_mut().find(|(i, _)| *i == key.row_index) {
            slot.1 = value;
        } else {
            self.dyn_values.push((key.row_index, value));
        }
    }

    /// Looks the key up in the precomputed sort vector first, then the
    /// dynamic overlay.
    pub fn get_item(&self, key: &RLookupKey) -> Option<&FieldValue> {
        if let (Some(slot), Some(sv)) = (key.sort_vector_slot, self.sv.as_ref()) {
            if let Some(v) = sv.get(slot) {
                return Some(v);
            }
        }
        self.dyn_values.iter().find(|(i, _)| *i == key.row_index).map(|(_, v)| v)
    }

    pub fn has_dynamic_overlay(&self) -> bool {
        !self.dyn_values.is_empty()
    }

    pub fn wipe(&mut self) {
        self.sv = None;
        self.dyn_values.clear();
    }
}
