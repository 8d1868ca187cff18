//! Composite index: chained hash maps over a B-tree.
//!
//! Columns `c_1 .. c_{n-1}` are prefix levels keyed by the stringified
//! value; the final column is numeric and lives in a B-tree per reached
//! leaf. Prefix filters accept equality or wildcard only; a range filter
//! on a non-last column is a range error. Results are deduplicated and
//! sorted.

use std::collections::HashMap;

use crate::btree::BTreeIndex;
use crate::error::{NdtsError, Result};
use crate::schema::{ColumnType, Value};
use std::ops::Bound;

#[derive(Debug, Clone)]
pub enum Predicate {
    Eq(Value),
    Range {
        gt: Option<Value>,
        gte: Option<Value>,
        lt: Option<Value>,
        lte: Option<Value>,
    },
}

#[derive(Debug)]
enum Level {
    Map(HashMap<String, Level>),
    Int(BTreeIndex<i64>),
    Float(BTreeIndex<f64>),
}

#[derive(Debug)]
pub struct CompositeIndex {
    prefix_columns: Vec<String>,
    last_column: String,
    last_type: ColumnType,
    root: Level,
}

impl CompositeIndex {
    /// `columns` are the prefix names in order; `last_column` must be
    /// numeric (any integer width, or float64).
    pub fn new(
        prefix_columns: Vec<String>,
        last_column: impl Into<String>,
        last_type: ColumnType,
    ) -> Self {
        let root = if prefix_columns.is_empty() {
            new_tree(last_type)
        } else {
            Level::Map(HashMap::new())
        };
        CompositeIndex {
            prefix_columns,
            last_column: last_column.into(),
            last_type,
            root,
        }
    }

    pub fn insert(&mut self, prefix: &[Value], last: Value, row: u32) -> Result<()> {
        if prefix.len() != self.prefix_columns.len() {
            return Err(NdtsError::schema(format!(
                "composite key has {} prefix values, index expects {}",
                prefix.len(),
                self.prefix_columns.len()
            )));
        }
        let last_type = self.last_type;
        let mut level = &mut self.root;
        for (depth, value) in prefix.iter().enumerate() {
            let Level::Map(map) = level else {
                return Err(NdtsError::state("composite level shape out of sync"));
            };
            let next_is_leaf = depth + 1 == prefix.len();
            level = map.entry(key_string(value)).or_insert_with(|| {
                if next_is_leaf {
                    new_tree(last_type)
                } else {
                    Level::Map(HashMap::new())
                }
            });
        }
        match level {
            Level::Int(tree) => tree.insert(last.as_exact_i64()?, row),
            Level::Float(tree) => tree.insert(last.as_exact_f64()?, row),
            Level::Map(_) => return Err(NdtsError::state("composite level shape out of sync")),
        }
        Ok(())
    }

    /// Evaluate equality/wildcard prefix filters plus an optional last
    /// column predicate. Unknown filter columns and range filters on prefix
    /// columns are range errors.
    pub fn query(&self, filters: &[(&str, Predicate)]) -> Result<Vec<u32>> {
        for (column, predicate) in filters {
            let is_prefix = self.prefix_columns.iter().any(|c| c == column);
            if !is_prefix && *column != self.last_column {
                return Err(NdtsError::range(format!(
                    "filter names unknown column {column}"
                )));
            }
            if is_prefix && matches!(predicate, Predicate::Range { .. }) {
                return Err(NdtsError::range(format!(
                    "range filter on non-last column {column}"
                )));
            }
        }

        let mut levels = vec![&self.root];
        for name in &self.prefix_columns {
            let filter = filters.iter().find(|(c, _)| c == name).map(|(_, p)| p);
            let mut next = Vec::new();
            for level in levels {
                let Level::Map(map) = level else {
                    return Err(NdtsError::state("composite level shape out of sync"));
                };
                match filter {
                    Some(Predicate::Eq(value)) => {
                        if let Some(child) = map.get(&key_string(value)) {
                            next.push(child);
                        }
                    }
                    // Wildcard: fan out to every child.
                    _ => next.extend(map.values()),
                }
            }
            levels = next;
        }

        let last = filters
            .iter()
            .find(|(c, _)| c == &self.last_column)
            .map(|(_, p)| p);
        let mut rows = Vec::new();
        for level in levels {
            match level {
                Level::Int(tree) => rows.extend(query_tree_i64(tree, last)?),
                Level::Float(tree) => rows.extend(query_tree_f64(tree, last)?),
                Level::Map(_) => {
                    return Err(NdtsError::state("composite level shape out of sync"));
                }
            }
        }
        rows.sort_unstable();
        rows.dedup();
        Ok(rows)
    }
}

fn new_tree(last_type: ColumnType) -> Level {
    match last_type {
        ColumnType::F64 => Level::Float(BTreeIndex::new()),
        _ => Level::Int(BTreeIndex::new()),
    }
}

/// Stringified form shared by insert and lookup, so `Int(3)` and the
/// equality filter `Int(3)` land on the same bucket.
fn key_string(value: &Value) -> String {
    match value {
        Value::Int(v) => v.to_string(),
        Value::Float(f) => f.to_string(),
    }
}

fn query_tree_i64(tree: &BTreeIndex<i64>, filter: Option<&Predicate>) -> Result<Vec<u32>> {
    match filter {
        None => Ok(tree.all_rows()),
        Some(Predicate::Eq(value)) => Ok(tree.query(value.as_exact_i64()?)),
        Some(Predicate::Range { gt, gte, lt, lte }) => {
            let lo = match (gt, gte) {
                (Some(v), _) => Bound::Excluded(v.as_exact_i64()?),
                (None, Some(v)) => Bound::Included(v.as_exact_i64()?),
                (None, None) => Bound::Unbounded,
            };
            let hi = match (lt, lte) {
                (Some(v), _) => Bound::Excluded(v.as_exact_i64()?),
                (None, Some(v)) => Bound::Included(v.as_exact_i64()?),
                (None, None) => Bound::Unbounded,
            };
            Ok(tree.collect_bounds(lo, hi))
        }
    }
}

fn query_tree_f64(tree: &BTreeIndex<f64>, filter: Option<&Predicate>) -> Result<Vec<u32>> {
    match filter {
        None => Ok(tree.all_rows()),
        Some(Predicate::Eq(value)) => Ok(tree.query(value.as_exact_f64()?)),
        Some(Predicate::Range { gt, gte, lt, lte }) => {
            let lo = match (gt, gte) {
                (Some(v), _) => Bound::Excluded(v.as_exact_f64()?),
                (None, Some(v)) => Bound::Included(v.as_exact_f64()?),
                (None, None) => Bound::Unbounded,
            };
            let hi = match (lt, lte) {
                (Some(v), _) => Bound::Excluded(v.as_exact_f64()?),
                (None, Some(v)) => Bound::Included(v.as_exact_f64()?),
                (None, None) => Bound::Unbounded,
            };
            Ok(tree.collect_bounds(lo, hi))
        }
    }
}
