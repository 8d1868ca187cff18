//! B-tree index over one numeric column.
//!
//! A rebuildable cache, never the source of truth: keys are column values,
//! entries hold the sorted-unique row indices carrying that value. Range
//! results concatenate per-key row lists in ascending key order, so rows
//! within one key keep their insertion order.

use std::cmp::Ordering;
use std::ops::Bound;

pub const DEFAULT_ORDER: usize = 32;

/// Key types admitted by the tree. `f64` orders by `total_cmp`, which gives
/// NaNs a defined (largest) position instead of poisoning comparisons.
pub trait IndexKey: Copy {
    fn order_key(&self, other: &Self) -> Ordering;
}

macro_rules! int_index_key {
    ($($t:ty),*) => {$(
        impl IndexKey for $t {
            fn order_key(&self, other: &Self) -> Ordering {
                self.cmp(other)
            }
        }
    )*};
}
int_index_key!(i16, i32, i64);

impl IndexKey for f64 {
    fn order_key(&self, other: &Self) -> Ordering {
        self.total_cmp(other)
    }
}

#[derive(Debug, Clone)]
struct Entry<K> {
    key: K,
    rows: Vec<u32>,
}

#[derive(Debug, Clone)]
enum Node<K> {
    Leaf(Vec<Entry<K>>),
    Internal {
        /// Separator i is the smallest key reachable under child i + 1.
        keys: Vec<K>,
        children: Vec<Node<K>>,
    },
}

enum Insert<K> {
    Done,
    Split { sep: K, right: Node<K> },
}

#[derive(Debug, Clone)]
pub struct BTreeIndex<K: IndexKey> {
    order: usize,
    root: Node<K>,
    distinct_keys: usize,
}

impl<K: IndexKey> BTreeIndex<K> {
    pub fn new() -> Self {
        Self::with_order(DEFAULT_ORDER)
    }

    pub fn with_order(order: usize) -> Self {
        assert!(order >= 3, "order must be at least 3");
        BTreeIndex {
            order,
            root: Node::Leaf(Vec::new()),
            distinct_keys: 0,
        }
    }

    /// Index every element of `keys` by its position.
    pub fn from_keys(keys: &[K]) -> Self {
        let mut tree = Self::new();
        for (row, &key) in keys.iter().enumerate() {
            tree.insert(key, row as u32);
        }
        tree
    }

    pub fn distinct_keys(&self) -> usize {
        self.distinct_keys
    }

    pub fn insert(&mut self, key: K, row: u32) {
        let order = self.order;
        let mut new_key = false;
        if let Insert::Split { sep, right } = insert_into(&mut self.root, key, row, order, &mut new_key)
        {
            let old_root = std::mem::replace(&mut self.root, Node::Leaf(Vec::new()));
            self.root = Node::Internal {
                keys: vec![sep],
                children: vec![old_root, right],
            };
        }
        if new_key {
            self.distinct_keys += 1;
        }
    }

    /// Rows whose key equals `key`, ascending.
    pub fn query(&self, key: K) -> Vec<u32> {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf(entries) => {
                    return match entries.binary_search_by(|e| e.key.order_key(&key)) {
                        Ok(i) => entries[i].rows.clone(),
                        Err(_) => Vec::new(),
                    };
                }
                Node::Internal { keys, children } => {
                    let idx = keys.partition_point(|s| s.order_key(&key) != Ordering::Greater);
                    node = &children[idx];
                }
            }
        }
    }

    /// Rows with `lo <= key <= hi`.
    pub fn range_query(&self, lo: K, hi: K) -> Vec<u32> {
        self.collect_bounds(Bound::Included(lo), Bound::Included(hi))
    }

    pub fn greater_than(&self, key: K) -> Vec<u32> {
        self.collect_bounds(Bound::Excluded(key), Bound::Unbounded)
    }

    pub fn greater_than_or_equal(&self, key: K) -> Vec<u32> {
        self.collect_bounds(Bound::Included(key), Bound::Unbounded)
    }

    pub fn less_than(&self, key: K) -> Vec<u32> {
        self.collect_bounds(Bound::Unbounded, Bound::Excluded(key))
    }

    pub fn less_than_or_equal(&self, key: K) -> Vec<u32> {
        self.collect_bounds(Bound::Unbounded, Bound::Included(key))
    }

    pub fn all_rows(&self) -> Vec<u32> {
        self.collect_bounds(Bound::Unbounded, Bound::Unbounded)
    }

    pub fn collect_bounds(&self, lo: Bound<K>, hi: Bound<K>) -> Vec<u32> {
        let mut out = Vec::new();
        collect(&self.root, &lo, &hi, &mut out);
        out
    }
}

impl<K: IndexKey> Default for BTreeIndex<K> {
    fn default() -> Self {
        Self::new()
    }
}

fn insert_into<K: IndexKey>(
    node: &mut Node<K>,
    key: K,
    row: u32,
    order: usize,
    new_key: &mut bool,
) -> Insert<K> {
    match node {
        Node::Leaf(entries) => {
            match entries.binary_search_by(|e| e.key.order_key(&key)) {
                Ok(i) => {
                    let rows = &mut entries[i].rows;
                    if let Err(pos) = rows.binary_search(&row) {
                        rows.insert(pos, row);
                    }
                }
                Err(i) => {
                    *new_key = true;
                    entries.insert(
                        i,
                        Entry {
                            key,
                            rows: vec![row],
                        },
                    );
                }
            }
            if entries.len() <= order {
                return Insert::Done;
            }
            let right_entries = entries.split_off(entries.len() / 2);
            let sep = right_entries[0].key;
            Insert::Split {
                sep,
                right: Node::Leaf(right_entries),
            }
        }
        Node::Internal { keys, children } => {
            let idx = keys.partition_point(|s| s.order_key(&key) != Ordering::Greater);
            match insert_into(&mut children[idx], key, row, order, new_key) {
                Insert::Done => Insert::Done,
                Insert::Split { sep, right } => {
                    keys.insert(idx, sep);
                    children.insert(idx + 1, right);
                    if children.len() <= order {
                        return Insert::Done;
                    }
                    let mid = keys.len() / 2;
                    let up = keys[mid];
                    let right_keys = keys.split_off(mid + 1);
                    keys.pop();
                    let right_children = children.split_off(mid + 1);
                    Insert::Split {
                        sep: up,
                        right: Node::Internal {
                            keys: right_keys,
                            children: right_children,
                        },
                    }
                }
            }
        }
    }
}

fn below_hi<K: IndexKey>(key: &K, hi: &Bound<K>) -> bool {
    match hi {
        Bound::Unbounded => true,
        Bound::Included(h) => key.order_key(h) != Ordering::Greater,
        Bound::Excluded(h) => key.order_key(h) == Ordering::Less,
    }
}

fn above_lo<K: IndexKey>(key: &K, lo: &Bound<K>) -> bool {
    match lo {
        Bound::Unbounded => true,
        Bound::Included(l) => key.order_key(l) != Ordering::Less,
        Bound::Excluded(l) => key.order_key(l) == Ordering::Greater,
    }
}

fn collect<K: IndexKey>(node: &Node<K>, lo: &Bound<K>, hi: &Bound<K>, out: &mut Vec<u32>) {
    match node {
        Node::Leaf(entries) => {
            for e in entries {
                if above_lo(&e.key, lo) && below_hi(&e.key, hi) {
                    out.extend_from_slice(&e.rows);
                }
            }
        }
        Node::Internal { keys, children } => {
            // Child i holds keys in [keys[i-1], keys[i]).
            for (i, child) in children.iter().enumerate() {
                if i > 0 && !below_hi(&keys[i - 1], hi) {
                    // This child and everything after it sit past the
                    // upper bound.
                    break;
                }
                let entirely_below = i < keys.len()
                    && match lo {
                        Bound::Unbounded => false,
                        Bound::Included(l) | Bound::Excluded(l) => {
                            keys[i].order_key(l) != Ordering::Greater
                        }
                    };
                if entirely_below {
                    continue;
                }
                collect(child, lo, hi, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_and_range_queries() {
        let tree = BTreeIndex::from_keys(&[10i64, 20, 30, 40, 50]);
        assert_eq!(tree.query(30), vec![2]);
        assert!(tree.query(35).is_empty());
        assert_eq!(tree.range_query(20, 40), vec![1, 2, 3]);
        assert_eq!(tree.greater_than(30), vec![3, 4]);
        assert_eq!(tree.greater_than_or_equal(30), vec![2, 3, 4]);
        assert_eq!(tree.less_than(30), vec![0, 1]);
        assert_eq!(tree.less_than_or_equal(30), vec![0, 1, 2]);
        assert_eq!(tree.all_rows(), vec![0, 1, 2, 3, 4]);
        assert_eq!(tree.distinct_keys(), 5);
    }

    #[test]
    fn test_duplicate_keys_keep_insertion_order() {
        let mut tree = BTreeIndex::new();
        for (row, key) in [5i64, 3, 5, 5, 3].iter().enumerate() {
            tree.insert(*key, row as u32);
        }
        assert_eq!(tree.query(5), vec![0, 2, 3]);
        assert_eq!(tree.query(3), vec![1, 4]);
        assert_eq!(tree.all_rows(), vec![1, 4, 0, 2, 3]);
        assert_eq!(tree.distinct_keys(), 2);
    }

    #[test]
    fn test_duplicate_insert_is_idempotent() {
        let mut tree = BTreeIndex::new();
        tree.insert(7i64, 1);
        tree.insert(7, 1);
        assert_eq!(tree.query(7), vec![1]);
    }

    #[test]
    fn test_many_keys_force_splits() {
        let mut tree: BTreeIndex<i64> = BTreeIndex::with_order(4);
        let n = 1000i64;
        // Insert in a scrambled order to exercise splits on both flanks.
        for i in 0..n {
            let key = (i * 7) % n;
            tree.insert(key, key as u32);
        }
        assert_eq!(tree.distinct_keys(), n as usize);
        assert_eq!(tree.all_rows(), (0..n as u32).collect::<Vec<_>>());
        assert_eq!(tree.range_query(100, 105), vec![100, 101, 102, 103, 104, 105]);
        assert_eq!(tree.query(999), vec![999]);
        assert_eq!(tree.greater_than(997), vec![998, 999]);
    }

    #[test]
    fn test_float_keys() {
        let tree = BTreeIndex::from_keys(&[1.5f64, -0.5, 3.25, 1.5]);
        assert_eq!(tree.query(1.5), vec![0, 3]);
        assert_eq!(tree.range_query(0.0, 2.0), vec![0, 3]);
        assert_eq!(tree.less_than(1.5), vec![1]);
    }

    #[test]
    fn test_empty_tree() {
        let tree: BTreeIndex<i64> = BTreeIndex::new();
        assert!(tree.query(1).is_empty());
        assert!(tree.all_rows().is_empty());
        assert_eq!(tree.distinct_keys(), 0);
    }
}
