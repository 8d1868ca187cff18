//! Globally time-ordered replay across many per-symbol files.
//!
//! Initialization flattens every source's timestamp column into
//! `(timestamp, source ordinal, row)` triples, argsorts them ascending with
//! the stable tie-break (source, then intra-source row), and records the
//! positions where the timestamp strictly increases, which are the
//! snapshot boundaries. Sorting the flat triple vector beats a k-way min-heap at
//! thousands of sources (`log K` per element dominates there), so the heap
//! form only kicks in past `HEAP_MERGE_THRESHOLD` triples, where the sort's
//! single allocation is the larger cost; both produce identical output.
//! Sources are assumed internally time-sorted, which append-ordered tick
//! files are.

use crate::error::{NdtsError, Result};
use crate::pool::MmapPool;
use crate::schema::{ColumnType, Value};

pub const HEAP_MERGE_THRESHOLD: usize = 1 << 26;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub timestamp: i64,
    /// Ordinal into the source list the stream was built over.
    pub source: u32,
    pub row: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsofEntry {
    pub timestamp: i64,
    pub row: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub timestamp: i64,
    /// Per source, the most recent row at or before `timestamp`.
    pub latest: Vec<Option<AsofEntry>>,
}

pub struct MergeStream<'a> {
    pool: &'a MmapPool,
    sources: Vec<String>,
    ts_column: String,
    ts: Vec<&'a [i64]>,
    order: Vec<(i64, u32, u32)>,
    /// Indices into `order` where the timestamp strictly increases.
    snapshot_starts: Vec<usize>,
}

impl<'a> MergeStream<'a> {
    pub fn build(pool: &'a MmapPool, sources: &[&str], ts_column: &str) -> Result<MergeStream<'a>> {
        let mut ts = Vec::with_capacity(sources.len());
        for &name in sources {
            ts.push(pool.get_i64(name, ts_column)?);
        }
        let total: usize = ts.iter().map(|t| t.len()).sum();

        let order = if total > HEAP_MERGE_THRESHOLD {
            heap_merge(&ts)
        } else {
            let mut order = Vec::with_capacity(total);
            for (s, col) in ts.iter().enumerate() {
                for (r, &t) in col.iter().enumerate() {
                    order.push((t, s as u32, r as u32));
                }
            }
            // Tuple order is (timestamp, source, row): exactly the stable
            // tie-break, so an unstable sort is safe.
            order.sort_unstable();
            order
        };

        let mut snapshot_starts = Vec::new();
        for (i, entry) in order.iter().enumerate() {
            if i == 0 || entry.0 > order[i - 1].0 {
                snapshot_starts.push(i);
            }
        }

        Ok(MergeStream {
            pool,
            sources: sources.iter().map(|s| s.to_string()).collect(),
            ts_column: ts_column.to_string(),
            ts,
            order,
            snapshot_starts,
        })
    }

    /// Total ticks across all sources.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Unique timestamps, which is also the snapshot count.
    pub fn snapshot_count(&self) -> usize {
        self.snapshot_starts.len()
    }

    /// The full sequence in timestamp order, O(1) per element and
    /// restartable: each call walks the precomputed order from the top.
    pub fn replay_ticks(&self) -> impl Iterator<Item = Tick> + '_ {
        self.order.iter().map(|&(timestamp, source, row)| Tick {
            timestamp,
            source,
            row,
        })
    }

    /// One snapshot per unique timestamp: the per-source current rows after
    /// every tick at that timestamp has been applied.
    pub fn snapshots(&self) -> Snapshots<'_> {
        Snapshots {
            stream: self,
            boundary: 0,
            latest: vec![None; self.sources.len()],
        }
    }

    /// Per source, the row with the greatest timestamp `<= t`.
    ///
    /// Each source's rows form one time-sorted run, so this binary-searches
    /// each run directly instead of replaying pool state to a boundary;
    /// the result is the boundary state either way.
    pub fn asof_snapshot(&self, t: i64) -> Vec<Option<AsofEntry>> {
        self.ts
            .iter()
            .map(|col| {
                let pos = col.partition_point(|&x| x <= t);
                (pos > 0).then(|| AsofEntry {
                    timestamp: col[pos - 1],
                    row: pos as u32 - 1,
                })
            })
            .collect()
    }

    /// Materialize one column of the as-of snapshot: a value per source,
    /// zero where a source has no row at or before `t`.
    pub fn asof_column(&self, t: i64, column: &str) -> Result<Vec<Value>> {
        let entries = self.asof_snapshot(t);
        let mut out = Vec::with_capacity(self.sources.len());
        for (s, entry) in entries.iter().enumerate() {
            let name = &self.sources[s];
            let col = self.pool.column(name, column)?;
            out.push(match entry {
                Some(e) => col.value(e.row as usize),
                None => match col.col_type() {
                    ColumnType::F64 => Value::Float(0.0),
                    _ => Value::Int(0),
                },
            });
        }
        Ok(out)
    }

    /// Timestamps of one source, as loaded at build time.
    pub fn source_timestamps(&self, source: u32) -> Result<&'a [i64]> {
        self.ts
            .get(source as usize)
            .copied()
            .ok_or_else(|| NdtsError::range(format!("source ordinal {source} out of range")))
    }

    pub fn ts_column(&self) -> &str {
        &self.ts_column
    }

    pub fn source_name(&self, source: u32) -> Option<&str> {
        self.sources.get(source as usize).map(|s| s.as_str())
    }
}

pub struct Snapshots<'a> {
    stream: &'a MergeStream<'a>,
    boundary: usize,
    latest: Vec<Option<AsofEntry>>,
}

impl Iterator for Snapshots<'_> {
    type Item = Snapshot;

    fn next(&mut self) -> Option<Snapshot> {
        let starts = &self.stream.snapshot_starts;
        if self.boundary >= starts.len() {
            return None;
        }
        let start = starts[self.boundary];
        let end = starts
            .get(self.boundary + 1)
            .copied()
            .unwrap_or(self.stream.order.len());
        let timestamp = self.stream.order[start].0;
        for &(t, source, row) in &self.stream.order[start..end] {
            self.latest[source as usize] = Some(AsofEntry { timestamp: t, row });
        }
        self.boundary += 1;
        Some(Snapshot {
            timestamp,
            latest: self.latest.clone(),
        })
    }
}

/// K-way min-heap merge for very large inputs; assumes each source is
/// time-sorted and yields the same order as the sort.
fn heap_merge(ts: &[&[i64]]) -> Vec<(i64, u32, u32)> {
    use std::cmp::Reverse;
    use std::collections::BinaryHeap;

    let total: usize = ts.iter().map(|t| t.len()).sum();
    let mut out = Vec::with_capacity(total);
    let mut heap: BinaryHeap<Reverse<(i64, u32, u32)>> = ts
        .iter()
        .enumerate()
        .filter(|(_, col)| !col.is_empty())
        .map(|(s, col)| Reverse((col[0], s as u32, 0)))
        .collect();

    while let Some(Reverse((t, s, r))) = heap.pop() {
        out.push((t, s, r));
        let col = ts[s as usize];
        let next = r as usize + 1;
        if next < col.len() {
            heap.push(Reverse((col[next], s, next as u32)));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::append::{AppendFile, OpenOptions};
    use crate::schema::{ColumnDef, ColumnSlice, Schema};
    use tempfile::TempDir;

    fn write_source(dir: &std::path::Path, name: &str, ts: &[i64], px: &[f64]) {
        let schema = Schema::new(vec![
            ColumnDef::new("ts", ColumnType::I64),
            ColumnDef::new("px", ColumnType::F64),
        ]);
        let mut f = AppendFile::open(
            dir.join(format!("{name}.ndts")),
            &schema,
            &OpenOptions::default(),
        )
        .unwrap();
        f.append(&[ColumnSlice::I64(ts), ColumnSlice::F64(px)])
            .unwrap();
    }

    /// Sources A, B, C with 100 rows each at timestamps s + 3i.
    fn interleaved_pool(dir: &std::path::Path) -> MmapPool {
        for (s, name) in ["a", "b", "c"].iter().enumerate() {
            let ts: Vec<i64> = (0..100).map(|i| s as i64 + 3 * i).collect();
            let px: Vec<f64> = ts.iter().map(|&t| 100.0 + t as f64).collect();
            write_source(dir, name, &ts, &px);
        }
        MmapPool::init(dir, &["a", "b", "c"]).unwrap()
    }

    #[test]
    fn test_replay_ticks_interleaves_three_sources() {
        let dir = TempDir::new().unwrap();
        let pool = interleaved_pool(dir.path());
        let merge = MergeStream::build(&pool, &["a", "b", "c"], "ts").unwrap();

        assert_eq!(merge.len(), 300);
        let ticks: Vec<Tick> = merge.replay_ticks().collect();
        assert_eq!(ticks.len(), 300);
        let first_ts: Vec<i64> = ticks.iter().take(10).map(|t| t.timestamp).collect();
        assert_eq!(first_ts, vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
        for pair in ticks.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }

        // Restartable: a second pass sees the same sequence.
        assert_eq!(merge.replay_ticks().count(), 300);
    }

    #[test]
    fn test_asof_snapshot_at_50() {
        let dir = TempDir::new().unwrap();
        let pool = interleaved_pool(dir.path());
        let merge = MergeStream::build(&pool, &["a", "b", "c"], "ts").unwrap();

        let snap = merge.asof_snapshot(50);
        assert_eq!(snap.len(), 3);
        for (s, entry) in snap.iter().enumerate() {
            let entry = entry.unwrap();
            assert!(entry.timestamp <= 50);
            assert!(50 - entry.timestamp < 3, "source {s} too stale");
        }
        // Source A ticks at 0,3,..: greatest <= 50 is 48.
        assert_eq!(snap[0].unwrap().timestamp, 48);
        assert_eq!(snap[1].unwrap().timestamp, 49);
        assert_eq!(snap[2].unwrap().timestamp, 50);
    }

    #[test]
    fn test_asof_before_first_and_after_last() {
        let dir = TempDir::new().unwrap();
        let pool = interleaved_pool(dir.path());
        let merge = MergeStream::build(&pool, &["a", "b", "c"], "ts").unwrap();

        assert_eq!(merge.asof_snapshot(-1), vec![None, None, None]);
        let snap = merge.asof_snapshot(10_000);
        assert_eq!(snap[2].unwrap().timestamp, 2 + 3 * 99);

        // Materialized with zero fill for unseen sources.
        let px = merge.asof_column(0, "px").unwrap();
        assert_eq!(px, vec![Value::Float(100.0), Value::Float(0.0), Value::Float(0.0)]);
    }

    #[test]
    fn test_ties_break_by_source_then_row() {
        let dir = TempDir::new().unwrap();
        write_source(dir.path(), "x", &[5, 5, 7], &[1.0, 2.0, 3.0]);
        write_source(dir.path(), "y", &[5, 7], &[4.0, 5.0]);
        let pool = MmapPool::init(dir.path(), &["x", "y"]).unwrap();
        let merge = MergeStream::build(&pool, &["x", "y"], "ts").unwrap();

        let ticks: Vec<(i64, u32, u32)> = merge
            .replay_ticks()
            .map(|t| (t.timestamp, t.source, t.row))
            .collect();
        assert_eq!(
            ticks,
            vec![(5, 0, 0), (5, 0, 1), (5, 1, 0), (7, 0, 2), (7, 1, 1)]
        );
    }

    #[test]
    fn test_snapshots_one_per_unique_timestamp() {
        let dir = TempDir::new().unwrap();
        write_source(dir.path(), "x", &[5, 5, 7], &[1.0, 2.0, 3.0]);
        write_source(dir.path(), "y", &[5, 9], &[4.0, 5.0]);
        let pool = MmapPool::init(dir.path(), &["x", "y"]).unwrap();
        let merge = MergeStream::build(&pool, &["x", "y"], "ts").unwrap();

        let snaps: Vec<Snapshot> = merge.snapshots().collect();
        assert_eq!(merge.snapshot_count(), 3);
        assert_eq!(snaps.len(), 3);

        assert_eq!(snaps[0].timestamp, 5);
        // Both ticks at 5 applied: x's latest is its second row.
        assert_eq!(snaps[0].latest[0], Some(AsofEntry { timestamp: 5, row: 1 }));
        assert_eq!(snaps[0].latest[1], Some(AsofEntry { timestamp: 5, row: 0 }));

        assert_eq!(snaps[1].timestamp, 7);
        assert_eq!(snaps[1].latest[0], Some(AsofEntry { timestamp: 7, row: 2 }));
        assert_eq!(snaps[1].latest[1], Some(AsofEntry { timestamp: 5, row: 0 }));

        assert_eq!(snaps[2].timestamp, 9);
        assert_eq!(snaps[2].latest[1], Some(AsofEntry { timestamp: 9, row: 1 }));
    }

    #[test]
    fn test_heap_merge_matches_sort() {
        let ts: Vec<Vec<i64>> = vec![
            (0..50).map(|i| 3 * i).collect(),
            (0..50).map(|i| 1 + 3 * i).collect(),
            vec![],
            (0..10).map(|i| 2 + 30 * i).collect(),
        ];
        let views: Vec<&[i64]> = ts.iter().map(|v| v.as_slice()).collect();

        let merged = heap_merge(&views);
        let mut sorted = Vec::new();
        for (s, col) in views.iter().enumerate() {
            for (r, &t) in col.iter().enumerate() {
                sorted.push((t, s as u32, r as u32));
            }
        }
        sorted.sort_unstable();
        assert_eq!(merged, sorted);
    }

    #[test]
    fn test_empty_sources() {
        let dir = TempDir::new().unwrap();
        let schema = Schema::new(vec![
            ColumnDef::new("ts", ColumnType::I64),
            ColumnDef::new("px", ColumnType::F64),
        ]);
        drop(AppendFile::open(dir.path().join("e.ndts"), &schema, &OpenOptions::default()).unwrap());
        let pool = MmapPool::init(dir.path(), &["e"]).unwrap();
        let merge = MergeStream::build(&pool, &["e"], "ts").unwrap();
        assert!(merge.is_empty());
        assert_eq!(merge.snapshot_count(), 0);
        assert!(merge.snapshots().next().is_none());
        assert_eq!(merge.asof_snapshot(100), vec![None]);
    }
}
