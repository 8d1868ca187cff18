//! Store facade over the dictionary, partitioned tables and kernels.
//!
//! A store root holds `symbols.json` plus one hash-partitioned table per
//! bar interval, partitioned on the symbol-id column so a symbol's history
//! stays in one bucket file. Writers resolve symbol strings to ids here;
//! readers get partition-pruned range scans, latest-row lookups, bucketed
//! aggregates, and the file set for a merge-stream replay.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndts_core::ohlcv::{self, OhlcvBar};

use crate::clock::{Clock, SystemClock};
use crate::error::{NdtsError, Result};
use crate::pool::MmapPool;
use crate::schema::{ColumnSlice, ColumnType, ColumnVec, Schema, Value};
use crate::symbols::SymbolDict;
use crate::table::{Filter, FilterOp, PartitionHint, PartitionSpec, PartitionedTable};

pub const SYMBOLS_FILE: &str = "symbols.json";

#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Hash buckets per interval table; fixed once an interval has data.
    pub buckets: u32,
    pub ts_column: String,
    pub symbol_column: String,
}

impl Default for StoreOptions {
    fn default() -> Self {
        StoreOptions {
            buckets: 256,
            ts_column: "ts".into(),
            symbol_column: "sym".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RangeQuery<'a> {
    pub symbol: &'a str,
    pub interval: &'a str,
    pub start_ts: i64,
    pub end_ts: i64,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleAgg {
    First,
    Last,
    Min,
    Max,
    Sum,
    Mean,
}

pub struct Store {
    root: PathBuf,
    schema: Schema,
    opts: StoreOptions,
    symbols: SymbolDict,
    clock: Arc<dyn Clock>,
    tables: BTreeMap<String, PartitionedTable>,
}

impl Store {
    /// Open or create a store. The schema must carry the timestamp and
    /// symbol-id columns named in the options, both int64.
    pub fn open(root: impl AsRef<Path>, schema: &Schema, opts: StoreOptions) -> Result<Store> {
        for required in [&opts.ts_column, &opts.symbol_column] {
            match schema.column(required) {
                Some(def) if def.col_type == ColumnType::I64 => {}
                Some(def) => {
                    return Err(NdtsError::schema(format!(
                        "column {required} must be int64, found {}",
                        def.col_type.as_str()
                    )));
                }
                None => {
                    return Err(NdtsError::schema(format!(
                        "schema is missing the {required} column"
                    )));
                }
            }
        }

        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| NdtsError::io(&root, e))?;
        let symbols = SymbolDict::open(root.join(SYMBOLS_FILE))?;

        let mut store = Store {
            root: root.clone(),
            schema: schema.clone(),
            opts,
            symbols,
            clock: Arc::new(SystemClock::new()),
            tables: BTreeMap::new(),
        };
        for entry in fs::read_dir(&root).map_err(|e| NdtsError::io(&root, e))? {
            let entry = entry.map_err(|e| NdtsError::io(&root, e))?;
            let path = entry.path();
            if path.is_dir() && path.join(crate::table::MANIFEST_FILE).exists() {
                let interval = entry.file_name().to_string_lossy().to_string();
                store.interval_table(&interval)?;
            }
        }
        Ok(store)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn symbols(&self) -> &SymbolDict {
        &self.symbols
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn intervals(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    // --- Writes ---

    /// Insert a batch. `values` are the schema's columns in order, minus
    /// the timestamp and symbol columns, which come from `timestamps` and
    /// the resolved `symbols`.
    pub fn insert(
        &mut self,
        interval: &str,
        symbols: &[&str],
        timestamps: &[i64],
        values: &[ColumnSlice<'_>],
    ) -> Result<()> {
        let cols = self.assemble_batch(symbols, timestamps, values)?;
        let slices: Vec<ColumnSlice<'_>> = cols.iter().map(|c| c.as_slice()).collect();
        self.interval_table(interval)?;
        self.tables
            .get_mut(interval)
            .expect("just opened")
            .append(&slices)
    }

    /// Insert, replacing any existing row that shares a `(symbol,
    /// timestamp)` key. Overlapping partitions are merged row-wise, sorted
    /// by `(timestamp, symbol)` and rewritten; non-overlapping input
    /// degenerates to a plain append.
    pub fn upsert_by_timestamp(
        &mut self,
        interval: &str,
        symbols: &[&str],
        timestamps: &[i64],
        values: &[ColumnSlice<'_>],
    ) -> Result<()> {
        let cols = self.assemble_batch(symbols, timestamps, values)?;
        let rows = cols[0].len();
        if rows == 0 {
            return Ok(());
        }
        let ts_col = self.schema.column_index(&self.opts.ts_column).expect("validated");
        let sym_col = self
            .schema
            .column_index(&self.opts.symbol_column)
            .expect("validated");

        self.interval_table(interval)?;
        let table = self.tables.get_mut(interval).expect("just opened");

        // Route incoming rows to their partitions first.
        let mut groups: BTreeMap<String, Vec<u32>> = BTreeMap::new();
        for i in 0..rows {
            let name = table.partition_name_for(cols[sym_col].value(i))?;
            groups.entry(name).or_default().push(i as u32);
        }

        for (name, idx) in groups {
            let incoming: Vec<ColumnVec> =
                cols.iter().map(|c| c.as_slice().gather(&idx)).collect();

            let existing = if table.partition_names().contains(&name) {
                table.read_partition(&name)?
            } else {
                Vec::new()
            };
            let existing_rows = existing.first().map_or(0, |c| c.len());

            let mut merged: Vec<Vec<Value>> = (0..existing_rows)
                .map(|r| existing.iter().map(|c| c.value(r)).collect())
                .collect();
            let mut by_key: HashMap<(i64, i64), usize> = merged
                .iter()
                .enumerate()
                .map(|(r, row)| (row_key(row, ts_col, sym_col), r))
                .collect();

            let mut overlapped = false;
            for r in 0..incoming[0].len() {
                let row: Vec<Value> = incoming.iter().map(|c| c.value(r)).collect();
                match by_key.get(&row_key(&row, ts_col, sym_col)) {
                    Some(&slot) => {
                        merged[slot] = row;
                        overlapped = true;
                    }
                    None => {
                        by_key.insert(row_key(&row, ts_col, sym_col), merged.len());
                        merged.push(row);
                    }
                }
            }

            if !overlapped && existing_rows > 0 {
                // No key collisions: a plain append keeps the partition's
                // chunks intact.
                let slices: Vec<ColumnSlice<'_>> =
                    incoming.iter().map(|c| c.as_slice()).collect();
                table.append(&slices)?;
                continue;
            }

            merged.sort_by_key(|row| row_key(row, ts_col, sym_col));
            let mut out: Vec<ColumnVec> = self
                .schema
                .columns
                .iter()
                .map(|d| ColumnVec::with_capacity(d.col_type, merged.len()))
                .collect();
            for row in &merged {
                for (col, value) in out.iter_mut().zip(row) {
                    col.push_value(*value)?;
                }
            }
            let slices: Vec<ColumnSlice<'_>> = out.iter().map(|c| c.as_slice()).collect();
            table.replace_partition(&name, &slices)?;
        }
        Ok(())
    }

    // --- Reads ---

    /// Rows for one symbol within `[start_ts, end_ts]`, in schema column
    /// order, at most `limit` rows. An unknown symbol yields empty columns.
    pub fn query_range(&mut self, q: &RangeQuery<'_>) -> Result<Vec<ColumnVec>> {
        let empty: Vec<ColumnVec> = self
            .schema
            .columns
            .iter()
            .map(|d| ColumnVec::with_capacity(d.col_type, 0))
            .collect();
        let Some(sym_id) = self.symbols.id(q.symbol) else {
            return Ok(empty);
        };
        if !self.tables.contains_key(q.interval) {
            return Ok(empty);
        }

        let filters = [
            Filter::new(
                self.opts.symbol_column.clone(),
                FilterOp::Eq,
                Value::Int(sym_id as i64),
            ),
            Filter::new(
                self.opts.ts_column.clone(),
                FilterOp::Ge,
                Value::Int(q.start_ts),
            ),
            Filter::new(
                self.opts.ts_column.clone(),
                FilterOp::Le,
                Value::Int(q.end_ts),
            ),
        ];
        let hint = PartitionHint::Key(Value::Int(sym_id as i64));
        let table = self.tables.get_mut(q.interval).expect("checked above");
        let mut cols = table.scan(&filters, Some(&hint))?;
        if let Some(limit) = q.limit {
            for col in &mut cols {
                col.truncate(limit);
            }
        }
        Ok(cols)
    }

    /// The row with the greatest timestamp for one symbol, if any.
    pub fn latest_row(&mut self, symbol: &str, interval: &str) -> Result<Option<Vec<Value>>> {
        let cols = self.query_range(&RangeQuery {
            symbol,
            interval,
            start_ts: i64::MIN,
            end_ts: i64::MAX,
            limit: None,
        })?;
        let rows = cols.first().map_or(0, |c| c.len());
        if rows == 0 {
            return Ok(None);
        }
        let ts_col = self.schema.column_index(&self.opts.ts_column).expect("validated");
        let ts = cols[ts_col].as_i64().expect("validated int64 column");
        let mut best = 0;
        for i in 1..rows {
            if ts[i] >= ts[best] {
                best = i;
            }
        }
        Ok(Some(cols.iter().map(|c| c.value(best)).collect()))
    }

    /// Bucketed aggregates over one symbol's range, one output column per
    /// `(column, agg)` pair. Returns the bucket start timestamps and the
    /// aggregated values per pair.
    pub fn sample_by(
        &mut self,
        symbol: &str,
        interval: &str,
        bucket: i64,
        aggs: &[(&str, SampleAgg)],
    ) -> Result<(Vec<i64>, Vec<Vec<f64>>)> {
        if bucket <= 0 {
            return Err(NdtsError::range("bucket width must be positive"));
        }
        let (ts, columns) = self.sorted_symbol_rows(symbol, interval, aggs.iter().map(|(c, _)| *c))?;

        let mut starts: Vec<i64> = Vec::new();
        let mut out: Vec<Vec<f64>> = vec![Vec::new(); aggs.len()];
        let mut bucket_rows: Vec<usize> = Vec::new();
        for i in 0..=ts.len() {
            let boundary = i == ts.len()
                || (!bucket_rows.is_empty()
                    && ts[i].div_euclid(bucket) != ts[bucket_rows[0]].div_euclid(bucket));
            if boundary && !bucket_rows.is_empty() {
                starts.push(ts[bucket_rows[0]].div_euclid(bucket) * bucket);
                for (slot, (_, agg)) in aggs.iter().enumerate() {
                    out[slot].push(fold_bucket(&columns[slot], &bucket_rows, *agg));
                }
                bucket_rows.clear();
            }
            if i < ts.len() {
                bucket_rows.push(i);
            }
        }
        Ok((starts, out))
    }

    /// OHLCV bars for one symbol via the bucketing kernel.
    pub fn sample_ohlcv(
        &mut self,
        symbol: &str,
        interval: &str,
        bucket: i64,
        price_column: &str,
        volume_column: &str,
    ) -> Result<Vec<OhlcvBar>> {
        let (ts, columns) =
            self.sorted_symbol_rows(symbol, interval, [price_column, volume_column].into_iter())?;
        Ok(ohlcv::bucket_ohlcv(&ts, &columns[0], &columns[1], bucket))
    }

    /// Open the partition files backing `symbols` (or every partition when
    /// empty) read-only in an mmap pool, for a `MergeStream` replay. The
    /// returned names are the pool keys, in order.
    pub fn open_replay_pool(
        &mut self,
        interval: &str,
        symbols: &[&str],
    ) -> Result<(MmapPool, Vec<String>)> {
        if !self.tables.contains_key(interval) {
            return Err(NdtsError::range(format!("no data for interval {interval}")));
        }
        let table = &self.tables[interval];

        let names: Vec<String> = if symbols.is_empty() {
            table.partition_names()
        } else {
            let mut set = BTreeSet::new();
            for &symbol in symbols {
                if let Some(id) = self.symbols.id(symbol) {
                    let name = table.partition_name_for(Value::Int(id as i64))?;
                    if table.partition_names().contains(&name) {
                        set.insert(name);
                    }
                }
            }
            set.into_iter().collect()
        };

        let mut pool = MmapPool::new();
        for name in &names {
            pool.open_file(name, &table.partition_data_path(name))?;
        }
        Ok((pool, names))
    }

    // --- Internals ---

    fn interval_table(&mut self, interval: &str) -> Result<()> {
        if self.tables.contains_key(interval) {
            return Ok(());
        }
        if interval.is_empty()
            || !interval
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(NdtsError::range(format!("invalid interval name {interval}")));
        }
        let spec = PartitionSpec::Hash {
            column: self.opts.symbol_column.clone(),
            buckets: self.opts.buckets,
        };
        let table = PartitionedTable::open_or_create(self.root.join(interval), &self.schema, spec)?
            .with_clock(self.clock.clone());
        self.tables.insert(interval.to_string(), table);
        Ok(())
    }

    fn assemble_batch(
        &mut self,
        symbols: &[&str],
        timestamps: &[i64],
        values: &[ColumnSlice<'_>],
    ) -> Result<Vec<ColumnVec>> {
        if symbols.len() != timestamps.len() {
            return Err(NdtsError::schema(format!(
                "{} symbols for {} timestamps",
                symbols.len(),
                timestamps.len()
            )));
        }
        if values.len() + 2 != self.schema.len() {
            return Err(NdtsError::schema(format!(
                "batch has {} value columns, schema needs {}",
                values.len(),
                self.schema.len() - 2
            )));
        }

        let ids: Vec<i64> = symbols
            .iter()
            .map(|s| self.symbols.get_or_create_id(s).map(|id| id as i64))
            .collect::<Result<_>>()?;

        let mut value_iter = values.iter();
        let mut cols = Vec::with_capacity(self.schema.len());
        for def in &self.schema.columns {
            if def.name == self.opts.ts_column {
                cols.push(ColumnVec::I64(timestamps.to_vec()));
            } else if def.name == self.opts.symbol_column {
                cols.push(ColumnVec::I64(ids.clone()));
            } else {
                let col = value_iter
                    .next()
                    .ok_or_else(|| NdtsError::schema("value columns exhausted"))?;
                if col.len() != timestamps.len() {
                    return Err(NdtsError::schema(format!(
                        "column {} has {} rows, expected {}",
                        def.name,
                        col.len(),
                        timestamps.len()
                    )));
                }
                cols.push(col.to_owned_vec());
            }
        }
        Ok(cols)
    }

    /// One symbol's full history with the named columns as lossy f64,
    /// sorted by timestamp.
    fn sorted_symbol_rows<'c>(
        &mut self,
        symbol: &str,
        interval: &str,
        columns: impl Iterator<Item = &'c str>,
    ) -> Result<(Vec<i64>, Vec<Vec<f64>>)> {
        let wanted: Vec<String> = columns.map(|c| c.to_string()).collect();
        for name in &wanted {
            if self.schema.column_index(name).is_none() {
                return Err(NdtsError::range(format!("unknown column {name}")));
            }
        }
        let cols = self.query_range(&RangeQuery {
            symbol,
            interval,
            start_ts: i64::MIN,
            end_ts: i64::MAX,
            limit: None,
        })?;
        let ts_col = self.schema.column_index(&self.opts.ts_column).expect("validated");
        let raw_ts = cols[ts_col].as_i64().expect("validated int64 column");

        let mut order: Vec<u32> = (0..raw_ts.len() as u32).collect();
        order.sort_by_key(|&i| raw_ts[i as usize]);

        let ts: Vec<i64> = order.iter().map(|&i| raw_ts[i as usize]).collect();
        let picked: Vec<Vec<f64>> = wanted
            .iter()
            .map(|name| {
                let ci = self.schema.column_index(name).expect("checked above");
                order
                    .iter()
                    .map(|&i| cols[ci].value(i as usize).as_f64_lossy())
                    .collect()
            })
            .collect();
        Ok((ts, picked))
    }
}

fn row_key(row: &[Value], ts_col: usize, sym_col: usize) -> (i64, i64) {
    let ts = match row[ts_col] {
        Value::Int(v) => v,
        Value::Float(f) => f as i64,
    };
    let sym = match row[sym_col] {
        Value::Int(v) => v,
        Value::Float(f) => f as i64,
    };
    (ts, sym)
}

fn fold_bucket(values: &[f64], rows: &[usize], agg: SampleAgg) -> f64 {
    let picked = rows.iter().map(|&r| values[r]);
    match agg {
        SampleAgg::First => values[rows[0]],
        SampleAgg::Last => values[rows[rows.len() - 1]],
        SampleAgg::Min => picked.fold(f64::INFINITY, f64::min),
        SampleAgg::Max => picked.fold(f64::NEG_INFINITY, f64::max),
        SampleAgg::Sum => picked.sum(),
        SampleAgg::Mean => {
            let sum: f64 = picked.sum();
            sum / rows.len() as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::MergeStream;
    use crate::schema::ColumnDef;
    use tempfile::TempDir;

    fn bar_schema() -> Schema {
        Schema::new(vec![
            ColumnDef::new("ts", ColumnType::I64),
            ColumnDef::new("sym", ColumnType::I64),
            ColumnDef::new("px", ColumnType::F64),
            ColumnDef::new("vol", ColumnType::F64),
        ])
    }

    fn open_store(dir: &Path) -> Store {
        Store::open(dir, &bar_schema(), StoreOptions::default()).unwrap()
    }

    #[test]
    fn test_insert_query_range_latest() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(dir.path());

        store
            .insert(
                "1m",
                &["BTCUSD", "ETHUSD", "BTCUSD"],
                &[60_000_000, 60_000_000, 120_000_000],
                &[
                    ColumnSlice::F64(&[42_000.0, 2_500.0, 42_100.0]),
                    ColumnSlice::F64(&[1.5, 10.0, 2.0]),
                ],
            )
            .unwrap();

        let cols = store
            .query_range(&RangeQuery {
                symbol: "BTCUSD",
                interval: "1m",
                start_ts: 0,
                end_ts: i64::MAX,
                limit: None,
            })
            .unwrap();
        assert_eq!(cols[0].as_i64().unwrap(), &[60_000_000, 120_000_000]);
        assert_eq!(cols[2].as_f64().unwrap(), &[42_000.0, 42_100.0]);

        // Range bounds and limit apply.
        let cols = store
            .query_range(&RangeQuery {
                symbol: "BTCUSD",
                interval: "1m",
                start_ts: 0,
                end_ts: 60_000_000,
                limit: Some(10),
            })
            .unwrap();
        assert_eq!(cols[0].len(), 1);

        let latest = store.latest_row("BTCUSD", "1m").unwrap().unwrap();
        assert_eq!(latest[0], Value::Int(120_000_000));
        assert_eq!(latest[2], Value::Float(42_100.0));

        assert!(store.latest_row("DOGEUSD", "1m").unwrap().is_none());
        assert_eq!(store.symbols().len(), 2);
    }

    #[test]
    fn test_upsert_replaces_overlapping_keys() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(dir.path());

        store
            .insert(
                "1m",
                &["AAPL", "AAPL"],
                &[1_000, 2_000],
                &[
                    ColumnSlice::F64(&[10.0, 20.0]),
                    ColumnSlice::F64(&[1.0, 1.0]),
                ],
            )
            .unwrap();

        // Overwrite the bar at ts 2000 and add one at 3000.
        store
            .upsert_by_timestamp(
                "1m",
                &["AAPL", "AAPL"],
                &[2_000, 3_000],
                &[
                    ColumnSlice::F64(&[21.0, 30.0]),
                    ColumnSlice::F64(&[2.0, 3.0]),
                ],
            )
            .unwrap();

        let cols = store
            .query_range(&RangeQuery {
                symbol: "AAPL",
                interval: "1m",
                start_ts: 0,
                end_ts: i64::MAX,
                limit: None,
            })
            .unwrap();
        assert_eq!(cols[0].as_i64().unwrap(), &[1_000, 2_000, 3_000]);
        assert_eq!(cols[2].as_f64().unwrap(), &[10.0, 21.0, 30.0]);
        assert_eq!(cols[3].as_f64().unwrap(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_upsert_without_overlap_appends() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(dir.path());
        store
            .insert(
                "1m",
                &["AAPL"],
                &[1_000],
                &[ColumnSlice::F64(&[10.0]), ColumnSlice::F64(&[1.0])],
            )
            .unwrap();
        store
            .upsert_by_timestamp(
                "1m",
                &["AAPL"],
                &[5_000],
                &[ColumnSlice::F64(&[50.0]), ColumnSlice::F64(&[5.0])],
            )
            .unwrap();

        let cols = store
            .query_range(&RangeQuery {
                symbol: "AAPL",
                interval: "1m",
                start_ts: 0,
                end_ts: i64::MAX,
                limit: None,
            })
            .unwrap();
        assert_eq!(cols[0].as_i64().unwrap(), &[1_000, 5_000]);
    }

    #[test]
    fn test_sample_ohlcv_and_aggs() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(dir.path());
        store
            .insert(
                "tick",
                &["X"; 5],
                &[0, 5, 9, 10, 19],
                &[
                    ColumnSlice::F64(&[10.0, 12.0, 8.0, 20.0, 21.0]),
                    ColumnSlice::F64(&[1.0, 2.0, 3.0, 4.0, 5.0]),
                ],
            )
            .unwrap();

        let bars = store.sample_ohlcv("X", "tick", 10, "px", "vol").unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].open, 10.0);
        assert_eq!(bars[0].high, 12.0);
        assert_eq!(bars[0].low, 8.0);
        assert_eq!(bars[0].close, 8.0);
        assert_eq!(bars[0].volume, 6.0);

        let (starts, out) = store
            .sample_by(
                "X",
                "tick",
                10,
                &[("px", SampleAgg::Mean), ("vol", SampleAgg::Sum)],
            )
            .unwrap();
        assert_eq!(starts, vec![0, 10]);
        assert_eq!(out[0], vec![10.0, 20.5]);
        assert_eq!(out[1], vec![6.0, 9.0]);
    }

    #[test]
    fn test_replay_pool_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(dir.path());
        store
            .insert(
                "tick",
                &["A", "B", "A", "B"],
                &[0, 1, 2, 3],
                &[
                    ColumnSlice::F64(&[1.0, 2.0, 3.0, 4.0]),
                    ColumnSlice::F64(&[1.0, 1.0, 1.0, 1.0]),
                ],
            )
            .unwrap();

        let (pool, names) = store.open_replay_pool("tick", &["A", "B"]).unwrap();
        assert!(!names.is_empty());
        let name_refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
        let merge = MergeStream::build(&pool, &name_refs, "ts").unwrap();
        assert_eq!(merge.len(), 4);
        let ts: Vec<i64> = merge.replay_ticks().map(|t| t.timestamp).collect();
        assert_eq!(ts, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_unknown_symbol_and_persistence() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = open_store(dir.path());
            store
                .insert(
                    "1m",
                    &["Z"],
                    &[7],
                    &[ColumnSlice::F64(&[1.0]), ColumnSlice::F64(&[2.0])],
                )
                .unwrap();
        }

        let mut store = open_store(dir.path());
        assert_eq!(store.intervals(), vec!["1m"]);
        let cols = store
            .query_range(&RangeQuery {
                symbol: "Z",
                interval: "1m",
                start_ts: 0,
                end_ts: 10,
                limit: None,
            })
            .unwrap();
        assert_eq!(cols[0].len(), 1);

        let cols = store
            .query_range(&RangeQuery {
                symbol: "NOPE",
                interval: "1m",
                start_ts: 0,
                end_ts: 10,
                limit: None,
            })
            .unwrap();
        assert!(cols[0].is_empty());
    }

    #[test]
    fn test_schema_requires_ts_and_sym() {
        let dir = TempDir::new().unwrap();
        let bad = Schema::new(vec![ColumnDef::new("px", ColumnType::F64)]);
        assert!(matches!(
            Store::open(dir.path(), &bad, StoreOptions::default()),
            Err(NdtsError::Schema(_))
        ));
    }
}
