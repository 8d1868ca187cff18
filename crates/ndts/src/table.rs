//! Logical table fanned out over per-partition append files.
//!
//! A table directory holds `table.json` (schema plus partition spec) and
//! one subdirectory per partition with `data.ndts` and `meta.json`. Rows
//! route by a pure function of the partition column: a seeded xxhash modulo
//! the bucket count, or the UTC calendar bucket of a microsecond timestamp.
//! Scans prune partitions from the hint before touching any file.

use std::collections::BTreeMap;
use std::fs;
use std::hash::Hasher as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::trace;
use twox_hash::XxHash64;

use crate::append::{AppendFile, OpenOptions};
use crate::clock::{Clock, SystemClock};
use crate::error::{NdtsError, Result};
use crate::schema::{ColumnSlice, ColumnType, ColumnVec, Schema, Value};

pub const MANIFEST_FILE: &str = "table.json";
pub const DATA_FILE: &str = "data.ndts";
pub const META_FILE: &str = "meta.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hour,
    Day,
    Month,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PartitionSpec {
    Hash { column: String, buckets: u32 },
    Time { column: String, granularity: Granularity },
}

impl PartitionSpec {
    pub fn column(&self) -> &str {
        match self {
            PartitionSpec::Hash { column, .. } | PartitionSpec::Time { column, .. } => column,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionMeta {
    pub rows: u64,
    #[serde(rename = "minKey")]
    pub min_key: Value,
    #[serde(rename = "maxKey")]
    pub max_key: Value,
    #[serde(rename = "updatedAt")]
    pub updated_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TableManifest {
    columns: Schema,
    partition: PartitionSpec,
}

/// Restricts a scan to partitions that can hold matching rows.
#[derive(Debug, Clone)]
pub enum PartitionHint {
    /// A concrete partition-column value (hash tables).
    Key(Value),
    /// Inclusive key interval (time tables), in epoch microseconds.
    TimeRange { min: i64, max: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn new(column: impl Into<String>, op: FilterOp, value: Value) -> Self {
        Filter {
            column: column.into(),
            op,
            value,
        }
    }

    fn matches(&self, cell: Value) -> bool {
        use std::cmp::Ordering::*;
        match cell.compare(&self.value) {
            None => false,
            Some(ord) => match self.op {
                FilterOp::Eq => ord == Equal,
                FilterOp::Lt => ord == Less,
                FilterOp::Le => ord != Greater,
                FilterOp::Gt => ord == Greater,
                FilterOp::Ge => ord != Less,
            },
        }
    }
}

struct Partition {
    file: AppendFile,
    meta: PartitionMeta,
}

pub struct PartitionedTable {
    dir: PathBuf,
    schema: Schema,
    spec: PartitionSpec,
    key_col: usize,
    clock: Arc<dyn Clock>,
    partitions: BTreeMap<String, Partition>,
}

impl PartitionedTable {
    pub fn create(
        dir: impl AsRef<Path>,
        schema: &Schema,
        spec: PartitionSpec,
    ) -> Result<PartitionedTable> {
        let dir = dir.as_ref().to_path_buf();
        validate_spec(schema, &spec)?;
        let manifest_path = dir.join(MANIFEST_FILE);
        if manifest_path.exists() {
            return Err(NdtsError::state(format!(
                "{} already holds a table",
                dir.display()
            )));
        }
        fs::create_dir_all(&dir).map_err(|e| NdtsError::io(&dir, e))?;
        let manifest = TableManifest {
            columns: schema.clone(),
            partition: spec.clone(),
        };
        let json = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| NdtsError::state(format!("manifest serialization failed: {e}")))?;
        fs::write(&manifest_path, json).map_err(|e| NdtsError::io(&manifest_path, e))?;

        let key_col = schema
            .column_index(spec.column())
            .expect("validated partition column");
        Ok(PartitionedTable {
            dir,
            schema: schema.clone(),
            spec,
            key_col,
            clock: Arc::new(SystemClock::new()),
            partitions: BTreeMap::new(),
        })
    }

    pub fn open(dir: impl AsRef<Path>) -> Result<PartitionedTable> {
        let dir = dir.as_ref().to_path_buf();
        let manifest_path = dir.join(MANIFEST_FILE);
        let bytes = fs::read(&manifest_path).map_err(|e| NdtsError::io(&manifest_path, e))?;
        let manifest: TableManifest = serde_json::from_slice(&bytes).map_err(|e| {
            NdtsError::corruption(
                &manifest_path,
                0,
                bytes.len() as u64,
                format!("bad manifest: {e}"),
            )
        })?;
        validate_spec(&manifest.columns, &manifest.partition)?;
        let key_col = manifest
            .columns
            .column_index(manifest.partition.column())
            .expect("validated partition column");

        let mut table = PartitionedTable {
            dir: dir.clone(),
            schema: manifest.columns,
            spec: manifest.partition,
            key_col,
            clock: Arc::new(SystemClock::new()),
            partitions: BTreeMap::new(),
        };

        for entry in fs::read_dir(&dir).map_err(|e| NdtsError::io(&dir, e))? {
            let entry = entry.map_err(|e| NdtsError::io(&dir, e))?;
            let path = entry.path();
            if !path.is_dir() || !path.join(DATA_FILE).exists() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            table.load_partition(&name)?;
        }
        Ok(table)
    }

    pub fn open_or_create(
        dir: impl AsRef<Path>,
        schema: &Schema,
        spec: PartitionSpec,
    ) -> Result<PartitionedTable> {
        let dir = dir.as_ref();
        if dir.join(MANIFEST_FILE).exists() {
            let table = Self::open(dir)?;
            if table.schema != *schema || table.spec != spec {
                return Err(NdtsError::state(format!(
                    "{} was created with a different schema or partition spec",
                    dir.display()
                )));
            }
            Ok(table)
        } else {
            Self::create(dir, schema, spec)
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn spec(&self) -> &PartitionSpec {
        &self.spec
    }

    pub fn partition_names(&self) -> Vec<String> {
        self.partitions.keys().cloned().collect()
    }

    pub fn partition_meta(&self, name: &str) -> Option<&PartitionMeta> {
        self.partitions.get(name).map(|p| &p.meta)
    }

    pub fn partition_data_path(&self, name: &str) -> PathBuf {
        self.dir.join(name).join(DATA_FILE)
    }

    /// Partition directory name a row with this key routes to.
    pub fn partition_name_for(&self, key: Value) -> Result<String> {
        match &self.spec {
            PartitionSpec::Hash { buckets, .. } => {
                Ok(format!("b{:05}", hash_key(key) % *buckets as u64))
            }
            PartitionSpec::Time { granularity, .. } => {
                time_bucket_name(key.as_exact_i64()?, *granularity)
            }
        }
    }

    // --- Writes ---

    /// Route a batch per row; each touched partition receives one chunk.
    pub fn append(&mut self, cols: &[ColumnSlice<'_>]) -> Result<()> {
        self.validate_batch(cols)?;
        let rows = cols[0].len();
        if rows == 0 {
            return Ok(());
        }

        let key_col = &cols[self.key_col];
        let mut groups: BTreeMap<String, Vec<u32>> = BTreeMap::new();
        for i in 0..rows {
            let name = self.partition_name_for(key_col.value(i))?;
            groups.entry(name).or_default().push(i as u32);
        }

        for (name, idx) in groups {
            let gathered: Vec<ColumnVec> = cols.iter().map(|c| c.gather(&idx)).collect();
            let slices: Vec<ColumnSlice<'_>> = gathered.iter().map(|c| c.as_slice()).collect();

            if !self.partitions.contains_key(&name) {
                self.create_partition(&name)?;
            }
            let key_slice = &gathered[self.key_col];
            let (lo, hi) = key_bounds(key_slice);
            let now = self.clock.wall_micros().max(0) as u64;

            let partition = self.partitions.get_mut(&name).expect("just created");
            partition.file.append(&slices)?;
            partition.meta.rows += idx.len() as u64;
            if partition.meta.rows == idx.len() as u64 {
                partition.meta.min_key = lo;
                partition.meta.max_key = hi;
            } else {
                if lo.compare(&partition.meta.min_key) == Some(std::cmp::Ordering::Less) {
                    partition.meta.min_key = lo;
                }
                if hi.compare(&partition.meta.max_key) == Some(std::cmp::Ordering::Greater) {
                    partition.meta.max_key = hi;
                }
            }
            partition.meta.updated_at = now;
            save_meta(&self.dir.join(&name).join(META_FILE), &partition.meta)?;
            trace!(partition = %name, rows = idx.len(), "routed batch");
        }
        Ok(())
    }

    /// Atomically swap one partition's contents for `cols`; an empty batch
    /// drops the partition.
    pub fn replace_partition(&mut self, name: &str, cols: &[ColumnSlice<'_>]) -> Result<()> {
        self.validate_batch(cols)?;
        let part_dir = self.dir.join(name);
        let data_path = part_dir.join(DATA_FILE);
        let rows = cols.first().map_or(0, |c| c.len());

        if rows == 0 {
            if self.partitions.remove(name).is_some() {
                fs::remove_dir_all(&part_dir).map_err(|e| NdtsError::io(&part_dir, e))?;
            }
            return Ok(());
        }

        fs::create_dir_all(&part_dir).map_err(|e| NdtsError::io(&part_dir, e))?;
        let tmp_path = part_dir.join("data.ndts.tmp");
        if tmp_path.exists() {
            fs::remove_file(&tmp_path).map_err(|e| NdtsError::io(&tmp_path, e))?;
        }
        {
            let mut fresh = AppendFile::open(&tmp_path, &self.schema, &OpenOptions::default())?;
            fresh.append(cols)?;
        }
        fs::rename(&tmp_path, &data_path).map_err(|e| NdtsError::io(&tmp_path, e))?;
        crate::io::fsync_dir(&part_dir)?;

        let (lo, hi) = key_bounds_slice(&cols[self.key_col]);
        let meta = PartitionMeta {
            rows: rows as u64,
            min_key: lo,
            max_key: hi,
            updated_at: self.clock.wall_micros().max(0) as u64,
        };
        save_meta(&part_dir.join(META_FILE), &meta)?;
        self.partitions.remove(name);
        self.load_partition(name)?;
        Ok(())
    }

    /// Every row of one partition, unfiltered, in append order.
    pub fn read_partition(&mut self, name: &str) -> Result<Vec<ColumnVec>> {
        self.scan_partition(name, &[])
    }

    // --- Scans ---

    /// Concatenate matching rows across the hinted partitions, in schema
    /// column order.
    pub fn scan(
        &mut self,
        filters: &[Filter],
        hint: Option<&PartitionHint>,
    ) -> Result<Vec<ColumnVec>> {
        let mut out: Vec<ColumnVec> = self
            .schema
            .columns
            .iter()
            .map(|d| ColumnVec::with_capacity(d.col_type, 0))
            .collect();
        for name in self.select_partitions(hint)? {
            let cols = self.scan_partition(&name, filters)?;
            for (acc, col) in out.iter_mut().zip(&cols) {
                acc.extend_from(col)?;
            }
        }
        Ok(out)
    }

    pub fn count(&mut self, filters: &[Filter], hint: Option<&PartitionHint>) -> Result<u64> {
        let mut total = 0u64;
        for name in self.select_partitions(hint)? {
            if filters.is_empty() {
                total += self.partitions[&name].meta.rows;
            } else {
                total += self.scan_partition(&name, filters)?[0].len() as u64;
            }
        }
        Ok(total)
    }

    pub fn get_max(
        &mut self,
        column: &str,
        filters: &[Filter],
        hint: Option<&PartitionHint>,
    ) -> Result<Option<Value>> {
        self.fold_extremum(column, filters, hint, std::cmp::Ordering::Greater)
    }

    pub fn get_min(
        &mut self,
        column: &str,
        filters: &[Filter],
        hint: Option<&PartitionHint>,
    ) -> Result<Option<Value>> {
        self.fold_extremum(column, filters, hint, std::cmp::Ordering::Less)
    }

    fn fold_extremum(
        &mut self,
        column: &str,
        filters: &[Filter],
        hint: Option<&PartitionHint>,
        keep: std::cmp::Ordering,
    ) -> Result<Option<Value>> {
        let ci = self
            .schema
            .column_index(column)
            .ok_or_else(|| NdtsError::range(format!("unknown column {column}")))?;
        let mut best: Option<Value> = None;
        for name in self.select_partitions(hint)? {
            let cols = self.scan_partition(&name, filters)?;
            let col = &cols[ci];
            for i in 0..col.len() {
                let v = col.value(i);
                let better = match &best {
                    None => true,
                    Some(b) => v.compare(b) == Some(keep),
                };
                if better {
                    best = Some(v);
                }
            }
        }
        Ok(best)
    }

    fn scan_partition(&mut self, name: &str, filters: &[Filter]) -> Result<Vec<ColumnVec>> {
        for f in filters {
            if self.schema.column_index(&f.column).is_none() {
                return Err(NdtsError::range(format!(
                    "filter names unknown column {}",
                    f.column
                )));
            }
        }
        let partition = self
            .partitions
            .get_mut(name)
            .ok_or_else(|| NdtsError::range(format!("unknown partition {name}")))?;
        let cols = partition.file.read_all()?;
        if filters.is_empty() {
            return Ok(cols);
        }

        let rows = cols.first().map_or(0, |c| c.len());
        let mut keep: Vec<u32> = Vec::new();
        'rows: for i in 0..rows {
            for f in filters {
                let ci = self.schema.column_index(&f.column).expect("checked above");
                if !f.matches(cols[ci].value(i)) {
                    continue 'rows;
                }
            }
            keep.push(i as u32);
        }
        Ok(cols.iter().map(|c| c.as_slice().gather(&keep)).collect())
    }

    fn select_partitions(&self, hint: Option<&PartitionHint>) -> Result<Vec<String>> {
        match (&self.spec, hint) {
            (_, None) => Ok(self.partitions.keys().cloned().collect()),
            (PartitionSpec::Hash { .. }, Some(PartitionHint::Key(key))) => {
                let name = self.partition_name_for(*key)?;
                Ok(self
                    .partitions
                    .contains_key(&name)
                    .then_some(name)
                    .into_iter()
                    .collect())
            }
            (PartitionSpec::Time { .. }, Some(PartitionHint::TimeRange { min, max })) => {
                let lo = Value::Int(*min);
                let hi = Value::Int(*max);
                Ok(self
                    .partitions
                    .iter()
                    .filter(|(_, p)| {
                        p.meta.min_key.compare(&hi) != Some(std::cmp::Ordering::Greater)
                            && p.meta.max_key.compare(&lo) != Some(std::cmp::Ordering::Less)
                    })
                    .map(|(name, _)| name.clone())
                    .collect())
            }
            _ => Err(NdtsError::range(
                "partition hint does not match the partition spec",
            )),
        }
    }

    // --- Internals ---

    fn validate_batch(&self, cols: &[ColumnSlice<'_>]) -> Result<()> {
        if cols.len() != self.schema.len() {
            return Err(NdtsError::schema(format!(
                "batch has {} columns, schema has {}",
                cols.len(),
                self.schema.len()
            )));
        }
        let rows = cols[0].len();
        for (def, col) in self.schema.columns.iter().zip(cols) {
            if col.col_type() != def.col_type {
                return Err(NdtsError::schema(format!(
                    "column {} is {}, batch supplies {}",
                    def.name,
                    def.col_type.as_str(),
                    col.col_type().as_str()
                )));
            }
            if col.len() != rows {
                return Err(NdtsError::schema(format!(
                    "column {} has {} rows, expected {}",
                    def.name,
                    col.len(),
                    rows
                )));
            }
        }
        Ok(())
    }

    fn create_partition(&mut self, name: &str) -> Result<()> {
        let part_dir = self.dir.join(name);
        fs::create_dir_all(&part_dir).map_err(|e| NdtsError::io(&part_dir, e))?;
        self.load_partition(name)
    }

    fn load_partition(&mut self, name: &str) -> Result<()> {
        let part_dir = self.dir.join(name);
        let data_path = part_dir.join(DATA_FILE);
        let file = AppendFile::open(&data_path, &self.schema, &OpenOptions::default())?;
        let meta_path = part_dir.join(META_FILE);
        let meta = if meta_path.exists() {
            let bytes = fs::read(&meta_path).map_err(|e| NdtsError::io(&meta_path, e))?;
            serde_json::from_slice(&bytes).map_err(|e| {
                NdtsError::corruption(
                    &meta_path,
                    0,
                    bytes.len() as u64,
                    format!("bad partition metadata: {e}"),
                )
            })?
        } else {
            PartitionMeta {
                rows: file.total_rows(),
                min_key: Value::Int(0),
                max_key: Value::Int(0),
                updated_at: 0,
            }
        };
        self.partitions
            .insert(name.to_string(), Partition { file, meta });
        Ok(())
    }
}

fn validate_spec(schema: &Schema, spec: &PartitionSpec) -> Result<()> {
    let def = schema
        .column(spec.column())
        .ok_or_else(|| NdtsError::schema(format!("partition column {} not in schema", spec.column())))?;
    match spec {
        PartitionSpec::Hash { buckets, .. } => {
            if *buckets == 0 {
                return Err(NdtsError::schema("hash partitioning needs at least one bucket"));
            }
        }
        PartitionSpec::Time { .. } => {
            if def.col_type != ColumnType::I64 {
                return Err(NdtsError::schema(format!(
                    "time partition column {} must be int64 microseconds",
                    spec.column()
                )));
            }
        }
    }
    Ok(())
}

fn hash_key(key: Value) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    match key {
        Value::Int(v) => hasher.write(&v.to_le_bytes()),
        Value::Float(f) => hasher.write(&f.to_le_bytes()),
    }
    hasher.finish()
}

fn time_bucket_name(micros: i64, granularity: Granularity) -> Result<String> {
    let ts = jiff::Timestamp::from_microsecond(micros)
        .map_err(|e| NdtsError::range(format!("invalid timestamp {micros}: {e}")))?;
    let dt = ts.to_zoned(jiff::tz::TimeZone::UTC);
    Ok(match granularity {
        Granularity::Month => format!("{:04}-{:02}", dt.year(), dt.month()),
        Granularity::Day => format!("{:04}-{:02}-{:02}", dt.year(), dt.month(), dt.day()),
        Granularity::Hour => format!(
            "{:04}-{:02}-{:02}T{:02}",
            dt.year(),
            dt.month(),
            dt.day(),
            dt.hour()
        ),
    })
}

fn key_bounds(col: &ColumnVec) -> (Value, Value) {
    key_bounds_slice(&col.as_slice())
}

fn key_bounds_slice(col: &ColumnSlice<'_>) -> (Value, Value) {
    let mut lo = col.value(0);
    let mut hi = lo;
    for i in 1..col.len() {
        let v = col.value(i);
        if v.compare(&lo) == Some(std::cmp::Ordering::Less) {
            lo = v;
        }
        if v.compare(&hi) == Some(std::cmp::Ordering::Greater) {
            hi = v;
        }
    }
    (lo, hi)
}

fn save_meta(path: &Path, meta: &PartitionMeta) -> Result<()> {
    let json = serde_json::to_vec(meta)
        .map_err(|e| NdtsError::state(format!("metadata serialization failed: {e}")))?;
    fs::write(path, json).map_err(|e| NdtsError::io(path, e))?;
    Ok(())
}
