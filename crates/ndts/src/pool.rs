//! Read-only pool of memory-mapped column files.
//!
//! Each opened file exposes its columns as typed views of length
//! `totalRows`. A single-chunk uncompressed column aliases the mapped bytes
//! directly; anything else (multiple chunks, codecs, misaligned data) is
//! assembled once into an owned contiguous buffer and cached, so two calls
//! for the same `(name, column)` always share one allocation. Views borrow
//! from the pool, which keeps them from outliving the mappings.

use std::collections::BTreeMap;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use once_cell::sync::OnceCell;
use tracing::debug;
use zerocopy::FromBytes;

use crate::error::{NdtsError, Result};
use crate::format::{self, ChunkSpan, FileHeader};
use crate::schema::{ColumnSlice, ColumnType, ColumnVec, Schema};

pub struct MmapPool {
    files: BTreeMap<String, PooledFile>,
}

struct PooledFile {
    path: PathBuf,
    mmap: Mmap,
    header: FileHeader,
    chunks: Vec<ChunkSpan>,
    cols: Vec<OnceCell<ColumnVec>>,
}

impl MmapPool {
    pub fn new() -> Self {
        MmapPool {
            files: BTreeMap::new(),
        }
    }

    /// Open `<base_dir>/<name>.ndts` read-only for every name.
    pub fn init(base_dir: impl AsRef<Path>, names: &[&str]) -> Result<MmapPool> {
        let base_dir = base_dir.as_ref();
        let mut pool = MmapPool::new();
        for &name in names {
            pool.open_file(name, &base_dir.join(format!("{name}.ndts")))?;
        }
        Ok(pool)
    }

    /// Map one file under a logical name. Reopening a name replaces its
    /// prior entry.
    pub fn open_file(&mut self, name: &str, path: &Path) -> Result<()> {
        let file = fs::File::open(path).map_err(|e| NdtsError::io(path, e))?;
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| NdtsError::io(path, e))?;

        let parsed = format::parse_header(&mmap, path)?;
        let chunks = format::scan_chunks(
            &mut Cursor::new(&mmap[..]),
            mmap.len() as u64,
            parsed.chunks_start,
            &parsed.header.columns,
            parsed.header.compression.as_ref(),
            path,
        )?;
        let derived: u64 = chunks.iter().map(|c| c.rows as u64).sum();
        if derived != parsed.header.total_rows {
            return Err(NdtsError::corruption(
                path,
                0,
                mmap.len() as u64,
                format!(
                    "header says {} rows, chunk stream holds {derived}",
                    parsed.header.total_rows
                ),
            ));
        }

        debug!(name, path = %path.display(), rows = derived, "pooled file");
        let cols = (0..parsed.header.columns.len())
            .map(|_| OnceCell::new())
            .collect();
        self.files.insert(
            name.to_string(),
            PooledFile {
                path: path.to_path_buf(),
                mmap,
                header: parsed.header,
                chunks,
                cols,
            },
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(|s| s.as_str())
    }

    pub fn schema(&self, name: &str) -> Result<&Schema> {
        Ok(&self.file(name)?.header.columns)
    }

    pub fn rows(&self, name: &str) -> Result<u64> {
        Ok(self.file(name)?.header.total_rows)
    }

    /// Typed view of one column, zero-copy when the layout allows it.
    pub fn column(&self, name: &str, column: &str) -> Result<ColumnSlice<'_>> {
        let file = self.file(name)?;
        let ci = file.header.columns.column_index(column).ok_or_else(|| {
            NdtsError::range(format!("{name} has no column {column}"))
        })?;
        let def = &file.header.columns.columns[ci];
        let codec = file.header.codec_for(&def.name);

        if file.chunks.len() == 1 && codec.is_none() {
            let (off, len) = file.chunks[0].cols[ci];
            let bytes = &file.mmap[off as usize..(off + len) as usize];
            if let Some(view) = cast_column(def.col_type, bytes) {
                return Ok(view);
            }
            // Misaligned in the map; fall through to the owned copy.
        }

        let assembled = file.cols[ci].get_or_try_init(|| assemble_column(file, ci))?;
        Ok(assembled.as_slice())
    }

    pub fn get_i64(&self, name: &str, column: &str) -> Result<&[i64]> {
        match self.column(name, column)? {
            ColumnSlice::I64(s) => Ok(s),
            other => Err(NdtsError::schema(format!(
                "{name}.{column} is {}, expected int64",
                other.col_type().as_str()
            ))),
        }
    }

    pub fn get_f64(&self, name: &str, column: &str) -> Result<&[f64]> {
        match self.column(name, column)? {
            ColumnSlice::F64(s) => Ok(s),
            other => Err(NdtsError::schema(format!(
                "{name}.{column} is {}, expected float64",
                other.col_type().as_str()
            ))),
        }
    }

    fn file(&self, name: &str) -> Result<&PooledFile> {
        self.files
            .get(name)
            .ok_or_else(|| NdtsError::range(format!("{name} is not open in the pool")))
    }
}

impl Default for MmapPool {
    fn default() -> Self {
        MmapPool::new()
    }
}

fn cast_column(col_type: ColumnType, bytes: &[u8]) -> Option<ColumnSlice<'_>> {
    match col_type {
        ColumnType::I16 => <[i16]>::ref_from_bytes(bytes).ok().map(ColumnSlice::I16),
        ColumnType::I32 => <[i32]>::ref_from_bytes(bytes).ok().map(ColumnSlice::I32),
        ColumnType::I64 => <[i64]>::ref_from_bytes(bytes).ok().map(ColumnSlice::I64),
        ColumnType::F64 => <[f64]>::ref_from_bytes(bytes).ok().map(ColumnSlice::F64),
    }
}

/// Concatenate one column across chunks, verifying each chunk's CRC on the
/// way through.
fn assemble_column(file: &PooledFile, ci: usize) -> Result<ColumnVec> {
    let def = &file.header.columns.columns[ci];
    let codec = file.header.codec_for(&def.name);
    let mut out = ColumnVec::with_capacity(def.col_type, file.header.total_rows as usize);
    for (k, span) in file.chunks.iter().enumerate() {
        let chunk = &file.mmap[span.offset as usize..span.end() as usize];
        if !format::verify_chunk_bytes(chunk) {
            return Err(NdtsError::corruption(
                &file.path,
                span.offset,
                span.len(),
                format!("chunk {k} CRC mismatch"),
            ));
        }
        let (off, len) = span.cols[ci];
        let stored = &file.mmap[off as usize..(off + len) as usize];
        let col = format::decode_column(def, codec, stored, span.rows as usize, &file.path, off)?;
        out.extend_from(&col)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::append::{AppendFile, OpenOptions};
    use crate::format::{Codec, CompressionPlan};
    use crate::schema::ColumnDef;
    use tempfile::TempDir;

    fn write_file(path: &Path, opts: &OpenOptions, batches: &[(&[i64], &[f64])]) {
        let schema = Schema::new(vec![
            ColumnDef::new("ts", ColumnType::I64),
            ColumnDef::new("px", ColumnType::F64),
        ]);
        let mut f = AppendFile::open(path, &schema, opts).unwrap();
        for (ts, px) in batches {
            f.append(&[ColumnSlice::I64(ts), ColumnSlice::F64(px)])
                .unwrap();
        }
    }

    #[test]
    fn test_single_chunk_is_zero_copy_and_stable() {
        let dir = TempDir::new().unwrap();
        write_file(
            &dir.path().join("a.ndts"),
            &OpenOptions::default(),
            &[(&[1, 2, 3], &[0.5, 1.5, 2.5])],
        );

        let pool = MmapPool::init(dir.path(), &["a"]).unwrap();
        let ts1 = pool.get_i64("a", "ts").unwrap();
        let ts2 = pool.get_i64("a", "ts").unwrap();
        assert_eq!(ts1, &[1, 2, 3]);
        // Same underlying region on every call.
        assert_eq!(ts1.as_ptr(), ts2.as_ptr());

        // The view aliases the mapping itself, not a copy.
        let file = pool.file("a").unwrap();
        let map_range = file.mmap.as_ptr() as usize..file.mmap.as_ptr() as usize + file.mmap.len();
        assert!(map_range.contains(&(ts1.as_ptr() as usize)));
    }

    #[test]
    fn test_multi_chunk_assembles_one_shared_buffer() {
        let dir = TempDir::new().unwrap();
        write_file(
            &dir.path().join("a.ndts"),
            &OpenOptions::default(),
            &[(&[1, 2], &[0.5, 1.5]), (&[3], &[2.5])],
        );

        let pool = MmapPool::init(dir.path(), &["a"]).unwrap();
        let px1 = pool.get_f64("a", "px").unwrap();
        let px2 = pool.get_f64("a", "px").unwrap();
        assert_eq!(px1, &[0.5, 1.5, 2.5]);
        assert_eq!(px1.as_ptr(), px2.as_ptr());
        assert_eq!(pool.rows("a").unwrap(), 3);
    }

    #[test]
    fn test_compressed_column_assembles() {
        let dir = TempDir::new().unwrap();
        let mut plan = CompressionPlan::new();
        plan.insert("px".into(), Codec::Gorilla);
        let opts = OpenOptions {
            compression: Some(plan),
            ..OpenOptions::default()
        };
        let ts: Vec<i64> = (0..100).collect();
        let px: Vec<f64> = (0..100).map(|i| 10.0 + i as f64 * 0.125).collect();
        write_file(&dir.path().join("a.ndts"), &opts, &[(&ts, &px)]);

        let pool = MmapPool::init(dir.path(), &["a"]).unwrap();
        assert_eq!(pool.get_f64("a", "px").unwrap(), px.as_slice());
        // Uncompressed sibling column still aliases the map.
        assert_eq!(pool.get_i64("a", "ts").unwrap(), ts.as_slice());
    }

    #[test]
    fn test_misaligned_column_falls_back_to_copy() {
        let dir = TempDir::new().unwrap();
        let schema = Schema::new(vec![
            ColumnDef::new("side", ColumnType::I16),
            ColumnDef::new("px", ColumnType::F64),
        ]);
        let path = dir.path().join("a.ndts");
        let mut f = AppendFile::open(&path, &schema, &OpenOptions::default()).unwrap();
        // Three i16 rows put the f64 column on an odd 2-byte boundary.
        f.append(&[
            ColumnSlice::I16(&[1, -1, 1]),
            ColumnSlice::F64(&[0.5, 1.5, 2.5]),
        ])
        .unwrap();
        drop(f);

        let pool = MmapPool::init(dir.path(), &["a"]).unwrap();
        assert_eq!(pool.get_f64("a", "px").unwrap(), &[0.5, 1.5, 2.5]);
        let side = pool.column("a", "side").unwrap();
        assert_eq!(side.len(), 3);
    }

    #[test]
    fn test_unknown_name_and_column_are_range_errors() {
        let dir = TempDir::new().unwrap();
        write_file(
            &dir.path().join("a.ndts"),
            &OpenOptions::default(),
            &[(&[1], &[0.5])],
        );
        let pool = MmapPool::init(dir.path(), &["a"]).unwrap();
        assert!(matches!(
            pool.column("missing", "ts"),
            Err(NdtsError::Range(_))
        ));
        assert!(matches!(
            pool.column("a", "missing"),
            Err(NdtsError::Range(_))
        ));
    }

    #[test]
    fn test_empty_file_views_are_empty() {
        let dir = TempDir::new().unwrap();
        write_file(&dir.path().join("a.ndts"), &OpenOptions::default(), &[]);
        let pool = MmapPool::init(dir.path(), &["a"]).unwrap();
        assert!(pool.get_i64("a", "ts").unwrap().is_empty());
        assert_eq!(pool.rows("a").unwrap(), 0);
    }
}
