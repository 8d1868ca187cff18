//! The append-only chunked column file.
//!
//! A writer holds exclusive ownership of an `AppendFile`; concurrent readers
//! go through the mmap pool instead. Every `append` writes exactly one
//! CRC-guarded chunk at the tail and then rewrites the fixed-size header in
//! place, so a crash can leave the counters stale by at most one chunk;
//! `recover` recomputes them from the chunk stream.

use std::fs;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, trace, warn};

use crate::error::{NdtsError, Result};
use crate::format::{
    self, ChunkSpan, CompressionPlan, FileHeader, HEADER_PREFIX_LEN, MAX_HEADER_LEN,
};
use crate::io::{CancelToken, atomic_replace};
use crate::schema::{ColumnSlice, ColumnType, ColumnVec, Schema, Value};
use crate::tombstone::TombstoneSet;

#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Truncate a malformed tail and recompute stale counters before
    /// opening, instead of failing on them.
    pub recover: bool,
    /// fsync after every append and header rewrite.
    pub fsync: bool,
    /// Per-column codecs, honored only when the file is created.
    pub compression: Option<CompressionPlan>,
}

#[derive(Debug, Clone, Default)]
pub struct CompactOptions {
    /// Keep the prior file as `<path>.bak`.
    pub keep_bak: bool,
    pub cancel: Option<CancelToken>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactStats {
    pub before_rows: u64,
    pub after_rows: u64,
    pub deleted_rows: u64,
    pub chunks_written: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoverStats {
    pub total_rows: u64,
    pub chunk_count: u64,
    pub truncated_bytes: u64,
    pub counters_fixed: bool,
}

pub struct AppendFile {
    path: PathBuf,
    file: fs::File,
    header: FileHeader,
    header_len: u32,
    chunks: Vec<ChunkSpan>,
    end_offset: u64,
    tombstones: TombstoneSet,
    fsync: bool,
}

impl AppendFile {
    /// Open `path`, creating it with `schema` if absent. An existing file's
    /// schema must contain every requested column with a matching type;
    /// extra file columns are tolerated and skipped on read.
    pub fn open(path: impl AsRef<Path>, schema: &Schema, opts: &OpenOptions) -> Result<AppendFile> {
        let path = path.as_ref().to_path_buf();
        if schema.is_empty() {
            return Err(NdtsError::schema("a file needs at least one column"));
        }
        if path.exists() {
            if opts.recover {
                Self::recover(&path)?;
            }
            Self::open_with(path, Some(schema), opts)
        } else {
            Self::create(path, schema, opts)
        }
    }

    /// Open an existing file, taking the schema from its own header.
    pub fn open_existing(path: impl AsRef<Path>, opts: &OpenOptions) -> Result<AppendFile> {
        let path = path.as_ref().to_path_buf();
        if opts.recover {
            Self::recover(&path)?;
        }
        Self::open_with(path, None, opts)
    }

    fn create(path: PathBuf, schema: &Schema, opts: &OpenOptions) -> Result<AppendFile> {
        if let Some(plan) = &opts.compression {
            format::validate_plan(schema, plan)?;
        }
        let header = FileHeader::new(schema.clone(), opts.compression.clone());
        let header_len = format::reserved_header_len(&header)?;
        let block = format::encode_header_block(&header, header_len)?;

        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| NdtsError::io(&path, e))?;
        file.write_all(&block).map_err(|e| NdtsError::io(&path, e))?;
        if opts.fsync {
            file.sync_all().map_err(|e| NdtsError::io(&path, e))?;
        }

        // A stale sidecar from a removed predecessor must not shadow the
        // fresh file.
        let mut tombstones = TombstoneSet::load(&path)?;
        if !tombstones.is_empty() {
            tombstones.clear();
            tombstones.save()?;
        }

        debug!(path = %path.display(), "created append file");
        let end_offset = block.len() as u64;
        Ok(AppendFile {
            path,
            file,
            header,
            header_len,
            chunks: Vec::new(),
            end_offset,
            tombstones,
            fsync: opts.fsync,
        })
    }

    fn open_with(
        path: PathBuf,
        expected: Option<&Schema>,
        opts: &OpenOptions,
    ) -> Result<AppendFile> {
        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| NdtsError::io(&path, e))?;
        let file_len = file.metadata().map_err(|e| NdtsError::io(&path, e))?.len();

        let parsed = Self::read_header(&mut file, file_len, &path)?;
        if let Some(expected) = expected {
            if !parsed.header.columns.contains(expected) {
                return Err(NdtsError::schema(format!(
                    "{} does not provide the requested columns",
                    path.display()
                )));
            }
        }

        let chunks = format::scan_chunks(
            &mut file,
            file_len,
            parsed.chunks_start,
            &parsed.header.columns,
            parsed.header.compression.as_ref(),
            &path,
        )?;

        let derived_rows: u64 = chunks.iter().map(|c| c.rows as u64).sum();
        if derived_rows != parsed.header.total_rows || chunks.len() as u64 != parsed.header.chunk_count
        {
            return Err(NdtsError::corruption(
                &path,
                HEADER_PREFIX_LEN as u64,
                parsed.header_len as u64,
                format!(
                    "stale counters: header says {} rows in {} chunks, chunk stream holds {} in {}",
                    parsed.header.total_rows,
                    parsed.header.chunk_count,
                    derived_rows,
                    chunks.len()
                ),
            ));
        }

        let tombstones = TombstoneSet::load(&path)?;
        debug!(
            path = %path.display(),
            rows = derived_rows,
            chunks = chunks.len(),
            "opened append file"
        );
        Ok(AppendFile {
            path,
            file,
            header: parsed.header,
            header_len: parsed.header_len,
            chunks,
            end_offset: file_len,
            tombstones,
            fsync: opts.fsync,
        })
    }

    fn read_header(file: &mut fs::File, file_len: u64, path: &Path) -> Result<format::ParsedHeader> {
        let mut prefix = [0u8; HEADER_PREFIX_LEN];
        file.seek(SeekFrom::Start(0)).map_err(|e| NdtsError::io(path, e))?;
        if file_len < HEADER_PREFIX_LEN as u64 {
            return Err(NdtsError::corruption(
                path,
                0,
                file_len,
                "file too small for a header",
            ));
        }
        file.read_exact(&mut prefix).map_err(|e| NdtsError::io(path, e))?;
        let header_len = u32::from_le_bytes(prefix[4..8].try_into().unwrap());
        if prefix[..4] != format::MAGIC {
            return Err(NdtsError::corruption(path, 0, 4, "bad magic"));
        }
        if header_len > MAX_HEADER_LEN {
            return Err(NdtsError::corruption(
                path,
                4,
                4,
                format!("header length {header_len} exceeds the 16 MiB limit"),
            ));
        }

        let block_len = format::chunks_start(header_len);
        if file_len < block_len {
            return Err(NdtsError::corruption(path, 0, file_len, "truncated header"));
        }
        let mut block = vec![0u8; block_len as usize];
        file.seek(SeekFrom::Start(0)).map_err(|e| NdtsError::io(path, e))?;
        file.read_exact(&mut block).map_err(|e| NdtsError::io(path, e))?;
        format::parse_header(&block, path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> &Schema {
        &self.header.columns
    }

    pub fn total_rows(&self) -> u64 {
        self.header.total_rows
    }

    pub fn chunk_count(&self) -> u64 {
        self.header.chunk_count
    }

    pub fn compression(&self) -> Option<&CompressionPlan> {
        self.header.compression.as_ref()
    }

    pub fn deleted_count(&self) -> usize {
        self.tombstones.deleted_count()
    }

    // --- Writing ---

    /// Append one chunk. Zero rows is a no-op; a batch that does not match
    /// the schema fails before any byte is written.
    pub fn append(&mut self, cols: &[ColumnSlice<'_>]) -> Result<()> {
        self.validate_batch(cols)?;
        let rows = cols[0].len();
        if rows == 0 {
            return Ok(());
        }
        if rows > u32::MAX as usize {
            return Err(NdtsError::range(format!("{rows} rows exceed one chunk")));
        }

        let chunk = format::encode_chunk(
            &self.header.columns,
            self.header.compression.as_ref(),
            cols,
        )?;
        self.file
            .seek(SeekFrom::Start(self.end_offset))
            .map_err(|e| NdtsError::io(&self.path, e))?;
        self.file
            .write_all(&chunk)
            .map_err(|e| NdtsError::io(&self.path, e))?;
        if self.fsync {
            self.file.sync_all().map_err(|e| NdtsError::io(&self.path, e))?;
        }

        self.header.total_rows += rows as u64;
        self.header.chunk_count += 1;
        self.write_header()?;

        let (mut spans, _) = format::scan_chunks_tolerant(
            &mut Cursor::new(&chunk),
            chunk.len() as u64,
            0,
            &self.header.columns,
            self.header.compression.as_ref(),
            &self.path,
        )?;
        let mut span = spans.pop().ok_or_else(|| {
            NdtsError::state("freshly encoded chunk failed to scan")
        })?;
        span.offset += self.end_offset;
        span.crc_offset += self.end_offset;
        for (off, _) in &mut span.cols {
            *off += self.end_offset;
        }
        self.end_offset += chunk.len() as u64;
        self.chunks.push(span);

        trace!(path = %self.path.display(), rows, "appended chunk");
        Ok(())
    }

    fn validate_batch(&self, cols: &[ColumnSlice<'_>]) -> Result<()> {
        let schema = &self.header.columns;
        if cols.len() != schema.len() {
            return Err(NdtsError::schema(format!(
                "batch has {} columns, schema has {}",
                cols.len(),
                schema.len()
            )));
        }
        let rows = cols[0].len();
        for (def, col) in schema.columns.iter().zip(cols) {
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

    fn write_header(&mut self) -> Result<()> {
        let block = format::encode_header_block(&self.header, self.header_len)?;
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|e| NdtsError::io(&self.path, e))?;
        self.file
            .write_all(&block)
            .map_err(|e| NdtsError::io(&self.path, e))?;
        if self.fsync {
            self.file.sync_all().map_err(|e| NdtsError::io(&self.path, e))?;
        }
        Ok(())
    }

    // --- Reading ---

    /// Stream every chunk, verifying its CRC, into owned typed columns:
    /// all of them in schema order, or the requested names in request
    /// order. Requested names missing from the schema are skipped.
    pub fn read_columns(
        &mut self,
        names: Option<&[&str]>,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<ColumnVec>> {
        let schema = self.header.columns.clone();
        let selected: Vec<usize> = match names {
            None => (0..schema.len()).collect(),
            Some(names) => names
                .iter()
                .filter_map(|n| schema.column_index(n))
                .collect(),
        };

        let mut out: Vec<ColumnVec> = selected
            .iter()
            .map(|&i| {
                ColumnVec::with_capacity(schema.columns[i].col_type, self.header.total_rows as usize)
            })
            .collect();

        for k in 0..self.chunks.len() {
            if let Some(token) = cancel {
                token.check()?;
            }
            let span = self.chunks[k].clone();
            let chunk = self.read_chunk_bytes(&span)?;
            if !format::verify_chunk_bytes(&chunk) {
                return Err(NdtsError::corruption(
                    &self.path,
                    span.offset,
                    span.len(),
                    format!("chunk {k} CRC mismatch"),
                ));
            }
            for (slot, &ci) in selected.iter().enumerate() {
                let (off, len) = span.cols[ci];
                let rel = (off - span.offset) as usize;
                let col = format::decode_column(
                    &schema.columns[ci],
                    self.header.codec_for(&schema.columns[ci].name),
                    &chunk[rel..rel + len as usize],
                    span.rows as usize,
                    &self.path,
                    off,
                )?;
                out[slot].extend_from(&col)?;
            }
        }
        Ok(out)
    }

    pub fn read_all(&mut self) -> Result<Vec<ColumnVec>> {
        self.read_columns(None, None)
    }

    /// Fetch the last row without touching earlier chunks.
    pub fn read_last_row(&mut self) -> Result<Option<Vec<Value>>> {
        let Some(span) = self.chunks.last().cloned() else {
            return Ok(None);
        };
        let last = span.rows as usize - 1;
        let schema = self.header.columns.clone();
        let mut row = Vec::with_capacity(schema.len());
        for (ci, def) in schema.columns.iter().enumerate() {
            let (off, len) = span.cols[ci];
            match self.header.codec_for(&def.name) {
                None => {
                    let width = def.col_type.width();
                    let mut buf = [0u8; 8];
                    self.file
                        .seek(SeekFrom::Start(off + (last * width) as u64))
                        .map_err(|e| NdtsError::io(&self.path, e))?;
                    self.file
                        .read_exact(&mut buf[..width])
                        .map_err(|e| NdtsError::io(&self.path, e))?;
                    row.push(scalar_from_le(def.col_type, &buf[..width]));
                }
                Some(codec) => {
                    let mut stored = vec![0u8; len as usize];
                    self.file
                        .seek(SeekFrom::Start(off))
                        .map_err(|e| NdtsError::io(&self.path, e))?;
                    self.file
                        .read_exact(&mut stored)
                        .map_err(|e| NdtsError::io(&self.path, e))?;
                    let col = format::decode_column(
                        def,
                        Some(codec),
                        &stored,
                        span.rows as usize,
                        &self.path,
                        off,
                    )?;
                    row.push(col.value(last));
                }
            }
        }
        Ok(Some(row))
    }

    fn read_chunk_bytes(&mut self, span: &ChunkSpan) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; span.len() as usize];
        self.file
            .seek(SeekFrom::Start(span.offset))
            .map_err(|e| NdtsError::io(&self.path, e))?;
        self.file
            .read_exact(&mut buf)
            .map_err(|e| NdtsError::io(&self.path, e))?;
        Ok(buf)
    }

    // --- Tombstones ---

    /// Mark a row deleted. Out-of-range indices are range errors; marking
    /// twice is a no-op.
    pub fn mark_deleted(&mut self, index: u64) -> Result<bool> {
        self.check_row_index(index)?;
        let newly = self.tombstones.mark_deleted(index as u32);
        self.tombstones.save()?;
        Ok(newly)
    }

    pub fn mark_deleted_batch(&mut self, indices: &[u32]) -> Result<()> {
        for &i in indices {
            self.check_row_index(i as u64)?;
        }
        self.tombstones.mark_deleted_batch(indices);
        self.tombstones.save()
    }

    pub fn is_deleted(&self, index: u64) -> bool {
        index <= u32::MAX as u64 && self.tombstones.is_deleted(index as u32)
    }

    fn check_row_index(&self, index: u64) -> Result<()> {
        if index >= self.header.total_rows || index > u32::MAX as u64 {
            return Err(NdtsError::range(format!(
                "row {index} out of range for {} rows",
                self.header.total_rows
            )));
        }
        Ok(())
    }

    // --- Compact / rewrite ---

    /// Stream the file to a temp path without the tombstoned rows, then
    /// rename it into place. The tombstone set is consumed.
    pub fn compact(&mut self, opts: &CompactOptions) -> Result<CompactStats> {
        let stats = self.rebuild(opts, |_, _| RowAction::Keep)?;
        info!(
            path = %self.path.display(),
            before = stats.before_rows,
            after = stats.after_rows,
            "compacted"
        );
        Ok(stats)
    }

    /// Streaming rewrite: every surviving row passes through `transform`,
    /// which may rewrite or drop it. Tombstoned rows are dropped first and
    /// the set is consumed, as in `compact`.
    pub fn rewrite(
        &mut self,
        opts: &CompactOptions,
        mut transform: impl FnMut(u64, Vec<Value>) -> Option<Vec<Value>>,
    ) -> Result<CompactStats> {
        let stats = self.rebuild(opts, |index, row| match transform(index, row) {
            Some(new_row) => RowAction::Replace(new_row),
            None => RowAction::Drop,
        })?;
        info!(
            path = %self.path.display(),
            before = stats.before_rows,
            after = stats.after_rows,
            "rewrote"
        );
        Ok(stats)
    }

    fn rebuild(
        &mut self,
        opts: &CompactOptions,
        mut row_fn: impl FnMut(u64, Vec<Value>) -> RowAction,
    ) -> Result<CompactStats> {
        let schema = self.header.columns.clone();
        let plan = self.header.compression.clone();
        let header_len = self.header_len;
        let before_rows = self.header.total_rows;
        let path = self.path.clone();
        let spans = self.chunks.clone();

        let mut after_rows = 0u64;
        let mut chunks_written = 0u64;
        {
            let tombstones = &self.tombstones;
            // Borrow the source pieces individually so the closure can read
            // while it writes the replacement.
            let source = &mut self.file;
            let mut base = 0u64;

            atomic_replace(&path, opts.keep_bak, |tmp| {
                let placeholder = FileHeader::new(schema.clone(), plan.clone());
                tmp.write_all(&format::encode_header_block(&placeholder, header_len)?)
                    .map_err(|e| NdtsError::io(&path, e))?;

                for (k, span) in spans.iter().enumerate() {
                    if let Some(token) = &opts.cancel {
                        token.check()?;
                    }

                    let mut chunk = vec![0u8; span.len() as usize];
                    source
                        .seek(SeekFrom::Start(span.offset))
                        .map_err(|e| NdtsError::io(&path, e))?;
                    source
                        .read_exact(&mut chunk)
                        .map_err(|e| NdtsError::io(&path, e))?;
                    if !format::verify_chunk_bytes(&chunk) {
                        return Err(NdtsError::corruption(
                            &path,
                            span.offset,
                            span.len(),
                            format!("chunk {k} CRC mismatch"),
                        ));
                    }

                    let rows = span.rows as u64;
                    let decoded: Vec<ColumnVec> = schema
                        .columns
                        .iter()
                        .enumerate()
                        .map(|(ci, def)| {
                            let (off, len) = span.cols[ci];
                            let rel = (off - span.offset) as usize;
                            format::decode_column(
                                def,
                                plan.as_ref().and_then(|p| p.get(&def.name).copied()),
                                &chunk[rel..rel + len as usize],
                                span.rows as usize,
                                &path,
                                off,
                            )
                        })
                        .collect::<Result<_>>()?;

                    let mut out: Vec<ColumnVec> = schema
                        .columns
                        .iter()
                        .map(|d| ColumnVec::with_capacity(d.col_type, span.rows as usize))
                        .collect();
                    for r in 0..rows {
                        let index = base + r;
                        if index <= u32::MAX as u64 && tombstones.is_deleted(index as u32) {
                            continue;
                        }
                        let row: Vec<Value> =
                            decoded.iter().map(|c| c.value(r as usize)).collect();
                        match row_fn(index, row) {
                            RowAction::Keep => {
                                for (out_col, src) in out.iter_mut().zip(&decoded) {
                                    out_col.push_value(src.value(r as usize))?;
                                }
                            }
                            RowAction::Replace(new_row) => {
                                if new_row.len() != schema.len() {
                                    return Err(NdtsError::schema(format!(
                                        "transform returned {} values for {} columns",
                                        new_row.len(),
                                        schema.len()
                                    )));
                                }
                                for (out_col, value) in out.iter_mut().zip(new_row) {
                                    out_col.push_value(value)?;
                                }
                            }
                            RowAction::Drop => continue,
                        }
                    }
                    base += rows;

                    let kept = out[0].len();
                    if kept == 0 {
                        continue;
                    }
                    let slices: Vec<ColumnSlice<'_>> =
                        out.iter().map(|c| c.as_slice()).collect();
                    let encoded = format::encode_chunk(&schema, plan.as_ref(), &slices)?;
                    tmp.write_all(&encoded).map_err(|e| NdtsError::io(&path, e))?;
                    after_rows += kept as u64;
                    chunks_written += 1;
                }

                let mut final_header = FileHeader::new(schema.clone(), plan.clone());
                final_header.total_rows = after_rows;
                final_header.chunk_count = chunks_written;
                tmp.seek(SeekFrom::Start(0)).map_err(|e| NdtsError::io(&path, e))?;
                tmp.write_all(&format::encode_header_block(&final_header, header_len)?)
                    .map_err(|e| NdtsError::io(&path, e))?;
                Ok(())
            })?;
        }

        self.tombstones.clear();
        self.tombstones.save()?;
        self.reload()?;

        Ok(CompactStats {
            before_rows,
            after_rows,
            deleted_rows: before_rows - after_rows,
            chunks_written,
        })
    }

    fn reload(&mut self) -> Result<()> {
        let opts = OpenOptions {
            fsync: self.fsync,
            ..OpenOptions::default()
        };
        *self = Self::open_with(self.path.clone(), None, &opts)?;
        Ok(())
    }

    // --- Recovery ---

    /// Truncate a malformed tail to the last CRC-valid chunk boundary and
    /// recompute the header counters from the chunk stream. Opt-in: nothing
    /// calls this implicitly except `open` with `recover` set.
    pub fn recover(path: impl AsRef<Path>) -> Result<RecoverStats> {
        let path = path.as_ref();
        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| NdtsError::io(path, e))?;
        let file_len = file.metadata().map_err(|e| NdtsError::io(path, e))?.len();

        let parsed = Self::read_header(&mut file, file_len, path)?;
        let (spans, tail_issue) = format::scan_chunks_tolerant(
            &mut file,
            file_len,
            parsed.chunks_start,
            &parsed.header.columns,
            parsed.header.compression.as_ref(),
            path,
        )?;

        // Keep the longest prefix of CRC-valid chunks.
        let mut valid_end = parsed.chunks_start;
        let mut total_rows = 0u64;
        let mut chunk_count = 0u64;
        let mut bad_chunk = false;
        for span in &spans {
            let mut chunk = vec![0u8; span.len() as usize];
            file.seek(SeekFrom::Start(span.offset))
                .map_err(|e| NdtsError::io(path, e))?;
            file.read_exact(&mut chunk)
                .map_err(|e| NdtsError::io(path, e))?;
            if !format::verify_chunk_bytes(&chunk) {
                bad_chunk = true;
                break;
            }
            valid_end = span.end();
            total_rows += span.rows as u64;
            chunk_count += 1;
        }

        let truncated_bytes = if bad_chunk || tail_issue.is_some() {
            file_len - valid_end
        } else {
            0
        };
        if truncated_bytes > 0 {
            warn!(
                path = %path.display(),
                bytes = truncated_bytes,
                "truncating malformed tail"
            );
            file.set_len(valid_end).map_err(|e| NdtsError::io(path, e))?;
        }

        let counters_fixed =
            total_rows != parsed.header.total_rows || chunk_count != parsed.header.chunk_count;
        if counters_fixed || truncated_bytes > 0 {
            let mut header = parsed.header;
            header.total_rows = total_rows;
            header.chunk_count = chunk_count;
            let block = format::encode_header_block(&header, parsed.header_len)?;
            file.seek(SeekFrom::Start(0)).map_err(|e| NdtsError::io(path, e))?;
            file.write_all(&block).map_err(|e| NdtsError::io(path, e))?;
            file.sync_all().map_err(|e| NdtsError::io(path, e))?;
            info!(
                path = %path.display(),
                rows = total_rows,
                chunks = chunk_count,
                "recovered counters"
            );
        }

        Ok(RecoverStats {
            total_rows,
            chunk_count,
            truncated_bytes,
            counters_fixed,
        })
    }

    // --- Verification ---

    pub fn verify(&self) -> Result<VerifyReport> {
        verify_file(&self.path)
    }

    /// Explicit removal of the data file and its sidecar.
    pub fn remove(self) -> Result<()> {
        let sidecar = TombstoneSet::sidecar_path(&self.path);
        fs::remove_file(&self.path).map_err(|e| NdtsError::io(&self.path, e))?;
        if sidecar.exists() {
            fs::remove_file(&sidecar).map_err(|e| NdtsError::io(&sidecar, e))?;
        }
        Ok(())
    }
}

enum RowAction {
    Keep,
    Replace(Vec<Value>),
    Drop,
}

fn scalar_from_le(col_type: ColumnType, bytes: &[u8]) -> Value {
    match col_type {
        ColumnType::I16 => Value::Int(i16::from_le_bytes(bytes.try_into().unwrap()) as i64),
        ColumnType::I32 => Value::Int(i32::from_le_bytes(bytes.try_into().unwrap()) as i64),
        ColumnType::I64 => Value::Int(i64::from_le_bytes(bytes.try_into().unwrap())),
        ColumnType::F64 => Value::Float(f64::from_le_bytes(bytes.try_into().unwrap())),
    }
}

// --- Structured verification ---

#[derive(Debug, Clone)]
pub struct VerifyIssue {
    pub offset: u64,
    pub len: u64,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub path: PathBuf,
    pub total_rows: u64,
    pub chunk_count: u64,
    pub issues: Vec<VerifyIssue>,
}

impl VerifyReport {
    pub fn ok(&self) -> bool {
        self.issues.is_empty()
    }
}

fn issue_from(err: NdtsError) -> VerifyIssue {
    match err {
        NdtsError::Corruption {
            offset, len, reason, ..
        } => VerifyIssue {
            offset,
            len,
            reason,
        },
        other => VerifyIssue {
            offset: 0,
            len: 0,
            reason: other.to_string(),
        },
    }
}

/// Recompute the header CRC and every chunk CRC, reporting all mismatches
/// with their offsets instead of stopping at the first.
pub fn verify_file(path: impl AsRef<Path>) -> Result<VerifyReport> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| NdtsError::io(path, e))?;
    let mut report = VerifyReport {
        path: path.to_path_buf(),
        total_rows: 0,
        chunk_count: 0,
        issues: Vec::new(),
    };

    let parsed = match format::parse_header(&bytes, path) {
        Ok(parsed) => parsed,
        Err(e) => {
            report.issues.push(issue_from(e));
            return Ok(report);
        }
    };

    let (spans, tail_issue) = format::scan_chunks_tolerant(
        &mut Cursor::new(&bytes),
        bytes.len() as u64,
        parsed.chunks_start,
        &parsed.header.columns,
        parsed.header.compression.as_ref(),
        path,
    )?;
    if let Some(e) = tail_issue {
        report.issues.push(issue_from(e));
    }

    for (k, span) in spans.iter().enumerate() {
        let chunk = &bytes[span.offset as usize..span.end() as usize];
        if !format::verify_chunk_bytes(chunk) {
            report.issues.push(VerifyIssue {
                offset: span.offset,
                len: span.len(),
                reason: format!("chunk {k} CRC mismatch"),
            });
        }
        report.total_rows += span.rows as u64;
        report.chunk_count += 1;
    }

    if report.total_rows != parsed.header.total_rows
        || report.chunk_count != parsed.header.chunk_count
    {
        report.issues.push(VerifyIssue {
            offset: HEADER_PREFIX_LEN as u64,
            len: parsed.header_len as u64,
            reason: format!(
                "stale counters: header says {} rows in {} chunks, chunk stream holds {} in {}",
                parsed.header.total_rows,
                parsed.header.chunk_count,
                report.total_rows,
                report.chunk_count
            ),
        });
    }

    Ok(report)
}
