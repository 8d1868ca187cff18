//! On-disk layout of an append-only chunked file.
//!
//! ```text
//! +------------------------------------------------+
//! | magic  "NDTS"                    4 bytes       |
//! | header_len (u32 LE)              4 bytes       |
//! | header_json                      header_len    |
//! | padding to 8-byte boundary       0..7 bytes    |
//! | header_crc32 (u32 LE)            4 bytes       |
//! +------------------------------------------------+   <- chunks start
//! | chunk: row_count (u32 LE)        4 bytes       |
//! |        col_0 bytes | col_1 ...                 |
//! |        chunk_crc32 (u32 LE)      4 bytes       |
//! +------------------------------------------------+
//! ```
//!
//! The header JSON carries `columns`, `totalRows`, `chunkCount` and the
//! optional `compression` plan. Its region is reserved at creation (sized
//! for the counters at full width, rounded to 8 bytes) and space-padded, so
//! the in-place rewrite on every append re-emits a block of identical size
//! and the first column of the first chunk stays 8-byte aligned. The header
//! CRC covers the `header_len` JSON bytes, padding spaces included.
//!
//! Columns under a compression plan are stored per chunk as a `u32 LE`
//! length followed by the codec output; unplanned columns are raw `rows *
//! width` little-endian values. The chunk CRC covers every byte from the
//! row count up to the CRC itself.

use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use ndts_core::{crc32, delta, gorilla};
use serde::{Deserialize, Serialize};

use crate::error::{NdtsError, Result};
use crate::schema::{ColumnDef, ColumnSlice, ColumnType, ColumnVec, Schema};

pub const MAGIC: [u8; 4] = *b"NDTS";
pub const MAX_HEADER_LEN: u32 = 16 * 1024 * 1024;

/// Magic plus the header length field.
pub const HEADER_PREFIX_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Gorilla,
    Delta,
    Rle,
}

/// Column name -> codec. Fixed at file creation.
pub type CompressionPlan = BTreeMap<String, Codec>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileHeader {
    pub columns: Schema,
    #[serde(rename = "totalRows")]
    pub total_rows: u64,
    #[serde(rename = "chunkCount")]
    pub chunk_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<CompressionPlan>,
}

impl FileHeader {
    pub fn new(columns: Schema, compression: Option<CompressionPlan>) -> Self {
        FileHeader {
            columns,
            total_rows: 0,
            chunk_count: 0,
            compression,
        }
    }

    pub fn codec_for(&self, column: &str) -> Option<Codec> {
        self.compression.as_ref().and_then(|p| p.get(column).copied())
    }
}

/// Check a compression plan against the schema it will apply to: every
/// planned column must exist, gorilla is float64-only, delta and RLE are
/// int64-only.
pub fn validate_plan(schema: &Schema, plan: &CompressionPlan) -> Result<()> {
    for (name, codec) in plan {
        let def = schema
            .column(name)
            .ok_or_else(|| NdtsError::schema(format!("compression plan names unknown column {name}")))?;
        let ok = match codec {
            Codec::Gorilla => def.col_type == ColumnType::F64,
            Codec::Delta | Codec::Rle => def.col_type == ColumnType::I64,
        };
        if !ok {
            return Err(NdtsError::schema(format!(
                "codec {codec:?} cannot encode {} column {name}",
                def.col_type.as_str()
            )));
        }
    }
    Ok(())
}

// --- Header block ---

/// Size of the reserved JSON region for this header's schema and plan:
/// large enough for both counters at their widest, rounded up to 8 bytes.
pub fn reserved_header_len(header: &FileHeader) -> Result<u32> {
    let mut probe = header.clone();
    probe.total_rows = u64::MAX;
    probe.chunk_count = u64::MAX;
    let len = serde_json::to_vec(&probe)
        .map_err(|e| NdtsError::state(format!("header serialization failed: {e}")))?
        .len()
        .next_multiple_of(8);
    if len > MAX_HEADER_LEN as usize {
        return Err(NdtsError::schema(format!(
            "header of {len} bytes exceeds the 16 MiB limit"
        )));
    }
    Ok(len as u32)
}

fn align_pad(header_len: u32) -> usize {
    (HEADER_PREFIX_LEN + header_len as usize).next_multiple_of(8)
        - (HEADER_PREFIX_LEN + header_len as usize)
}

/// First chunk offset for a given reserved header length.
pub fn chunks_start(header_len: u32) -> u64 {
    (HEADER_PREFIX_LEN + header_len as usize + align_pad(header_len) + 4) as u64
}

/// Emit the complete header block: magic, length, space-padded JSON,
/// alignment padding, CRC. Identical `reserved` in, identical size out.
pub fn encode_header_block(header: &FileHeader, reserved: u32) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(header)
        .map_err(|e| NdtsError::state(format!("header serialization failed: {e}")))?;
    if json.len() > reserved as usize {
        return Err(NdtsError::state(format!(
            "header of {} bytes exceeds its reserved {reserved} bytes",
            json.len()
        )));
    }

    let mut block = Vec::with_capacity(chunks_start(reserved) as usize);
    block.extend_from_slice(&MAGIC);
    block.extend_from_slice(&reserved.to_le_bytes());
    block.extend_from_slice(&json);
    block.resize(HEADER_PREFIX_LEN + reserved as usize, b' ');

    let crc = crc32::checksum(&block[HEADER_PREFIX_LEN..]);
    block.resize(block.len() + align_pad(reserved), 0);
    block.extend_from_slice(&crc.to_le_bytes());
    Ok(block)
}

#[derive(Debug)]
pub struct ParsedHeader {
    pub header: FileHeader,
    pub header_len: u32,
    pub chunks_start: u64,
}

pub fn parse_header(bytes: &[u8], path: &Path) -> Result<ParsedHeader> {
    if bytes.len() < HEADER_PREFIX_LEN {
        return Err(NdtsError::corruption(
            path,
            0,
            bytes.len() as u64,
            "file too small for a header",
        ));
    }
    if bytes[..4] != MAGIC {
        return Err(NdtsError::corruption(path, 0, 4, "bad magic"));
    }
    let header_len = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    if header_len > MAX_HEADER_LEN {
        return Err(NdtsError::corruption(
            path,
            4,
            4,
            format!("header length {header_len} exceeds the 16 MiB limit"),
        ));
    }
    let start = chunks_start(header_len) as usize;
    if bytes.len() < start {
        return Err(NdtsError::corruption(
            path,
            0,
            bytes.len() as u64,
            "truncated header",
        ));
    }

    let json = &bytes[HEADER_PREFIX_LEN..HEADER_PREFIX_LEN + header_len as usize];
    let stored_crc = u32::from_le_bytes(bytes[start - 4..start].try_into().unwrap());
    let computed = crc32::checksum(json);
    if stored_crc != computed {
        return Err(NdtsError::corruption(
            path,
            HEADER_PREFIX_LEN as u64,
            header_len as u64,
            format!("header CRC mismatch: stored {stored_crc:#010x}, computed {computed:#010x}"),
        ));
    }

    let header: FileHeader = serde_json::from_slice(json).map_err(|e| {
        NdtsError::corruption(
            path,
            HEADER_PREFIX_LEN as u64,
            header_len as u64,
            format!("invalid header JSON: {e}"),
        )
    })?;
    if let Some(plan) = &header.compression {
        validate_plan(&header.columns, plan)?;
    }

    Ok(ParsedHeader {
        header,
        header_len,
        chunks_start: start as u64,
    })
}

// --- Chunks ---

#[derive(Debug, Clone)]
pub struct ChunkSpan {
    /// Absolute offset of the row count.
    pub offset: u64,
    pub rows: u32,
    /// Absolute (offset, stored length) of each column's bytes.
    pub cols: Vec<(u64, u64)>,
    /// Absolute offset of the chunk CRC.
    pub crc_offset: u64,
}

impl ChunkSpan {
    pub fn end(&self) -> u64 {
        self.crc_offset + 4
    }

    pub fn len(&self) -> u64 {
        self.end() - self.offset
    }
}

/// Encode one chunk: row count, column bytes in schema order, CRC.
pub fn encode_chunk(
    schema: &Schema,
    plan: Option<&CompressionPlan>,
    cols: &[ColumnSlice<'_>],
) -> Result<Vec<u8>> {
    let rows = cols.first().map_or(0, |c| c.len());
    let mut buf = Vec::with_capacity(4 + rows * schema.row_width() + 4);
    buf.extend_from_slice(&(rows as u32).to_le_bytes());

    for (def, &col) in schema.columns.iter().zip(cols) {
        match plan.and_then(|p| p.get(&def.name).copied()) {
            None => col.extend_le_bytes(&mut buf),
            Some(Codec::Gorilla) => {
                let ColumnSlice::F64(values) = col else {
                    return Err(NdtsError::schema(format!(
                        "gorilla plan on non-float64 column {}",
                        def.name
                    )));
                };
                let encoded = gorilla::compress(values);
                buf.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
                buf.extend_from_slice(&encoded);
            }
            Some(codec @ (Codec::Delta | Codec::Rle)) => {
                let ColumnSlice::I64(values) = col else {
                    return Err(NdtsError::schema(format!(
                        "{codec:?} plan on non-int64 column {}",
                        def.name
                    )));
                };
                let encoded = match codec {
                    Codec::Delta => delta::compress(values),
                    _ => delta::rle_compress(values),
                };
                buf.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
                buf.extend_from_slice(&encoded);
            }
        }
    }

    let crc = crc32::checksum(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    Ok(buf)
}

/// Walk the chunk stream from `chunks_start` to `file_len`, recording every
/// chunk's layout without reading column data. O(chunkCount) reads.
pub fn scan_chunks<R: Read + Seek>(
    r: &mut R,
    file_len: u64,
    chunks_start: u64,
    schema: &Schema,
    plan: Option<&CompressionPlan>,
    path: &Path,
) -> Result<Vec<ChunkSpan>> {
    let (spans, issue) = scan_chunks_tolerant(r, file_len, chunks_start, schema, plan, path)?;
    match issue {
        Some(e) => Err(e),
        None => Ok(spans),
    }
}

/// Like [`scan_chunks`], but a malformed tail stops the walk and comes back
/// alongside the valid prefix instead of discarding it. I/O failures still
/// error out.
pub fn scan_chunks_tolerant<R: Read + Seek>(
    r: &mut R,
    file_len: u64,
    chunks_start: u64,
    schema: &Schema,
    plan: Option<&CompressionPlan>,
    path: &Path,
) -> Result<(Vec<ChunkSpan>, Option<NdtsError>)> {
    let mut spans = Vec::new();
    let mut pos = chunks_start;
    r.seek(SeekFrom::Start(pos))
        .map_err(|e| NdtsError::io(path, e))?;

    while pos < file_len {
        let chunk_off = pos;
        let truncated = |reason: String| {
            NdtsError::corruption(path, chunk_off, file_len - chunk_off, reason)
        };

        if file_len - pos < 4 {
            return Ok((spans, Some(truncated("truncated tail: incomplete row count".into()))));
        }
        let mut word = [0u8; 4];
        r.read_exact(&mut word).map_err(|e| NdtsError::io(path, e))?;
        let rows = u32::from_le_bytes(word);
        pos += 4;
        if rows == 0 {
            let e = NdtsError::corruption(path, chunk_off, 4, "zero-row chunk");
            return Ok((spans, Some(e)));
        }

        let mut cols = Vec::with_capacity(schema.len());
        for def in &schema.columns {
            let stored_len = match plan.and_then(|p| p.get(&def.name)) {
                None => rows as u64 * def.col_type.width() as u64,
                Some(_) => {
                    if file_len - pos < 4 {
                        let e = truncated(format!(
                            "truncated tail: missing length of column {}",
                            def.name
                        ));
                        return Ok((spans, Some(e)));
                    }
                    r.read_exact(&mut word).map_err(|e| NdtsError::io(path, e))?;
                    pos += 4;
                    u32::from_le_bytes(word) as u64
                }
            };
            if file_len - pos < stored_len {
                let e = truncated(format!("truncated tail in column {}", def.name));
                return Ok((spans, Some(e)));
            }
            cols.push((pos, stored_len));
            pos += stored_len;
            r.seek(SeekFrom::Start(pos))
                .map_err(|e| NdtsError::io(path, e))?;
        }

        if file_len - pos < 4 {
            return Ok((spans, Some(truncated("truncated tail: missing chunk CRC".into()))));
        }
        let crc_offset = pos;
        pos += 4;
        r.seek(SeekFrom::Start(pos))
            .map_err(|e| NdtsError::io(path, e))?;

        spans.push(ChunkSpan {
            offset: chunk_off,
            rows,
            cols,
            crc_offset,
        });
    }

    Ok((spans, None))
}

/// Verify a chunk given its own bytes (row count through CRC).
pub fn verify_chunk_bytes(chunk: &[u8]) -> bool {
    if chunk.len() < 8 {
        return false;
    }
    let (data, crc) = chunk.split_at(chunk.len() - 4);
    crc32::checksum(data) == u32::from_le_bytes(crc.try_into().unwrap())
}

/// Decode one column's stored bytes into an owned typed buffer.
pub fn decode_column(
    def: &ColumnDef,
    codec: Option<Codec>,
    stored: &[u8],
    rows: usize,
    path: &Path,
    offset: u64,
) -> Result<ColumnVec> {
    let corrupt = |reason: String| {
        NdtsError::corruption(path, offset, stored.len() as u64, reason)
    };
    match codec {
        None => ColumnVec::from_le_bytes(def.col_type, stored, rows).ok_or_else(|| {
            corrupt(format!(
                "column {} holds {} bytes, expected {}",
                def.name,
                stored.len(),
                rows * def.col_type.width()
            ))
        }),
        Some(Codec::Gorilla) => gorilla::decompress(stored, rows)
            .map(ColumnVec::F64)
            .map_err(|e| corrupt(format!("column {}: {e}", def.name))),
        Some(Codec::Delta) => delta::decompress(stored, rows)
            .map(ColumnVec::I64)
            .map_err(|e| corrupt(format!("column {}: {e}", def.name))),
        Some(Codec::Rle) => delta::rle_decompress(stored, rows)
            .map(ColumnVec::I64)
            .map_err(|e| corrupt(format!("column {}: {e}", def.name))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDef;
    use std::io::Cursor;
    use std::path::PathBuf;

    fn schema() -> Schema {
        Schema::new(vec![
            ColumnDef::new("ts", ColumnType::I64),
            ColumnDef::new("px", ColumnType::F64),
        ])
    }

    fn path() -> PathBuf {
        PathBuf::from("test.ndts")
    }

    #[test]
    fn test_header_block_roundtrip() {
        let header = FileHeader::new(schema(), None);
        let reserved = reserved_header_len(&header).unwrap();
        let block = encode_header_block(&header, reserved).unwrap();
        assert_eq!(block.len() as u64, chunks_start(reserved));

        let parsed = parse_header(&block, &path()).unwrap();
        assert_eq!(parsed.header_len, reserved);
        assert_eq!(parsed.header.columns, schema());
        assert_eq!(parsed.header.total_rows, 0);
    }

    #[test]
    fn test_header_rewrite_is_same_size() {
        let mut header = FileHeader::new(schema(), None);
        let reserved = reserved_header_len(&header).unwrap();
        let a = encode_header_block(&header, reserved).unwrap();
        header.total_rows = u64::MAX;
        header.chunk_count = 12_345_678;
        let b = encode_header_block(&header, reserved).unwrap();
        assert_eq!(a.len(), b.len());
    }

    #[test]
    fn test_chunk_origin_keeps_first_column_aligned() {
        let header = FileHeader::new(schema(), None);
        let reserved = reserved_header_len(&header).unwrap();
        // First column data sits 4 bytes past the chunk origin.
        assert_eq!((chunks_start(reserved) + 4) % 8, 0);
    }

    #[test]
    fn test_parse_rejects_bad_magic_and_crc() {
        let header = FileHeader::new(schema(), None);
        let reserved = reserved_header_len(&header).unwrap();
        let block = encode_header_block(&header, reserved).unwrap();

        let mut bad_magic = block.clone();
        bad_magic[0] = b'X';
        assert!(matches!(
            parse_header(&bad_magic, &path()),
            Err(NdtsError::Corruption { offset: 0, .. })
        ));

        let mut bad_json = block.clone();
        bad_json[HEADER_PREFIX_LEN + 1] ^= 0x20;
        assert!(matches!(
            parse_header(&bad_json, &path()),
            Err(NdtsError::Corruption { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_oversized_header() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC);
        bytes.extend_from_slice(&(MAX_HEADER_LEN + 1).to_le_bytes());
        bytes.resize(64, 0);
        let err = parse_header(&bytes, &path()).unwrap_err();
        assert!(err.to_string().contains("16 MiB"));
    }

    #[test]
    fn test_chunk_encode_scan_decode() {
        let s = schema();
        let ts = [1000i64, 1001, 1002];
        let px = [100.5f64, 101.0, 102.3];
        let chunk = encode_chunk(
            &s,
            None,
            &[ColumnSlice::I64(&ts), ColumnSlice::F64(&px)],
        )
        .unwrap();
        assert!(verify_chunk_bytes(&chunk));
        assert_eq!(chunk.len(), 4 + 3 * 16 + 4);

        let spans = scan_chunks(
            &mut Cursor::new(&chunk),
            chunk.len() as u64,
            0,
            &s,
            None,
            &path(),
        )
        .unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].rows, 3);
        assert_eq!(spans[0].cols, vec![(4, 24), (28, 24)]);

        let (off, len) = spans[0].cols[1];
        let col = decode_column(
            &s.columns[1],
            None,
            &chunk[off as usize..(off + len) as usize],
            3,
            &path(),
            off,
        )
        .unwrap();
        assert_eq!(col, ColumnVec::F64(px.to_vec()));
    }

    #[test]
    fn test_compressed_chunk_roundtrip() {
        let s = schema();
        let mut plan = CompressionPlan::new();
        plan.insert("ts".into(), Codec::Delta);
        plan.insert("px".into(), Codec::Gorilla);
        validate_plan(&s, &plan).unwrap();

        let ts: Vec<i64> = (0..500).map(|i| 1_000_000 + i * 60).collect();
        let px: Vec<f64> = (0..500).map(|i| 100.0 + (i % 7) as f64 * 0.25).collect();
        let chunk = encode_chunk(
            &s,
            Some(&plan),
            &[ColumnSlice::I64(&ts), ColumnSlice::F64(&px)],
        )
        .unwrap();
        assert!(chunk.len() < 500 * 16);

        let spans = scan_chunks(
            &mut Cursor::new(&chunk),
            chunk.len() as u64,
            0,
            &s,
            Some(&plan),
            &path(),
        )
        .unwrap();
        let (off, len) = spans[0].cols[0];
        let col = decode_column(
            &s.columns[0],
            Some(Codec::Delta),
            &chunk[off as usize..(off + len) as usize],
            500,
            &path(),
            off,
        )
        .unwrap();
        assert_eq!(col.as_i64().unwrap(), ts.as_slice());
    }

    #[test]
    fn test_plan_validation() {
        let s = schema();
        let mut plan = CompressionPlan::new();
        plan.insert("px".into(), Codec::Delta);
        assert!(validate_plan(&s, &plan).is_err());
        plan.clear();
        plan.insert("missing".into(), Codec::Rle);
        assert!(validate_plan(&s, &plan).is_err());
    }

    #[test]
    fn test_truncated_tail_detected() {
        let s = schema();
        let chunk = encode_chunk(
            &s,
            None,
            &[ColumnSlice::I64(&[1, 2]), ColumnSlice::F64(&[0.5, 1.5])],
        )
        .unwrap();
        let cut = &chunk[..chunk.len() - 6];
        let err = scan_chunks(
            &mut Cursor::new(cut),
            cut.len() as u64,
            0,
            &s,
            None,
            &path(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("truncated tail"));
    }
}
