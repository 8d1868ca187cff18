//! Column schema, typed column buffers and scalar values.
//!
//! All columns are fixed-width numerics; strings live in the symbol
//! dictionary and appear in files as integer ids. A schema is immutable for
//! the lifetime of a file.

use serde::{Deserialize, Serialize};

use crate::error::{NdtsError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    #[serde(rename = "int16")]
    I16,
    #[serde(rename = "int32")]
    I32,
    #[serde(rename = "int64")]
    I64,
    #[serde(rename = "float64")]
    F64,
}

impl ColumnType {
    pub fn width(self) -> usize {
        match self {
            ColumnType::I16 => 2,
            ColumnType::I32 => 4,
            ColumnType::I64 | ColumnType::F64 => 8,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::I16 => "int16",
            ColumnType::I32 => "int32",
            ColumnType::I64 => "int64",
            ColumnType::F64 => "float64",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub col_type: ColumnType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, col_type: ColumnType) -> Self {
        ColumnDef {
            name: name.into(),
            col_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    pub columns: Vec<ColumnDef>,
}

impl Schema {
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        Schema { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Bytes per row across all columns.
    pub fn row_width(&self) -> usize {
        self.columns.iter().map(|c| c.col_type.width()).sum()
    }

    /// Whether every column of `other` is present here with the same type.
    /// Column order is not significant for containment.
    pub fn contains(&self, other: &Schema) -> bool {
        other
            .columns
            .iter()
            .all(|c| self.column(&c.name).is_some_and(|own| own.col_type == c.col_type))
    }
}

/// A scalar cell. Integer columns of any width surface as `Int`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
}

impl Value {
    /// Exact conversion to `i64`; fractional or out-of-range floats are
    /// schema errors.
    pub fn as_exact_i64(&self) -> Result<i64> {
        match *self {
            Value::Int(v) => Ok(v),
            Value::Float(f) => {
                if f.is_finite() && f.fract() == 0.0 && f >= -(2f64.powi(63)) && f < 2f64.powi(63)
                {
                    Ok(f as i64)
                } else {
                    Err(NdtsError::schema(format!(
                        "{f} is not exactly representable as int64"
                    )))
                }
            }
        }
    }

    /// Exact conversion to `f64`; integers beyond 2^53 are schema errors.
    pub fn as_exact_f64(&self) -> Result<f64> {
        match *self {
            Value::Float(f) => Ok(f),
            Value::Int(v) => {
                let f = v as f64;
                if f as i64 == v && v.abs() <= (1i64 << 53) {
                    Ok(f)
                } else {
                    Err(NdtsError::schema(format!(
                        "{v} is not exactly representable as float64"
                    )))
                }
            }
        }
    }

    /// Numeric ordering across kinds; `None` only when a NaN is involved
    /// in a cross-kind comparison.
    pub fn compare(&self, other: &Value) -> Option<std::cmp::Ordering> {
        match (*self, *other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(&b)),
            (Value::Float(a), Value::Float(b)) => Some(a.total_cmp(&b)),
            (a, b) => {
                let (a, b) = (a.as_f64_lossy(), b.as_f64_lossy());
                a.partial_cmp(&b)
            }
        }
    }

    /// Plain numeric cast, rounding large integers.
    pub fn as_f64_lossy(self) -> f64 {
        match self {
            Value::Int(v) => v as f64,
            Value::Float(f) => f,
        }
    }
}

/// Borrowed typed column data.
#[derive(Debug, Clone, Copy)]
pub enum ColumnSlice<'a> {
    I16(&'a [i16]),
    I32(&'a [i32]),
    I64(&'a [i64]),
    F64(&'a [f64]),
}

impl<'a> ColumnSlice<'a> {
    pub fn len(&self) -> usize {
        match self {
            ColumnSlice::I16(s) => s.len(),
            ColumnSlice::I32(s) => s.len(),
            ColumnSlice::I64(s) => s.len(),
            ColumnSlice::F64(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn col_type(&self) -> ColumnType {
        match self {
            ColumnSlice::I16(_) => ColumnType::I16,
            ColumnSlice::I32(_) => ColumnType::I32,
            ColumnSlice::I64(_) => ColumnType::I64,
            ColumnSlice::F64(_) => ColumnType::F64,
        }
    }

    pub fn value(&self, i: usize) -> Value {
        match self {
            ColumnSlice::I16(s) => Value::Int(s[i] as i64),
            ColumnSlice::I32(s) => Value::Int(s[i] as i64),
            ColumnSlice::I64(s) => Value::Int(s[i]),
            ColumnSlice::F64(s) => Value::Float(s[i]),
        }
    }

    /// Append the little-endian bytes of every element to `out`.
    pub fn extend_le_bytes(&self, out: &mut Vec<u8>) {
        match self {
            ColumnSlice::I16(s) => {
                for v in *s {
                    out.extend_from_slice(&v.to_le_bytes());
                }
            }
            ColumnSlice::I32(s) => {
                for v in *s {
                    out.extend_from_slice(&v.to_le_bytes());
                }
            }
            ColumnSlice::I64(s) => {
                for v in *s {
                    out.extend_from_slice(&v.to_le_bytes());
                }
            }
            ColumnSlice::F64(s) => {
                for v in *s {
                    out.extend_from_slice(&v.to_le_bytes());
                }
            }
        }
    }

    pub fn to_owned_vec(&self) -> ColumnVec {
        match self {
            ColumnSlice::I16(s) => ColumnVec::I16(s.to_vec()),
            ColumnSlice::I32(s) => ColumnVec::I32(s.to_vec()),
            ColumnSlice::I64(s) => ColumnVec::I64(s.to_vec()),
            ColumnSlice::F64(s) => ColumnVec::F64(s.to_vec()),
        }
    }

    /// Select the elements at `idx`, yielding an owned column.
    pub fn gather(&self, idx: &[u32]) -> ColumnVec {
        match self {
            ColumnSlice::I16(s) => ColumnVec::I16(ndts_core::sort::gather(s, idx)),
            ColumnSlice::I32(s) => ColumnVec::I32(ndts_core::sort::gather(s, idx)),
            ColumnSlice::I64(s) => ColumnVec::I64(ndts_core::sort::gather(s, idx)),
            ColumnSlice::F64(s) => ColumnVec::F64(ndts_core::sort::gather(s, idx)),
        }
    }
}

/// Owned typed column data.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnVec {
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F64(Vec<f64>),
}

impl ColumnVec {
    pub fn with_capacity(col_type: ColumnType, capacity: usize) -> Self {
        match col_type {
            ColumnType::I16 => ColumnVec::I16(Vec::with_capacity(capacity)),
            ColumnType::I32 => ColumnVec::I32(Vec::with_capacity(capacity)),
            ColumnType::I64 => ColumnVec::I64(Vec::with_capacity(capacity)),
            ColumnType::F64 => ColumnVec::F64(Vec::with_capacity(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn col_type(&self) -> ColumnType {
        self.as_slice().col_type()
    }

    pub fn as_slice(&self) -> ColumnSlice<'_> {
        match self {
            ColumnVec::I16(v) => ColumnSlice::I16(v),
            ColumnVec::I32(v) => ColumnSlice::I32(v),
            ColumnVec::I64(v) => ColumnSlice::I64(v),
            ColumnVec::F64(v) => ColumnSlice::F64(v),
        }
    }

    pub fn value(&self, i: usize) -> Value {
        self.as_slice().value(i)
    }

    /// Append a scalar, coercing exactly; lossy coercions are schema
    /// errors and leave the column unchanged.
    pub fn push_value(&mut self, value: Value) -> Result<()> {
        match self {
            ColumnVec::I16(v) => {
                let n = value.as_exact_i64()?;
                let n = i16::try_from(n)
                    .map_err(|_| NdtsError::schema(format!("{n} does not fit in int16")))?;
                v.push(n);
            }
            ColumnVec::I32(v) => {
                let n = value.as_exact_i64()?;
                let n = i32::try_from(n)
                    .map_err(|_| NdtsError::schema(format!("{n} does not fit in int32")))?;
                v.push(n);
            }
            ColumnVec::I64(v) => v.push(value.as_exact_i64()?),
            ColumnVec::F64(v) => v.push(value.as_exact_f64()?),
        }
        Ok(())
    }

    pub fn extend_from(&mut self, other: &ColumnVec) -> Result<()> {
        match (self, other) {
            (ColumnVec::I16(a), ColumnVec::I16(b)) => a.extend_from_slice(b),
            (ColumnVec::I32(a), ColumnVec::I32(b)) => a.extend_from_slice(b),
            (ColumnVec::I64(a), ColumnVec::I64(b)) => a.extend_from_slice(b),
            (ColumnVec::F64(a), ColumnVec::F64(b)) => a.extend_from_slice(b),
            (a, b) => {
                return Err(NdtsError::schema(format!(
                    "cannot extend {} column with {} data",
                    a.col_type().as_str(),
                    b.col_type().as_str()
                )));
            }
        }
        Ok(())
    }

    pub fn truncate(&mut self, len: usize) {
        match self {
            ColumnVec::I16(v) => v.truncate(len),
            ColumnVec::I32(v) => v.truncate(len),
            ColumnVec::I64(v) => v.truncate(len),
            ColumnVec::F64(v) => v.truncate(len),
        }
    }

    /// Decode `rows` little-endian elements from raw column bytes.
    pub fn from_le_bytes(col_type: ColumnType, bytes: &[u8], rows: usize) -> Option<ColumnVec> {
        if bytes.len() != rows * col_type.width() {
            return None;
        }
        Some(match col_type {
            ColumnType::I16 => ColumnVec::I16(
                bytes
                    .chunks_exact(2)
                    .map(|b| i16::from_le_bytes([b[0], b[1]]))
                    .collect(),
            ),
            ColumnType::I32 => ColumnVec::I32(
                bytes
                    .chunks_exact(4)
                    .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect(),
            ),
            ColumnType::I64 => ColumnVec::I64(
                bytes
                    .chunks_exact(8)
                    .map(|b| i64::from_le_bytes(b.try_into().unwrap()))
                    .collect(),
            ),
            ColumnType::F64 => ColumnVec::F64(
                bytes
                    .chunks_exact(8)
                    .map(|b| f64::from_le_bytes(b.try_into().unwrap()))
                    .collect(),
            ),
        })
    }

    pub fn as_i64(&self) -> Option<&[i64]> {
        match self {
            ColumnVec::I64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<&[f64]> {
        match self {
            ColumnVec::F64(v) => Some(v),
            _ => None,
        }
    }
}
