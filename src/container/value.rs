//! Typed values stored in datasets and attributes.
//!
//! Datasets hold records of a fixed [`RecordType`]; each field is stored in its
//! own [`Column`]. Single-valued arrays (such as the crossbar raster) use a
//! record type with one field.

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// Primitive element type of a dataset field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    F32,
    F64,
    I32,
    I64,
    U32,
    U64,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FieldKind::F32 => "f32",
            FieldKind::F64 => "f64",
            FieldKind::I32 => "i32",
            FieldKind::I64 => "i64",
            FieldKind::U32 => "u32",
            FieldKind::U64 => "u64",
        };
        write!(f, "{}", label)
    }
}

/// A single element of a dataset field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Value {
    F32(f32),
    F64(f64),
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
}

impl Value {
    pub fn kind(&self) -> FieldKind {
        match self {
            Value::F32(_) => FieldKind::F32,
            Value::F64(_) => FieldKind::F64,
            Value::I32(_) => FieldKind::I32,
            Value::I64(_) => FieldKind::I64,
            Value::U32(_) => FieldKind::U32,
            Value::U64(_) => FieldKind::U64,
        }
    }

    /// Lossy widening to `f64`, convenient for plotting and ratios.
    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::F32(v) => f64::from(v),
            Value::F64(v) => v,
            Value::I32(v) => f64::from(v),
            Value::I64(v) => v as f64,
            Value::U32(v) => f64::from(v),
            Value::U64(v) => v as f64,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match *self {
            Value::F32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match *self {
            Value::U32(v) => Some(v),
            _ => None,
        }
    }
}

macro_rules! impl_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_value_from!(f32 => F32, f64 => F64, i32 => I32, i64 => I64, u32 => U32, u64 => U64);

/// A named field of a record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
}

/// Ordered list of named, typed fields describing one dataset row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordType {
    fields: Vec<Field>,
}

impl RecordType {
    /// Build a record type from `(name, kind)` pairs.
    pub fn new<S: Into<String>>(fields: impl IntoIterator<Item = (S, FieldKind)>) -> Self {
        Self {
            fields: fields
                .into_iter()
                .map(|(name, kind)| Field {
                    name: name.into(),
                    kind,
                })
                .collect(),
        }
    }

    /// Single anonymous field, used for plain numeric arrays.
    pub fn scalar(kind: FieldKind) -> Self {
        Self::new([("value", kind)])
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Check that `record` has one value of the right kind per field.
    pub fn check(&self, record: &Record) -> StoreResult<()> {
        if record.values().len() != self.fields.len() {
            return Err(StoreError::Dims(format!(
                "record has {} fields, expected {}",
                record.values().len(),
                self.fields.len()
            )));
        }
        for (field, value) in self.fields.iter().zip(record.values()) {
            if field.kind != value.kind() {
                return Err(StoreError::Dims(format!(
                    "field '{}' expects {}, got {}",
                    field.name,
                    field.kind,
                    value.kind()
                )));
            }
        }
        Ok(())
    }
}

/// One row of a dataset, in record-type field order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record(Vec<Value>);

impl Record {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.0.get(index).copied()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.0
    }
}

impl From<Vec<Value>> for Record {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

/// Column-wise storage of one dataset field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Column {
    F32(Vec<f32>),
    F64(Vec<f64>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    U32(Vec<u32>),
    U64(Vec<u64>),
}

macro_rules! each_column {
    ($self:expr, $v:ident => $body:expr) => {
        match $self {
            Column::F32($v) => $body,
            Column::F64($v) => $body,
            Column::I32($v) => $body,
            Column::I64($v) => $body,
            Column::U32($v) => $body,
            Column::U64($v) => $body,
        }
    };
}

impl Column {
    /// Zero-filled column of `len` elements.
    pub fn zeroed(kind: FieldKind, len: usize) -> Self {
        match kind {
            FieldKind::F32 => Column::F32(vec![0.0; len]),
            FieldKind::F64 => Column::F64(vec![0.0; len]),
            FieldKind::I32 => Column::I32(vec![0; len]),
            FieldKind::I64 => Column::I64(vec![0; len]),
            FieldKind::U32 => Column::U32(vec![0; len]),
            FieldKind::U64 => Column::U64(vec![0; len]),
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            Column::F32(_) => FieldKind::F32,
            Column::F64(_) => FieldKind::F64,
            Column::I32(_) => FieldKind::I32,
            Column::I64(_) => FieldKind::I64,
            Column::U32(_) => FieldKind::U32,
            Column::U64(_) => FieldKind::U64,
        }
    }

    pub fn len(&self) -> usize {
        each_column!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grow or shrink to `len` elements, zero-filling new slots.
    pub fn resize(&mut self, len: usize) {
        each_column!(self, v => v.resize(len, Default::default()))
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        match self {
            Column::F32(v) => v.get(index).map(|x| Value::F32(*x)),
            Column::F64(v) => v.get(index).map(|x| Value::F64(*x)),
            Column::I32(v) => v.get(index).map(|x| Value::I32(*x)),
            Column::I64(v) => v.get(index).map(|x| Value::I64(*x)),
            Column::U32(v) => v.get(index).map(|x| Value::U32(*x)),
            Column::U64(v) => v.get(index).map(|x| Value::U64(*x)),
        }
    }

    /// Overwrite one element. The value kind must match the column kind.
    pub fn set(&mut self, index: usize, value: Value) -> StoreResult<()> {
        let len = self.len();
        let kind = self.kind();
        let slot_missing =
            || StoreError::Dims(format!("element {} outside column of length {}", index, len));
        match (self, value) {
            (Column::F32(v), Value::F32(x)) => *v.get_mut(index).ok_or_else(slot_missing)? = x,
            (Column::F64(v), Value::F64(x)) => *v.get_mut(index).ok_or_else(slot_missing)? = x,
            (Column::I32(v), Value::I32(x)) => *v.get_mut(index).ok_or_else(slot_missing)? = x,
            (Column::I64(v), Value::I64(x)) => *v.get_mut(index).ok_or_else(slot_missing)? = x,
            (Column::U32(v), Value::U32(x)) => *v.get_mut(index).ok_or_else(slot_missing)? = x,
            (Column::U64(v), Value::U64(x)) => *v.get_mut(index).ok_or_else(slot_missing)? = x,
            (_, value) => {
                return Err(StoreError::Dims(format!(
                    "cannot store {} in a {} column",
                    value.kind(),
                    kind
                )))
            }
        }
        Ok(())
    }

    /// Copy of the elements in `range`.
    pub fn slice(&self, range: Range<usize>) -> StoreResult<Column> {
        if range.end > self.len() || range.start > range.end {
            return Err(StoreError::Dims(format!(
                "range {:?} outside column of length {}",
                range,
                self.len()
            )));
        }
        Ok(match self {
            Column::F32(v) => Column::F32(v[range].to_vec()),
            Column::F64(v) => Column::F64(v[range].to_vec()),
            Column::I32(v) => Column::I32(v[range].to_vec()),
            Column::I64(v) => Column::I64(v[range].to_vec()),
            Column::U32(v) => Column::U32(v[range].to_vec()),
            Column::U64(v) => Column::U64(v[range].to_vec()),
        })
    }

    /// Overwrite `src.len()` elements starting at `start`.
    pub fn copy_from(&mut self, start: usize, src: &Column) -> StoreResult<()> {
        let end = start + src.len();
        if end > self.len() {
            return Err(StoreError::Dims(format!(
                "write of {} elements at {} exceeds column of length {}",
                src.len(),
                start,
                self.len()
            )));
        }
        match (self, src) {
            (Column::F32(d), Column::F32(s)) => d[start..end].copy_from_slice(s),
            (Column::F64(d), Column::F64(s)) => d[start..end].copy_from_slice(s),
            (Column::I32(d), Column::I32(s)) => d[start..end].copy_from_slice(s),
            (Column::I64(d), Column::I64(s)) => d[start..end].copy_from_slice(s),
            (Column::U32(d), Column::U32(s)) => d[start..end].copy_from_slice(s),
            (Column::U64(d), Column::U64(s)) => d[start..end].copy_from_slice(s),
            (d, s) => {
                return Err(StoreError::Dims(format!(
                    "cannot write {} data into a {} column",
                    s.kind(),
                    d.kind()
                )))
            }
        }
        Ok(())
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            Column::F32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<&[u32]> {
        match self {
            Column::U32(v) => Some(v),
            _ => None,
        }
    }
}

/// Small typed metadata value attached to a group or dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    /// List of `(word, bit)` coordinate pairs.
    Coords(Vec<(u32, u32)>),
}

impl AttrValue {
    /// Integer view, accepting both signed and unsigned storage.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            AttrValue::UInt(v) => Some(v),
            AttrValue::Int(v) => u64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            AttrValue::Int(v) => Some(v),
            AttrValue::UInt(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_coords(&self) -> Option<&[(u32, u32)]> {
        match self {
            AttrValue::Coords(c) => Some(c),
            _ => None,
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Str(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Str(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Float(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<u64> for AttrValue {
    fn from(value: u64) -> Self {
        AttrValue::UInt(value)
    }
}
