//! Table handles and growable-table bookkeeping.
//!
//! A growable table distinguishes its *logical length* (`NROWS`, the number of
//! rows written so far) from its *physical capacity* (rows allocated in the
//! container). Appends never write past capacity: when a write would not fit,
//! capacity is first grown to the smallest `BASE_SIZE · 2^k` that holds it, in
//! a single resize. Rows beyond the logical length are slack and never read.

use super::schema::{self, ATTR_BASE_SIZE, ATTR_CROSSPOINTS, ATTR_NROWS, ATTR_TSTAMP};
use super::Coordinate;
use crate::container::{path, AttrValue, Column, Container, DatasetLayout, Record, RecordType};
use crate::error::{StoreError, StoreResult};
use tracing::debug;

/// Smallest `base · 2^k` (k ≥ 0) that is at least `required`. A zero base is
/// treated as one.
pub fn grown_capacity(base: usize, required: usize) -> usize {
    let mut capacity = base.max(1);
    while capacity < required {
        capacity = capacity.saturating_mul(2);
    }
    capacity
}

/// A dataset handle that knows how to append to itself.
///
/// Returned by table creation and lookup calls; borrows the store for as long
/// as it is alive.
pub struct Table<'s> {
    container: &'s mut dyn Container,
    path: String,
    layout: DatasetLayout,
}

impl std::fmt::Debug for Table<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("path", &self.path)
            .field("layout", &self.layout)
            .finish()
    }
}

impl<'s> Table<'s> {
    /// Handle for the dataset at `path`.
    pub(crate) fn open(container: &'s mut dyn Container, path: &str) -> StoreResult<Self> {
        let path = path::normalize(path);
        let layout = container.layout(&path)?;
        Ok(Self {
            container,
            path,
            layout,
        })
    }

    /// Absolute path of the dataset.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        path::basename(&self.path)
    }

    pub fn record_type(&self) -> &RecordType {
        &self.layout.record_type
    }

    pub fn shape(&self) -> &[usize] {
        &self.layout.shape
    }

    pub fn is_growable(&self) -> bool {
        self.layout.resizable
    }

    /// Allocated rows.
    pub fn capacity(&self) -> usize {
        self.layout.rows()
    }

    /// Rows written through `append` so far.
    pub fn len(&self) -> StoreResult<usize> {
        Ok(self
            .container
            .attr(&self.path, ATTR_NROWS)?
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize)
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Growth base recorded on the dataset, or the store default.
    pub fn base_size(&self) -> StoreResult<usize> {
        Ok(self
            .container
            .attr(&self.path, ATTR_BASE_SIZE)?
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(schema::DEFAULT_BASE_SIZE))
    }

    /// Cells this table was recorded against.
    pub fn coordinates(&self) -> StoreResult<Vec<Coordinate>> {
        Ok(self
            .container
            .attr(&self.path, ATTR_CROSSPOINTS)?
            .and_then(|v| v.as_coords().map(|c| c.iter().map(|&p| p.into()).collect()))
            .unwrap_or_default())
    }

    /// Creation timestamp in nanoseconds, if the table was timestamped.
    pub fn timestamp(&self) -> StoreResult<Option<u64>> {
        Ok(self
            .container
            .attr(&self.path, ATTR_TSTAMP)?
            .and_then(|v| v.as_u64()))
    }

    pub fn attr(&self, name: &str) -> StoreResult<Option<AttrValue>> {
        self.container.attr(&self.path, name)
    }

    /// Attach experiment metadata (e.g. the read-out voltage used).
    pub fn set_attr(&mut self, name: &str, value: impl Into<AttrValue>) -> StoreResult<()> {
        self.container.set_attr(&self.path, name, value.into())
    }

    /// Append one row at the logical end.
    pub fn append(&mut self, record: Record) -> StoreResult<()> {
        self.append_rows(std::slice::from_ref(&record))
    }

    /// Append rows at the logical end, growing capacity at most once.
    ///
    /// `records` holds whole rows: for a table whose rows span several
    /// elements, its length must be a multiple of the row width. The logical
    /// length counts rows.
    pub fn append_rows(&mut self, records: &[Record]) -> StoreResult<()> {
        let stride = self.layout.row_stride();
        if stride == 0 || records.len() % stride != 0 {
            return Err(StoreError::Dims(format!(
                "cannot append {} elements to {}: table of shape {:?} takes rows of {}",
                records.len(),
                self.path,
                self.layout.shape,
                stride
            )));
        }
        for record in records {
            self.layout.record_type.check(record)?;
        }
        if records.is_empty() {
            return Ok(());
        }

        let start = self.len()?;
        let appended = records.len() / stride;
        let required = start.checked_add(appended).ok_or_else(|| self.overflow(start))?;
        if required > self.capacity() {
            if !self.layout.resizable {
                return Err(StoreError::Dims(format!(
                    "table {} holds {} rows, cannot append {} more after row {}",
                    self.path,
                    self.capacity(),
                    appended,
                    start
                )));
            }
            let new_capacity = grown_capacity(self.base_size()?, required);
            debug!(
                table = %self.path,
                from = self.capacity(),
                to = new_capacity,
                "growing table capacity"
            );
            self.container.resize(&self.path, new_capacity)?;
            self.layout.shape[0] = new_capacity;
        }

        let offset = start.checked_mul(stride).ok_or_else(|| self.overflow(start))?;
        self.container.write_records(&self.path, offset, records)?;
        self.container
            .set_attr(&self.path, ATTR_NROWS, AttrValue::UInt(required as u64))
    }

    /// Overwrite rows of a fixed-shape table starting at `start`. The logical
    /// length is not touched. Growable tables only take appends.
    pub fn write_rows(&mut self, start: usize, records: &[Record]) -> StoreResult<()> {
        self.ensure_fixed("write rows into")?;
        let offset = start
            .checked_mul(self.layout.row_stride())
            .ok_or_else(|| self.overflow(start))?;
        let end = offset
            .checked_add(records.len())
            .ok_or_else(|| self.overflow(start))?;
        if end > self.layout.elements() {
            return Err(StoreError::Dims(format!(
                "write of {} rows at {} exceeds table {} of {} rows",
                records.len(),
                start,
                self.path,
                self.capacity()
            )));
        }
        self.container.write_records(&self.path, offset, records)
    }

    /// Overwrite one field across the whole of a fixed-shape table. `data`
    /// must cover every element of the declared shape.
    pub fn write_column(&mut self, field: &str, data: &Column) -> StoreResult<()> {
        self.ensure_fixed("overwrite a column of")?;
        let expected = self.layout.elements();
        if data.len() != expected {
            return Err(StoreError::Dims(format!(
                "column '{}' of {} has {} elements, got {}",
                field,
                self.path,
                expected,
                data.len()
            )));
        }
        self.container.write_column(&self.path, field, 0, data)
    }

    fn ensure_fixed(&self, action: &str) -> StoreResult<()> {
        if self.layout.resizable {
            return Err(StoreError::Dims(format!(
                "cannot {} growable table {}; it only accepts appends",
                action, self.path
            )));
        }
        Ok(())
    }

    fn overflow(&self, start: usize) -> StoreError {
        StoreError::Dims(format!("row index {} overflows table {}", start, self.path))
    }

    /// Valid rows: the logical prefix of a growable table, every row of a
    /// fixed one.
    pub fn read(&self) -> StoreResult<Vec<Record>> {
        let end = self.valid_elements()?;
        self.container.read_records(&self.path, 0..end)
    }

    /// One field over the valid rows.
    pub fn read_column(&self, field: &str) -> StoreResult<Column> {
        let end = self.valid_elements()?;
        self.container.read_column(&self.path, field, 0..end)
    }

    fn valid_elements(&self) -> StoreResult<usize> {
        if self.layout.resizable {
            Ok(self.len()?.min(self.capacity()) * self.layout.row_stride())
        } else {
            Ok(self.layout.elements())
        }
    }
}
