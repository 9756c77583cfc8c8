//! Hierarchical container abstraction.
//!
//! A container is a tree of named *groups* (namespaces) and *datasets* (typed,
//! optionally resizable arrays), each carrying small typed *attributes*. The
//! experiment store is written entirely against the [`Container`] trait and
//! never depends on how a backend lays bytes out on disk.
//!
//! Two backends are provided:
//!
//! - [`MemoryContainer`]: a volatile tree, handy for scratch stores and tests.
//! - [`FileContainer`]: the same tree bound to a single file. The whole tree is
//!   decoded on open and re-encoded on [`Container::flush`].
//!
//! Element addressing inside a dataset is flat and row-major: for a dataset of
//! shape `[rows, cols]` element `(r, c)` lives at `r * cols + c`. Resizing only
//! ever changes axis 0.

pub mod file;
pub mod path;
pub mod tree;
pub mod value;

use crate::error::StoreResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::path::Path;

pub use file::FileContainer;
pub use tree::{MemoryContainer, TreeContainer};
pub use value::{AttrValue, Column, Field, FieldKind, Record, RecordType, Value};

/// How a container (and the store on top of it) was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpenMode {
    /// Existing file, read-only.
    Read,
    /// Create or truncate.
    Write,
    /// Read/write, creating the file if it does not exist.
    Append,
    /// Existing file, read/write.
    ReadWrite,
}

impl OpenMode {
    pub fn is_writable(self) -> bool {
        !matches!(self, OpenMode::Read)
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OpenMode::Read => "r",
            OpenMode::Write => "w",
            OpenMode::Append => "a",
            OpenMode::ReadWrite => "r+",
        };
        write!(f, "{}", label)
    }
}

/// Kind of node found at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Group,
    Dataset,
}

/// Type and shape of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetLayout {
    pub record_type: RecordType,
    /// Extent per axis; axis 0 counts rows.
    pub shape: Vec<usize>,
    /// Whether axis 0 may be resized after creation.
    pub resizable: bool,
}

impl DatasetLayout {
    pub fn new(record_type: RecordType, shape: Vec<usize>, resizable: bool) -> Self {
        Self {
            record_type,
            shape,
            resizable,
        }
    }

    /// Number of rows (extent of axis 0).
    pub fn rows(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// Elements per row.
    pub fn row_stride(&self) -> usize {
        self.shape.iter().skip(1).product()
    }

    /// Total number of elements.
    pub fn elements(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Operations the experiment store needs from a hierarchical container.
///
/// All paths are absolute. Mutating calls on a read-only container fail with
/// [`StoreError::Access`](crate::error::StoreError::Access); calls naming a
/// missing node fail with [`StoreError::Lookup`](crate::error::StoreError::Lookup).
pub trait Container: fmt::Debug {
    /// Mode the container was opened with.
    fn mode(&self) -> OpenMode;

    /// Backing file, if any.
    fn location(&self) -> Option<&Path>;

    /// Kind of node at `path`, or `None` if nothing is there.
    fn node_kind(&self, path: &str) -> Option<NodeKind>;

    fn exists(&self, path: &str) -> bool {
        self.node_kind(path).is_some()
    }

    /// Create a group, creating missing intermediate groups. Fails with
    /// `AlreadyExists` if any node already occupies `path`.
    fn create_group(&mut self, path: &str) -> StoreResult<()>;

    /// Create a zero-filled dataset, creating missing intermediate groups.
    fn create_dataset(&mut self, path: &str, layout: DatasetLayout) -> StoreResult<()>;

    /// Names of the direct children of a group, sorted.
    fn children(&self, path: &str) -> StoreResult<Vec<String>>;

    fn attr(&self, path: &str, name: &str) -> StoreResult<Option<AttrValue>>;

    fn attr_names(&self, path: &str) -> StoreResult<Vec<String>>;

    fn set_attr(&mut self, path: &str, name: &str, value: AttrValue) -> StoreResult<()>;

    fn layout(&self, path: &str) -> StoreResult<DatasetLayout>;

    /// Change the extent of axis 0, preserving existing elements.
    fn resize(&mut self, path: &str, rows: usize) -> StoreResult<()>;

    /// Records for the flat element range.
    fn read_records(&self, path: &str, range: Range<usize>) -> StoreResult<Vec<Record>>;

    /// Overwrite consecutive elements starting at flat index `start`.
    fn write_records(&mut self, path: &str, start: usize, records: &[Record]) -> StoreResult<()>;

    /// One field over the flat element range.
    fn read_column(&self, path: &str, field: &str, range: Range<usize>) -> StoreResult<Column>;

    /// Overwrite one field starting at flat index `start`.
    fn write_column(&mut self, path: &str, field: &str, start: usize, data: &Column)
        -> StoreResult<()>;

    /// Whether there are mutations not yet flushed.
    fn is_dirty(&self) -> bool;

    /// Make every mutation durable.
    fn flush(&mut self) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_geometry() {
        let layout = DatasetLayout::new(RecordType::scalar(FieldKind::F32), vec![4, 8], false);
        assert_eq!(layout.rows(), 4);
        assert_eq!(layout.row_stride(), 8);
        assert_eq!(layout.elements(), 32);

        let table = DatasetLayout::new(RecordType::scalar(FieldKind::F32), vec![10], true);
        assert_eq!(table.row_stride(), 1);
        assert_eq!(table.elements(), 10);
    }

    #[test]
    fn test_open_mode() {
        assert!(!OpenMode::Read.is_writable());
        assert!(OpenMode::Append.is_writable());
        assert_eq!(OpenMode::ReadWrite.to_string(), "r+");
    }
}
