//! In-memory node tree shared by every container backend.
//!
//! [`TreeContainer`] implements [`Container`] on top of a tree of [`Node`]s and
//! delegates durability to a [`Persist`] strategy: [`Volatile`] keeps nothing,
//! [`FileBacking`](super::file::FileBacking) writes the encoded tree to disk.

use super::path;
use super::value::{AttrValue, Column, Record};
use super::{Container, DatasetLayout, NodeKind, OpenMode};
use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupNode {
    pub attrs: BTreeMap<String, AttrValue>,
    pub children: BTreeMap<String, Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetNode {
    pub attrs: BTreeMap<String, AttrValue>,
    pub layout: DatasetLayout,
    /// One column per record field, each `layout.elements()` long.
    pub columns: Vec<Column>,
}

impl DatasetNode {
    fn new(layout: DatasetLayout) -> Self {
        let len = layout.elements();
        let columns = layout
            .record_type
            .fields()
            .iter()
            .map(|f| Column::zeroed(f.kind, len))
            .collect();
        Self {
            attrs: BTreeMap::new(),
            layout,
            columns,
        }
    }

    fn field_index(&self, path: &str, field: &str) -> StoreResult<usize> {
        self.layout.record_type.index_of(field).ok_or_else(|| {
            StoreError::Lookup(format!("dataset {} has no field '{}'", path, field))
        })
    }

    /// `start..start + len`, refusing ranges that overflow.
    fn span(start: usize, len: usize) -> StoreResult<Range<usize>> {
        let end = start.checked_add(len).ok_or_else(|| {
            StoreError::Dims(format!("element range at {} of length {} overflows", start, len))
        })?;
        Ok(start..end)
    }

    fn check_range(&self, range: &Range<usize>) -> StoreResult<()> {
        let len = self.layout.elements();
        if range.start > range.end || range.end > len {
            return Err(StoreError::Dims(format!(
                "element range {:?} outside dataset of {} elements",
                range, len
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Group(GroupNode),
    Dataset(DatasetNode),
}

impl Node {
    fn attrs(&self) -> &BTreeMap<String, AttrValue> {
        match self {
            Node::Group(g) => &g.attrs,
            Node::Dataset(d) => &d.attrs,
        }
    }

    fn attrs_mut(&mut self) -> &mut BTreeMap<String, AttrValue> {
        match self {
            Node::Group(g) => &mut g.attrs,
            Node::Dataset(d) => &mut d.attrs,
        }
    }

    fn kind(&self) -> NodeKind {
        match self {
            Node::Group(_) => NodeKind::Group,
            Node::Dataset(_) => NodeKind::Dataset,
        }
    }
}

/// Durability strategy for a [`TreeContainer`].
pub trait Persist: std::fmt::Debug {
    fn location(&self) -> Option<&Path>;

    /// Write the whole tree out.
    fn persist(&mut self, root: &GroupNode) -> StoreResult<()>;
}

/// No durability: the tree lives only as long as the container.
#[derive(Debug, Default)]
pub struct Volatile;

impl Persist for Volatile {
    fn location(&self) -> Option<&Path> {
        None
    }

    fn persist(&mut self, _root: &GroupNode) -> StoreResult<()> {
        Ok(())
    }
}

/// A node tree plus an open mode and a durability strategy.
#[derive(Debug)]
pub struct TreeContainer<P: Persist> {
    root: GroupNode,
    mode: OpenMode,
    dirty: bool,
    backing: P,
}

/// Volatile container, never written anywhere.
pub type MemoryContainer = TreeContainer<Volatile>;

impl MemoryContainer {
    /// Empty volatile container in the given mode.
    pub fn new(mode: OpenMode) -> Self {
        Self::from_parts(GroupNode::default(), mode, Volatile)
    }
}

impl<P: Persist> TreeContainer<P> {
    pub(crate) fn from_parts(root: GroupNode, mode: OpenMode, backing: P) -> Self {
        Self {
            root,
            mode,
            dirty: false,
            backing,
        }
    }

    /// Flag the tree as holding changes its backing has not seen yet.
    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn backing(&self) -> &P {
        &self.backing
    }

    fn ensure_writable(&self) -> StoreResult<()> {
        if self.mode.is_writable() {
            Ok(())
        } else {
            Err(StoreError::Access("File is opened read-only".into()))
        }
    }

    fn node(&self, p: &str) -> Option<&Node> {
        let mut group = &self.root;
        let mut segs = path::segments(p).peekable();
        while let Some(seg) = segs.next() {
            let child = group.children.get(seg)?;
            if segs.peek().is_none() {
                return Some(child);
            }
            match child {
                Node::Group(g) => group = g,
                Node::Dataset(_) => return None,
            }
        }
        None
    }

    fn node_mut(&mut self, p: &str) -> Option<&mut Node> {
        let mut group = &mut self.root;
        let segs: Vec<&str> = path::segments(p).collect();
        let (last, parents) = segs.split_last()?;
        for seg in parents {
            match group.children.get_mut(*seg)? {
                Node::Group(g) => group = g,
                Node::Dataset(_) => return None,
            }
        }
        group.children.get_mut(*last)
    }

    fn dataset(&self, p: &str) -> StoreResult<&DatasetNode> {
        match self.node(p) {
            Some(Node::Dataset(d)) => Ok(d),
            Some(Node::Group(_)) => Err(StoreError::Lookup(format!("{} is not a dataset", p))),
            None => Err(StoreError::Lookup(format!("no such dataset: {}", p))),
        }
    }

    fn dataset_mut(&mut self, p: &str) -> StoreResult<&mut DatasetNode> {
        match self.node_mut(p) {
            Some(Node::Dataset(d)) => Ok(d),
            Some(Node::Group(_)) => Err(StoreError::Lookup(format!("{} is not a dataset", p))),
            None => Err(StoreError::Lookup(format!("no such dataset: {}", p))),
        }
    }

    /// Insert `node` at `p`, creating intermediate groups on the way.
    fn insert(&mut self, p: &str, node: Node) -> StoreResult<()> {
        let segs: Vec<&str> = path::segments(p).collect();
        let Some((last, parents)) = segs.split_last() else {
            return Err(StoreError::AlreadyExists(path::ROOT.to_string()));
        };
        let mut group = &mut self.root;
        for seg in parents {
            let child = group
                .children
                .entry((*seg).to_string())
                .or_insert_with(|| Node::Group(GroupNode::default()));
            match child {
                Node::Group(g) => group = g,
                Node::Dataset(_) => {
                    return Err(StoreError::Lookup(format!(
                        "cannot create {}: {} is a dataset",
                        p, seg
                    )))
                }
            }
        }
        if group.children.contains_key(*last) {
            return Err(StoreError::AlreadyExists(path::normalize(p)));
        }
        group.children.insert((*last).to_string(), node);
        self.dirty = true;
        Ok(())
    }
}

impl<P: Persist> Container for TreeContainer<P> {
    fn mode(&self) -> OpenMode {
        self.mode
    }

    fn location(&self) -> Option<&Path> {
        self.backing.location()
    }

    fn node_kind(&self, p: &str) -> Option<NodeKind> {
        if path::is_root(p) {
            return Some(NodeKind::Group);
        }
        self.node(p).map(Node::kind)
    }

    fn create_group(&mut self, p: &str) -> StoreResult<()> {
        self.ensure_writable()?;
        self.insert(p, Node::Group(GroupNode::default()))
    }

    fn create_dataset(&mut self, p: &str, layout: DatasetLayout) -> StoreResult<()> {
        self.ensure_writable()?;
        if layout.shape.is_empty() || layout.record_type.is_empty() {
            return Err(StoreError::Dims(format!(
                "dataset {} needs at least one axis and one field",
                p
            )));
        }
        self.insert(p, Node::Dataset(DatasetNode::new(layout)))
    }

    fn children(&self, p: &str) -> StoreResult<Vec<String>> {
        let group = if path::is_root(p) {
            &self.root
        } else {
            match self.node(p) {
                Some(Node::Group(g)) => g,
                Some(Node::Dataset(_)) => {
                    return Err(StoreError::Lookup(format!("{} is not a group", p)))
                }
                None => return Err(StoreError::Lookup(format!("no such group: {}", p))),
            }
        };
        Ok(group.children.keys().cloned().collect())
    }

    fn attr(&self, p: &str, name: &str) -> StoreResult<Option<AttrValue>> {
        let attrs = if path::is_root(p) {
            &self.root.attrs
        } else {
            self.node(p)
                .ok_or_else(|| StoreError::Lookup(format!("no such node: {}", p)))?
                .attrs()
        };
        Ok(attrs.get(name).cloned())
    }

    fn attr_names(&self, p: &str) -> StoreResult<Vec<String>> {
        let attrs = if path::is_root(p) {
            &self.root.attrs
        } else {
            self.node(p)
                .ok_or_else(|| StoreError::Lookup(format!("no such node: {}", p)))?
                .attrs()
        };
        Ok(attrs.keys().cloned().collect())
    }

    fn set_attr(&mut self, p: &str, name: &str, value: AttrValue) -> StoreResult<()> {
        self.ensure_writable()?;
        let attrs = if path::is_root(p) {
            &mut self.root.attrs
        } else {
            self.node_mut(p)
                .ok_or_else(|| StoreError::Lookup(format!("no such node: {}", p)))?
                .attrs_mut()
        };
        attrs.insert(name.to_string(), value);
        self.dirty = true;
        Ok(())
    }

    fn layout(&self, p: &str) -> StoreResult<DatasetLayout> {
        Ok(self.dataset(p)?.layout.clone())
    }

    fn resize(&mut self, p: &str, rows: usize) -> StoreResult<()> {
        self.ensure_writable()?;
        let ds = self.dataset_mut(p)?;
        if !ds.layout.resizable {
            return Err(StoreError::Dims(format!("dataset {} is not resizable", p)));
        }
        ds.layout.shape[0] = rows;
        let len = ds.layout.elements();
        for column in &mut ds.columns {
            column.resize(len);
        }
        self.dirty = true;
        Ok(())
    }

    fn read_records(&self, p: &str, range: Range<usize>) -> StoreResult<Vec<Record>> {
        let ds = self.dataset(p)?;
        ds.check_range(&range)?;
        let mut records = Vec::with_capacity(range.len());
        for idx in range {
            let values = ds
                .columns
                .iter()
                .map(|c| {
                    c.get(idx).ok_or_else(|| {
                        StoreError::Format(format!("dataset {} is shorter than its shape", p))
                    })
                })
                .collect::<StoreResult<Vec<_>>>()?;
            records.push(Record::new(values));
        }
        Ok(records)
    }

    fn write_records(&mut self, p: &str, start: usize, records: &[Record]) -> StoreResult<()> {
        self.ensure_writable()?;
        let ds = self.dataset_mut(p)?;
        ds.check_range(&DatasetNode::span(start, records.len())?)?;
        for record in records {
            ds.layout.record_type.check(record)?;
        }
        for (offset, record) in records.iter().enumerate() {
            for (column, value) in ds.columns.iter_mut().zip(record.values()) {
                column.set(start + offset, *value)?;
            }
        }
        self.dirty = true;
        Ok(())
    }

    fn read_column(&self, p: &str, field: &str, range: Range<usize>) -> StoreResult<Column> {
        let ds = self.dataset(p)?;
        let idx = ds.field_index(p, field)?;
        ds.check_range(&range)?;
        ds.columns[idx].slice(range)
    }

    fn write_column(
        &mut self,
        p: &str,
        field: &str,
        start: usize,
        data: &Column,
    ) -> StoreResult<()> {
        self.ensure_writable()?;
        let ds = self.dataset_mut(p)?;
        let idx = ds.field_index(p, field)?;
        ds.check_range(&DatasetNode::span(start, data.len())?)?;
        ds.columns[idx].copy_from(start, data)?;
        self.dirty = true;
        Ok(())
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn flush(&mut self) -> StoreResult<()> {
        if !self.mode.is_writable() || !self.dirty {
            return Ok(());
        }
        self.backing.persist(&self.root)?;
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{FieldKind, RecordType, Value};

    fn table_layout(rows: usize) -> DatasetLayout {
        DatasetLayout::new(
            RecordType::new([("voltage", FieldKind::F32), ("op", FieldKind::U32)]),
            vec![rows],
            true,
        )
    }

    #[test]
    fn test_create_group_with_intermediates() {
        let mut c = MemoryContainer::new(OpenMode::Write);
        c.create_group("/crosspoints/W00B00/experiments").unwrap();
        assert_eq!(c.node_kind("/crosspoints"), Some(NodeKind::Group));
        assert_eq!(c.node_kind("/crosspoints/W00B00"), Some(NodeKind::Group));
        assert_eq!(c.children("/crosspoints").unwrap(), vec!["W00B00"]);

        let err = c.create_group("/crosspoints").unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[test]
    fn test_read_only_rejects_mutation() {
        let mut c = MemoryContainer::new(OpenMode::Read);
        assert!(matches!(c.create_group("/a"), Err(StoreError::Access(_))));
        assert!(matches!(
            c.set_attr("/", "words", AttrValue::Int(4)),
            Err(StoreError::Access(_))
        ));
    }

    #[test]
    fn test_resize_preserves_rows() {
        let mut c = MemoryContainer::new(OpenMode::Write);
        c.create_dataset("/t", table_layout(2)).unwrap();
        let rows = vec![
            Record::new(vec![Value::F32(1.0), Value::U32(1)]),
            Record::new(vec![Value::F32(2.0), Value::U32(2)]),
        ];
        c.write_records("/t", 0, &rows).unwrap();
        c.resize("/t", 8).unwrap();

        assert_eq!(c.layout("/t").unwrap().rows(), 8);
        assert_eq!(c.read_records("/t", 0..2).unwrap(), rows);
        let tail = c.read_column("/t", "voltage", 2..8).unwrap();
        assert_eq!(tail.as_f32(), Some(&[0.0; 6][..]));
    }

    #[test]
    fn test_fixed_dataset_cannot_resize() {
        let mut c = MemoryContainer::new(OpenMode::Write);
        let layout = DatasetLayout::new(RecordType::scalar(FieldKind::F32), vec![2, 3], false);
        c.create_dataset("/crossbar/current", layout).unwrap();
        assert!(matches!(c.resize("/crossbar/current", 4), Err(StoreError::Dims(_))));
        assert!(matches!(
            c.write_records("/crossbar/current", 5, &vec![Record::new(vec![Value::F32(1.0)]); 2]),
            Err(StoreError::Dims(_))
        ));
    }

    #[test]
    fn test_overflowing_start_is_rejected() {
        let mut c = MemoryContainer::new(OpenMode::Write);
        c.create_dataset("/t", table_layout(2)).unwrap();
        let rows = vec![Record::new(vec![Value::F32(1.0), Value::U32(1)]); 2];
        assert!(matches!(
            c.write_records("/t", usize::MAX, &rows),
            Err(StoreError::Dims(_))
        ));
        assert!(matches!(
            c.write_column("/t", "voltage", usize::MAX, &Column::F32(vec![1.0])),
            Err(StoreError::Dims(_))
        ));
    }

    #[test]
    fn test_dataset_blocks_nested_creation() {
        let mut c = MemoryContainer::new(OpenMode::Write);
        c.create_dataset("/t", table_layout(1)).unwrap();
        assert!(matches!(c.create_group("/t/sub"), Err(StoreError::Lookup(_))));
        assert!(matches!(c.children("/t"), Err(StoreError::Lookup(_))));
    }

    #[test]
    fn test_attrs_on_root_and_nodes() {
        let mut c = MemoryContainer::new(OpenMode::Write);
        c.set_attr("/", "words", AttrValue::Int(4)).unwrap();
        c.create_group("/synthetics").unwrap();
        c.set_attr("/synthetics", "CLASS", "GROUP".into()).unwrap();

        assert_eq!(c.attr("/", "words").unwrap(), Some(AttrValue::Int(4)));
        assert_eq!(c.attr_names("/synthetics").unwrap(), vec!["CLASS"]);
        assert!(matches!(c.attr("/missing", "x"), Err(StoreError::Lookup(_))));
        assert!(c.is_dirty());
        c.flush().unwrap();
        assert!(!c.is_dirty());
    }
}
