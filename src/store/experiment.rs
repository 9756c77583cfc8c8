//! Experiment groups and tables.
//!
//! Cell-scoped experiments live under `/crosspoints/<key>/experiments`,
//! synthetic ones (spanning several cells) under `/synthetics`. Unless told
//! otherwise, names get a `_<ns>` suffix taken from the store clock so that
//! repeated runs never collide.

use super::schema::{
    ATTR_BASE_SIZE, ATTR_CLASS, ATTR_CROSSPOINTS, ATTR_NROWS, ATTR_TITLE, ATTR_TSTAMP,
    CLASS_GROUP, CLASS_TABLE, SYNTHETICS,
};
use super::table::Table;
use super::{Coordinate, Store};
use crate::container::{path, AttrValue, DatasetLayout, NodeKind, RecordType};
use crate::error::{StoreError, StoreResult};
use tracing::debug;

/// Reference to an existing experiment group, by handle or by path.
///
/// Relative paths are taken relative to the experiment anchor of the call
/// they are passed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRef(String);

impl GroupRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for GroupRef {
    fn from(path: &str) -> Self {
        Self(path.to_string())
    }
}

impl From<String> for GroupRef {
    fn from(path: String) -> Self {
        Self(path)
    }
}

impl From<&ExperimentGroup> for GroupRef {
    fn from(group: &ExperimentGroup) -> Self {
        Self(group.path.clone())
    }
}

/// An experiment group bundling several tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentGroup {
    path: String,
    coordinates: Vec<Coordinate>,
    timestamp: Option<u64>,
}

impl ExperimentGroup {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        path::basename(&self.path)
    }

    pub fn coordinates(&self) -> &[Coordinate] {
        &self.coordinates
    }

    pub fn timestamp(&self) -> Option<u64> {
        self.timestamp
    }
}

/// Shape, type and placement of a new experiment table.
#[derive(Debug, Clone)]
pub struct TableSpec {
    shape: Vec<usize>,
    record_type: RecordType,
    growable: bool,
    parent: Option<GroupRef>,
    timestamp: bool,
}

impl TableSpec {
    /// Growable, timestamped 1-D table with `rows` initial rows.
    pub fn new(rows: usize, record_type: RecordType) -> Self {
        Self {
            shape: vec![rows],
            record_type,
            growable: true,
            parent: None,
            timestamp: true,
        }
    }

    /// Multi-dimensional shape; axis 0 counts rows.
    pub fn with_shape(mut self, shape: Vec<usize>) -> Self {
        self.shape = shape;
        self
    }

    pub fn growable(mut self, growable: bool) -> Self {
        self.growable = growable;
        self
    }

    /// Fixed-size table, for results of known shape.
    pub fn fixed(self) -> Self {
        self.growable(false)
    }

    /// Place the table inside an existing experiment group.
    pub fn in_group(mut self, group: impl Into<GroupRef>) -> Self {
        self.parent = Some(group.into());
        self
    }

    /// Use the name as given, without a timestamp suffix.
    pub fn without_timestamp(mut self) -> Self {
        self.timestamp = false;
        self
    }
}

/// Resolve a parent group reference against an experiment anchor.
///
/// Absolute references must sit directly below `anchor`; relative ones are
/// joined onto it. The root is never a valid parent, and every segment must
/// be a valid node name.
pub(crate) fn resolve_parent(candidate: &GroupRef, anchor: &str) -> StoreResult<String> {
    let norm = path::normalize(candidate.as_str());
    if norm.is_empty() || path::is_root(&norm) {
        return Err(StoreError::Lookup(
            "cannot attach an experiment to the root node".into(),
        ));
    }
    for segment in path::segments(&norm) {
        path::check_name(segment)?;
    }
    if path::is_absolute(&norm) {
        if path::parent(&norm) != path::normalize(anchor) {
            return Err(StoreError::Lookup(format!(
                "experiment group {} is not directly under {}",
                norm, anchor
            )));
        }
        Ok(norm)
    } else {
        Ok(path::join(anchor, &norm))
    }
}

fn stamped_name(name: &str, stamp: Option<u64>) -> String {
    match stamp {
        Some(ns) => format!("{}_{}", name, ns),
        None => name.to_string(),
    }
}

fn coord_attr(coords: &[Coordinate]) -> AttrValue {
    AttrValue::Coords(coords.iter().map(|c| (c.word, c.bit)).collect())
}

impl Store {
    /// Experiment group under a single cell.
    pub fn make_cell_group(
        &mut self,
        coord: Coordinate,
        name: &str,
        timestamp: bool,
    ) -> StoreResult<ExperimentGroup> {
        let anchor = coord.experiments_path();
        self.make_group(&[coord], &anchor, name, timestamp)
    }

    /// Experiment table under a single cell, or under one of its groups.
    pub fn make_cell_table(
        &mut self,
        coord: Coordinate,
        name: &str,
        spec: TableSpec,
    ) -> StoreResult<Table<'_>> {
        let anchor = coord.experiments_path();
        self.make_table(&[coord], &anchor, name, spec)
    }

    /// Experiment group spanning several cells.
    pub fn make_synthetic_group(
        &mut self,
        coords: &[Coordinate],
        name: &str,
        timestamp: bool,
    ) -> StoreResult<ExperimentGroup> {
        self.make_group(coords, SYNTHETICS, name, timestamp)
    }

    /// Experiment table spanning several cells.
    pub fn make_synthetic_table(
        &mut self,
        coords: &[Coordinate],
        name: &str,
        spec: TableSpec,
    ) -> StoreResult<Table<'_>> {
        self.make_table(coords, SYNTHETICS, name, spec)
    }

    /// Existing experiment group at `path`.
    pub fn group(&self, group_path: &str) -> StoreResult<ExperimentGroup> {
        let group_path = path::normalize(group_path);
        let container = self.container();
        if container.node_kind(&group_path) != Some(NodeKind::Group) {
            return Err(StoreError::Lookup(format!("no group at {}", group_path)));
        }
        let coordinates: Vec<Coordinate> = container
            .attr(&group_path, ATTR_CROSSPOINTS)?
            .and_then(|v| v.as_coords().map(|c| c.iter().map(|&p| p.into()).collect()))
            .unwrap_or_default();
        let timestamp = container
            .attr(&group_path, ATTR_TSTAMP)?
            .and_then(|v| v.as_u64());
        Ok(ExperimentGroup {
            path: group_path,
            coordinates,
            timestamp,
        })
    }

    /// Existing table at `path`.
    pub fn table(&mut self, table_path: &str) -> StoreResult<Table<'_>> {
        let table_path = path::normalize(table_path);
        if self.container().node_kind(&table_path) != Some(NodeKind::Dataset) {
            return Err(StoreError::Lookup(format!("no table at {}", table_path)));
        }
        Table::open(self.container_mut(), &table_path)
    }

    /// Experiments recorded against one cell, oldest first. Empty for cells
    /// that were never written.
    pub fn experiments(&self, coord: Coordinate) -> StoreResult<Vec<String>> {
        self.check_coord(coord)?;
        let anchor = coord.experiments_path();
        let container = self.container();
        if !container.exists(&anchor) {
            return Ok(Vec::new());
        }
        let mut entries = container
            .children(&anchor)?
            .into_iter()
            .map(|name| {
                let stamp = container
                    .attr(&path::join(&anchor, &name), ATTR_TSTAMP)?
                    .and_then(|v| v.as_u64());
                Ok((stamp, name))
            })
            .collect::<StoreResult<Vec<_>>>()?;
        entries.sort();
        Ok(entries.into_iter().map(|(_, name)| name).collect())
    }

    /// Names of all synthetic experiments.
    pub fn synthetics(&self) -> StoreResult<Vec<String>> {
        self.container().children(SYNTHETICS)
    }

    fn ensure_all(&mut self, coords: &[Coordinate]) -> StoreResult<()> {
        if coords.is_empty() {
            return Err(StoreError::Dims(
                "an experiment needs at least one crosspoint".into(),
            ));
        }
        for &coord in coords {
            self.ensure_timeseries(coord)?;
        }
        Ok(())
    }

    fn make_group(
        &mut self,
        coords: &[Coordinate],
        anchor: &str,
        name: &str,
        timestamp: bool,
    ) -> StoreResult<ExperimentGroup> {
        path::check_name(name)?;
        self.ensure_all(coords)?;
        let stamp = timestamp.then(|| self.next_stamp());
        let group_path = path::join(anchor, &stamped_name(name, stamp));

        match self.container().node_kind(&group_path) {
            Some(NodeKind::Group) => return self.group(&group_path),
            Some(NodeKind::Dataset) => {
                return Err(StoreError::AlreadyExists(format!(
                    "{} is a table, cannot create a group there",
                    group_path
                )))
            }
            None => {}
        }

        let container = self.container_mut();
        container.create_group(&group_path)?;
        if let Some(ns) = stamp {
            container.set_attr(&group_path, ATTR_TSTAMP, AttrValue::UInt(ns))?;
        }
        container.set_attr(&group_path, ATTR_CROSSPOINTS, coord_attr(coords))?;
        container.set_attr(&group_path, ATTR_CLASS, CLASS_GROUP.into())?;
        debug!(group = %group_path, cells = coords.len(), "created experiment group");

        Ok(ExperimentGroup {
            path: group_path,
            coordinates: coords.to_vec(),
            timestamp: stamp,
        })
    }

    /// Create the groups between `anchor` and `base` that do not exist yet,
    /// tagged like any other experiment group.
    fn ensure_parent_groups(
        &mut self,
        coords: &[Coordinate],
        anchor: &str,
        base: &str,
    ) -> StoreResult<()> {
        let anchor = path::normalize(anchor);
        let below = base.strip_prefix(anchor.as_str()).unwrap_or("");
        let mut current = anchor;
        for segment in path::segments(below) {
            current = path::join(&current, segment);
            match self.container().node_kind(&current) {
                Some(NodeKind::Group) => continue,
                Some(NodeKind::Dataset) => {
                    return Err(StoreError::AlreadyExists(format!(
                        "{} is a table, cannot create a group there",
                        current
                    )))
                }
                None => {}
            }
            let stamp = self.next_stamp();
            let container = self.container_mut();
            container.create_group(&current)?;
            container.set_attr(&current, ATTR_TSTAMP, AttrValue::UInt(stamp))?;
            container.set_attr(&current, ATTR_CROSSPOINTS, coord_attr(coords))?;
            container.set_attr(&current, ATTR_CLASS, CLASS_GROUP.into())?;
            debug!(group = %current, "created parent group for experiment table");
        }
        Ok(())
    }

    fn make_table(
        &mut self,
        coords: &[Coordinate],
        anchor: &str,
        name: &str,
        spec: TableSpec,
    ) -> StoreResult<Table<'_>> {
        path::check_name(name)?;
        let rows = match spec.shape.first() {
            Some(&rows) => rows,
            None => return Err(StoreError::Dims("table shape cannot be empty".into())),
        };
        self.ensure_all(coords)?;

        let base = match &spec.parent {
            Some(parent) => resolve_parent(parent, anchor)?,
            None => path::normalize(anchor),
        };
        let stamp = spec.timestamp.then(|| self.next_stamp());
        let table_path = path::join(&base, &stamped_name(name, stamp));
        if self.container().exists(&table_path) {
            return Err(StoreError::AlreadyExists(table_path));
        }
        self.ensure_parent_groups(coords, anchor, &base)?;

        let container = self.container_mut();
        let layout = DatasetLayout::new(spec.record_type, spec.shape, spec.growable);
        container.create_dataset(&table_path, layout)?;
        container.set_attr(&table_path, ATTR_NROWS, AttrValue::UInt(0))?;
        container.set_attr(&table_path, ATTR_TITLE, table_path.as_str().into())?;
        container.set_attr(&table_path, ATTR_CLASS, CLASS_TABLE.into())?;
        if let Some(ns) = stamp {
            container.set_attr(&table_path, ATTR_TSTAMP, AttrValue::UInt(ns))?;
        }
        container.set_attr(&table_path, ATTR_CROSSPOINTS, coord_attr(coords))?;
        container.set_attr(&table_path, ATTR_BASE_SIZE, AttrValue::UInt(rows as u64))?;
        debug!(table = %table_path, rows, growable = spec.growable, "created experiment table");

        Table::open(container, &table_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{FieldKind, Record, Value};
    use crate::store::Dimensions;

    fn store() -> Store {
        Store::in_memory(Dimensions::new(8, 8), None).unwrap()
    }

    fn ramp_type() -> RecordType {
        RecordType::new([("voltage", FieldKind::F32), ("current", FieldKind::F32)])
    }

    #[test]
    fn test_resolve_parent() {
        let anchor = "/crosspoints/W02B03/experiments";
        assert_eq!(
            resolve_parent(&"ramp".into(), anchor).unwrap(),
            "/crosspoints/W02B03/experiments/ramp"
        );
        assert_eq!(
            resolve_parent(&"/crosspoints/W02B03/experiments/ramp/".into(), anchor).unwrap(),
            "/crosspoints/W02B03/experiments/ramp"
        );
        assert!(matches!(
            resolve_parent(&"/".into(), anchor),
            Err(StoreError::Lookup(_))
        ));
        assert!(matches!(
            resolve_parent(&"/crosspoints/W02B03/experiments".into(), anchor),
            Err(StoreError::Lookup(_))
        ));
    }

    #[test]
    fn test_resolve_parent_rejects_dot_segments() {
        let anchor = "/crosspoints/W05B07/experiments";
        let candidates = [
            "../../W05B07/experiments/foo",
            "./foo",
            "foo/..",
            "/crosspoints/W05B07/experiments/..",
        ];
        for candidate in candidates {
            assert!(
                matches!(resolve_parent(&candidate.into(), anchor), Err(StoreError::Lookup(_))),
                "{} was accepted",
                candidate
            );
        }
    }

    #[test]
    fn test_implicit_parent_group_is_tagged() {
        let mut store = store();
        let coord = Coordinate::new(1, 4);
        let spec = TableSpec::new(2, ramp_type()).in_group("sweeps").without_timestamp();
        let table = store.make_cell_table(coord, "iv", spec).unwrap();
        assert_eq!(table.path(), "/crosspoints/W01B04/experiments/sweeps/iv");
        drop(table);

        let group = store.group("/crosspoints/W01B04/experiments/sweeps").unwrap();
        assert_eq!(group.coordinates(), &[coord]);
        assert!(group.timestamp().is_some());
        assert_eq!(
            store
                .container()
                .attr(group.path(), ATTR_CLASS)
                .unwrap()
                .and_then(|v| v.as_str().map(str::to_string))
                .as_deref(),
            Some(CLASS_GROUP)
        );
        assert_eq!(store.experiments(coord).unwrap(), vec!["sweeps".to_string()]);
    }

    #[test]
    fn test_anchor_rejects_foreign_cell() {
        let mut store = store();
        store
            .make_cell_group(Coordinate::new(5, 7), "foo", false)
            .unwrap();
        let spec = TableSpec::new(10, ramp_type()).in_group("/crosspoints/W05B07/experiments/foo");
        let err = store
            .make_cell_table(Coordinate::new(2, 3), "ramp", spec)
            .unwrap_err();
        assert!(matches!(err, StoreError::Lookup(_)));
    }

    #[test]
    fn test_cell_table_in_group() {
        let mut store = store();
        let coord = Coordinate::new(2, 3);
        let group = store.make_cell_group(coord, "retention", true).unwrap();
        assert!(group.name().starts_with("retention_"));
        assert_eq!(group.coordinates(), &[coord]);

        let spec = TableSpec::new(4, ramp_type()).in_group(&group).without_timestamp();
        let mut table = store.make_cell_table(coord, "data", spec).unwrap();
        assert_eq!(table.path(), format!("{}/data", group.path()));
        assert_eq!(table.base_size().unwrap(), 4);
        assert_eq!(table.coordinates().unwrap(), vec![coord]);
        assert_eq!(table.timestamp().unwrap(), None);

        let rows: Vec<_> = (0..5)
            .map(|i| Record::new(vec![Value::F32(i as f32), Value::F32(1e-6)]))
            .collect();
        table.append_rows(&rows).unwrap();
        assert_eq!(table.capacity(), 8);
        assert_eq!(table.read().unwrap().len(), 5);

        // cell log exists even though no sample was written
        assert!(store.timeseries(coord).unwrap().is_empty());
    }

    #[test]
    fn test_collision_policy() {
        let mut store = store();
        let coord = Coordinate::new(0, 0);
        let a = store.make_cell_group(coord, "sweep", false).unwrap();
        let b = store.make_cell_group(coord, "sweep", false).unwrap();
        assert_eq!(a, b);

        store
            .make_cell_table(coord, "t", TableSpec::new(2, ramp_type()).without_timestamp())
            .unwrap();
        let err = store
            .make_cell_table(coord, "t", TableSpec::new(2, ramp_type()).without_timestamp())
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[test]
    fn test_timestamped_names_are_unique() {
        let mut store = store();
        let coord = Coordinate::new(1, 1);
        let first = store
            .make_cell_table(coord, "pulse", TableSpec::new(1, ramp_type()))
            .unwrap()
            .path()
            .to_string();
        let second = store
            .make_cell_table(coord, "pulse", TableSpec::new(1, ramp_type()))
            .unwrap()
            .path()
            .to_string();
        assert_ne!(first, second);

        let names = store.experiments(coord).unwrap();
        assert_eq!(names.len(), 2);
        assert_eq!(names[0], path::basename(&first));
    }

    #[test]
    fn test_synthetic_table() {
        let mut store = store();
        let coords = [Coordinate::new(0, 1), Coordinate::new(4, 5)];
        let spec = TableSpec::new(2, RecordType::scalar(FieldKind::F64))
            .with_shape(vec![2, 3])
            .fixed();
        let mut table = store.make_synthetic_table(&coords, "map", spec).unwrap();
        assert!(!table.is_growable());
        let rows: Vec<_> = (0..6).map(|i| Record::new(vec![Value::F64(i as f64)])).collect();
        table.write_rows(0, &rows).unwrap();
        assert_eq!(table.read().unwrap().len(), 6);
        assert_eq!(table.coordinates().unwrap(), coords.to_vec());

        assert_eq!(store.synthetics().unwrap().len(), 1);
        assert!(store.timeseries(Coordinate::new(4, 5)).is_ok());
    }

    #[test]
    fn test_synthetic_needs_coordinates() {
        let mut store = store();
        let err = store.make_synthetic_group(&[], "empty", true).unwrap_err();
        assert!(matches!(err, StoreError::Dims(_)));
    }

    #[test]
    fn test_lookup_accessors() {
        let mut store = store();
        assert!(matches!(store.group("/synthetics/none"), Err(StoreError::Lookup(_))));
        assert!(matches!(store.table("/crossbar"), Err(StoreError::Lookup(_))));
        let table = store.table("/crossbar/current").unwrap();
        assert_eq!(table.shape(), &[8, 8]);
    }
}
