//! Per-cell biasing history.
//!
//! Every crosspoint owns one growable log at `/crosspoints/<key>/timeseries`.
//! Appending to it also moves the raster value of that cell, so the raster
//! always shows the most recent sample.

use super::schema::{ATTR_BASE_SIZE, ATTR_CLASS, ATTR_NROWS, ATTR_TITLE, CLASS_GROUP, CLASS_TABLE};
use super::table::Table;
use super::{Coordinate, Store};
use crate::container::{AttrValue, DatasetLayout, FieldKind, NodeKind, Record, RecordType, Value};
use crate::error::{StoreError, StoreResult};
use std::fmt;
use tracing::debug;

/// What a sample did to the cell: bit 0 is a read, bit 1 a pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OpKind(pub u32);

impl OpKind {
    pub const READ: OpKind = OpKind(0b01);
    pub const PULSE: OpKind = OpKind(0b10);
    pub const PULSE_READ: OpKind = OpKind(0b11);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn is_read(self) -> bool {
        self.0 & Self::READ.0 != 0
    }

    pub fn is_pulse(self) -> bool {
        self.0 & Self::PULSE.0 != 0
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.is_pulse(), self.is_read()) {
            (true, true) => write!(f, "pulse+read"),
            (true, false) => write!(f, "pulse"),
            (false, true) => write!(f, "read"),
            (false, false) => write!(f, "none({:#x})", self.0),
        }
    }
}

/// One row of a time-series log.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSeriesRecord {
    /// Measured current.
    pub current: f32,
    /// Applied voltage.
    pub voltage: f32,
    pub pulse_width: f32,
    /// Voltage used for the read-out that followed the pulse, if any.
    pub read_voltage: f32,
    pub op: OpKind,
}

impl TimeSeriesRecord {
    pub fn new(current: f32, voltage: f32, pulse_width: f32, read_voltage: f32, op: OpKind) -> Self {
        Self {
            current,
            voltage,
            pulse_width,
            read_voltage,
            op,
        }
    }

    /// Record type of the log dataset.
    pub fn record_type() -> RecordType {
        RecordType::new([
            ("current", FieldKind::F32),
            ("voltage", FieldKind::F32),
            ("pulse_width", FieldKind::F32),
            ("read_voltage", FieldKind::F32),
            ("op_type", FieldKind::U32),
        ])
    }
}

impl From<TimeSeriesRecord> for Record {
    fn from(r: TimeSeriesRecord) -> Self {
        Record::new(vec![
            Value::F32(r.current),
            Value::F32(r.voltage),
            Value::F32(r.pulse_width),
            Value::F32(r.read_voltage),
            Value::U32(r.op.0),
        ])
    }
}

impl TryFrom<&Record> for TimeSeriesRecord {
    type Error = StoreError;

    fn try_from(record: &Record) -> StoreResult<Self> {
        match record.values() {
            [Value::F32(current), Value::F32(voltage), Value::F32(pulse_width), Value::F32(read_voltage), Value::U32(op)] => {
                Ok(Self::new(*current, *voltage, *pulse_width, *read_voltage, OpKind(*op)))
            }
            other => Err(StoreError::Format(format!(
                "not a time-series record: {:?}",
                other
            ))),
        }
    }
}

/// A value given once for every row, or once per row.
#[derive(Debug, Clone, PartialEq)]
pub enum Broadcast<T> {
    Scalar(T),
    Series(Vec<T>),
}

impl<T: Clone> Broadcast<T> {
    /// Expand to exactly `n` values. A one-element series counts as a scalar.
    pub fn resolve(self, n: usize) -> StoreResult<Vec<T>> {
        match self {
            Broadcast::Scalar(v) => Ok(vec![v; n]),
            Broadcast::Series(values) if values.len() == n => Ok(values),
            Broadcast::Series(mut values) if values.len() == 1 => {
                let v = values.remove(0);
                Ok(vec![v; n])
            }
            Broadcast::Series(values) => Err(StoreError::Dims(format!(
                "broadcast series has {} values, expected 1 or {}",
                values.len(),
                n
            ))),
        }
    }
}

impl<T> From<Vec<T>> for Broadcast<T> {
    fn from(values: Vec<T>) -> Self {
        Broadcast::Series(values)
    }
}

impl<T: Clone> From<&[T]> for Broadcast<T> {
    fn from(values: &[T]) -> Self {
        Broadcast::Series(values.to_vec())
    }
}

impl From<f32> for Broadcast<f32> {
    fn from(v: f32) -> Self {
        Broadcast::Scalar(v)
    }
}

impl From<OpKind> for Broadcast<OpKind> {
    fn from(v: OpKind) -> Self {
        Broadcast::Scalar(v)
    }
}

/// Column-wise samples for [`Store::append_bulk`].
///
/// `current`, `voltage` and `pulse_width` must have equal lengths.
#[derive(Debug, Clone)]
pub struct BulkSamples<'a> {
    pub current: &'a [f32],
    pub voltage: &'a [f32],
    pub pulse_width: &'a [f32],
    pub read_voltage: Broadcast<f32>,
    pub op: Broadcast<OpKind>,
}

impl<'a> BulkSamples<'a> {
    /// Samples with a zero read voltage and `PULSE` op for every row.
    pub fn new(current: &'a [f32], voltage: &'a [f32], pulse_width: &'a [f32]) -> Self {
        Self {
            current,
            voltage,
            pulse_width,
            read_voltage: Broadcast::Scalar(0.0),
            op: Broadcast::Scalar(OpKind::PULSE),
        }
    }

    pub fn read_voltage(mut self, read_voltage: impl Into<Broadcast<f32>>) -> Self {
        self.read_voltage = read_voltage.into();
        self
    }

    pub fn op(mut self, op: impl Into<Broadcast<OpKind>>) -> Self {
        self.op = op.into();
        self
    }

    fn into_records(self) -> StoreResult<Vec<Record>> {
        let n = self.current.len();
        if self.voltage.len() != n || self.pulse_width.len() != n {
            return Err(StoreError::Dims(format!(
                "bulk samples differ in length: current {}, voltage {}, pulse_width {}",
                n,
                self.voltage.len(),
                self.pulse_width.len()
            )));
        }
        let read_voltage = self.read_voltage.resolve(n)?;
        let op = self.op.resolve(n)?;

        Ok((0..n)
            .map(|i| {
                TimeSeriesRecord::new(
                    self.current[i],
                    self.voltage[i],
                    self.pulse_width[i],
                    read_voltage[i],
                    op[i],
                )
                .into()
            })
            .collect())
    }
}

impl Store {
    /// Create the cell group, its experiments namespace and an empty log if
    /// they are missing. Returns the log path.
    pub fn ensure_timeseries(&mut self, coord: Coordinate) -> StoreResult<String> {
        self.check_coord(coord)?;
        let ts_path = coord.timeseries_path();
        let base_size = self.options.base_size;
        let container = self.container_mut();

        match container.node_kind(&ts_path) {
            Some(NodeKind::Dataset) => return Ok(ts_path),
            Some(NodeKind::Group) => {
                return Err(StoreError::Format(format!(
                    "{} is a group, expected a time-series table",
                    ts_path
                )))
            }
            None => {}
        }

        let cell = coord.path();
        if !container.exists(&cell) {
            container.create_group(&cell)?;
            container.set_attr(&cell, ATTR_CLASS, CLASS_GROUP.into())?;
        }
        let experiments = coord.experiments_path();
        if !container.exists(&experiments) {
            container.create_group(&experiments)?;
            container.set_attr(&experiments, ATTR_CLASS, CLASS_GROUP.into())?;
        }

        let layout = DatasetLayout::new(TimeSeriesRecord::record_type(), vec![base_size], true);
        container.create_dataset(&ts_path, layout)?;
        container.set_attr(&ts_path, ATTR_NROWS, AttrValue::UInt(0))?;
        container.set_attr(&ts_path, ATTR_TITLE, coord.key().into())?;
        container.set_attr(&ts_path, ATTR_CLASS, CLASS_TABLE.into())?;
        container.set_attr(&ts_path, ATTR_BASE_SIZE, AttrValue::UInt(base_size as u64))?;
        debug!(cell = %coord, capacity = base_size, "created time series");
        Ok(ts_path)
    }

    /// Append one sample and move the raster value of the cell.
    pub fn append_one(&mut self, coord: Coordinate, record: TimeSeriesRecord) -> StoreResult<()> {
        let ts_path = self.ensure_timeseries(coord)?;
        Table::open(self.container_mut(), &ts_path)?.append(record.into())?;
        self.update_cell(coord, record.current, record.voltage)
    }

    /// Append many samples with a single capacity adjustment. The raster takes
    /// the values of the last row.
    pub fn append_bulk(&mut self, coord: Coordinate, samples: BulkSamples<'_>) -> StoreResult<()> {
        self.check_coord(coord)?;
        let last = samples
            .current
            .last()
            .copied()
            .zip(samples.voltage.last().copied());
        let records = samples.into_records()?;

        let ts_path = self.ensure_timeseries(coord)?;
        let (current, voltage) = match last {
            Some(last) if !records.is_empty() => last,
            _ => return Ok(()),
        };
        Table::open(self.container_mut(), &ts_path)?.append_rows(&records)?;
        self.update_cell(coord, current, voltage)
    }

    /// Valid rows of a cell's log, oldest first.
    pub fn timeseries(&self, coord: Coordinate) -> StoreResult<Vec<TimeSeriesRecord>> {
        self.check_coord(coord)?;
        let ts_path = coord.timeseries_path();
        let container = self.container();
        if container.node_kind(&ts_path) != Some(NodeKind::Dataset) {
            return Err(StoreError::Lookup(format!("no time series for cell {}", coord)));
        }
        let layout = container.layout(&ts_path)?;
        let rows = container
            .attr(&ts_path, ATTR_NROWS)?
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize;
        container
            .read_records(&ts_path, 0..rows.min(layout.rows()))?
            .iter()
            .map(TimeSeriesRecord::try_from)
            .collect()
    }

    /// Handle on a cell's log for direct table access.
    pub fn timeseries_table(&mut self, coord: Coordinate) -> StoreResult<Table<'_>> {
        self.check_coord(coord)?;
        let ts_path = coord.timeseries_path();
        if self.container().node_kind(&ts_path) != Some(NodeKind::Dataset) {
            return Err(StoreError::Lookup(format!("no time series for cell {}", coord)));
        }
        Table::open(self.container_mut(), &ts_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Dimensions, StoreOptions};
    use crate::container::{MemoryContainer, OpenMode};

    fn small_store(base_size: usize) -> Store {
        Store::initialize(
            Box::new(MemoryContainer::new(OpenMode::Write)),
            Dimensions::new(4, 4),
            None,
            StoreOptions { base_size },
        )
        .unwrap()
    }

    #[test]
    fn test_op_kind_flags() {
        assert!(OpKind::PULSE_READ.is_read() && OpKind::PULSE_READ.is_pulse());
        assert!(OpKind::READ.is_read() && !OpKind::READ.is_pulse());
        assert_eq!(OpKind::PULSE.to_string(), "pulse");
    }

    #[test]
    fn test_broadcast_resolve() {
        assert_eq!(Broadcast::Scalar(2.0f32).resolve(3).unwrap(), vec![2.0; 3]);
        assert_eq!(Broadcast::from(vec![1.5f32]).resolve(4).unwrap(), vec![1.5; 4]);
        assert_eq!(Broadcast::from(vec![1u8, 2]).resolve(2).unwrap(), vec![1, 2]);
        let err = Broadcast::from(vec![1.0f32, 2.0]).resolve(3).unwrap_err();
        assert!(matches!(err, StoreError::Dims(_)));
    }

    #[test]
    fn test_append_one_updates_raster() {
        let mut store = small_store(2);
        let coord = Coordinate::new(1, 2);
        for _ in 0..3 {
            store
                .append_one(coord, TimeSeriesRecord::new(1e-6, 0.5, 0.0, 0.5, OpKind::READ))
                .unwrap();
        }

        let rows = store.timeseries(coord).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.op == OpKind::READ));
        assert_eq!(store.timeseries_table(coord).unwrap().capacity(), 4);
        assert_eq!(store.voltage().unwrap().get(2, 1), Some(0.5));
        assert_eq!(store.current().unwrap().get(2, 1), Some(1e-6));
    }

    #[test]
    fn test_append_bulk_uses_last_row() {
        let mut store = small_store(1000);
        let coord = Coordinate::new(0, 3);
        let current = [1.0, 2.0, 3.0];
        let voltage = [0.1, 0.2, 0.3];
        let pw = [1e-6; 3];
        store
            .append_bulk(
                coord,
                BulkSamples::new(&current, &voltage, &pw)
                    .read_voltage(vec![0.2])
                    .op(OpKind::PULSE_READ),
            )
            .unwrap();

        let rows = store.timeseries(coord).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.read_voltage == 0.2));
        assert_eq!(rows[1].current, 2.0);
        assert_eq!(store.current().unwrap().get(3, 0), Some(3.0));
        assert_eq!(store.voltage().unwrap().get(3, 0), Some(0.3));
    }

    #[test]
    fn test_append_bulk_length_mismatch() {
        let mut store = small_store(10);
        let err = store
            .append_bulk(
                Coordinate::new(0, 0),
                BulkSamples::new(&[1.0, 2.0], &[1.0], &[0.0, 0.0]),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Dims(_)));
    }

    #[test]
    fn test_empty_bulk_creates_log() {
        let mut store = small_store(10);
        let coord = Coordinate::new(3, 3);
        store
            .append_bulk(coord, BulkSamples::new(&[], &[], &[]))
            .unwrap();
        assert!(store.timeseries(coord).unwrap().is_empty());
    }

    #[test]
    fn test_missing_and_out_of_range() {
        let mut store = small_store(10);
        let err = store.timeseries(Coordinate::new(0, 0)).unwrap_err();
        assert!(matches!(err, StoreError::Lookup(_)));
        let err = store.ensure_timeseries(Coordinate::new(0, 4)).unwrap_err();
        assert!(matches!(err, StoreError::Dims(_)));
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let mut store = small_store(10);
        let coord = Coordinate::new(2, 2);
        store
            .append_one(coord, TimeSeriesRecord::new(1.0, 1.0, 0.0, 0.0, OpKind::PULSE))
            .unwrap();
        store.ensure_timeseries(coord).unwrap();
        assert_eq!(store.timeseries(coord).unwrap().len(), 1);
    }
}
