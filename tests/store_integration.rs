//! End-to-end tests of the experiment store against real files.
//!
//! Covers:
//! - the single-cell biasing scenario (log + raster)
//! - durability across close / reopen
//! - read-only handles rejecting every mutation
//! - open-mode semantics (create, append, read-write)
//! - experiment tables surviving a reopen
//! - rejected creations leaving existing files untouched
//! - time-series logs refusing in-place rewrites

use anyhow::Result;
use crossbar_store::container::{Column, FieldKind, OpenMode, RecordType, Value};
use crossbar_store::store::{BulkSamples, TableSpec};
use crossbar_store::{Coordinate, Dimensions, OpKind, Record, Store, StoreError, TimeSeriesRecord};
use std::path::PathBuf;
use tempfile::TempDir;

/// Helper to create a scratch directory and a store path inside it
fn scratch(name: &str) -> Result<(TempDir, PathBuf)> {
    let dir = TempDir::new()?;
    let path = dir.path().join(name);
    Ok((dir, path))
}

fn read_sample() -> TimeSeriesRecord {
    TimeSeriesRecord::new(1e-6, 0.5, 0.0, 0.5, OpKind::READ)
}

#[test]
fn test_single_cell_scenario() -> Result<()> {
    let (_dir, path) = scratch("scenario.xbh")?;
    let mut store = Store::create(&path, Dimensions::new(4, 4), None)?;
    let cell = Coordinate::new(1, 2);

    for _ in 0..3 {
        store.append_one(cell, read_sample())?;
    }

    let rows = store.timeseries(cell)?;
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| *r == read_sample()));

    // raster is indexed (bit, word)
    assert_eq!(store.voltage()?.get(2, 1), Some(0.5));
    assert_eq!(store.current()?.get(2, 1), Some(1e-6));
    assert_eq!(store.title()?.as_deref(), Some("scenario.xbh"));

    store.close()?;
    Ok(())
}

#[test]
fn test_reopen_preserves_everything() -> Result<()> {
    let (_dir, path) = scratch("reopen.xbh")?;
    let cell = Coordinate::new(3, 0);
    let table_path;
    {
        let mut store = Store::create(&path, Dimensions::new(4, 2), Some("wafer 7"))?;
        store.append_bulk(
            cell,
            BulkSamples::new(&[1e-6, 2e-6], &[0.2, 0.4], &[1e-5, 1e-5]).op(OpKind::PULSE_READ),
        )?;

        let rt = RecordType::new([("voltage", FieldKind::F32), ("current", FieldKind::F32)]);
        let mut table = store.make_cell_table(cell, "curvetracer", TableSpec::new(2, rt))?;
        for i in 0..3 {
            table.append(Record::new(vec![Value::F32(i as f32), Value::F32(1e-6)]))?;
        }
        table.set_attr("vstep", 0.1)?;
        table_path = table.path().to_string();
        store.close()?;
    }

    let mut store = Store::open(&path, OpenMode::ReadWrite)?;
    assert_eq!(store.dimensions(), Dimensions::new(4, 2));
    assert_eq!(store.title()?.as_deref(), Some("wafer 7"));
    assert_eq!(store.timeseries(cell)?.len(), 2);
    assert_eq!(store.current()?.get(0, 3), Some(2e-6));
    assert_eq!(store.experiments(cell)?.len(), 1);

    let table = store.table(&table_path)?;
    assert_eq!(table.len()?, 3);
    assert_eq!(table.capacity(), 4);
    assert_eq!(table.coordinates()?, vec![cell]);
    assert!(table.attr("vstep")?.is_some());
    Ok(())
}

#[test]
fn test_read_only_rejects_mutations() -> Result<()> {
    let (_dir, path) = scratch("ro.xbh")?;
    Store::create(&path, Dimensions::new(2, 2), None)?.close()?;

    let mut store = Store::open(&path, OpenMode::Read)?;
    let cell = Coordinate::new(0, 0);
    assert!(matches!(
        store.append_one(cell, read_sample()),
        Err(StoreError::Access(_))
    ));
    assert!(matches!(
        store.make_cell_group(cell, "g", true),
        Err(StoreError::Access(_))
    ));
    assert!(matches!(store.set_title("x"), Err(StoreError::Access(_))));
    assert!(matches!(
        store.update_cell(cell, 1.0, 1.0),
        Err(StoreError::Access(_))
    ));

    // reads still work
    assert_eq!(store.current()?.as_slice().len(), 4);
    store.close()?;
    Ok(())
}

#[test]
fn test_open_or_create() -> Result<()> {
    let (_dir, path) = scratch("append.xbh")?;
    let cell = Coordinate::new(1, 1);

    let mut store = Store::open_or_create(&path, Dimensions::new(2, 2), None)?;
    store.append_one(cell, read_sample())?;
    store.close()?;

    // dimensions are ignored once the file exists
    let mut store = Store::open_or_create(&path, Dimensions::new(9, 9), None)?;
    assert_eq!(store.dimensions(), Dimensions::new(2, 2));
    store.append_one(cell, read_sample())?;
    store.close()?;

    let store = Store::open(&path, OpenMode::Read)?;
    assert_eq!(store.timeseries(cell)?.len(), 2);
    Ok(())
}

#[test]
fn test_open_missing_file() -> Result<()> {
    let (_dir, path) = scratch("missing.xbh")?;
    let err = Store::open(&path, OpenMode::Read).unwrap_err();
    assert!(matches!(err, StoreError::Io(_)));
    let err = Store::open(&path, OpenMode::Append).unwrap_err();
    assert!(matches!(err, StoreError::Dims(_)));
    Ok(())
}

#[test]
fn test_foreign_file_is_format_error() -> Result<()> {
    let (_dir, path) = scratch("foreign.xbh")?;
    std::fs::write(&path, b"definitely not a store")?;
    let err = Store::open(&path, OpenMode::Read).unwrap_err();
    assert!(matches!(err, StoreError::Format(_)));
    Ok(())
}

#[test]
fn test_unflushed_changes_are_not_persisted() -> Result<()> {
    let (_dir, path) = scratch("dropped.xbh")?;
    Store::create(&path, Dimensions::new(2, 2), None)?.close()?;
    {
        let mut store = Store::open(&path, OpenMode::ReadWrite)?;
        store.append_one(Coordinate::new(0, 1), read_sample())?;
        // dropped without close
    }
    let store = Store::open(&path, OpenMode::Read)?;
    assert!(store.crosspoints()?.is_empty());
    Ok(())
}

#[test]
fn test_synthetic_experiment_round_trip() -> Result<()> {
    let (_dir, path) = scratch("synthetic.xbh")?;
    let cells = [Coordinate::new(0, 0), Coordinate::new(1, 1), Coordinate::new(2, 0)];
    {
        let mut store = Store::create(&path, Dimensions::new(3, 2), None)?;
        let group = store.make_synthetic_group(&cells, "crosstalk", true)?;
        let rt = RecordType::scalar(FieldKind::F64);
        let mut table = store.make_synthetic_table(
            &cells,
            "map",
            TableSpec::new(3, rt).fixed().in_group(&group),
        )?;
        let rows: Vec<_> = (0..3).map(|i| Record::new(vec![Value::F64(f64::from(i))])).collect();
        table.write_rows(0, &rows)?;
        store.close()?;
    }

    let mut store = Store::open(&path, OpenMode::Read)?;
    assert_eq!(store.crosspoints()?, {
        let mut sorted = cells.to_vec();
        sorted.sort();
        sorted
    });
    let names = store.synthetics()?;
    assert_eq!(names.len(), 1);
    let group = store.group(&format!("/synthetics/{}", names[0]))?;
    assert_eq!(group.coordinates(), &cells);

    let summary = store.summary()?;
    let tables = summary["children"]["synthetics"]["children"][names[0].as_str()]["children"]
        .as_object()
        .map(|m| m.len());
    assert_eq!(tables, Some(1));

    let table_name = &summary["children"]["synthetics"]["children"][names[0].as_str()]["children"]
        .as_object()
        .and_then(|m| m.keys().next().cloned())
        .unwrap_or_default();
    let table = store.table(&format!("{}/{}", group.path(), table_name))?;
    assert_eq!(table.read()?.len(), 3);
    Ok(())
}

#[test]
fn test_failed_create_keeps_existing_store() -> Result<()> {
    let (_dir, path) = scratch("kept.xbh")?;
    let cell = Coordinate::new(1, 0);
    let mut store = Store::create(&path, Dimensions::new(2, 2), None)?;
    store.append_one(cell, read_sample())?;
    store.close()?;

    let err = Store::create(&path, Dimensions::new(0, 4), None).unwrap_err();
    assert!(matches!(err, StoreError::Dims(_)));

    let store = Store::open(&path, OpenMode::Read)?;
    assert_eq!(store.dimensions(), Dimensions::new(2, 2));
    assert_eq!(store.timeseries(cell)?, vec![read_sample()]);
    Ok(())
}

#[test]
fn test_failed_open_or_create_leaves_no_file() -> Result<()> {
    let (_dir, path) = scratch("fresh.xbh")?;
    let err = Store::open_or_create(&path, Dimensions::new(0, 0), None).unwrap_err();
    assert!(matches!(err, StoreError::Dims(_)));
    assert!(!path.exists());

    // a retry with valid dimensions creates the store normally
    let store = Store::open_or_create(&path, Dimensions::new(4, 4), None)?;
    assert_eq!(store.dimensions(), Dimensions::new(4, 4));
    store.close()?;
    assert!(Store::open(&path, OpenMode::Read).is_ok());
    Ok(())
}

#[test]
fn test_timeseries_log_is_append_only() -> Result<()> {
    let (_dir, path) = scratch("history.xbh")?;
    let cell = Coordinate::new(0, 1);
    let mut store = Store::create(&path, Dimensions::new(2, 2), None)?;
    store.append_one(cell, read_sample())?;

    let mut log = store.timeseries_table(cell)?;
    let forged: Record = TimeSeriesRecord::new(9.0, 9.0, 9.0, 9.0, OpKind::PULSE).into();
    assert!(matches!(
        log.write_rows(0, &[forged]),
        Err(StoreError::Dims(_))
    ));
    let capacity = log.capacity();
    assert!(matches!(
        log.write_column("current", &Column::F32(vec![7.0; capacity])),
        Err(StoreError::Dims(_))
    ));
    drop(log);

    assert_eq!(store.timeseries(cell)?, vec![read_sample()]);
    assert_eq!(store.current()?.get(1, 0), Some(read_sample().current));
    store.close()?;
    Ok(())
}
