//! # Crossbar Store
//!
//! A hierarchical data store for characterising crossbar devices: a matrix of
//! `words × bits` resistive cells (crosspoints), each biased and read many
//! times over an experiment campaign. One store file holds everything recorded
//! against one device.
//!
//! ## Crate Structure
//!
//! - **`container`**: the hierarchical container abstraction (groups, typed
//!   datasets, attributes) with an in-memory and a single-file backend.
//! - **`store`**: the experiment store on top of it. Holds the schema manager,
//!   the crossbar raster, per-cell growable time-series logs and the
//!   experiment namespace.
//! - **`config`**: `figment`-based configuration loaded from TOML and the
//!   environment.
//! - **`logging`**: `tracing-subscriber` setup for applications embedding the
//!   store.
//! - **`error`**: the `StoreError` enum shared by every module.
//!
//! ## Example
//! ```no_run
//! use crossbar_store::{Coordinate, Dimensions, OpKind, Store, TimeSeriesRecord};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), crossbar_store::StoreError> {
//! let mut store = Store::create(Path::new("device.xbh"), Dimensions::new(32, 32), None)?;
//! let cell = Coordinate::new(1, 2);
//! store.append_one(cell, TimeSeriesRecord::new(1e-6, 0.5, 0.0, 0.5, OpKind::READ))?;
//! assert_eq!(store.timeseries(cell)?.len(), 1);
//! store.close()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod container;
pub mod error;
pub mod logging;
pub mod store;

pub use container::{Container, FieldKind, OpenMode, Record, RecordType, Value};
pub use error::{StoreError, StoreResult};
pub use store::{
    BulkSamples, Coordinate, Dimensions, ExperimentGroup, Matrix, OpKind, Store, StoreOptions,
    Table, TableSpec, TimeSeriesRecord,
};
