//! The experiment data store.
//!
//! A [`Store`] is bound to one open container and records a crossbar of
//! `words × bits` cells:
//!
//! ```text
//! /                          version, words, bits, TITLE
//! ├── crossbar               raster view, last known value per cell
//! │    ├── current           f32, shape = (bits, words)
//! │    └── voltage           f32, shape = (bits, words)
//! ├── crosspoints            data tied to a single cell
//! │    └── W00B00
//! │         ├── timeseries   biasing history, growable
//! │         └── experiments  per-cell experiment tables and groups
//! └── synthetics             experiments spanning several cells
//! ```
//!
//! The store models a single writer. Every operation is synchronous and
//! visible to the next read; durability is only guaranteed after
//! [`Store::flush`] or [`Store::close`].

pub mod crosspoint;
pub mod experiment;
pub mod raster;
pub mod schema;
pub mod table;
pub mod timeseries;

use crate::config::StoreConfig;
use crate::container::{
    path, AttrValue, Container, FileContainer, MemoryContainer, NodeKind, OpenMode,
};
use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::{info, warn};

pub use crosspoint::Crosspoint;
pub use experiment::{ExperimentGroup, GroupRef, TableSpec};
pub use raster::Matrix;
pub use schema::FormatVersion;
pub use table::{grown_capacity, Table};
pub use timeseries::{Broadcast, BulkSamples, OpKind, TimeSeriesRecord};

/// Crossbar size: number of word lines and bit lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub words: u32,
    pub bits: u32,
}

impl Dimensions {
    pub fn new(words: u32, bits: u32) -> Self {
        Self { words, bits }
    }

    pub fn contains(&self, coord: Coordinate) -> bool {
        coord.word < self.words && coord.bit < self.bits
    }

    /// Number of cells.
    pub fn cells(&self) -> usize {
        self.words as usize * self.bits as usize
    }
}

/// A crosspoint (cell) address: 0-based word line and bit line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Coordinate {
    pub word: u32,
    pub bit: u32,
}

impl Coordinate {
    pub fn new(word: u32, bit: u32) -> Self {
        Self { word, bit }
    }

    /// Group name of this cell under `/crosspoints`, e.g. `W05B07`.
    pub fn key(&self) -> String {
        format!("W{:02}B{:02}", self.word, self.bit)
    }

    /// Inverse of [`Coordinate::key`].
    pub fn parse_key(key: &str) -> Option<Self> {
        let rest = key.strip_prefix('W')?;
        let (word, bit) = rest.split_once('B')?;
        Some(Self {
            word: word.parse().ok()?,
            bit: bit.parse().ok()?,
        })
    }

    /// Absolute path of this cell's group.
    pub fn path(&self) -> String {
        path::join(schema::CROSSPOINTS, &self.key())
    }

    pub(crate) fn timeseries_path(&self) -> String {
        path::join(&self.path(), schema::TIMESERIES)
    }

    pub(crate) fn experiments_path(&self) -> String {
        path::join(&self.path(), schema::EXPERIMENTS)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

impl From<(u32, u32)> for Coordinate {
    fn from((word, bit): (u32, u32)) -> Self {
        Self { word, bit }
    }
}

/// Tunables fixed for the lifetime of an open store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Initial capacity of a new time-series log and its growth base.
    pub base_size: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            base_size: schema::DEFAULT_BASE_SIZE,
        }
    }
}

impl From<&StoreConfig> for StoreOptions {
    fn from(config: &StoreConfig) -> Self {
        Self {
            base_size: config.storage.base_size,
        }
    }
}

/// Root object bound to one open container.
pub struct Store {
    container: Box<dyn Container>,
    dims: Dimensions,
    version: FormatVersion,
    options: StoreOptions,
    last_stamp: u64,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("location", &self.container.location())
            .field("mode", &self.container.mode())
            .field("dims", &self.dims)
            .field("version", &self.version)
            .finish()
    }
}

impl Store {
    /// Create (or truncate) a store file with the given crossbar size.
    ///
    /// The title defaults to the file name when not given. The new layout is
    /// written before returning; an existing file is only replaced once the
    /// layout has been built.
    pub fn create(path: &Path, dims: Dimensions, title: Option<&str>) -> StoreResult<Self> {
        Self::create_with(path, dims, title, StoreOptions::default())
    }

    pub fn create_with(
        path: &Path,
        dims: Dimensions,
        title: Option<&str>,
        options: StoreOptions,
    ) -> StoreResult<Self> {
        schema::check_dimensions(dims)?;
        let container = FileContainer::open(path, OpenMode::Write)?;
        let title = title.map(str::to_string).or_else(|| file_title(path));
        let mut store = Self::initialize(Box::new(container), dims, title.as_deref(), options)?;
        store.flush()?;
        info!(path = %path.display(), words = dims.words, bits = dims.bits, "created store");
        Ok(store)
    }

    /// Open an existing store file. The layout is validated before returning.
    ///
    /// `OpenMode::Write` needs dimensions and is rejected here; use
    /// [`Store::create`]. `OpenMode::Append` on a missing file is rejected for
    /// the same reason; use [`Store::open_or_create`].
    pub fn open(path: &Path, mode: OpenMode) -> StoreResult<Self> {
        Self::open_with(path, mode, StoreOptions::default())
    }

    pub fn open_with(path: &Path, mode: OpenMode, options: StoreOptions) -> StoreResult<Self> {
        if mode == OpenMode::Write || (mode == OpenMode::Append && !path.exists()) {
            return Err(StoreError::Dims(format!(
                "opening {} in mode '{}' creates a new store and requires dimensions",
                path.display(),
                mode
            )));
        }
        let container = FileContainer::open(path, mode)?;
        let store = Self::attach(Box::new(container), options)?;
        info!(path = %path.display(), %mode, words = store.dims.words, bits = store.dims.bits, "opened store");
        Ok(store)
    }

    /// Open a store in append mode, creating and initializing it if missing.
    pub fn open_or_create(path: &Path, dims: Dimensions, title: Option<&str>) -> StoreResult<Self> {
        let container = FileContainer::open(path, OpenMode::Append)?;
        if container.was_created() {
            schema::check_dimensions(dims)?;
            let title = title.map(str::to_string).or_else(|| file_title(path));
            let mut store = Self::initialize(
                Box::new(container),
                dims,
                title.as_deref(),
                StoreOptions::default(),
            )?;
            store.flush()?;
            info!(path = %path.display(), words = dims.words, bits = dims.bits, "created store");
            return Ok(store);
        }
        let store = Self::attach(Box::new(container), StoreOptions::default())?;
        info!(path = %path.display(), mode = "a", "opened store");
        Ok(store)
    }

    /// Volatile store, never written to disk.
    pub fn in_memory(dims: Dimensions, title: Option<&str>) -> StoreResult<Self> {
        Self::initialize(
            Box::new(MemoryContainer::new(OpenMode::Write)),
            dims,
            title,
            StoreOptions::default(),
        )
    }

    /// Build the layout in a fresh container.
    pub fn initialize(
        mut container: Box<dyn Container>,
        dims: Dimensions,
        title: Option<&str>,
        options: StoreOptions,
    ) -> StoreResult<Self> {
        schema::initialize(container.as_mut(), dims, title)?;
        Ok(Self {
            container,
            dims,
            version: FormatVersion::CURRENT,
            options,
            last_stamp: 0,
        })
    }

    /// Validate an already populated container and wrap it.
    pub fn attach(container: Box<dyn Container>, options: StoreOptions) -> StoreResult<Self> {
        let (dims, version) = schema::validate(container.as_ref())?;
        Ok(Self {
            container,
            dims,
            version,
            options,
            last_stamp: 0,
        })
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dims
    }

    pub fn version(&self) -> FormatVersion {
        self.version
    }

    pub fn mode(&self) -> OpenMode {
        self.container.mode()
    }

    pub fn options(&self) -> StoreOptions {
        self.options
    }

    /// Backing file, `None` for in-memory stores.
    pub fn location(&self) -> Option<&Path> {
        self.container.location()
    }

    /// Display title, if one was recorded.
    pub fn title(&self) -> StoreResult<Option<String>> {
        Ok(self
            .container
            .attr(path::ROOT, schema::ATTR_TITLE)?
            .and_then(|v| v.as_str().map(str::to_string)))
    }

    /// Change the display title. This is not the file name.
    pub fn set_title(&mut self, title: &str) -> StoreResult<()> {
        self.container
            .set_attr(path::ROOT, schema::ATTR_TITLE, AttrValue::from(title))
    }

    /// Top-level node names.
    pub fn keys(&self) -> StoreResult<Vec<String>> {
        self.container.children(path::ROOT)
    }

    /// Whether a backing file is missing changes made through this store.
    /// Always false for in-memory stores.
    pub fn has_unsaved_changes(&self) -> bool {
        self.container.location().is_some()
            && self.container.mode().is_writable()
            && self.container.is_dirty()
    }

    /// Write every pending change to the backing file.
    pub fn flush(&mut self) -> StoreResult<()> {
        self.container.flush()
    }

    /// Flush and release the file.
    pub fn close(mut self) -> StoreResult<()> {
        self.container.flush()?;
        if let Some(location) = self.container.location() {
            info!(path = %location.display(), "closed store");
        }
        Ok(())
    }

    /// JSON description of the whole node tree: groups, datasets with their
    /// shapes and fields, and all attributes. Data is not included.
    pub fn summary(&self) -> StoreResult<serde_json::Value> {
        describe(self.container.as_ref(), path::ROOT)
    }

    pub(crate) fn check_coord(&self, coord: Coordinate) -> StoreResult<()> {
        if self.dims.contains(coord) {
            Ok(())
        } else {
            Err(StoreError::Dims(format!(
                "cell {} outside crossbar of {} words × {} bits",
                coord, self.dims.words, self.dims.bits
            )))
        }
    }

    /// Nanosecond wall-clock stamp, strictly increasing for this store.
    pub(crate) fn next_stamp(&mut self) -> u64 {
        let now = chrono::Utc::now()
            .timestamp_nanos_opt()
            .and_then(|ns| u64::try_from(ns).ok())
            .unwrap_or(0);
        self.last_stamp = now.max(self.last_stamp + 1);
        self.last_stamp
    }

    pub(crate) fn container(&self) -> &dyn Container {
        self.container.as_ref()
    }

    pub(crate) fn container_mut(&mut self) -> &mut dyn Container {
        self.container.as_mut()
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if self.has_unsaved_changes() {
            warn!(
                location = ?self.container.location(),
                "store dropped with unflushed changes; call close() to persist them"
            );
        }
    }
}

fn file_title(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

fn attr_json(value: &AttrValue) -> serde_json::Value {
    use serde_json::json;
    match value {
        AttrValue::Int(v) => json!(v),
        AttrValue::UInt(v) => json!(v),
        AttrValue::Float(v) => json!(v),
        AttrValue::Str(s) => json!(s),
        AttrValue::Coords(c) => json!(c.iter().map(|(w, b)| [w, b]).collect::<Vec<_>>()),
    }
}

fn describe(container: &dyn Container, node: &str) -> StoreResult<serde_json::Value> {
    let mut attrs = serde_json::Map::new();
    for name in container.attr_names(node)? {
        if let Some(value) = container.attr(node, &name)? {
            attrs.insert(name, attr_json(&value));
        }
    }

    match container.node_kind(node) {
        Some(NodeKind::Dataset) => {
            let layout = container.layout(node)?;
            let fields: Vec<_> = layout
                .record_type
                .fields()
                .iter()
                .map(|f| serde_json::json!({ "name": f.name, "kind": f.kind.to_string() }))
                .collect();
            Ok(serde_json::json!({
                "type": "dataset",
                "shape": layout.shape,
                "resizable": layout.resizable,
                "fields": fields,
                "attrs": attrs,
            }))
        }
        Some(NodeKind::Group) => {
            let mut children = serde_json::Map::new();
            for child in container.children(node)? {
                let child_path = path::join(node, &child);
                children.insert(child, describe(container, &child_path)?);
            }
            Ok(serde_json::json!({
                "type": "group",
                "attrs": attrs,
                "children": children,
            }))
        }
        None => Err(StoreError::Lookup(format!("no such node: {}", node))),
    }
}
