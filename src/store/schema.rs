//! Root layout: creation and validation.
//!
//! ## Attributes
//!
//! ```text
//!        root node: H5DS_VERSION_MAJOR: int (mandatory)
//!                   H5DS_VERSION_MINOR: int (mandatory)
//!                   PYTABLES_FORMAT_VERSION: str (optional, never validated)
//!                   words: int (mandatory)
//!                   bits: int (mandatory)
//!                   TITLE: str (optional)
//!    crossbar node: words: int (mandatory)
//!                   bits: int (mandatory)
//!  synthetic tests: crosspoints: [(word, bit)] (mandatory)
//!  crosspoint tests: crosspoints: [(word, bit)], one entry (mandatory)
//! ```
//!
//! Every growable table, the built-in time series included, carries `NROWS`
//! (next free row) and `BASE_SIZE` (growth base).

use crate::container::{
    path, AttrValue, Container, DatasetLayout, FieldKind, NodeKind, RecordType,
};
use crate::error::{StoreError, StoreResult};
use crate::store::Dimensions;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const VERSION_MAJOR: i64 = 0;
pub const VERSION_MINOR: i64 = 2;

pub const ATTR_VERSION_MAJOR: &str = "H5DS_VERSION_MAJOR";
pub const ATTR_VERSION_MINOR: &str = "H5DS_VERSION_MINOR";
pub const ATTR_COMPAT_VERSION: &str = "PYTABLES_FORMAT_VERSION";
pub const COMPAT_VERSION: &str = "2.1";
pub const ATTR_WORDS: &str = "words";
pub const ATTR_BITS: &str = "bits";
pub const ATTR_TITLE: &str = "TITLE";
pub const ATTR_CLASS: &str = "CLASS";
pub const ATTR_NROWS: &str = "NROWS";
pub const ATTR_BASE_SIZE: &str = "BASE_SIZE";
pub const ATTR_TSTAMP: &str = "TSTAMP";
pub const ATTR_CROSSPOINTS: &str = "crosspoints";

pub const CLASS_GROUP: &str = "GROUP";
pub const CLASS_TABLE: &str = "TABLE";

pub const CROSSBAR: &str = "/crossbar";
pub const CROSSPOINTS: &str = "/crosspoints";
pub const SYNTHETICS: &str = "/synthetics";
pub const NAMESPACES: [&str; 3] = [CROSSBAR, CROSSPOINTS, SYNTHETICS];

pub const RASTER_CURRENT: &str = "/crossbar/current";
pub const RASTER_VOLTAGE: &str = "/crossbar/voltage";

pub const TIMESERIES: &str = "timeseries";
pub const EXPERIMENTS: &str = "experiments";

/// Default growth base of new time-series logs.
pub const DEFAULT_BASE_SIZE: usize = 1000;

/// Format version recorded in the root attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FormatVersion {
    pub major: i64,
    pub minor: i64,
}

impl FormatVersion {
    pub const CURRENT: FormatVersion = FormatVersion {
        major: VERSION_MAJOR,
        minor: VERSION_MINOR,
    };
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

pub(crate) fn raster_layout(dims: Dimensions) -> DatasetLayout {
    DatasetLayout::new(
        RecordType::scalar(FieldKind::F32),
        vec![dims.bits as usize, dims.words as usize],
        false,
    )
}

/// Write version metadata, dimensions, the three namespaces, and the raster.
///
/// Namespaces and raster datasets that already exist are left alone.
pub fn initialize(
    container: &mut dyn Container,
    dims: Dimensions,
    title: Option<&str>,
) -> StoreResult<()> {
    if !container.mode().is_writable() {
        return Err(StoreError::Access("File is opened read-only".into()));
    }
    check_dimensions(dims)?;

    let root = path::ROOT;
    container.set_attr(root, ATTR_CLASS, CLASS_GROUP.into())?;
    container.set_attr(root, ATTR_COMPAT_VERSION, COMPAT_VERSION.into())?;
    container.set_attr(root, ATTR_VERSION_MAJOR, AttrValue::Int(VERSION_MAJOR))?;
    container.set_attr(root, ATTR_VERSION_MINOR, AttrValue::Int(VERSION_MINOR))?;
    if let Some(title) = title {
        container.set_attr(root, ATTR_TITLE, title.into())?;
    }
    container.set_attr(root, ATTR_WORDS, AttrValue::Int(i64::from(dims.words)))?;
    container.set_attr(root, ATTR_BITS, AttrValue::Int(i64::from(dims.bits)))?;

    for ns in NAMESPACES {
        if !container.exists(ns) {
            container.create_group(ns)?;
        }
        container.set_attr(ns, ATTR_CLASS, CLASS_GROUP.into())?;
    }

    for raster in [RASTER_VOLTAGE, RASTER_CURRENT] {
        if !container.exists(raster) {
            container.create_dataset(raster, raster_layout(dims))?;
        }
    }

    container.set_attr(CROSSBAR, ATTR_WORDS, AttrValue::Int(i64::from(dims.words)))?;
    container.set_attr(CROSSBAR, ATTR_BITS, AttrValue::Int(i64::from(dims.bits)))?;

    Ok(())
}

/// Reject crossbars without at least one word and one bit.
pub fn check_dimensions(dims: Dimensions) -> StoreResult<()> {
    if dims.words == 0 || dims.bits == 0 {
        return Err(StoreError::Dims(format!(
            "crossbar needs at least one word and one bit, got {}×{}",
            dims.words, dims.bits
        )));
    }
    Ok(())
}

/// Check that `container` holds a store layout this version understands.
///
/// Checks, in order: version attributes, the three namespaces, dimension
/// attributes on the root and on `crossbar`, their agreement, the raster
/// shapes, and finally the major version.
pub fn validate(container: &dyn Container) -> StoreResult<(Dimensions, FormatVersion)> {
    let name = container
        .location()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "<memory>".to_string());
    let root = path::ROOT;

    let major = int_attr(container, root, ATTR_VERSION_MAJOR)?;
    let minor = int_attr(container, root, ATTR_VERSION_MINOR)?;
    let (Some(major), Some(minor)) = (major, minor) else {
        return Err(StoreError::Format(format!(
            "File {} does not specify a file format version",
            name
        )));
    };
    let version = FormatVersion { major, minor };

    for ns in NAMESPACES {
        if container.node_kind(ns) != Some(NodeKind::Group) {
            return Err(StoreError::Format(format!(
                "File {} is missing root base group {}",
                name,
                path::basename(ns)
            )));
        }
    }

    let missing_dims =
        || StoreError::Format(format!("File {} does not provide crossbar dimensions", name));
    let words = dim_attr(container, root, ATTR_WORDS, &name)?.ok_or_else(missing_dims)?;
    let bits = dim_attr(container, root, ATTR_BITS, &name)?.ok_or_else(missing_dims)?;
    let xb_words = dim_attr(container, CROSSBAR, ATTR_WORDS, &name)?.ok_or_else(missing_dims)?;
    let xb_bits = dim_attr(container, CROSSBAR, ATTR_BITS, &name)?.ok_or_else(missing_dims)?;
    if (words, bits) != (xb_words, xb_bits) {
        return Err(StoreError::Format(format!(
            "File {} has inconsistent crossbar dimensions: root {}×{}, crossbar {}×{}",
            name, words, bits, xb_words, xb_bits
        )));
    }

    let dims = Dimensions::new(words, bits);
    let expected = vec![bits as usize, words as usize];
    for raster in [RASTER_VOLTAGE, RASTER_CURRENT] {
        let layout = container.layout(raster).map_err(|_| {
            StoreError::Format(format!("File {} is missing raster {}", name, raster))
        })?;
        if layout.shape != expected {
            return Err(StoreError::Format(format!(
                "File {} raster {} has shape {:?}, expected {:?}",
                name, raster, layout.shape, expected
            )));
        }
    }

    if major != VERSION_MAJOR {
        return Err(StoreError::Format(format!(
            "File {} uses format {} which is incompatible with {}",
            name,
            version,
            FormatVersion::CURRENT
        )));
    }

    Ok((dims, version))
}

fn int_attr(container: &dyn Container, node: &str, key: &str) -> StoreResult<Option<i64>> {
    Ok(container.attr(node, key)?.and_then(|v| v.as_i64()))
}

fn dim_attr(
    container: &dyn Container,
    node: &str,
    key: &str,
    name: &str,
) -> StoreResult<Option<u32>> {
    match int_attr(container, node, key)? {
        None => Ok(None),
        Some(v) => match u32::try_from(v) {
            Ok(d) if d > 0 => Ok(Some(d)),
            _ => Err(StoreError::Format(format!(
                "File {} has invalid {} dimension {}",
                name, key, v
            ))),
        },
    }
}
