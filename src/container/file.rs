//! Single-file container backend.
//!
//! The file holds the whole node tree:
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │  Magic: "XBHC" (4 bytes)               │
//! │  Container version: u16 LE (2 bytes)   │
//! ├────────────────────────────────────────┤
//! │  bincode-encoded root group            │
//! └────────────────────────────────────────┘
//! ```
//!
//! Flushing encodes the tree into a sibling `<name>.tmp` file and renames it
//! over the original, so a crash mid-flush leaves the previous version intact.

use super::tree::{GroupNode, Persist, TreeContainer};
use super::OpenMode;
use crate::error::{StoreError, StoreResult};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Magic bytes at the start of every container file.
pub const CONTAINER_MAGIC: [u8; 4] = *b"XBHC";

/// Current container encoding version.
pub const CONTAINER_VERSION: u16 = 1;

/// Durability strategy writing the tree to one file.
#[derive(Debug)]
pub struct FileBacking {
    path: PathBuf,
    created: bool,
}

impl FileBacking {
    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl Persist for FileBacking {
    fn location(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn persist(&mut self, root: &GroupNode) -> StoreResult<()> {
        let tmp = self.temp_path();
        let file = File::create(&tmp)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&CONTAINER_MAGIC)?;
        writer.write_all(&CONTAINER_VERSION.to_le_bytes())?;
        bincode::serialize_into(&mut writer, root)?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "container flushed");
        Ok(())
    }
}

/// Container bound to a file on disk.
pub type FileContainer = TreeContainer<FileBacking>;

impl FileContainer {
    /// Open `path` in `mode`.
    ///
    /// `Write` always starts from an empty tree; `Append` does so only when the
    /// file is missing. Nothing touches the disk until the first flush, so an
    /// existing file survives until then. `Read` and `ReadWrite` require the
    /// file to exist.
    pub fn open(path: &Path, mode: OpenMode) -> StoreResult<Self> {
        let start_empty = match mode {
            OpenMode::Write => true,
            OpenMode::Append => !path.exists(),
            OpenMode::Read | OpenMode::ReadWrite => false,
        };

        let backing = FileBacking {
            path: path.to_path_buf(),
            created: start_empty,
        };

        if start_empty {
            let mut container = Self::from_parts(GroupNode::default(), mode, backing);
            container.mark_dirty();
            return Ok(container);
        }

        let root = read_tree(path)?;
        Ok(Self::from_parts(root, mode, backing))
    }

    /// Whether this open created a new, empty file.
    pub fn was_created(&self) -> bool {
        self.backing().created
    }
}

fn read_tree(path: &Path) -> StoreResult<GroupNode> {
    let mut reader = BufReader::new(File::open(path)?);
    let name = path.display();

    let mut magic = [0u8; 4];
    reader
        .read_exact(&mut magic)
        .map_err(|_| StoreError::Format(format!("File {} is not a container file", name)))?;
    if magic != CONTAINER_MAGIC {
        return Err(StoreError::Format(format!(
            "File {} has invalid magic bytes {:?}",
            name, magic
        )));
    }

    let mut version = [0u8; 2];
    reader
        .read_exact(&mut version)
        .map_err(|_| StoreError::Format(format!("File {} has a truncated header", name)))?;
    let version = u16::from_le_bytes(version);
    if version != CONTAINER_VERSION {
        return Err(StoreError::Format(format!(
            "File {} uses unsupported container version {}",
            name, version
        )));
    }

    Ok(bincode::deserialize_from(reader)?)
}
