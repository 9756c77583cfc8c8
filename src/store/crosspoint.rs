//! Read-side view of a single cell.

use super::schema::CROSSPOINTS;
use super::timeseries::TimeSeriesRecord;
use super::{Coordinate, Store};
use crate::error::{StoreError, StoreResult};

/// Snapshot of one crosspoint: its biasing history and the names of the
/// experiments recorded against it.
#[derive(Debug, Clone, PartialEq)]
pub struct Crosspoint {
    pub coord: Coordinate,
    pub timeseries: Vec<TimeSeriesRecord>,
    pub experiments: Vec<String>,
}

impl Crosspoint {
    /// Most recent sample, if any.
    pub fn last(&self) -> Option<&TimeSeriesRecord> {
        self.timeseries.last()
    }
}

impl Store {
    /// The cell at `(word, bit)`. Fails with `Lookup` if nothing was ever
    /// recorded there.
    pub fn crosspoint(&self, word: u32, bit: u32) -> StoreResult<Crosspoint> {
        let coord = Coordinate::new(word, bit);
        self.check_coord(coord)?;
        if !self.container().exists(&coord.path()) {
            return Err(StoreError::Lookup(format!("no data for cell {}", coord)));
        }
        Ok(Crosspoint {
            coord,
            timeseries: self.timeseries(coord)?,
            experiments: self.experiments(coord)?,
        })
    }

    /// Every cell that has a group under `/crosspoints`, sorted by word then
    /// bit. Foreign entries are skipped.
    pub fn crosspoints(&self) -> StoreResult<Vec<Coordinate>> {
        let mut coords: Vec<_> = self
            .container()
            .children(CROSSPOINTS)?
            .iter()
            .filter_map(|key| Coordinate::parse_key(key))
            .collect();
        coords.sort();
        Ok(coords)
    }
}
