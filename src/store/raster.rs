//! Crossbar raster: the last known current and voltage of every cell.
//!
//! The raster is a snapshot, not history; per-cell history lives in the
//! time-series logs. Both arrays are `bits × words` and addressed `(bit, word)`.

use super::schema::{RASTER_CURRENT, RASTER_VOLTAGE};
use super::{Coordinate, Store};
use crate::container::Column;
use crate::error::{StoreError, StoreResult};

const RASTER_FIELD: &str = "value";

/// Dense `bits × words` matrix of `f32`, row-major by bit line.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    bits: usize,
    words: usize,
    data: Vec<f32>,
}

impl Matrix {
    pub fn zeros(bits: usize, words: usize) -> Self {
        Self {
            bits,
            words,
            data: vec![0.0; bits * words],
        }
    }

    /// Wrap row-major data; `data.len()` must equal `bits * words`.
    pub fn from_vec(bits: usize, words: usize, data: Vec<f32>) -> StoreResult<Self> {
        if data.len() != bits * words {
            return Err(StoreError::Dims(format!(
                "{} values cannot form a {}×{} matrix",
                data.len(),
                bits,
                words
            )));
        }
        Ok(Self { bits, words, data })
    }

    pub fn bits(&self) -> usize {
        self.bits
    }

    pub fn words(&self) -> usize {
        self.words
    }

    pub fn get(&self, bit: usize, word: usize) -> Option<f32> {
        if bit < self.bits && word < self.words {
            self.data.get(bit * self.words + word).copied()
        } else {
            None
        }
    }

    pub fn set(&mut self, bit: usize, word: usize, value: f32) -> StoreResult<()> {
        if bit >= self.bits || word >= self.words {
            return Err(StoreError::Dims(format!(
                "({}, {}) outside {}×{} matrix",
                bit, word, self.bits, self.words
            )));
        }
        self.data[bit * self.words + word] = value;
        Ok(())
    }

    /// Value at a cell.
    pub fn at(&self, coord: Coordinate) -> Option<f32> {
        self.get(coord.bit as usize, coord.word as usize)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Element-wise `|self / other|`.
    fn abs_ratio(&self, other: &Matrix) -> Matrix {
        let data = self
            .data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| (a / b).abs())
            .collect();
        Matrix {
            bits: self.bits,
            words: self.words,
            data,
        }
    }
}

impl Store {
    /// Measured current of every cell.
    pub fn current(&self) -> StoreResult<Matrix> {
        self.read_raster(RASTER_CURRENT)
    }

    /// Applied voltage of every cell.
    pub fn voltage(&self) -> StoreResult<Matrix> {
        self.read_raster(RASTER_VOLTAGE)
    }

    /// `|voltage / current|`, computed on read.
    pub fn resistance(&self) -> StoreResult<Matrix> {
        Ok(self.voltage()?.abs_ratio(&self.current()?))
    }

    /// `|current / voltage|`, computed on read.
    pub fn conductance(&self) -> StoreResult<Matrix> {
        Ok(self.current()?.abs_ratio(&self.voltage()?))
    }

    /// Replace the whole raster, typically after a full-device scan. Both
    /// matrices are checked before either is written.
    pub fn refresh_raster(&mut self, current: &Matrix, voltage: &Matrix) -> StoreResult<()> {
        let (bits, words) = (self.dims.bits as usize, self.dims.words as usize);
        for m in [current, voltage] {
            if (m.bits, m.words) != (bits, words) {
                return Err(StoreError::Dims(format!(
                    "raster is {}×{}, got {}×{}",
                    bits, words, m.bits, m.words
                )));
            }
        }
        let container = self.container_mut();
        container.write_column(RASTER_CURRENT, RASTER_FIELD, 0, &Column::F32(current.data.clone()))?;
        container.write_column(RASTER_VOLTAGE, RASTER_FIELD, 0, &Column::F32(voltage.data.clone()))
    }

    /// Update one cell of the raster in place.
    pub fn update_cell(&mut self, coord: Coordinate, current: f32, voltage: f32) -> StoreResult<()> {
        self.check_coord(coord)?;
        let idx = coord.bit as usize * self.dims.words as usize + coord.word as usize;
        let container = self.container_mut();
        container.write_column(RASTER_CURRENT, RASTER_FIELD, idx, &Column::F32(vec![current]))?;
        container.write_column(RASTER_VOLTAGE, RASTER_FIELD, idx, &Column::F32(vec![voltage]))
    }

    fn read_raster(&self, dataset: &str) -> StoreResult<Matrix> {
        let (bits, words) = (self.dims.bits as usize, self.dims.words as usize);
        let column = self
            .container()
            .read_column(dataset, RASTER_FIELD, 0..bits * words)?;
        match column {
            Column::F32(data) => Matrix::from_vec(bits, words, data),
            other => Err(StoreError::Format(format!(
                "raster {} holds {} values, expected f32",
                dataset,
                other.kind()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Dimensions;

    #[test]
    fn test_fresh_raster_is_zero() {
        let store = Store::in_memory(Dimensions::new(3, 2), None).unwrap();
        let current = store.current().unwrap();
        assert_eq!((current.bits(), current.words()), (2, 3));
        assert!(current.as_slice().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_update_cell_touches_one_cell() {
        let mut store = Store::in_memory(Dimensions::new(4, 4), None).unwrap();
        store.update_cell(Coordinate::new(1, 2), 1e-6, 0.5).unwrap();

        let voltage = store.voltage().unwrap();
        let current = store.current().unwrap();
        assert_eq!(voltage.get(2, 1), Some(0.5));
        assert_eq!(current.get(2, 1), Some(1e-6));
        assert_eq!(voltage.as_slice().iter().filter(|v| **v != 0.0).count(), 1);
    }

    #[test]
    fn test_update_cell_out_of_bounds() {
        let mut store = Store::in_memory(Dimensions::new(4, 4), None).unwrap();
        let err = store.update_cell(Coordinate::new(4, 0), 1.0, 1.0).unwrap_err();
        assert!(matches!(err, StoreError::Dims(_)));
    }

    #[test]
    fn test_refresh_and_derived_views() {
        let mut store = Store::in_memory(Dimensions::new(2, 1), None).unwrap();
        let current = Matrix::from_vec(1, 2, vec![1e-3, -2e-3]).unwrap();
        let voltage = Matrix::from_vec(1, 2, vec![1.0, 1.0]).unwrap();
        store.refresh_raster(&current, &voltage).unwrap();

        let r = store.resistance().unwrap();
        assert!((r.get(0, 0).unwrap() - 1000.0).abs() < 1e-2);
        assert!((r.get(0, 1).unwrap() - 500.0).abs() < 1e-2);
        let g = store.conductance().unwrap();
        assert!((g.get(0, 1).unwrap() - 2e-3).abs() < 1e-9);
    }

    #[test]
    fn test_refresh_shape_mismatch_writes_nothing() {
        let mut store = Store::in_memory(Dimensions::new(2, 2), None).unwrap();
        let good = Matrix::from_vec(2, 2, vec![1.0; 4]).unwrap();
        let bad = Matrix::zeros(2, 3);
        let err = store.refresh_raster(&good, &bad).unwrap_err();
        assert!(matches!(err, StoreError::Dims(_)));
        assert!(store.current().unwrap().as_slice().iter().all(|v| *v == 0.0));
    }
}
