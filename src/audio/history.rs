//! Rolling spectrogram matrix with a wraparound write cursor

use parking_lot::RwLock;
use std::sync::Arc;
use thiserror::Error;

/// History handle shared between the analysis role and renderers
pub type SharedHistory = Arc<RwLock<SpectrogramHistory>>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    #[error("History needs at least one bin and one column (got {bins} x {columns})")]
    EmptyShape { bins: usize, columns: usize },

    #[error("Column has {actual} values, history expects {expected}")]
    ColumnLength { expected: usize, actual: usize },
}

/// Fixed `bins x columns` spectrogram ring.
///
/// Columns are stored contiguously. Writing past the last column wraps the
/// cursor and overwrites the oldest column in place; nothing is shifted.
#[derive(Debug, Clone)]
pub struct SpectrogramHistory {
    bins: usize,
    columns: usize,
    data: Vec<f32>,
    envelope: Vec<f32>,
    total_energy: f64,
    cursor: usize,
    frames_written: u64,
}

impl SpectrogramHistory {
    pub fn new(bins: usize, columns: usize) -> Result<Self, HistoryError> {
        if bins == 0 || columns == 0 {
            return Err(HistoryError::EmptyShape { bins, columns });
        }

        Ok(Self {
            bins,
            columns,
            data: vec![0.0; bins * columns],
            envelope: vec![0.0; columns],
            total_energy: 0.0,
            cursor: 0,
            frames_written: 0,
        })
    }

    /// Wrap in the lock used to share it between threads
    pub fn shared(self) -> SharedHistory {
        Arc::new(RwLock::new(self))
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Index the next column will be written to
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Store `values` at the cursor and advance it.
    ///
    /// Returns the column index that was written.
    pub fn write_column(&mut self, values: &[f32]) -> Result<usize, HistoryError> {
        if values.len() != self.bins {
            return Err(HistoryError::ColumnLength {
                expected: self.bins,
                actual: values.len(),
            });
        }

        let index = self.cursor;
        let start = index * self.bins;
        self.data[start..start + self.bins].copy_from_slice(values);

        let energy: f32 = values.iter().sum();
        self.total_energy += energy as f64 - self.envelope[index] as f64;
        self.envelope[index] = energy;

        self.cursor = (index + 1) % self.columns;
        self.frames_written += 1;
        Ok(index)
    }

    pub fn column(&self, index: usize) -> &[f32] {
        let start = index * self.bins;
        &self.data[start..start + self.bins]
    }

    pub fn value(&self, bin: usize, column: usize) -> f32 {
        self.data[column * self.bins + bin]
    }

    /// Per-column energy (sum over all bins)
    pub fn envelope(&self) -> &[f32] {
        &self.envelope
    }

    /// Sum of the envelope, maintained as columns are replaced
    pub fn total_energy(&self) -> f64 {
        self.total_energy
    }

    /// Most recently written column, if any
    pub fn newest_index(&self) -> Option<usize> {
        if self.frames_written == 0 {
            return None;
        }
        Some((self.cursor + self.columns - 1) % self.columns)
    }

    /// Oldest column still held, if any
    pub fn oldest_index(&self) -> Option<usize> {
        match self.frames_written {
            0 => None,
            n if n < self.columns as u64 => Some(0),
            _ => Some(self.cursor),
        }
    }

    /// Written columns from oldest to newest
    pub fn chronological(&self) -> impl Iterator<Item = &[f32]> + '_ {
        let held = (self.frames_written.min(self.columns as u64)) as usize;
        let first = self.oldest_index().unwrap_or(0);
        (0..held).map(move |offset| self.column((first + offset) % self.columns))
    }

    /// Row-major copy (`bins` rows of `columns` values) in storage order
    pub fn rows(&self) -> Vec<Vec<f32>> {
        (0..self.bins)
            .map(|bin| (0..self.columns).map(|col| self.value(bin, col)).collect())
            .collect()
    }

    /// Bin with the highest value in `column`
    pub fn peak_bin(&self, column: usize) -> usize {
        let values = self.column(column);
        let mut peak = 0;
        for (bin, &v) in values.iter().enumerate() {
            if v > values[peak] {
                peak = bin;
            }
        }
        peak
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_envelope_consistent(history: &SpectrogramHistory) {
        for j in 0..history.columns() {
            let sum: f32 = history.column(j).iter().sum();
            assert_eq!(history.envelope()[j], sum, "column {}", j);
        }
        let total: f64 = history.envelope().iter().map(|&e| e as f64).sum();
        assert!((history.total_energy() - total).abs() < 1e-6);
    }

    #[test]
    fn rejects_empty_shape() {
        assert!(SpectrogramHistory::new(0, 4).is_err());
        assert!(SpectrogramHistory::new(3, 0).is_err());
    }

    #[test]
    fn rejects_wrong_column_length() {
        let mut history = SpectrogramHistory::new(3, 4).unwrap();
        assert_eq!(
            history.write_column(&[1.0, 2.0]),
            Err(HistoryError::ColumnLength {
                expected: 3,
                actual: 2
            })
        );
        assert_eq!(history.frames_written(), 0);
        assert_eq!(history.cursor(), 0);
    }

    #[test]
    fn wraparound_overwrites_oldest_column_in_place() {
        let mut history = SpectrogramHistory::new(2, 4).unwrap();
        let columns: Vec<[f32; 2]> = (0..5).map(|i| [i as f32, 10.0 * i as f32]).collect();

        for column in &columns {
            history.write_column(column).unwrap();
            assert_envelope_consistent(&history);
        }

        assert_eq!(history.column(0), &columns[4]);
        assert_eq!(history.column(1), &columns[1]);
        assert_eq!(history.column(2), &columns[2]);
        assert_eq!(history.column(3), &columns[3]);
        assert_eq!(history.cursor(), 1);
        assert_eq!(history.frames_written(), 5);
    }

    #[test]
    fn newest_and_oldest_track_cursor() {
        let mut history = SpectrogramHistory::new(1, 3).unwrap();
        assert_eq!(history.newest_index(), None);
        assert_eq!(history.oldest_index(), None);

        history.write_column(&[1.0]).unwrap();
        history.write_column(&[2.0]).unwrap();
        assert_eq!(history.newest_index(), Some(1));
        assert_eq!(history.oldest_index(), Some(0));

        history.write_column(&[3.0]).unwrap();
        history.write_column(&[4.0]).unwrap();
        assert_eq!(history.newest_index(), Some(0));
        assert_eq!(history.oldest_index(), Some(1));

        let ordered: Vec<f32> = history.chronological().map(|c| c[0]).collect();
        assert_eq!(ordered, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn chronological_before_wrap_only_yields_written_columns() {
        let mut history = SpectrogramHistory::new(1, 4).unwrap();
        history.write_column(&[5.0]).unwrap();
        history.write_column(&[6.0]).unwrap();

        let ordered: Vec<f32> = history.chronological().map(|c| c[0]).collect();
        assert_eq!(ordered, vec![5.0, 6.0]);
    }

    #[test]
    fn envelope_tracks_replaced_energy() {
        let mut history = SpectrogramHistory::new(3, 2).unwrap();
        history.write_column(&[1.0, 2.0, 3.0]).unwrap();
        history.write_column(&[0.5, 0.5, 0.5]).unwrap();
        assert!((history.total_energy() - 7.5).abs() < 1e-9);

        history.write_column(&[0.0, 0.0, 0.25]).unwrap();
        assert_eq!(history.envelope(), &[0.25, 1.5]);
        assert!((history.total_energy() - 1.75).abs() < 1e-9);
        assert_envelope_consistent(&history);
    }

    #[test]
    fn rows_and_peak_bin() {
        let mut history = SpectrogramHistory::new(3, 2).unwrap();
        history.write_column(&[0.1, 0.9, 0.2]).unwrap();
        history.write_column(&[0.7, 0.1, 0.3]).unwrap();

        assert_eq!(
            history.rows(),
            vec![vec![0.1, 0.7], vec![0.9, 0.1], vec![0.2, 0.3]]
        );
        assert_eq!(history.peak_bin(0), 1);
        assert_eq!(history.peak_bin(1), 0);
    }
}
