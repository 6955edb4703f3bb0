//! Dataset ports used by the training loaders.

use crate::domain::GazeSample;

/// Random-access view over the records of a set of subjects.
pub trait GazeDataset: Send + Sync {
    /// Number of records visible through this view.
    fn len(&self) -> usize;

    /// Returns true if the view holds no records.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subject indices this view was opened for.
    fn subjects(&self) -> &[usize];

    /// Reads one record.
    ///
    /// # Errors
    ///
    /// Returns an error if `index` is out of range or the record cannot be decoded.
    fn get(&self, index: usize) -> anyhow::Result<GazeSample>;
}

/// Opens dataset views scoped to a subject list.
pub trait DatasetProvider: Send + Sync {
    /// Opens a read-only view containing only records of `subjects`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be opened or a requested
    /// subject is missing.
    fn open(&self, subjects: &[usize]) -> anyhow::Result<Box<dyn GazeDataset>>;
}
