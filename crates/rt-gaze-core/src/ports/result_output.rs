//! Result output port for writing gaze estimates.

use crate::domain::GazeResult;

/// Port for outputting per-image gaze results.
pub trait ResultOutput: Send + Sync {
    /// Writes a single result.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    fn write(&self, result: &GazeResult) -> anyhow::Result<()>;

    /// Flushes any buffered output.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing fails.
    fn flush(&self) -> anyhow::Result<()>;
}
