use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{CellRange, TableSink};
use crate::utils::{AppError, Result};

/// A cell grid persisted as a CSV file. Every write updates the grid and
/// rewrites the whole file, so the file always mirrors the latest state.
pub struct CsvSink {
    path: PathBuf,
    grid: Mutex<Vec<Vec<String>>>,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            grid: Mutex::new(Vec::new()),
        }
    }

    /// Copy of the current grid, trailing empty cells included.
    pub fn snapshot(&self) -> Result<Vec<Vec<String>>> {
        self.grid
            .lock()
            .map(|grid| grid.clone())
            .map_err(|_| AppError::Internal("sink grid lock poisoned".to_string()))
    }
}

#[async_trait]
impl TableSink for CsvSink {
    async fn write_range(&self, range: &CellRange, rows: Vec<Vec<String>>) -> Result<()> {
        if rows.len() > range.height() || rows.iter().any(|row| row.len() > range.width()) {
            return Err(AppError::Sink(format!(
                "{} rows do not fit range {}",
                rows.len(),
                range
            )));
        }

        let snapshot = {
            let mut grid = self
                .grid
                .lock()
                .map_err(|_| AppError::Internal("sink grid lock poisoned".to_string()))?;

            for (r, values) in rows.into_iter().enumerate() {
                let row_index = range.start.row + r;
                if grid.len() <= row_index {
                    grid.resize_with(row_index + 1, Vec::new);
                }
                let line = &mut grid[row_index];
                let needed = range.start.col + values.len();
                if line.len() < needed {
                    line.resize(needed, String::new());
                }
                for (c, value) in values.into_iter().enumerate() {
                    line[range.start.col + c] = value;
                }
            }
            grid.clone()
        };

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_grid(&path, &snapshot))
            .await
            .map_err(|e| AppError::Internal(format!("sink writer task failed: {}", e)))??;

        tracing::debug!("Wrote range {} to {}", range, self.path.display());
        Ok(())
    }
}

fn write_grid(path: &Path, grid: &[Vec<String>]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut writer = ::csv::WriterBuilder::new().flexible(true).from_path(path)?;
    for row in grid {
        // A record with no fields would be skipped, keep blank rows visible
        if row.is_empty() {
            writer.write_record([""])?;
        } else {
            writer.write_record(row)?;
        }
    }
    writer.flush()?;
    Ok(())
}
