//! Output side: A1-addressed tabular sinks and the publisher that lays a
//! [`ResultTable`] out on them.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use std::fmt;
use std::sync::Arc;

use crate::config::SheetConfig;
use crate::models::{Field, ResultTable, Row, RunSummary, SheetLayout};
use crate::scheduler::ChunkListener;
use crate::utils::{AppError, Result};

pub mod csv;

pub use self::csv::CsvSink;

/// Zero-based cell coordinate, written in A1 notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellRef {
    pub row: usize,
    pub col: usize,
}

impl CellRef {
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// Parse `A1`-style references. Column letters are case-insensitive.
    pub fn parse(reference: &str) -> Result<Self> {
        let invalid = || AppError::InvalidCell {
            reference: reference.to_string(),
        };
        let trimmed = reference.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_alphabetic())
            .ok_or_else(invalid)?;
        let (letters, digits) = trimmed.split_at(split);
        if letters.is_empty() || digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let mut col: usize = 0;
        for letter in letters.bytes() {
            let value = usize::from(letter.to_ascii_uppercase() - b'A') + 1;
            col = col
                .checked_mul(26)
                .and_then(|c| c.checked_add(value))
                .ok_or_else(invalid)?;
        }
        let row: usize = digits.parse().map_err(|_| invalid())?;
        if row == 0 {
            return Err(invalid());
        }

        Ok(Self::new(row - 1, col - 1))
    }

    pub fn below(&self) -> Self {
        Self::new(self.row + 1, self.col)
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_name(self.col), self.row + 1)
    }
}

/// Spreadsheet column letters for a zero-based index: 0 is `A`, 26 is `AA`.
pub fn column_name(col: usize) -> String {
    let mut name = Vec::new();
    let mut n = col + 1;
    while n > 0 {
        let rem = (n - 1) % 26;
        name.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    name.reverse();
    String::from_utf8_lossy(&name).into_owned()
}

/// Inclusive rectangle of cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRange {
    pub start: CellRef,
    pub end: CellRef,
}

impl CellRange {
    /// Range of `rows` x `cols` cells with its top-left corner at `start`.
    pub fn sized(start: CellRef, rows: usize, cols: usize) -> Self {
        let end = CellRef::new(start.row + rows.max(1) - 1, start.col + cols.max(1) - 1);
        Self { start, end }
    }

    pub fn height(&self) -> usize {
        self.end.row - self.start.row + 1
    }

    pub fn width(&self) -> usize {
        self.end.col - self.start.col + 1
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}

/// Grid-shaped output store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TableSink: Send + Sync {
    /// Overwrite the cells of `range` with `rows`, row-major.
    async fn write_range(&self, range: &CellRange, rows: Vec<Vec<String>>) -> Result<()>;
}

impl SheetLayout {
    pub fn header(&self) -> &'static [&'static str] {
        match self {
            SheetLayout::Simple => &["URL", "Product Name", "Original Price", "Discounted Price"],
            SheetLayout::Catalog => &[
                "SKU",
                "Category",
                "Sub Category",
                "Brand",
                "Weight",
                "Reference Name",
                "Product Name",
                "Original Price",
                "Discounted Price",
                "Seller",
                "Rating",
                "URL",
            ],
        }
    }

    /// Default home of the "last updated" line: `G1` or `N1`.
    pub fn annotation_cell(&self) -> CellRef {
        match self {
            SheetLayout::Simple => CellRef::new(0, 6),
            SheetLayout::Catalog => CellRef::new(0, 13),
        }
    }

    pub fn row_values(&self, row: &Row) -> Vec<String> {
        match self {
            SheetLayout::Simple => vec![
                row.item.url.clone(),
                row.value(Field::Name).to_string(),
                row.value(Field::OriginalPrice).to_string(),
                row.value(Field::DiscountedPrice).to_string(),
            ],
            SheetLayout::Catalog => {
                let meta = &row.item.metadata;
                let text = |value: &Option<String>| value.clone().unwrap_or_default();
                let mut values = vec![
                    text(&meta.sku),
                    text(&meta.category),
                    text(&meta.sub_category),
                    text(&meta.brand),
                    text(&meta.weight),
                    text(&meta.reference_name),
                ];
                values.extend(Field::DISPLAY_ORDER.iter().map(|field| row.value(*field).to_string()));
                values.push(row.item.url.clone());
                values
            }
        }
    }
}

/// Writes result tables to a [`TableSink`]: one bulk write for header and
/// rows, one small write for the timestamp and summary lines.
pub struct ResultPublisher {
    sink: Arc<dyn TableSink>,
    layout: SheetLayout,
    timestamp_cell: CellRef,
    summary_cell: CellRef,
    offset: FixedOffset,
    timezone_label: String,
}

impl ResultPublisher {
    pub fn new(sink: Arc<dyn TableSink>, config: &SheetConfig) -> Result<Self> {
        let timestamp_cell = match &config.timestamp_cell {
            Some(cell) => CellRef::parse(cell)?,
            None => config.layout.annotation_cell(),
        };
        let summary_cell = match &config.summary_cell {
            Some(cell) => CellRef::parse(cell)?,
            None => timestamp_cell.below(),
        };
        if timestamp_cell == summary_cell {
            return Err(AppError::Validation(format!(
                "timestamp and summary share cell {}",
                timestamp_cell
            )));
        }

        let offset = FixedOffset::east_opt(config.utc_offset_minutes * 60).ok_or_else(|| {
            AppError::Validation(format!("utc offset out of range: {} minutes", config.utc_offset_minutes))
        })?;

        Ok(Self {
            sink,
            layout: config.layout,
            timestamp_cell,
            summary_cell,
            offset,
            timezone_label: config.timezone_label.clone(),
        })
    }

    /// Header plus one line per row, in table order.
    pub fn render_rows(&self, table: &ResultTable) -> Vec<Vec<String>> {
        let header = self.layout.header().iter().map(|h| h.to_string()).collect();
        std::iter::once(header)
            .chain(table.rows().iter().map(|row| self.layout.row_values(row)))
            .collect()
    }

    /// Bulk write of header and rows starting at `A1`.
    pub async fn publish_rows(&self, table: &ResultTable) -> Result<()> {
        let rows = self.render_rows(table);
        let range = CellRange::sized(CellRef::new(0, 0), rows.len(), self.layout.header().len());
        tracing::debug!("Writing {} rows to {}", table.len(), range);
        self.sink.write_range(&range, rows).await
    }

    /// Final publish: all rows, then the annotation cells.
    pub async fn publish(&self, table: &ResultTable, summary: &RunSummary) -> Result<()> {
        self.publish_rows(table).await?;

        let timestamp = self.timestamp_line(Utc::now());
        let summary_line = summary_line(summary);

        if self.summary_cell == self.timestamp_cell.below() {
            let range = CellRange::sized(self.timestamp_cell, 2, 1);
            self.sink
                .write_range(&range, vec![vec![timestamp], vec![summary_line]])
                .await?;
        } else {
            self.sink
                .write_range(&CellRange::sized(self.timestamp_cell, 1, 1), vec![vec![timestamp]])
                .await?;
            self.sink
                .write_range(&CellRange::sized(self.summary_cell, 1, 1), vec![vec![summary_line]])
                .await?;
        }

        tracing::info!("Published {} rows and run summary", table.len());
        Ok(())
    }

    /// `Last Updated (<label>): <weekday>, <dd> <Month> <yyyy> - <HH:MM:SS>`
    pub fn timestamp_line(&self, at: DateTime<Utc>) -> String {
        let local = at.with_timezone(&self.offset);
        format!(
            "Last Updated ({}): {}",
            self.timezone_label,
            local.format("%A, %d %B %Y - %H:%M:%S")
        )
    }
}

pub fn summary_line(summary: &RunSummary) -> String {
    let seconds = summary.elapsed.as_secs();
    let mut line = format!(
        "Scrape finished in {} min {} s, scraped {} of {} products ({:.2}%)",
        seconds / 60,
        seconds % 60,
        summary.completed(),
        summary.total,
        summary.success_rate()
    );
    if summary.cancelled {
        line.push_str(", cancelled before completion");
    }
    line
}

#[async_trait]
impl ChunkListener for ResultPublisher {
    async fn on_chunk_complete(&self, table: &ResultTable) -> Result<()> {
        self.publish_rows(table).await
    }
}
