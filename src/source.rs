//! Input side: reading the product sheet and turning its rows into work items.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::models::{ItemMetadata, SheetLayout, WorkItem};
use crate::utils::{AppError, Result};

/// Column of the first competitor URL in the catalog layout.
const CATALOG_URL_START: usize = 7;

/// Tabular input store. Rows come back as raw cell text, header included.
#[async_trait]
pub trait TableSource: Send + Sync {
    async fn read_rows(&self) -> Result<Vec<Vec<String>>>;
}

pub struct CsvSource {
    path: PathBuf,
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TableSource for CsvSource {
    async fn read_rows(&self) -> Result<Vec<Vec<String>>> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<Vec<String>>> {
            let mut reader = csv::ReaderBuilder::new()
                .has_headers(false)
                .flexible(true)
                .from_path(&path)?;

            let mut rows = Vec::new();
            for record in reader.records() {
                rows.push(record?.iter().map(str::to_string).collect());
            }
            tracing::info!("Read {} rows from {}", rows.len(), path.display());
            Ok(rows)
        })
        .await
        .map_err(|e| AppError::Internal(format!("source reader task failed: {}", e)))?
    }
}

/// Build work items from sheet rows. The first row is always a header.
///
/// `simple`: the URL is in the first column. Blank cells inside the column
/// stay as items so output row k lines up with input row k; trailing blanks
/// are dropped.
/// `catalog`: seven metadata columns, then any number of cells; each one
/// starting with `http` becomes its own item carrying the row's metadata.
pub fn parse_items(layout: SheetLayout, rows: &[Vec<String>]) -> Vec<WorkItem> {
    let body = rows.iter().skip(1);

    let items: Vec<WorkItem> = match layout {
        SheetLayout::Simple => {
            let urls: Vec<&str> = body
                .map(|row| row.first().map(|cell| cell.trim()).unwrap_or_default())
                .collect();
            let used = urls.iter().rposition(|url| !url.is_empty()).map_or(0, |last| last + 1);
            urls[..used].iter().copied().map(WorkItem::new).collect()
        }
        SheetLayout::Catalog => body
            .flat_map(|row| {
                let metadata = catalog_metadata(row);
                row.iter()
                    .skip(CATALOG_URL_START)
                    .map(|cell| cell.trim())
                    .filter(|cell| cell.starts_with("http"))
                    .map(move |url| WorkItem::with_metadata(url, metadata.clone()))
                    .collect::<Vec<_>>()
            })
            .collect(),
    };

    tracing::info!("Loaded {} work items", items.len());
    items
}

fn catalog_metadata(row: &[String]) -> ItemMetadata {
    let cell = |index: usize| {
        row.get(index)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };

    ItemMetadata {
        sku: cell(0),
        category: cell(1),
        sub_category: cell(2),
        brand: cell(3),
        weight: cell(4),
        reference_name: cell(5),
        reference_price: cell(6),
    }
}
