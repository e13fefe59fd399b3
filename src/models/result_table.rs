use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

use super::{Field, FailureReason, Outcome, WorkItem};
use crate::config::Markers;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum RowStatus {
    /// No terminal outcome recorded yet.
    Pending,
    Success,
    StoreClosed,
    Failed(FailureReason),
}

impl RowStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RowStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Row {
    pub index: usize,
    pub item: WorkItem,
    pub status: RowStatus,
    pub values: BTreeMap<Field, String>,
    pub attempts: u32,
}

impl Row {
    pub fn value(&self, field: Field) -> &str {
        self.values.get(&field).map(String::as_str).unwrap_or_default()
    }

    fn fill(&mut self, marker: &str) {
        self.values = Field::ALL.iter().map(|field| (*field, marker.to_string())).collect();
    }
}

/// One row per input item, index-aligned with the input list. Rows start as
/// failure placeholders so the table is publishable at any point.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResultTable {
    rows: Vec<Row>,
    markers: Markers,
}

impl ResultTable {
    pub fn with_placeholders(items: &[WorkItem], markers: &Markers) -> Self {
        let rows = items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                let mut row = Row {
                    index,
                    item: item.clone(),
                    status: RowStatus::Pending,
                    values: BTreeMap::new(),
                    attempts: 0,
                };
                row.fill(&markers.failed);
                row
            })
            .collect();

        Self {
            rows,
            markers: markers.clone(),
        }
    }

    /// Write the terminal outcome for the item at `index`, replacing whatever
    /// was there. Returns `false` if the index is out of range.
    pub fn record(&mut self, index: usize, outcome: Outcome, attempts: u32) -> bool {
        let markers = &self.markers;
        let Some(row) = self.rows.get_mut(index) else {
            tracing::error!("Discarding outcome for out-of-range row {}", index);
            return false;
        };

        row.attempts = attempts;
        match outcome {
            Outcome::Success(result) => {
                row.values = Field::ALL
                    .iter()
                    .map(|field| {
                        let text = result.text(*field).unwrap_or(&markers.not_available);
                        (*field, text.to_string())
                    })
                    .collect();
                row.status = RowStatus::Success;
            }
            Outcome::SkippedClosedStore => {
                row.fill(&markers.store_closed);
                row.status = RowStatus::StoreClosed;
            }
            Outcome::Failed(reason) => {
                row.fill(&markers.failed);
                row.status = RowStatus::Failed(reason);
            }
        }
        true
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn get(&self, index: usize) -> Option<&Row> {
        self.rows.get(index)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn count(&self, predicate: impl Fn(&RowStatus) -> bool) -> usize {
        self.rows.iter().filter(|row| predicate(&row.status)).count()
    }
}

/// Totals for a finished run. Built once from the final table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
    pub total: usize,
    pub succeeded: usize,
    pub store_closed: usize,
    pub failed: usize,
    pub pending: usize,
    pub total_attempts: u64,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn from_table(
        table: &ResultTable,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        cancelled: bool,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            elapsed,
            total: table.len(),
            succeeded: table.count(|s| *s == RowStatus::Success),
            store_closed: table.count(|s| *s == RowStatus::StoreClosed),
            failed: table.count(|s| matches!(s, RowStatus::Failed(_))),
            pending: table.count(|s| *s == RowStatus::Pending),
            total_attempts: table.rows().iter().map(|row| u64::from(row.attempts)).sum(),
            cancelled,
        }
    }

    /// Rows that did not end up as failures.
    pub fn completed(&self) -> usize {
        self.succeeded + self.store_closed
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.completed() as f64 / self.total as f64 * 100.0
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
