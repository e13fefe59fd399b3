use serde::{Deserialize, Serialize};

pub mod extraction;
pub mod outcome;
pub mod result_table;
pub mod work_item;

// Re-exports for convenience
pub use extraction::*;
pub use outcome::*;
pub use result_table::*;
pub use work_item::*;

/// Column layout shared by the input sheet and the output sheet.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SheetLayout {
    /// Input: one URL per row. Output: URL, name, original price, discounted price.
    #[default]
    Simple,
    /// Input: SKU metadata followed by competitor URLs. Output: metadata,
    /// every extracted field, then the URL.
    Catalog,
}
