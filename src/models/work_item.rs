use serde::{Deserialize, Serialize};

/// Caller-supplied passthrough columns echoed unchanged into the output row.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemMetadata {
    pub sku: Option<String>,
    pub category: Option<String>,
    pub sub_category: Option<String>,
    pub brand: Option<String>,
    pub weight: Option<String>,
    pub reference_name: Option<String>,
    pub reference_price: Option<String>,
}

/// One product page to fetch. Identity is the URL; the same URL may appear
/// more than once and every occurrence is scheduled on its own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkItem {
    pub url: String,
    pub metadata: ItemMetadata,
}

impl WorkItem {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            metadata: ItemMetadata::default(),
        }
    }

    pub fn with_metadata(url: impl Into<String>, metadata: ItemMetadata) -> Self {
        Self {
            url: url.into(),
            metadata,
        }
    }

    /// Parsed URL, `None` when it is not an absolute http(s) URL.
    pub fn parsed_url(&self) -> Option<url::Url> {
        url::Url::parse(self.url.trim())
            .ok()
            .filter(|url| matches!(url.scheme(), "http" | "https"))
    }
}
