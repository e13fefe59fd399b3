use serde::{Deserialize, Serialize};

use crate::config::ExtractorConfig;
use crate::models::{ExtractionResult, Field, FieldValue};
use crate::render::Page;
use crate::utils::{AppError, Result};

/// What to write when a field's selector is absent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Fallback {
    /// A fixed marker string.
    Marker(String),
    /// The value already resolved for another, earlier field.
    CopyOf(Field),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldSpec {
    pub field: Field,
    pub selector: String,
    pub fallback: Fallback,
}

/// Reads a fixed, ordered list of fields from a rendered page. Field absence
/// never fails extraction; it resolves to the field's fallback.
#[derive(Debug, Clone)]
pub struct Extractor {
    specs: Vec<FieldSpec>,
}

impl Extractor {
    pub fn new(specs: Vec<FieldSpec>) -> Result<Self> {
        for (position, spec) in specs.iter().enumerate() {
            if let Fallback::CopyOf(source) = &spec.fallback {
                let resolved_earlier = specs[..position].iter().any(|s| s.field == *source);
                if !resolved_earlier {
                    return Err(AppError::Validation(format!(
                        "fallback of '{}' copies '{}', which is not extracted before it",
                        spec.field.as_str(),
                        source.as_str()
                    )));
                }
            }
        }
        Ok(Self { specs })
    }

    pub fn from_config(config: &ExtractorConfig) -> Result<Self> {
        let not_available = || Fallback::Marker(config.markers.not_available.clone());
        Self::new(vec![
            FieldSpec {
                field: Field::Name,
                selector: config.name_selector.clone(),
                fallback: not_available(),
            },
            FieldSpec {
                field: Field::DiscountedPrice,
                selector: config.discounted_price_selector.clone(),
                fallback: not_available(),
            },
            // No strikethrough price means the item sells at its current price
            FieldSpec {
                field: Field::OriginalPrice,
                selector: config.original_price_selector.clone(),
                fallback: Fallback::CopyOf(Field::DiscountedPrice),
            },
            FieldSpec {
                field: Field::Seller,
                selector: config.seller_selector.clone(),
                fallback: not_available(),
            },
            FieldSpec {
                field: Field::RatingCount,
                selector: config.rating_selector.clone(),
                fallback: Fallback::Marker(config.markers.missing_rating.clone()),
            },
        ])
    }

    pub fn specs(&self) -> &[FieldSpec] {
        &self.specs
    }

    pub async fn extract(&self, page: &dyn Page) -> ExtractionResult {
        let mut result = ExtractionResult::new();

        for spec in &self.specs {
            let value = match page.inner_text(&spec.selector).await {
                Some(text) => FieldValue::Found(text.trim().to_string()),
                None => {
                    tracing::debug!("Selector for {} absent: {}", spec.field.as_str(), spec.selector);
                    FieldValue::Fallback(self.resolve_fallback(&spec.fallback, &result))
                }
            };
            result.insert(spec.field, value);
        }

        result
    }

    fn resolve_fallback(&self, fallback: &Fallback, resolved: &ExtractionResult) -> String {
        match fallback {
            Fallback::Marker(marker) => marker.clone(),
            Fallback::CopyOf(field) => resolved.text(*field).unwrap_or_default().to_string(),
        }
    }
}
