use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Product fields pulled from a page. Variant order is extraction order:
/// `OriginalPrice` comes after `DiscountedPrice` because it may fall back to it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Name,
    DiscountedPrice,
    OriginalPrice,
    Seller,
    RatingCount,
}

impl Field {
    pub const ALL: [Field; 5] = [
        Field::Name,
        Field::DiscountedPrice,
        Field::OriginalPrice,
        Field::Seller,
        Field::RatingCount,
    ];

    /// Column order used in output rows.
    pub const DISPLAY_ORDER: [Field; 5] = [
        Field::Name,
        Field::OriginalPrice,
        Field::DiscountedPrice,
        Field::Seller,
        Field::RatingCount,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::DiscountedPrice => "discounted_price",
            Field::OriginalPrice => "original_price",
            Field::Seller => "seller",
            Field::RatingCount => "rating_count",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    /// Text read from the page.
    Found(String),
    /// Selector was absent; the field's fallback policy produced this value.
    Fallback(String),
}

impl FieldValue {
    pub fn as_str(&self) -> &str {
        match self {
            FieldValue::Found(text) | FieldValue::Fallback(text) => text,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, FieldValue::Found(_))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractionResult {
    fields: BTreeMap<Field, FieldValue>,
}

impl ExtractionResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: Field, value: FieldValue) {
        self.fields.insert(field, value);
    }

    pub fn get(&self, field: Field) -> Option<&FieldValue> {
        self.fields.get(&field)
    }

    pub fn text(&self, field: Field) -> Option<&str> {
        self.get(field).map(FieldValue::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Field, &FieldValue)> {
        self.fields.iter().map(|(field, value)| (*field, value))
    }
}
