//! Reads the schema-versioned `line_items` payload stored on an order.
//!
//! Two shapes exist in the wild: the legacy bare array and the current
//! `{ "items": [...] }` wrapper. Field names also drifted between
//! snake_case and camelCase, which the serde aliases below absorb.

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Ten uppercase alphanumerics. Catalog ids usually carry the `B0` prefix,
/// books use their ISBN-10, and neither form is required.
static ASIN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9A-Z]{10}$").expect("valid ASIN regex"));

pub fn is_valid_product_id(product_id: &str) -> bool {
    ASIN_PATTERN.is_match(product_id)
}

/// Gift recipient attached to a line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RecipientAssignment {
    #[serde(default, alias = "recipientId")]
    pub recipient_id: Option<String>,
    #[serde(default, alias = "recipientName", alias = "name")]
    pub recipient_name: Option<String>,
    #[serde(default, alias = "recipientPhone", alias = "phone")]
    pub recipient_phone: Option<String>,
    /// Recipient-level shipping override, in any of the address shapes.
    #[serde(default, alias = "shippingAddress", alias = "address")]
    pub shipping_address: Option<Value>,
}

impl RecipientAssignment {
    fn shipping_override(&self) -> Option<&Value> {
        self.shipping_address
            .as_ref()
            .filter(|v| v.is_object() || v.is_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineItem {
    pub product_id: String,
    pub quantity: u32,
    pub unit_price: Option<Decimal>,
    pub title: Option<String>,
    pub is_gift: bool,
    pub gift_message: Option<String>,
    pub recipient: Option<RecipientAssignment>,
}

impl LineItem {
    pub fn line_total(&self) -> Decimal {
        self.unit_price.unwrap_or_default() * Decimal::from(self.quantity)
    }
}

#[derive(Debug, Deserialize)]
struct RawLineItem {
    #[serde(default, alias = "productId", alias = "asin", alias = "product_asin")]
    product_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_quantity")]
    quantity: Option<i64>,
    #[serde(default, alias = "price", alias = "unitPrice")]
    unit_price: Option<Decimal>,
    #[serde(default, alias = "name", alias = "productName")]
    title: Option<String>,
    #[serde(default, alias = "isGift")]
    is_gift: Option<bool>,
    #[serde(default, alias = "giftMessage")]
    gift_message: Option<String>,
    #[serde(default, alias = "recipientAssignment", alias = "recipient")]
    recipient_assignment: Option<RecipientAssignment>,
    /// Some rows put the recipient address directly on the item.
    #[serde(default, alias = "recipientShippingAddress")]
    recipient_shipping_address: Option<Value>,
}

/// Quantities arrive as numbers or numeric strings.
fn lenient_quantity<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("quantity {} is not an integer", n))),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("quantity '{}' is not an integer", s))),
        Some(other) => Err(serde::de::Error::custom(format!(
            "quantity has unsupported type: {}",
            other
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LineItemError {
    #[error("line items are neither an array nor an object with an items array")]
    UnrecognizedShape,
    #[error("order has no line items")]
    Empty,
    #[error("line item {index} is malformed: {detail}")]
    Malformed { index: usize, detail: String },
    #[error("invalid product identifiers: {}", .0.join(", "))]
    InvalidProductIds(Vec<String>),
}

/// Canonical line items plus what the submitter needs from them.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedItems {
    pub items: Vec<LineItem>,
}

impl ExtractedItems {
    pub fn subtotal(&self) -> Decimal {
        self.items.iter().map(LineItem::line_total).sum()
    }

    /// First recipient shipping override; it applies to the whole submission.
    pub fn recipient_override(&self) -> Option<(&RecipientAssignment, &Value)> {
        self.items.iter().find_map(|item| {
            item.recipient
                .as_ref()
                .and_then(|r| r.shipping_override().map(|addr| (r, addr)))
        })
    }

    pub fn first_recipient(&self) -> Option<&RecipientAssignment> {
        self.items.iter().find_map(|item| item.recipient.as_ref())
    }

    pub fn any_gift_flag(&self) -> bool {
        self.items.iter().any(|item| item.is_gift)
    }

    pub fn first_gift_message(&self) -> Option<&str> {
        self.items
            .iter()
            .filter_map(|item| item.gift_message.as_deref())
            .map(str::trim)
            .find(|m| !m.is_empty())
    }

    pub fn product_ids(&self) -> Vec<String> {
        self.items.iter().map(|i| i.product_id.clone()).collect()
    }

    /// Recipients identified by user id, deduplicated in item order.
    pub fn recipient_ids(&self) -> Vec<Uuid> {
        let mut ids = Vec::new();
        for id in self
            .items
            .iter()
            .filter_map(|item| item.recipient.as_ref()?.recipient_id.as_deref())
            .filter_map(|raw| Uuid::parse_str(raw.trim()).ok())
        {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }
}

fn item_array(raw: &Value) -> Result<&Vec<Value>, LineItemError> {
    match raw {
        Value::Array(items) => Ok(items),
        Value::Object(map) => match map.get("items") {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(LineItemError::UnrecognizedShape),
        },
        _ => Err(LineItemError::UnrecognizedShape),
    }
}

fn convert(index: usize, raw: RawLineItem) -> Result<LineItem, LineItemError> {
    let product_id = raw
        .product_id
        .map(|p| p.trim().to_string())
        .ok_or_else(|| LineItemError::Malformed {
            index,
            detail: "missing product_id".into(),
        })?;

    let quantity = match raw.quantity {
        None => 1,
        Some(q) if q >= 1 => u32::try_from(q).map_err(|_| LineItemError::Malformed {
            index,
            detail: format!("quantity {} is too large", q),
        })?,
        Some(q) => {
            return Err(LineItemError::Malformed {
                index,
                detail: format!("quantity must be positive, got {}", q),
            })
        }
    };

    if let Some(price) = raw.unit_price {
        if price.is_sign_negative() {
            return Err(LineItemError::Malformed {
                index,
                detail: format!("unit price must not be negative, got {}", price),
            });
        }
    }

    let recipient = match (raw.recipient_assignment, raw.recipient_shipping_address) {
        (Some(mut r), Some(addr)) => {
            if r.shipping_address.is_none() {
                r.shipping_address = Some(addr);
            }
            Some(r)
        }
        (Some(r), None) => Some(r),
        (None, Some(addr)) => Some(RecipientAssignment {
            shipping_address: Some(addr),
            ..Default::default()
        }),
        (None, None) => None,
    };

    Ok(LineItem {
        product_id,
        quantity,
        unit_price: raw.unit_price,
        title: raw.title,
        is_gift: raw.is_gift.unwrap_or(false),
        gift_message: raw.gift_message,
        recipient,
    })
}

/// Parses the stored payload into a non-empty, validated item list.
///
/// Every item is checked; invalid product ids are reported together.
pub fn extract(raw: &Value) -> Result<ExtractedItems, LineItemError> {
    let values = item_array(raw)?;
    if values.is_empty() {
        return Err(LineItemError::Empty);
    }

    let mut items = Vec::with_capacity(values.len());
    for (index, value) in values.iter().enumerate() {
        if !value.is_object() {
            return Err(LineItemError::Malformed {
                index,
                detail: "line item is not an object".into(),
            });
        }
        let parsed: RawLineItem =
            serde_json::from_value(value.clone()).map_err(|e| LineItemError::Malformed {
                index,
                detail: e.to_string(),
            })?;
        items.push(convert(index, parsed)?);
    }

    let invalid: Vec<String> = items
        .iter()
        .filter(|item| !is_valid_product_id(&item.product_id))
        .map(|item| item.product_id.clone())
        .collect();
    if !invalid.is_empty() {
        return Err(LineItemError::InvalidProductIds(invalid));
    }

    Ok(ExtractedItems { items })
}
