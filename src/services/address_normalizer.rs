//! Reconciles the historical shipping-address shapes into one record.
//!
//! Stored addresses come flat (`address_line1`, `zip_code`), camelCased
//! (`zipCode`), nested under an `address` object, or as a JSON-encoded
//! string. Each canonical field is read through an ordered alias list.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const REQUIRED_FIELDS: [&str; 5] = ["name", "address_line1", "city", "state", "postal_code"];
pub const DEFAULT_COUNTRY: &str = "US";

const NAME_ALIASES: &[&str] = &["name", "full_name", "fullName", "recipient_name", "recipientName"];
const LINE1_ALIASES: &[&str] = &["address_line1", "addressLine1", "address", "street", "line1"];
const LINE2_ALIASES: &[&str] = &["address_line2", "addressLine2", "line2"];
const CITY_ALIASES: &[&str] = &["city"];
const STATE_ALIASES: &[&str] = &["state", "province", "region"];
const POSTAL_ALIASES: &[&str] = &["postal_code", "zip_code", "zipCode", "postalCode", "zip"];
const COUNTRY_ALIASES: &[&str] = &["country", "country_code", "countryCode"];
const PHONE_ALIASES: &[&str] = &["phone", "phone_number", "phoneNumber"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalAddress {
    pub name: String,
    pub address_line1: String,
    pub address_line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
    pub phone: Option<String>,
}

impl CanonicalAddress {
    /// Splits `name` for vendors that want first and last separately.
    pub fn split_name(&self) -> (String, String) {
        let mut parts = self.name.split_whitespace();
        let first = parts.next().unwrap_or_default().to_string();
        let last = parts.collect::<Vec<_>>().join(" ");
        (first, last)
    }
}

/// Where the canonical address was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressSource {
    RecipientOverride,
    OrderShipping,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedAddress {
    pub address: CanonicalAddress,
    pub source: AddressSource,
    /// Soft problems, e.g. no phone number anywhere.
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("order has no shipping address")]
    Missing,
    #[error("shipping address is missing required fields: {}", .missing_fields.join(", "))]
    Incomplete { missing_fields: Vec<String> },
}

/// Inputs to normalization, in precedence order.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddressInputs<'a> {
    /// Order-level shipping address as stored.
    pub order_address: Option<&'a Value>,
    /// Shipping sub-object of a recipient assignment; wins wholesale.
    pub recipient_override: Option<&'a Value>,
    pub recipient_phone: Option<&'a str>,
    /// Purchaser's profile phone, last-resort fallback.
    pub profile_phone: Option<&'a str>,
}

/// Decodes the stored value into an object, accepting JSON-encoded strings.
fn as_object(value: &Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map.clone()),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        },
        _ => None,
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    let s = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

/// Field lookup over the top-level object, then a nested `address` object.
struct Fields<'a> {
    top: &'a Map<String, Value>,
    nested: Option<&'a Map<String, Value>>,
}

impl<'a> Fields<'a> {
    fn new(top: &'a Map<String, Value>) -> Self {
        let nested = top.get("address").and_then(Value::as_object);
        Self { top, nested }
    }

    fn get(&self, aliases: &[&str]) -> Option<String> {
        let lookup = |map: &Map<String, Value>| {
            aliases
                .iter()
                .find_map(|key| map.get(*key).and_then(scalar_to_string))
        };
        lookup(self.top).or_else(|| self.nested.and_then(lookup))
    }

    fn name(&self) -> Option<String> {
        self.get(NAME_ALIASES).or_else(|| {
            let first = self.get(&["first_name", "firstName"]);
            let last = self.get(&["last_name", "lastName"]);
            match (first, last) {
                (Some(f), Some(l)) => Some(format!("{} {}", f, l)),
                (Some(f), None) => Some(f),
                (None, Some(l)) => Some(l),
                (None, None) => None,
            }
        })
    }
}

/// Produces the canonical address or the complete list of missing fields.
pub fn normalize(inputs: AddressInputs<'_>) -> Result<NormalizedAddress, AddressError> {
    let override_obj = inputs.recipient_override.and_then(as_object);
    let (map, source) = match override_obj {
        Some(map) => (map, AddressSource::RecipientOverride),
        None => match inputs.order_address.and_then(as_object) {
            Some(map) => (map, AddressSource::OrderShipping),
            None => return Err(AddressError::Missing),
        },
    };

    let fields = Fields::new(&map);
    let name = fields.name();
    let line1 = fields.get(LINE1_ALIASES);
    let city = fields.get(CITY_ALIASES);
    let state = fields.get(STATE_ALIASES);
    let postal_code = fields.get(POSTAL_ALIASES);

    let missing_fields: Vec<String> = REQUIRED_FIELDS
        .iter()
        .zip([&name, &line1, &city, &state, &postal_code])
        .filter(|(_, value)| value.is_none())
        .map(|(field, _)| field.to_string())
        .collect();

    let (Some(name), Some(address_line1), Some(city), Some(state), Some(postal_code)) =
        (name, line1, city, state, postal_code)
    else {
        return Err(AddressError::Incomplete { missing_fields });
    };

    let non_empty = |s: &str| {
        let t = s.trim();
        (!t.is_empty()).then(|| t.to_string())
    };
    let phone = inputs
        .recipient_phone
        .and_then(non_empty)
        .or_else(|| fields.get(PHONE_ALIASES))
        .or_else(|| inputs.profile_phone.and_then(non_empty));

    let mut warnings = Vec::new();
    if phone.is_none() {
        warnings.push("no phone number available for delivery notifications".to_string());
    }

    Ok(NormalizedAddress {
        address: CanonicalAddress {
            name,
            address_line1,
            address_line2: fields.get(LINE2_ALIASES),
            city,
            state,
            postal_code,
            country: fields
                .get(COUNTRY_ALIASES)
                .unwrap_or_else(|| DEFAULT_COUNTRY.to_string()),
            phone,
        },
        source,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn order_only(value: &Value) -> AddressInputs<'_> {
        AddressInputs {
            order_address: Some(value),
            ..Default::default()
        }
    }

    #[test]
    fn flat_legacy_shape() {
        let raw = json!({
            "name": "Jordan Lee", "address": "12 Elm St", "city": "Portland",
            "state": "OR", "zip_code": 97201, "phone": "555-0100"
        });
        let out = normalize(order_only(&raw)).unwrap();
        assert_eq!(out.address.address_line1, "12 Elm St");
        assert_eq!(out.address.postal_code, "97201");
        assert_eq!(out.address.country, "US");
        assert_eq!(out.address.phone.as_deref(), Some("555-0100"));
        assert_eq!(out.source, AddressSource::OrderShipping);
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn nested_address_object_and_split_name() {
        let raw = json!({
            "first_name": "Ada", "last_name": "Lovelace",
            "address": {"street": "1 Analytical Way", "city": "London", "state": "LDN", "postalCode": "N1"}
        });
        let out = normalize(order_only(&raw)).unwrap();
        assert_eq!(out.address.name, "Ada Lovelace");
        assert_eq!(out.address.address_line1, "1 Analytical Way");
        assert_eq!(out.address.split_name(), ("Ada".into(), "Lovelace".into()));
    }

    #[test]
    fn postal_code_preferred_over_zip_aliases() {
        let raw = json!({
            "name": "A", "address_line1": "1", "city": "C", "state": "S",
            "postal_code": "11111", "zip_code": "22222", "zipCode": "33333"
        });
        assert_eq!(normalize(order_only(&raw)).unwrap().address.postal_code, "11111");
    }

    #[test]
    fn every_missing_field_is_reported() {
        let raw = json!({"name": "A", "address_line1": "1 Main", "state": "NY"});
        assert_matches!(
            normalize(order_only(&raw)),
            Err(AddressError::Incomplete { missing_fields }) if missing_fields == vec!["city", "postal_code"]
        );
        let blank = json!({"name": "  ", "address_line1": "", "city": "C", "state": "S", "zipCode": "1"});
        assert_matches!(
            normalize(order_only(&blank)),
            Err(AddressError::Incomplete { missing_fields }) if missing_fields == vec!["name", "address_line1"]
        );
    }

    #[test]
    fn missing_or_non_object_address() {
        assert_matches!(normalize(AddressInputs::default()), Err(AddressError::Missing));
        let raw = json!(42);
        assert_matches!(normalize(order_only(&raw)), Err(AddressError::Missing));
    }

    #[test]
    fn json_encoded_string_is_decoded() {
        let raw = Value::String(
            r#"{"name":"B","address_line1":"2 Oak","city":"X","state":"Y","zip":"9"}"#.into(),
        );
        assert_eq!(normalize(order_only(&raw)).unwrap().address.postal_code, "9");
    }

    #[test]
    fn recipient_override_wins_and_phone_precedence() {
        let order = json!({
            "name": "Buyer", "address_line1": "Buyer St", "city": "B", "state": "BS",
            "postal_code": "00000", "phone": "555-BUYER"
        });
        let recipient = json!({
            "name": "Recipient", "address_line1": "Gift Ln", "city": "R", "state": "RS", "zipCode": "99999"
        });
        let out = normalize(AddressInputs {
            order_address: Some(&order),
            recipient_override: Some(&recipient),
            recipient_phone: Some("555-RECIP"),
            profile_phone: Some("555-PROFILE"),
        })
        .unwrap();
        assert_eq!(out.source, AddressSource::RecipientOverride);
        assert_eq!(out.address.name, "Recipient");
        assert_eq!(out.address.phone.as_deref(), Some("555-RECIP"));

        let fallback = normalize(AddressInputs {
            order_address: Some(&recipient),
            profile_phone: Some("555-PROFILE"),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(fallback.address.phone.as_deref(), Some("555-PROFILE"));
    }

    #[test]
    fn absent_phone_is_only_a_warning() {
        let raw = json!({"name": "A", "address_line1": "1", "city": "C", "state": "S", "postal_code": "1"});
        let out = normalize(order_only(&raw)).unwrap();
        assert!(out.address.phone.is_none());
        assert_eq!(out.warnings.len(), 1);
    }
}
