//! Product patch validation.
//!
//! Checks the raw JSON body of a product update before it can reach the
//! backing store. `name`, `description` and `price` are optional, but when
//! present must be strings; `price` must additionally look like a
//! non-negative decimal number. Any other field is dropped.

use std::sync::LazyLock;

use productcache_storage::ProductPatch;
use regex::Regex;
use serde_json::{Map, Value};

/// Non-negative decimal: digits, optionally a dot and more digits.
static PRICE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(\.\d+)?$").expect("Invalid price regex"));

/// Rejected product patch. `issues` names each offending field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid product patch: {}", issues.join("; "))]
pub struct ValidationError {
    pub issues: Vec<String>,
}

impl ValidationError {
    fn single(issue: impl Into<String>) -> Self {
        Self {
            issues: vec![issue.into()],
        }
    }
}

/// Validates `body` and returns the typed patch.
pub fn validate_patch(body: &Value) -> Result<ProductPatch, ValidationError> {
    let Some(object) = body.as_object() else {
        return Err(ValidationError::single("body must be a JSON object"));
    };

    let mut issues = Vec::new();
    let name = text_field(object, "name", &mut issues);
    let description = text_field(object, "description", &mut issues);
    let price = text_field(object, "price", &mut issues);

    if let Some(price) = &price
        && !PRICE_REGEX.is_match(price.trim())
    {
        issues.push(format!("price: {price:?} is not a decimal number"));
    }

    if !issues.is_empty() {
        return Err(ValidationError { issues });
    }

    Ok(ProductPatch {
        name,
        description,
        price: price.map(|p| p.trim().to_string()),
    })
}

fn text_field(
    object: &Map<String, Value>,
    field: &str,
    issues: &mut Vec<String>,
) -> Option<String> {
    match object.get(field) {
        None => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => {
            issues.push(format!("{field}: expected string, got {}", type_name(other)));
            None
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
