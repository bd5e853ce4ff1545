//! Storage types for the backing store abstraction.

use serde::{Deserialize, Serialize};

/// Numeric product identifier.
pub type ProductId = i64;

/// A product as stored in the backing store.
///
/// `price` is kept as text so decimal values survive without
/// floating-point rounding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// The product ID.
    pub id: ProductId,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Decimal price rendered as text, e.g. `"9.99"`.
    pub price: String,
}

impl Product {
    /// Creates a new `Product`.
    #[must_use]
    pub fn new(
        id: ProductId,
        name: impl Into<String>,
        description: impl Into<String>,
        price: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            description: description.into(),
            price: price.into(),
        }
    }
}

/// A partial update for a product.
///
/// Only the fields that are `Some` are written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
}

impl ProductPatch {
    /// Creates an empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the price.
    #[must_use]
    pub fn with_price(mut self, price: impl Into<String>) -> Self {
        self.price = Some(price.into());
        self
    }

    /// Returns `true` if the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.price.is_none()
    }

    /// Writes the populated fields onto `product`.
    pub fn apply(&self, product: &mut Product) {
        if let Some(ref name) = self.name {
            product.name.clone_from(name);
        }
        if let Some(ref description) = self.description {
            product.description.clone_from(description);
        }
        if let Some(ref price) = self.price {
            product.price.clone_from(price);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_json_shape() {
        let product = Product::new(42, "Widget", "d", "9.99");
        let json = serde_json::to_value(&product).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": 42, "name": "Widget", "description": "d", "price": "9.99"})
        );
    }

    #[test]
    fn test_patch_apply_partial() {
        let mut product = Product::new(7, "Old", "d", "1.00");
        ProductPatch::new().with_name("X").apply(&mut product);
        assert_eq!(product, Product::new(7, "X", "d", "1.00"));
    }

    #[test]
    fn test_patch_is_empty() {
        assert!(ProductPatch::new().is_empty());
        assert!(!ProductPatch::new().with_price("2.50").is_empty());
    }
}
