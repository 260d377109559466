//! Product entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::order::{Money, ProductId};

/// A sellable product with its current stock count.
///
/// Stock is unsigned; the store additionally enforces `stock >= 0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    pub stock: u32,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Creates a product.
    pub fn new(id: impl Into<ProductId>, name: impl Into<String>, price: Money, stock: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            price,
            stock,
            updated_at: Utc::now(),
        }
    }

    /// Returns true if `quantity` units can be taken from stock.
    pub fn has_stock_for(&self, quantity: u32) -> bool {
        self.stock >= quantity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_stock_for() {
        let product = Product::new("SKU-001", "Widget", Money::from_cents(1000), 5);
        assert!(product.has_stock_for(0));
        assert!(product.has_stock_for(5));
        assert!(!product.has_stock_for(6));
    }
}
