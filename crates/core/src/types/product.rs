//! Catalog facts: products and their live stock.

use serde::{Deserialize, Serialize};

use crate::types::id::ProductId;
use crate::types::price::Price;

/// A product as described by the catalog service.
///
/// Products are immutable once fetched; the cart copies them into its
/// entries verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Catalog identifier.
    pub id: ProductId,
    /// Display title.
    pub title: String,
    /// Unit price.
    pub price: Price,
    /// Image URL.
    pub image: String,
}

/// Stock availability for one product at the time it was fetched.
///
/// Never cached: the cart asks for a fresh value on every mutation that can
/// raise a quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockInfo {
    /// Product the figure applies to.
    pub product_id: ProductId,
    /// Units available for sale.
    pub available: u32,
}

impl StockInfo {
    /// Whether `requested` units can be taken from this stock.
    #[must_use]
    pub fn allows(&self, requested: u64) -> bool {
        requested <= u64::from(self.available)
    }
}
