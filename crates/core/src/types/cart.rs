//! The cart: an ordered list of line items, one per product.

use std::num::NonZeroU32;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::id::ProductId;
use crate::types::product::Product;

/// Violations of the cart data model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartModelError {
    /// A price below zero.
    #[error("price must not be negative (got {0})")]
    NegativePrice(Decimal),

    /// A second entry for a product that is already in the cart.
    #[error("product {0} appears more than once in the cart")]
    DuplicateProduct(ProductId),

    /// The cart total would not fit in a `Decimal`.
    #[error("cart total overflows when setting product {0}")]
    TotalOverflow(ProductId),
}

/// A product paired with the quantity being bought.
///
/// Serialized flat, the way the cart has always been stored:
/// `{"id": 1, "title": "...", "price": 139.9, "image": "...", "amount": 2}`.
/// A stored `amount` of zero is rejected when deserializing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartEntry {
    #[serde(flatten)]
    pub product: Product,
    pub amount: NonZeroU32,
}

impl CartEntry {
    /// A new entry holding a single unit of `product`.
    #[must_use]
    pub const fn new(product: Product) -> Self {
        Self {
            product,
            amount: NonZeroU32::MIN,
        }
    }

    /// The entry's product id.
    #[must_use]
    pub const fn id(&self) -> ProductId {
        self.product.id
    }

    /// Quantity as a plain integer.
    #[must_use]
    pub const fn amount(&self) -> u32 {
        self.amount.get()
    }

    /// `amount × unit price`.
    ///
    /// Saturates at `Decimal::MAX`; entries inside a [`Cart`] never do.
    #[must_use]
    pub fn subtotal(&self) -> Decimal {
        self.product
            .price
            .times(self.amount())
            .unwrap_or(Decimal::MAX)
    }
}

/// Ordered cart contents.
///
/// Entries keep the order in which their products were first added,
/// product ids are pairwise distinct and the total fits in a `Decimal`.
/// These properties are checked again when a cart is deserialized, so a
/// stored value that breaks them is rejected as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<CartEntry>", into = "Vec<CartEntry>")]
pub struct Cart {
    entries: Vec<CartEntry>,
}

impl Cart {
    /// An empty cart.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Entries in insertion order.
    #[must_use]
    pub fn entries(&self) -> &[CartEntry] {
        &self.entries
    }

    /// Iterate over entries in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, CartEntry> {
        self.entries.iter()
    }

    /// Number of distinct products.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cart holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up the entry for a product.
    #[must_use]
    pub fn get(&self, id: ProductId) -> Option<&CartEntry> {
        self.entries.iter().find(|entry| entry.id() == id)
    }

    /// Whether a product is in the cart.
    #[must_use]
    pub fn contains(&self, id: ProductId) -> bool {
        self.get(id).is_some()
    }

    /// Current quantity of a product, zero when absent.
    #[must_use]
    pub fn amount_of(&self, id: ProductId) -> u32 {
        self.get(id).map_or(0, CartEntry::amount)
    }

    /// Append a new entry at the end.
    ///
    /// # Errors
    ///
    /// Returns `CartModelError::DuplicateProduct` if the product is already in
    /// the cart, or `CartModelError::TotalOverflow` if the total would no
    /// longer fit; the cart is left untouched either way.
    pub fn push(&mut self, entry: CartEntry) -> Result<(), CartModelError> {
        if self.contains(entry.id()) {
            return Err(CartModelError::DuplicateProduct(entry.id()));
        }

        let total = self.checked_total_with(entry.id(), 0).and_then(|total| {
            total.checked_add(entry.product.price.times(entry.amount())?)
        });
        if total.is_none() {
            return Err(CartModelError::TotalOverflow(entry.id()));
        }

        self.entries.push(entry);
        Ok(())
    }

    /// Set the quantity of a product in place.
    ///
    /// Returns `Ok(false)` (and changes nothing) when the product is absent.
    ///
    /// # Errors
    ///
    /// Returns `CartModelError::TotalOverflow` if the new total would not
    /// fit; the cart is left untouched.
    pub fn set_amount(&mut self, id: ProductId, amount: NonZeroU32) -> Result<bool, CartModelError> {
        if !self.contains(id) {
            return Ok(false);
        }
        if self.checked_total_with(id, amount.get()).is_none() {
            return Err(CartModelError::TotalOverflow(id));
        }

        for entry in &mut self.entries {
            if entry.id() == id {
                entry.amount = amount;
            }
        }
        Ok(true)
    }

    /// Remove a product, keeping the order of the rest.
    pub fn remove(&mut self, id: ProductId) -> Option<CartEntry> {
        let index = self.entries.iter().position(|entry| entry.id() == id)?;
        Some(self.entries.remove(index))
    }

    /// Sum of every entry's subtotal.
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.entries
            .iter()
            .map(CartEntry::subtotal)
            .fold(Decimal::ZERO, Decimal::saturating_add)
    }

    /// Total with `id` counted at `amount`, `None` on overflow.
    fn checked_total_with(&self, id: ProductId, amount: u32) -> Option<Decimal> {
        self.entries.iter().try_fold(Decimal::ZERO, |total, entry| {
            let amount = if entry.id() == id {
                amount
            } else {
                entry.amount()
            };
            total.checked_add(entry.product.price.times(amount)?)
        })
    }

    /// Serialize to the stored JSON form.
    ///
    /// # Errors
    ///
    /// Returns the underlying `serde_json` error.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse the stored JSON form.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed JSON, zero amounts, negative prices or
    /// duplicate product ids.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

impl TryFrom<Vec<CartEntry>> for Cart {
    type Error = CartModelError;

    fn try_from(entries: Vec<CartEntry>) -> Result<Self, Self::Error> {
        let mut cart = Self::new();
        for entry in entries {
            cart.push(entry)?;
        }
        Ok(cart)
    }
}

impl From<Cart> for Vec<CartEntry> {
    fn from(cart: Cart) -> Self {
        cart.entries
    }
}

impl<'a> IntoIterator for &'a Cart {
    type Item = &'a CartEntry;
    type IntoIter = std::slice::Iter<'a, CartEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
