//! Cart page projection and intent dispatch.

use rocketshoes_core::{Cart, CartEntry, Locale};
use rust_decimal::Decimal;

use super::{CartError, CartOperation, CartStore};
use crate::catalog::Catalog;

/// One table row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartItemView {
    pub id: i32,
    pub title: String,
    pub image: String,
    /// Raw unit price.
    pub price: Decimal,
    pub amount: u32,
    /// Formatted unit price.
    pub unit_price: String,
    /// Formatted `amount × price`.
    pub subtotal: String,
    /// Decrementing from one would ask for zero, which the store ignores.
    pub decrement_disabled: bool,
}

/// Cart display data for templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartView {
    pub items: Vec<CartItemView>,
    /// Formatted sum of all subtotals.
    pub total: String,
    /// Number of distinct products (header badge).
    pub item_count: usize,
}

impl CartView {
    /// Project a cart into display rows.
    #[must_use]
    pub fn project(cart: &Cart, locale: Locale) -> Self {
        Self {
            items: cart
                .iter()
                .map(|entry| CartItemView::project(entry, locale))
                .collect(),
            total: locale.format(cart.total()),
            item_count: cart.len(),
        }
    }

    /// Whether there is nothing to show.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl CartItemView {
    fn project(entry: &CartEntry, locale: Locale) -> Self {
        Self {
            id: entry.id().as_i32(),
            title: entry.product.title.clone(),
            image: entry.product.image.clone(),
            price: entry.product.price.amount(),
            amount: entry.amount(),
            unit_price: locale.format_price(entry.product.price),
            subtotal: locale.format(entry.subtotal()),
            decrement_disabled: entry.amount() <= 1,
        }
    }
}

// =============================================================================
// Intents
// =============================================================================

/// A button press on a cart row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartIntent {
    Increment,
    Decrement,
    Remove,
}

impl CartIntent {
    /// The store operation this intent maps to.
    #[must_use]
    pub const fn operation(self) -> CartOperation {
        match self {
            Self::Increment | Self::Decrement => CartOperation::Update,
            Self::Remove => CartOperation::Remove,
        }
    }

    /// Run the intent against the store for the row showing `entry`.
    ///
    /// # Errors
    ///
    /// Whatever the underlying store operation returns.
    pub async fn dispatch<C: Catalog>(
        self,
        store: &CartStore<C>,
        entry: &CartEntry,
    ) -> Result<Cart, CartError> {
        let amount = i64::from(entry.amount());
        match self {
            Self::Increment => store.update_product_amount(entry.id(), amount + 1).await,
            Self::Decrement => store.update_product_amount(entry.id(), amount - 1).await,
            Self::Remove => store.remove_product(entry.id()).await,
        }
    }
}
