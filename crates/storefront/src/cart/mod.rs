//! Shopping cart state and its page projection.
//!
//! # Components
//!
//! - [`CartStore`] - owns the cart, reconciles every mutation against live
//!   stock and persists the result under [`CART_STATE_KEY`]
//! - [`CartView`] - pure projection of a cart into display rows and totals,
//!   plus [`CartIntent`] to turn button presses into store operations
//!
//! # Failure Handling
//!
//! Store operations return `Result<Cart, CartError>` and never leave a
//! partially applied change behind. Which message the shopper sees is decided
//! by the caller through [`CartError::notice`].

mod store;
mod view;

pub use store::{CART_STATE_KEY, CartStore, load_cart};
pub use view::{CartIntent, CartItemView, CartView};

use rocketshoes_core::{CartModelError, ProductId};
use thiserror::Error;

use crate::catalog::CatalogError;
use crate::storage::StorageError;

/// Why a cart operation was aborted.
#[derive(Debug, Error)]
pub enum CartError {
    /// Stock lookup failed (network, status or body).
    #[error("Failed to fetch stock for product {product_id}: {source}")]
    StockFetchFailed {
        product_id: ProductId,
        #[source]
        source: CatalogError,
    },

    /// Product detail lookup failed.
    #[error("Failed to fetch product {product_id}: {source}")]
    ProductFetchFailed {
        product_id: ProductId,
        #[source]
        source: CatalogError,
    },

    /// Requested quantity is above the live stock ceiling.
    #[error("Requested {requested} of product {product_id}, only {available} in stock")]
    StockExceeded {
        product_id: ProductId,
        requested: u64,
        available: u32,
    },

    /// Product is not in the cart.
    #[error("Product {0} is not in the cart")]
    ProductNotFound(ProductId),

    /// Change would break the cart data model.
    #[error("Invalid cart change: {0}")]
    Model(#[from] CartModelError),

    /// New cart could not be written to storage.
    #[error("Failed to persist cart: {0}")]
    PersistFailed(#[from] StorageError),
}

/// The cart operation a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartOperation {
    Add,
    Remove,
    Update,
}

/// User-facing toast messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    AddFailed,
    RemoveFailed,
    UpdateFailed,
    StockExceeded,
}

impl Notice {
    /// Message shown to the shopper.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::AddFailed => "Erro na adição do produto",
            Self::RemoveFailed => "Erro na remoção do produto",
            Self::UpdateFailed => "Erro na alteração de quantidade do produto",
            Self::StockExceeded => "Quantidade solicitada fora de estoque",
        }
    }
}

impl CartOperation {
    /// Generic failure notice for this operation.
    #[must_use]
    pub const fn failure_notice(self) -> Notice {
        match self {
            Self::Add => Notice::AddFailed,
            Self::Remove => Notice::RemoveFailed,
            Self::Update => Notice::UpdateFailed,
        }
    }
}

impl CartError {
    /// The toast to show when `operation` failed with this error.
    #[must_use]
    pub const fn notice(&self, operation: CartOperation) -> Notice {
        match self {
            Self::StockExceeded { .. } => Notice::StockExceeded,
            _ => operation.failure_notice(),
        }
    }

    /// Whether the failure is an expected business outcome rather than a
    /// fault worth reporting.
    #[must_use]
    pub const fn is_expected(&self) -> bool {
        matches!(self, Self::StockExceeded { .. } | Self::ProductNotFound(_))
    }
}
