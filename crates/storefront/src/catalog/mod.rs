//! Product and stock catalog service.
//!
//! # Endpoints
//!
//! - `GET /stock/{id}` - `{"id": 1, "amount": 3}`, live availability
//! - `GET /products/{id}` - `{"id": 1, "title": "...", "price": 179.9, "image": "..."}`
//!
//! # Caching
//!
//! Product details are immutable and cached in memory via `moka` (5 minute
//! TTL). Stock is never cached: every cart mutation that can raise a quantity
//! checks against a fresh figure.
//!
//! # Example
//!
//! ```rust,ignore
//! use rocketshoes_storefront::catalog::{Catalog, CatalogClient};
//!
//! let catalog = CatalogClient::new(&config.catalog)?;
//! let stock = catalog.stock(ProductId::new(1)).await?;
//! if stock.allows(2) {
//!     let product = catalog.product(ProductId::new(1)).await?;
//! }
//! ```

mod client;

pub use client::CatalogClient;

use std::future::Future;

use rocketshoes_core::{Product, ProductId, StockInfo};
use thiserror::Error;

/// Errors that can occur when talking to the catalog service.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// HTTP request failed (connection, timeout, TLS).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Request URL could not be built.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Service answered with a non-success status.
    #[error("Catalog returned {status}: {message}")]
    Status { status: u16, message: String },

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Response body was not the expected JSON.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Read access to products and their live stock.
///
/// The cart store is generic over this trait so tests can swap in an
/// in-process double for the HTTP client.
pub trait Catalog: Send + Sync {
    /// Fetch current availability of a product.
    fn stock(
        &self,
        id: ProductId,
    ) -> impl Future<Output = Result<StockInfo, CatalogError>> + Send;

    /// Fetch the full product record.
    fn product(&self, id: ProductId)
    -> impl Future<Output = Result<Product, CatalogError>> + Send;
}
