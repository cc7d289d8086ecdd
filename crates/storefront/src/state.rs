//! Application state shared across handlers.

use std::sync::Arc;

use rocketshoes_core::Locale;

use crate::cart::CartStore;
use crate::catalog::CatalogClient;
use crate::config::StorefrontConfig;
use crate::error::Result;
use crate::storage::KeyValueStore;

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to the
/// cart store, its storage and configuration.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    storage: Arc<dyn KeyValueStore>,
    cart: CartStore<CatalogClient>,
}

impl AppState {
    /// Create a new application state.
    ///
    /// The cart is loaded from `storage` here, once per process.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog HTTP client cannot be built.
    pub fn new(
        config: StorefrontConfig,
        storage: Arc<dyn KeyValueStore>,
    ) -> Result<Self> {
        let catalog = CatalogClient::new(&config.catalog)?;
        let cart = CartStore::load(catalog, Arc::clone(&storage));

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                storage,
                cart,
            }),
        })
    }

    /// Get a reference to the storefront configuration.
    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    /// Get a reference to the cart store.
    #[must_use]
    pub fn cart(&self) -> &CartStore<CatalogClient> {
        &self.inner.cart
    }

    /// Get a reference to the key-value store backing the cart.
    #[must_use]
    pub fn storage(&self) -> &dyn KeyValueStore {
        self.inner.storage.as_ref()
    }

    /// Locale used to format prices.
    #[must_use]
    pub fn locale(&self) -> Locale {
        self.inner.config.locale
    }
}
