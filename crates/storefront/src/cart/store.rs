//! Cart state container.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use rocketshoes_core::{Cart, CartEntry, ProductId, StockInfo};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{Instrument, Span, debug, info, instrument, warn};

use super::CartError;
use crate::catalog::Catalog;
use crate::storage::{KeyValueStore, StorageError};

/// Storage key holding the JSON-encoded cart.
pub const CART_STATE_KEY: &str = "cart-state";

/// Read the persisted cart.
///
/// Missing, unreadable or unparsable state yields an empty cart; the last two
/// are logged.
pub fn load_cart(storage: &dyn KeyValueStore) -> Cart {
    let raw = match storage.get(CART_STATE_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Cart::new(),
        Err(e) => {
            warn!(error = %e, "Failed to read stored cart, starting empty");
            return Cart::new();
        }
    };

    match Cart::from_json(&raw) {
        Ok(cart) => cart,
        Err(e) => {
            warn!(error = %e, "Stored cart is invalid, starting empty");
            Cart::new()
        }
    }
}

/// Owns the cart and applies the add/remove/update rules.
///
/// Operations on the same product run one at a time (a per-product async
/// lock is held across the stock lookup). The final change is applied to
/// whatever the cart holds at commit time, so operations on different
/// products never overwrite each other.
pub struct CartStore<C> {
    catalog: C,
    state: Arc<CartState>,
    product_locks: StdMutex<HashMap<ProductId, Arc<Mutex<()>>>>,
}

/// The committed cart and its storage, shared with commit tasks.
struct CartState {
    storage: Arc<dyn KeyValueStore>,
    cart: RwLock<Cart>,
    /// Serializes commits; readers only wait for the final swap.
    commits: Mutex<()>,
}

/// Exclusive right to change one product, released on drop.
struct ProductLock<'a> {
    locks: &'a StdMutex<HashMap<ProductId, Arc<Mutex<()>>>>,
    id: ProductId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ProductLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.id);
        }
    }
}

impl<C: Catalog> CartStore<C> {
    /// Create a store seeded from persisted state.
    pub fn load(catalog: C, storage: Arc<dyn KeyValueStore>) -> Self {
        let cart = load_cart(storage.as_ref());
        info!(products = cart.len(), "Cart loaded");

        Self {
            catalog,
            state: Arc::new(CartState {
                storage,
                cart: RwLock::new(cart),
                commits: Mutex::new(()),
            }),
            product_locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Snapshot of the current cart.
    pub async fn cart(&self) -> Cart {
        self.state.cart.read().await.clone()
    }

    /// The catalog this store checks against.
    pub const fn catalog(&self) -> &C {
        &self.catalog
    }

    /// Add one unit of a product.
    ///
    /// Raises the quantity of an existing entry in place, or fetches the
    /// product and appends a new entry with amount 1.
    ///
    /// # Errors
    ///
    /// `StockFetchFailed`, `StockExceeded`, `ProductFetchFailed` or
    /// `PersistFailed`; the cart is unchanged in every case.
    #[instrument(skip(self), fields(product_id = %id))]
    pub async fn add_product(&self, id: ProductId) -> Result<Cart, CartError> {
        let _lock = self.lock_product(id).await;
        self.add_locked(id).await
    }

    /// Remove a product entirely.
    ///
    /// # Errors
    ///
    /// `ProductNotFound` if the product is not in the cart, or
    /// `PersistFailed`; the cart is unchanged in both cases.
    #[instrument(skip(self), fields(product_id = %id))]
    pub async fn remove_product(&self, id: ProductId) -> Result<Cart, CartError> {
        let _lock = self.lock_product(id).await;
        self.commit(move |cart| {
            cart.remove(id)
                .map(|_| ())
                .ok_or(CartError::ProductNotFound(id))
        })
        .await
    }

    /// Set the quantity of a product.
    ///
    /// Amounts of zero or below are ignored without touching the catalog or
    /// storage. A product that is not in the cart leaves the entries as they
    /// are, but the cart is still written back.
    ///
    /// # Errors
    ///
    /// `StockFetchFailed`, `StockExceeded` or `PersistFailed`; the cart is
    /// unchanged in every case.
    #[instrument(skip(self), fields(product_id = %id))]
    pub async fn update_product_amount(
        &self,
        id: ProductId,
        amount: i64,
    ) -> Result<Cart, CartError> {
        if amount <= 0 {
            debug!("Ignoring non-positive amount");
            return Ok(self.cart().await);
        }

        let _lock = self.lock_product(id).await;
        self.update_locked(id, amount.unsigned_abs()).await
    }

    async fn add_locked(&self, id: ProductId) -> Result<Cart, CartError> {
        let current = self.state.cart.read().await.amount_of(id);

        let stock = self
            .catalog
            .stock(id)
            .await
            .map_err(|source| CartError::StockFetchFailed {
                product_id: id,
                source,
            })?;

        let amount = checked_amount(&stock, u64::from(current) + 1)?;

        let new_entry = if current == 0 {
            let product =
                self.catalog
                    .product(id)
                    .await
                    .map_err(|source| CartError::ProductFetchFailed {
                        product_id: id,
                        source,
                    })?;
            Some(CartEntry::new(product))
        } else {
            None
        };

        self.commit(move |cart| match new_entry {
            Some(entry) if !cart.contains(id) => cart.push(entry).map_err(CartError::from),
            _ => {
                cart.set_amount(id, amount)?;
                Ok(())
            }
        })
        .await
    }

    async fn update_locked(&self, id: ProductId, requested: u64) -> Result<Cart, CartError> {
        let stock = self
            .catalog
            .stock(id)
            .await
            .map_err(|source| CartError::StockFetchFailed {
                product_id: id,
                source,
            })?;

        let amount = checked_amount(&stock, requested)?;

        self.commit(move |cart| {
            if !cart.set_amount(id, amount)? {
                debug!("Product not in cart, writing cart back unchanged");
            }
            Ok(())
        })
        .await
    }

    /// Apply `change` to a copy of the current cart, persist the copy, then
    /// make it current.
    ///
    /// If `change` or the write fails, neither memory nor storage moves. The
    /// commit runs as its own task, so a caller that goes away mid-write
    /// cannot leave storage ahead of memory.
    async fn commit<F>(&self, change: F) -> Result<Cart, CartError>
    where
        F: FnOnce(&mut Cart) -> Result<(), CartError> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        tokio::spawn(async move { state.commit(change).await }.instrument(Span::current()))
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))?
    }

    async fn lock_product(&self, id: ProductId) -> ProductLock<'_> {
        let lock = {
            let mut locks = self
                .product_locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            // Sweep entries left by callers cancelled while waiting
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(id).or_default())
        };

        ProductLock {
            locks: &self.product_locks,
            id,
            guard: Some(lock.lock_owned().await),
        }
    }
}

impl CartState {
    async fn commit<F>(&self, change: F) -> Result<Cart, CartError>
    where
        F: FnOnce(&mut Cart) -> Result<(), CartError>,
    {
        let _serial = self.commits.lock().await;

        let mut next = self.cart.read().await.clone();
        change(&mut next)?;

        let json = next.to_json().map_err(StorageError::from)?;
        let storage = Arc::clone(&self.storage);
        tokio::task::spawn_blocking(move || storage.set(CART_STATE_KEY, &json))
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))??;

        *self.cart.write().await = next.clone();
        debug!(products = next.len(), "Cart committed");
        Ok(next)
    }
}

/// Check `requested` against the stock ceiling and turn it into an amount.
fn checked_amount(stock: &StockInfo, requested: u64) -> Result<NonZeroU32, CartError> {
    let exceeded = || {
        warn!(
            requested,
            available = stock.available,
            "Requested quantity exceeds stock"
        );
        CartError::StockExceeded {
            product_id: stock.product_id,
            requested,
            available: stock.available,
        }
    };

    if !stock.allows(requested) {
        return Err(exceeded());
    }

    u32::try_from(requested)
        .ok()
        .and_then(NonZeroU32::new)
        .ok_or_else(exceeded)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    use rocketshoes_core::{CartModelError, Price, Product};
    use rust_decimal::Decimal;

    use super::*;
    use crate::cart::CartIntent;
    use crate::catalog::CatalogError;
    use crate::storage::MemoryStore;

    // =========================================================================
    // Test doubles
    // =========================================================================

    #[derive(Default)]
    struct StubCatalog {
        stock: std::sync::Mutex<HashMap<ProductId, u32>>,
        products: HashMap<ProductId, Product>,
        stock_calls: AtomicUsize,
        product_calls: AtomicUsize,
        /// Stock lookups for these products never answer.
        stalled: std::sync::Mutex<HashSet<ProductId>>,
    }

    impl StubCatalog {
        fn with_product(mut self, id: i32, price: i64, stock: u32) -> Self {
            let id = ProductId::new(id);
            self.products.insert(
                id,
                Product {
                    id,
                    title: format!("Tênis {id}"),
                    price: Price::new(Decimal::from(price)).unwrap(),
                    image: format!("https://cdn.example.com/{id}.jpg"),
                },
            );
            self.stock.lock().unwrap().insert(id, stock);
            self
        }

        /// Stock is known but the product record is not.
        fn with_stock_only(self, id: i32, stock: u32) -> Self {
            self.stock.lock().unwrap().insert(ProductId::new(id), stock);
            self
        }

        fn set_stock(&self, id: i32, stock: u32) {
            self.stock.lock().unwrap().insert(ProductId::new(id), stock);
        }

        fn stall(&self, id: i32, stalled: bool) {
            let mut ids = self.stalled.lock().unwrap();
            if stalled {
                ids.insert(ProductId::new(id));
            } else {
                ids.remove(&ProductId::new(id));
            }
        }
    }

    impl Catalog for StubCatalog {
        async fn stock(&self, id: ProductId) -> Result<StockInfo, CatalogError> {
            self.stock_calls.fetch_add(1, Ordering::SeqCst);
            // Let concurrent operations interleave
            tokio::task::yield_now().await;
            let stalled = self.stalled.lock().unwrap().contains(&id);
            if stalled {
                std::future::pending::<()>().await;
            }
            let available = self
                .stock
                .lock()
                .unwrap()
                .get(&id)
                .copied()
                .ok_or_else(|| CatalogError::NotFound(format!("stock/{id}")))?;
            Ok(StockInfo {
                product_id: id,
                available,
            })
        }

        async fn product(&self, id: ProductId) -> Result<Product, CatalogError> {
            self.product_calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.products
                .get(&id)
                .cloned()
                .ok_or_else(|| CatalogError::NotFound(format!("products/{id}")))
        }
    }

    struct ReadOnlyStore(MemoryStore);

    impl KeyValueStore for ReadOnlyStore {
        fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.0.get(key)
        }

        fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only",
            )))
        }
    }

    /// Store whose writes block until the test lets them through.
    struct GatedStore {
        inner: MemoryStore,
        writing: AtomicBool,
        gate: std::sync::Mutex<mpsc::Receiver<()>>,
    }

    impl GatedStore {
        fn new() -> (Self, mpsc::Sender<()>) {
            let (open, gate) = mpsc::channel();
            let store = Self {
                inner: MemoryStore::new(),
                writing: AtomicBool::new(false),
                gate: std::sync::Mutex::new(gate),
            };
            (store, open)
        }
    }

    impl KeyValueStore for GatedStore {
        fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
            self.writing.store(true, Ordering::SeqCst);
            let _ = self
                .gate
                .lock()
                .unwrap()
                .recv_timeout(Duration::from_secs(5));
            self.inner.set(key, value)
        }
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("condition not reached");
    }

    fn pid(id: i32) -> ProductId {
        ProductId::new(id)
    }

    fn amounts(cart: &Cart) -> Vec<(i32, u32)> {
        cart.iter().map(|e| (e.id().as_i32(), e.amount())).collect()
    }

    fn stored(storage: &MemoryStore) -> Option<String> {
        storage.get(CART_STATE_KEY).unwrap()
    }

    fn store_with(catalog: StubCatalog, storage: &Arc<MemoryStore>) -> CartStore<StubCatalog> {
        CartStore::load(catalog, Arc::clone(storage) as Arc<dyn KeyValueStore>)
    }

    /// Seed storage through the store itself so fixtures follow the real rules.
    async fn seeded(
        catalog: StubCatalog,
        items: &[(i32, i64)],
    ) -> (CartStore<StubCatalog>, Arc<MemoryStore>) {
        let storage = Arc::new(MemoryStore::new());
        let store = store_with(catalog, &storage);
        for &(id, amount) in items {
            store.add_product(pid(id)).await.unwrap();
            if amount > 1 {
                store.update_product_amount(pid(id), amount).await.unwrap();
            }
        }
        (store, storage)
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    #[test]
    fn test_load_cart_absent_is_empty() {
        assert!(load_cart(&MemoryStore::new()).is_empty());
    }

    #[test]
    fn test_load_cart_unparsable_is_empty() {
        let storage = MemoryStore::with_value(CART_STATE_KEY, "{not json");
        assert!(load_cart(&storage).is_empty());

        let storage = MemoryStore::with_value(
            CART_STATE_KEY,
            r#"[{"id":1,"title":"X","price":10,"image":"x","amount":0}]"#,
        );
        assert!(load_cart(&storage).is_empty());
    }

    #[test]
    fn test_load_cart_reads_stored_entries() {
        let storage = MemoryStore::with_value(
            CART_STATE_KEY,
            r#"[{"id":2,"title":"Y","price":5,"image":"y","amount":3},
                {"id":1,"title":"X","price":10,"image":"x","amount":1}]"#,
        );
        let cart = load_cart(&storage);
        assert_eq!(amounts(&cart), vec![(2, 3), (1, 1)]);
    }

    // =========================================================================
    // addProduct
    // =========================================================================

    #[tokio::test]
    async fn test_add_new_product_to_empty_cart() {
        let storage = Arc::new(MemoryStore::new());
        let store = store_with(StubCatalog::default().with_product(1, 10, 5), &storage);

        let cart = store.add_product(pid(1)).await.unwrap();

        assert_eq!(amounts(&cart), vec![(1, 1)]);
        let entry = cart.get(pid(1)).unwrap();
        assert_eq!(entry.product.price.amount(), Decimal::from(10));
        assert_eq!(store.cart().await, cart);
        assert_eq!(Cart::from_json(&stored(&storage).unwrap()).unwrap(), cart);
    }

    #[tokio::test]
    async fn test_add_existing_product_increments_in_place() {
        let catalog = StubCatalog::default()
            .with_product(1, 10, 5)
            .with_product(2, 5, 5);
        let (store, _storage) = seeded(catalog, &[(1, 1), (2, 1)]).await;
        let product_calls = store.catalog().product_calls.load(Ordering::SeqCst);

        let cart = store.add_product(pid(1)).await.unwrap();

        assert_eq!(amounts(&cart), vec![(1, 2), (2, 1)]);
        // Existing entries reuse their stored product
        assert_eq!(
            store.catalog().product_calls.load(Ordering::SeqCst),
            product_calls
        );
    }

    #[tokio::test]
    async fn test_add_appends_new_products_at_end() {
        let catalog = StubCatalog::default()
            .with_product(3, 10, 5)
            .with_product(1, 10, 5)
            .with_product(2, 10, 5);
        let (store, _storage) = seeded(catalog, &[(3, 1), (1, 1)]).await;

        let cart = store.add_product(pid(2)).await.unwrap();
        assert_eq!(amounts(&cart), vec![(3, 1), (1, 1), (2, 1)]);
    }

    #[tokio::test]
    async fn test_add_beyond_stock_is_rejected() {
        let (store, storage) = seeded(StubCatalog::default().with_product(1, 10, 1), &[(1, 1)]).await;
        let before = stored(&storage);

        let err = store.add_product(pid(1)).await.unwrap_err();

        assert!(matches!(
            err,
            CartError::StockExceeded {
                requested: 2,
                available: 1,
                ..
            }
        ));
        assert_eq!(amounts(&store.cart().await), vec![(1, 1)]);
        assert_eq!(stored(&storage), before);
    }

    #[tokio::test]
    async fn test_add_with_zero_stock_never_fetches_product() {
        let storage = Arc::new(MemoryStore::new());
        let store = store_with(StubCatalog::default().with_product(1, 10, 0), &storage);

        let err = store.add_product(pid(1)).await.unwrap_err();

        assert!(matches!(err, CartError::StockExceeded { .. }));
        assert_eq!(store.catalog().product_calls.load(Ordering::SeqCst), 0);
        assert!(store.cart().await.is_empty());
        assert_eq!(stored(&storage), None);
    }

    #[tokio::test]
    async fn test_add_stock_fetch_failure_leaves_cart_unchanged() {
        let storage = Arc::new(MemoryStore::new());
        let store = store_with(StubCatalog::default(), &storage);

        let err = store.add_product(pid(9)).await.unwrap_err();

        assert!(matches!(err, CartError::StockFetchFailed { .. }));
        assert!(store.cart().await.is_empty());
        assert_eq!(stored(&storage), None);
    }

    #[tokio::test]
    async fn test_add_product_fetch_failure_leaves_cart_unchanged() {
        let storage = Arc::new(MemoryStore::new());
        let store = store_with(StubCatalog::default().with_stock_only(4, 10), &storage);

        let err = store.add_product(pid(4)).await.unwrap_err();

        assert!(matches!(err, CartError::ProductFetchFailed { .. }));
        assert!(store.cart().await.is_empty());
        assert_eq!(stored(&storage), None);
    }

    #[tokio::test]
    async fn test_repeated_adds_respect_stock_and_uniqueness() {
        let storage = Arc::new(MemoryStore::new());
        let store = store_with(StubCatalog::default().with_product(1, 10, 3), &storage);

        for _ in 0..3 {
            store.add_product(pid(1)).await.unwrap();
        }
        assert!(store.add_product(pid(1)).await.is_err());

        let cart = store.cart().await;
        assert_eq!(amounts(&cart), vec![(1, 3)]);
    }

    // =========================================================================
    // removeProduct
    // =========================================================================

    #[tokio::test]
    async fn test_remove_keeps_the_rest_in_order() {
        let catalog = StubCatalog::default()
            .with_product(1, 10, 5)
            .with_product(2, 10, 5)
            .with_product(3, 10, 5);
        let (store, storage) = seeded(catalog, &[(1, 1), (2, 1), (3, 2)]).await;

        let cart = store.remove_product(pid(1)).await.unwrap();

        assert_eq!(amounts(&cart), vec![(2, 1), (3, 2)]);
        assert_eq!(Cart::from_json(&stored(&storage).unwrap()).unwrap(), cart);
    }

    #[tokio::test]
    async fn test_remove_absent_product_fails() {
        let (store, storage) = seeded(StubCatalog::default().with_product(1, 10, 5), &[(1, 1)]).await;
        let before = stored(&storage);

        let err = store.remove_product(pid(2)).await.unwrap_err();

        assert!(matches!(err, CartError::ProductNotFound(id) if id == pid(2)));
        assert_eq!(amounts(&store.cart().await), vec![(1, 1)]);
        assert_eq!(stored(&storage), before);
    }

    #[tokio::test]
    async fn test_remove_never_touches_catalog() {
        let (store, _storage) = seeded(StubCatalog::default().with_product(1, 10, 5), &[(1, 1)]).await;
        let stock_calls = store.catalog().stock_calls.load(Ordering::SeqCst);

        store.remove_product(pid(1)).await.unwrap();

        assert_eq!(
            store.catalog().stock_calls.load(Ordering::SeqCst),
            stock_calls
        );
    }

    // =========================================================================
    // updateProductAmount
    // =========================================================================

    #[tokio::test]
    async fn test_update_non_positive_amount_is_noop() {
        let (store, storage) = seeded(StubCatalog::default().with_product(1, 10, 5), &[(1, 2)]).await;
        let before = stored(&storage);
        let stock_calls = store.catalog().stock_calls.load(Ordering::SeqCst);

        for amount in [0, -1] {
            let cart = store.update_product_amount(pid(1), amount).await.unwrap();
            assert_eq!(amounts(&cart), vec![(1, 2)]);
        }

        assert_eq!(
            store.catalog().stock_calls.load(Ordering::SeqCst),
            stock_calls
        );
        assert_eq!(stored(&storage), before);
    }

    #[tokio::test]
    async fn test_update_sets_amount_within_stock() {
        let catalog = StubCatalog::default()
            .with_product(1, 10, 5)
            .with_product(2, 10, 5);
        let (store, _storage) = seeded(catalog, &[(1, 1), (2, 1)]).await;

        let cart = store.update_product_amount(pid(1), 5).await.unwrap();
        assert_eq!(amounts(&cart), vec![(1, 5), (2, 1)]);

        let cart = store.update_product_amount(pid(1), 2).await.unwrap();
        assert_eq!(amounts(&cart), vec![(1, 2), (2, 1)]);
    }

    #[tokio::test]
    async fn test_update_beyond_stock_is_rejected() {
        let (store, storage) = seeded(StubCatalog::default().with_product(1, 10, 5), &[(1, 2)]).await;
        let before = stored(&storage);
        store.catalog().set_stock(1, 2);

        let err = store.update_product_amount(pid(1), 3).await.unwrap_err();

        assert!(matches!(
            err,
            CartError::StockExceeded {
                requested: 3,
                available: 2,
                ..
            }
        ));
        assert_eq!(amounts(&store.cart().await), vec![(1, 2)]);
        assert_eq!(stored(&storage), before);
    }

    #[tokio::test]
    async fn test_update_huge_amount_is_stock_exceeded() {
        let (store, _storage) = seeded(StubCatalog::default().with_product(1, 10, 5), &[(1, 1)]).await;

        let err = store
            .update_product_amount(pid(1), i64::MAX)
            .await
            .unwrap_err();

        assert!(matches!(err, CartError::StockExceeded { .. }));
    }

    #[tokio::test]
    async fn test_update_stock_fetch_failure() {
        let (store, storage) = seeded(StubCatalog::default().with_product(1, 10, 5), &[(1, 1)]).await;
        let before = stored(&storage);

        let err = store.update_product_amount(pid(7), 2).await.unwrap_err();

        assert!(matches!(err, CartError::StockFetchFailed { .. }));
        assert_eq!(stored(&storage), before);
    }

    #[tokio::test]
    async fn test_update_absent_product_still_persists() {
        let storage = Arc::new(MemoryStore::new());
        let store = store_with(StubCatalog::default().with_stock_only(8, 5), &storage);

        let cart = store.update_product_amount(pid(8), 2).await.unwrap();

        assert!(cart.is_empty());
        assert_eq!(stored(&storage).as_deref(), Some("[]"));
    }

    #[tokio::test]
    async fn test_update_rejects_total_beyond_decimal_range() {
        let mut catalog = StubCatalog::default().with_product(1, 10, 5);
        catalog.products.get_mut(&pid(1)).unwrap().price =
            Price::new("50000000000000000000000000000".parse().unwrap()).unwrap();
        let (store, storage) = seeded(catalog, &[(1, 1)]).await;
        let before = stored(&storage);

        let err = store.update_product_amount(pid(1), 2).await.unwrap_err();

        assert!(matches!(
            err,
            CartError::Model(CartModelError::TotalOverflow(id)) if id == pid(1)
        ));
        assert_eq!(
            err.notice(crate::cart::CartOperation::Update),
            crate::cart::Notice::UpdateFailed
        );
        assert_eq!(amounts(&store.cart().await), vec![(1, 1)]);
        assert_eq!(stored(&storage), before);

        let err = store.add_product(pid(1)).await.unwrap_err();
        assert!(matches!(err, CartError::Model(CartModelError::TotalOverflow(_))));
        assert_eq!(stored(&storage), before);
    }

    // =========================================================================
    // Intents
    // =========================================================================

    #[tokio::test]
    async fn test_increment_and_decrement_intents() {
        let (store, _storage) = seeded(StubCatalog::default().with_product(1, 10, 5), &[(1, 2)]).await;

        let entry = store.cart().await.get(pid(1)).cloned().unwrap();
        let cart = CartIntent::Increment.dispatch(&store, &entry).await.unwrap();
        assert_eq!(amounts(&cart), vec![(1, 3)]);

        let entry = cart.get(pid(1)).cloned().unwrap();
        let cart = CartIntent::Decrement.dispatch(&store, &entry).await.unwrap();
        assert_eq!(amounts(&cart), vec![(1, 2)]);
    }

    #[tokio::test]
    async fn test_decrement_from_one_is_noop() {
        let (store, storage) = seeded(StubCatalog::default().with_product(1, 10, 5), &[(1, 1)]).await;
        let before = stored(&storage);

        let entry = store.cart().await.get(pid(1)).cloned().unwrap();
        let cart = CartIntent::Decrement.dispatch(&store, &entry).await.unwrap();

        assert_eq!(amounts(&cart), vec![(1, 1)]);
        assert_eq!(stored(&storage), before);
    }

    #[tokio::test]
    async fn test_remove_intent() {
        let catalog = StubCatalog::default()
            .with_product(1, 10, 5)
            .with_product(2, 10, 5);
        let (store, _storage) = seeded(catalog, &[(1, 1), (2, 1)]).await;

        let entry = store.cart().await.get(pid(1)).cloned().unwrap();
        let cart = CartIntent::Remove.dispatch(&store, &entry).await.unwrap();

        assert_eq!(amounts(&cart), vec![(2, 1)]);
    }

    #[tokio::test]
    async fn test_increment_beyond_stock_keeps_amount() {
        let (store, _storage) = seeded(StubCatalog::default().with_product(1, 10, 2), &[(1, 2)]).await;

        let entry = store.cart().await.get(pid(1)).cloned().unwrap();
        let err = CartIntent::Increment.dispatch(&store, &entry).await.unwrap_err();

        assert_eq!(
            err.notice(CartIntent::Increment.operation()),
            crate::cart::Notice::StockExceeded
        );
        assert_eq!(amounts(&store.cart().await), vec![(1, 2)]);
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    #[tokio::test]
    async fn test_persist_failure_rolls_back() {
        let storage = Arc::new(ReadOnlyStore(MemoryStore::new()));
        let store = CartStore::load(
            StubCatalog::default().with_product(1, 10, 5),
            storage as Arc<dyn KeyValueStore>,
        );

        let err = store.add_product(pid(1)).await.unwrap_err();

        assert!(matches!(err, CartError::PersistFailed(_)));
        assert!(store.cart().await.is_empty());
    }

    #[tokio::test]
    async fn test_reads_are_not_blocked_by_a_slow_write() {
        let (gated, open) = GatedStore::new();
        let storage = Arc::new(gated);
        let store = Arc::new(CartStore::load(
            StubCatalog::default().with_product(1, 10, 5),
            Arc::clone(&storage) as Arc<dyn KeyValueStore>,
        ));

        let adding = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.add_product(pid(1)).await }
        });
        wait_until(|| storage.writing.load(Ordering::SeqCst)).await;

        // The write is in flight: readers still see the last committed cart
        let snapshot = tokio::time::timeout(Duration::from_secs(1), store.cart())
            .await
            .expect("read blocked by write");
        assert!(snapshot.is_empty());

        open.send(()).unwrap();
        let cart = adding.await.unwrap().unwrap();
        assert_eq!(amounts(&cart), vec![(1, 1)]);
        assert_eq!(store.cart().await, cart);
    }

    #[tokio::test]
    async fn test_abandoned_request_still_commits_consistently() {
        let (gated, open) = GatedStore::new();
        let storage = Arc::new(gated);
        let store = Arc::new(CartStore::load(
            StubCatalog::default().with_product(1, 10, 5),
            Arc::clone(&storage) as Arc<dyn KeyValueStore>,
        ));

        let request = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.add_product(pid(1)).await }
        });
        wait_until(|| storage.writing.load(Ordering::SeqCst)).await;
        request.abort();
        assert!(request.await.unwrap_err().is_cancelled());

        open.send(()).unwrap();
        wait_until(|| storage.inner.get(CART_STATE_KEY).unwrap().is_some()).await;
        let cart = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                let cart = store.cart().await;
                if !cart.is_empty() {
                    return cart;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("memory never caught up with storage");

        let persisted = Cart::from_json(&storage.inner.get(CART_STATE_KEY).unwrap().unwrap());
        assert_eq!(persisted.unwrap(), cart);
        assert!(store.product_locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reload_sees_committed_cart() {
        let catalog = StubCatalog::default()
            .with_product(1, 10, 5)
            .with_product(2, 5, 5);
        let (store, storage) = seeded(catalog, &[(1, 1), (2, 2)]).await;

        let reloaded = store_with(StubCatalog::default(), &storage);
        assert_eq!(reloaded.cart().await, store.cart().await);
    }

    // =========================================================================
    // Concurrency
    // =========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_adds_of_same_product_all_count() {
        let storage = Arc::new(MemoryStore::new());
        let store = Arc::new(store_with(
            StubCatalog::default().with_product(1, 10, 10),
            &storage,
        ));

        let tasks: Vec<_> = (0..6)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.add_product(pid(1)).await })
            })
            .collect();
        for task in tasks {
            task.await.expect("task panicked").unwrap();
        }

        assert_eq!(amounts(&store.cart().await), vec![(1, 6)]);
        assert!(store.product_locks.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_adds_never_exceed_stock() {
        let storage = Arc::new(MemoryStore::new());
        let store = Arc::new(store_with(
            StubCatalog::default().with_product(1, 10, 3),
            &storage,
        ));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.add_product(pid(1)).await })
            })
            .collect();

        let mut succeeded = 0;
        for task in tasks {
            if task.await.expect("task panicked").is_ok() {
                succeeded += 1;
            }
        }

        assert_eq!(succeeded, 3);
        assert_eq!(amounts(&store.cart().await), vec![(1, 3)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_adds_of_different_products_all_kept() {
        let storage = Arc::new(MemoryStore::new());
        let mut catalog = StubCatalog::default();
        for id in 1..=5 {
            catalog = catalog.with_product(id, 10, 5);
        }
        let store = Arc::new(store_with(catalog, &storage));

        let tasks: Vec<_> = (1..=5)
            .map(|id| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.add_product(pid(id)).await })
            })
            .collect();
        for task in tasks {
            task.await.expect("task panicked").unwrap();
        }

        let cart = store.cart().await;
        assert_eq!(cart.len(), 5);
        assert_eq!(Cart::from_json(&stored(&storage).unwrap()).unwrap(), cart);
    }

    #[tokio::test]
    async fn test_cancelled_operation_releases_product_lock() {
        let storage = Arc::new(MemoryStore::new());
        let store = store_with(StubCatalog::default().with_product(1, 10, 5), &storage);
        store.catalog().stall(1, true);

        let cancelled =
            tokio::time::timeout(Duration::from_millis(20), store.add_product(pid(1))).await;
        assert!(cancelled.is_err());
        assert!(store.product_locks.lock().unwrap().is_empty());

        store.catalog().stall(1, false);
        let cart = store.add_product(pid(1)).await.unwrap();
        assert_eq!(amounts(&cart), vec![(1, 1)]);
        assert!(store.product_locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_waiter_leaves_no_lock_entry() {
        let storage = Arc::new(MemoryStore::new());
        let store = Arc::new(store_with(
            StubCatalog::default()
                .with_product(1, 10, 5)
                .with_product(2, 10, 5),
            &storage,
        ));
        store.catalog().stall(1, true);

        // Holder stays inside the stock lookup until aborted
        let holder = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.add_product(pid(1)).await }
        });
        wait_until(|| store.catalog().stock_calls.load(Ordering::SeqCst) == 1).await;

        let waiter =
            tokio::time::timeout(Duration::from_millis(20), store.add_product(pid(1))).await;
        assert!(waiter.is_err());

        holder.abort();
        assert!(holder.await.unwrap_err().is_cancelled());
        assert!(store.product_locks.lock().unwrap().is_empty());

        store.add_product(pid(2)).await.unwrap();
        assert!(store.product_locks.lock().unwrap().is_empty());
    }
}
