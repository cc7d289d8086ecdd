//! Integration test harness for the RocketShoes storefront.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p rocketshoes-integration-tests
//! ```
//!
//! Nothing external is required: [`StubCatalog`] serves `stock/{id}` and
//! `products/{id}` from an in-process axum server on an ephemeral port, and
//! the cart is persisted to a [`FileStore`] inside a temporary directory.
//! Requests are driven through the real router with `tower::ServiceExt`.

#![allow(clippy::missing_panics_doc, clippy::unwrap_used)]

use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::{Request, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::get,
};
use rocketshoes_core::Locale;
use rocketshoes_storefront::config::{CatalogConfig, StorefrontConfig};
use rocketshoes_storefront::state::AppState;
use rocketshoes_storefront::storage::FileStore;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;
use url::Url;

// =============================================================================
// Stub Catalog
// =============================================================================

#[derive(Default)]
struct Inventory {
    products: HashMap<i32, Value>,
    stock: HashMap<i32, u32>,
    broken_stock: HashSet<i32>,
    stock_requests: usize,
    product_requests: usize,
}

type SharedInventory = Arc<Mutex<Inventory>>;

/// In-process catalog service.
pub struct StubCatalog {
    base_url: Url,
    inventory: SharedInventory,
}

impl StubCatalog {
    /// Bind to an ephemeral port and start serving.
    pub async fn start() -> Self {
        let inventory = SharedInventory::default();

        let router = Router::new()
            .route("/stock/{id}", get(stock))
            .route("/products/{id}", get(product))
            .with_state(Arc::clone(&inventory));

        let listener = tokio::net::TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            base_url: Url::parse(&format!("http://{addr}/")).unwrap(),
            inventory,
        }
    }

    /// Base URL to hand to the catalog client.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Publish a product with `stock` units available.
    pub fn put_product(&self, id: i32, title: &str, price: f64, stock: u32) {
        let mut inventory = self.lock();
        inventory.products.insert(
            id,
            json!({
                "id": id,
                "title": title,
                "price": price,
                "image": format!("https://rocketshoes.example/images/{id}.jpg"),
            }),
        );
        inventory.stock.insert(id, stock);
    }

    /// Change the live stock of a product.
    pub fn set_stock(&self, id: i32, amount: u32) {
        self.lock().stock.insert(id, amount);
    }

    /// Make `stock/{id}` answer 500.
    pub fn break_stock(&self, id: i32) {
        self.lock().broken_stock.insert(id);
    }

    /// How many stock lookups were served so far.
    #[must_use]
    pub fn stock_requests(&self) -> usize {
        self.lock().stock_requests
    }

    /// How many product lookups were served so far.
    #[must_use]
    pub fn product_requests(&self) -> usize {
        self.lock().product_requests
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inventory> {
        self.inventory.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn stock(State(inventory): State<SharedInventory>, Path(id): Path<i32>) -> Response {
    let mut inventory = inventory.lock().unwrap_or_else(PoisonError::into_inner);
    inventory.stock_requests += 1;

    if inventory.broken_stock.contains(&id) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "stock backend down").into_response();
    }

    match inventory.stock.get(&id) {
        Some(amount) => Json(json!({ "id": id, "amount": amount })).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn product(State(inventory): State<SharedInventory>, Path(id): Path<i32>) -> Response {
    let mut inventory = inventory.lock().unwrap_or_else(PoisonError::into_inner);
    inventory.product_requests += 1;

    match inventory.products.get(&id) {
        Some(product) => Json(product.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

// =============================================================================
// Test Context
// =============================================================================

/// A buffered response.
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    /// Raw `HX-Trigger` header, if any.
    pub hx_trigger: Option<String>,
    pub request_id: Option<String>,
    pub body: String,
}

impl TestResponse {
    /// Message of a `showToast` trigger, if this response carries one.
    #[must_use]
    pub fn toast_message(&self) -> Option<String> {
        let trigger: Value = serde_json::from_str(self.hx_trigger.as_deref()?).ok()?;
        trigger["showToast"]["message"].as_str().map(String::from)
    }

    /// Whether the response fired `cart-updated`.
    #[must_use]
    pub fn cart_updated(&self) -> bool {
        self.hx_trigger.as_deref() == Some("cart-updated")
    }
}

/// Storefront wired to a stub catalog and a temporary cart file.
pub struct TestContext {
    pub catalog: StubCatalog,
    pub app: Router,
    storage_dir: TempDir,
}

impl TestContext {
    pub async fn new() -> Self {
        let catalog = StubCatalog::start().await;
        let storage_dir = tempfile::tempdir().unwrap();
        let app = build_app(&catalog, storage_dir.path().join("cart-state.json"));

        Self {
            catalog,
            app,
            storage_dir,
        }
    }

    /// Path of the persisted cart document.
    #[must_use]
    pub fn storage_path(&self) -> PathBuf {
        self.storage_dir.path().join("cart-state.json")
    }

    /// Simulate a process restart: reopen storage and reload the cart.
    pub fn restart(&mut self) {
        self.app = build_app(&self.catalog, self.storage_path());
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        let request = Request::get(path).body(Body::empty()).unwrap();
        self.send(request).await
    }

    pub async fn post_form(&self, path: &str, form: &str) -> TestResponse {
        let request = Request::post(path)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form.to_string()))
            .unwrap();
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.app.clone().oneshot(request).await.unwrap();

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(String::from)
        };
        let status = response.status();
        let hx_trigger = header("hx-trigger");
        let request_id = header("x-request-id");

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        TestResponse {
            status,
            hx_trigger,
            request_id,
            body: String::from_utf8(bytes.to_vec()).unwrap(),
        }
    }
}

fn build_app(catalog: &StubCatalog, storage_path: PathBuf) -> Router {
    let config = StorefrontConfig {
        host: Ipv4Addr::LOCALHOST.into(),
        port: 0,
        locale: Locale::PtBr,
        storage_path: storage_path.clone(),
        catalog: CatalogConfig::new(catalog.base_url().clone()),
        sentry_dsn: None,
        sentry_environment: None,
    };

    let storage = FileStore::open(storage_path).unwrap();
    let state = AppState::new(config, Arc::new(storage)).unwrap();
    rocketshoes_storefront::app(state)
}
