//! HTTP route handlers for storefront.
//!
//! # Route Structure
//!
//! ```text
//! GET  /                       - Redirect to the cart page
//! GET  /health                 - Liveness check
//! GET  /health/ready           - Readiness check (cart storage reachable)
//!
//! # Cart (HTMX fragments)
//! GET  /cart                   - Cart page
//! GET  /cart/items             - Cart table + total (fragment)
//! GET  /cart/count             - Cart count badge (fragment)
//! POST /cart/add               - Add one unit (returns count badge)
//! POST /cart/update            - Set amount (returns cart_items fragment)
//! POST /cart/increment         - Amount + 1 (returns cart_items fragment)
//! POST /cart/decrement         - Amount - 1 (returns cart_items fragment)
//! POST /cart/remove            - Remove product (returns cart_items fragment)
//! ```

pub mod cart;
pub mod health;

use axum::{
    Router,
    http::Uri,
    response::Redirect,
    routing::{get, post},
};

use crate::error::AppError;
use crate::state::AppState;

/// Create the cart routes router.
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(cart::show))
        .route("/items", get(cart::items))
        .route("/count", get(cart::count))
        .route("/add", post(cart::add))
        .route("/update", post(cart::update))
        .route("/increment", post(cart::increment))
        .route("/decrement", post(cart::decrement))
        .route("/remove", post(cart::remove))
}

/// Create all routes for the storefront.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(|| async { Redirect::to("/cart") }))
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
        .nest("/cart", cart_routes())
}

/// Fallback for unknown paths.
pub async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(uri.path().to_string())
}
