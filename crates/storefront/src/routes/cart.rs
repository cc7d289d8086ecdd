//! Cart route handlers.
//!
//! Cart operations use HTMX for dynamic updates without full page reloads.
//! Every mutation answers with a fragment plus an `HX-Trigger` header:
//! `cart-updated` on success, or a `showToast` event carrying the failure
//! notice. Failures still answer 200 so HTMX swaps the (unchanged) cart in.

use std::fmt::Write as _;

use askama::Template;
use askama_web::WebTemplate;
use axum::{
    Form,
    extract::State,
    http::HeaderValue,
    response::{AppendHeaders, IntoResponse, Response},
};
use rocketshoes_core::{Cart, ProductId};
use serde::Deserialize;
use tracing::instrument;

use crate::cart::{CartError, CartIntent, CartOperation, CartView, Notice};
use crate::error::add_breadcrumb;
use crate::state::AppState;

const HX_TRIGGER: &str = "HX-Trigger";

/// Event fired after any successful cart change.
const CART_UPDATED: &str = "cart-updated";

/// Form carrying only a product ID (add, increment, decrement, remove).
#[derive(Debug, Deserialize)]
pub struct ProductForm {
    pub product_id: ProductId,
}

/// Update cart form data.
#[derive(Debug, Deserialize)]
pub struct UpdateCartForm {
    pub product_id: ProductId,
    /// Signed so that zero and negative requests reach the store, which
    /// ignores them.
    pub amount: i64,
}

/// Cart page template.
#[derive(Template, WebTemplate)]
#[template(path = "cart/show.html")]
pub struct CartShowTemplate {
    pub cart: CartView,
    pub count: usize,
    pub lang: &'static str,
}

/// Cart items fragment template (for HTMX).
#[derive(Template, WebTemplate)]
#[template(path = "partials/cart_items.html")]
pub struct CartItemsTemplate {
    pub cart: CartView,
}

/// Cart count badge fragment template (for HTMX).
#[derive(Template, WebTemplate)]
#[template(path = "partials/cart_count.html")]
pub struct CartCountTemplate {
    pub count: usize,
}

// =============================================================================
// Response Helpers
// =============================================================================

/// `HX-Trigger` value raising a `showToast` event for `notice`.
fn toast_trigger(notice: Notice) -> HeaderValue {
    let payload = serde_json::json!({
        "showToast": {
            "level": "error",
            "message": notice.message(),
        }
    });

    HeaderValue::from_str(&escape_non_ascii(&payload.to_string()))
        .unwrap_or_else(|_| HeaderValue::from_static("cart-error"))
}

/// Escape every non-ASCII char of a JSON document as `\uXXXX`.
///
/// Header values must be visible ASCII, and non-ASCII can only occur inside
/// JSON strings, where the escape is equivalent.
fn escape_non_ascii(json: &str) -> String {
    let mut escaped = String::with_capacity(json.len());
    for c in json.chars() {
        if c.is_ascii() {
            escaped.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                let _ = write!(escaped, "\\u{unit:04x}");
            }
        }
    }
    escaped
}

fn report_failure(error: &CartError, operation: CartOperation) {
    if error.is_expected() {
        tracing::info!(error = %error, ?operation, "Cart change rejected");
    } else {
        tracing::error!(error = %error, ?operation, "Cart change failed");
    }
}

/// Pick the trigger for `result`, falling back to the current cart on error.
async fn settle(
    state: &AppState,
    operation: CartOperation,
    result: Result<Cart, CartError>,
) -> (HeaderValue, Cart) {
    match result {
        Ok(cart) => (HeaderValue::from_static(CART_UPDATED), cart),
        Err(e) => {
            report_failure(&e, operation);
            (toast_trigger(e.notice(operation)), state.cart().cart().await)
        }
    }
}

/// Answer with the cart items fragment.
async fn items_response(
    state: &AppState,
    operation: CartOperation,
    result: Result<Cart, CartError>,
) -> Response {
    let (trigger, cart) = settle(state, operation, result).await;
    (
        AppendHeaders([(HX_TRIGGER, trigger)]),
        CartItemsTemplate {
            cart: CartView::project(&cart, state.locale()),
        },
    )
        .into_response()
}

/// Run a row intent against the entry currently shown for `product_id`.
async fn dispatch_intent(state: &AppState, intent: CartIntent, product_id: ProductId) -> Response {
    let entry = state.cart().cart().await.get(product_id).cloned();

    let result = match entry {
        Some(entry) => intent.dispatch(state.cart(), &entry).await,
        None => Err(CartError::ProductNotFound(product_id)),
    };

    items_response(state, intent.operation(), result).await
}

// =============================================================================
// Handlers
// =============================================================================

/// Display cart page.
#[instrument(skip(state))]
pub async fn show(State(state): State<AppState>) -> impl IntoResponse {
    let cart = state.cart().cart().await;

    CartShowTemplate {
        count: cart.len(),
        cart: CartView::project(&cart, state.locale()),
        lang: state.locale().tag(),
    }
}

/// Cart items fragment (HTMX).
#[instrument(skip(state))]
pub async fn items(State(state): State<AppState>) -> impl IntoResponse {
    let cart = state.cart().cart().await;

    CartItemsTemplate {
        cart: CartView::project(&cart, state.locale()),
    }
}

/// Get cart count badge (HTMX).
#[instrument(skip(state))]
pub async fn count(State(state): State<AppState>) -> impl IntoResponse {
    CartCountTemplate {
        count: state.cart().cart().await.len(),
    }
}

/// Add one unit of a product (HTMX).
///
/// Returns the count badge so product pages can swap it in place.
#[instrument(skip(state))]
pub async fn add(State(state): State<AppState>, Form(form): Form<ProductForm>) -> Response {
    let product_id = form.product_id.to_string();
    add_breadcrumb("cart", "Add product", Some(&[("product_id", product_id.as_str())]));

    let result = state.cart().add_product(form.product_id).await;
    let (trigger, cart) = settle(&state, CartOperation::Add, result).await;

    (
        AppendHeaders([(HX_TRIGGER, trigger)]),
        CartCountTemplate { count: cart.len() },
    )
        .into_response()
}

/// Set a product's amount (HTMX).
#[instrument(skip(state))]
pub async fn update(State(state): State<AppState>, Form(form): Form<UpdateCartForm>) -> Response {
    let result = state
        .cart()
        .update_product_amount(form.product_id, form.amount)
        .await;

    items_response(&state, CartOperation::Update, result).await
}

/// Increment button (HTMX).
#[instrument(skip(state))]
pub async fn increment(State(state): State<AppState>, Form(form): Form<ProductForm>) -> Response {
    dispatch_intent(&state, CartIntent::Increment, form.product_id).await
}

/// Decrement button (HTMX).
#[instrument(skip(state))]
pub async fn decrement(State(state): State<AppState>, Form(form): Form<ProductForm>) -> Response {
    dispatch_intent(&state, CartIntent::Decrement, form.product_id).await
}

/// Remove button (HTMX).
#[instrument(skip(state))]
pub async fn remove(State(state): State<AppState>, Form(form): Form<ProductForm>) -> Response {
    let product_id = form.product_id.to_string();
    add_breadcrumb("cart", "Remove product", Some(&[("product_id", product_id.as_str())]));

    dispatch_intent(&state, CartIntent::Remove, form.product_id).await
}
