//! HTTP route handlers for the shop API.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                        - Liveness check
//! GET  /health/ready                  - Readiness check (store probe)
//!
//! # Catalog
//! GET  /products                      - Product listing
//! GET  /products/{id}                 - Product detail
//!
//! # Cart (requires auth)
//! GET    /cart                        - List cart lines
//! POST   /cart                        - Add / increment a line
//! PATCH  /cart/{product_id}           - Overwrite quantity (<= 0 deletes)
//! DELETE /cart/{product_id}           - Remove a line
//! DELETE /cart                        - Clear the cart
//!
//! # Orders (requires auth)
//! POST /orders                        - Create order from current cart
//! GET  /orders                        - Order history
//!
//! # Payments
//! POST /payments/stripe/session      - Open a Stripe checkout session (auth)
//! POST /payments/stripe/webhook      - Stripe webhook (signature-verified)
//! POST /payments/paypal/session      - Open a PayPal order (auth)
//! POST /payments/paypal/capture      - Capture an approved PayPal order (auth)
//! POST /payments/process-success     - Redirect-driven confirmation (auth)
//!
//! # Downloads
//! GET /downloads                      - List entitlements (auth)
//! GET /download/{token}               - Redeem a token, streaming the artifact
//! ```

pub mod cart;
pub mod downloads;
pub mod orders;
pub mod payments;
pub mod products;

use axum::Router;
use axum::routing::{get, post};

use crate::state::AppState;

/// Create the catalog routes router.
pub fn product_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(products::index))
        .route("/{id}", get(products::show))
}

/// Create the cart routes router.
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(cart::index).post(cart::add).delete(cart::clear))
        .route(
            "/{product_id}",
            axum::routing::patch(cart::set_quantity).delete(cart::remove),
        )
}

/// Create the order routes router.
pub fn order_routes() -> Router<AppState> {
    Router::new().route("/", post(orders::create).get(orders::index))
}

/// Create the payment routes router.
pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/stripe/session", post(payments::stripe_session))
        .route("/stripe/webhook", post(payments::stripe_webhook))
        .route("/paypal/session", post(payments::paypal_session))
        .route("/paypal/capture", post(payments::paypal_capture))
        .route("/process-success", post(payments::process_success))
}

/// Create all routes for the shop.
pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/products", product_routes())
        .nest("/cart", cart_routes())
        .nest("/orders", order_routes())
        .nest("/payments", payment_routes())
        .route("/downloads", get(downloads::index))
        .route("/download/{token}", get(downloads::redeem))
}
