//! Catalog route handlers.
//!
//! The catalog itself is out of the checkout core's hands; these are the
//! minimal reads the cart and checkout pages need.

use axum::Json;
use axum::extract::{Path, State};

use certdeck_core::ProductId;

use crate::error::{AppError, Result};
use crate::models::Product;
use crate::state::AppState;

/// `GET /products` - active products, alphabetical.
pub async fn index(State(state): State<AppState>) -> Result<Json<Vec<Product>>> {
    Ok(Json(state.store().list_products().await?))
}

/// `GET /products/{id}` - one product.
pub async fn show(
    State(state): State<AppState>,
    Path(id): Path<ProductId>,
) -> Result<Json<Product>> {
    let product = state
        .store()
        .get_product(id)
        .await?
        .filter(|p| p.is_active)
        .ok_or_else(|| AppError::NotFound(format!("product {id}")))?;
    Ok(Json(product))
}
