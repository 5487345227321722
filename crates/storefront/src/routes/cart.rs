//! Cart route handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;

use certdeck_core::ProductId;

use crate::error::Result;
use crate::middleware::CurrentUser;
use crate::models::CartLine;
use crate::services::CartService;
use crate::state::AppState;

/// Add-to-cart request body.
#[derive(Debug, Deserialize)]
pub struct AddToCartRequest {
    pub product_id: ProductId,
    /// Defaults to 1.
    pub quantity: Option<u32>,
}

/// Quantity-update request body.
#[derive(Debug, Deserialize)]
pub struct SetQuantityRequest {
    pub quantity: i64,
}

/// `GET /cart` - the user's cart lines.
pub async fn index(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Vec<CartLine>>> {
    let lines = CartService::new(state.store()).list(user.id).await?;
    Ok(Json(lines))
}

/// `POST /cart` - add a product (or increment its line).
pub async fn add(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<AddToCartRequest>,
) -> Result<(StatusCode, Json<CartLine>)> {
    let line = CartService::new(state.store())
        .add(user.id, request.product_id, request.quantity.unwrap_or(1))
        .await?;
    Ok((StatusCode::CREATED, Json(line)))
}

/// `PATCH /cart/{product_id}` - overwrite a line's quantity; `<= 0` deletes.
pub async fn set_quantity(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(product_id): Path<ProductId>,
    Json(request): Json<SetQuantityRequest>,
) -> Result<Json<Option<CartLine>>> {
    let line = CartService::new(state.store())
        .set_quantity(user.id, product_id, request.quantity)
        .await?;
    Ok(Json(line))
}

/// `DELETE /cart/{product_id}` - remove a line.
pub async fn remove(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(product_id): Path<ProductId>,
) -> Result<StatusCode> {
    CartService::new(state.store())
        .remove(user.id, product_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /cart` - empty the cart.
pub async fn clear(State(state): State<AppState>, user: CurrentUser) -> Result<StatusCode> {
    CartService::new(state.store()).clear(user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}
