//! Order route handlers.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use certdeck_core::{OrderId, PaymentProvider, Price};

use crate::error::Result;
use crate::middleware::CurrentUser;
use crate::models::Order;
use crate::services::OrderFactory;
use crate::state::AppState;

/// Order-creation request body.
#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub payment_method: PaymentProvider,
}

/// Order-creation response.
#[derive(Debug, Serialize)]
pub struct CreateOrderResponse {
    pub order_id: OrderId,
    pub total_amount: Price,
}

/// `POST /orders` - snapshot the cart into a pending order.
pub async fn create(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<CreateOrderResponse>)> {
    let order = OrderFactory::new(state.store())
        .create_from_cart(user.id, request.payment_method)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateOrderResponse {
            order_id: order.id,
            total_amount: order.total_amount,
        }),
    ))
}

/// `GET /orders` - the user's order history.
pub async fn index(State(state): State<AppState>, user: CurrentUser) -> Result<Json<Vec<Order>>> {
    let orders = OrderFactory::new(state.store()).list(user.id).await?;
    Ok(Json(orders))
}
