//! Payment route handlers: checkout initiation and the confirmation
//! channels.
//!
//! Confirmation arrives on two independent channels that may race for the
//! same order: the provider's callback (Stripe webhook / PayPal capture)
//! and the buyer's redirect back to the shop. Every channel funnels into
//! the idempotent [`PaymentReconciler`], so the handlers here only
//! authenticate the channel and normalize its event.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::json;

use certdeck_core::{OrderId, OrderStatus, PaymentProvider};

use crate::error::{AppError, Result};
use crate::middleware::CurrentUser;
use crate::models::Order;
use crate::providers::{CallbackEvent, CheckoutSession};
use crate::services::{OrderFactory, PaymentReconciler};
use crate::state::AppState;

/// Checkout-initiation request body.
#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub order_id: OrderId,
}

/// PayPal capture request body.
#[derive(Debug, Deserialize, Serialize)]
pub struct CaptureRequest {
    pub order_id: OrderId,
    pub paypal_order_id: String,
}

/// Redirect-confirmation request body.
#[derive(Debug, Deserialize)]
pub struct ProcessSuccessRequest {
    pub order_id: OrderId,
    pub session_id: Option<String>,
}

/// Capture response: the reconciled order and whether payment went through.
#[derive(Debug, Serialize)]
pub struct CaptureResponse {
    pub success: bool,
    pub order: Order,
}

/// Load an order the user owns and check it is still payable.
async fn payable_order(state: &AppState, user: &CurrentUser, order_id: OrderId) -> Result<Order> {
    let order = OrderFactory::new(state.store())
        .get_owned(user.id, order_id)
        .await?;
    if order.status != OrderStatus::Pending {
        return Err(AppError::Conflict(format!(
            "order {order_id} is {} and cannot be paid",
            order.status
        )));
    }
    Ok(order)
}

/// `POST /payments/stripe/session` - open a Stripe checkout session.
pub async fn stripe_session(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<CreateSessionRequest>,
) -> Result<Json<CheckoutSession>> {
    let order = payable_order(&state, &user, request.order_id).await?;
    let session = state
        .gateways()
        .get(PaymentProvider::Stripe)
        .initiate(&order)
        .await
        .map_err(AppError::from)?;
    Ok(Json(session))
}

/// `POST /payments/paypal/session` - open a PayPal order.
pub async fn paypal_session(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<CreateSessionRequest>,
) -> Result<Json<CheckoutSession>> {
    let order = payable_order(&state, &user, request.order_id).await?;
    let session = state
        .gateways()
        .get(PaymentProvider::Paypal)
        .initiate(&order)
        .await
        .map_err(AppError::from)?;
    Ok(Json(session))
}

/// `POST /payments/stripe/webhook` - the asynchronous confirmation channel.
///
/// The signature is verified over the raw body before anything else
/// happens; an invalid signature is rejected with no side effects. Verified
/// events are acknowledged with `{"received": true}` even when they repeat
/// a confirmation, so Stripe stops retrying.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok());

    let event = state
        .gateways()
        .get(PaymentProvider::Stripe)
        .verify_and_parse_callback(&body, signature)
        .await
        .map_err(AppError::from)?;

    let reconciler = PaymentReconciler::new(state.store());
    match event {
        CallbackEvent::PaymentSucceeded {
            order_id,
            transaction_id,
        } => {
            reconciler
                .confirm_success(order_id, PaymentProvider::Stripe, &transaction_id)
                .await?;
        }
        CallbackEvent::PaymentFailed { order_id, reason } => {
            reconciler.confirm_failure(order_id, &reason).await?;
        }
        CallbackEvent::Ignored { event_type } => {
            tracing::debug!(event_type, "unhandled stripe event");
        }
    }

    Ok(Json(json!({ "received": true })))
}

/// `POST /payments/paypal/capture` - the synchronous confirmation channel.
///
/// The gateway captures the approved PayPal order server-side; the client's
/// assertion alone never completes anything.
pub async fn paypal_capture(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<CaptureRequest>,
) -> Result<Json<CaptureResponse>> {
    // Ownership check before any provider call.
    OrderFactory::new(state.store())
        .get_owned(user.id, request.order_id)
        .await?;

    let payload = serde_json::to_vec(&request)
        .map_err(|e| AppError::Internal(format!("capture payload: {e}")))?;
    let event = state
        .gateways()
        .get(PaymentProvider::Paypal)
        .verify_and_parse_callback(&payload, None)
        .await
        .map_err(AppError::from)?;

    let reconciler = PaymentReconciler::new(state.store());
    match event {
        CallbackEvent::PaymentSucceeded {
            order_id,
            transaction_id,
        } => {
            let order = reconciler
                .confirm_success(order_id, PaymentProvider::Paypal, &transaction_id)
                .await?;
            Ok(Json(CaptureResponse {
                success: true,
                order,
            }))
        }
        CallbackEvent::PaymentFailed { order_id, reason } => {
            let order = reconciler.confirm_failure(order_id, &reason).await?;
            Ok(Json(CaptureResponse {
                success: false,
                order,
            }))
        }
        CallbackEvent::Ignored { event_type } => Err(AppError::Internal(format!(
            "paypal capture produced unexpected event {event_type}"
        ))),
    }
}

/// `POST /payments/process-success` - the redirect-driven confirmation
/// channel.
///
/// Races freely with the webhook: whichever channel arrives second finds
/// the order already completed and gets it back unchanged. Requires the
/// authenticated buyer to own the order.
pub async fn process_success(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<ProcessSuccessRequest>,
) -> Result<Json<Order>> {
    let order = OrderFactory::new(state.store())
        .get_owned(user.id, request.order_id)
        .await?;

    let reference = request.session_id.as_deref().unwrap_or("manual");
    let order = PaymentReconciler::new(state.store())
        .confirm_success(order.id, order.payment_provider, reference)
        .await?;
    Ok(Json(order))
}
