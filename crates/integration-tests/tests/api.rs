//! End-to-end tests through the HTTP router.
//!
//! The router runs against the in-memory store; the Stripe webhook path
//! exercises the real gateway's signature verification with the fixture
//! signing secret.

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::util::ServiceExt;

use certdeck_core::{OrderStatus, UserId};
use certdeck_integration_tests::{
    TestContext, bearer, seed_product, stripe_signature_header, test_context,
};
use certdeck_storefront::db::ShopStore;
use certdeck_storefront::routes;

const BUYER: UserId = UserId::new(1);

fn app(ctx: &TestContext) -> Router {
    Router::new()
        .merge(routes::routes())
        .with_state(ctx.state.clone())
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("infallible router");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes()
        .to_vec();
    (status, bytes)
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, bytes) = send(app, request).await;
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn authed(method: Method, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, bearer(BUYER))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn authed_get(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header(header::AUTHORIZATION, bearer(BUYER))
        .body(Body::empty())
        .expect("request")
}

/// Seed a product, fill the cart, and create a pending order over HTTP.
async fn create_order(app: &Router, ctx: &TestContext, payment_method: &str) -> i64 {
    let product = seed_product(ctx.store.as_ref(), "Platform Administrator", 2500).await;

    let (status, _) = send_json(
        app,
        authed(
            Method::POST,
            "/cart",
            &json!({ "product_id": product.id, "quantity": 1 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send_json(
        app,
        authed(
            Method::POST,
            "/orders",
            &json!({ "payment_method": payment_method }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["order_id"].as_i64().expect("order id")
}

fn stripe_completed_event(order_id: i64, payment_intent: &str) -> Vec<u8> {
    json!({
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": "cs_test_e2e",
            "payment_intent": payment_intent,
            "metadata": { "order_id": order_id.to_string() },
        }}
    })
    .to_string()
    .into_bytes()
}

fn webhook_request(payload: &[u8], signature: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/payments/stripe/webhook")
        .header("stripe-signature", signature)
        .body(Body::from(payload.to_vec()))
        .expect("request")
}

#[tokio::test]
async fn test_cart_requires_authentication() {
    let ctx = test_context();
    let app = app(&ctx);

    let request = Request::builder()
        .method(Method::GET)
        .uri("/cart")
        .body(Body::empty())
        .expect("request");
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_stripe_webhook_checkout_flow() {
    let ctx = test_context();
    let app = app(&ctx);
    let order_id = create_order(&app, &ctx, "stripe").await;

    // Signed webhook completes the order.
    let payload = stripe_completed_event(order_id, "pi_e2e");
    let signature = stripe_signature_header(&payload, chrono::Utc::now().timestamp());
    let (status, body) = send_json(&app, webhook_request(&payload, &signature)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], json!(true));

    // Stripe retries are acknowledged without duplicating side effects.
    let (status, _) = send_json(&app, webhook_request(&payload, &signature)).await;
    assert_eq!(status, StatusCode::OK);
    let payments = ctx
        .store
        .payments_for_order(certdeck_core::OrderId::new(
            i32::try_from(order_id).expect("id"),
        ))
        .await
        .expect("payments");
    assert_eq!(payments.len(), 1);

    // The entitlement is listed and the cart is gone.
    let (status, downloads) = send_json(&app, authed_get("/downloads")).await;
    assert_eq!(status, StatusCode::OK);
    let downloads = downloads.as_array().expect("array").clone();
    assert_eq!(downloads.len(), 1);

    let (status, cart) = send_json(&app, authed_get("/cart")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(cart.as_array().expect("array").is_empty());

    // The token redeems to a PDF attachment, no session required.
    let token = downloads[0]["token"].as_str().expect("token").to_owned();
    let request = Request::builder()
        .method(Method::GET)
        .uri(format!("/download/{token}"))
        .body(Body::empty())
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("router");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("application/pdf")
    );
    let disposition = response
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .expect("disposition");
    assert!(disposition.contains("attachment"));
    assert!(disposition.contains(".pdf"));
}

#[tokio::test]
async fn test_stripe_webhook_rejects_bad_signatures() {
    let ctx = test_context();
    let app = app(&ctx);
    let order_id = create_order(&app, &ctx, "stripe").await;

    let payload = stripe_completed_event(order_id, "pi_forged");
    let (status, _) = send_json(&app, webhook_request(&payload, "t=0,v1=deadbeef")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // No state mutation happened.
    let (_, downloads) = send_json(&app, authed_get("/downloads")).await;
    assert!(downloads.as_array().expect("array").is_empty());
    let (_, orders) = send_json(&app, authed_get("/orders")).await;
    assert_eq!(orders[0]["status"], json!("PENDING"));
}

#[tokio::test]
async fn test_download_limit_surfaces_counter_over_http() {
    let ctx = test_context();
    let app = app(&ctx);
    let order_id = create_order(&app, &ctx, "stripe").await;

    let payload = stripe_completed_event(order_id, "pi_limit");
    let signature = stripe_signature_header(&payload, chrono::Utc::now().timestamp());
    send_json(&app, webhook_request(&payload, &signature)).await;

    let (_, downloads) = send_json(&app, authed_get("/downloads")).await;
    let token = downloads[0]["token"].as_str().expect("token").to_owned();

    for _ in 0..10 {
        let request = Request::builder()
            .uri(format!("/download/{token}"))
            .body(Body::empty())
            .expect("request");
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
    }

    let request = Request::builder()
        .uri(format!("/download/{token}"))
        .body(Body::empty())
        .expect("request");
    let (status, body) = send_json(&app, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["download_count"], json!(10));
    assert_eq!(body["max_downloads"], json!(10));
}

#[tokio::test]
async fn test_paypal_capture_flow() {
    let ctx = test_context();
    let app = app(&ctx);
    let order_id = create_order(&app, &ctx, "paypal").await;

    let (status, body) = send_json(
        &app,
        authed(
            Method::POST,
            "/payments/paypal/capture",
            &json!({ "order_id": order_id, "paypal_order_id": "5O190127TN364715T" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["order"]["status"], json!("COMPLETED"));
}

#[tokio::test]
async fn test_paypal_declined_capture_cancels() {
    let ctx = test_context();
    let app = app(&ctx);
    let order_id = create_order(&app, &ctx, "paypal").await;

    let (status, body) = send_json(
        &app,
        authed(
            Method::POST,
            "/payments/paypal/capture",
            &json!({ "order_id": order_id, "paypal_order_id": "fail-5O190127" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["order"]["status"], json!("CANCELLED"));
}

#[tokio::test]
async fn test_redirect_confirmation_races_safely_with_the_webhook() {
    let ctx = test_context();
    let app = app(&ctx);
    let order_id = create_order(&app, &ctx, "stripe").await;

    // Redirect lands first.
    let (status, order) = send_json(
        &app,
        authed(
            Method::POST,
            "/payments/process-success",
            &json!({ "order_id": order_id, "session_id": "cs_redirect" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], json!("COMPLETED"));

    // The webhook arrives second and is acknowledged as a no-op.
    let payload = stripe_completed_event(order_id, "pi_webhook");
    let signature = stripe_signature_header(&payload, chrono::Utc::now().timestamp());
    let (status, _) = send_json(&app, webhook_request(&payload, &signature)).await;
    assert_eq!(status, StatusCode::OK);

    let payments = ctx
        .store
        .payments_for_order(certdeck_core::OrderId::new(
            i32::try_from(order_id).expect("id"),
        ))
        .await
        .expect("payments");
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].stripe_id.as_deref(), Some("cs_redirect"));
}

#[tokio::test]
async fn test_empty_cart_order_creation_is_rejected() {
    let ctx = test_context();
    let app = app(&ctx);

    let (status, body) = send_json(
        &app,
        authed(Method::POST, "/orders", &json!({ "payment_method": "stripe" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("cart is empty"));
}

#[tokio::test]
async fn test_order_status_is_visible_in_history() {
    let ctx = test_context();
    let app = app(&ctx);
    let order_id = create_order(&app, &ctx, "stripe").await;

    let (status, orders) = send_json(&app, authed_get("/orders")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(orders[0]["id"].as_i64(), Some(order_id));
    assert_eq!(orders[0]["status"], json!("PENDING"));
    assert_eq!(
        orders[0]["status"],
        json!(OrderStatus::Pending),
        "wire format matches the domain enum"
    );
    assert_eq!(orders[0]["user_id"].as_i64(), Some(i64::from(BUYER.as_i32())));
}
