//! PayPal gateway: order creation and server-side capture.
//!
//! Initiation exchanges client credentials for an access token and creates a
//! PayPal order carrying our order id as `custom_id`. Confirmation is the
//! synchronous variant of the callback shape: the client hands us the
//! approved PayPal order id and the gateway performs the capture itself.
//! Nothing the client asserts is trusted - only a capture the provider
//! reports as `COMPLETED` reconciles the order.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use certdeck_core::{OrderId, PaymentProvider};

use super::{CallbackEvent, CheckoutSession, GatewayError, PROVIDER_TIMEOUT, PaymentGateway};
use crate::config::PaypalConfig;
use crate::models::Order;

/// PayPal payment gateway.
pub struct PaypalGateway {
    http: reqwest::Client,
    client_id: String,
    client_secret: SecretString,
    api_base: String,
}

impl PaypalGateway {
    /// Build a gateway from configuration.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Http` if the HTTP client cannot be built.
    pub fn new(config: &PaypalConfig) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(PROVIDER_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            api_base: config.api_base.trim_end_matches('/').to_owned(),
        })
    }

    /// Exchange client credentials for a bearer token.
    async fn access_token(&self) -> Result<String, GatewayError> {
        let response = self
            .http
            .post(format!("{}/v1/oauth2/token", self.api_base))
            .basic_auth(&self.client_id, Some(self.client_secret.expose_secret()))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(GatewayError::Rejected(format!(
                "token request failed ({status})"
            )));
        }

        let token: TokenResponse = response.json().await?;
        Ok(token.access_token)
    }
}

#[async_trait]
impl PaymentGateway for PaypalGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Paypal
    }

    async fn initiate(&self, order: &Order) -> Result<CheckoutSession, GatewayError> {
        let token = self.access_token().await?;

        let description = order
            .lines
            .iter()
            .map(|line| format!("{} x{}", line.exam_name, line.quantity))
            .collect::<Vec<_>>()
            .join(", ");

        let body = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "custom_id": order.id.to_string(),
                "description": description,
                "amount": {
                    "currency_code": "USD",
                    "value": format!("{:.2}", order.total_amount.amount()),
                },
            }],
        });

        let response = self
            .http
            .post(format!("{}/v2/checkout/orders", self.api_base))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected(format!(
                "order creation failed ({status}): {body}"
            )));
        }

        let created: CreateOrderResponse = response.json().await?;
        let approve_url = created
            .links
            .iter()
            .find(|link| link.rel == "approve")
            .map(|link| link.href.clone());

        Ok(CheckoutSession {
            provider: PaymentProvider::Paypal,
            session_id: created.id,
            redirect_url: approve_url,
        })
    }

    async fn verify_and_parse_callback(
        &self,
        payload: &[u8],
        _signature: Option<&str>,
    ) -> Result<CallbackEvent, GatewayError> {
        let request: CaptureRequest = serde_json::from_slice(payload)
            .map_err(|e| GatewayError::MalformedPayload(e.to_string()))?;

        let token = self.access_token().await?;
        let response = self
            .http
            .post(format!(
                "{}/v2/checkout/orders/{}/capture",
                self.api_base, request.paypal_order_id
            ))
            .bearer_auth(&token)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            // An uncapturable order is a failed verification, not a transport
            // error: the client-asserted approval did not check out.
            return Err(GatewayError::InvalidSignature);
        }

        let capture: CaptureResponse = response.json().await?;
        Ok(parse_capture(request.order_id, &capture))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct CreateOrderResponse {
    id: String,
    #[serde(default)]
    links: Vec<Link>,
}

#[derive(Debug, Deserialize)]
struct Link {
    rel: String,
    href: String,
}

/// Payload the capture route hands to the gateway.
#[derive(Debug, Deserialize)]
struct CaptureRequest {
    order_id: OrderId,
    paypal_order_id: String,
}

#[derive(Debug, Deserialize)]
struct CaptureResponse {
    status: String,
    #[serde(default)]
    purchase_units: Vec<PurchaseUnit>,
}

#[derive(Debug, Deserialize, Default)]
struct PurchaseUnit {
    #[serde(default)]
    payments: Option<Payments>,
}

#[derive(Debug, Deserialize)]
struct Payments {
    #[serde(default)]
    captures: Vec<Capture>,
}

#[derive(Debug, Deserialize)]
struct Capture {
    id: String,
}

/// Normalize a capture response into a callback event.
fn parse_capture(order_id: OrderId, capture: &CaptureResponse) -> CallbackEvent {
    if capture.status == "COMPLETED" {
        let capture_id = capture
            .purchase_units
            .first()
            .and_then(|unit| unit.payments.as_ref())
            .and_then(|payments| payments.captures.first())
            .map(|c| c.id.clone());

        CallbackEvent::PaymentSucceeded {
            order_id,
            // Capture id when present; the status alone already proves the
            // capture went through.
            transaction_id: capture_id.unwrap_or_else(|| format!("paypal-order-{order_id}")),
        }
    } else {
        CallbackEvent::PaymentFailed {
            order_id,
            reason: format!("paypal capture status {}", capture.status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_completed_capture() {
        let response: CaptureResponse = serde_json::from_str(
            r#"{
                "id": "5O190127TN364715T",
                "status": "COMPLETED",
                "purchase_units": [{
                    "payments": { "captures": [{ "id": "3C679366HH908993F" }] }
                }]
            }"#,
        )
        .expect("parse");

        let event = parse_capture(OrderId::new(3), &response);
        assert_eq!(
            event,
            CallbackEvent::PaymentSucceeded {
                order_id: OrderId::new(3),
                transaction_id: "3C679366HH908993F".to_owned(),
            }
        );
    }

    #[test]
    fn test_parse_declined_capture() {
        let response: CaptureResponse =
            serde_json::from_str(r#"{ "status": "DECLINED" }"#).expect("parse");

        let event = parse_capture(OrderId::new(3), &response);
        assert_eq!(
            event,
            CallbackEvent::PaymentFailed {
                order_id: OrderId::new(3),
                reason: "paypal capture status DECLINED".to_owned(),
            }
        );
    }

    #[test]
    fn test_parse_completed_without_capture_id_still_succeeds() {
        let response: CaptureResponse =
            serde_json::from_str(r#"{ "status": "COMPLETED" }"#).expect("parse");

        let event = parse_capture(OrderId::new(5), &response);
        assert!(matches!(event, CallbackEvent::PaymentSucceeded { .. }));
    }

    #[test]
    fn test_capture_request_shape() {
        let request: CaptureRequest =
            serde_json::from_str(r#"{ "order_id": 9, "paypal_order_id": "5O190127TN364715T" }"#)
                .expect("parse");
        assert_eq!(request.order_id, OrderId::new(9));
        assert_eq!(request.paypal_order_id, "5O190127TN364715T");
    }
}
