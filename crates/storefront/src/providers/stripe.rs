//! Stripe gateway: Checkout Sessions and webhook verification.
//!
//! Initiation creates a Checkout Session through the form-encoded REST API
//! with the order id in the session metadata. Confirmation arrives on the
//! webhook channel; the `Stripe-Signature` header (`t=<ts>,v1=<hmac>`) is
//! verified against the signing secret before the payload is even parsed.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;

use certdeck_core::{OrderId, PaymentProvider};

use super::{CallbackEvent, CheckoutSession, GatewayError, PROVIDER_TIMEOUT, PaymentGateway};
use crate::config::StripeConfig;
use crate::models::Order;

type HmacSha256 = Hmac<Sha256>;

/// Reject webhook timestamps older (or newer) than this, limiting replays.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Stripe payment gateway.
pub struct StripeGateway {
    http: reqwest::Client,
    secret_key: SecretString,
    webhook_secret: SecretString,
    api_base: String,
    shop_base_url: String,
}

impl StripeGateway {
    /// Build a gateway from configuration.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Http` if the HTTP client cannot be built.
    pub fn new(config: &StripeConfig, shop_base_url: &str) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(PROVIDER_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            secret_key: config.secret_key.clone(),
            webhook_secret: config.webhook_secret.clone(),
            api_base: config.api_base.trim_end_matches('/').to_owned(),
            shop_base_url: shop_base_url.trim_end_matches('/').to_owned(),
        })
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Stripe
    }

    async fn initiate(&self, order: &Order) -> Result<CheckoutSession, GatewayError> {
        let mut params: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("payment_method_types[0]".into(), "card".into()),
            (
                "success_url".into(),
                format!(
                    "{}/payment/success?session_id={{CHECKOUT_SESSION_ID}}&order_id={}",
                    self.shop_base_url, order.id
                ),
            ),
            (
                "cancel_url".into(),
                format!("{}/checkout", self.shop_base_url),
            ),
            ("metadata[order_id]".into(), order.id.to_string()),
        ];

        for (i, line) in order.lines.iter().enumerate() {
            let cents = line.unit_price.cents().ok_or_else(|| {
                GatewayError::Rejected(format!("line amount {} not billable", line.unit_price))
            })?;
            params.push((format!("line_items[{i}][quantity]"), line.quantity.to_string()));
            params.push((
                format!("line_items[{i}][price_data][currency]"),
                "usd".into(),
            ));
            params.push((
                format!("line_items[{i}][price_data][unit_amount]"),
                cents.to_string(),
            ));
            params.push((
                format!("line_items[{i}][price_data][product_data][name]"),
                line.exam_name.clone(),
            ));
            params.push((
                format!("line_items[{i}][price_data][product_data][description]"),
                format!("Exam preparation bundle, order line {}", i + 1),
            ));
        }

        let response = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(self.secret_key.expose_secret())
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected(format!(
                "checkout session creation failed ({status}): {body}"
            )));
        }

        let session: CreateSessionResponse = response.json().await?;
        Ok(CheckoutSession {
            provider: PaymentProvider::Stripe,
            session_id: session.id,
            redirect_url: session.url,
        })
    }

    async fn verify_and_parse_callback(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<CallbackEvent, GatewayError> {
        let header = signature.ok_or(GatewayError::InvalidSignature)?;
        verify_signature(
            payload,
            header,
            self.webhook_secret.expose_secret(),
            Utc::now().timestamp(),
        )?;
        parse_event(payload)
    }
}

#[derive(Debug, Deserialize)]
struct CreateSessionResponse {
    id: String,
    url: Option<String>,
}

/// Verify a `Stripe-Signature` header over the raw payload.
///
/// The header carries a timestamp and one or more `v1` HMAC-SHA256
/// signatures of `"{timestamp}.{payload}"`. Any matching `v1` within the
/// timestamp tolerance passes; comparison is constant-time via
/// [`Mac::verify_slice`].
fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
) -> Result<(), GatewayError> {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<&str> = Vec::new();

    for part in header.split(',') {
        let part = part.trim();
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = t.parse().ok();
        } else if let Some(v) = part.strip_prefix("v1=") {
            candidates.push(v);
        }
    }

    let timestamp = timestamp.ok_or(GatewayError::InvalidSignature)?;
    if candidates.is_empty() {
        return Err(GatewayError::InvalidSignature);
    }
    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(GatewayError::InvalidSignature);
    }

    for candidate in candidates {
        let Ok(expected) = hex::decode(candidate) else {
            continue;
        };
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| GatewayError::InvalidSignature)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        if mac.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }

    Err(GatewayError::InvalidSignature)
}

/// Normalize a verified Stripe event.
fn parse_event(payload: &[u8]) -> Result<CallbackEvent, GatewayError> {
    let event: Event =
        serde_json::from_slice(payload).map_err(|e| GatewayError::MalformedPayload(e.to_string()))?;
    let object = &event.data.object;

    let order_id = object
        .get("metadata")
        .and_then(|m| m.get("order_id"))
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<OrderId>().ok());

    match event.kind.as_str() {
        "checkout.session.completed" => {
            let order_id = order_id.ok_or_else(|| {
                GatewayError::MalformedPayload("missing metadata.order_id".to_owned())
            })?;
            let transaction_id = object
                .get("payment_intent")
                .and_then(|v| v.as_str())
                .or_else(|| object.get("id").and_then(|v| v.as_str()))
                .ok_or_else(|| {
                    GatewayError::MalformedPayload("missing payment_intent".to_owned())
                })?;
            Ok(CallbackEvent::PaymentSucceeded {
                order_id,
                transaction_id: transaction_id.to_owned(),
            })
        }
        "checkout.session.expired" | "payment_intent.payment_failed" => order_id.map_or(
            // Failure events without our correlation id are not ours to act on.
            Ok(CallbackEvent::Ignored {
                event_type: event.kind.clone(),
            }),
            |order_id| {
                Ok(CallbackEvent::PaymentFailed {
                    order_id,
                    reason: event.kind.clone(),
                })
            },
        ),
        _ => Ok(CallbackEvent::Ignored {
            event_type: event.kind,
        }),
    }
}

#[derive(Debug, Deserialize)]
struct Event {
    #[serde(rename = "type")]
    kind: String,
    data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    object: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test123secret456";

    fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac key");
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    fn header_for(payload: &[u8], secret: &str, timestamp: i64) -> String {
        format!("t={timestamp},v1={}", sign(payload, secret, timestamp))
    }

    #[test]
    fn test_valid_signature() {
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let now = 1_700_000_000;
        let header = header_for(payload, SECRET, now);
        assert!(verify_signature(payload, &header, SECRET, now).is_ok());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let now = 1_700_000_000;
        let header = header_for(payload, "wrong_secret", now);
        assert!(matches!(
            verify_signature(payload, &header, SECRET, now),
            Err(GatewayError::InvalidSignature)
        ));
    }

    #[test]
    fn test_modified_payload_rejected() {
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let tampered = br#"{"type":"checkout.session.completed","hacked":true}"#;
        let now = 1_700_000_000;
        let header = header_for(payload, SECRET, now);
        assert!(verify_signature(tampered, &header, SECRET, now).is_err());
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let payload = br#"{}"#;
        let now = 1_700_000_000;
        // Signed 10 minutes ago, beyond the 5-minute tolerance.
        let header = header_for(payload, SECRET, now - 600);
        assert!(verify_signature(payload, &header, SECRET, now).is_err());
    }

    #[test]
    fn test_missing_timestamp_rejected() {
        let payload = br#"{}"#;
        let sig = sign(payload, SECRET, 1_700_000_000);
        let header = format!("v1={sig}");
        assert!(verify_signature(payload, &header, SECRET, 1_700_000_000).is_err());
    }

    #[test]
    fn test_garbage_header_rejected() {
        assert!(verify_signature(b"{}", "not-a-signature", SECRET, 0).is_err());
    }

    #[test]
    fn test_parse_completed_event() {
        let payload = br#"{
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_test_123",
                "payment_intent": "pi_456",
                "metadata": { "order_id": "7" }
            }}
        }"#;
        let event = parse_event(payload).expect("parse");
        assert_eq!(
            event,
            CallbackEvent::PaymentSucceeded {
                order_id: OrderId::new(7),
                transaction_id: "pi_456".to_owned(),
            }
        );
    }

    #[test]
    fn test_parse_completed_without_order_id_is_malformed() {
        let payload = br#"{
            "type": "checkout.session.completed",
            "data": { "object": { "id": "cs_test_123", "payment_intent": "pi_456" } }
        }"#;
        assert!(matches!(
            parse_event(payload),
            Err(GatewayError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_parse_expired_event() {
        let payload = br#"{
            "type": "checkout.session.expired",
            "data": { "object": { "metadata": { "order_id": "7" } } }
        }"#;
        let event = parse_event(payload).expect("parse");
        assert_eq!(
            event,
            CallbackEvent::PaymentFailed {
                order_id: OrderId::new(7),
                reason: "checkout.session.expired".to_owned(),
            }
        );
    }

    #[test]
    fn test_parse_unrelated_event_ignored() {
        let payload = br#"{
            "type": "invoice.paid",
            "data": { "object": {} }
        }"#;
        let event = parse_event(payload).expect("parse");
        assert_eq!(
            event,
            CallbackEvent::Ignored {
                event_type: "invoice.paid".to_owned(),
            }
        );
    }

    #[test]
    fn test_parse_failure_without_order_id_ignored() {
        let payload = br#"{
            "type": "payment_intent.payment_failed",
            "data": { "object": { "id": "pi_789" } }
        }"#;
        let event = parse_event(payload).expect("parse");
        assert!(matches!(event, CallbackEvent::Ignored { .. }));
    }
}
