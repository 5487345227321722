//! Payment provider gateways.
//!
//! Both providers sit behind one capability, [`PaymentGateway`]:
//! `initiate` starts a checkout for an order and
//! `verify_and_parse_callback` authenticates a confirmation channel and
//! normalizes it into a [`CallbackEvent`]. Only the initiation and
//! verification steps differ per provider; reconciliation is shared and
//! lives in `services::payments`.
//!
//! Gateways are injected through [`crate::state::AppState`], so tests swap
//! in fakes without touching the reconciler.

pub mod paypal;
pub mod stripe;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use certdeck_core::{OrderId, PaymentProvider};

use crate::models::Order;

pub use paypal::PaypalGateway;
pub use stripe::StripeGateway;

/// Bounded timeout for provider API calls. No automatic retry: the
/// reconciler is idempotent, so the provider's own retry policy is safe.
pub(crate) const PROVIDER_TIMEOUT: Duration = Duration::from_secs(15);

/// Errors from a payment gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Transport-level failure talking to the provider.
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Callback failed authenticity verification.
    #[error("invalid callback signature")]
    InvalidSignature,

    /// Callback was authentic but its payload could not be interpreted.
    #[error("malformed callback payload: {0}")]
    MalformedPayload(String),

    /// The provider rejected the request.
    #[error("provider rejected the request: {0}")]
    Rejected(String),
}

/// A checkout session opened with a provider.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutSession {
    pub provider: PaymentProvider,
    /// Provider-side session / order reference.
    pub session_id: String,
    /// Where to send the buyer to approve the payment, when the provider
    /// supplies one.
    pub redirect_url: Option<String>,
}

/// A verified, normalized confirmation event from a provider channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackEvent {
    /// The provider confirmed payment for the order.
    PaymentSucceeded {
        order_id: OrderId,
        /// Provider transaction id (payment intent / capture id).
        transaction_id: String,
    },
    /// The provider reported the payment failed or expired.
    PaymentFailed { order_id: OrderId, reason: String },
    /// Authentic event the shop does not act on. Acknowledged so the
    /// provider stops retrying.
    Ignored { event_type: String },
}

/// A payment provider behind a common shape.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Which provider this gateway fronts.
    fn provider(&self) -> PaymentProvider;

    /// Open a checkout session for a pending order, describing its frozen
    /// lines and total to the provider.
    async fn initiate(&self, order: &Order) -> Result<CheckoutSession, GatewayError>;

    /// Authenticate a confirmation channel and normalize it.
    ///
    /// For Stripe this verifies a webhook signature over the raw payload;
    /// for PayPal it captures the referenced provider order server-side.
    /// Verification failures return [`GatewayError::InvalidSignature`] and
    /// must cause no state mutation upstream.
    async fn verify_and_parse_callback(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<CallbackEvent, GatewayError>;
}

/// The configured gateway per provider tag.
#[derive(Clone)]
pub struct PaymentGateways {
    stripe: Arc<dyn PaymentGateway>,
    paypal: Arc<dyn PaymentGateway>,
}

impl PaymentGateways {
    #[must_use]
    pub fn new(stripe: Arc<dyn PaymentGateway>, paypal: Arc<dyn PaymentGateway>) -> Self {
        Self { stripe, paypal }
    }

    /// Look up the gateway for a provider tag.
    #[must_use]
    pub fn get(&self, provider: PaymentProvider) -> &Arc<dyn PaymentGateway> {
        match provider {
            PaymentProvider::Stripe => &self.stripe,
            PaymentProvider::Paypal => &self.paypal,
        }
    }
}
