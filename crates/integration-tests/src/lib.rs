//! Shared fixtures for the integration suites.
//!
//! Tests run hermetically: the in-memory store stands in for `PostgreSQL`
//! (same conditional-update semantics), the fake gateway stands in for a
//! provider API, and bearer tokens are minted with the test secret. The
//! Stripe webhook tests use the real `StripeGateway`, whose signature
//! verification needs no network.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;

use certdeck_core::{PaymentProvider, Price, UserId};
use certdeck_storefront::config::{PaypalConfig, ShopConfig, StripeConfig};
use certdeck_storefront::content::PdfStubGenerator;
use certdeck_storefront::db::memory::MemoryStore;
use certdeck_storefront::middleware::auth::sign_token;
use certdeck_storefront::models::{NewProduct, Product};
use certdeck_storefront::providers::{
    CallbackEvent, CheckoutSession, GatewayError, PaymentGateway, PaymentGateways, StripeGateway,
};
use certdeck_storefront::state::AppState;

/// Webhook signing secret the Stripe gateway under test is configured with.
pub const STRIPE_WEBHOOK_SECRET: &str = "whsec_fixture_k3y_8fJ2mQ9xL4";

/// JWT secret the state under test is configured with.
pub const JWT_SECRET: &str = "kkQ2mPz8vN4xR7wT1bY6uJ3eH9sL5aD0";

/// Configuration pointing at nothing: gateways built from it must not be
/// used for network calls.
#[must_use]
pub fn test_config() -> ShopConfig {
    ShopConfig {
        database_url: None,
        host: "127.0.0.1".parse().expect("host"),
        port: 0,
        base_url: "http://shop.test".to_owned(),
        jwt_secret: SecretString::from(JWT_SECRET),
        stripe: StripeConfig {
            secret_key: SecretString::from("sk_test_fixture"),
            webhook_secret: SecretString::from(STRIPE_WEBHOOK_SECRET),
            api_base: "http://stripe.invalid".to_owned(),
        },
        paypal: PaypalConfig {
            client_id: "client-fixture".to_owned(),
            client_secret: SecretString::from("paypal-fixture-s3cret"),
            api_base: "http://paypal.invalid".to_owned(),
        },
        sentry_dsn: None,
        sentry_environment: None,
    }
}

/// A PayPal stand-in that answers capture payloads without a network.
///
/// Provider references starting with `fail-` simulate a declined capture;
/// everything else captures successfully.
pub struct FakeGateway {
    provider: PaymentProvider,
}

impl FakeGateway {
    #[must_use]
    pub const fn new(provider: PaymentProvider) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn provider(&self) -> PaymentProvider {
        self.provider
    }

    async fn initiate(
        &self,
        order: &certdeck_storefront::models::Order,
    ) -> Result<CheckoutSession, GatewayError> {
        Ok(CheckoutSession {
            provider: self.provider,
            session_id: format!("fake-session-{}", order.id),
            redirect_url: Some(format!("http://provider.test/approve/{}", order.id)),
        })
    }

    async fn verify_and_parse_callback(
        &self,
        payload: &[u8],
        _signature: Option<&str>,
    ) -> Result<CallbackEvent, GatewayError> {
        let value: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| GatewayError::MalformedPayload(e.to_string()))?;
        let order_id = value
            .get("order_id")
            .and_then(serde_json::Value::as_i64)
            .and_then(|id| i32::try_from(id).ok())
            .map(certdeck_core::OrderId::new)
            .ok_or_else(|| GatewayError::MalformedPayload("missing order_id".to_owned()))?;
        let reference = value
            .get("paypal_order_id")
            .and_then(serde_json::Value::as_str)
            .ok_or(GatewayError::InvalidSignature)?;

        if reference.starts_with("fail-") {
            Ok(CallbackEvent::PaymentFailed {
                order_id,
                reason: "capture declined".to_owned(),
            })
        } else {
            Ok(CallbackEvent::PaymentSucceeded {
                order_id,
                transaction_id: format!("capture-{reference}"),
            })
        }
    }
}

/// Everything a test needs: shared state, direct store access, config.
pub struct TestContext {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub config: ShopConfig,
}

/// Assemble a test context: in-memory store, real Stripe gateway (for
/// webhook verification), fake PayPal gateway.
#[must_use]
pub fn test_context() -> TestContext {
    let config = test_config();
    let store = Arc::new(MemoryStore::new());
    let stripe =
        StripeGateway::new(&config.stripe, &config.base_url).expect("stripe gateway");
    let gateways = PaymentGateways::new(
        Arc::new(stripe),
        Arc::new(FakeGateway::new(PaymentProvider::Paypal)),
    );
    let state = AppState::new(
        config.clone(),
        store.clone(),
        gateways,
        Arc::new(PdfStubGenerator),
    );
    TestContext {
        state,
        store,
        config,
    }
}

/// Mint a bearer token for a test user.
#[must_use]
pub fn bearer(user_id: UserId) -> String {
    let token = sign_token(
        user_id,
        "buyer@example.com",
        &SecretString::from(JWT_SECRET),
        chrono::Duration::hours(1),
    )
    .expect("token");
    format!("Bearer {token}")
}

/// Seed one product and return it.
pub async fn seed_product(
    store: &MemoryStore,
    name: &str,
    price_cents: i64,
) -> Product {
    use certdeck_storefront::db::ShopStore;

    store
        .insert_product(NewProduct {
            exam_name: name.to_owned(),
            exam_code: Some(format!("{}-000", name.len())),
            description: format!("{name} practice bundle"),
            difficulty_level: "Intermediate".to_owned(),
            price: Price::from_cents(price_cents),
            is_active: true,
        })
        .await
        .expect("seed product")
}

/// Sign a payload the way Stripe does, for webhook tests.
#[must_use]
pub fn stripe_signature_header(payload: &[u8], timestamp: i64) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let mut mac = Hmac::<Sha256>::new_from_slice(STRIPE_WEBHOOK_SECRET.as_bytes())
        .expect("hmac key");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}
