//! Application state shared across handlers.

use std::sync::Arc;

use crate::config::ShopConfig;
use crate::content::ContentGenerator;
use crate::db::ShopStore;
use crate::providers::PaymentGateways;

/// Application state shared across all handlers.
///
/// Cheaply cloneable via `Arc`. Every collaborator - store, payment
/// gateways, content generator - is injected at construction, so tests
/// assemble a state with an in-memory store and fake gateways.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: ShopConfig,
    store: Arc<dyn ShopStore>,
    gateways: PaymentGateways,
    content: Arc<dyn ContentGenerator>,
}

impl AppState {
    /// Assemble the application state from its collaborators.
    #[must_use]
    pub fn new(
        config: ShopConfig,
        store: Arc<dyn ShopStore>,
        gateways: PaymentGateways,
        content: Arc<dyn ContentGenerator>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                store,
                gateways,
                content,
            }),
        }
    }

    /// Get a reference to the shop configuration.
    #[must_use]
    pub fn config(&self) -> &ShopConfig {
        &self.inner.config
    }

    /// Get a reference to the store.
    #[must_use]
    pub fn store(&self) -> &dyn ShopStore {
        self.inner.store.as_ref()
    }

    /// Get the configured payment gateways.
    #[must_use]
    pub fn gateways(&self) -> &PaymentGateways {
        &self.inner.gateways
    }

    /// Get a reference to the content generator.
    #[must_use]
    pub fn content(&self) -> &dyn ContentGenerator {
        self.inner.content.as_ref()
    }
}
