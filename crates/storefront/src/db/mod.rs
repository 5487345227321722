//! Store abstraction and implementations.
//!
//! The checkout core consumes the persistence engine as a capability: a
//! transactional store supporting atomic single-row conditional updates
//! (the order-status and download-counter transitions) and multi-row atomic
//! writes (order creation, order completion). Two implementations:
//!
//! - [`postgres::PgStore`] - sqlx/`PostgreSQL`, the production store
//! - [`memory::MemoryStore`] - mutex-guarded maps with identical
//!   conditional-update semantics, used by tests and as the dev-mode
//!   fallback when no database is configured
//!
//! # Migrations
//!
//! Postgres migrations live in `crates/storefront/migrations/` and run at
//! startup.

pub mod memory;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use certdeck_core::{DownloadToken, OrderId, PaymentProvider, ProductId, UserId};

use crate::models::{
    CartLine, Download, NewDownload, NewOrder, NewProduct, Order, Payment, Product,
};

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the store is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., duplicate token).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

/// Outcome of a conditional order transition.
///
/// The store applies `Pending -> terminal` transitions as compare-and-swap
/// updates; callers learn from the outcome whether they won the race, and
/// always get the current row back.
#[derive(Debug)]
pub enum OrderTransition {
    /// This caller performed the transition.
    Applied(Order),
    /// The order was already completed; nothing was written.
    AlreadyCompleted(Order),
    /// The order was already cancelled; nothing was written.
    AlreadyCancelled(Order),
}

impl OrderTransition {
    /// The order in its current state, whoever got it there.
    #[must_use]
    pub fn into_order(self) -> Order {
        match self {
            Self::Applied(order) | Self::AlreadyCompleted(order) | Self::AlreadyCancelled(order) => {
                order
            }
        }
    }
}

/// Outcome of a redemption attempt.
#[derive(Debug)]
pub enum RedeemOutcome {
    /// The counter was incremented; the returned row reflects the new count
    /// (and deactivation, if this redemption was the last).
    Redeemed(Download),
    /// Unknown, inactive, or expired token - indistinguishable on purpose.
    NotFound,
    /// The entitlement exists and is live but its redemptions are used up.
    LimitExceeded { count: u32, limit: u32 },
}

/// The transactional store behind the shop.
///
/// All operations are row-scoped; the only cross-row guarantees are the two
/// multi-row transactions (`insert_order`, `complete_order`) which commit or
/// roll back as a unit.
#[async_trait]
pub trait ShopStore: Send + Sync {
    /// Connectivity probe for the readiness endpoint.
    async fn ping(&self) -> Result<(), RepositoryError>;

    // Catalog ------------------------------------------------------------

    async fn insert_product(&self, new: NewProduct) -> Result<Product, RepositoryError>;

    async fn list_products(&self) -> Result<Vec<Product>, RepositoryError>;

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError>;

    // Cart ledger --------------------------------------------------------

    /// All cart lines for one user, product summaries resolved.
    async fn cart_lines(&self, user_id: UserId) -> Result<Vec<CartLine>, RepositoryError>;

    /// Create the (user, product) line with `quantity`, or increment an
    /// existing line by it.
    async fn add_to_cart(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartLine, RepositoryError>;

    /// Overwrite a line's quantity. `0` deletes the line and returns
    /// `None`. A missing line is `RepositoryError::NotFound`.
    async fn set_cart_quantity(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Option<CartLine>, RepositoryError>;

    /// Delete one line. Returns whether a row existed.
    async fn remove_cart_line(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<bool, RepositoryError>;

    /// Delete every line for the user. Returns the number of rows removed.
    async fn clear_cart(&self, user_id: UserId) -> Result<u64, RepositoryError>;

    // Orders -------------------------------------------------------------

    /// Persist an order and all its lines as one atomic write.
    async fn insert_order(&self, new: NewOrder) -> Result<Order, RepositoryError>;

    /// Fetch an order with its lines.
    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, RepositoryError>;

    /// All orders for a user, newest first.
    async fn list_orders(&self, user_id: UserId) -> Result<Vec<Order>, RepositoryError>;

    /// The completion transaction: compare-and-swap the status from
    /// `Pending` to `Completed`, store the provider reference, write the
    /// `Completed` payment for the order's frozen total, insert every
    /// download entitlement, and clear the buyer's cart - all or nothing.
    ///
    /// Losing the swap writes nothing and reports which terminal state won.
    async fn complete_order(
        &self,
        id: OrderId,
        provider: PaymentProvider,
        transaction_id: &str,
        downloads: Vec<NewDownload>,
    ) -> Result<OrderTransition, RepositoryError>;

    /// Compare-and-swap the status from `Pending` to `Cancelled` and write
    /// a zero-amount `Failed` payment. Losing the swap writes nothing.
    async fn cancel_order(&self, id: OrderId) -> Result<OrderTransition, RepositoryError>;

    /// Payment audit trail for an order, oldest first.
    async fn payments_for_order(&self, id: OrderId) -> Result<Vec<Payment>, RepositoryError>;

    // Downloads ----------------------------------------------------------

    /// Insert a single entitlement outside a completion transaction
    /// (seeding and tests; issuance during checkout goes through
    /// `complete_order`).
    async fn insert_download(&self, new: NewDownload) -> Result<Download, RepositoryError>;

    /// All entitlements for a user, newest first.
    async fn list_downloads(&self, user_id: UserId) -> Result<Vec<Download>, RepositoryError>;

    /// Atomically redeem one use of a token: increment the counter by
    /// exactly one and deactivate the row when the new count reaches the
    /// limit, as a single conditional update. Concurrent callers cannot
    /// push the counter past the limit.
    async fn redeem_download(
        &self,
        token: &DownloadToken,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome, RepositoryError>;
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
