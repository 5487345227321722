//! Domain types for the shop.
//!
//! These are validated domain objects, separate from database row types.
//! `New*` structs are write models: everything the store needs to persist a
//! fresh row, minus the generated id and timestamps.

use chrono::{DateTime, Utc};
use serde::Serialize;

use certdeck_core::{
    DownloadId, DownloadToken, OrderId, OrderLineId, OrderStatus, PaymentId, PaymentProvider,
    PaymentStatus, Price, ProductId, UserId,
};

/// A purchasable exam-preparation bundle.
///
/// The catalog is read-only from the checkout core's perspective; rows are
/// seeded out of band.
#[derive(Debug, Clone, Serialize)]
pub struct Product {
    pub id: ProductId,
    pub exam_name: String,
    pub exam_code: Option<String>,
    pub description: String,
    pub difficulty_level: String,
    /// Current list price. Frozen onto order lines at checkout time.
    pub price: Price,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Write model for seeding a product.
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub exam_name: String,
    pub exam_code: Option<String>,
    pub description: String,
    pub difficulty_level: String,
    pub price: Price,
    pub is_active: bool,
}

/// The slice of a product a cart listing resolves.
#[derive(Debug, Clone, Serialize)]
pub struct ProductSummary {
    pub id: ProductId,
    pub exam_name: String,
    pub exam_code: Option<String>,
    pub difficulty_level: String,
    pub price: Price,
}

impl From<&Product> for ProductSummary {
    fn from(product: &Product) -> Self {
        Self {
            id: product.id,
            exam_name: product.exam_name.clone(),
            exam_code: product.exam_code.clone(),
            difficulty_level: product.difficulty_level.clone(),
            price: product.price,
        }
    }
}

/// One (user, product) row of the cart ledger.
#[derive(Debug, Clone, Serialize)]
pub struct CartLine {
    pub user_id: UserId,
    pub product: ProductSummary,
    pub quantity: u32,
    pub created_at: DateTime<Utc>,
}

impl CartLine {
    /// The line total at the product's current price.
    #[must_use]
    pub fn line_total(&self) -> Price {
        self.product.price.times(self.quantity)
    }
}

/// An immutable order snapshot.
///
/// `total_amount` is computed once at creation from the frozen line prices
/// and never recomputed; status transitions are monotone
/// (`Pending -> Completed | Cancelled`).
#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub status: OrderStatus,
    /// The provider the buyer chose at checkout.
    pub payment_provider: PaymentProvider,
    /// Provider transaction reference, set when the order completes.
    pub provider_reference: Option<String>,
    pub total_amount: Price,
    pub lines: Vec<OrderLine>,
    pub created_at: DateTime<Utc>,
}

/// A line of an order, owned by it for its whole lifetime.
#[derive(Debug, Clone, Serialize)]
pub struct OrderLine {
    pub id: OrderLineId,
    pub product_id: ProductId,
    /// Name snapshot taken at checkout, like the price.
    pub exam_name: String,
    pub quantity: u32,
    /// Unit price captured at checkout time; never re-read from the catalog.
    pub unit_price: Price,
}

impl OrderLine {
    /// The frozen line total.
    #[must_use]
    pub fn line_total(&self) -> Price {
        self.unit_price.times(self.quantity)
    }
}

/// Write model for order creation. The order and all its lines are persisted
/// as a single atomic write.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: UserId,
    pub payment_provider: PaymentProvider,
    pub total_amount: Price,
    pub lines: Vec<NewOrderLine>,
}

/// Write model for one order line.
#[derive(Debug, Clone)]
pub struct NewOrderLine {
    pub product_id: ProductId,
    pub exam_name: String,
    pub quantity: u32,
    pub unit_price: Price,
}

/// Append-only payment audit record. Exactly one of `stripe_id` /
/// `paypal_id` is populated, selected by `provider`; never mutated after
/// creation.
#[derive(Debug, Clone, Serialize)]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub amount: Price,
    pub status: PaymentStatus,
    pub provider: PaymentProvider,
    pub stripe_id: Option<String>,
    pub paypal_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A download entitlement: the redeemable right to fetch a purchased
/// artifact, bounded by expiry and redemption count.
#[derive(Debug, Clone, Serialize)]
pub struct Download {
    pub id: DownloadId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub token: DownloadToken,
    pub expires_at: DateTime<Utc>,
    pub download_count: u32,
    pub max_downloads: u32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Download {
    /// Redemptions left before the entitlement deactivates.
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.max_downloads.saturating_sub(self.download_count)
    }
}

/// Write model for a download entitlement. Count starts at 0 and the row is
/// active; both are set by the store.
#[derive(Debug, Clone)]
pub struct NewDownload {
    pub user_id: UserId,
    pub product_id: ProductId,
    pub token: DownloadToken,
    pub expires_at: DateTime<Utc>,
    pub max_downloads: u32,
}
