//! Business logic services for the shop.
//!
//! # Services
//!
//! - `cart` - Cart ledger operations (per-user product/quantity rows)
//! - `orders` - Order factory (cart snapshot -> immutable pending order)
//! - `payments` - Payment reconciler (idempotent confirmation state machine)
//! - `downloads` - Entitlement issuance and redemption
//!
//! Services borrow the store for the duration of a request, the way
//! repositories do, and return `AppError` so handlers can pass results
//! straight through.

pub mod cart;
pub mod downloads;
pub mod orders;
pub mod payments;

pub use cart::CartService;
pub use downloads::DownloadService;
pub use orders::OrderFactory;
pub use payments::PaymentReconciler;
