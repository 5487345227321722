//! Payment reconciler: the order state machine.
//!
//! Two channels can observe the same payment - the buyer's redirect back to
//! the shop and the provider's asynchronous callback - and both may call
//! [`PaymentReconciler::confirm_success`] for one order, concurrently. The
//! transition itself is a conditional update inside the store
//! (`ShopStore::complete_order`), so exactly one caller applies the side
//! effects (payment record, entitlements, cart clear); everyone else
//! observes the already-completed order and returns it unchanged, which is
//! what lets providers retry callbacks safely.

use certdeck_core::{OrderId, OrderStatus, PaymentProvider};

use crate::db::{OrderTransition, ShopStore};
use crate::error::{AppError, Result};
use crate::models::Order;
use crate::services::downloads;

/// Confirmation entry points for one request.
pub struct PaymentReconciler<'a> {
    store: &'a dyn ShopStore,
}

impl<'a> PaymentReconciler<'a> {
    #[must_use]
    pub const fn new(store: &'a dyn ShopStore) -> Self {
        Self { store }
    }

    /// Mark an order paid. Idempotent: confirming an already-completed
    /// order is a no-op that returns the stored order.
    ///
    /// On the winning call, atomically: status `Pending -> Completed`,
    /// provider transaction id recorded, a `Completed` payment written for
    /// the frozen total, one entitlement issued per order line, and the
    /// buyer's cart cleared. A failure partway rolls everything back - the
    /// order is never completed without its entitlements.
    ///
    /// # Errors
    ///
    /// `AppError::NotFound` for an unknown order; `AppError::Conflict` when
    /// the order was cancelled - success for a dead order is a logic bug or
    /// tampering, never silently resurrected.
    pub async fn confirm_success(
        &self,
        order_id: OrderId,
        provider: PaymentProvider,
        transaction_id: &str,
    ) -> Result<Order> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("order {order_id}")))?;

        match order.status {
            OrderStatus::Completed => {
                tracing::debug!(order_id = %order_id, "confirmation repeated; order already completed");
                return Ok(order);
            }
            OrderStatus::Cancelled => {
                return Err(AppError::Conflict(format!(
                    "order {order_id} is cancelled and cannot be completed"
                )));
            }
            OrderStatus::Pending => {}
        }

        // Mint the entitlements up front; the store inserts them inside the
        // completion transaction. If we lose the race below they are simply
        // dropped, unpersisted.
        let entitlements = order
            .lines
            .iter()
            .map(|line| downloads::issue(order.user_id, line.product_id))
            .collect();

        match self
            .store
            .complete_order(order_id, provider, transaction_id, entitlements)
            .await?
        {
            OrderTransition::Applied(order) => {
                tracing::info!(
                    order_id = %order_id,
                    provider = %provider,
                    total = %order.total_amount,
                    entitlements = order.lines.len(),
                    "order completed"
                );
                Ok(order)
            }
            OrderTransition::AlreadyCompleted(order) => {
                tracing::debug!(order_id = %order_id, "lost confirmation race; returning winner's order");
                Ok(order)
            }
            OrderTransition::AlreadyCancelled(_) => Err(AppError::Conflict(format!(
                "order {order_id} is cancelled and cannot be completed"
            ))),
        }
    }

    /// Mark an order's payment failed. A no-op on any terminal order: a
    /// completed order stays completed and keeps its `Completed` payment, a
    /// cancelled one is not cancelled twice.
    ///
    /// On the winning call the order moves to `Cancelled` with a
    /// zero-amount `Failed` payment for the audit trail. No entitlements
    /// are issued and the cart is left untouched so the buyer can retry
    /// checkout.
    pub async fn confirm_failure(&self, order_id: OrderId, reason: &str) -> Result<Order> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("order {order_id}")))?;

        if order.status.is_terminal() {
            tracing::debug!(
                order_id = %order_id,
                status = %order.status,
                "failure reported for terminal order; ignoring"
            );
            return Ok(order);
        }

        let transition = self.store.cancel_order(order_id).await?;
        if let OrderTransition::Applied(ref order) = transition {
            tracing::info!(order_id = %order_id, reason, status = %order.status, "order cancelled");
        }
        Ok(transition.into_order())
    }
}
