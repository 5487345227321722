//! Order factory: snapshots a cart into an immutable pending order.

use certdeck_core::{OrderId, PaymentProvider, Price, UserId};

use crate::db::ShopStore;
use crate::error::{AppError, Result};
use crate::models::{NewOrder, NewOrderLine, Order};

/// Order creation and listing for one request.
pub struct OrderFactory<'a> {
    store: &'a dyn ShopStore,
}

impl<'a> OrderFactory<'a> {
    #[must_use]
    pub const fn new(store: &'a dyn ShopStore) -> Self {
        Self { store }
    }

    /// Snapshot the user's cart into a `Pending` order.
    ///
    /// Unit prices are captured from the catalog at this moment and frozen
    /// onto the lines; the total is computed once here and never
    /// recomputed. The order and its lines are persisted as one atomic
    /// write. The cart itself is left untouched - it is cleared by the
    /// completion transaction, so a failed payment leaves the buyer able to
    /// retry.
    ///
    /// # Errors
    ///
    /// `AppError::EmptyCart` if the cart has no lines.
    pub async fn create_from_cart(
        &self,
        user_id: UserId,
        provider: PaymentProvider,
    ) -> Result<Order> {
        let cart = self.store.cart_lines(user_id).await?;
        if cart.is_empty() {
            return Err(AppError::EmptyCart);
        }

        let lines: Vec<NewOrderLine> = cart
            .iter()
            .map(|line| NewOrderLine {
                product_id: line.product.id,
                exam_name: line.product.exam_name.clone(),
                quantity: line.quantity,
                unit_price: line.product.price,
            })
            .collect();

        let total_amount: Price = lines
            .iter()
            .map(|line| line.unit_price.times(line.quantity))
            .sum();

        let order = self
            .store
            .insert_order(NewOrder {
                user_id,
                payment_provider: provider,
                total_amount,
                lines,
            })
            .await?;

        tracing::info!(
            order_id = %order.id,
            user_id = %user_id,
            total = %order.total_amount,
            line_count = order.lines.len(),
            "order created"
        );
        Ok(order)
    }

    /// All orders for a user, newest first.
    pub async fn list(&self, user_id: UserId) -> Result<Vec<Order>> {
        Ok(self.store.list_orders(user_id).await?)
    }

    /// Fetch an order the user owns.
    ///
    /// An order belonging to someone else answers exactly like a missing
    /// one.
    pub async fn get_owned(&self, user_id: UserId, order_id: OrderId) -> Result<Order> {
        self.store
            .get_order(order_id)
            .await?
            .filter(|order| order.user_id == user_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id}")))
    }
}
