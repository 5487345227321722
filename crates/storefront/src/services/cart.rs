//! Cart ledger operations.
//!
//! One row per (user, product), quantity at least 1. Operations are scoped
//! to a single authenticated user and rely only on per-row atomicity - no
//! cross-row invariants. The ledger is emptied wholesale by the completion
//! transaction in `services::payments`, not here.

use certdeck_core::{ProductId, UserId};

use crate::db::ShopStore;
use crate::error::{AppError, Result};
use crate::models::CartLine;

/// Cart operations for one request.
pub struct CartService<'a> {
    store: &'a dyn ShopStore,
}

impl<'a> CartService<'a> {
    #[must_use]
    pub const fn new(store: &'a dyn ShopStore) -> Self {
        Self { store }
    }

    /// All lines in the user's cart, product summaries resolved.
    pub async fn list(&self, user_id: UserId) -> Result<Vec<CartLine>> {
        Ok(self.store.cart_lines(user_id).await?)
    }

    /// Add `quantity` of a product: creates the line or increments an
    /// existing one. Rejects unknown or inactive products.
    pub async fn add(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartLine> {
        if quantity == 0 {
            return Err(AppError::BadRequest("quantity must be at least 1".into()));
        }

        let product = self
            .store
            .get_product(product_id)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| AppError::NotFound(format!("product {product_id}")))?;

        Ok(self.store.add_to_cart(user_id, product.id, quantity).await?)
    }

    /// Overwrite a line's quantity; zero or less deletes the line.
    pub async fn set_quantity(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<Option<CartLine>> {
        let quantity = u32::try_from(quantity.max(0))
            .map_err(|_| AppError::BadRequest("quantity out of range".into()))?;
        Ok(self
            .store
            .set_cart_quantity(user_id, product_id, quantity)
            .await?)
    }

    /// Remove one line.
    pub async fn remove(&self, user_id: UserId, product_id: ProductId) -> Result<()> {
        if self.store.remove_cart_line(user_id, product_id).await? {
            Ok(())
        } else {
            Err(AppError::NotFound(format!("cart line for product {product_id}")))
        }
    }

    /// Empty the user's cart.
    pub async fn clear(&self, user_id: UserId) -> Result<()> {
        self.store.clear_cart(user_id).await?;
        Ok(())
    }
}
