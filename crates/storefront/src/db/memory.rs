//! In-memory store implementation.
//!
//! Mutex-guarded maps with the same conditional-update semantics as the
//! `PostgreSQL` store: every transition checks its precondition while
//! holding the lock, so the compare-and-swap guarantees of
//! [`ShopStore::complete_order`] and [`ShopStore::redeem_download`] hold
//! under concurrency here too. Used by the test suites and as the dev-mode
//! fallback when no database is configured (state is lost on restart).

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use certdeck_core::{
    DownloadId, DownloadToken, OrderId, OrderLineId, OrderStatus, PaymentId, PaymentProvider,
    PaymentStatus, Price, ProductId, UserId,
};

use super::{OrderTransition, RedeemOutcome, RepositoryError, ShopStore};
use crate::models::{
    CartLine, Download, NewDownload, NewOrder, NewProduct, Order, OrderLine, Payment, Product,
    ProductSummary,
};

#[derive(Default)]
struct Inner {
    next_product_id: i32,
    next_order_id: i32,
    next_order_line_id: i32,
    next_payment_id: i32,
    next_download_id: i32,
    products: BTreeMap<ProductId, Product>,
    cart: BTreeMap<(UserId, ProductId), CartRow>,
    orders: BTreeMap<OrderId, Order>,
    payments: Vec<Payment>,
    downloads: BTreeMap<DownloadId, Download>,
    token_index: HashMap<String, DownloadId>,
}

#[derive(Clone, Copy)]
struct CartRow {
    quantity: u32,
    created_at: DateTime<Utc>,
}

impl Inner {
    fn next_product(&mut self) -> ProductId {
        self.next_product_id += 1;
        ProductId::new(self.next_product_id)
    }

    fn next_order(&mut self) -> OrderId {
        self.next_order_id += 1;
        OrderId::new(self.next_order_id)
    }

    fn next_order_line(&mut self) -> OrderLineId {
        self.next_order_line_id += 1;
        OrderLineId::new(self.next_order_line_id)
    }

    fn next_payment(&mut self) -> PaymentId {
        self.next_payment_id += 1;
        PaymentId::new(self.next_payment_id)
    }

    fn next_download(&mut self) -> DownloadId {
        self.next_download_id += 1;
        DownloadId::new(self.next_download_id)
    }

    fn summary(&self, product_id: ProductId) -> Result<ProductSummary, RepositoryError> {
        self.products
            .get(&product_id)
            .map(ProductSummary::from)
            .ok_or(RepositoryError::NotFound)
    }

    fn cart_line(
        &self,
        user_id: UserId,
        product_id: ProductId,
        row: CartRow,
    ) -> Result<CartLine, RepositoryError> {
        Ok(CartLine {
            user_id,
            product: self.summary(product_id)?,
            quantity: row.quantity,
            created_at: row.created_at,
        })
    }

    fn insert_download_row(&mut self, new: NewDownload) -> Result<Download, RepositoryError> {
        if self.token_index.contains_key(new.token.as_str()) {
            return Err(RepositoryError::Conflict(
                "download token already exists".to_owned(),
            ));
        }
        let id = self.next_download();
        let download = Download {
            id,
            user_id: new.user_id,
            product_id: new.product_id,
            token: new.token,
            expires_at: new.expires_at,
            download_count: 0,
            max_downloads: new.max_downloads,
            is_active: true,
            created_at: Utc::now(),
        };
        self.token_index
            .insert(download.token.as_str().to_owned(), id);
        self.downloads.insert(id, download.clone());
        Ok(download)
    }
}

/// Ephemeral store for tests and local development.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a handful of demo products so the dev-mode shop has a catalog.
    pub async fn seed_demo_catalog(&self) -> Result<(), RepositoryError> {
        let demo = [
            (
                "Platform Administrator",
                Some("ADM-201"),
                "Core platform administration: users, security, automation.",
                "Beginner",
                Price::from_cents(2500),
            ),
            (
                "Platform App Builder",
                Some("APB-301"),
                "Declarative application building on the core platform.",
                "Intermediate",
                Price::from_cents(1000),
            ),
            (
                "Integration Architect",
                Some("INT-501"),
                "API-led integration patterns and platform limits.",
                "Advanced",
                Price::from_cents(4500),
            ),
        ];

        for (name, code, description, level, price) in demo {
            self.insert_product(NewProduct {
                exam_name: name.to_owned(),
                exam_code: code.map(str::to_owned),
                description: description.to_owned(),
                difficulty_level: level.to_owned(),
                price,
                is_active: true,
            })
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ShopStore for MemoryStore {
    async fn ping(&self) -> Result<(), RepositoryError> {
        Ok(())
    }

    async fn insert_product(&self, new: NewProduct) -> Result<Product, RepositoryError> {
        let mut inner = self.inner.lock().await;
        let id = inner.next_product();
        let product = Product {
            id,
            exam_name: new.exam_name,
            exam_code: new.exam_code,
            description: new.description,
            difficulty_level: new.difficulty_level,
            price: new.price,
            is_active: new.is_active,
            created_at: Utc::now(),
        };
        inner.products.insert(id, product.clone());
        Ok(product)
    }

    async fn list_products(&self) -> Result<Vec<Product>, RepositoryError> {
        let inner = self.inner.lock().await;
        let mut products: Vec<Product> = inner
            .products
            .values()
            .filter(|p| p.is_active)
            .cloned()
            .collect();
        products.sort_by(|a, b| a.exam_name.cmp(&b.exam_name));
        Ok(products)
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        let inner = self.inner.lock().await;
        Ok(inner.products.get(&id).cloned())
    }

    async fn cart_lines(&self, user_id: UserId) -> Result<Vec<CartLine>, RepositoryError> {
        let inner = self.inner.lock().await;
        let mut lines = Vec::new();
        for (&(owner, product_id), &row) in &inner.cart {
            if owner == user_id {
                lines.push(inner.cart_line(user_id, product_id, row)?);
            }
        }
        lines.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(lines)
    }

    async fn add_to_cart(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartLine, RepositoryError> {
        let mut inner = self.inner.lock().await;
        if !inner.products.contains_key(&product_id) {
            return Err(RepositoryError::NotFound);
        }
        let row = inner
            .cart
            .entry((user_id, product_id))
            .and_modify(|row| row.quantity += quantity)
            .or_insert(CartRow {
                quantity,
                created_at: Utc::now(),
            });
        let row = *row;
        inner.cart_line(user_id, product_id, row)
    }

    async fn set_cart_quantity(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Option<CartLine>, RepositoryError> {
        let mut inner = self.inner.lock().await;
        let key = (user_id, product_id);
        if !inner.cart.contains_key(&key) {
            return Err(RepositoryError::NotFound);
        }
        if quantity == 0 {
            inner.cart.remove(&key);
            return Ok(None);
        }
        let row = inner
            .cart
            .get_mut(&key)
            .map(|row| {
                row.quantity = quantity;
                *row
            })
            .ok_or(RepositoryError::NotFound)?;
        inner.cart_line(user_id, product_id, row).map(Some)
    }

    async fn remove_cart_line(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<bool, RepositoryError> {
        let mut inner = self.inner.lock().await;
        Ok(inner.cart.remove(&(user_id, product_id)).is_some())
    }

    async fn clear_cart(&self, user_id: UserId) -> Result<u64, RepositoryError> {
        let mut inner = self.inner.lock().await;
        let before = inner.cart.len();
        inner.cart.retain(|&(owner, _), _| owner != user_id);
        Ok((before - inner.cart.len()) as u64)
    }

    async fn insert_order(&self, new: NewOrder) -> Result<Order, RepositoryError> {
        let mut inner = self.inner.lock().await;
        let id = inner.next_order();
        let lines = new
            .lines
            .into_iter()
            .map(|line| OrderLine {
                id: inner.next_order_line(),
                product_id: line.product_id,
                exam_name: line.exam_name,
                quantity: line.quantity,
                unit_price: line.unit_price,
            })
            .collect();
        let order = Order {
            id,
            user_id: new.user_id,
            status: OrderStatus::Pending,
            payment_provider: new.payment_provider,
            provider_reference: None,
            total_amount: new.total_amount,
            lines,
            created_at: Utc::now(),
        };
        inner.orders.insert(id, order.clone());
        Ok(order)
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let inner = self.inner.lock().await;
        Ok(inner.orders.get(&id).cloned())
    }

    async fn list_orders(&self, user_id: UserId) -> Result<Vec<Order>, RepositoryError> {
        let inner = self.inner.lock().await;
        let mut orders: Vec<Order> = inner
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(orders)
    }

    async fn complete_order(
        &self,
        id: OrderId,
        provider: PaymentProvider,
        transaction_id: &str,
        downloads: Vec<NewDownload>,
    ) -> Result<OrderTransition, RepositoryError> {
        let mut inner = self.inner.lock().await;

        // Everything below happens under the lock, mirroring the SQL
        // transaction: either all effects land or none do.
        let current = inner.orders.get(&id).ok_or(RepositoryError::NotFound)?;
        match current.status {
            OrderStatus::Completed => {
                return Ok(OrderTransition::AlreadyCompleted(current.clone()));
            }
            OrderStatus::Cancelled => {
                return Ok(OrderTransition::AlreadyCancelled(current.clone()));
            }
            OrderStatus::Pending => {}
        }

        // Validate the whole batch before mutating anything.
        for download in &downloads {
            if inner.token_index.contains_key(download.token.as_str()) {
                return Err(RepositoryError::Conflict(
                    "download token already exists".to_owned(),
                ));
            }
        }

        let (user_id, amount) = {
            let order = inner
                .orders
                .get_mut(&id)
                .ok_or(RepositoryError::NotFound)?;
            order.status = OrderStatus::Completed;
            order.provider_reference = Some(transaction_id.to_owned());
            (order.user_id, order.total_amount)
        };

        let payment_id = inner.next_payment();
        let (stripe_id, paypal_id) = match provider {
            PaymentProvider::Stripe => (Some(transaction_id.to_owned()), None),
            PaymentProvider::Paypal => (None, Some(transaction_id.to_owned())),
        };
        inner.payments.push(Payment {
            id: payment_id,
            order_id: id,
            amount,
            status: PaymentStatus::Completed,
            provider,
            stripe_id,
            paypal_id,
            created_at: Utc::now(),
        });

        for download in downloads {
            inner.insert_download_row(download)?;
        }

        inner.cart.retain(|&(owner, _), _| owner != user_id);

        let order = inner
            .orders
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::NotFound)?;
        Ok(OrderTransition::Applied(order))
    }

    async fn cancel_order(&self, id: OrderId) -> Result<OrderTransition, RepositoryError> {
        let mut inner = self.inner.lock().await;

        let current = inner.orders.get(&id).ok_or(RepositoryError::NotFound)?;
        match current.status {
            OrderStatus::Completed => {
                return Ok(OrderTransition::AlreadyCompleted(current.clone()));
            }
            OrderStatus::Cancelled => {
                return Ok(OrderTransition::AlreadyCancelled(current.clone()));
            }
            OrderStatus::Pending => {}
        }

        let provider = {
            let order = inner
                .orders
                .get_mut(&id)
                .ok_or(RepositoryError::NotFound)?;
            order.status = OrderStatus::Cancelled;
            order.payment_provider
        };

        let payment_id = inner.next_payment();
        inner.payments.push(Payment {
            id: payment_id,
            order_id: id,
            amount: Price::ZERO,
            status: PaymentStatus::Failed,
            provider,
            stripe_id: None,
            paypal_id: None,
            created_at: Utc::now(),
        });

        let order = inner
            .orders
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::NotFound)?;
        Ok(OrderTransition::Applied(order))
    }

    async fn payments_for_order(&self, id: OrderId) -> Result<Vec<Payment>, RepositoryError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .payments
            .iter()
            .filter(|p| p.order_id == id)
            .cloned()
            .collect())
    }

    async fn insert_download(&self, new: NewDownload) -> Result<Download, RepositoryError> {
        let mut inner = self.inner.lock().await;
        inner.insert_download_row(new)
    }

    async fn list_downloads(&self, user_id: UserId) -> Result<Vec<Download>, RepositoryError> {
        let inner = self.inner.lock().await;
        let mut downloads: Vec<Download> = inner
            .downloads
            .values()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect();
        downloads.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(downloads)
    }

    async fn redeem_download(
        &self,
        token: &DownloadToken,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome, RepositoryError> {
        let mut inner = self.inner.lock().await;

        let Some(&id) = inner.token_index.get(token.as_str()) else {
            return Ok(RedeemOutcome::NotFound);
        };
        let Some(download) = inner.downloads.get_mut(&id) else {
            return Ok(RedeemOutcome::NotFound);
        };

        if download.expires_at <= now {
            return Ok(RedeemOutcome::NotFound);
        }
        if download.download_count >= download.max_downloads {
            return Ok(RedeemOutcome::LimitExceeded {
                count: download.download_count,
                limit: download.max_downloads,
            });
        }
        if !download.is_active {
            return Ok(RedeemOutcome::NotFound);
        }

        // The check and the increment share the lock: this is the same
        // atomicity the SQL conditional update provides.
        download.download_count += 1;
        if download.download_count >= download.max_downloads {
            download.is_active = false;
        }
        Ok(RedeemOutcome::Redeemed(download.clone()))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn demo_product() -> NewProduct {
        NewProduct {
            exam_name: "Platform Administrator".to_owned(),
            exam_code: Some("ADM-201".to_owned()),
            description: "Core administration".to_owned(),
            difficulty_level: "Beginner".to_owned(),
            price: Price::from_cents(2500),
            is_active: true,
        }
    }

    #[tokio::test]
    async fn test_cart_upsert_increments() {
        let store = MemoryStore::new();
        let user = UserId::new(1);
        let product = store.insert_product(demo_product()).await.expect("product");

        let line = store.add_to_cart(user, product.id, 1).await.expect("add");
        assert_eq!(line.quantity, 1);
        let line = store.add_to_cart(user, product.id, 2).await.expect("add");
        assert_eq!(line.quantity, 3);

        let lines = store.cart_lines(user).await.expect("list");
        assert_eq!(lines.len(), 1);
    }

    #[tokio::test]
    async fn test_set_quantity_zero_deletes() {
        let store = MemoryStore::new();
        let user = UserId::new(1);
        let product = store.insert_product(demo_product()).await.expect("product");
        store.add_to_cart(user, product.id, 2).await.expect("add");

        let line = store
            .set_cart_quantity(user, product.id, 0)
            .await
            .expect("set");
        assert!(line.is_none());
        assert!(store.cart_lines(user).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn test_set_quantity_missing_line() {
        let store = MemoryStore::new();
        let user = UserId::new(1);
        let product = store.insert_product(demo_product()).await.expect("product");

        let result = store.set_cart_quantity(user, product.id, 3).await;
        assert!(matches!(result, Err(RepositoryError::NotFound)));
    }

    #[tokio::test]
    async fn test_redeem_expired_is_not_found() {
        let store = MemoryStore::new();
        let product = store.insert_product(demo_product()).await.expect("product");
        let token = DownloadToken::generate();
        store
            .insert_download(NewDownload {
                user_id: UserId::new(1),
                product_id: product.id,
                token: token.clone(),
                expires_at: Utc::now() - Duration::days(1),
                max_downloads: 10,
            })
            .await
            .expect("insert");

        let outcome = store
            .redeem_download(&token, Utc::now())
            .await
            .expect("redeem");
        assert!(matches!(outcome, RedeemOutcome::NotFound));
    }

    #[tokio::test]
    async fn test_redeem_deactivates_at_limit() {
        let store = MemoryStore::new();
        let product = store.insert_product(demo_product()).await.expect("product");
        let token = DownloadToken::generate();
        store
            .insert_download(NewDownload {
                user_id: UserId::new(1),
                product_id: product.id,
                token: token.clone(),
                expires_at: Utc::now() + Duration::days(15),
                max_downloads: 2,
            })
            .await
            .expect("insert");

        let first = store
            .redeem_download(&token, Utc::now())
            .await
            .expect("redeem");
        let RedeemOutcome::Redeemed(d) = first else {
            panic!("expected redemption");
        };
        assert_eq!(d.download_count, 1);
        assert!(d.is_active);

        let second = store
            .redeem_download(&token, Utc::now())
            .await
            .expect("redeem");
        let RedeemOutcome::Redeemed(d) = second else {
            panic!("expected redemption");
        };
        assert_eq!(d.download_count, 2);
        assert!(!d.is_active);

        let third = store
            .redeem_download(&token, Utc::now())
            .await
            .expect("redeem");
        assert!(matches!(
            third,
            RedeemOutcome::LimitExceeded { count: 2, limit: 2 }
        ));
    }
}
