//! `PostgreSQL` store implementation.
//!
//! Queries are runtime-checked (`sqlx::query` with binds) against the schema
//! in `migrations/`. The two lifecycle invariants live here as SQL:
//!
//! - order transitions are `UPDATE ... WHERE status = 'PENDING'` statements
//!   whose `rows_affected()` decides who won a concurrent confirmation race;
//! - redemption is a single `UPDATE ... WHERE download_count < max_downloads
//!   RETURNING ...` so two concurrent redemptions can never overshoot the
//!   limit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row as _};

use certdeck_core::{
    DownloadId, DownloadToken, OrderId, OrderLineId, OrderStatus, PaymentId, PaymentProvider,
    PaymentStatus, Price, ProductId, UserId,
};

use super::{OrderTransition, RedeemOutcome, RepositoryError, ShopStore};
use crate::models::{
    CartLine, Download, NewDownload, NewOrder, NewProduct, Order, OrderLine, Payment, Product,
    ProductSummary,
};

/// sqlx-backed store over a `PostgreSQL` pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Access the underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_cart_line(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<Option<CartLine>, RepositoryError> {
        let row = sqlx::query(
            r"
            SELECT c.quantity, c.created_at AS added_at,
                   p.id AS product_id, p.exam_name, p.exam_code,
                   p.difficulty_level, p.price
            FROM shop.cart_lines c
            JOIN shop.products p ON p.id = c.product_id
            WHERE c.user_id = $1 AND c.product_id = $2
            ",
        )
        .bind(user_id)
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| cart_line_from_row(user_id, &r)).transpose()
    }

    async fn order_lines(&self, id: OrderId) -> Result<Vec<OrderLine>, RepositoryError> {
        let rows = sqlx::query(
            r"
            SELECT id, product_id, exam_name, quantity, unit_price
            FROM shop.order_lines
            WHERE order_id = $1
            ORDER BY id ASC
            ",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(order_line_from_row).collect()
    }

    async fn order_with_lines(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query(
            r"
            SELECT id, user_id, status, payment_provider, provider_reference,
                   total_amount, created_at
            FROM shop.orders
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let lines = self.order_lines(id).await?;
        Ok(Some(order_from_row(&row, lines)?))
    }

    /// Classify a lost status swap by re-reading the row.
    async fn lost_transition(&self, id: OrderId) -> Result<OrderTransition, RepositoryError> {
        let order = self
            .order_with_lines(id)
            .await?
            .ok_or(RepositoryError::NotFound)?;
        match order.status {
            OrderStatus::Completed => Ok(OrderTransition::AlreadyCompleted(order)),
            OrderStatus::Cancelled => Ok(OrderTransition::AlreadyCancelled(order)),
            OrderStatus::Pending => Err(RepositoryError::DataCorruption(
                "order still pending after failed conditional update".to_owned(),
            )),
        }
    }
}

#[async_trait]
impl ShopStore for PgStore {
    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    async fn insert_product(&self, new: NewProduct) -> Result<Product, RepositoryError> {
        let row = sqlx::query(
            r"
            INSERT INTO shop.products
                (exam_name, exam_code, description, difficulty_level, price, is_active)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, exam_name, exam_code, description, difficulty_level,
                      price, is_active, created_at
            ",
        )
        .bind(&new.exam_name)
        .bind(&new.exam_code)
        .bind(&new.description)
        .bind(&new.difficulty_level)
        .bind(new.price.amount())
        .bind(new.is_active)
        .fetch_one(&self.pool)
        .await?;

        product_from_row(&row)
    }

    async fn list_products(&self) -> Result<Vec<Product>, RepositoryError> {
        let rows = sqlx::query(
            r"
            SELECT id, exam_name, exam_code, description, difficulty_level,
                   price, is_active, created_at
            FROM shop.products
            WHERE is_active
            ORDER BY exam_name ASC
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(product_from_row).collect()
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query(
            r"
            SELECT id, exam_name, exam_code, description, difficulty_level,
                   price, is_active, created_at
            FROM shop.products
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| product_from_row(&r)).transpose()
    }

    async fn cart_lines(&self, user_id: UserId) -> Result<Vec<CartLine>, RepositoryError> {
        let rows = sqlx::query(
            r"
            SELECT c.quantity, c.created_at AS added_at,
                   p.id AS product_id, p.exam_name, p.exam_code,
                   p.difficulty_level, p.price
            FROM shop.cart_lines c
            JOIN shop.products p ON p.id = c.product_id
            WHERE c.user_id = $1
            ORDER BY c.created_at DESC, p.id DESC
            ",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| cart_line_from_row(user_id, r))
            .collect()
    }

    async fn add_to_cart(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartLine, RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO shop.cart_lines (user_id, product_id, quantity)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, product_id)
            DO UPDATE SET quantity = shop.cart_lines.quantity + EXCLUDED.quantity
            ",
        )
        .bind(user_id)
        .bind(product_id)
        .bind(quantity_to_db(quantity)?)
        .execute(&self.pool)
        .await?;

        self.fetch_cart_line(user_id, product_id)
            .await?
            .ok_or_else(|| RepositoryError::DataCorruption("cart line vanished after upsert".to_owned()))
    }

    async fn set_cart_quantity(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Option<CartLine>, RepositoryError> {
        if quantity == 0 {
            let result = sqlx::query(
                "DELETE FROM shop.cart_lines WHERE user_id = $1 AND product_id = $2",
            )
            .bind(user_id)
            .bind(product_id)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(RepositoryError::NotFound);
            }
            return Ok(None);
        }

        let result = sqlx::query(
            "UPDATE shop.cart_lines SET quantity = $3 WHERE user_id = $1 AND product_id = $2",
        )
        .bind(user_id)
        .bind(product_id)
        .bind(quantity_to_db(quantity)?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(self.fetch_cart_line(user_id, product_id).await?)
    }

    async fn remove_cart_line(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("DELETE FROM shop.cart_lines WHERE user_id = $1 AND product_id = $2")
                .bind(user_id)
                .bind(product_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn clear_cart(&self, user_id: UserId) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM shop.cart_lines WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn insert_order(&self, new: NewOrder) -> Result<Order, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r"
            INSERT INTO shop.orders (user_id, status, payment_provider, total_amount)
            VALUES ($1, 'PENDING', $2, $3)
            RETURNING id, created_at
            ",
        )
        .bind(new.user_id)
        .bind(new.payment_provider.to_string())
        .bind(new.total_amount.amount())
        .fetch_one(&mut *tx)
        .await?;

        let order_id: OrderId = row.try_get("id")?;
        let created_at: DateTime<Utc> = row.try_get("created_at")?;

        let mut lines = Vec::with_capacity(new.lines.len());
        for line in &new.lines {
            let line_row = sqlx::query(
                r"
                INSERT INTO shop.order_lines (order_id, product_id, exam_name, quantity, unit_price)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id
                ",
            )
            .bind(order_id)
            .bind(line.product_id)
            .bind(&line.exam_name)
            .bind(quantity_to_db(line.quantity)?)
            .bind(line.unit_price.amount())
            .fetch_one(&mut *tx)
            .await?;

            lines.push(OrderLine {
                id: line_row.try_get("id")?,
                product_id: line.product_id,
                exam_name: line.exam_name.clone(),
                quantity: line.quantity,
                unit_price: line.unit_price,
            });
        }

        tx.commit().await?;

        Ok(Order {
            id: order_id,
            user_id: new.user_id,
            status: OrderStatus::Pending,
            payment_provider: new.payment_provider,
            provider_reference: None,
            total_amount: new.total_amount,
            lines,
            created_at,
        })
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        self.order_with_lines(id).await
    }

    async fn list_orders(&self, user_id: UserId) -> Result<Vec<Order>, RepositoryError> {
        let rows = sqlx::query(
            r"
            SELECT id, user_id, status, payment_provider, provider_reference,
                   total_amount, created_at
            FROM shop.orders
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            ",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: OrderId = row.try_get("id")?;
            let lines = self.order_lines(id).await?;
            orders.push(order_from_row(row, lines)?);
        }
        Ok(orders)
    }

    async fn complete_order(
        &self,
        id: OrderId,
        provider: PaymentProvider,
        transaction_id: &str,
        downloads: Vec<NewDownload>,
    ) -> Result<OrderTransition, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // The arbiter: only one caller can move PENDING to COMPLETED.
        let swapped = sqlx::query(
            r"
            UPDATE shop.orders
            SET status = 'COMPLETED', provider_reference = $2
            WHERE id = $1 AND status = 'PENDING'
            ",
        )
        .bind(id)
        .bind(transaction_id)
        .execute(&mut *tx)
        .await?;

        if swapped.rows_affected() == 0 {
            tx.rollback().await?;
            return self.lost_transition(id).await;
        }

        let order_row = sqlx::query("SELECT user_id, total_amount FROM shop.orders WHERE id = $1")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        let user_id: UserId = order_row.try_get("user_id")?;
        let total: Decimal = order_row.try_get("total_amount")?;

        let (stripe_id, paypal_id) = match provider {
            PaymentProvider::Stripe => (Some(transaction_id), None),
            PaymentProvider::Paypal => (None, Some(transaction_id)),
        };
        sqlx::query(
            r"
            INSERT INTO shop.payments (order_id, amount, status, provider, stripe_id, paypal_id)
            VALUES ($1, $2, 'COMPLETED', $3, $4, $5)
            ",
        )
        .bind(id)
        .bind(total)
        .bind(provider.to_string())
        .bind(stripe_id)
        .bind(paypal_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_on_unique(e, "order already has a completed payment"))?;

        for download in &downloads {
            sqlx::query(
                r"
                INSERT INTO shop.downloads (user_id, product_id, token, expires_at, max_downloads)
                VALUES ($1, $2, $3, $4, $5)
                ",
            )
            .bind(download.user_id)
            .bind(download.product_id)
            .bind(download.token.as_str())
            .bind(download.expires_at)
            .bind(quantity_to_db(download.max_downloads)?)
            .execute(&mut *tx)
            .await
            .map_err(|e| conflict_on_unique(e, "download token already exists"))?;
        }

        sqlx::query("DELETE FROM shop.cart_lines WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let order = self
            .order_with_lines(id)
            .await?
            .ok_or(RepositoryError::NotFound)?;
        Ok(OrderTransition::Applied(order))
    }

    async fn cancel_order(&self, id: OrderId) -> Result<OrderTransition, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let swapped = sqlx::query(
            r"
            UPDATE shop.orders
            SET status = 'CANCELLED'
            WHERE id = $1 AND status = 'PENDING'
            ",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if swapped.rows_affected() == 0 {
            tx.rollback().await?;
            return self.lost_transition(id).await;
        }

        let provider: String =
            sqlx::query("SELECT payment_provider FROM shop.orders WHERE id = $1")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?
                .try_get("payment_provider")?;

        sqlx::query(
            r"
            INSERT INTO shop.payments (order_id, amount, status, provider)
            VALUES ($1, 0, 'FAILED', $2)
            ",
        )
        .bind(id)
        .bind(provider)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let order = self
            .order_with_lines(id)
            .await?
            .ok_or(RepositoryError::NotFound)?;
        Ok(OrderTransition::Applied(order))
    }

    async fn payments_for_order(&self, id: OrderId) -> Result<Vec<Payment>, RepositoryError> {
        let rows = sqlx::query(
            r"
            SELECT id, order_id, amount, status, provider, stripe_id, paypal_id, created_at
            FROM shop.payments
            WHERE order_id = $1
            ORDER BY created_at ASC, id ASC
            ",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(payment_from_row).collect()
    }

    async fn insert_download(&self, new: NewDownload) -> Result<Download, RepositoryError> {
        let row = sqlx::query(
            r"
            INSERT INTO shop.downloads (user_id, product_id, token, expires_at, max_downloads)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, user_id, product_id, token, expires_at,
                      download_count, max_downloads, is_active, created_at
            ",
        )
        .bind(new.user_id)
        .bind(new.product_id)
        .bind(new.token.as_str())
        .bind(new.expires_at)
        .bind(quantity_to_db(new.max_downloads)?)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, "download token already exists"))?;

        download_from_row(&row)
    }

    async fn list_downloads(&self, user_id: UserId) -> Result<Vec<Download>, RepositoryError> {
        let rows = sqlx::query(
            r"
            SELECT id, user_id, product_id, token, expires_at,
                   download_count, max_downloads, is_active, created_at
            FROM shop.downloads
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            ",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(download_from_row).collect()
    }

    async fn redeem_download(
        &self,
        token: &DownloadToken,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome, RepositoryError> {
        // Single conditional update: the WHERE clause is the arbiter, so
        // concurrent redemptions of the last remaining use cannot both win.
        let row = sqlx::query(
            r"
            UPDATE shop.downloads
            SET download_count = download_count + 1,
                is_active = (download_count + 1) < max_downloads
            WHERE token = $1
              AND is_active
              AND expires_at > $2
              AND download_count < max_downloads
            RETURNING id, user_id, product_id, token, expires_at,
                      download_count, max_downloads, is_active, created_at
            ",
        )
        .bind(token.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(RedeemOutcome::Redeemed(download_from_row(&row)?));
        }

        // Losers: an unexpired row whose uses are spent answers LimitExceeded
        // (even if the winning redemption just deactivated it); an expired or
        // explicitly deactivated row is indistinguishable from an unknown
        // token.
        let probe = sqlx::query(
            r"
            SELECT download_count, max_downloads
            FROM shop.downloads
            WHERE token = $1 AND expires_at > $2
            ",
        )
        .bind(token.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = probe else {
            return Ok(RedeemOutcome::NotFound);
        };
        let count = quantity_from_db(row.try_get("download_count")?)?;
        let limit = quantity_from_db(row.try_get("max_downloads")?)?;
        if count >= limit {
            return Ok(RedeemOutcome::LimitExceeded { count, limit });
        }
        Ok(RedeemOutcome::NotFound)
    }
}

// =============================================================================
// Row conversions
// =============================================================================

fn quantity_to_db(quantity: u32) -> Result<i32, RepositoryError> {
    i32::try_from(quantity)
        .map_err(|_| RepositoryError::DataCorruption("quantity out of range".to_owned()))
}

fn quantity_from_db(quantity: i32) -> Result<u32, RepositoryError> {
    u32::try_from(quantity)
        .map_err(|_| RepositoryError::DataCorruption("negative quantity in store".to_owned()))
}

fn conflict_on_unique(e: sqlx::Error, message: &str) -> RepositoryError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.is_unique_violation()
    {
        return RepositoryError::Conflict(message.to_owned());
    }
    RepositoryError::Database(e)
}

fn product_from_row(row: &PgRow) -> Result<Product, RepositoryError> {
    Ok(Product {
        id: row.try_get::<ProductId, _>("id")?,
        exam_name: row.try_get("exam_name")?,
        exam_code: row.try_get("exam_code")?,
        description: row.try_get("description")?,
        difficulty_level: row.try_get("difficulty_level")?,
        price: Price::new(row.try_get::<Decimal, _>("price")?),
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
    })
}

fn cart_line_from_row(user_id: UserId, row: &PgRow) -> Result<CartLine, RepositoryError> {
    Ok(CartLine {
        user_id,
        product: ProductSummary {
            id: row.try_get::<ProductId, _>("product_id")?,
            exam_name: row.try_get("exam_name")?,
            exam_code: row.try_get("exam_code")?,
            difficulty_level: row.try_get("difficulty_level")?,
            price: Price::new(row.try_get::<Decimal, _>("price")?),
        },
        quantity: quantity_from_db(row.try_get("quantity")?)?,
        created_at: row.try_get("added_at")?,
    })
}

fn order_line_from_row(row: &PgRow) -> Result<OrderLine, RepositoryError> {
    Ok(OrderLine {
        id: row.try_get::<OrderLineId, _>("id")?,
        product_id: row.try_get::<ProductId, _>("product_id")?,
        exam_name: row.try_get("exam_name")?,
        quantity: quantity_from_db(row.try_get("quantity")?)?,
        unit_price: Price::new(row.try_get::<Decimal, _>("unit_price")?),
    })
}

fn order_from_row(row: &PgRow, lines: Vec<OrderLine>) -> Result<Order, RepositoryError> {
    let status: String = row.try_get("status")?;
    let provider: String = row.try_get("payment_provider")?;

    Ok(Order {
        id: row.try_get::<OrderId, _>("id")?,
        user_id: row.try_get::<UserId, _>("user_id")?,
        status: status
            .parse::<OrderStatus>()
            .map_err(RepositoryError::DataCorruption)?,
        payment_provider: provider
            .parse::<PaymentProvider>()
            .map_err(RepositoryError::DataCorruption)?,
        provider_reference: row.try_get("provider_reference")?,
        total_amount: Price::new(row.try_get::<Decimal, _>("total_amount")?),
        lines,
        created_at: row.try_get("created_at")?,
    })
}

fn payment_from_row(row: &PgRow) -> Result<Payment, RepositoryError> {
    let status: String = row.try_get("status")?;
    let provider: String = row.try_get("provider")?;

    Ok(Payment {
        id: row.try_get::<PaymentId, _>("id")?,
        order_id: row.try_get::<OrderId, _>("order_id")?,
        amount: Price::new(row.try_get::<Decimal, _>("amount")?),
        status: status
            .parse::<PaymentStatus>()
            .map_err(RepositoryError::DataCorruption)?,
        provider: provider
            .parse::<PaymentProvider>()
            .map_err(RepositoryError::DataCorruption)?,
        stripe_id: row.try_get("stripe_id")?,
        paypal_id: row.try_get("paypal_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn download_from_row(row: &PgRow) -> Result<Download, RepositoryError> {
    let token: String = row.try_get("token")?;

    Ok(Download {
        id: row.try_get::<DownloadId, _>("id")?,
        user_id: row.try_get::<UserId, _>("user_id")?,
        product_id: row.try_get::<ProductId, _>("product_id")?,
        token: DownloadToken::parse(&token)
            .map_err(|e| RepositoryError::DataCorruption(format!("invalid token in store: {e}")))?,
        expires_at: row.try_get("expires_at")?,
        download_count: quantity_from_db(row.try_get("download_count")?)?,
        max_downloads: quantity_from_db(row.try_get("max_downloads")?)?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
    })
}
