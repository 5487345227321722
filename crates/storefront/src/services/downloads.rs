//! Download entitlements: issuance and redemption.

use chrono::{Duration, Utc};

use certdeck_core::{DownloadToken, ProductId, UserId};

use crate::db::{RedeemOutcome, ShopStore};
use crate::error::{AppError, Result};
use crate::models::{Download, NewDownload, Product};

/// How long a fresh entitlement stays redeemable.
pub const VALIDITY_DAYS: i64 = 15;

/// Redemptions allowed per entitlement.
pub const MAX_DOWNLOADS: u32 = 10;

/// Mint a new entitlement for a purchased product: fresh 256-bit token,
/// expiry 15 days out, 10 redemptions.
///
/// One entitlement per order line, regardless of the line's quantity; the
/// reconciler persists the batch inside the completion transaction, so a
/// failed insert voids the entire completion rather than leaving an order
/// with partial entitlements.
#[must_use]
pub fn issue(user_id: UserId, product_id: ProductId) -> NewDownload {
    NewDownload {
        user_id,
        product_id,
        token: DownloadToken::generate(),
        expires_at: Utc::now() + Duration::days(VALIDITY_DAYS),
        max_downloads: MAX_DOWNLOADS,
    }
}

/// Entitlement listing and redemption for one request.
pub struct DownloadService<'a> {
    store: &'a dyn ShopStore,
}

impl<'a> DownloadService<'a> {
    #[must_use]
    pub const fn new(store: &'a dyn ShopStore) -> Self {
        Self { store }
    }

    /// All entitlements for a user, newest first.
    pub async fn list(&self, user_id: UserId) -> Result<Vec<Download>> {
        Ok(self.store.list_downloads(user_id).await?)
    }

    /// Redeem one use of a token, returning the updated entitlement and its
    /// product for content generation.
    ///
    /// The store increments the counter and deactivates the row at the
    /// limit in a single conditional update, so concurrent redemptions of
    /// the last use cannot both succeed.
    ///
    /// # Errors
    ///
    /// `AppError::NotFound` for tokens that are malformed, unknown,
    /// deactivated, or expired - deliberately indistinguishable.
    /// `AppError::LimitExceeded` when the entitlement is live but spent.
    pub async fn redeem(&self, candidate: &str) -> Result<(Download, Product)> {
        let token = DownloadToken::parse(candidate)
            .map_err(|_| AppError::NotFound("download".to_owned()))?;

        match self.store.redeem_download(&token, Utc::now()).await? {
            RedeemOutcome::Redeemed(download) => {
                let product = self
                    .store
                    .get_product(download.product_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::Internal(format!(
                            "entitlement {} references missing product {}",
                            download.id, download.product_id
                        ))
                    })?;
                tracing::info!(
                    download_id = %download.id,
                    product_id = %download.product_id,
                    count = download.download_count,
                    limit = download.max_downloads,
                    "download redeemed"
                );
                Ok((download, product))
            }
            RedeemOutcome::NotFound => Err(AppError::NotFound("download".to_owned())),
            RedeemOutcome::LimitExceeded { count, limit } => {
                Err(AppError::LimitExceeded { count, limit })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_shape() {
        let entitlement = issue(UserId::new(1), ProductId::new(2));
        assert_eq!(entitlement.max_downloads, 10);

        let days_out = (entitlement.expires_at - Utc::now()).num_days();
        assert!((14..=15).contains(&days_out));
    }

    #[test]
    fn test_issue_mints_distinct_tokens() {
        let a = issue(UserId::new(1), ProductId::new(2));
        let b = issue(UserId::new(1), ProductId::new(2));
        assert_ne!(a.token, b.token);
    }
}
