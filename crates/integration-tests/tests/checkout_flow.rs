//! The checkout happy path, driven at the service layer.

use certdeck_core::{OrderStatus, PaymentProvider, PaymentStatus, Price, UserId};
use certdeck_integration_tests::{seed_product, test_context};
use certdeck_storefront::db::ShopStore;
use certdeck_storefront::error::AppError;
use certdeck_storefront::services::{CartService, DownloadService, OrderFactory, PaymentReconciler};

const BUYER: UserId = UserId::new(1);

#[tokio::test]
async fn test_two_line_cart_checks_out_to_45_dollars() {
    let ctx = test_context();
    let store = ctx.store.as_ref();
    let product_a = seed_product(store, "Platform Administrator", 2500).await;
    let product_b = seed_product(store, "Platform App Builder", 1000).await;

    let cart = CartService::new(store);
    cart.add(BUYER, product_a.id, 1).await.expect("add a");
    cart.add(BUYER, product_b.id, 2).await.expect("add b");

    let order = OrderFactory::new(store)
        .create_from_cart(BUYER, PaymentProvider::Stripe)
        .await
        .expect("create order");

    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.total_amount, Price::from_dollars(45));
    assert_eq!(order.lines.len(), 2);
    assert_eq!(
        order.total_amount,
        order
            .lines
            .iter()
            .map(|line| line.unit_price.times(line.quantity))
            .sum()
    );

    // Order creation does not touch the cart.
    assert_eq!(cart.list(BUYER).await.expect("list").len(), 2);

    let completed = PaymentReconciler::new(store)
        .confirm_success(order.id, PaymentProvider::Stripe, "pi_test_123")
        .await
        .expect("confirm");

    assert_eq!(completed.status, OrderStatus::Completed);
    assert_eq!(completed.provider_reference.as_deref(), Some("pi_test_123"));
    // Total is frozen, not recomputed.
    assert_eq!(completed.total_amount, Price::from_dollars(45));

    // One entitlement per order line, not per unit quantity.
    let downloads = DownloadService::new(store).list(BUYER).await.expect("list");
    assert_eq!(downloads.len(), 2);
    for download in &downloads {
        assert_eq!(download.download_count, 0);
        assert_eq!(download.max_downloads, 10);
        assert!(download.is_active);
        let days_out = (download.expires_at - chrono::Utc::now()).num_days();
        assert!((14..=15).contains(&days_out), "expiry {days_out} days out");
    }

    // Exactly one completed payment for the frozen total.
    let payments = store.payments_for_order(order.id).await.expect("payments");
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Completed);
    assert_eq!(payments[0].amount, Price::from_dollars(45));
    assert_eq!(payments[0].stripe_id.as_deref(), Some("pi_test_123"));
    assert!(payments[0].paypal_id.is_none());

    // The completion transaction cleared the cart.
    assert!(cart.list(BUYER).await.expect("list").is_empty());
}

#[tokio::test]
async fn test_empty_cart_is_rejected() {
    let ctx = test_context();
    let result = OrderFactory::new(ctx.store.as_ref())
        .create_from_cart(BUYER, PaymentProvider::Stripe)
        .await;
    assert!(matches!(result, Err(AppError::EmptyCart)));
}

#[tokio::test]
async fn test_order_prices_are_frozen_at_creation() {
    let ctx = test_context();
    let store = ctx.store.as_ref();
    let product = seed_product(store, "Integration Architect", 4500).await;

    CartService::new(store)
        .add(BUYER, product.id, 1)
        .await
        .expect("add");

    let order = OrderFactory::new(store)
        .create_from_cart(BUYER, PaymentProvider::Paypal)
        .await
        .expect("create");

    assert_eq!(order.lines[0].unit_price, Price::from_cents(4500));
    assert_eq!(order.lines[0].exam_name, "Integration Architect");

    // The snapshot survives independent of the catalog row.
    let fetched = store.get_order(order.id).await.expect("get").expect("some");
    assert_eq!(fetched.total_amount, Price::from_cents(4500));
}

#[tokio::test]
async fn test_orders_are_scoped_to_their_owner() {
    let ctx = test_context();
    let store = ctx.store.as_ref();
    let product = seed_product(store, "Platform Administrator", 2500).await;

    CartService::new(store)
        .add(BUYER, product.id, 1)
        .await
        .expect("add");
    let order = OrderFactory::new(store)
        .create_from_cart(BUYER, PaymentProvider::Stripe)
        .await
        .expect("create");

    let factory = OrderFactory::new(store);
    let stranger = UserId::new(2);

    assert!(factory.get_owned(BUYER, order.id).await.is_ok());
    // Someone else's order answers exactly like a missing one.
    assert!(matches!(
        factory.get_owned(stranger, order.id).await,
        Err(AppError::NotFound(_))
    ));
    assert!(factory.list(stranger).await.expect("list").is_empty());
}

#[tokio::test]
async fn test_cart_ledger_operations() {
    let ctx = test_context();
    let store = ctx.store.as_ref();
    let product = seed_product(store, "Platform Administrator", 2500).await;
    let cart = CartService::new(store);

    // Upsert increments.
    cart.add(BUYER, product.id, 1).await.expect("add");
    let line = cart.add(BUYER, product.id, 2).await.expect("add");
    assert_eq!(line.quantity, 3);

    // Set overwrites.
    let line = cart
        .set_quantity(BUYER, product.id, 5)
        .await
        .expect("set")
        .expect("line");
    assert_eq!(line.quantity, 5);

    // Zero deletes.
    assert!(
        cart.set_quantity(BUYER, product.id, 0)
            .await
            .expect("set")
            .is_none()
    );
    assert!(cart.list(BUYER).await.expect("list").is_empty());

    // Removing a missing line is NotFound.
    assert!(matches!(
        cart.remove(BUYER, product.id).await,
        Err(AppError::NotFound(_))
    ));

    // Unknown product cannot be added.
    assert!(matches!(
        cart.add(BUYER, certdeck_core::ProductId::new(999), 1).await,
        Err(AppError::NotFound(_))
    ));
}
