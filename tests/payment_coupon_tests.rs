//! Payment ledger and coupon redemption

mod common;

use common::{Harness, PINCODE};
use mwg_server::booking::BookingStatus;
use mwg_server::error::ApiError;
use mwg_server::models::Actor;
use mwg_server::payment::{
    CollectPaymentRequest, CollectionMode, SplitStatus, VerifyPaymentRequest,
};
use mwg_server::store::{
    BookingRepository, CouponRepository, PartnerRepository, PaymentRepository,
};

fn cash(amount: i64) -> CollectPaymentRequest {
    CollectPaymentRequest {
        payment_mode: CollectionMode::Split,
        online_amount: Some(0),
        cash_amount: Some(amount),
        transaction_id: None,
    }
}

fn checkout(
    h: &Harness,
    booking_id: &str,
    payment_id: &str,
    amount: Option<i64>,
) -> VerifyPaymentRequest {
    VerifyPaymentRequest {
        booking_id: booking_id.to_string(),
        order_id: "order_1".to_string(),
        payment_id: payment_id.to_string(),
        signature: h.gateway.sign("order_1", payment_id).unwrap(),
        amount,
    }
}

// ============================================================================
// Ledger
// ============================================================================

#[tokio::test]
async fn test_partial_then_full_cash_collection() {
    let h = Harness::new().await;
    let (booking, partner) = h.in_progress_booking().await;
    let actor = Actor::partner(partner.id);

    let partial = h
        .ledger
        .collect_payment(&booking.id, &actor, &cash(200))
        .await
        .unwrap();
    assert_eq!(partial.status, SplitStatus::Partial);
    assert_eq!(partial.remaining(), 335);
    let stored = h.store.find_booking(&booking.id).await.unwrap().unwrap();
    assert_eq!(stored.status, BookingStatus::InProgress);

    let settled = h
        .ledger
        .collect_payment(
            &booking.id,
            &actor,
            &CollectPaymentRequest {
                payment_mode: CollectionMode::FullCash,
                online_amount: None,
                cash_amount: None,
                transaction_id: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(settled.cash_amount, 535);
    assert_eq!(settled.status, SplitStatus::Completed);

    let freed = h.store.find_partner(partner.id).await.unwrap().unwrap();
    assert_eq!(freed.current_cash_in_hand, 535);
    assert!(freed.is_available);
}

#[tokio::test]
async fn test_cash_overpayment_is_refused() {
    let h = Harness::new().await;
    let (booking, partner) = h.in_progress_booking().await;

    let err = h
        .ledger
        .collect_payment(&booking.id, &Actor::partner(partner.id), &cash(600))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ApiError::Overpayment {
            attempted: 600,
            remaining: 535
        }
    ));

    let split = h
        .ledger
        .get_split(&booking.id, &h.customer_actor())
        .await
        .unwrap();
    assert_eq!(split.paid(), 0);
}

#[tokio::test]
async fn test_collect_requires_in_progress_booking() {
    let h = Harness::new().await;
    let (booking, partner) = h.confirmed_booking().await;

    let err = h
        .ledger
        .collect_payment(&booking.id, &Actor::partner(partner.id), &cash(100))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_verified_online_payment_is_recorded() {
    let h = Harness::new().await;
    let (booking, _partner) = h.in_progress_booking().await;

    let split = h
        .ledger
        .verify_online_payment(
            &h.customer_actor(),
            &VerifyPaymentRequest {
                booking_id: booking.id.clone(),
                order_id: "order_9".to_string(),
                payment_id: "pay_9".to_string(),
                signature: h.gateway.sign("order_9", "pay_9").unwrap(),
                amount: Some(535),
            },
        )
        .await
        .unwrap();
    assert_eq!(split.online_amount, 535);
    assert_eq!(split.online_transaction_id.as_deref(), Some("pay_9"));
    assert_eq!(split.status, SplitStatus::Completed);

    let stored = h.store.find_booking(&booking.id).await.unwrap().unwrap();
    assert_eq!(stored.status, BookingStatus::Completed);
}

#[tokio::test]
async fn test_forged_online_payment_is_rejected() {
    let h = Harness::new().await;
    let booking = h.create_booking().await;

    let err = h
        .ledger
        .verify_online_payment(
            &h.customer_actor(),
            &VerifyPaymentRequest {
                booking_id: booking.id.clone(),
                order_id: "order_9".to_string(),
                payment_id: "pay_9".to_string(),
                signature: h.gateway.sign("order_9", "pay_other").unwrap(),
                amount: Some(535),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::ValidationError(_)));
}

#[tokio::test]
async fn test_replayed_online_payment_is_counted_once() {
    let h = Harness::new().await;
    let (booking, partner) = h.in_progress_booking().await;
    h.ledger
        .collect_payment(&booking.id, &Actor::partner(partner.id), &cash(200))
        .await
        .unwrap();

    let request = checkout(&h, &booking.id, "pay_1", None);
    let first = h
        .ledger
        .verify_online_payment(&h.customer_actor(), &request)
        .await
        .unwrap();
    assert_eq!(first.online_amount, 335);
    assert_eq!(first.status, SplitStatus::Completed);

    for _ in 0..2 {
        let replay = h
            .ledger
            .verify_online_payment(&h.customer_actor(), &request)
            .await
            .unwrap();
        assert_eq!(replay.online_amount, 335);
        assert_eq!(replay.paid(), 535);
    }

    let split = h.store.find_split(&booking.id).await.unwrap().unwrap();
    assert_eq!(split.online_amount, 335);
    assert_eq!(split.cash_amount, 200);
}

#[tokio::test]
async fn test_online_amount_is_bound_to_outstanding_balance() {
    let h = Harness::new().await;
    let booking = h.create_booking().await;

    let err = h
        .ledger
        .verify_online_payment(
            &h.customer_actor(),
            &checkout(&h, &booking.id, "pay_1", Some(200)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::ValidationError(_)));

    let split = h.store.find_split(&booking.id).await.unwrap().unwrap();
    assert_eq!(split.online_amount, 0);
    assert!(h.store.find_online_payment("pay_1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_payment_reference_cannot_settle_another_booking() {
    let h = Harness::new().await;
    let paid = h.create_booking().await;
    let other = h.create_booking().await;

    h.ledger
        .verify_online_payment(&h.customer_actor(), &checkout(&h, &paid.id, "pay_1", None))
        .await
        .unwrap();

    let err = h
        .ledger
        .verify_online_payment(&h.customer_actor(), &checkout(&h, &other.id, "pay_1", None))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Conflict(_)));

    let split = h.store.find_split(&other.id).await.unwrap().unwrap();
    assert_eq!(split.online_amount, 0);
    let recorded = h.store.find_online_payment("pay_1").await.unwrap().unwrap();
    assert_eq!(recorded.booking_id, paid.id);
    assert_eq!(recorded.amount, 535);
}

// ============================================================================
// Coupons
// ============================================================================

#[tokio::test]
async fn test_coupon_discount_applies_to_booking() {
    let h = Harness::new().await;
    h.add_coupon("wash100", 2).await;

    let mut request = h.booking_request();
    request.coupon_code = Some("WASH100".to_string());
    let booking = h
        .bookings
        .create(&h.customer_actor(), request)
        .await
        .unwrap();

    assert_eq!(booking.pricing.discount, 100);
    assert_eq!(booking.pricing.total, 435);
    assert_eq!(booking.pricing.coupon_code.as_deref(), Some("WASH100"));
}

#[tokio::test]
async fn test_concurrent_redemptions_respect_per_user_limit() {
    let h = Harness::new().await;
    let coupon = h.add_coupon("ONCE", 1).await;
    let user = h.customer.id;

    let (first, second) = tokio::join!(
        h.coupons.redeem("ONCE", 500, Some(PINCODE), user),
        h.coupons.redeem("once", 500, Some(PINCODE), user)
    );
    let successes = [first.is_ok(), second.is_ok()]
        .iter()
        .filter(|ok| **ok)
        .count();
    assert_eq!(successes, 1);
    assert_eq!(h.store.coupon_usage(coupon.id, user).await.unwrap(), 1);
}

#[tokio::test]
async fn test_quote_records_nothing() {
    let h = Harness::new().await;
    let coupon = h.add_coupon("PEEK", 1).await;

    let quote = h
        .coupons
        .quote("peek", 535, Some(PINCODE), h.customer.id)
        .await
        .unwrap();
    assert_eq!(quote.discount, 100);
    assert_eq!(quote.final_price, 435);
    assert_eq!(
        h.store.coupon_usage(coupon.id, h.customer.id).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn test_unknown_coupon_fails_booking_creation() {
    let h = Harness::new().await;
    let mut request = h.booking_request();
    request.coupon_code = Some("NOPE".to_string());

    let err = h
        .bookings
        .create(&h.customer_actor(), request)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::ValidationError(_)));
}
