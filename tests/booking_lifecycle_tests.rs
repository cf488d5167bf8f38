//! Booking creation and the status lifecycle end to end

mod common;

use std::collections::HashSet;

use chrono::{Duration, Utc};
use uuid::Uuid;

use common::{Harness, PINCODE};
use mwg_server::booking::{
    BookingStatus, CancelBookingRequest, ListBookingsQuery, LocationUpdateRequest,
    OnlinePaymentProof, PaymentMode, PaymentType, VerifyOtpRequest,
};
use mwg_server::error::ApiError;
use mwg_server::models::{Actor, Role};
use mwg_server::payment::{
    CollectPaymentRequest, CollectionMode, PaymentFailedRequest, SplitStatus,
};
use mwg_server::store::{BookingRepository, PartnerRepository, PaymentRepository};

// ============================================================================
// Creation
// ============================================================================

#[tokio::test]
async fn test_create_booking_derives_fields() {
    let h = Harness::new().await;

    let booking = h.create_booking().await;

    assert!(booking.id.starts_with("MWG"));
    assert_eq!(booking.status, BookingStatus::Pending);
    assert_eq!(booking.pricing.subtotal, 500);
    assert_eq!(booking.pricing.tax, 25);
    assert_eq!(booking.pricing.charges, 10);
    assert_eq!(booking.pricing.total, 535);
    assert_eq!(booking.location.pincode, PINCODE);
    assert_eq!(booking.scheduled_time, "10:30");
    assert_eq!(
        booking.estimated_completion - booking.scheduled_at,
        Duration::minutes(45)
    );

    let otp = booking.otp.as_deref().unwrap();
    assert_eq!(otp.len(), 4);
    let value: u32 = otp.parse().unwrap();
    assert!((1000..=9999).contains(&value));

    let split = h.store.find_split(&booking.id).await.unwrap().unwrap();
    assert_eq!(split.total, 535);
    assert_eq!(split.status, SplitStatus::Pending);
}

#[tokio::test]
async fn test_concurrent_creation_yields_unique_ids() {
    let h = Harness::new().await;
    let actor = h.customer_actor();

    let mut handles = Vec::new();
    for _ in 0..20 {
        let bookings = h.bookings.clone();
        let request = h.booking_request();
        handles.push(tokio::spawn(async move {
            bookings.create(&actor, request).await
        }));
    }

    let mut ids = HashSet::new();
    let mut sequences = Vec::new();
    for handle in handles {
        let booking = handle.await.unwrap().unwrap();
        ids.insert(booking.id);
        sequences.push(booking.sequence);
    }
    assert_eq!(ids.len(), 20);
    sequences.sort_unstable();
    assert_eq!(sequences, (1..=20).collect::<Vec<i64>>());
}

#[tokio::test]
async fn test_create_rejects_foreign_vehicle() {
    let h = Harness::new().await;
    let mut request = h.booking_request();
    request.vehicle_id = Uuid::new_v4();

    let err = h
        .bookings
        .create(&h.customer_actor(), request)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::ValidationError(_)));
}

#[tokio::test]
async fn test_create_with_freeform_address_extracts_pincode() {
    let h = Harness::new().await;
    let mut request = h.booking_request();
    request.delivery_address_id = None;
    request.address = Some("45 Church Street, Bengaluru 560025".to_string());
    request.location = Some(mwg_server::models::GeoPoint {
        latitude: 12.97,
        longitude: 77.6,
    });

    let booking = h
        .bookings
        .create(&h.customer_actor(), request)
        .await
        .unwrap();
    assert_eq!(booking.location.pincode, "560025");
}

#[tokio::test]
async fn test_create_by_partner_is_forbidden() {
    let h = Harness::new().await;
    let partner = h.add_partner().await;

    let err = h
        .bookings
        .create(&Actor::partner(partner.id), h.booking_request())
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));
}

#[tokio::test]
async fn test_pay_online_booking_with_valid_proof_is_prepaid() {
    let h = Harness::new().await;
    let mut request = h.booking_request();
    request.payment_type = PaymentType::PayOnline;
    request.payment_mode = PaymentMode::Online;
    request.payment = Some(OnlinePaymentProof {
        order_id: "order_1".to_string(),
        payment_id: "pay_1".to_string(),
        signature: h.gateway.sign("order_1", "pay_1").unwrap(),
    });

    let booking = h
        .bookings
        .create(&h.customer_actor(), request)
        .await
        .unwrap();

    let split = h.store.find_split(&booking.id).await.unwrap().unwrap();
    assert_eq!(split.online_amount, 535);
    assert_eq!(split.status, SplitStatus::Completed);

    // The same proof cannot prepay a second booking
    let mut reused = h.booking_request();
    reused.payment_type = PaymentType::PayOnline;
    reused.payment_mode = PaymentMode::Online;
    reused.payment = Some(OnlinePaymentProof {
        order_id: "order_1".to_string(),
        payment_id: "pay_1".to_string(),
        signature: h.gateway.sign("order_1", "pay_1").unwrap(),
    });
    let err = h
        .bookings
        .create(&h.customer_actor(), reused)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Conflict(_)));
}

#[tokio::test]
async fn test_pay_online_booking_with_bad_signature_is_rejected() {
    let h = Harness::new().await;
    let mut request = h.booking_request();
    request.payment_type = PaymentType::PayOnline;
    request.payment = Some(OnlinePaymentProof {
        order_id: "order_1".to_string(),
        payment_id: "pay_1".to_string(),
        signature: "00".repeat(32),
    });

    let err = h
        .bookings
        .create(&h.customer_actor(), request)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::ValidationError(_)));
}

// ============================================================================
// Reads
// ============================================================================

#[tokio::test]
async fn test_partner_reads_never_include_otp() {
    let h = Harness::new().await;
    let (booking, partner) = h.confirmed_booking().await;

    let seen = h
        .bookings
        .get(&Actor::partner(partner.id), &booking.id)
        .await
        .unwrap();
    assert!(seen.otp.is_none());

    let own = h.bookings.get(&h.customer_actor(), &booking.id).await.unwrap();
    assert_eq!(own.otp, booking.otp);
}

#[tokio::test]
async fn test_unrelated_partner_cannot_read_booking() {
    let h = Harness::new().await;
    let booking = h.create_booking().await;
    let stranger = h.add_partner().await;

    let err = h
        .bookings
        .get(&Actor::partner(stranger.id), &booking.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));
}

#[tokio::test]
async fn test_list_is_scoped_and_paginated() {
    let h = Harness::new().await;
    for _ in 0..3 {
        h.create_booking().await;
    }

    let page = h
        .bookings
        .list(
            &h.customer_actor(),
            ListBookingsQuery {
                page: Some(2),
                limit: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.bookings.len(), 1);

    let other = Actor::customer(Uuid::new_v4());
    let empty = h
        .bookings
        .list(&other, ListBookingsQuery::default())
        .await
        .unwrap();
    assert_eq!(empty.total, 0);

    let err = h
        .bookings
        .list(
            &h.customer_actor(),
            ListBookingsQuery {
                limit: Some(500),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::ValidationError(_)));
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_full_lifecycle_with_split_payment() {
    let h = Harness::new().await;
    let (booking, partner) = h.in_progress_booking().await;
    let actor = Actor::partner(partner.id);
    assert_eq!(booking.status, BookingStatus::InProgress);
    assert!(booking.otp.is_none());

    let split = h
        .ledger
        .collect_payment(
            &booking.id,
            &actor,
            &CollectPaymentRequest {
                payment_mode: CollectionMode::Split,
                online_amount: Some(200),
                cash_amount: Some(335),
                transaction_id: Some("upi_123".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(split.online_amount, 200);
    assert_eq!(split.cash_amount, 335);
    assert_eq!(split.status, SplitStatus::Completed);

    let stored = h.store.find_booking(&booking.id).await.unwrap().unwrap();
    assert_eq!(stored.status, BookingStatus::Completed);
    assert!(stored.completed_at.is_some());

    let freed = h.store.find_partner(partner.id).await.unwrap().unwrap();
    assert!(freed.is_available);
    assert!(freed.current_booking_id.is_none());
    assert_eq!(freed.current_cash_in_hand, 335);
    assert_eq!(freed.all_time_cash_collected, 335);

    let names = h.events.booking_event_names(&booking.id);
    let statuses: Vec<_> = h
        .events
        .to_booking(&booking.id)
        .into_iter()
        .filter_map(|e| match e {
            mwg_server::notify::RealtimeEvent::BookingStatusUpdate { status, .. } => Some(status),
            _ => None,
        })
        .collect();
    assert!(names.contains(&"bookingAccepted"));
    assert_eq!(
        statuses,
        vec![
            BookingStatus::Confirmed,
            BookingStatus::Enroute,
            BookingStatus::Arrived,
            BookingStatus::InProgress,
            BookingStatus::Completed,
        ]
    );
}

#[tokio::test]
async fn test_transitions_cannot_skip_steps() {
    let h = Harness::new().await;
    let (booking, partner) = h.confirmed_booking().await;
    let actor = Actor::partner(partner.id);

    let err = h
        .bookings
        .mark_arrived(&actor, &booking.id)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ApiError::InvalidTransition {
            from: BookingStatus::Confirmed,
            ..
        }
    ));

    let err = h
        .bookings
        .start_service(&actor, &booking.id, booking.otp.as_deref())
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_only_assigned_partner_moves_the_booking() {
    let h = Harness::new().await;
    let (booking, _partner) = h.confirmed_booking().await;
    let other = h.add_partner().await;

    let err = h
        .bookings
        .start_travel(&Actor::partner(other.id), &booking.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));
}

#[tokio::test]
async fn test_start_service_requires_matching_otp() {
    let h = Harness::new().await;
    let (booking, partner) = h.confirmed_booking().await;
    let actor = Actor::partner(partner.id);
    h.bookings.start_travel(&actor, &booking.id).await.unwrap();
    h.bookings.mark_arrived(&actor, &booking.id).await.unwrap();

    let err = h
        .bookings
        .start_service(&actor, &booking.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::ValidationError(_)));

    let wrong = if booking.otp.as_deref() == Some("1000") {
        "1001"
    } else {
        "1000"
    };
    let err = h
        .bookings
        .start_service(&actor, &booking.id, Some(wrong))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::ValidationError(_)));

    let stored = h.store.find_booking(&booking.id).await.unwrap().unwrap();
    assert_eq!(stored.status, BookingStatus::Arrived);
    assert_eq!(h.bookings.otp_limiter().tracked().await, 1);

    h.bookings
        .start_service(&actor, &booking.id, booking.otp.as_deref())
        .await
        .unwrap();
    assert_eq!(h.bookings.otp_limiter().tracked().await, 0);
}

#[tokio::test]
async fn test_complete_requires_settled_payment() {
    let h = Harness::new().await;
    let (booking, partner) = h.in_progress_booking().await;

    let err = h
        .bookings
        .complete_service(&Actor::partner(partner.id), &booking.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Conflict(_)));
}

#[tokio::test]
async fn test_live_location_is_broadcast_while_trackable() {
    let h = Harness::new().await;
    let (booking, partner) = h.confirmed_booking().await;
    let actor = Actor::partner(partner.id);

    let updated = h
        .bookings
        .update_live_location(
            &actor,
            &booking.id,
            LocationUpdateRequest {
                latitude: 12.9716,
                longitude: 77.5946,
            },
        )
        .await
        .unwrap();
    let live = updated.live_location.unwrap();
    assert_eq!(live.latitude, 12.9716);
    assert!(h
        .events
        .booking_event_names(&booking.id)
        .contains(&"liveTracking"));
}

// ============================================================================
// OTP confirmation
// ============================================================================

#[tokio::test]
async fn test_partner_otp_verification_assigns_and_consumes_otp() {
    let h = Harness::new().await;
    let partner = h.add_partner().await;
    let booking = h.create_booking().await;
    let actor = Actor::partner(partner.id);

    let confirmed = h
        .bookings
        .verify_otp(
            &actor,
            VerifyOtpRequest {
                booking_id: booking.id.clone(),
                otp: booking.otp.clone().unwrap(),
            },
        )
        .await
        .unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);
    assert_eq!(confirmed.partner_id, Some(partner.id));

    let stored = h.store.find_booking(&booking.id).await.unwrap().unwrap();
    assert!(stored.otp.is_none());
    assert!(stored.otp_verified_at.is_some());

    // The consumed OTP is no longer needed to start the service
    h.bookings.start_travel(&actor, &booking.id).await.unwrap();
    h.bookings.mark_arrived(&actor, &booking.id).await.unwrap();
    let started = h
        .bookings
        .start_service(&actor, &booking.id, None)
        .await
        .unwrap();
    assert_eq!(started.status, BookingStatus::InProgress);
}

#[tokio::test]
async fn test_customer_cannot_verify_otp() {
    let h = Harness::new().await;
    let booking = h.create_booking().await;

    let err = h
        .bookings
        .verify_otp(
            &h.customer_actor(),
            VerifyOtpRequest {
                booking_id: booking.id.clone(),
                otp: booking.otp.clone().unwrap(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));
}

#[tokio::test]
async fn test_otp_attempts_are_rate_limited() {
    let h = Harness::new().await;
    let partner = h.add_partner().await;
    let booking = h.create_booking().await;
    let actor = Actor::partner(partner.id);
    let wrong = if booking.otp.as_deref() == Some("1000") {
        "1001"
    } else {
        "1000"
    };

    let mut limited = false;
    for _ in 0..(h.config.otp_attempts_per_minute + 1) {
        let err = h
            .bookings
            .verify_otp(
                &actor,
                VerifyOtpRequest {
                    booking_id: booking.id.clone(),
                    otp: wrong.to_string(),
                },
            )
            .await
            .unwrap_err();
        if matches!(err, ApiError::TooManyRequests) {
            limited = true;
        }
    }
    assert!(limited);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_customer_cancel_inside_grace_window_frees_partner() {
    let h = Harness::new().await;
    let (booking, partner) = h.confirmed_booking().await;

    let cancelled = h
        .bookings
        .cancel(
            &h.customer_actor(),
            &booking.id,
            CancelBookingRequest {
                reason: Some("Plans changed".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    let record = cancelled.cancellation.unwrap();
    assert_eq!(record.reason.as_deref(), Some("Plans changed"));

    let freed = h.store.find_partner(partner.id).await.unwrap().unwrap();
    assert!(freed.is_available);
    assert!(freed.current_booking_id.is_none());
    assert!(h
        .events
        .partner_event_names(partner.id)
        .contains(&"bookingCancelled"));
}

#[tokio::test]
async fn test_customer_cancel_after_grace_window_is_refused() {
    let h = Harness::new().await;
    let mut booking = h.create_booking().await;
    booking.created_at =
        Utc::now() - Duration::minutes(h.config.cancellation_grace_minutes + 1);
    h.store.put_booking(booking.clone()).await;

    let err = h
        .bookings
        .cancel(&h.customer_actor(), &booking.id, Default::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::CancellationWindowExpired(_)));

    let franchise = Actor::new(Uuid::new_v4(), Role::Franchise);
    let cancelled = h
        .bookings
        .cancel(&franchise, &booking.id, Default::default())
        .await
        .unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    let cancellation = cancelled.cancellation.unwrap();
    assert_eq!(cancellation.cancelled_by, Role::Franchise);
    assert_eq!(cancellation.actor_id, franchise.id);
}

#[tokio::test]
async fn test_terminal_booking_cannot_be_cancelled() {
    let h = Harness::new().await;
    let booking = h.create_booking().await;
    let admin = Actor::admin(Uuid::new_v4());
    h.bookings
        .cancel(&admin, &booking.id, Default::default())
        .await
        .unwrap();

    let err = h
        .bookings
        .cancel(&admin, &booking.id, Default::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ApiError::InvalidTransition {
            from: BookingStatus::Cancelled,
            ..
        }
    ));
}

// ============================================================================
// Failed payment
// ============================================================================

#[tokio::test]
async fn test_failed_payment_closes_pending_booking() {
    let h = Harness::new().await;
    h.online_partner().await;
    let booking = h.create_booking().await;
    assert!(h.dispatch.offers().offered_to(&booking.id).is_some());

    let failed = h
        .bookings
        .fail_payment(
            &h.customer_actor(),
            PaymentFailedRequest {
                booking_id: booking.id.clone(),
                reason: Some("card declined".to_string()),
            },
        )
        .await
        .unwrap();

    assert_eq!(failed.status, BookingStatus::Failed);
    assert!(h.dispatch.offers().offered_to(&booking.id).is_none());

    let stranger = Actor::customer(Uuid::new_v4());
    let err = h
        .bookings
        .fail_payment(
            &stranger,
            PaymentFailedRequest {
                booking_id: booking.id.clone(),
                reason: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));
}

// ============================================================================
// Realtime status updates
// ============================================================================

#[tokio::test]
async fn test_status_updates_route_to_lifecycle_steps() {
    let h = Harness::new().await;
    let (booking, partner) = h.confirmed_booking().await;
    let actor = Actor::partner(partner.id);

    for status in [BookingStatus::Enroute, BookingStatus::Arrived] {
        let updated = h
            .bookings
            .update_status(&actor, &booking.id, status, None)
            .await
            .unwrap();
        assert_eq!(updated.status, status);
    }

    let started = h
        .bookings
        .update_status(
            &actor,
            &booking.id,
            BookingStatus::InProgress,
            booking.otp.as_deref(),
        )
        .await
        .unwrap();
    assert_eq!(started.status, BookingStatus::InProgress);

    let err = h
        .bookings
        .update_status(&actor, &booking.id, BookingStatus::Failed, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::ValidationError(_)));
}
