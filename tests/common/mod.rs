//! Shared fixtures: an in-memory store, recording notifiers and seeded actors

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use mwg_server::booking::{
    Booking, BookingService, BookingSettings, CreateBookingRequest, PaymentMode, PaymentType,
};
use mwg_server::config::Config;
use mwg_server::coupon::{Coupon, CouponScope, CouponService, CouponStatus, DiscountType};
use mwg_server::dispatch::{AvailabilityRecord, DispatchEngine, InMemoryOfferStore, InMemoryRegistry};
use mwg_server::models::{
    Actor, BusinessModel, CatalogService, Customer, DeliveryAddress, Partner, PartnerStatus,
    Vehicle,
};
use mwg_server::notify::{EventBus, PushSender, RecordingEventBus, RecordingPushSender};
use mwg_server::payment::{PaymentGateway, PaymentLedger, RazorpayVerifier};
use mwg_server::store::{MemoryStore, Store};

pub const PINCODE: &str = "560001";
pub const GATEWAY_SECRET: &str = "test-gateway-secret";

pub struct Harness {
    pub config: Config,
    pub store: Arc<MemoryStore>,
    pub events: Arc<RecordingEventBus>,
    pub push: Arc<RecordingPushSender>,
    pub gateway: Arc<RazorpayVerifier>,
    pub dispatch: Arc<DispatchEngine>,
    pub coupons: Arc<CouponService>,
    pub bookings: Arc<BookingService>,
    pub ledger: Arc<PaymentLedger>,
    pub customer: Customer,
    pub service: CatalogService,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: Config) -> Self {
        let memory = Arc::new(MemoryStore::new());
        let store: Arc<dyn Store> = memory.clone();
        let events = Arc::new(RecordingEventBus::new());
        let push = Arc::new(RecordingPushSender::new());
        let gateway = Arc::new(RazorpayVerifier::new(config.payment_gateway_secret.clone()));

        let bus: Arc<dyn EventBus> = events.clone();
        let sender: Arc<dyn PushSender> = push.clone();
        let verifier: Arc<dyn PaymentGateway> = gateway.clone();

        let dispatch = Arc::new(DispatchEngine::new(
            Arc::clone(&store),
            Arc::new(InMemoryRegistry::new()),
            Arc::new(InMemoryOfferStore::new()),
            Arc::clone(&bus),
            Arc::clone(&sender),
            config.offer_timeout,
        ));
        let coupons = Arc::new(CouponService::new(Arc::clone(&store)));
        let bookings = Arc::new(BookingService::new(
            Arc::clone(&store),
            Arc::clone(&dispatch),
            Arc::clone(&coupons),
            Arc::clone(&verifier),
            Arc::clone(&bus),
            Arc::clone(&sender),
            BookingSettings::from_config(&config),
        ));
        let ledger = Arc::new(PaymentLedger::new(store, verifier, bus, sender));

        let service = foam_wash();
        memory.insert_service(service.clone()).await;
        let customer = customer();
        memory.insert_customer(customer.clone()).await;

        Self {
            config,
            store: memory,
            events,
            push,
            gateway,
            dispatch,
            coupons,
            bookings,
            ledger,
            customer,
            service,
        }
    }

    pub fn customer_actor(&self) -> Actor {
        Actor::customer(self.customer.id)
    }

    /// Approved, active partner serving [`PINCODE`], not yet online
    pub async fn add_partner(&self) -> Partner {
        let partner = partner();
        self.store.insert_partner(partner.clone()).await;
        partner
    }

    pub async fn go_online(&self, partner: &Partner) {
        self.dispatch
            .registry()
            .mark_online(AvailabilityRecord::new(
                partner.id,
                Uuid::new_v4(),
                partner.pincodes.clone(),
                None,
            ))
            .await;
    }

    pub async fn online_partner(&self) -> Partner {
        let partner = self.add_partner().await;
        self.go_online(&partner).await;
        partner
    }

    /// Pay-after-service booking of one foam wash at the saved address
    pub fn booking_request(&self) -> CreateBookingRequest {
        CreateBookingRequest {
            service_ids: vec![self.service.id],
            vehicle_id: self.customer.vehicles[0].id,
            date: "2026-11-20".to_string(),
            time: "10:30".to_string(),
            delivery_address_id: Some(self.customer.addresses[0].id),
            address: None,
            location: None,
            label: None,
            payment_type: PaymentType::PayAfterService,
            payment_mode: PaymentMode::Cash,
            coupon_code: None,
            payment: None,
        }
    }

    pub async fn create_booking(&self) -> Booking {
        self.bookings
            .create(&self.customer_actor(), self.booking_request())
            .await
            .expect("booking should be created")
    }

    /// Booking accepted by a fresh online partner
    pub async fn confirmed_booking(&self) -> (Booking, Partner) {
        let partner = self.online_partner().await;
        let booking = self.create_booking().await;
        match self.dispatch.accept(&booking.id, partner.id).await {
            Ok(mwg_server::dispatch::AcceptOutcome::Accepted(confirmed)) => {
                // The customer's copy still carries the OTP
                let mut confirmed = confirmed;
                confirmed.otp = booking.otp.clone();
                (confirmed, partner)
            }
            other => panic!("expected accept to win, got {:?}", other),
        }
    }

    /// Booking driven through travel, arrival and OTP start
    pub async fn in_progress_booking(&self) -> (Booking, Partner) {
        let (booking, partner) = self.confirmed_booking().await;
        let actor = Actor::partner(partner.id);
        self.bookings
            .start_travel(&actor, &booking.id)
            .await
            .expect("start travel");
        self.bookings
            .mark_arrived(&actor, &booking.id)
            .await
            .expect("arrive");
        let started = self
            .bookings
            .start_service(&actor, &booking.id, booking.otp.as_deref())
            .await
            .expect("start service");
        (started, partner)
    }

    pub async fn add_coupon(&self, code: &str, limit_per_user: i32) -> Coupon {
        let coupon = Coupon {
            id: Uuid::new_v4(),
            name: format!("{} promo", code),
            code: code.to_uppercase(),
            scope: CouponScope::All,
            pincodes: Vec::new(),
            limit_per_user,
            start_date: Utc::now() - Duration::days(1),
            end_date: Utc::now() + Duration::days(30),
            discount_type: DiscountType::Flat,
            discount_value: 100,
            max_discount: 0,
            min_amount: 0,
            status: CouponStatus::Active,
        };
        self.store.insert_coupon(coupon.clone()).await;
        coupon
    }
}

pub fn test_config() -> Config {
    Config {
        payment_gateway_secret: GATEWAY_SECRET.to_string(),
        jwt_secret: "test-jwt-secret".to_string(),
        ..Config::in_memory()
    }
}

/// 500 + 25 tax + 10 charges = 535
pub fn foam_wash() -> CatalogService {
    CatalogService {
        id: Uuid::new_v4(),
        name: "Foam wash".to_string(),
        description: Some("Exterior foam wash".to_string()),
        price: 500,
        tax: 25,
        charges: 10,
        discount: 0,
        duration_minutes: 45,
        active: true,
    }
}

pub fn customer() -> Customer {
    let now = Utc::now();
    Customer {
        id: Uuid::new_v4(),
        name: "Asha".to_string(),
        phone: "9000000001".to_string(),
        email: None,
        push_token: Some("ExponentPushToken[customer]".to_string()),
        vehicles: vec![Vehicle {
            id: Uuid::new_v4(),
            vehicle_type: "sedan".to_string(),
            make: Some("Honda".to_string()),
            model: Some("City".to_string()),
            registration: Some("KA01AB1234".to_string()),
        }],
        addresses: vec![DeliveryAddress {
            id: Uuid::new_v4(),
            label: Some("Home".to_string()),
            street: "12 MG Road".to_string(),
            city: "Bengaluru".to_string(),
            state: "KA".to_string(),
            postal_code: PINCODE.to_string(),
            coordinates: None,
        }],
        created_at: now,
        updated_at: now,
    }
}

pub fn partner() -> Partner {
    let now = Utc::now();
    Partner {
        id: Uuid::new_v4(),
        name: "Ravi".to_string(),
        phone: "9000000002".to_string(),
        email: None,
        business_model: BusinessModel::Byob,
        branch_id: None,
        pincodes: vec![PINCODE.to_string()],
        status: PartnerStatus::Approved,
        active: true,
        push_token: Some("ExponentPushToken[partner]".to_string()),
        is_available: true,
        current_booking_id: None,
        current_cash_in_hand: 0,
        all_time_cash_collected: 0,
        created_at: now,
        updated_at: now,
    }
}
