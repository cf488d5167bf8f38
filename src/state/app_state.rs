//! Application state shared across handlers

use std::sync::Arc;

use axum::extract::FromRef;
use sqlx::PgPool;

use crate::auth::AuthService;
use crate::booking::{BookingService, BookingSettings};
use crate::config::Config;
use crate::coupon::CouponService;
use crate::dispatch::{DispatchEngine, InMemoryOfferStore, InMemoryRegistry};
use crate::notify::{EventBus, PushSender};
use crate::payment::{PaymentGateway, PaymentLedger, RazorpayVerifier};
use crate::profile::ProfileService;
use crate::store::Store;
use crate::websocket::WsHub;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    /// Present with the postgres backend; used by health checks
    pub db_pool: Option<PgPool>,
    pub auth_service: Arc<AuthService>,
    pub hub: WsHub,
    pub dispatch: Arc<DispatchEngine>,
    pub booking_service: Arc<BookingService>,
    pub payment_ledger: Arc<PaymentLedger>,
    pub coupon_service: Arc<CouponService>,
    pub profile_service: Arc<ProfileService>,
}

impl AppState {
    /// Wire every service around the given store and push sender.
    /// The websocket hub is the event bus.
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        db_pool: Option<PgPool>,
        push: Arc<dyn PushSender>,
    ) -> Self {
        let hub = WsHub::new();
        let events: Arc<dyn EventBus> = Arc::new(hub.clone());
        let gateway: Arc<dyn PaymentGateway> =
            Arc::new(RazorpayVerifier::new(config.payment_gateway_secret.clone()));

        let dispatch = Arc::new(DispatchEngine::new(
            Arc::clone(&store),
            Arc::new(InMemoryRegistry::new()),
            Arc::new(InMemoryOfferStore::new()),
            Arc::clone(&events),
            Arc::clone(&push),
            config.offer_timeout,
        ));
        let coupon_service = Arc::new(CouponService::new(Arc::clone(&store)));
        let booking_service = Arc::new(BookingService::new(
            Arc::clone(&store),
            Arc::clone(&dispatch),
            Arc::clone(&coupon_service),
            Arc::clone(&gateway),
            Arc::clone(&events),
            Arc::clone(&push),
            BookingSettings::from_config(&config),
        ));
        let payment_ledger = Arc::new(PaymentLedger::new(
            Arc::clone(&store),
            gateway,
            events,
            push,
        ));
        let profile_service = Arc::new(ProfileService::new(Arc::clone(&store)));
        let auth_service = Arc::new(AuthService::new(config.jwt_secret.clone()));

        Self {
            config: Arc::new(config),
            store,
            db_pool,
            auth_service,
            hub,
            dispatch,
            booking_service,
            payment_ledger,
            coupon_service,
            profile_service,
        }
    }
}

impl FromRef<AppState> for WsHub {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.hub.clone()
    }
}

impl FromRef<AppState> for Arc<AuthService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.auth_service.clone()
    }
}

impl FromRef<AppState> for Arc<BookingService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.booking_service.clone()
    }
}

impl FromRef<AppState> for Arc<PaymentLedger> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.payment_ledger.clone()
    }
}

impl FromRef<AppState> for Arc<CouponService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.coupon_service.clone()
    }
}

impl FromRef<AppState> for Arc<ProfileService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.profile_service.clone()
    }
}
