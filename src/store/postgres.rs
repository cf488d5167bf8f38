//! PostgreSQL store
//!
//! Conditional booking updates lock the booking row (`SELECT ... FOR UPDATE`),
//! check the expected status and apply the partner claim or release in the
//! same transaction.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::booking::lifecycle::Transition;
use crate::booking::{
    Booking, BookingFilter, BookingStatus, Cancellation, LiveLocation, PaymentMode, PaymentType,
    Pricing, ServiceLine, ServiceLocation,
};
use crate::coupon::Coupon;
use crate::error::{ApiError, ApiResult};
use crate::models::{
    Admin, BusinessModel, CatalogService, Customer, DeliveryAddress, Partner, Vehicle,
};
use crate::payment::{OnlinePayment, PaymentDelta, PaymentSplit, SplitStatus};
use crate::profile::ProfileChanges;
use crate::store::{
    AdminRepository, BookingChange, BookingRepository, CatalogRepository, CouponRepository,
    CustomerRepository, PartnerEffect, PartnerRepository, PaymentApplied, PaymentRepository,
    TransitionOutcome,
};

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: String,
    sequence: i64,
    customer_id: Uuid,
    partner_id: Option<Uuid>,
    branch_id: Option<Uuid>,
    vehicle_id: Uuid,
    services: Json<Vec<ServiceLine>>,
    location: Json<ServiceLocation>,
    scheduled_date: NaiveDate,
    scheduled_time: String,
    scheduled_at: DateTime<Utc>,
    estimated_completion: DateTime<Utc>,
    status: BookingStatus,
    otp: Option<String>,
    pricing: Json<Pricing>,
    payment_type: PaymentType,
    payment_mode: PaymentMode,
    live_location: Option<Json<LiveLocation>>,
    cancellation: Option<Json<Cancellation>>,
    otp_verified_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<BookingRow> for Booking {
    fn from(row: BookingRow) -> Self {
        Booking {
            id: row.id,
            sequence: row.sequence,
            customer_id: row.customer_id,
            partner_id: row.partner_id,
            branch_id: row.branch_id,
            vehicle_id: row.vehicle_id,
            services: row.services.0,
            location: row.location.0,
            scheduled_date: row.scheduled_date,
            scheduled_time: row.scheduled_time,
            scheduled_at: row.scheduled_at,
            estimated_completion: row.estimated_completion,
            status: row.status,
            otp: row.otp,
            pricing: row.pricing.0,
            payment_type: row.payment_type,
            payment_mode: row.payment_mode,
            live_location: row.live_location.map(|j| j.0),
            cancellation: row.cancellation.map(|j| j.0),
            otp_verified_at: row.otp_verified_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CustomerRow {
    id: Uuid,
    name: String,
    phone: String,
    email: Option<String>,
    push_token: Option<String>,
    vehicles: Json<Vec<Vehicle>>,
    addresses: Json<Vec<DeliveryAddress>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CustomerRow> for Customer {
    fn from(row: CustomerRow) -> Self {
        Customer {
            id: row.id,
            name: row.name,
            phone: row.phone,
            email: row.email,
            push_token: row.push_token,
            vehicles: row.vehicles.0,
            addresses: row.addresses.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ClaimedPartner {
    business_model: BusinessModel,
    branch_id: Option<Uuid>,
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

async fn lock_booking(conn: &mut PgConnection, id: &str) -> ApiResult<Option<Booking>> {
    let row = sqlx::query_as::<_, BookingRow>("SELECT * FROM bookings WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(row.map(Booking::from))
}

async fn write_booking(conn: &mut PgConnection, booking: &Booking) -> ApiResult<()> {
    sqlx::query(
        r#"
        UPDATE bookings
        SET partner_id = $2, branch_id = $3, status = $4, otp = $5, live_location = $6,
            cancellation = $7, otp_verified_at = $8, started_at = $9, completed_at = $10,
            updated_at = $11
        WHERE id = $1
        "#,
    )
    .bind(&booking.id)
    .bind(booking.partner_id)
    .bind(booking.branch_id)
    .bind(booking.status)
    .bind(&booking.otp)
    .bind(booking.live_location.clone().map(Json))
    .bind(booking.cancellation.clone().map(Json))
    .bind(booking.otp_verified_at)
    .bind(booking.started_at)
    .bind(booking.completed_at)
    .bind(booking.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// Conditional booking update on an open transaction
async fn transition_in(
    conn: &mut PgConnection,
    id: &str,
    change: &BookingChange,
) -> ApiResult<TransitionOutcome> {
    let Some(mut booking) = lock_booking(&mut *conn, id).await? else {
        return Ok(TransitionOutcome::NotFound);
    };
    if !change.expected.contains(&booking.status) {
        return Ok(TransitionOutcome::StatusMismatch(booking.status));
    }

    match change.partner {
        PartnerEffect::Claim(partner_id) => {
            let claimed = sqlx::query_as::<_, ClaimedPartner>(
                r#"
                UPDATE partners
                SET is_available = FALSE, current_booking_id = $2, updated_at = $3
                WHERE id = $1 AND is_available AND current_booking_id IS NULL
                RETURNING business_model, branch_id
                "#,
            )
            .bind(partner_id)
            .bind(&booking.id)
            .bind(change.at)
            .fetch_optional(&mut *conn)
            .await?;

            let Some(claimed) = claimed else {
                let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM partners WHERE id = $1")
                    .bind(partner_id)
                    .fetch_optional(&mut *conn)
                    .await?;
                return Ok(if exists.is_some() {
                    TransitionOutcome::PartnerBusy
                } else {
                    TransitionOutcome::PartnerNotFound
                });
            };

            booking.partner_id = Some(partner_id);
            if claimed.business_model == BusinessModel::Franchise && claimed.branch_id.is_some() {
                booking.branch_id = claimed.branch_id;
            }
        }
        PartnerEffect::Release => {
            if let Some(partner_id) = booking.partner_id {
                sqlx::query(
                    r#"
                    UPDATE partners
                    SET is_available = TRUE, current_booking_id = NULL, updated_at = $3
                    WHERE id = $1 AND current_booking_id = $2
                    "#,
                )
                .bind(partner_id)
                .bind(&booking.id)
                .bind(change.at)
                .execute(&mut *conn)
                .await?;
            }
        }
        PartnerEffect::None => {}
    }

    change.apply_to(&mut booking);
    write_booking(&mut *conn, &booking).await?;
    Ok(TransitionOutcome::Applied(booking))
}

#[async_trait]
impl BookingRepository for PgStore {
    async fn next_booking_sequence(&self) -> ApiResult<i64> {
        let (value,): (i64,) = sqlx::query_as(
            "UPDATE counters SET value = value + 1 WHERE name = 'booking' RETURNING value",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(value)
    }

    async fn insert_booking(&self, booking: &Booking, split: &PaymentSplit) -> ApiResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO bookings (
                id, sequence, customer_id, partner_id, branch_id, vehicle_id, services, location,
                pincode, scheduled_date, scheduled_time, scheduled_at, estimated_completion,
                status, otp, pricing, payment_type, payment_mode, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            "#,
        )
        .bind(&booking.id)
        .bind(booking.sequence)
        .bind(booking.customer_id)
        .bind(booking.partner_id)
        .bind(booking.branch_id)
        .bind(booking.vehicle_id)
        .bind(Json(&booking.services))
        .bind(Json(&booking.location))
        .bind(booking.pincode())
        .bind(booking.scheduled_date)
        .bind(&booking.scheduled_time)
        .bind(booking.scheduled_at)
        .bind(booking.estimated_completion)
        .bind(booking.status)
        .bind(&booking.otp)
        .bind(Json(&booking.pricing))
        .bind(booking.payment_type)
        .bind(booking.payment_mode)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&mut *tx)
        .await?;

        upsert_split(&mut tx, split).await?;
        if let Some(reference) = &split.online_transaction_id {
            record_online_payment(
                &mut tx,
                &booking.id,
                reference,
                split.online_amount,
                split.updated_at,
            )
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_booking(&self, id: &str) -> ApiResult<Option<Booking>> {
        let row = sqlx::query_as::<_, BookingRow>("SELECT * FROM bookings WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Booking::from))
    }

    async fn list_bookings(&self, filter: &BookingFilter) -> ApiResult<(Vec<Booking>, i64)> {
        const WHERE: &str = r#"
            WHERE ($1::booking_status IS NULL OR status = $1)
              AND ($2::uuid IS NULL OR customer_id = $2)
              AND ($3::uuid IS NULL OR partner_id = $3)
              AND ($4::uuid IS NULL OR branch_id = $4)
        "#;

        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT * FROM bookings {} ORDER BY created_at DESC, sequence DESC LIMIT $5 OFFSET $6",
            WHERE
        ))
        .bind(filter.status)
        .bind(filter.customer_id)
        .bind(filter.partner_id)
        .bind(filter.branch_id)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(&self.pool)
        .await?;

        let (total,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM bookings {}", WHERE))
            .bind(filter.status)
            .bind(filter.customer_id)
            .bind(filter.partner_id)
            .bind(filter.branch_id)
            .fetch_one(&self.pool)
            .await?;

        Ok((rows.into_iter().map(Booking::from).collect(), total))
    }

    async fn transition_booking(
        &self,
        id: &str,
        change: BookingChange,
    ) -> ApiResult<TransitionOutcome> {
        let mut tx = self.pool.begin().await?;
        let outcome = transition_in(&mut tx, id, &change).await?;
        if matches!(outcome, TransitionOutcome::Applied(_)) {
            tx.commit().await?;
        }
        Ok(outcome)
    }
}

async fn upsert_split(conn: &mut PgConnection, split: &PaymentSplit) -> ApiResult<()> {
    sqlx::query(
        r#"
        INSERT INTO payment_splits (
            booking_id, total, online_amount, cash_amount, online_transaction_id,
            online_paid_at, cash_collected_at, collected_by, status, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (booking_id) DO UPDATE SET
            online_amount = EXCLUDED.online_amount,
            cash_amount = EXCLUDED.cash_amount,
            online_transaction_id = EXCLUDED.online_transaction_id,
            online_paid_at = EXCLUDED.online_paid_at,
            cash_collected_at = EXCLUDED.cash_collected_at,
            collected_by = EXCLUDED.collected_by,
            status = EXCLUDED.status,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(&split.booking_id)
    .bind(split.total)
    .bind(split.online_amount)
    .bind(split.cash_amount)
    .bind(&split.online_transaction_id)
    .bind(split.online_paid_at)
    .bind(split.cash_collected_at)
    .bind(split.collected_by)
    .bind(split.status)
    .bind(split.created_at)
    .bind(split.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

async fn find_online_payment_in(
    conn: &mut PgConnection,
    transaction_ref: &str,
) -> ApiResult<Option<OnlinePayment>> {
    let recorded = sqlx::query_as::<_, OnlinePayment>(
        "SELECT * FROM online_payments WHERE transaction_ref = $1",
    )
    .bind(transaction_ref)
    .fetch_optional(conn)
    .await?;
    Ok(recorded)
}

/// Claim a gateway reference for a booking; a reference held by another booking is a conflict
async fn record_online_payment(
    conn: &mut PgConnection,
    booking_id: &str,
    transaction_ref: &str,
    amount: i64,
    at: DateTime<Utc>,
) -> ApiResult<()> {
    let inserted = sqlx::query(
        r#"
        INSERT INTO online_payments (transaction_ref, booking_id, amount, recorded_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (transaction_ref) DO NOTHING
        "#,
    )
    .bind(transaction_ref)
    .bind(booking_id)
    .bind(amount)
    .bind(at)
    .execute(conn)
    .await?
    .rows_affected();

    if inserted == 0 {
        return Err(ApiError::Conflict(format!(
            "Payment {} is already recorded for another booking",
            transaction_ref
        )));
    }
    Ok(())
}

#[async_trait]
impl PaymentRepository for PgStore {
    async fn find_split(&self, booking_id: &str) -> ApiResult<Option<PaymentSplit>> {
        let split =
            sqlx::query_as::<_, PaymentSplit>("SELECT * FROM payment_splits WHERE booking_id = $1")
                .bind(booking_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(split)
    }

    async fn find_online_payment(
        &self,
        transaction_ref: &str,
    ) -> ApiResult<Option<OnlinePayment>> {
        let mut conn = self.pool.acquire().await?;
        find_online_payment_in(&mut conn, transaction_ref).await
    }

    async fn apply_payment(
        &self,
        booking_id: &str,
        delta: PaymentDelta,
    ) -> ApiResult<PaymentApplied> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let booking = lock_booking(&mut tx, booking_id)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("Booking {}", booking_id)))?;

        let existing = sqlx::query_as::<_, PaymentSplit>(
            "SELECT * FROM payment_splits WHERE booking_id = $1 FOR UPDATE",
        )
        .bind(booking_id)
        .fetch_optional(&mut *tx)
        .await?;

        let mut split =
            existing.unwrap_or_else(|| PaymentSplit::new(booking_id, booking.pricing.total, now));

        // The booking row lock serializes replays of the same reference
        let reference = delta.transaction_ref.as_deref().filter(|_| delta.online > 0);
        if let Some(reference) = reference {
            if let Some(recorded) = find_online_payment_in(&mut tx, reference).await? {
                recorded.ensure_belongs_to(booking_id)?;
                tx.commit().await?;
                return Ok(PaymentApplied {
                    split,
                    completed_booking: None,
                    replayed: true,
                });
            }
        }

        split.apply(&delta, now)?;
        upsert_split(&mut tx, &split).await?;
        if let Some(reference) = reference {
            record_online_payment(&mut tx, booking_id, reference, delta.online, now).await?;
        }

        if delta.cash > 0 {
            if let Some(partner_id) = delta.collected_by {
                sqlx::query(
                    r#"
                    UPDATE partners
                    SET current_cash_in_hand = current_cash_in_hand + $2,
                        all_time_cash_collected = all_time_cash_collected + $2,
                        updated_at = $3
                    WHERE id = $1
                    "#,
                )
                .bind(partner_id)
                .bind(delta.cash)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
        }

        let mut completed_booking = None;
        if split.status == SplitStatus::Completed && booking.status == BookingStatus::InProgress {
            let change = BookingChange {
                at: now,
                ..Transition::Complete.change()
            };
            if let TransitionOutcome::Applied(done) = transition_in(&mut tx, booking_id, &change).await? {
                completed_booking = Some(done);
            }
        }

        tx.commit().await?;
        Ok(PaymentApplied {
            split,
            completed_booking,
            replayed: false,
        })
    }
}

#[async_trait]
impl PartnerRepository for PgStore {
    async fn find_partner(&self, id: Uuid) -> ApiResult<Option<Partner>> {
        let partner = sqlx::query_as::<_, Partner>("SELECT * FROM partners WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(partner)
    }

    async fn push_targets_for_pincode(&self, pincode: &str) -> ApiResult<Vec<Partner>> {
        let partners = sqlx::query_as::<_, Partner>(
            r#"
            SELECT * FROM partners
            WHERE $1 = ANY(pincodes)
              AND status = 'approved' AND active AND is_available
              AND push_token IS NOT NULL AND push_token <> ''
            "#,
        )
        .bind(pincode)
        .fetch_all(&self.pool)
        .await?;
        Ok(partners)
    }

    async fn update_partner_profile(
        &self,
        id: Uuid,
        changes: &ProfileChanges,
    ) -> ApiResult<Option<Partner>> {
        let partner = sqlx::query_as::<_, Partner>(
            r#"
            UPDATE partners
            SET name = COALESCE($2, name), phone = COALESCE($3, phone),
                email = COALESCE($4, email), push_token = COALESCE($5, push_token),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&changes.name)
        .bind(&changes.phone)
        .bind(&changes.email)
        .bind(&changes.push_token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(partner)
    }
}

#[async_trait]
impl CustomerRepository for PgStore {
    async fn find_customer(&self, id: Uuid) -> ApiResult<Option<Customer>> {
        let row = sqlx::query_as::<_, CustomerRow>("SELECT * FROM customers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Customer::from))
    }

    async fn update_customer_profile(
        &self,
        id: Uuid,
        changes: &ProfileChanges,
    ) -> ApiResult<Option<Customer>> {
        let row = sqlx::query_as::<_, CustomerRow>(
            r#"
            UPDATE customers
            SET name = COALESCE($2, name), phone = COALESCE($3, phone),
                email = COALESCE($4, email), push_token = COALESCE($5, push_token),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&changes.name)
        .bind(&changes.phone)
        .bind(&changes.email)
        .bind(&changes.push_token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Customer::from))
    }
}

#[async_trait]
impl AdminRepository for PgStore {
    async fn find_admin(&self, id: Uuid) -> ApiResult<Option<Admin>> {
        let admin = sqlx::query_as::<_, Admin>("SELECT * FROM admins WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(admin)
    }

    async fn update_admin_profile(
        &self,
        id: Uuid,
        changes: &ProfileChanges,
    ) -> ApiResult<Option<Admin>> {
        let admin = sqlx::query_as::<_, Admin>(
            r#"
            UPDATE admins
            SET name = COALESCE($2, name), phone = COALESCE($3, phone),
                email = COALESCE($4, email), push_token = COALESCE($5, push_token),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&changes.name)
        .bind(&changes.phone)
        .bind(&changes.email)
        .bind(&changes.push_token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(admin)
    }
}

#[async_trait]
impl CatalogRepository for PgStore {
    async fn find_services(&self, ids: &[Uuid]) -> ApiResult<Vec<CatalogService>> {
        let services =
            sqlx::query_as::<_, CatalogService>("SELECT * FROM services WHERE id = ANY($1)")
                .bind(ids)
                .fetch_all(&self.pool)
                .await?;
        Ok(services)
    }
}

#[async_trait]
impl CouponRepository for PgStore {
    async fn find_coupon_by_code(&self, code: &str) -> ApiResult<Option<Coupon>> {
        let coupon = sqlx::query_as::<_, Coupon>("SELECT * FROM coupons WHERE code = UPPER($1)")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(coupon)
    }

    async fn coupon_usage(&self, coupon_id: Uuid, user_id: Uuid) -> ApiResult<i32> {
        let used: Option<(i32,)> = sqlx::query_as(
            "SELECT used_count FROM coupon_usages WHERE coupon_id = $1 AND user_id = $2",
        )
        .bind(coupon_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(used.map(|(n,)| n).unwrap_or(0))
    }

    async fn redeem_coupon(&self, coupon_id: Uuid, user_id: Uuid, limit: i32) -> ApiResult<bool> {
        // Single statement compare-and-increment; concurrent redeemers serialize on the row
        let redeemed: Option<(i32,)> = sqlx::query_as(
            r#"
            INSERT INTO coupon_usages (coupon_id, user_id, used_count)
            VALUES ($1, $2, 1)
            ON CONFLICT (coupon_id, user_id) DO UPDATE
                SET used_count = coupon_usages.used_count + 1
                WHERE coupon_usages.used_count < $3
            RETURNING used_count
            "#,
        )
        .bind(coupon_id)
        .bind(user_id)
        .bind(limit)
        .fetch_optional(&self.pool)
        .await?;
        Ok(redeemed.is_some())
    }

    async fn release_coupon(&self, coupon_id: Uuid, user_id: Uuid) -> ApiResult<()> {
        sqlx::query(
            r#"
            UPDATE coupon_usages SET used_count = GREATEST(used_count - 1, 0)
            WHERE coupon_id = $1 AND user_id = $2
            "#,
        )
        .bind(coupon_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
