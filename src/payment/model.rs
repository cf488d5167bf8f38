//! Payment split models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::{ApiError, ApiResult};

/// How a booking total is being paid: an online part and a cash part
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct PaymentSplit {
    pub booking_id: String,
    /// Booking total the split settles
    pub total: i64,
    pub online_amount: i64,
    pub cash_amount: i64,
    pub online_transaction_id: Option<String>,
    pub online_paid_at: Option<DateTime<Utc>>,
    pub cash_collected_at: Option<DateTime<Utc>>,
    pub collected_by: Option<Uuid>,
    pub status: SplitStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "split_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SplitStatus {
    Pending,
    Partial,
    Completed,
}

impl SplitStatus {
    /// `completed` iff paid >= total, `partial` if anything was paid
    pub fn derive(paid: i64, total: i64) -> Self {
        if paid >= total {
            SplitStatus::Completed
        } else if paid > 0 {
            SplitStatus::Partial
        } else {
            SplitStatus::Pending
        }
    }
}

/// A gateway payment recorded against a booking.
///
/// The gateway's payment id is unique, so each one is counted at most once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct OnlinePayment {
    pub transaction_ref: String,
    pub booking_id: String,
    pub amount: i64,
    pub recorded_at: DateTime<Utc>,
}

impl OnlinePayment {
    /// Refuse a reference that was already recorded for another booking
    pub fn ensure_belongs_to(&self, booking_id: &str) -> ApiResult<()> {
        if self.booking_id != booking_id {
            return Err(ApiError::Conflict(format!(
                "Payment {} is already recorded for another booking",
                self.transaction_ref
            )));
        }
        Ok(())
    }
}

/// Amounts to add to a split in one atomic step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaymentDelta {
    pub online: i64,
    pub cash: i64,
    pub transaction_ref: Option<String>,
    pub collected_by: Option<Uuid>,
}

impl PaymentDelta {
    pub fn online(amount: i64, transaction_ref: impl Into<String>) -> Self {
        Self {
            online: amount,
            transaction_ref: Some(transaction_ref.into()),
            ..Default::default()
        }
    }

    pub fn cash(amount: i64, partner_id: Uuid) -> Self {
        Self {
            cash: amount,
            collected_by: Some(partner_id),
            ..Default::default()
        }
    }

    pub fn amount(&self) -> i64 {
        self.online + self.cash
    }

    pub fn validate(&self) -> ApiResult<()> {
        if self.online < 0 || self.cash < 0 || self.amount() <= 0 {
            return Err(ApiError::validation("Payment amount must be greater than 0"));
        }
        Ok(())
    }
}

impl PaymentSplit {
    pub fn new(booking_id: impl Into<String>, total: i64, now: DateTime<Utc>) -> Self {
        Self {
            booking_id: booking_id.into(),
            total,
            online_amount: 0,
            cash_amount: 0,
            online_transaction_id: None,
            online_paid_at: None,
            cash_collected_at: None,
            collected_by: None,
            status: SplitStatus::derive(0, total),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn paid(&self) -> i64 {
        self.online_amount + self.cash_amount
    }

    pub fn remaining(&self) -> i64 {
        (self.total - self.paid()).max(0)
    }

    /// Add a delta and recompute the status.
    ///
    /// Cash that would take the split strictly above the total is refused.
    /// Online money has already been captured by the gateway, so an online
    /// surplus is recorded as-is.
    pub fn apply(&mut self, delta: &PaymentDelta, now: DateTime<Utc>) -> ApiResult<()> {
        delta.validate()?;

        if delta.cash > 0 && self.paid() + delta.amount() > self.total {
            return Err(ApiError::Overpayment {
                attempted: delta.amount(),
                remaining: self.remaining(),
            });
        }

        if delta.online > 0 {
            self.online_amount += delta.online;
            self.online_paid_at = Some(now);
            if let Some(reference) = &delta.transaction_ref {
                self.online_transaction_id = Some(reference.clone());
            }
        }
        if delta.cash > 0 {
            self.cash_amount += delta.cash;
            self.cash_collected_at = Some(now);
            if delta.collected_by.is_some() {
                self.collected_by = delta.collected_by;
            }
        }

        self.status = SplitStatus::derive(self.paid(), self.total);
        self.updated_at = now;
        Ok(())
    }
}

/// Collection modes offered to the partner at the end of a job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CollectionMode {
    FullOnline,
    FullCash,
    Split,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CollectPaymentRequest {
    #[serde(alias = "paymentMode")]
    pub payment_mode: CollectionMode,
    #[serde(default, alias = "onlineAmount")]
    #[validate(range(min = 0))]
    pub online_amount: Option<i64>,
    #[serde(default, alias = "cashAmount")]
    #[validate(range(min = 0))]
    pub cash_amount: Option<i64>,
    /// Gateway reference for the online part
    #[serde(default, alias = "transactionId")]
    pub transaction_id: Option<String>,
}

impl CollectPaymentRequest {
    /// Resolve the request against the current split into a single delta
    pub fn to_delta(&self, split: &PaymentSplit, partner_id: Uuid) -> ApiResult<PaymentDelta> {
        let remaining = split.remaining();
        let delta = match self.payment_mode {
            CollectionMode::FullOnline => PaymentDelta {
                online: remaining,
                transaction_ref: self.transaction_id.clone(),
                ..Default::default()
            },
            CollectionMode::FullCash => PaymentDelta::cash(remaining, partner_id),
            CollectionMode::Split => {
                let online = self.online_amount.unwrap_or(0);
                let cash = self
                    .cash_amount
                    .ok_or_else(|| ApiError::validation("cash_amount is required for split"))?;
                PaymentDelta {
                    online,
                    cash,
                    transaction_ref: self.transaction_id.clone(),
                    collected_by: (cash > 0).then_some(partner_id),
                }
            }
        };
        if delta.amount() <= 0 {
            return Err(ApiError::Conflict("Booking is already fully paid".to_string()));
        }
        Ok(delta)
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyPaymentRequest {
    #[serde(alias = "bookingId")]
    #[validate(length(min = 1))]
    pub booking_id: String,
    #[validate(length(min = 1))]
    pub order_id: String,
    #[validate(length(min = 1))]
    pub payment_id: String,
    #[validate(length(min = 1))]
    pub signature: String,
    /// Must match the outstanding balance when given
    #[serde(default)]
    #[validate(range(min = 1))]
    pub amount: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PaymentFailedRequest {
    #[serde(alias = "bookingId")]
    #[validate(length(min = 1))]
    pub booking_id: String,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}
