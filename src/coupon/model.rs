//! Coupon models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::{ApiError, ApiResult};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Coupon {
    pub id: Uuid,
    pub name: String,
    /// Stored uppercase, unique
    pub code: String,
    pub scope: CouponScope,
    /// Only consulted for franchise-wise coupons
    pub pincodes: Vec<String>,
    pub limit_per_user: i32,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub discount_type: DiscountType,
    pub discount_value: i64,
    /// Cap for percentage coupons; 0 means uncapped
    pub max_discount: i64,
    pub min_amount: i64,
    pub status: CouponStatus,
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "coupon_scope")]
pub enum CouponScope {
    All,
    #[serde(rename = "Franchise-wise")]
    #[sqlx(rename = "Franchise-wise")]
    FranchiseWise,
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "discount_type")]
pub enum DiscountType {
    Percentage,
    Flat,
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "coupon_status")]
pub enum CouponStatus {
    Active,
    Block,
}

impl Coupon {
    /// Discount for `price`, without looking at per-user usage
    pub fn discount_for(&self, price: i64) -> i64 {
        let raw = match self.discount_type {
            DiscountType::Percentage => {
                let pct = price * self.discount_value / 100;
                if self.max_discount > 0 {
                    pct.min(self.max_discount)
                } else {
                    pct
                }
            }
            DiscountType::Flat => self.discount_value,
        };
        raw.clamp(0, price.max(0))
    }

    /// Check that the coupon applies to this order and return its discount
    pub fn evaluate(
        &self,
        price: i64,
        pincode: Option<&str>,
        used_count: i32,
        now: DateTime<Utc>,
    ) -> ApiResult<i64> {
        if self.status != CouponStatus::Active {
            return Err(ApiError::validation("Coupon is not active"));
        }
        if now < self.start_date {
            return Err(ApiError::validation("Coupon is not valid yet"));
        }
        if now > self.end_date {
            return Err(ApiError::validation("Coupon has expired"));
        }
        if price < self.min_amount {
            return Err(ApiError::validation(format!(
                "Minimum order amount for this coupon is {}",
                self.min_amount
            )));
        }
        if self.scope == CouponScope::FranchiseWise {
            let in_scope = pincode.is_some_and(|p| self.pincodes.iter().any(|c| c == p));
            if !in_scope {
                return Err(ApiError::validation(
                    "Coupon is not valid for this service area",
                ));
            }
        }
        if used_count >= self.limit_per_user {
            return Err(ApiError::Conflict("Coupon usage limit reached".to_string()));
        }
        Ok(self.discount_for(price))
    }
}

/// Request DTO for previewing a coupon
#[derive(Debug, Deserialize, Validate)]
pub struct ApplyCouponRequest {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    #[validate(range(min = 0))]
    pub price: i64,
    pub pincode: Option<String>,
}

/// Preview of a coupon on an order amount
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CouponQuote {
    pub coupon_id: Uuid,
    pub code: String,
    pub price: i64,
    pub discount: i64,
    pub final_price: i64,
}

/// A successful redemption, kept so it can be released if booking creation fails
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redemption {
    pub coupon_id: Uuid,
    pub user_id: Uuid,
    pub code: String,
    pub discount: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn coupon(discount_type: DiscountType, value: i64, max: i64) -> Coupon {
        Coupon {
            id: Uuid::new_v4(),
            name: "Monsoon".to_string(),
            code: "MONSOON".to_string(),
            scope: CouponScope::All,
            pincodes: vec![],
            limit_per_user: 1,
            start_date: Utc::now() - Duration::days(1),
            end_date: Utc::now() + Duration::days(1),
            discount_type,
            discount_value: value,
            max_discount: max,
            min_amount: 100,
            status: CouponStatus::Active,
        }
    }

    #[test]
    fn test_percentage_discount_is_capped() {
        let c = coupon(DiscountType::Percentage, 20, 50);
        assert_eq!(c.discount_for(200), 40);
        assert_eq!(c.discount_for(1000), 50);
        let uncapped = coupon(DiscountType::Percentage, 20, 0);
        assert_eq!(uncapped.discount_for(1000), 200);
    }

    #[test]
    fn test_flat_discount_never_exceeds_price() {
        let c = coupon(DiscountType::Flat, 150, 0);
        assert_eq!(c.discount_for(500), 150);
        assert_eq!(c.discount_for(120), 120);
    }

    #[test]
    fn test_evaluate_checks() {
        let now = Utc::now();
        let c = coupon(DiscountType::Flat, 50, 0);
        assert_eq!(c.evaluate(500, None, 0, now).unwrap(), 50);
        assert!(matches!(
            c.evaluate(50, None, 0, now),
            Err(ApiError::ValidationError(_))
        ));
        assert!(matches!(
            c.evaluate(500, None, 1, now),
            Err(ApiError::Conflict(_))
        ));
        assert!(c.evaluate(500, None, 0, now + Duration::days(2)).is_err());

        let mut blocked = c.clone();
        blocked.status = CouponStatus::Block;
        assert!(blocked.evaluate(500, None, 0, now).is_err());
    }

    #[test]
    fn test_franchise_scope_requires_pincode() {
        let now = Utc::now();
        let mut c = coupon(DiscountType::Flat, 50, 0);
        c.scope = CouponScope::FranchiseWise;
        c.pincodes = vec!["560001".to_string()];
        assert!(c.evaluate(500, Some("560001"), 0, now).is_ok());
        assert!(c.evaluate(500, Some("110001"), 0, now).is_err());
        assert!(c.evaluate(500, None, 0, now).is_err());
    }
}
