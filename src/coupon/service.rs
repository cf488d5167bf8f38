//! Coupon service: previews and atomic per-user redemption

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::coupon::{Coupon, CouponQuote, Redemption};
use crate::error::{ApiError, ApiResult};
use crate::store::Store;

pub struct CouponService {
    store: Arc<dyn Store>,
}

impl CouponService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    async fn resolve(&self, code: &str) -> ApiResult<Coupon> {
        let code = code.trim().to_uppercase();
        self.store
            .find_coupon_by_code(&code)
            .await?
            .ok_or_else(|| ApiError::validation("Invalid coupon"))
    }

    /// Preview the discount of a coupon; records nothing
    pub async fn quote(
        &self,
        code: &str,
        price: i64,
        pincode: Option<&str>,
        user_id: Uuid,
    ) -> ApiResult<CouponQuote> {
        let coupon = self.resolve(code).await?;
        let used = self.store.coupon_usage(coupon.id, user_id).await?;
        let discount = coupon.evaluate(price, pincode, used, Utc::now())?;

        Ok(CouponQuote {
            coupon_id: coupon.id,
            code: coupon.code,
            price,
            discount,
            final_price: price - discount,
        })
    }

    /// Validate and consume one use of the coupon for the user
    pub async fn redeem(
        &self,
        code: &str,
        price: i64,
        pincode: Option<&str>,
        user_id: Uuid,
    ) -> ApiResult<Redemption> {
        let coupon = self.resolve(code).await?;
        let used = self.store.coupon_usage(coupon.id, user_id).await?;
        let discount = coupon.evaluate(price, pincode, used, Utc::now())?;

        // The usage read above may be stale; the store re-checks the limit atomically.
        if !self
            .store
            .redeem_coupon(coupon.id, user_id, coupon.limit_per_user)
            .await?
        {
            return Err(ApiError::Conflict("Coupon usage limit reached".to_string()));
        }

        tracing::info!(code = %coupon.code, user_id = %user_id, discount, "Coupon redeemed");

        Ok(Redemption {
            coupon_id: coupon.id,
            user_id,
            code: coupon.code,
            discount,
        })
    }

    /// Give back a redemption whose booking was never persisted
    pub async fn release(&self, redemption: &Redemption) {
        if let Err(e) = self
            .store
            .release_coupon(redemption.coupon_id, redemption.user_id)
            .await
        {
            tracing::error!(
                code = %redemption.code,
                user_id = %redemption.user_id,
                error = %e,
                "Failed to release coupon redemption"
            );
        }
    }
}
