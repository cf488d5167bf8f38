//! Derived booking fields: pricing, schedule, identifiers and OTPs

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use rand::Rng;
use regex::Regex;
use std::sync::OnceLock;

use crate::booking::{Pricing, ServiceLine};
use crate::error::{ApiError, ApiResult};
use crate::models::CatalogService;

impl ServiceLine {
    pub fn snapshot(service: &CatalogService) -> Self {
        Self {
            service_id: service.id,
            name: service.name.clone(),
            description: service.description.clone(),
            price: service.price,
            tax: service.tax,
            charges: service.charges,
            discount: service.discount,
            duration_minutes: service.duration_minutes,
        }
    }
}

impl Pricing {
    /// Sum the per-service amounts of the booked lines
    pub fn from_lines(lines: &[ServiceLine]) -> Self {
        let mut pricing = Pricing::default();
        for line in lines {
            pricing.subtotal += line.price;
            pricing.tax += line.tax;
            pricing.charges += line.charges;
            pricing.discount += line.discount;
        }
        pricing.discount = pricing.discount.min(pricing.gross()).max(0);
        pricing.total = pricing.gross() - pricing.discount;
        pricing
    }

    /// Amount before any discount
    pub fn gross(&self) -> i64 {
        self.subtotal + self.tax + self.charges
    }

    /// Add a coupon discount; the combined discount never exceeds the gross amount
    pub fn apply_coupon(&mut self, code: &str, coupon_discount: i64) {
        self.discount = (self.discount + coupon_discount.max(0)).min(self.gross());
        self.total = self.gross() - self.discount;
        self.coupon_code = Some(code.to_string());
    }
}

/// Human readable booking id, e.g. `MWG00007`
pub fn format_booking_id(prefix: &str, sequence: i64) -> String {
    format!("{}{:05}", prefix, sequence)
}

/// Random four digit code in 1000..=9999
pub fn generate_otp() -> String {
    rand::thread_rng().gen_range(1000..=9999).to_string()
}

fn pincode_regex() -> Option<&'static Regex> {
    static PINCODE: OnceLock<Option<Regex>> = OnceLock::new();
    PINCODE
        .get_or_init(|| Regex::new(r"\b\d{6}\b").ok())
        .as_ref()
}

/// First standalone six digit group in a freeform address
pub fn extract_pincode(address: &str) -> Option<String> {
    pincode_regex()?
        .find(address)
        .map(|m| m.as_str().to_string())
}

pub fn is_valid_pincode(pincode: &str) -> bool {
    pincode.len() == 6 && pincode.chars().all(|c| c.is_ascii_digit())
}

/// Combine the scheduled date and `HH:MM` in the given offset into an instant
pub fn scheduled_instant(
    date: &str,
    time: &str,
    offset: &FixedOffset,
) -> ApiResult<(NaiveDate, String, DateTime<Utc>)> {
    let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::validation("Date must be formatted as YYYY-MM-DD"))?;
    let time = NaiveTime::parse_from_str(time.trim(), "%H:%M")
        .map_err(|_| ApiError::validation("Time must be formatted as HH:MM"))?;

    let local = offset
        .from_local_datetime(&date.and_time(time))
        .single()
        .ok_or_else(|| ApiError::validation("Scheduled time is not representable"))?;

    Ok((date, time.format("%H:%M").to_string(), local.with_timezone(&Utc)))
}

/// Scheduled instant plus the sum of service durations
pub fn estimated_completion(scheduled_at: DateTime<Utc>, lines: &[ServiceLine]) -> DateTime<Utc> {
    let minutes: i64 = lines.iter().map(|l| l.duration_minutes.max(0)).sum();
    scheduled_at + Duration::minutes(minutes)
}
