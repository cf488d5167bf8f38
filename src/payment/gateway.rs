//! Payment gateway signature verification

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// The only gateway capability the backend consumes
pub trait PaymentGateway: Send + Sync {
    fn verify_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> bool;
}

/// Razorpay style checkout signatures: hex(HMAC-SHA256(secret, "order_id|payment_id"))
pub struct RazorpayVerifier {
    secret: String,
}

impl RazorpayVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn sign(&self, order_id: &str, payment_id: &str) -> Option<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes()).ok()?;
        mac.update(format!("{}|{}", order_id, payment_id).as_bytes());
        Some(hex::encode(mac.finalize().into_bytes()))
    }
}

impl PaymentGateway for RazorpayVerifier {
    fn verify_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> bool {
        if self.secret.is_empty() {
            tracing::warn!("Payment gateway secret not configured, rejecting signature");
            return false;
        }
        let Ok(expected) = hex::decode(signature.trim()) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(self.secret.as_bytes()) else {
            return false;
        };
        mac.update(format!("{}|{}", order_id, payment_id).as_bytes());
        mac.verify_slice(&expected).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_round_trip() {
        let gateway = RazorpayVerifier::new("gateway-secret");
        let signature = gateway.sign("order_1", "pay_1").unwrap();
        assert_eq!(signature.len(), 64);
        assert!(gateway.verify_signature("order_1", "pay_1", &signature));
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let gateway = RazorpayVerifier::new("gateway-secret");
        let signature = gateway.sign("order_1", "pay_1").unwrap();
        assert!(!gateway.verify_signature("order_1", "pay_2", &signature));
        assert!(!gateway.verify_signature("order_1", "pay_1", "not-hex"));
        assert!(!RazorpayVerifier::new("other").verify_signature("order_1", "pay_1", &signature));
    }

    #[test]
    fn test_missing_secret_rejects_everything() {
        let signer = RazorpayVerifier::new("gateway-secret");
        let signature = signer.sign("order_1", "pay_1").unwrap();
        assert!(!RazorpayVerifier::new("").verify_signature("order_1", "pay_1", &signature));
    }
}
