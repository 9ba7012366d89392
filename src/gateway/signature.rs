//! HMAC-SHA256 signatures used by the gateway on checkout callbacks and
//! webhooks. Signatures travel hex encoded; comparison goes through
//! `Mac::verify_slice`, which is constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub fn sign(secret: &str, message: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

pub fn verify(secret: &str, message: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(message);
    mac.verify_slice(&expected).is_ok()
}

fn payment_message(gateway_order_id: &str, payment_id: &str) -> String {
    format!("{gateway_order_id}|{payment_id}")
}

pub fn sign_payment(secret: &str, gateway_order_id: &str, payment_id: &str) -> String {
    sign(secret, payment_message(gateway_order_id, payment_id).as_bytes())
}

pub fn verify_payment(
    secret: &str,
    gateway_order_id: &str,
    payment_id: &str,
    signature: &str,
) -> bool {
    verify(
        secret,
        payment_message(gateway_order_id, payment_id).as_bytes(),
        signature,
    )
}

pub fn sign_webhook(secret: &str, payload: &[u8]) -> String {
    sign(secret, payload)
}

pub fn verify_webhook(secret: &str, payload: &[u8], signature: &str) -> bool {
    verify(secret, payload, signature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_signature_round_trip() {
        let sig = sign_payment("key_secret", "order_1", "pay_1");
        assert!(verify_payment("key_secret", "order_1", "pay_1", &sig));
        assert!(!verify_payment("key_secret", "order_1", "pay_2", &sig));
        assert!(!verify_payment("other_secret", "order_1", "pay_1", &sig));
    }

    #[test]
    fn webhook_signature_covers_exact_bytes() {
        let body = br#"{"event":"payment.captured"}"#;
        let sig = sign_webhook("whsec", body);
        assert!(verify_webhook("whsec", body, &sig));
        assert!(!verify_webhook("whsec", br#"{"event":"payment.captured" }"#, &sig));
    }

    #[test]
    fn rejects_non_hex_signature() {
        assert!(!verify("secret", b"message", "not-hex"));
        assert!(!verify("secret", b"message", ""));
    }

    #[test]
    fn known_vector() {
        // RFC 4231 test case 2
        let sig = sign("Jefe", b"what do ya want for nothing?");
        assert_eq!(
            sig,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }
}
