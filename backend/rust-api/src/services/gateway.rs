use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::ApiError;
use crate::models::StudentPayment;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-gateway-signature";

/// Client for the external payment provider. Creates hosted checkout
/// sessions and verifies the HMAC signature on confirmation webhooks.
/// Amounts cross this boundary in GBP minor units; everywhere else the
/// system works in major-unit decimals.
pub struct GatewayClient {
    http_client: Client,
    base_url: String,
    secret: String,
}

#[derive(Debug, Serialize)]
struct CreateCheckoutPayload {
    amount_minor: i64,
    currency: &'static str,
    reference: String,
    description: String,
    success_url: String,
    cancel_url: String,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

/// Confirmation event posted to /api/payment/webhook.
#[derive(Debug, Deserialize)]
pub struct GatewayEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    /// Ledger payment id the checkout was created for
    pub reference: String,
}

pub const EVENT_CHECKOUT_COMPLETED: &str = "checkout.session.completed";
pub const EVENT_CHECKOUT_FAILED: &str = "checkout.session.failed";

impl GatewayClient {
    pub fn new(base_url: String, secret: String) -> Self {
        Self {
            http_client: Client::new(),
            base_url,
            secret,
        }
    }

    pub async fn create_checkout_session(
        &self,
        payment: &StudentPayment,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutSession, ApiError> {
        let payment_id = payment.id.ok_or(ApiError::NotFound("payment"))?;
        let url = format!("{}/v1/checkout/sessions", self.base_url);

        let payload = CreateCheckoutPayload {
            amount_minor: to_minor_units(payment.monthly_amount),
            currency: "gbp",
            reference: payment_id.to_hex(),
            description: format!(
                "Tutoring access: {} ({} sessions/month)",
                payment.subject, payment.total_sessions_per_month
            ),
            success_url: success_url.to_string(),
            cancel_url: cancel_url.to_string(),
        };

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.secret)
            .json(&payload)
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Payment gateway unreachable: {}", e);
                ApiError::Gateway("provider unreachable".to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            tracing::error!("Payment gateway returned {}: {}", status, body);
            // provider details stay in the logs, never in the client response
            return Err(ApiError::Gateway(format!("provider returned {}", status)));
        }

        let session: CheckoutSession = response.json().await.map_err(|e| {
            tracing::error!("Failed to parse gateway response: {}", e);
            ApiError::Gateway("invalid provider response".to_string())
        })?;

        tracing::info!(
            "Checkout session created: payment={} gateway_session={}",
            payment_id,
            session.id
        );
        Ok(session)
    }

    /// Constant-time verification of the webhook body signature.
    pub fn verify_signature(secret: &str, payload: &[u8], signature_hex: &str) -> bool {
        let Ok(signature) = hex::decode(signature_hex) else {
            return false;
        };
        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
        mac.update(payload);
        mac.verify_slice(&signature).is_ok()
    }

    pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }
}

/// GBP major units -> pence. Rounds to the nearest penny; the ledger keeps
/// exact decimals, only the gateway sees integers.
pub fn to_minor_units(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minor_units_round_to_the_nearest_penny() {
        assert_eq!(to_minor_units(20.0), 2000);
        assert_eq!(to_minor_units(19.99), 1999);
        assert_eq!(to_minor_units(90.0), 9000);
        assert_eq!(to_minor_units(0.004), 0);
    }

    #[test]
    fn signature_roundtrip_verifies() {
        let payload = br#"{"type":"checkout.session.completed","reference":"abc"}"#;
        let signature = GatewayClient::sign_payload("whsec_test", payload);
        assert!(GatewayClient::verify_signature(
            "whsec_test",
            payload,
            &signature
        ));
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let signature = GatewayClient::sign_payload("whsec_test", b"original");
        assert!(!GatewayClient::verify_signature(
            "whsec_test",
            b"tampered",
            &signature
        ));
    }

    #[test]
    fn wrong_secret_fails_verification() {
        let signature = GatewayClient::sign_payload("whsec_test", b"payload");
        assert!(!GatewayClient::verify_signature(
            "whsec_other",
            b"payload",
            &signature
        ));
    }

    #[test]
    fn malformed_signature_is_rejected() {
        assert!(!GatewayClient::verify_signature(
            "whsec_test",
            b"payload",
            "not-hex"
        ));
    }
}
