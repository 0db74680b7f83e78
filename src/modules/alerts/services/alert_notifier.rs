// Outbound webhook delivery for alerts.
//
// Pending alerts are POSTed as JSON with an HMAC-SHA256 signature of the
// body in X-Signature, so receivers can verify origin. Delivery is
// best-effort per alert; failures are left unsent and retried on the next
// process_alerts run.

use std::sync::Arc;
use std::time::Duration;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{info, warn};

use crate::config::AlertConfig;
use crate::core::Result;
use crate::modules::alerts::repositories::alert_repository::AlertRepository;

type HmacSha256 = Hmac<Sha256>;

pub struct AlertNotifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
    secret: Option<String>,
}

impl AlertNotifier {
    pub fn new(config: &AlertConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            webhook_url: config.webhook_url.clone(),
            secret: config.webhook_secret.clone(),
        }
    }

    /// Deliver every unsent active alert. Returns the number delivered.
    pub async fn deliver_pending(&self, repo: &Arc<dyn AlertRepository>) -> Result<u64> {
        let Some(url) = &self.webhook_url else {
            // Delivery disabled: mark alerts sent so they don't pile up
            let pending = repo.unsent_active().await?;
            for alert in &pending {
                repo.mark_sent(&alert.id).await?;
            }
            return Ok(0);
        };

        let pending = repo.unsent_active().await?;
        let mut delivered = 0u64;

        for alert in pending {
            let body = serde_json::to_string(&alert)?;
            let mut request = self
                .client
                .post(url)
                .header("Content-Type", "application/json");

            if let Some(secret) = &self.secret {
                request = request.header("X-Signature", sign_payload(secret, &body));
            }

            match request.body(body).send().await {
                Ok(response) if response.status().is_success() => {
                    repo.mark_sent(&alert.id).await?;
                    delivered += 1;
                }
                Ok(response) => {
                    warn!(
                        alert_id = %alert.id,
                        status = %response.status(),
                        "Alert webhook rejected, will retry next run"
                    );
                }
                Err(e) => {
                    warn!(alert_id = %alert.id, error = %e, "Alert webhook unreachable");
                }
            }
        }

        if delivered > 0 {
            info!(delivered, "Alerts delivered to webhook");
        }
        Ok(delivered)
    }
}

/// Hex HMAC-SHA256 of the payload
pub fn sign_payload(secret: &str, payload: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_is_deterministic_hex() {
        let a = sign_payload("secret", r#"{"id":"x"}"#);
        let b = sign_payload("secret", r#"{"id":"x"}"#);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_signature_varies_with_secret() {
        let a = sign_payload("secret-a", "payload");
        let b = sign_payload("secret-b", "payload");
        assert_ne!(a, b);
    }
}
