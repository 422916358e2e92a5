use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use metrics::counter;
use sha2::Sha256;
use tracing::{error, warn};

use crate::config::AppConfig;
use crate::errors::ServiceError;

type HmacSha256 = Hmac<Sha256>;

/// Authenticates webhook deliveries: HMAC-SHA256 of the raw body, hex
/// encoded in the provider's signature header.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Option<String>,
    bypass: bool,
    header: &'static str,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("secret", &self.secret.as_ref().map(|_| "***"))
            .field("bypass", &self.bypass)
            .field("header", &self.header)
            .finish()
    }
}

impl WebhookVerifier {
    pub fn new(secret: Option<String>, bypass: bool, header: &'static str) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
            bypass,
            header,
        }
    }

    /// Bypass is only honoured outside production.
    pub fn from_config(cfg: &AppConfig, header: &'static str) -> Self {
        Self::new(
            cfg.payment_webhook_secret.clone(),
            cfg.signature_bypass_enabled(),
            header,
        )
    }

    pub fn header(&self) -> &'static str {
        self.header
    }

    /// Checks the signature over the exact bytes received. Must run before
    /// the body is parsed.
    pub fn verify(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), ServiceError> {
        if self.bypass {
            warn!(header = self.header, "webhook signature verification bypassed");
            return Ok(());
        }
        let secret = self.secret.as_deref().ok_or_else(|| {
            error!("payment_webhook_secret is not configured, rejecting webhook");
            ServiceError::Misconfigured("webhook secret is not configured".to_string())
        })?;

        let provided = headers
            .get(self.header)
            .and_then(|value| value.to_str().ok())
            .and_then(extract_signature)
            .ok_or_else(|| reject(self.header, "missing or malformed signature header"))?;
        let provided =
            hex::decode(provided).map_err(|_| reject(self.header, "signature is not hex"))?;

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| ServiceError::InternalError(format!("HMAC key rejected: {}", e)))?;
        mac.update(body);
        mac.verify_slice(&provided)
            .map_err(|_| reject(self.header, "signature mismatch"))
    }
}

fn reject(header: &str, reason: &str) -> ServiceError {
    warn!(header, reason, "rejected webhook, potential attack");
    counter!("daylove_webhooks_rejected_total", 1);
    ServiceError::Unauthenticated(format!("webhook {}", reason))
}

/// Accepts `<hex>`, `sha256=<hex>` and `ts=..,v1=<hex>` header forms.
fn extract_signature(raw: &str) -> Option<&str> {
    let raw = raw.trim();
    if raw.contains("v1=") {
        return raw
            .split(',')
            .filter_map(|part| part.trim().split_once('='))
            .find(|(key, _)| *key == "v1")
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty());
    }
    let value = raw.strip_prefix("sha256=").unwrap_or(raw);
    (!value.is_empty()).then_some(value)
}

/// HMAC signature generator for webhook payloads
pub struct SignatureGenerator {
    secret: String,
}

impl SignatureGenerator {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Hex HMAC-SHA256 of `body`
    pub fn sign(&self, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }
}
