//! Stripe webhook handling
//!
//! Only `payment_intent.succeeded` changes state. Every other event type is
//! acknowledged and ignored so Stripe stops redelivering it.

use std::collections::HashMap;
use std::sync::Arc;

use hmac::{Hmac, Mac};
use metamind_shared::UserId;
use serde::Deserialize;
use sha2::Sha256;

use crate::confirm::USER_ID_METADATA_KEY;
use crate::error::{BillingError, BillingResult};
use crate::upgrade::{ConfirmedPayment, PaymentSource, PremiumUpgradeProcessor, UpgradeOutcome};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed webhook (5 minutes)
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

pub const PAYMENT_INTENT_SUCCEEDED: &str = "payment_intent.succeeded";

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: WebhookEventData,
}

#[derive(Debug, Deserialize)]
struct WebhookEventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct PaymentIntentObject {
    id: String,
    amount: i64,
    #[serde(default)]
    currency: Option<String>,
    status: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

/// What the handler did with a verified event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookDisposition {
    Upgraded {
        event_id: String,
        user_id: UserId,
        outcome: UpgradeOutcome,
    },
    Ignored {
        event_id: String,
        event_type: String,
    },
}

/// Verify a `Stripe-Signature` header (`t=...,v1=...`) against the raw payload.
///
/// The signed string is `"{t}.{payload}"`, keyed with the full webhook secret.
pub fn verify_signature(payload: &str, header: &str, secret: &str, now: i64) -> BillingResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        tracing::warn!("Missing timestamp in signature header");
        BillingError::WebhookSignatureInvalid
    })?;
    if signatures.is_empty() {
        tracing::warn!("Missing v1 signature in signature header");
        return Err(BillingError::WebhookSignatureInvalid);
    }

    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        tracing::warn!(
            timestamp,
            now,
            diff = (now - timestamp).abs(),
            "Webhook timestamp outside tolerance"
        );
        return Err(BillingError::WebhookSignatureInvalid);
    }

    let signed_payload = format!("{}.{}", timestamp, payload);
    for candidate in signatures {
        let Ok(expected) = hex::decode(candidate) else {
            continue;
        };
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| {
            tracing::error!("Invalid webhook secret key");
            BillingError::WebhookSignatureInvalid
        })?;
        mac.update(signed_payload.as_bytes());
        // Constant-time comparison
        if mac.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }

    tracing::warn!("Webhook signature mismatch");
    Err(BillingError::WebhookSignatureInvalid)
}

fn unix_now() -> BillingResult<i64> {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|e| BillingError::Internal(format!("System time error: {}", e)))?;
    i64::try_from(now.as_secs()).map_err(|_| BillingError::Internal("System time overflow".to_string()))
}

/// Webhook handler for Stripe events
pub struct WebhookHandler {
    webhook_secret: String,
    upgrades: Arc<PremiumUpgradeProcessor>,
}

impl WebhookHandler {
    pub fn new(webhook_secret: impl Into<String>, upgrades: Arc<PremiumUpgradeProcessor>) -> Self {
        Self {
            webhook_secret: webhook_secret.into(),
            upgrades,
        }
    }

    /// Verify, parse and dispatch one delivery
    pub async fn handle(&self, payload: &str, signature: &str) -> BillingResult<WebhookDisposition> {
        verify_signature(payload, signature, &self.webhook_secret, unix_now()?)?;
        self.handle_verified(payload).await
    }

    /// Dispatch a payload whose signature has already been checked
    pub async fn handle_verified(&self, payload: &str) -> BillingResult<WebhookDisposition> {
        let event: WebhookEvent = serde_json::from_str(payload).map_err(|e| {
            tracing::error!(parse_error = %e, "Failed to parse webhook event JSON");
            BillingError::WebhookPayload(e.to_string())
        })?;

        tracing::info!(event_id = %event.id, event_type = %event.event_type, "Received Stripe webhook");

        if event.event_type != PAYMENT_INTENT_SUCCEEDED {
            return Ok(WebhookDisposition::Ignored {
                event_id: event.id,
                event_type: event.event_type,
            });
        }

        let intent: PaymentIntentObject = serde_json::from_value(event.data.object)
            .map_err(|e| BillingError::WebhookPayload(format!("payment intent object: {}", e)))?;

        if intent.status != "succeeded" {
            tracing::warn!(
                event_id = %event.id,
                payment_intent_id = %intent.id,
                status = %intent.status,
                "Succeeded event carries a non-succeeded intent, ignoring"
            );
            return Ok(WebhookDisposition::Ignored {
                event_id: event.id,
                event_type: event.event_type,
            });
        }

        let user_id: UserId = intent
            .metadata
            .get(USER_ID_METADATA_KEY)
            .ok_or_else(|| {
                BillingError::WebhookPayload(format!(
                    "payment intent {} has no {} metadata",
                    intent.id, USER_ID_METADATA_KEY
                ))
            })?
            .parse()
            .map_err(|e| BillingError::WebhookPayload(format!("invalid userId metadata: {}", e)))?;

        let amount_cents = i32::try_from(intent.amount)
            .map_err(|_| BillingError::WebhookPayload(format!("amount {} out of range", intent.amount)))?;

        let payment = ConfirmedPayment {
            user_id,
            payment_intent_id: intent.id,
            amount_cents,
            currency: intent.currency.unwrap_or_else(|| "usd".to_string()),
            source: PaymentSource::Webhook,
        };
        let outcome = self.upgrades.apply_upgrade(&payment).await?;

        Ok(WebhookDisposition::Upgraded {
            event_id: event.id,
            user_id,
            outcome,
        })
    }
}

/// Build a valid signature header; used by tests across the workspace
pub fn sign_payload(payload: &str, secret: &str, timestamp: i64) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return format!("t={}", timestamp),
    };
    mac.update(format!("{}.{}", timestamp, payload).as_bytes());
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}
