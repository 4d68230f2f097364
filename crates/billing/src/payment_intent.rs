//! Payment intent creation for the premium pack

use std::collections::HashMap;

use metamind_shared::UserId;
use serde::Serialize;
use stripe::{
    CreatePaymentIntent, CreatePaymentIntentAutomaticPaymentMethods, Currency, PaymentIntent,
};

use crate::client::StripeClient;
use crate::confirm::USER_ID_METADATA_KEY;
use crate::error::{BillingError, BillingResult};

/// What the browser needs to confirm the payment
#[derive(Debug, Clone, Serialize)]
pub struct PaymentIntentResponse {
    pub client_secret: String,
    pub payment_intent_id: String,
    pub amount_cents: i64,
    pub currency: String,
}

#[derive(Clone)]
pub struct PaymentIntentService {
    stripe: StripeClient,
}

impl PaymentIntentService {
    pub fn new(stripe: StripeClient) -> Self {
        Self { stripe }
    }

    /// Create a premium-pack payment intent tagged with the buyer's user id
    pub async fn create_for_user(
        &self,
        user_id: UserId,
        email: Option<&str>,
    ) -> BillingResult<PaymentIntentResponse> {
        let config = self.stripe.config();
        let currency = parse_currency(&config.currency)?;

        let mut metadata = HashMap::new();
        metadata.insert(USER_ID_METADATA_KEY.to_string(), user_id.to_string());

        let mut params = CreatePaymentIntent::new(config.premium_price_cents, currency);
        params.metadata = Some(metadata);
        params.receipt_email = email;
        params.description = Some("MetaMind premium prompt pack");
        params.automatic_payment_methods = Some(CreatePaymentIntentAutomaticPaymentMethods {
            allow_redirects: None,
            enabled: true,
        });

        let intent = PaymentIntent::create(self.stripe.inner(), params).await?;

        let client_secret = intent.client_secret.clone().ok_or_else(|| {
            BillingError::StripeApi("payment intent created without a client secret".to_string())
        })?;

        tracing::info!(
            user_id = %user_id,
            payment_intent_id = %intent.id,
            amount_cents = config.premium_price_cents,
            "Created payment intent"
        );

        Ok(PaymentIntentResponse {
            client_secret,
            payment_intent_id: intent.id.to_string(),
            amount_cents: config.premium_price_cents,
            currency: config.currency.to_lowercase(),
        })
    }
}

fn parse_currency(code: &str) -> BillingResult<Currency> {
    match code.trim().to_lowercase().as_str() {
        "usd" => Ok(Currency::USD),
        "eur" => Ok(Currency::EUR),
        "gbp" => Ok(Currency::GBP),
        "cad" => Ok(Currency::CAD),
        "aud" => Ok(Currency::AUD),
        other => Err(BillingError::Config(format!("Unsupported currency: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_currency() {
        assert_eq!(parse_currency("USD").unwrap(), Currency::USD);
        assert_eq!(parse_currency(" eur ").unwrap(), Currency::EUR);
        assert!(matches!(parse_currency("xyz"), Err(BillingError::Config(_))));
    }
}
