//! Stripe client configuration

use metamind_shared::{PREMIUM_CURRENCY, PREMIUM_PRICE_CENTS};
use stripe::Client;

use crate::error::{BillingError, BillingResult};

/// Configuration for Stripe billing
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Stripe secret API key
    pub secret_key: String,
    /// Stripe webhook signing secret (`whsec_...`)
    pub webhook_secret: String,
    /// Price of one premium pack in cents
    pub premium_price_cents: i64,
    /// ISO currency code for the premium pack
    pub currency: String,
    /// Base URL of the web app (used for return URLs)
    pub app_base_url: String,
}

impl StripeConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let premium_price_cents = match std::env::var("PREMIUM_PRICE_CENTS") {
            Ok(raw) => raw.parse::<i64>().map_err(|_| {
                BillingError::Config(format!("PREMIUM_PRICE_CENTS must be an integer, got {}", raw))
            })?,
            Err(_) => i64::from(PREMIUM_PRICE_CENTS),
        };
        if premium_price_cents <= 0 {
            return Err(BillingError::Config(
                "PREMIUM_PRICE_CENTS must be positive".to_string(),
            ));
        }

        Ok(Self {
            secret_key: std::env::var("STRIPE_SECRET_KEY")
                .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?,
            webhook_secret: std::env::var("STRIPE_WEBHOOK_SECRET")
                .map_err(|_| BillingError::Config("STRIPE_WEBHOOK_SECRET not set".to_string()))?,
            premium_price_cents,
            currency: std::env::var("PREMIUM_CURRENCY")
                .unwrap_or_else(|_| PREMIUM_CURRENCY.to_string()),
            app_base_url: std::env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
        })
    }

    /// Return URL for the client-polled success page
    pub fn success_url(&self) -> String {
        format!("{}/payment/success", self.app_base_url.trim_end_matches('/'))
    }
}

/// Stripe billing client
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    config: StripeConfig,
}

impl StripeClient {
    /// Create a new Stripe client from config
    pub fn new(config: StripeConfig) -> Self {
        let client = Client::new(&config.secret_key);
        Self { client, config }
    }

    /// Create a new Stripe client from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let config = StripeConfig::from_env()?;
        Ok(Self::new(config))
    }

    /// Get the inner Stripe client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Get the config
    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_url_strips_trailing_slash() {
        let config = StripeConfig {
            secret_key: "sk_test".into(),
            webhook_secret: "whsec_test".into(),
            premium_price_cents: 399,
            currency: "usd".into(),
            app_base_url: "https://metamind.app/".into(),
        };
        assert_eq!(config.success_url(), "https://metamind.app/payment/success");
    }
}
