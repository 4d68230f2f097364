//! Payment confirmation with the processor
//!
//! The client-polled path only has a payment intent id from the browser, so
//! the charge is looked up with Stripe before any grant is applied.

use async_trait::async_trait;
use metamind_shared::UserId;
use stripe::{PaymentIntent, PaymentIntentId, PaymentIntentStatus};

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::upgrade::{ConfirmedPayment, PaymentSource};

/// Metadata key carrying the purchasing user's id
pub const USER_ID_METADATA_KEY: &str = "userId";

#[async_trait]
pub trait PaymentConfirmer: Send + Sync {
    /// Confirm that `payment_intent_id` succeeded and belongs to `user_id`
    async fn confirm(&self, user_id: UserId, payment_intent_id: &str) -> BillingResult<ConfirmedPayment>;
}

pub struct StripePaymentConfirmer {
    stripe: StripeClient,
}

impl StripePaymentConfirmer {
    pub fn new(stripe: StripeClient) -> Self {
        Self { stripe }
    }
}

#[async_trait]
impl PaymentConfirmer for StripePaymentConfirmer {
    async fn confirm(&self, user_id: UserId, payment_intent_id: &str) -> BillingResult<ConfirmedPayment> {
        let id = payment_intent_id
            .parse::<PaymentIntentId>()
            .map_err(|e| BillingError::InvalidInput(format!("Invalid payment intent ID: {}", e)))?;

        let intent = PaymentIntent::retrieve(self.stripe.inner(), &id, &[]).await?;

        if intent.status != PaymentIntentStatus::Succeeded {
            return Err(BillingError::PaymentNotConfirmed(format!(
                "payment intent {} has status {:?}",
                payment_intent_id, intent.status
            )));
        }

        let owner = intent.metadata.get(USER_ID_METADATA_KEY).map(String::as_str);
        check_owner(user_id, owner)?;

        let amount_cents = i32::try_from(intent.amount)
            .map_err(|_| BillingError::InvalidInput(format!("amount {} out of range", intent.amount)))?;

        Ok(ConfirmedPayment {
            user_id,
            payment_intent_id: intent.id.to_string(),
            amount_cents,
            currency: intent.currency.to_string(),
            source: PaymentSource::ClientPoll,
        })
    }
}

/// The intent's metadata must name the caller
pub(crate) fn check_owner(user_id: UserId, owner: Option<&str>) -> BillingResult<()> {
    match owner {
        Some(owner) if owner == user_id.to_string() => Ok(()),
        Some(owner) => {
            tracing::warn!(
                user_id = %user_id,
                metadata_user_id = %owner,
                "Payment intent belongs to a different user"
            );
            Err(BillingError::Unauthorized(
                "payment intent belongs to a different user".to_string(),
            ))
        }
        None => Err(BillingError::Unauthorized(
            "payment intent has no user metadata".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_must_match() {
        let user = UserId::new();
        assert!(check_owner(user, Some(&user.to_string())).is_ok());
        assert!(matches!(
            check_owner(user, Some("someone-else")),
            Err(BillingError::Unauthorized(_))
        ));
        assert!(matches!(check_owner(user, None), Err(BillingError::Unauthorized(_))));
    }
}
