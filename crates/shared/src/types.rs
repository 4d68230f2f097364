//! Common types used across MetaMind

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Quota Constants
// =============================================================================

/// Prompts available to a user who has never paid
pub const FREE_PROMPT_LIMIT: i32 = 5;

/// Prompts added to the limit by one successful payment
pub const PREMIUM_PROMPT_BONUS: i32 = 150;

/// Price of one premium pack in cents ($3.99)
pub const PREMIUM_PRICE_CENTS: i32 = 399;

/// Currency used for premium packs
pub const PREMIUM_CURRENCY: &str = "usd";

// =============================================================================
// ID Wrappers
// =============================================================================

/// User ID wrapper (the auth provider's subject id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for UserId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for UserId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Target tool a generated prompt is written for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR")]
pub enum ToolType {
    V0,
    Cursor,
    Bolt,
    Tempo,
    Lovable,
}

impl ToolType {
    pub const ALL: [ToolType; 5] = [
        ToolType::V0,
        ToolType::Cursor,
        ToolType::Bolt,
        ToolType::Tempo,
        ToolType::Lovable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V0 => "V0",
            Self::Cursor => "Cursor",
            Self::Bolt => "Bolt",
            Self::Tempo => "Tempo",
            Self::Lovable => "Lovable",
        }
    }
}

impl std::fmt::Display for ToolType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ToolType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "v0" => Ok(Self::V0),
            "cursor" => Ok(Self::Cursor),
            "bolt" => Ok(Self::Bolt),
            "tempo" => Ok(Self::Tempo),
            "lovable" => Ok(Self::Lovable),
            _ => Err(format!("Invalid tool type: {}", s)),
        }
    }
}

/// Status written to the payment ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Confirmed by the processor's webhook
    Succeeded,
    /// Confirmed by the client-polled success page
    Completed,
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

// =============================================================================
// Database Models
// =============================================================================

/// Per-user quota and premium state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Profile {
    pub id: Uuid,
    pub name: Option<String>,
    pub email: Option<String>,
    pub prompt_count: i32,
    pub total_prompts_limit: i32,
    pub is_premium: bool,
    pub has_prompt_history_access: bool,
    /// Start of the current free allowance window (only moves under rolling resets)
    pub allowance_period_start: OffsetDateTime,
    /// Payment intent whose grant was applied last
    pub last_payment_intent_id: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Profile {
    /// Fresh free-tier profile as created at signup
    pub fn new_free(user_id: UserId, email: Option<String>, now: OffsetDateTime) -> Self {
        Self {
            id: user_id.0,
            name: None,
            email,
            prompt_count: 0,
            total_prompts_limit: FREE_PROMPT_LIMIT,
            is_premium: false,
            has_prompt_history_access: false,
            allowance_period_start: now,
            last_payment_intent_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn user_id(&self) -> UserId {
        UserId(self.id)
    }
}

/// Partial profile update; `None` leaves a column untouched (last write wins)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub prompt_count: Option<i32>,
    pub total_prompts_limit: Option<i32>,
    pub is_premium: Option<bool>,
    pub has_prompt_history_access: Option<bool>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.prompt_count.is_none()
            && self.total_prompts_limit.is_none()
            && self.is_premium.is_none()
            && self.has_prompt_history_access.is_none()
    }

    /// Apply the set fields to an in-memory profile
    pub fn apply_to(&self, profile: &mut Profile) {
        if let Some(name) = &self.name {
            profile.name = Some(name.clone());
        }
        if let Some(count) = self.prompt_count {
            profile.prompt_count = count;
        }
        if let Some(limit) = self.total_prompts_limit {
            profile.total_prompts_limit = limit;
        }
        if let Some(premium) = self.is_premium {
            profile.is_premium = premium;
        }
        if let Some(access) = self.has_prompt_history_access {
            profile.has_prompt_history_access = access;
        }
    }
}

/// Conditional premium grant.
///
/// Applied only while the profile still holds `expected_limit` and
/// `expected_premium` and the grant for `payment_intent_id` has not been
/// applied yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PremiumGrant {
    pub user_id: UserId,
    pub payment_intent_id: String,
    pub expected_limit: i32,
    pub expected_premium: bool,
    pub new_limit: i32,
    pub reset_prompt_count: bool,
}

/// Result of a conditional premium grant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantOutcome {
    /// The grant was written; carries the updated profile
    Applied(Profile),
    /// The profile already carries this payment intent's grant
    AlreadyApplied(Profile),
    /// The profile changed since it was read; re-read and recompute
    Conflict,
}

/// Generated prompt, stored once per successful generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PromptHistoryEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub message: String,
    pub ai_response: String,
    pub tool_type: ToolType,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPromptHistoryEntry {
    pub user_id: UserId,
    pub message: String,
    pub ai_response: String,
    pub tool_type: ToolType,
}

/// Completed charge, unique per payment intent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount_cents: i32,
    pub currency: String,
    pub status: PaymentStatus,
    pub payment_intent_id: String,
    pub created_at: OffsetDateTime,
}

impl PaymentRecord {
    /// Amount in major currency units (e.g. 3.99)
    pub fn amount(&self) -> f64 {
        f64::from(self.amount_cents) / 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPaymentRecord {
    pub user_id: UserId,
    pub amount_cents: i32,
    pub currency: String,
    pub status: PaymentStatus,
    pub payment_intent_id: String,
}

impl NewPaymentRecord {
    /// Ledger row for one premium pack
    pub fn premium_pack(user_id: UserId, payment_intent_id: &str, status: PaymentStatus) -> Self {
        Self {
            user_id,
            amount_cents: PREMIUM_PRICE_CENTS,
            currency: PREMIUM_CURRENCY.to_string(),
            status,
            payment_intent_id: payment_intent_id.to_string(),
        }
    }
}

/// Result of a ledger insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Inserted(PaymentRecord),
    /// A row for this payment intent already exists
    Duplicate,
}

// =============================================================================
// Audit Rows
// =============================================================================

/// Payment whose owner is not flagged premium
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct UnappliedPayment {
    pub user_id: Uuid,
    pub payment_intent_id: String,
    pub created_at: OffsetDateTime,
}

/// Profile whose counter is above its limit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct OverdrawnProfile {
    pub user_id: Uuid,
    pub prompt_count: i32,
    pub total_prompts_limit: i32,
    pub is_premium: bool,
}

/// Profile whose counter trails its history rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct CounterDrift {
    pub user_id: Uuid,
    pub prompt_count: i32,
    pub history_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_type_parse_is_case_insensitive() {
        assert_eq!("v0".parse::<ToolType>().unwrap(), ToolType::V0);
        assert_eq!("CURSOR".parse::<ToolType>().unwrap(), ToolType::Cursor);
        assert_eq!(" Lovable ".parse::<ToolType>().unwrap(), ToolType::Lovable);
        assert!("windsurf".parse::<ToolType>().is_err());
    }

    #[test]
    fn test_tool_type_serializes_with_exact_names() {
        let json = serde_json::to_string(&ToolType::Tempo).unwrap();
        assert_eq!(json, "\"Tempo\"");
        for tool in ToolType::ALL {
            assert_eq!(tool.to_string(), tool.as_str());
        }
    }

    #[test]
    fn test_new_free_profile_defaults() {
        let now = OffsetDateTime::now_utc();
        let profile = Profile::new_free(UserId::new(), None, now);
        assert_eq!(profile.prompt_count, 0);
        assert_eq!(profile.total_prompts_limit, FREE_PROMPT_LIMIT);
        assert!(!profile.is_premium);
        assert!(!profile.has_prompt_history_access);
        assert_eq!(profile.allowance_period_start, now);
    }

    #[test]
    fn test_profile_update_applies_only_set_fields() {
        let mut profile = Profile::new_free(UserId::new(), None, OffsetDateTime::now_utc());
        let update = ProfileUpdate {
            name: Some("Ada".into()),
            prompt_count: Some(3),
            ..Default::default()
        };
        assert!(!update.is_empty());
        update.apply_to(&mut profile);
        assert_eq!(profile.name.as_deref(), Some("Ada"));
        assert_eq!(profile.prompt_count, 3);
        assert_eq!(profile.total_prompts_limit, FREE_PROMPT_LIMIT);
        assert!(ProfileUpdate::default().is_empty());
    }

    #[test]
    fn test_premium_pack_amount() {
        let record = NewPaymentRecord::premium_pack(UserId::new(), "pi_123", PaymentStatus::Succeeded);
        assert_eq!(record.amount_cents, 399);
        assert_eq!(record.currency, "usd");

        let stored = PaymentRecord {
            id: Uuid::new_v4(),
            user_id: record.user_id.0,
            amount_cents: record.amount_cents,
            currency: record.currency,
            status: record.status,
            payment_intent_id: record.payment_intent_id,
            created_at: OffsetDateTime::now_utc(),
        };
        assert!((stored.amount() - 3.99).abs() < f64::EPSILON);
    }

    #[test]
    fn test_payment_status_display() {
        assert_eq!(PaymentStatus::Succeeded.to_string(), "succeeded");
        assert_eq!(PaymentStatus::Completed.to_string(), "completed");
    }

    #[test]
    fn test_user_id_parse() {
        let uuid = Uuid::new_v4();
        let parsed: UserId = uuid.to_string().parse().unwrap();
        assert_eq!(parsed, UserId(uuid));
        assert!("not-a-uuid".parse::<UserId>().is_err());
    }
}
