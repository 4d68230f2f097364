//! Quota and Ledger Invariants
//!
//! Read-only consistency checks over profiles, prompt history and payments.
//! The worker runs them on a schedule; violations are reported, never repaired.

use std::sync::Arc;

use metamind_shared::LedgerAudit;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// User(s) affected
    pub user_ids: Vec<Uuid>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// A user paid and did not get what they paid for
    Critical,
    /// A paying user was served prompts beyond what they bought
    High,
    /// Usage may be under-reported
    Medium,
    /// Tolerated state, informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    #[serde(with = "time::serde::rfc3339")]
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

pub struct InvariantChecker {
    audit: Arc<dyn LedgerAudit>,
}

impl InvariantChecker {
    pub fn new(audit: Arc<dyn LedgerAudit>) -> Self {
        Self { audit }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_payments_grant_premium().await?);
        violations.extend(self.check_count_within_limit().await?);
        violations.extend(self.check_counter_tracks_history().await?);

        let checks_run = Self::available_checks().len();
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed: checks_run - checks_failed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Every ledger row must belong to a premium profile
    async fn check_payments_grant_premium(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows = self.audit.payments_without_premium().await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "payments_grant_premium".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "Payment {} is recorded but the profile is not premium",
                    row.payment_intent_id
                ),
                context: serde_json::json!({
                    "payment_intent_id": row.payment_intent_id,
                    "paid_at": row.created_at.unix_timestamp(),
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// `prompt_count` should not exceed `total_prompts_limit`; High for
    /// premium profiles, Low for free ones
    async fn check_count_within_limit(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows = self.audit.overdrawn_profiles().await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "count_within_limit".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "Profile used {} prompts with a limit of {}",
                    row.prompt_count, row.total_prompts_limit
                ),
                context: serde_json::json!({
                    "prompt_count": row.prompt_count,
                    "total_prompts_limit": row.total_prompts_limit,
                    "is_premium": row.is_premium,
                }),
                severity: if row.is_premium {
                    ViolationSeverity::High
                } else {
                    ViolationSeverity::Low
                },
            })
            .collect())
    }

    /// The counter should not trail the history rows in the current window
    async fn check_counter_tracks_history(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows = self.audit.trailing_counters().await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "counter_tracks_history".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "Counter shows {} prompts but {} history rows exist",
                    row.prompt_count, row.history_count
                ),
                context: serde_json::json!({
                    "prompt_count": row.prompt_count,
                    "history_count": row.history_count,
                }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    /// Run a single invariant check by name
    pub async fn run_check(&self, name: &str) -> BillingResult<Vec<InvariantViolation>> {
        match name {
            "payments_grant_premium" => self.check_payments_grant_premium().await,
            "count_within_limit" => self.check_count_within_limit().await,
            "counter_tracks_history" => self.check_counter_tracks_history().await,
            _ => Ok(vec![]),
        }
    }

    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "payments_grant_premium",
            "count_within_limit",
            "counter_tracks_history",
        ]
    }
}
