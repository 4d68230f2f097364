//! Quota policy
//!
//! Every product rule about how a payment changes a profile, and whether the
//! free allowance ever resets, lives here. The reconciler and the upgrade
//! processor ask this type instead of encoding rules of their own.
//!
//! Environment knobs:
//!
//! | variable | values | default |
//! |---|---|---|
//! | `PREMIUM_GRANT_POLICY` | `normalize` \| `additive` | `normalize` |
//! | `RESET_COUNT_ON_UPGRADE` | bool | `false` |
//! | `REVERT_PREMIUM_WHEN_EXHAUSTED` | bool | `false` |
//! | `PROMPT_ALLOWANCE_RESET_DAYS` | `0` (never) or days | `0` |

use metamind_shared::{PremiumGrant, Profile, FREE_PROMPT_LIMIT, PREMIUM_PROMPT_BONUS};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::error::{BillingError, BillingResult};

/// How a successful payment changes `total_prompts_limit`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantPolicy {
    /// Non-premium limits are reset to the free baseline before adding the bonus
    NormalizeThenAdd,
    /// The bonus is added to whatever limit is stored
    Additive,
}

/// Whether `prompt_count` is periodically reset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AllowanceReset {
    Never,
    Rolling { days: u32 },
}

/// Quota numbers as the UI should see them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EffectiveState {
    pub limit: i32,
    pub is_premium: bool,
    pub has_prompt_history_access: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaPolicy {
    pub grant: GrantPolicy,
    pub reset_count_on_upgrade: bool,
    pub revert_premium_when_exhausted: bool,
    pub allowance_reset: AllowanceReset,
    pub free_limit: i32,
    pub premium_bonus: i32,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            grant: GrantPolicy::NormalizeThenAdd,
            reset_count_on_upgrade: false,
            revert_premium_when_exhausted: false,
            allowance_reset: AllowanceReset::Never,
            free_limit: FREE_PROMPT_LIMIT,
            premium_bonus: PREMIUM_PROMPT_BONUS,
        }
    }
}

fn env_bool(name: &str) -> BillingResult<Option<bool>> {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Some(true)),
            "false" | "0" | "no" => Ok(Some(false)),
            _ => Err(BillingError::Config(format!("{} must be a boolean, got {}", name, raw))),
        },
        Err(_) => Ok(None),
    }
}

impl QuotaPolicy {
    /// Load policy from environment variables, falling back to defaults
    pub fn from_env() -> BillingResult<Self> {
        let mut policy = Self::default();

        if let Ok(raw) = std::env::var("PREMIUM_GRANT_POLICY") {
            policy.grant = match raw.trim().to_lowercase().as_str() {
                "normalize" | "normalize_then_add" => GrantPolicy::NormalizeThenAdd,
                "additive" => GrantPolicy::Additive,
                other => {
                    return Err(BillingError::Config(format!(
                        "PREMIUM_GRANT_POLICY must be 'normalize' or 'additive', got {}",
                        other
                    )))
                }
            };
        }
        if let Some(reset) = env_bool("RESET_COUNT_ON_UPGRADE")? {
            policy.reset_count_on_upgrade = reset;
        }
        if let Some(revert) = env_bool("REVERT_PREMIUM_WHEN_EXHAUSTED")? {
            policy.revert_premium_when_exhausted = revert;
        }
        if let Ok(raw) = std::env::var("PROMPT_ALLOWANCE_RESET_DAYS") {
            let days: u32 = raw.trim().parse().map_err(|_| {
                BillingError::Config(format!(
                    "PROMPT_ALLOWANCE_RESET_DAYS must be a non-negative integer, got {}",
                    raw
                ))
            })?;
            policy.allowance_reset = if days == 0 {
                AllowanceReset::Never
            } else {
                AllowanceReset::Rolling { days }
            };
        }

        Ok(policy)
    }

    /// Grant to apply for one successful payment, guarded by the state it was computed from
    pub fn compute_grant(&self, profile: &Profile, payment_intent_id: &str) -> PremiumGrant {
        let base = match self.grant {
            GrantPolicy::Additive => profile.total_prompts_limit,
            GrantPolicy::NormalizeThenAdd if profile.is_premium => profile.total_prompts_limit,
            GrantPolicy::NormalizeThenAdd => self.free_limit,
        };

        PremiumGrant {
            user_id: profile.user_id(),
            payment_intent_id: payment_intent_id.to_string(),
            expected_limit: profile.total_prompts_limit,
            expected_premium: profile.is_premium,
            new_limit: base.saturating_add(self.premium_bonus),
            reset_prompt_count: self.reset_count_on_upgrade,
        }
    }

    /// Limit and flags reported for a profile (or its absence) after reconciliation
    pub fn effective_state(&self, profile: Option<&Profile>, used: i64) -> EffectiveState {
        let Some(profile) = profile else {
            return EffectiveState {
                limit: self.free_limit,
                is_premium: false,
                has_prompt_history_access: false,
            };
        };

        let exhausted = used >= i64::from(profile.total_prompts_limit);
        EffectiveState {
            limit: profile.total_prompts_limit,
            is_premium: profile.is_premium && !(self.revert_premium_when_exhausted && exhausted),
            has_prompt_history_access: profile.has_prompt_history_access,
        }
    }

    /// Whether the profile's allowance window has run out at `now`
    pub fn allowance_expired(&self, profile: &Profile, now: OffsetDateTime) -> bool {
        match self.allowance_reset {
            AllowanceReset::Never => false,
            AllowanceReset::Rolling { days } => {
                now - profile.allowance_period_start >= Duration::days(i64::from(days))
            }
        }
    }

    /// Lower bound on history rows that count towards usage. Any policy that
    /// zeroes the counter also moves `allowance_period_start`, so rows from
    /// before the last reset stop counting.
    pub fn history_window_start(&self, profile: Option<&Profile>) -> Option<OffsetDateTime> {
        let windowed = self.reset_count_on_upgrade
            || matches!(self.allowance_reset, AllowanceReset::Rolling { .. });
        if windowed {
            profile.map(|p| p.allowance_period_start)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metamind_shared::UserId;

    fn profile(limit: i32, premium: bool) -> Profile {
        let mut p = Profile::new_free(UserId::new(), None, OffsetDateTime::now_utc());
        p.total_prompts_limit = limit;
        p.is_premium = premium;
        p
    }

    #[test]
    fn test_normalize_then_add_for_free_user() {
        let grant = QuotaPolicy::default().compute_grant(&profile(5, false), "pi_123");
        assert_eq!(grant.new_limit, 155);
        assert_eq!(grant.expected_limit, 5);
        assert!(!grant.expected_premium);
        assert!(!grant.reset_prompt_count);
    }

    #[test]
    fn test_normalize_repairs_drifted_limit() {
        let policy = QuotaPolicy::default();
        assert_eq!(policy.compute_grant(&profile(2, false), "pi_a").new_limit, 155);
        assert_eq!(policy.compute_grant(&profile(40, false), "pi_b").new_limit, 155);
    }

    #[test]
    fn test_normalize_keeps_premium_limit() {
        let grant = QuotaPolicy::default().compute_grant(&profile(155, true), "pi_2");
        assert_eq!(grant.new_limit, 305);
    }

    #[test]
    fn test_additive_policy() {
        let policy = QuotaPolicy {
            grant: GrantPolicy::Additive,
            ..Default::default()
        };
        assert_eq!(policy.compute_grant(&profile(2, false), "pi_a").new_limit, 152);
    }

    #[test]
    fn test_effective_state_for_missing_profile() {
        let state = QuotaPolicy::default().effective_state(None, 0);
        assert_eq!(state.limit, FREE_PROMPT_LIMIT);
        assert!(!state.is_premium);
        assert!(!state.has_prompt_history_access);
    }

    #[test]
    fn test_premium_reverts_only_when_enabled() {
        let mut p = profile(155, true);
        p.has_prompt_history_access = true;

        let keep = QuotaPolicy::default().effective_state(Some(&p), 155);
        assert!(keep.is_premium);

        let revert = QuotaPolicy {
            revert_premium_when_exhausted: true,
            ..Default::default()
        };
        let state = revert.effective_state(Some(&p), 155);
        assert!(!state.is_premium);
        assert!(state.has_prompt_history_access);
        assert!(revert.effective_state(Some(&p), 154).is_premium);
    }

    #[test]
    fn test_allowance_window() {
        let now = OffsetDateTime::now_utc();
        let mut p = profile(5, false);
        p.allowance_period_start = now - Duration::days(31);

        assert!(!QuotaPolicy::default().allowance_expired(&p, now));
        assert_eq!(QuotaPolicy::default().history_window_start(Some(&p)), None);

        let rolling = QuotaPolicy {
            allowance_reset: AllowanceReset::Rolling { days: 30 },
            ..Default::default()
        };
        assert!(rolling.allowance_expired(&p, now));
        assert_eq!(rolling.history_window_start(Some(&p)), Some(p.allowance_period_start));

        p.allowance_period_start = now - Duration::days(29);
        assert!(!rolling.allowance_expired(&p, now));
    }

    #[test]
    fn test_reset_on_upgrade_windows_history() {
        let p = profile(5, false);
        let reset = QuotaPolicy {
            reset_count_on_upgrade: true,
            ..Default::default()
        };
        assert!(reset.compute_grant(&p, "pi_r").reset_prompt_count);
        assert_eq!(reset.history_window_start(Some(&p)), Some(p.allowance_period_start));
        assert_eq!(reset.history_window_start(None), None);
    }
}
