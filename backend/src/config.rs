//! Engine configuration
//!
//! All rates are integer basis points and all amounts are i64 cents. Every
//! field has a default matching the reference commission plan, so an empty
//! TOML/JSON document deserializes to a working configuration:
//!
//! ```rust
//! use mlm_commission_core::config::EngineConfig;
//!
//! let config: EngineConfig = serde_json::from_str("{}").unwrap();
//! assert_eq!(config.direct_instant_bps, 300);
//! assert_eq!(config.levels_above, 20);
//! assert!(config.validate().is_ok());
//! ```

use crate::models::{ClubType, MemberId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Configuration validation errors
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Duplicate reward tier id: {0}")]
    DuplicateRewardTier(String),

    #[error("Duplicate royalty club: {0}")]
    DuplicateRoyaltyClub(ClubType),

    #[error("Leg weights for tier {tier} must sum to 100, got {sum}")]
    LegWeights { tier: String, sum: u32 },
}

/// How the level distributor treats the "below" levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownlineRemainder {
    /// Every below-level share is routed to the root, whatever the downline
    /// depth. Matches the reference system's payouts.
    #[default]
    Fixed,

    /// Only below-levels that do not exist under the node are routed to the
    /// root; the downline is measured with a bounded BFS.
    Measured,
}

/// A lifetime reward tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardTier {
    pub id: String,
    pub name: String,
    /// Combined leg turnover the four legs are weighed against (cents)
    pub threshold: i64,
    /// Total reward paid over `total_paid_month` installments (cents)
    pub reward_amount: i64,
    pub total_paid_month: u32,
    /// Share of `threshold` required from the i-th largest leg, in percent
    #[serde(default = "default_leg_weights")]
    pub leg_weights: [u32; 4],
}

impl RewardTier {
    /// Whether `turnover` meets the requirement of the leg at `rank`
    /// (0 = largest), i.e. `turnover >= threshold * weight / 100` exactly
    pub fn leg_qualifies(&self, rank: usize, turnover: i64) -> bool {
        crate::core::money::meets_percent(turnover, self.threshold, self.leg_weights[rank])
    }
}

/// A royalty club tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoyaltyTier {
    pub club: ClubType,
    pub min_direct_ids: usize,
    pub min_level_one: usize,
    pub min_level_two: usize,
    /// One-time gift credited on joining (cents)
    pub gift_amount: i64,
    /// Turnover limit recorded on the membership (cents)
    pub turnover_limit: i64,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// Thresholds for the working-ids sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkingIdRule {
    pub min_direct_ids: usize,
    pub min_level_one: usize,
    pub min_level_two: usize,
}

impl Default for WorkingIdRule {
    fn default() -> Self {
        Self {
            min_direct_ids: 10,
            min_level_one: 5,
            min_level_two: 25,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Instant direct share (300 bps = 3%)
    pub direct_instant_bps: u32,

    /// Monthly deferred direct share (15 bps = 0.15%)
    pub direct_monthly_bps: u32,

    /// Number of monthly deferred installments
    pub direct_monthly_installments: u32,

    /// Member receiving direct income when a node has no referral source.
    /// None routes it to the tree root.
    pub fallback_member: Option<MemberId>,

    /// Per-level share of level income (15 bps = 0.15%)
    pub level_bps: u32,

    /// Rungs walked above the transacting node
    pub levels_above: u32,

    /// Below-levels accounted for in the root remainder
    pub levels_below: u32,

    pub downline_remainder: DownlineRemainder,

    /// Lifetime reward tiers; evaluated in ascending threshold order
    pub reward_tiers: Vec<RewardTier>,

    /// Days between reward installments
    pub reward_installment_interval_days: u32,

    pub royalty_tiers: Vec<RoyaltyTier>,

    pub working_ids: WorkingIdRule,

    /// Lease lifetime for job locks, in seconds
    pub lock_ttl_secs: u64,

    /// Upper bound on nodes visited by any single traversal
    pub traversal_step_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            direct_instant_bps: 300,
            direct_monthly_bps: 15,
            direct_monthly_installments: 10,
            fallback_member: None,
            level_bps: 15,
            levels_above: 20,
            levels_below: 10,
            downline_remainder: DownlineRemainder::Fixed,
            reward_tiers: Vec::new(),
            reward_installment_interval_days: 30,
            royalty_tiers: Vec::new(),
            working_ids: WorkingIdRule::default(),
            lock_ttl_secs: 900,
            traversal_step_limit: 1_000_000,
        }
    }
}

impl EngineConfig {
    /// Check internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.direct_instant_bps > 10_000 || self.direct_monthly_bps > 10_000 || self.level_bps > 10_000 {
            return Err(ConfigError::Invalid("rates must not exceed 10000 bps".to_string()));
        }
        if self.direct_monthly_installments == 0 {
            return Err(ConfigError::Invalid(
                "direct_monthly_installments must be positive".to_string(),
            ));
        }
        if self.reward_installment_interval_days == 0 {
            return Err(ConfigError::Invalid(
                "reward_installment_interval_days must be positive".to_string(),
            ));
        }
        if self.lock_ttl_secs == 0 {
            return Err(ConfigError::Invalid("lock_ttl_secs must be positive".to_string()));
        }
        if self.traversal_step_limit == 0 {
            return Err(ConfigError::Invalid(
                "traversal_step_limit must be positive".to_string(),
            ));
        }

        let mut tier_ids = HashSet::new();
        for tier in &self.reward_tiers {
            if !tier_ids.insert(tier.id.as_str()) {
                return Err(ConfigError::DuplicateRewardTier(tier.id.clone()));
            }
            if tier.threshold <= 0 || tier.reward_amount <= 0 || tier.total_paid_month == 0 {
                return Err(ConfigError::Invalid(format!(
                    "reward tier {} needs positive threshold, reward and installments",
                    tier.id
                )));
            }
            let sum: u32 = tier.leg_weights.iter().sum();
            if sum != 100 {
                return Err(ConfigError::LegWeights {
                    tier: tier.id.clone(),
                    sum,
                });
            }
        }

        let mut clubs = HashSet::new();
        for tier in &self.royalty_tiers {
            if !clubs.insert(tier.club) {
                return Err(ConfigError::DuplicateRoyaltyClub(tier.club));
            }
            if tier.gift_amount < 0 {
                return Err(ConfigError::Invalid(format!(
                    "royalty club {} has a negative gift",
                    tier.club
                )));
            }
        }

        Ok(())
    }

    /// Reward tiers sorted by ascending threshold (ties keep config order)
    pub fn reward_tiers_by_threshold(&self) -> Vec<&RewardTier> {
        let mut tiers: Vec<&RewardTier> = self.reward_tiers.iter().collect();
        tiers.sort_by_key(|tier| tier.threshold);
        tiers
    }
}

fn default_leg_weights() -> [u32; 4] {
    [40, 30, 20, 10]
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier(id: &str, threshold: i64) -> RewardTier {
        RewardTier {
            id: id.to_string(),
            name: id.to_string(),
            threshold,
            reward_amount: 10_000,
            total_paid_month: 10,
            leg_weights: default_leg_weights(),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_duplicate_reward_tier_rejected() {
        let config = EngineConfig {
            reward_tiers: vec![tier("T1", 100), tier("T1", 200)],
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicateRewardTier("T1".to_string()))
        );
    }

    #[test]
    fn test_leg_weights_must_sum_to_100() {
        let mut bad = tier("T1", 100);
        bad.leg_weights = [40, 30, 20, 20];
        let config = EngineConfig {
            reward_tiers: vec![bad],
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::LegWeights {
                tier: "T1".to_string(),
                sum: 110
            })
        );
    }

    #[test]
    fn test_tiers_sorted_by_threshold() {
        let config = EngineConfig {
            reward_tiers: vec![tier("HIGH", 500), tier("LOW", 100)],
            ..Default::default()
        };
        let ids: Vec<_> = config
            .reward_tiers_by_threshold()
            .iter()
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(ids, vec!["LOW", "HIGH"]);
    }

    #[test]
    fn test_leg_qualifies() {
        let t = tier("T", 100);
        assert!(t.leg_qualifies(0, 40));
        assert!(!t.leg_qualifies(0, 39));
        assert!(t.leg_qualifies(3, 10));
    }

    #[test]
    fn test_leg_qualifies_does_not_round_requirement_down() {
        let t = tier("T", 33);
        assert!(!t.leg_qualifies(3, 3));
        assert!(t.leg_qualifies(3, 4));
    }
}
