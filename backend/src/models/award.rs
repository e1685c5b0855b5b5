//! One-time awards: lifetime reward grants and royalty club memberships
//!
//! Both are unique per (member, tier). The store rejects a second grant or
//! membership for the same pair, which is what makes the reward and royalty
//! sweeps safe to re-run.

use crate::models::node::MemberId;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reward-earned record for one (parent, tier)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardGrant {
    pub parent: MemberId,
    pub tier: String,
    /// Total reward (cents), paid out over `installments`
    pub amount: i64,
    pub installments: u32,
    /// The four children whose turnovers satisfied the tier, largest first
    pub qualifying_children: Vec<MemberId>,
    pub granted_at: DateTime<Utc>,
}

/// Royalty club tiers, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClubType {
    Star,
    Silver,
    Gold,
    Platinum,
    Diamond,
}

impl fmt::Display for ClubType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClubType::Star => "star",
            ClubType::Silver => "silver",
            ClubType::Gold => "gold",
            ClubType::Platinum => "platinum",
            ClubType::Diamond => "diamond",
        };
        f.write_str(name)
    }
}

/// Membership of a member in a royalty club tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoyaltyMembership {
    pub member: MemberId,
    pub club: ClubType,
    /// The tier's turnover limit in force when the member joined (cents)
    pub turnover_limit_at_join: i64,
    pub joined_date: NaiveDate,
}
