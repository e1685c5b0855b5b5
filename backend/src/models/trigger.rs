//! Trigger event model
//!
//! An approved investment/purchase that drives distribution. The record is
//! owned by the external investment subsystem; the engine reads it and writes
//! back its progress.
//!
//! Progress is a forward-only stage machine rather than loose flags:
//!
//! ```text
//! Pending ──direct──▶ DirectPaid ──level──▶ LevelPaid ──interest──▶ Complete
//! ```
//!
//! The legacy booleans (`direct_income_sent`, `level_income_sent`,
//! `interest_sent`) are derived from the stage for the write-back contract.
//!
//! CRITICAL: All money values are i64 (cents)

use crate::models::node::MemberId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Distribution progress of a trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerStage {
    /// Approved, nothing distributed yet
    Pending,

    /// Direct income committed
    DirectPaid,

    /// Level income committed
    LevelPaid,

    /// Interest handled by the external subsystem
    Complete,
}

impl TriggerStage {
    /// The single stage that may follow this one
    pub fn next(self) -> Option<TriggerStage> {
        match self {
            TriggerStage::Pending => Some(TriggerStage::DirectPaid),
            TriggerStage::DirectPaid => Some(TriggerStage::LevelPaid),
            TriggerStage::LevelPaid => Some(TriggerStage::Complete),
            TriggerStage::Complete => None,
        }
    }
}

/// Errors from stage transitions
#[derive(Debug, Error, PartialEq)]
pub enum TriggerError {
    #[error("Invalid stage transition for trigger {id}: {from:?} -> {to:?}")]
    InvalidTransition {
        id: Uuid,
        from: TriggerStage,
        to: TriggerStage,
    },

    #[error("Trigger amount must be positive, got {0}")]
    NonPositiveAmount(i64),
}

/// An approved purchase that drives placement and distribution
///
/// # Example
/// ```
/// use mlm_commission_core::models::{MemberId, TriggerEvent, TriggerStage};
/// use chrono::Utc;
///
/// let trigger = TriggerEvent::new(MemberId::from("NEW"), 1_000_000, "gold", Utc::now())
///     .unwrap()
///     .with_referral(MemberId::from("SPONSOR"));
///
/// assert_eq!(trigger.stage(), TriggerStage::Pending);
/// assert!(!trigger.direct_income_sent());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    id: Uuid,
    user: MemberId,
    /// Purchase amount (cents)
    amount: i64,
    investment_type: String,
    guaranteed_type: Option<String>,
    /// Referral code owner used at purchase time
    referral_by: Option<MemberId>,
    approved_at: DateTime<Utc>,
    stage: TriggerStage,
}

impl TriggerEvent {
    /// Create a pending trigger
    pub fn new(
        user: MemberId,
        amount: i64,
        investment_type: impl Into<String>,
        approved_at: DateTime<Utc>,
    ) -> Result<Self, TriggerError> {
        if amount <= 0 {
            return Err(TriggerError::NonPositiveAmount(amount));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            user,
            amount,
            investment_type: investment_type.into(),
            guaranteed_type: None,
            referral_by: None,
            approved_at,
            stage: TriggerStage::Pending,
        })
    }

    /// Builder: set the referral source
    pub fn with_referral(mut self, referral_by: MemberId) -> Self {
        self.referral_by = Some(referral_by);
        self
    }

    /// Builder: set the guaranteed investment type
    pub fn with_guaranteed_type(mut self, guaranteed_type: impl Into<String>) -> Self {
        self.guaranteed_type = Some(guaranteed_type.into());
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user(&self) -> &MemberId {
        &self.user
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }

    pub fn investment_type(&self) -> &str {
        &self.investment_type
    }

    pub fn guaranteed_type(&self) -> Option<&str> {
        self.guaranteed_type.as_deref()
    }

    pub fn referral_by(&self) -> Option<&MemberId> {
        self.referral_by.as_ref()
    }

    pub fn approved_at(&self) -> DateTime<Utc> {
        self.approved_at
    }

    pub fn stage(&self) -> TriggerStage {
        self.stage
    }

    pub fn direct_income_sent(&self) -> bool {
        self.stage >= TriggerStage::DirectPaid
    }

    pub fn level_income_sent(&self) -> bool {
        self.stage >= TriggerStage::LevelPaid
    }

    pub fn interest_sent(&self) -> bool {
        self.stage == TriggerStage::Complete
    }

    /// Move from `from` to `to`
    ///
    /// Only the immediate successor of the current stage is accepted, and only
    /// when the current stage equals `from` (compare-and-set).
    pub fn advance(&mut self, from: TriggerStage, to: TriggerStage) -> Result<(), TriggerError> {
        if self.stage != from || from.next() != Some(to) {
            return Err(TriggerError::InvalidTransition {
                id: self.id,
                from: self.stage,
                to,
            });
        }
        self.stage = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger() -> TriggerEvent {
        TriggerEvent::new(MemberId::from("U"), 10_000, "basic", Utc::now()).unwrap()
    }

    #[test]
    fn test_rejects_non_positive_amount() {
        let result = TriggerEvent::new(MemberId::from("U"), 0, "basic", Utc::now());
        assert_eq!(result.unwrap_err(), TriggerError::NonPositiveAmount(0));
    }

    #[test]
    fn test_stages_move_forward_only() {
        let mut t = trigger();
        t.advance(TriggerStage::Pending, TriggerStage::DirectPaid).unwrap();
        assert!(t.direct_income_sent());
        assert!(!t.level_income_sent());

        assert!(t.advance(TriggerStage::DirectPaid, TriggerStage::Pending).is_err());
        assert!(t.advance(TriggerStage::Pending, TriggerStage::DirectPaid).is_err());

        t.advance(TriggerStage::DirectPaid, TriggerStage::LevelPaid).unwrap();
        t.advance(TriggerStage::LevelPaid, TriggerStage::Complete).unwrap();
        assert!(t.interest_sent());
        assert_eq!(t.stage().next(), None);
    }

    #[test]
    fn test_cannot_skip_stages() {
        let mut t = trigger();
        assert!(t.advance(TriggerStage::Pending, TriggerStage::LevelPaid).is_err());
        assert_eq!(t.stage(), TriggerStage::Pending);
    }
}
