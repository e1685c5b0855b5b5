//! Grant notifications
//!
//! Fire-and-forget messages sent after a reward or royalty grant has been
//! committed. A failed notification is logged and never rolls back the grant.

use crate::models::{ClubType, MemberId};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum NotifyError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

/// Message emitted on a committed grant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    RewardGranted {
        member: MemberId,
        tier: String,
        amount: i64,
        installments: u32,
    },
    RoyaltyJoined {
        member: MemberId,
        club: ClubType,
        gift: i64,
    },
}

impl Notification {
    pub fn member(&self) -> &MemberId {
        match self {
            Notification::RewardGranted { member, .. } => member,
            Notification::RoyaltyJoined { member, .. } => member,
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Discards every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _notification: &Notification) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Keeps every notification in memory
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .map_err(|_| NotifyError::Delivery("recorder poisoned".to_string()))?
            .push(notification.clone());
        Ok(())
    }
}
