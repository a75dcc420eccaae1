//! Administrator decisions and the button payloads that carry them.
//!
//! Payloads keep the format the deployed bot has always used, so buttons on
//! messages sent before an upgrade still work:
//! `admin_approve_<userId>_<Level>` and `admin_reject_<userId>`.

use thiserror::Error;

use crate::registry::{PaidTier, UserId};
use crate::transport::MessageRef;

pub const ADMIN_CALLBACK_PREFIX: &str = "admin_";
const APPROVE_PREFIX: &str = "admin_approve_";
const REJECT_PREFIX: &str = "admin_reject_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionOutcome {
    Approve(PaidTier),
    Reject,
}

/// The action encoded in an admin button, before we know who pressed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdminAction {
    pub target_user_id: UserId,
    pub outcome: DecisionOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminDecision {
    pub target_user_id: UserId,
    pub outcome: DecisionOutcome,
    pub deciding_admin_id: UserId,
    /// Admin message the button was pressed on.
    pub origin: Option<MessageRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallbackError {
    #[error("not an admin callback: {0:?}")]
    NotAdmin(String),
    #[error("malformed admin callback {payload:?}: {reason}")]
    Malformed { payload: String, reason: &'static str },
}

pub fn is_admin_callback(payload: &str) -> bool {
    payload.starts_with(ADMIN_CALLBACK_PREFIX)
}

impl AdminAction {
    pub fn approve(target_user_id: UserId, tier: PaidTier) -> Self {
        Self {
            target_user_id,
            outcome: DecisionOutcome::Approve(tier),
        }
    }

    pub fn reject(target_user_id: UserId) -> Self {
        Self {
            target_user_id,
            outcome: DecisionOutcome::Reject,
        }
    }

    pub fn parse(payload: &str) -> Result<Self, CallbackError> {
        let malformed = |reason| CallbackError::Malformed {
            payload: payload.to_string(),
            reason,
        };

        if let Some(rest) = payload.strip_prefix(APPROVE_PREFIX) {
            let (user, level) = rest.rsplit_once('_').ok_or_else(|| malformed("missing level"))?;
            let user_id = user.parse().map_err(|_| malformed("bad user id"))?;
            // An approval to "None" would grant nothing; it is not a valid button.
            let tier = level.parse::<PaidTier>().map_err(|_| malformed("unknown level"))?;
            return Ok(Self::approve(user_id, tier));
        }
        if let Some(user) = payload.strip_prefix(REJECT_PREFIX) {
            let user_id = user.parse().map_err(|_| malformed("bad user id"))?;
            return Ok(Self::reject(user_id));
        }
        if is_admin_callback(payload) {
            return Err(malformed("unknown admin action"));
        }
        Err(CallbackError::NotAdmin(payload.to_string()))
    }

    pub fn callback(&self) -> String {
        match self.outcome {
            DecisionOutcome::Approve(tier) => format!("{APPROVE_PREFIX}{}_{tier}", self.target_user_id),
            DecisionOutcome::Reject => format!("{REJECT_PREFIX}{}", self.target_user_id),
        }
    }

    pub fn by(self, deciding_admin_id: UserId, origin: Option<MessageRef>) -> AdminDecision {
        AdminDecision {
            target_user_id: self.target_user_id,
            outcome: self.outcome,
            deciding_admin_id,
            origin,
        }
    }
}
