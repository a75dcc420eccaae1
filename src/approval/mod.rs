//! Administrator side of the protocol: who may decide, which admin messages
//! carry decision buttons, and applying decisions to the registry.

pub mod coordinator;
pub mod decision;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use crate::registry::UserId;
use crate::transport::MessageRef;

pub use coordinator::{ApprovalCoordinator, DecisionError};
pub use decision::{is_admin_callback, AdminAction, AdminDecision, CallbackError, DecisionOutcome};

/// Configured administrators, in configuration order.
#[derive(Debug, Clone)]
pub struct Admins {
    ordered: Arc<[UserId]>,
    members: Arc<HashSet<UserId>>,
}

impl Admins {
    pub fn new(ids: impl IntoIterator<Item = UserId>) -> Self {
        let mut members = HashSet::new();
        let ordered: Vec<UserId> = ids.into_iter().filter(|id| members.insert(*id)).collect();
        Self {
            ordered: ordered.into(),
            members: Arc::new(members),
        }
    }

    pub fn contains(&self, user_id: UserId) -> bool {
        self.members.contains(&user_id)
    }

    pub fn ids(&self) -> &[UserId] {
        &self.ordered
    }
}

/// Decision-button messages sent to administrators, per submitting user.
#[derive(Debug, Clone, Default)]
pub struct AdminNotices {
    inner: Arc<Mutex<HashMap<UserId, Vec<MessageRef>>>>,
}

impl AdminNotices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the notices for a fresh submission, replacing older ones.
    pub fn track(&self, user_id: UserId, notices: Vec<MessageRef>) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if notices.is_empty() {
            inner.remove(&user_id);
        } else {
            inner.insert(user_id, notices);
        }
    }

    pub fn take(&self, user_id: UserId) -> Vec<MessageRef> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&user_id)
            .unwrap_or_default()
    }

    pub fn pending(&self, user_id: UserId) -> Vec<MessageRef> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }
}
