//! User registry - the persistent record of who holds which access tier.
//!
//! In production the registry is a remote spreadsheet-like table: slow, rate
//! limited and occasionally unavailable. The rest of the crate only talks to it
//! through the [`Registry`] trait, and the bot wraps whichever backend it uses in
//! a [`ResilientRegistry`] so every call is bounded and retried once.

pub mod resilient;
pub mod rows;
pub mod sheet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

pub use resilient::{ResilientRegistry, RetryConfig};
pub use rows::{RecordField, COLUMN_COUNT};
pub use sheet::{MemorySheet, SheetRegistry, TabularStore};

/// Stable numeric identity of a chat user.
pub type UserId = i64;

/// Ordered access tiers. `None` means no paid access.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AccessLevel {
    #[default]
    None,
    Gold,
    Platinum,
    Ruby,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::None => "None",
            AccessLevel::Gold => "Gold",
            AccessLevel::Platinum => "Platinum",
            AccessLevel::Ruby => "Ruby",
        }
    }

    pub fn is_paid(&self) -> bool {
        !matches!(self, AccessLevel::None)
    }

    /// The paid tier behind this level, if any.
    pub fn tier(&self) -> Option<PaidTier> {
        match self {
            AccessLevel::None => None,
            AccessLevel::Gold => Some(PaidTier::Gold),
            AccessLevel::Platinum => Some(PaidTier::Platinum),
            AccessLevel::Ruby => Some(PaidTier::Ruby),
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessLevel {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
            return Ok(AccessLevel::None);
        }
        trimmed.parse::<PaidTier>().map(AccessLevel::from)
    }
}

/// A tier an administrator can grant. Approving "no access" is not expressible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PaidTier {
    Gold,
    Platinum,
    Ruby,
}

impl PaidTier {
    pub const ALL: [PaidTier; 3] = [PaidTier::Gold, PaidTier::Platinum, PaidTier::Ruby];

    pub fn as_str(&self) -> &'static str {
        AccessLevel::from(*self).as_str()
    }
}

impl From<PaidTier> for AccessLevel {
    fn from(tier: PaidTier) -> Self {
        match tier {
            PaidTier::Gold => AccessLevel::Gold,
            PaidTier::Platinum => AccessLevel::Platinum,
            PaidTier::Ruby => AccessLevel::Ruby,
        }
    }
}

impl fmt::Display for PaidTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaidTier {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaidTier::ALL
            .into_iter()
            .find(|tier| tier.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownValue {
                kind: "access level",
                value: s.to_string(),
            })
    }
}

/// Where a user stands in the approval protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegistrationStatus {
    #[default]
    Unregistered,
    Pending,
    Approved,
    Rejected,
}

impl RegistrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationStatus::Unregistered => "unregistered",
            RegistrationStatus::Pending => "pending",
            RegistrationStatus::Approved => "approved",
            RegistrationStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegistrationStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "unregistered" => Ok(RegistrationStatus::Unregistered),
            "pending" => Ok(RegistrationStatus::Pending),
            "approved" => Ok(RegistrationStatus::Approved),
            "rejected" => Ok(RegistrationStatus::Rejected),
            _ => Err(UnknownValue {
                kind: "status",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value:?}")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

/// One registry row: identity plus current access state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: UserId,
    pub display_name: String,
    pub handle: String,
    pub access_level: AccessLevel,
    pub status: RegistrationStatus,
    pub selected_plan: Option<String>,
    pub payment_method: Option<String>,
    pub proof_ref: Option<String>,
    pub joined_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl UserRecord {
    pub fn new(user_id: UserId, display_name: impl Into<String>, handle: impl Into<String>) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
            handle: handle.into(),
            access_level: AccessLevel::None,
            status: RegistrationStatus::Unregistered,
            selected_plan: None,
            payment_method: None,
            proof_ref: None,
            joined_at: None,
            expires_at: None,
        }
    }

    /// Approved with a paid tier.
    pub fn has_access(&self) -> bool {
        self.status == RegistrationStatus::Approved && self.access_level.is_paid()
    }

    pub fn is_pending(&self) -> bool {
        self.status == RegistrationStatus::Pending
    }

    /// Describes the first broken record invariant, if any.
    pub fn invariant_violation(&self) -> Option<&'static str> {
        match self.status {
            RegistrationStatus::Approved if !self.access_level.is_paid() => {
                Some("approved record without a paid access level")
            }
            RegistrationStatus::Pending if self.proof_ref.is_none() => {
                Some("pending record without a proof reference")
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("registry {operation} timed out after {after_ms}ms")]
    Timeout { operation: &'static str, after_ms: u64 },
    #[error("registry unavailable during {operation}: {reason}")]
    Unavailable { operation: &'static str, reason: String },
    #[error("registry storage error: {0}")]
    Storage(String),
    #[error("malformed registry row for user {user_id}: {reason}")]
    MalformedRow { user_id: String, reason: String },
    #[error("invalid value {value:?} for column {field}")]
    InvalidValue { field: &'static str, value: String },
    #[error("registry has no row for user {user_id}")]
    NotFound { user_id: UserId },
}

impl RegistryError {
    /// Whether a retry has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RegistryError::Timeout { .. } | RegistryError::Unavailable { .. } | RegistryError::Storage(_)
        )
    }
}

/// Read/write access to user records, keyed by user id.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait Registry: Send + Sync {
    /// Look up a user's record. `None` means the user is unregistered.
    async fn find(&self, user_id: UserId) -> Result<Option<UserRecord>, RegistryError>;

    /// Insert the record, or replace the existing row for the same user in place.
    async fn upsert(&self, record: &UserRecord) -> Result<(), RegistryError>;

    /// Overwrite a single column of an existing row.
    async fn update_field(
        &self,
        user_id: UserId,
        field: RecordField,
        value: &str,
    ) -> Result<(), RegistryError>;
}

#[async_trait]
impl<R: Registry + ?Sized> Registry for Arc<R> {
    async fn find(&self, user_id: UserId) -> Result<Option<UserRecord>, RegistryError> {
        (**self).find(user_id).await
    }

    async fn upsert(&self, record: &UserRecord) -> Result<(), RegistryError> {
        (**self).upsert(record).await
    }

    async fn update_field(
        &self,
        user_id: UserId,
        field: RecordField,
        value: &str,
    ) -> Result<(), RegistryError> {
        (**self).update_field(user_id, field, value).await
    }
}
