// Approval Coordinator - applies administrator decisions to the registry
// One decision per pending submission: check-and-write runs under a per-user
// lock, so a second admin pressing a button on the same proof gets StaleDecision.

use chrono::{Duration, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn, Instrument};

use crate::catalog::Catalog;
use crate::locks::KeyedMutex;
use crate::registry::{RegistrationStatus, Registry, RegistryError, UserId, UserRecord};
use crate::sessions::SessionStore;
use crate::telemetry::create_decision_span;
use crate::transport::{Keyboard, MessageRef, Notifier};
use crate::workflow::prompts;

use super::decision::{AdminDecision, DecisionOutcome};
use super::{AdminNotices, Admins};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecisionError {
    #[error("user {admin_id} is not an administrator")]
    Unauthorized { admin_id: UserId },
    #[error("no registry record for user {user_id}")]
    UnknownUser { user_id: UserId },
    #[error("user {user_id} is {status}, not pending")]
    StaleDecision {
        user_id: UserId,
        status: RegistrationStatus,
    },
    #[error("registry unavailable: {0}")]
    RegistryUnavailable(#[from] RegistryError),
}

pub struct ApprovalCoordinator {
    registry: Arc<dyn Registry>,
    sessions: SessionStore,
    notifier: Notifier,
    catalog: Arc<Catalog>,
    admins: Admins,
    notices: AdminNotices,
    contact: String,
    decisions: KeyedMutex<UserId, ()>,
}

impl ApprovalCoordinator {
    pub fn new(
        registry: Arc<dyn Registry>,
        sessions: SessionStore,
        notifier: Notifier,
        catalog: Arc<Catalog>,
        admins: Admins,
        notices: AdminNotices,
        contact: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            sessions,
            notifier,
            catalog,
            admins,
            notices,
            contact: contact.into(),
            decisions: KeyedMutex::new(),
        }
    }

    pub async fn decide(&self, decision: &AdminDecision) -> Result<(), DecisionError> {
        let span = create_decision_span(
            decision.target_user_id,
            decision.deciding_admin_id,
            outcome_label(decision.outcome),
        );
        self.apply(decision).instrument(span).await
    }

    async fn apply(&self, decision: &AdminDecision) -> Result<(), DecisionError> {
        if !self.admins.contains(decision.deciding_admin_id) {
            warn!(admin_id = decision.deciding_admin_id, "Decision from non-administrator refused");
            return Err(DecisionError::Unauthorized {
                admin_id: decision.deciding_admin_id,
            });
        }

        let user_id = decision.target_user_id;
        let _turn = self.decisions.lock(user_id).await;

        let mut record = self
            .registry
            .find(user_id)
            .await?
            .ok_or(DecisionError::UnknownUser { user_id })?;

        if !record.is_pending() {
            info!(user_id, status = %record.status, "Decision arrived after the request was settled");
            return Err(DecisionError::StaleDecision {
                user_id,
                status: record.status,
            });
        }

        self.settle(&mut record, decision.outcome);
        self.registry.upsert(&record).await?;
        info!(
            user_id,
            status = %record.status,
            access_level = %record.access_level,
            admin_id = decision.deciding_admin_id,
            "Decision applied"
        );

        // Waits out an in-flight submission, so all of its notices are tracked before close_notices takes them.
        self.sessions.clear(user_id).await;
        self.notify_user(&record, decision.outcome).await;
        self.close_notices(decision).await;
        Ok(())
    }

    fn settle(&self, record: &mut UserRecord, outcome: DecisionOutcome) {
        match outcome {
            DecisionOutcome::Approve(tier) => {
                let now = Utc::now();
                record.access_level = tier.into();
                record.status = RegistrationStatus::Approved;
                record.joined_at.get_or_insert(now);
                if let Some(plan) = record.selected_plan.as_deref().and_then(|id| self.catalog.plan(id)) {
                    record.expires_at = Some(now + Duration::days(i64::from(plan.duration_days)));
                }
            }
            // Plan, method and proof stay on the record for audit.
            DecisionOutcome::Reject => record.status = RegistrationStatus::Rejected,
        }
    }

    async fn notify_user(&self, record: &UserRecord, outcome: DecisionOutcome) {
        let prompt = match outcome {
            DecisionOutcome::Approve(tier) => prompts::approved(tier),
            DecisionOutcome::Reject => prompts::rejected(&self.contact),
        };
        self.notifier
            .text(record.user_id, &prompt.text, prompt.keyboard)
            .await;
    }

    /// Strip the decision buttons from every admin's copy of the notice.
    async fn close_notices(&self, decision: &AdminDecision) {
        let user_id = decision.target_user_id;
        let summary = match decision.outcome {
            DecisionOutcome::Approve(tier) => prompts::admin_approved(user_id, tier, decision.deciding_admin_id),
            DecisionOutcome::Reject => prompts::admin_rejected(user_id, decision.deciding_admin_id),
        };

        let mut messages: Vec<MessageRef> = self.notices.take(user_id);
        if let Some(origin) = decision.origin {
            if !messages.contains(&origin) {
                messages.push(origin);
            }
        }
        for message in messages {
            self.notifier
                .edit(message, &summary, Some(Keyboard::Remove))
                .await;
        }
    }
}

fn outcome_label(outcome: DecisionOutcome) -> &'static str {
    match outcome {
        DecisionOutcome::Approve(_) => "approve",
        DecisionOutcome::Reject => "reject",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::AdminAction;
    use crate::config::CatalogConfig;
    use crate::registry::{AccessLevel, MemorySheet, MockRegistry, PaidTier, SheetRegistry};
    use crate::transport::{MemoryTransport, Outbound};

    const ADMIN: UserId = 900;

    struct Fixture {
        registry: Arc<SheetRegistry<MemorySheet>>,
        transport: Arc<MemoryTransport>,
        notices: AdminNotices,
        coordinator: ApprovalCoordinator,
    }

    fn catalog() -> Arc<Catalog> {
        let defaults = CatalogConfig::default();
        Arc::new(Catalog::new(defaults.plans, defaults.payment_methods).unwrap())
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(SheetRegistry::new(MemorySheet::new()));
        let transport = Arc::new(MemoryTransport::new());
        let notices = AdminNotices::new();
        let coordinator = ApprovalCoordinator::new(
            registry.clone(),
            SessionStore::new(Duration::minutes(30)),
            Notifier::new(transport.clone(), std::time::Duration::from_secs(1)),
            catalog(),
            Admins::new([ADMIN]),
            notices.clone(),
            "@support",
        );
        Fixture {
            registry,
            transport,
            notices,
            coordinator,
        }
    }

    fn pending(user_id: UserId) -> UserRecord {
        let mut record = UserRecord::new(user_id, "Thida", "thida");
        record.status = RegistrationStatus::Pending;
        record.selected_plan = Some("level2".to_string());
        record.payment_method = Some("Wave Pay".to_string());
        record.proof_ref = Some("photo-1".to_string());
        record
    }

    #[tokio::test]
    async fn approval_grants_the_tier_and_sets_expiry() {
        let fx = fixture();
        fx.registry.upsert(&pending(5)).await.unwrap();

        fx.coordinator
            .decide(&AdminAction::approve(5, PaidTier::Platinum).by(ADMIN, None))
            .await
            .unwrap();

        let record = fx.registry.find(5).await.unwrap().unwrap();
        assert_eq!(record.status, RegistrationStatus::Approved);
        assert_eq!(record.access_level, AccessLevel::Platinum);
        let joined = record.joined_at.unwrap();
        assert_eq!(record.expires_at.unwrap() - joined, Duration::days(14));
        assert_eq!(record.invariant_violation(), None);

        let note = fx.transport.last_to(5).unwrap();
        assert!(note.body().contains("Platinum"));
    }

    #[tokio::test]
    async fn rejection_keeps_level_and_audit_fields() {
        let fx = fixture();
        fx.registry.upsert(&pending(6)).await.unwrap();

        fx.coordinator
            .decide(&AdminAction::reject(6).by(ADMIN, None))
            .await
            .unwrap();

        let record = fx.registry.find(6).await.unwrap().unwrap();
        assert_eq!(record.status, RegistrationStatus::Rejected);
        assert_eq!(record.access_level, AccessLevel::None);
        assert_eq!(record.selected_plan.as_deref(), Some("level2"));
        assert_eq!(record.payment_method.as_deref(), Some("Wave Pay"));
    }

    #[tokio::test]
    async fn non_admin_is_refused_before_any_read() {
        let mut registry = MockRegistry::new();
        registry.expect_find().never();
        registry.expect_upsert().never();
        let coordinator = ApprovalCoordinator::new(
            Arc::new(registry),
            SessionStore::new(Duration::minutes(30)),
            Notifier::new(Arc::new(MemoryTransport::new()), std::time::Duration::from_secs(1)),
            catalog(),
            Admins::new([ADMIN]),
            AdminNotices::new(),
            "@support",
        );

        let err = coordinator
            .decide(&AdminAction::approve(5, PaidTier::Ruby).by(42, None))
            .await
            .unwrap_err();
        assert_eq!(err, DecisionError::Unauthorized { admin_id: 42 });
    }

    #[tokio::test]
    async fn second_decision_is_stale() {
        let fx = fixture();
        fx.registry.upsert(&pending(8)).await.unwrap();

        fx.coordinator
            .decide(&AdminAction::approve(8, PaidTier::Gold).by(ADMIN, None))
            .await
            .unwrap();
        fx.transport.clear();

        let err = fx
            .coordinator
            .decide(&AdminAction::reject(8).by(ADMIN, None))
            .await
            .unwrap_err();
        assert!(matches!(err, DecisionError::StaleDecision { user_id: 8, .. }));
        assert!(fx.transport.sent().is_empty());
        assert_eq!(
            fx.registry.find(8).await.unwrap().unwrap().access_level,
            AccessLevel::Gold
        );
    }

    #[tokio::test]
    async fn unknown_user() {
        let fx = fixture();
        let err = fx
            .coordinator
            .decide(&AdminAction::reject(404).by(ADMIN, None))
            .await
            .unwrap_err();
        assert_eq!(err, DecisionError::UnknownUser { user_id: 404 });
    }

    #[tokio::test]
    async fn buttons_are_removed_from_every_admin_copy() {
        let fx = fixture();
        fx.registry.upsert(&pending(9)).await.unwrap();
        let copies = vec![
            MessageRef {
                chat_id: ADMIN,
                message_id: 1,
            },
            MessageRef {
                chat_id: 901,
                message_id: 2,
            },
        ];
        fx.notices.track(9, copies.clone());

        fx.coordinator
            .decide(&AdminAction::reject(9).by(ADMIN, Some(copies[0])))
            .await
            .unwrap();

        let edits = fx.transport.edits();
        assert_eq!(edits.len(), 2);
        for edit in edits {
            assert_eq!(edit.keyboard(), Some(&Keyboard::Remove));
            assert!(matches!(edit, Outbound::Edit { .. }));
        }
        assert!(fx.notices.pending(9).is_empty());
    }

    #[tokio::test]
    async fn write_failure_surfaces_as_registry_unavailable() {
        let mut registry = MockRegistry::new();
        registry.expect_find().returning(|id| Ok(Some(pending(id))));
        registry.expect_upsert().returning(|_| {
            Err(RegistryError::Unavailable {
                operation: "upsert",
                reason: "quota".to_string(),
            })
        });
        let transport = Arc::new(MemoryTransport::new());
        let coordinator = ApprovalCoordinator::new(
            Arc::new(registry),
            SessionStore::new(Duration::minutes(30)),
            Notifier::new(transport.clone(), std::time::Duration::from_secs(1)),
            catalog(),
            Admins::new([ADMIN]),
            AdminNotices::new(),
            "@support",
        );

        let err = coordinator
            .decide(&AdminAction::approve(3, PaidTier::Gold).by(ADMIN, None))
            .await
            .unwrap_err();
        assert!(matches!(err, DecisionError::RegistryUnavailable(_)));
        assert!(transport.sent().is_empty());
    }
}
