// Workflow engine - runs one inbound event against a user's session
// The session lock is held for the whole event, so registry reads, state
// transitions and replies for one user never interleave.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::approval::{AdminNotices, Admins};
use crate::catalog::Catalog;
use crate::registry::{AccessLevel, PaidTier, RecordField, RegistrationStatus, Registry, RegistryError, UserRecord};
use crate::sessions::{SessionGuard, SessionStore};
use crate::transport::{ArtifactRef, InboundEvent, MessageRef, Notifier, Sender};

use super::intent::Intent;
use super::machine::{FlowEvent, WorkflowState};
use super::prompts::{self, Prompt};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub struct Workflow {
    registry: Arc<dyn Registry>,
    sessions: SessionStore,
    notifier: Notifier,
    catalog: Arc<Catalog>,
    admins: Admins,
    notices: AdminNotices,
    contact: String,
}

impl Workflow {
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
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Handle one event and return the state the user is left in.
    ///
    /// On a registry failure nothing has been advanced; the caller tells the
    /// user to try again later.
    pub async fn handle(&self, event: &InboundEvent) -> Result<WorkflowState, WorkflowError> {
        let intent = Intent::decode(&event.kind, &self.catalog);
        let user = &event.from;
        debug!(user_id = user.id, intent = ?intent, "Decoded intent");

        if intent.is_informational() {
            self.inform(event.chat_id, user, intent).await?;
            return Ok(self.sessions.get(user.id).await.map(|s| s.state).unwrap_or(WorkflowState::Idle));
        }

        let mut guard = self.sessions.lock(user.id).await;
        let outcome = self.advance(&mut guard, event.chat_id, user, intent).await;
        guard.settle();
        let state = guard.state();
        drop(guard);

        outcome.map(|()| state)
    }

    async fn inform(&self, chat_id: i64, user: &Sender, intent: Intent) -> Result<(), WorkflowError> {
        let prompt = match intent {
            Intent::Help => prompts::help(&self.catalog, &self.contact),
            Intent::ServiceInfo => prompts::service_info(),
            Intent::PaymentInfo => prompts::payment_info(&self.catalog),
            Intent::Status => {
                let record = self.registry.find(user.id).await?;
                prompts::user_info(user.id, user, record.as_ref())
            }
            Intent::LevelServices(tier) => self.tier_services(user, tier).await?,
            _ => return Ok(()),
        };
        self.reply(chat_id, prompt).await;
        Ok(())
    }

    async fn tier_services(&self, user: &Sender, tier: PaidTier) -> Result<Prompt, WorkflowError> {
        let record = self.registry.find(user.id).await?;
        let entitled = record
            .as_ref()
            .is_some_and(|r| r.has_access() && r.access_level == AccessLevel::from(tier));
        Ok(if entitled {
            prompts::tier_services(tier)
        } else {
            prompts::no_access()
        })
    }

    async fn advance(
        &self,
        guard: &mut SessionGuard,
        chat_id: i64,
        user: &Sender,
        intent: Intent,
    ) -> Result<(), WorkflowError> {
        let state = guard.state();
        match intent {
            Intent::Start => {
                guard.clear();
                let level = match self.registry.find(user.id).await {
                    Ok(record) => record.map(|r| effective_level(&r)).unwrap_or_default(),
                    Err(e) => {
                        warn!(user_id = user.id, error = %e, "Could not read access level for welcome menu");
                        AccessLevel::None
                    }
                };
                self.reply(chat_id, prompts::welcome(&user.display_name, level)).await;
            }
            Intent::RequestService => self.request_service(guard, chat_id, user).await?,
            Intent::Confirm if state == WorkflowState::PlanConfirmation => {
                self.confirm_plan(guard, chat_id, user).await?
            }
            Intent::ProofUploaded(artifact) => match state {
                WorkflowState::AwaitingProof => self.submit_proof(guard, chat_id, user, artifact).await?,
                WorkflowState::AwaitingAdminDecision => self.reply(chat_id, prompts::pending_notice()).await,
                _ => {
                    debug!(user_id = user.id, %state, "Ignoring photo outside proof upload");
                    let prompt = self.prompt_for(guard).with_note(prompts::PHOTO_NOT_EXPECTED);
                    self.reply(chat_id, prompt).await;
                }
            },
            Intent::Cancel | Intent::Back if state == WorkflowState::Idle => {
                self.reply(chat_id, prompts::menu_hint(AccessLevel::None)).await;
            }
            other => self.step(guard, chat_id, other).await,
        }
        Ok(())
    }

    async fn request_service(&self, guard: &mut SessionGuard, chat_id: i64, user: &Sender) -> Result<(), WorkflowError> {
        match guard.state() {
            WorkflowState::AwaitingAdminDecision => {
                self.reply(chat_id, prompts::pending_notice()).await;
                return Ok(());
            }
            WorkflowState::AwaitingProof => {
                debug!(user_id = user.id, "Restart refused while awaiting proof");
                let prompt = self.prompt_for(guard);
                self.reply(chat_id, prompt).await;
                return Ok(());
            }
            _ => {}
        }

        let record = self.registry.find(user.id).await?;
        if let Some(record) = &record {
            if record.has_access() {
                guard.clear();
                self.reply(chat_id, prompts::already_approved(record.access_level)).await;
                return Ok(());
            }
            if record.is_pending() {
                guard.clear();
                self.reply(chat_id, prompts::pending_notice()).await;
                return Ok(());
            }
            self.refresh_profile(record, user).await;
        }

        let session = guard.get_or_start(&self.catalog);
        session.flow.handle(&FlowEvent::Begin);
        info!(user_id = user.id, "Plan selection started");
        self.reply(chat_id, prompts::plan_menu(&self.catalog)).await;
        Ok(())
    }

    // Best effort; failures are only logged.
    async fn refresh_profile(&self, record: &UserRecord, user: &Sender) {
        let handle = user.handle.as_deref().unwrap_or_default();
        let changes = [
            (RecordField::DisplayName, record.display_name.as_str(), user.display_name.as_str()),
            (RecordField::Handle, record.handle.as_str(), handle),
        ];
        for (field, stored, current) in changes {
            if stored == current || current.is_empty() {
                continue;
            }
            if let Err(e) = self.registry.update_field(user.id, field, current).await {
                warn!(user_id = user.id, field = field.header(), error = %e, "Profile refresh failed");
            }
        }
    }

    async fn confirm_plan(&self, guard: &mut SessionGuard, chat_id: i64, user: &Sender) -> Result<(), WorkflowError> {
        // An approval may have landed since the flow started.
        let record = self.registry.find(user.id).await?;
        if let Some(record) = record.filter(|r| r.has_access() || r.is_pending()) {
            guard.clear();
            let prompt = if record.is_pending() {
                prompts::pending_notice()
            } else {
                prompts::already_approved(record.access_level)
            };
            self.reply(chat_id, prompt).await;
            return Ok(());
        }
        self.step(guard, chat_id, Intent::Confirm).await;
        Ok(())
    }

    async fn submit_proof(
        &self,
        guard: &mut SessionGuard,
        chat_id: i64,
        user: &Sender,
        artifact: ArtifactRef,
    ) -> Result<(), WorkflowError> {
        let Some(session) = guard.session() else {
            return Ok(());
        };
        let flow = session.flow.inner();
        let (Some(plan), Some(method)) = (
            flow.selected_plan().and_then(|id| self.catalog.plan(id)),
            flow.payment_method().and_then(|id| self.catalog.method(id)),
        ) else {
            warn!(user_id = user.id, "Proof arrived without a complete selection");
            let prompt = self.prompt_for(guard);
            self.reply(chat_id, prompt).await;
            return Ok(());
        };

        let mut record = self
            .registry
            .find(user.id)
            .await?
            .unwrap_or_else(|| UserRecord::new(user.id, "", ""));
        record.display_name = user.display_name.clone();
        record.handle = user.handle.clone().unwrap_or_default();
        record.status = RegistrationStatus::Pending;
        record.selected_plan = Some(plan.id.clone());
        record.payment_method = Some(method.name.clone());
        record.proof_ref = Some(artifact.to_string());
        self.registry.upsert(&record).await?;
        info!(user_id = user.id, plan = %plan.id, method = %method.id, "Payment proof recorded");

        let caption = prompts::admin_notice(&record, plan, method);
        let mut delivered: Vec<MessageRef> = Vec::new();
        for &admin_id in self.admins.ids() {
            let keyboard = prompts::admin_decision_keyboard(user.id);
            if let Some(message) = self
                .notifier
                .image(admin_id, &artifact, &caption, Some(keyboard))
                .await
            {
                delivered.push(message);
            }
        }
        if delivered.is_empty() {
            warn!(user_id = user.id, "No administrator received the payment proof");
        }
        self.notices.track(user.id, delivered);

        if let Some(session) = guard.session_mut() {
            session.flow.handle(&FlowEvent::ProofAccepted { proof: artifact });
        }
        self.reply(chat_id, prompts::submission_received()).await;
        Ok(())
    }

    /// Feed an in-flow intent to the state machine and answer for wherever it lands.
    async fn step(&self, guard: &mut SessionGuard, chat_id: i64, intent: Intent) {
        let event = match intent {
            Intent::Cancel => FlowEvent::Cancel,
            Intent::Back => FlowEvent::Back,
            Intent::Confirm => FlowEvent::Confirm,
            Intent::PlanChosen(plan_id) => FlowEvent::PlanChosen { plan_id },
            Intent::MethodChosen(method_id) => FlowEvent::MethodChosen { method_id },
            _ => FlowEvent::Unrecognized,
        };

        let Some(session) = guard.session_mut() else {
            self.reply(chat_id, prompts::menu_hint(AccessLevel::None)).await;
            return;
        };
        let before = session.state();
        let refused = session.flow.inner().rejections();
        session.flow.handle(&event);
        let after = session.state();
        let rejected = session.flow.inner().rejections() > refused;
        debug!(from = %before, to = %after, rejected, "Flow step");

        let prompt = match after {
            WorkflowState::Idle if event == FlowEvent::Cancel => prompts::cancelled(),
            WorkflowState::Idle => prompts::menu_hint(AccessLevel::None),
            _ if rejected => self.prompt_for(guard).with_note(prompts::NOT_UNDERSTOOD),
            _ => self.prompt_for(guard),
        };
        self.reply(chat_id, prompt).await;
    }

    /// What to show a user at their current step.
    fn prompt_for(&self, guard: &SessionGuard) -> Prompt {
        let Some(session) = guard.session() else {
            return prompts::menu_hint(AccessLevel::None);
        };
        let flow = session.flow.inner();
        let plan = flow.selected_plan().and_then(|id| self.catalog.plan(id));
        let method = flow.payment_method().and_then(|id| self.catalog.method(id));
        match (session.state(), plan, method) {
            (WorkflowState::Idle, _, _) => prompts::menu_hint(AccessLevel::None),
            (WorkflowState::PlanConfirmation, Some(plan), _) => prompts::plan_details(plan),
            (WorkflowState::PaymentMethodSelection, _, _) => prompts::payment_methods(&self.catalog),
            (WorkflowState::AwaitingProof, Some(plan), Some(method)) => prompts::payment_instructions(plan, method),
            (WorkflowState::AwaitingAdminDecision, _, _) => prompts::pending_notice(),
            _ => prompts::plan_menu(&self.catalog),
        }
    }

    async fn reply(&self, chat_id: i64, prompt: Prompt) {
        self.notifier.text(chat_id, &prompt.text, prompt.keyboard).await;
    }
}

/// Level a record actually grants; pending or rejected rows grant nothing.
fn effective_level(record: &UserRecord) -> AccessLevel {
    if record.has_access() {
        record.access_level
    } else {
        AccessLevel::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CatalogConfig;
    use crate::registry::{MemorySheet, MockRegistry, SheetRegistry};
    use crate::transport::{EventKind, MemoryTransport, Outbound};
    use chrono::Duration;

    const USER: i64 = 100;
    const ADMINS: [i64; 2] = [1, 2];

    struct Fixture {
        workflow: Workflow,
        registry: Arc<SheetRegistry<MemorySheet>>,
        transport: Arc<MemoryTransport>,
        notices: AdminNotices,
    }

    fn catalog() -> Arc<Catalog> {
        let defaults = CatalogConfig::default();
        Arc::new(Catalog::new(defaults.plans, defaults.payment_methods).unwrap())
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(SheetRegistry::new(MemorySheet::new()));
        let transport = Arc::new(MemoryTransport::new());
        let notices = AdminNotices::new();
        let workflow = Workflow::new(
            registry.clone(),
            SessionStore::new(Duration::minutes(30)),
            Notifier::new(transport.clone(), std::time::Duration::from_secs(1)),
            catalog(),
            Admins::new(ADMINS),
            notices.clone(),
            "@support",
        );
        Fixture {
            workflow,
            registry,
            transport,
            notices,
        }
    }

    fn event(kind: EventKind) -> InboundEvent {
        InboundEvent {
            chat_id: USER,
            from: Sender {
                id: USER,
                display_name: "Nilar".to_string(),
                handle: Some("nilar".to_string()),
            },
            kind,
        }
    }

    fn text(s: &str) -> InboundEvent {
        event(EventKind::Text { text: s.to_string() })
    }

    fn button(s: &str) -> InboundEvent {
        event(EventKind::Button {
            callback: s.to_string(),
            message_id: None,
        })
    }

    fn photo(id: &str) -> InboundEvent {
        event(EventKind::Image {
            artifact: ArtifactRef::new(id),
        })
    }

    async fn drive(fx: &Fixture, events: &[InboundEvent]) -> WorkflowState {
        let mut state = WorkflowState::Idle;
        for e in events {
            state = fx.workflow.handle(e).await.unwrap();
        }
        state
    }

    #[tokio::test]
    async fn full_submission_notifies_every_admin() {
        let fx = fixture();
        let state = drive(
            &fx,
            &[
                text("Advertising Service"),
                button("plan:level2"),
                button("confirm"),
                text("Wave Pay"),
                photo("proof-1"),
            ],
        )
        .await;

        assert_eq!(state, WorkflowState::AwaitingAdminDecision);
        let record = fx.registry.find(USER).await.unwrap().unwrap();
        assert_eq!(record.status, RegistrationStatus::Pending);
        assert_eq!(record.selected_plan.as_deref(), Some("level2"));
        assert_eq!(record.payment_method.as_deref(), Some("Wave Pay"));
        assert_eq!(record.proof_ref.as_deref(), Some("proof-1"));

        for admin in ADMINS {
            assert_eq!(fx.transport.images_to(admin).len(), 1);
        }
        assert_eq!(fx.notices.pending(USER).len(), 2);
    }

    #[tokio::test]
    async fn second_photo_while_pending_is_not_resubmitted() {
        let fx = fixture();
        drive(
            &fx,
            &[
                text("/service"),
                text("Advertising Lv.1"),
                text("✅ Confirm"),
                text("KBZ Pay"),
                photo("proof-1"),
            ],
        )
        .await;

        let state = drive(&fx, &[photo("proof-2")]).await;

        assert_eq!(state, WorkflowState::AwaitingAdminDecision);
        assert_eq!(fx.transport.images_to(ADMINS[0]).len(), 1);
        let record = fx.registry.find(USER).await.unwrap().unwrap();
        assert_eq!(record.proof_ref.as_deref(), Some("proof-1"));
    }

    #[tokio::test]
    async fn cancel_at_confirmation_leaves_registry_untouched() {
        let mut registry = MockRegistry::new();
        registry.expect_find().returning(|_| Ok(None));
        registry.expect_upsert().never();
        registry.expect_update_field().never();
        let transport = Arc::new(MemoryTransport::new());
        let workflow = Workflow::new(
            Arc::new(registry),
            SessionStore::new(Duration::minutes(30)),
            Notifier::new(transport.clone(), std::time::Duration::from_secs(1)),
            catalog(),
            Admins::new(ADMINS),
            AdminNotices::new(),
            "@support",
        );

        for e in [text("Advertising Service"), button("plan:level1")] {
            workflow.handle(&e).await.unwrap();
        }
        let state = workflow.handle(&button("cancel")).await.unwrap();

        assert_eq!(state, WorkflowState::Idle);
        assert!(workflow.sessions().get(USER).await.is_none());
        assert!(transport.last_to(USER).unwrap().body().contains("cancelled"));
    }

    #[tokio::test]
    async fn photo_before_payment_step_is_ignored() {
        let fx = fixture();
        let state = drive(&fx, &[text("Advertising Service"), photo("early")]).await;

        assert_eq!(state, WorkflowState::PlanSelection);
        assert!(fx.registry.find(USER).await.unwrap().is_none());
        let last = fx.transport.last_to(USER).unwrap();
        assert!(last.body().starts_with(prompts::PHOTO_NOT_EXPECTED));
    }

    #[tokio::test]
    async fn unknown_plan_reprompts() {
        let fx = fixture();
        let state = drive(&fx, &[text("Advertising Service"), button("plan:level9")]).await;

        assert_eq!(state, WorkflowState::PlanSelection);
        match fx.transport.last_to(USER).unwrap() {
            Outbound::Text { text, keyboard, .. } => {
                assert!(text.starts_with(prompts::NOT_UNDERSTOOD));
                assert!(keyboard.unwrap().callbacks().contains(&"plan:level1"));
            }
            other => panic!("unexpected outbound {other:?}"),
        }
    }

    #[tokio::test]
    async fn approved_user_short_circuits_to_main_menu() {
        let fx = fixture();
        let mut record = UserRecord::new(USER, "Nilar", "nilar");
        record.status = RegistrationStatus::Approved;
        record.access_level = AccessLevel::Gold;
        fx.registry.upsert(&record).await.unwrap();

        let state = drive(&fx, &[text("Advertising Service")]).await;

        assert_eq!(state, WorkflowState::Idle);
        let last = fx.transport.last_to(USER).unwrap();
        assert!(last.body().contains("already have access"));
    }

    #[tokio::test]
    async fn back_from_method_selection_returns_to_plans() {
        let fx = fixture();
        let state = drive(
            &fx,
            &[
                text("Advertising Service"),
                button("plan:level3"),
                button("confirm"),
                button("back"),
            ],
        )
        .await;

        assert_eq!(state, WorkflowState::PlanSelection);
        let view = fx.workflow.sessions().get(USER).await.unwrap();
        assert_eq!(view.selected_plan, None);
    }

    #[tokio::test]
    async fn profile_changes_are_written_back() {
        let fx = fixture();
        let mut record = UserRecord::new(USER, "Old Name", "old");
        record.status = RegistrationStatus::Rejected;
        fx.registry.upsert(&record).await.unwrap();

        drive(&fx, &[text("Advertising Service")]).await;

        let record = fx.registry.find(USER).await.unwrap().unwrap();
        assert_eq!(record.display_name, "Nilar");
        assert_eq!(record.handle, "nilar");
        assert_eq!(record.status, RegistrationStatus::Rejected);
    }

    #[tokio::test]
    async fn tier_services_require_the_matching_tier() {
        let fx = fixture();
        let mut record = UserRecord::new(USER, "Nilar", "nilar");
        record.status = RegistrationStatus::Approved;
        record.access_level = AccessLevel::Gold;
        fx.registry.upsert(&record).await.unwrap();

        drive(&fx, &[text("Gold Services")]).await;
        assert!(fx.transport.last_to(USER).unwrap().body().starts_with("Gold Level Services"));

        drive(&fx, &[text("Ruby Services")]).await;
        assert!(fx.transport.last_to(USER).unwrap().body().contains("don't have access"));
    }

    #[tokio::test]
    async fn start_resets_an_in_flight_session() {
        let fx = fixture();
        drive(&fx, &[text("Advertising Service"), button("plan:level1")]).await;

        let state = drive(&fx, &[event(EventKind::Command { name: "start".to_string() })]).await;

        assert_eq!(state, WorkflowState::Idle);
        assert!(fx.workflow.sessions().get(USER).await.is_none());
    }

    #[tokio::test]
    async fn failed_submission_stays_awaiting_proof() {
        let mut registry = MockRegistry::new();
        registry.expect_find().returning(|_| Ok(None));
        registry.expect_upsert().returning(|_| {
            Err(RegistryError::Unavailable {
                operation: "upsert",
                reason: "quota exceeded".to_string(),
            })
        });
        let transport = Arc::new(MemoryTransport::new());
        let workflow = Workflow::new(
            Arc::new(registry),
            SessionStore::new(Duration::minutes(30)),
            Notifier::new(transport.clone(), std::time::Duration::from_secs(1)),
            catalog(),
            Admins::new(ADMINS),
            AdminNotices::new(),
            "@support",
        );
        for e in [
            text("Advertising Service"),
            button("plan:level1"),
            button("confirm"),
            button("method:aya_pay"),
        ] {
            workflow.handle(&e).await.unwrap();
        }

        let err = workflow.handle(&photo("proof")).await.unwrap_err();

        assert!(matches!(err, WorkflowError::Registry(RegistryError::Unavailable { .. })));
        let view = workflow.sessions().get(USER).await.unwrap();
        assert_eq!(view.state, WorkflowState::AwaitingProof);
        assert!(transport.images_to(ADMINS[0]).is_empty());
    }
}
