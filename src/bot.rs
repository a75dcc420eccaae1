// Bot - routes inbound events and maps every failure to a reply
// Admin decision buttons go to the approval coordinator, everything else to
// the workflow. Nothing that happens while handling one event can stop the loop.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn, Instrument};

use crate::approval::{
    is_admin_callback, AdminAction, AdminNotices, Admins, ApprovalCoordinator, DecisionError,
};
use crate::config::{ConfigError, TierpassConfig};
use crate::registry::Registry;
use crate::sessions::SessionStore;
use crate::shutdown::ShutdownCoordinator;
use crate::telemetry::{create_event_span, generate_correlation_id};
use crate::transport::{ChatTransport, EventKind, InboundEvent, Keyboard, Notifier};
use crate::workflow::{prompts, Workflow, WorkflowError};

pub struct Bot {
    workflow: Workflow,
    coordinator: ApprovalCoordinator,
    notifier: Notifier,
}

impl Bot {
    /// Wire the bot from validated configuration.
    ///
    /// `registry` is used as given; wrap it in a `ResilientRegistry` to get
    /// timeouts, retry and rate limiting.
    pub fn new(
        config: &TierpassConfig,
        registry: Arc<dyn Registry>,
        transport: Arc<dyn ChatTransport>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let catalog = Arc::new(config.catalog()?);
        let sessions = SessionStore::new(config.session_idle_timeout());
        let notifier = Notifier::new(transport, config.notification_timeout());
        let admins = Admins::new(config.admins.ids.iter().copied());
        let notices = AdminNotices::new();
        let contact = config.admins.contact.clone();

        let workflow = Workflow::new(
            Arc::clone(&registry),
            sessions.clone(),
            notifier.clone(),
            Arc::clone(&catalog),
            admins.clone(),
            notices.clone(),
            contact.clone(),
        );
        let coordinator = ApprovalCoordinator::new(
            registry,
            sessions,
            notifier.clone(),
            catalog,
            admins,
            notices,
            contact,
        );

        Ok(Self {
            workflow,
            coordinator,
            notifier,
        })
    }

    pub fn sessions(&self) -> &SessionStore {
        self.workflow.sessions()
    }

    /// Handle one inbound event to completion.
    pub async fn dispatch(&self, event: InboundEvent) {
        let correlation_id = generate_correlation_id();
        let span = create_event_span(event.from.id, event.kind.name(), &correlation_id);
        self.route(event).instrument(span).await
    }

    async fn route(&self, event: InboundEvent) {
        if let EventKind::Button { callback, .. } = &event.kind {
            if is_admin_callback(callback) {
                self.admin_press(&event, callback).await;
                return;
            }
        }

        match self.workflow.handle(&event).await {
            Ok(state) => debug!(%state, "Event handled"),
            Err(WorkflowError::Registry(e)) => {
                error!(error = %e, "Registry unavailable, asking user to retry later");
                let prompt = prompts::transient_failure();
                self.notifier
                    .text(event.chat_id, &prompt.text, prompt.keyboard)
                    .await;
            }
        }
    }

    async fn admin_press(&self, event: &InboundEvent, callback: &str) {
        let action = match AdminAction::parse(callback) {
            Ok(action) => action,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed admin button");
                self.notifier
                    .text(event.chat_id, prompts::INVALID_ACTION, None)
                    .await;
                return;
            }
        };

        let decision = action.by(event.from.id, event.origin());
        match self.coordinator.decide(&decision).await {
            Ok(()) => {}
            Err(DecisionError::Unauthorized { .. }) => {
                self.notifier
                    .text(event.chat_id, prompts::UNAUTHORIZED, None)
                    .await;
            }
            Err(e @ (DecisionError::StaleDecision { .. } | DecisionError::UnknownUser { .. })) => {
                info!(error = %e, "Decision already handled");
                match decision.origin {
                    Some(origin) => {
                        self.notifier
                            .edit(origin, prompts::ALREADY_HANDLED, Some(Keyboard::Remove))
                            .await;
                    }
                    None => {
                        self.notifier
                            .text(event.chat_id, prompts::ALREADY_HANDLED, None)
                            .await;
                    }
                }
            }
            Err(DecisionError::RegistryUnavailable(e)) => {
                error!(error = %e, "Decision could not be applied");
                let prompt = prompts::transient_failure();
                self.notifier
                    .text(event.chat_id, &prompt.text, prompt.keyboard)
                    .await;
            }
        }
    }

    /// Consume events until `signal` resolves or the stream ends, one task per
    /// event, then drain what is still in flight.
    pub async fn run<F>(self: Arc<Self>, mut events: mpsc::Receiver<InboundEvent>, shutdown: &ShutdownCoordinator, signal: F)
    where
        F: Future<Output = ()>,
    {
        let mut tasks = JoinSet::new();
        tokio::pin!(signal);
        info!("Bot started");

        loop {
            tokio::select! {
                _ = &mut signal => {
                    info!("Shutdown requested");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => {
                        let bot = Arc::clone(&self);
                        tasks.spawn(async move { bot.dispatch(event).await });
                    }
                    None => {
                        info!("Inbound stream closed");
                        break;
                    }
                },
                Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = result {
                        error!(error = %e, "Event task failed");
                    }
                }
            }
        }

        shutdown.drain(tasks).await;
    }
}
