//! Shared harness for the integration tests: a bot wired to an in-memory
//! registry and an in-memory chat transport.

#![allow(dead_code)]

use std::sync::Arc;

use tierpass::registry::{MemorySheet, Registry, SheetRegistry};
use tierpass::transport::{ArtifactRef, EventKind, Keyboard, MessageRef, Outbound, Sender};
use tierpass::workflow::WorkflowState;
use tierpass::{AdminAction, Bot, InboundEvent, MemoryTransport, PaidTier, TierpassConfig, UserId, UserRecord};

pub const ADMINS: [UserId; 2] = [9001, 9002];
pub const USER: UserId = 4242;

pub fn config() -> TierpassConfig {
    let mut config = TierpassConfig::default();
    config.admins.ids = ADMINS.to_vec();
    config.admins.contact = "@support".to_string();
    config.registry.requests_per_second = 1_000;
    config.registry.burst = 1_000;
    config
}

pub struct Harness {
    pub bot: Arc<Bot>,
    pub transport: Arc<MemoryTransport>,
    pub registry: Arc<dyn Registry>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_registry(Arc::new(SheetRegistry::new(MemorySheet::new())))
    }

    pub fn with_registry(registry: Arc<dyn Registry>) -> Self {
        Self::with_config(config(), registry)
    }

    pub fn with_config(config: TierpassConfig, registry: Arc<dyn Registry>) -> Self {
        let transport = Arc::new(MemoryTransport::new());
        let bot = Bot::new(&config, Arc::clone(&registry), transport.clone()).expect("valid test config");
        Self {
            bot: Arc::new(bot),
            transport,
            registry,
        }
    }

    pub async fn send(&self, user: UserId, kind: EventKind) {
        self.bot.dispatch(event(user, kind)).await;
    }

    pub async fn text(&self, user: UserId, text: &str) {
        self.send(user, EventKind::Text { text: text.to_string() }).await;
    }

    pub async fn command(&self, user: UserId, name: &str) {
        self.send(user, EventKind::Command { name: name.to_string() }).await;
    }

    pub async fn button(&self, user: UserId, callback: &str) {
        self.send(
            user,
            EventKind::Button {
                callback: callback.to_string(),
                message_id: None,
            },
        )
        .await;
    }

    pub async fn photo(&self, user: UserId, artifact: &str) {
        self.send(
            user,
            EventKind::Image {
                artifact: ArtifactRef::new(artifact),
            },
        )
        .await;
    }

    /// Press a decision button on the admin's copy of the notice, when one exists.
    pub async fn decide(&self, admin: UserId, action: AdminAction) {
        let message_id = self.notice_for(admin).map(|m| m.message_id);
        self.send(
            admin,
            EventKind::Button {
                callback: action.callback(),
                message_id,
            },
        )
        .await;
    }

    pub async fn approve(&self, admin: UserId, user: UserId, tier: PaidTier) {
        self.decide(admin, AdminAction::approve(user, tier)).await;
    }

    pub async fn reject(&self, admin: UserId, user: UserId) {
        self.decide(admin, AdminAction::reject(user)).await;
    }

    /// Walk `user` from the menu up to the proof upload.
    pub async fn submit(&self, user: UserId, plan: &str, method: &str, proof: &str) {
        self.text(user, "Advertising Service").await;
        self.button(user, &format!("plan:{plan}")).await;
        self.button(user, "confirm").await;
        self.button(user, &format!("method:{method}")).await;
        self.photo(user, proof).await;
    }

    pub async fn state(&self, user: UserId) -> WorkflowState {
        self.bot
            .sessions()
            .get(user)
            .await
            .map(|view| view.state)
            .unwrap_or(WorkflowState::Idle)
    }

    pub async fn record(&self, user: UserId) -> Option<UserRecord> {
        self.registry.find(user).await.expect("registry readable")
    }

    pub fn last_text(&self, chat: UserId) -> String {
        self.transport
            .last_to(chat)
            .map(|o| o.body().to_string())
            .unwrap_or_default()
    }

    pub fn last_keyboard(&self, chat: UserId) -> Option<Keyboard> {
        self.transport.last_to(chat).and_then(|o| o.keyboard().cloned())
    }

    fn notice_for(&self, admin: UserId) -> Option<MessageRef> {
        self.transport.images_to(admin).into_iter().rev().find_map(|o| match o {
            Outbound::Image { message, .. } => Some(message),
            _ => None,
        })
    }
}

pub fn event(user: UserId, kind: EventKind) -> InboundEvent {
    InboundEvent {
        chat_id: user,
        from: Sender {
            id: user,
            display_name: format!("User {user}"),
            handle: Some(format!("user{user}")),
        },
        kind,
    }
}

/// Whether a reply keyboard offers a button labelled `label`.
pub fn offers(keyboard: Option<&Keyboard>, label: &str) -> bool {
    match keyboard {
        Some(Keyboard::Reply(rows)) => rows.iter().flatten().any(|l| l == label),
        Some(Keyboard::Inline(rows)) => rows.iter().flatten().any(|b| b.label == label),
        _ => false,
    }
}
