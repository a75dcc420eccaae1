//! Inbound events decoded once into what the user means.

use crate::catalog::Catalog;
use crate::registry::PaidTier;
use crate::transport::{ArtifactRef, EventKind};

pub const REQUEST_SERVICE: &str = "Advertising Service";
pub const SERVICE_INFO: &str = "Advertising Info";
pub const PAYMENT_INFO: &str = "Payment Method";
pub const HELP_CENTER: &str = "Help Center";
pub const USER_INFO: &str = "User Info";
pub const CONFIRM: &str = "✅ Confirm";
pub const CANCEL: &str = "❌ Cancel";
pub const BACK: &str = "⬅️ Back";

pub const PLAN_PAYLOAD: &str = "plan:";
pub const METHOD_PAYLOAD: &str = "method:";
pub const CONFIRM_PAYLOAD: &str = "confirm";
pub const CANCEL_PAYLOAD: &str = "cancel";
pub const BACK_PAYLOAD: &str = "back";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Start,
    Help,
    Status,
    RequestService,
    ServiceInfo,
    PaymentInfo,
    Cancel,
    Back,
    Confirm,
    PlanChosen(String),
    MethodChosen(String),
    ProofUploaded(ArtifactRef),
    LevelServices(PaidTier),
    Unrecognized(String),
}

impl Intent {
    pub fn decode(kind: &EventKind, catalog: &Catalog) -> Self {
        match kind {
            EventKind::Command { name } => Self::command(name),
            EventKind::Text { text } => Self::text(text, catalog),
            EventKind::Image { artifact } => Intent::ProofUploaded(artifact.clone()),
            EventKind::Button { callback, .. } => Self::button(callback),
        }
    }

    /// Intents that never touch the session.
    pub fn is_informational(&self) -> bool {
        matches!(
            self,
            Intent::Help | Intent::Status | Intent::ServiceInfo | Intent::PaymentInfo | Intent::LevelServices(_)
        )
    }

    fn command(name: &str) -> Self {
        let name = name.trim().trim_start_matches('/');
        // Group chats address commands as /start@bot_name.
        let name = name.split('@').next().unwrap_or(name);
        match name.to_ascii_lowercase().as_str() {
            "start" => Intent::Start,
            "service" => Intent::RequestService,
            "help" => Intent::Help,
            "cancel" => Intent::Cancel,
            "status" => Intent::Status,
            _ => Intent::Unrecognized(format!("/{name}")),
        }
    }

    fn button(payload: &str) -> Self {
        if let Some(plan_id) = payload.strip_prefix(PLAN_PAYLOAD) {
            return Intent::PlanChosen(plan_id.to_string());
        }
        if let Some(method_id) = payload.strip_prefix(METHOD_PAYLOAD) {
            return Intent::MethodChosen(method_id.to_string());
        }
        match payload {
            CONFIRM_PAYLOAD => Intent::Confirm,
            CANCEL_PAYLOAD => Intent::Cancel,
            BACK_PAYLOAD => Intent::Back,
            _ => Intent::Unrecognized(payload.to_string()),
        }
    }

    fn text(text: &str, catalog: &Catalog) -> Self {
        let trimmed = text.trim();
        if trimmed.starts_with('/') {
            return Self::command(trimmed);
        }
        match trimmed {
            REQUEST_SERVICE => return Intent::RequestService,
            SERVICE_INFO => return Intent::ServiceInfo,
            PAYMENT_INFO => return Intent::PaymentInfo,
            HELP_CENTER => return Intent::Help,
            USER_INFO => return Intent::Status,
            CONFIRM => return Intent::Confirm,
            CANCEL | "Cancel" => return Intent::Cancel,
            BACK => return Intent::Back,
            _ => {}
        }
        if let Some(tier) = tier_services_label(trimmed) {
            return Intent::LevelServices(tier);
        }
        if let Some(plan) = catalog.plan_by_label(trimmed) {
            return Intent::PlanChosen(plan.id.clone());
        }
        if let Some(method) = catalog.method_by_label(trimmed) {
            return Intent::MethodChosen(method.id.clone());
        }
        Intent::Unrecognized(trimmed.to_string())
    }
}

/// Label of the service button shown to members of `tier`.
pub fn services_label(tier: PaidTier) -> String {
    format!("{tier} Services")
}

fn tier_services_label(text: &str) -> Option<PaidTier> {
    text.strip_suffix(" Services")?.parse().ok()
}
