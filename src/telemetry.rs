use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use crate::config::ObservabilityConfig;
use crate::registry::UserId;

/// Initialize structured logging.
/// Logs go to stderr; stdout is reserved for outbound messages.
pub fn init_telemetry(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.log_level))?;

    let registry = tracing_subscriber::registry().with(filter);
    if config.json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()?;
    }

    tracing::info!(json = config.json, "Tierpass telemetry initialized");
    Ok(())
}

/// Generate a correlation ID for linking everything one inbound event causes
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span wrapping the handling of one inbound event
pub fn create_event_span(user_id: UserId, event_kind: &str, correlation_id: &str) -> tracing::Span {
    tracing::info_span!(
        "inbound_event",
        user.id = user_id,
        event.kind = event_kind,
        correlation.id = correlation_id,
    )
}

/// Span wrapping one administrator decision
pub fn create_decision_span(target_user_id: UserId, admin_id: UserId, outcome: &str) -> tracing::Span {
    tracing::info_span!(
        "admin_decision",
        user.id = target_user_id,
        admin.id = admin_id,
        decision = outcome,
    )
}
