// Tierpass Library - paid-tier access workflow for chat bots
// This exposes the core components for testing and integration

pub mod approval;
pub mod bot;
pub mod catalog;
pub mod config;
pub mod locks;
pub mod registry;
pub mod sessions;
pub mod shutdown;
pub mod telemetry;
pub mod transport;
pub mod workflow;

// Re-export key types for easy access
pub use approval::{AdminAction, AdminDecision, ApprovalCoordinator, DecisionError, DecisionOutcome};
pub use bot::Bot;
pub use catalog::{Catalog, CatalogError, PaymentMethod, Plan};
pub use config::{ConfigError, TierpassConfig};
pub use registry::{
    AccessLevel, MemorySheet, PaidTier, RegistrationStatus, Registry, RegistryError, ResilientRegistry,
    SheetRegistry, UserId, UserRecord,
};
pub use sessions::{SessionStore, SessionView};
pub use shutdown::ShutdownCoordinator;
pub use telemetry::{generate_correlation_id, init_telemetry};
pub use transport::{ChatTransport, ConsoleTransport, InboundEvent, MemoryTransport, Notifier};
pub use workflow::{Workflow, WorkflowError, WorkflowState};
