//! The user-facing purchase conversation.
//!
//! [`intent`] turns raw chat events into intents, [`machine`] is the per-user
//! state machine, [`prompts`] holds every reply, and [`engine`] ties them to
//! the session store and the registry.

pub mod engine;
pub mod intent;
pub mod machine;
pub mod prompts;

pub use engine::{Workflow, WorkflowError};
pub use intent::Intent;
pub use machine::{FlowEvent, FlowMachine, WorkflowState};
pub use prompts::Prompt;
