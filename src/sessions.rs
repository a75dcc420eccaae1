//! Per-user conversation sessions, held in process memory.
//!
//! A session exists only while a user is inside the purchase flow. Each user
//! has a slot guarded by its own async mutex; the workflow holds the slot for
//! the whole of one inbound event so rapid events from the same user are
//! applied one after another. Sessions idle for longer than the configured
//! timeout are dropped the next time the slot is touched.

use chrono::{DateTime, Duration, Utc};
use statig::prelude::{IntoStateMachineExt, StateMachine};
use std::sync::Arc;
use tracing::debug;

use crate::catalog::Catalog;
use crate::locks::{KeyedGuard, KeyedMutex};
use crate::registry::UserId;
use crate::transport::ArtifactRef;
use crate::workflow::machine::{FlowMachine, WorkflowState};

pub struct Session {
    pub flow: StateMachine<FlowMachine>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            flow: FlowMachine::new(catalog).state_machine(),
            last_activity: Utc::now(),
        }
    }

    pub fn state(&self) -> WorkflowState {
        WorkflowState::from(self.flow.state())
    }

    pub fn view(&self) -> SessionView {
        let flow = self.flow.inner();
        SessionView {
            state: self.state(),
            selected_plan: flow.selected_plan().map(str::to_string),
            payment_method: flow.payment_method().map(str::to_string),
            pending_proof: flow.pending_proof().cloned(),
            last_activity: self.last_activity,
        }
    }
}

/// Read-only snapshot of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    pub state: WorkflowState,
    pub selected_plan: Option<String>,
    pub payment_method: Option<String>,
    pub pending_proof: Option<ArtifactRef>,
    pub last_activity: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SessionStore {
    slots: KeyedMutex<UserId, Option<Session>>,
    idle_timeout: Duration,
}

impl SessionStore {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            slots: KeyedMutex::new(),
            idle_timeout,
        }
    }

    /// Exclusive access to `user_id`'s slot. Expired sessions are already gone.
    pub async fn lock(&self, user_id: UserId) -> SessionGuard {
        let mut slot = self.slots.lock(user_id).await;
        let expired = slot
            .as_ref()
            .is_some_and(|session| Utc::now() - session.last_activity > self.idle_timeout);
        if expired {
            debug!(user_id, "Discarding idle session");
            *slot = None;
        }
        SessionGuard { slot }
    }

    pub async fn get(&self, user_id: UserId) -> Option<SessionView> {
        self.lock(user_id).await.view()
    }

    pub async fn put(&self, user_id: UserId, session: Session) {
        self.lock(user_id).await.replace(session);
    }

    pub async fn clear(&self, user_id: UserId) {
        self.lock(user_id).await.clear();
    }

    /// Number of users holding a slot, idle or locked.
    pub fn active_slots(&self) -> usize {
        self.slots.len()
    }
}

pub struct SessionGuard {
    slot: KeyedGuard<UserId, Option<Session>>,
}

impl SessionGuard {
    pub fn user_id(&self) -> UserId {
        *self.slot.key()
    }

    pub fn session(&self) -> Option<&Session> {
        self.slot.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut Session> {
        self.slot.as_mut()
    }

    /// Current state; no session reads as idle.
    pub fn state(&self) -> WorkflowState {
        self.session()
            .map(Session::state)
            .unwrap_or(WorkflowState::Idle)
    }

    pub fn view(&self) -> Option<SessionView> {
        self.session().map(Session::view)
    }

    /// The session, created fresh if the user has none.
    pub fn get_or_start(&mut self, catalog: &Arc<Catalog>) -> &mut Session {
        self.slot
            .get_or_insert_with(|| Session::new(Arc::clone(catalog)))
    }

    pub fn replace(&mut self, session: Session) {
        *self.slot = Some(session);
    }

    pub fn clear(&mut self) {
        *self.slot = None;
    }

    /// Record activity, or drop the session once the flow is back at idle.
    pub fn settle(&mut self) {
        let finished = match self.slot.as_mut() {
            Some(session) if session.state() == WorkflowState::Idle => true,
            Some(session) => {
                session.last_activity = Utc::now();
                false
            }
            None => false,
        };
        if finished {
            *self.slot = None;
        }
    }
}
