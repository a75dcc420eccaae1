use serde::{Deserialize, Serialize};
use statig::prelude::*;
use std::fmt;
use std::sync::Arc;

use crate::catalog::Catalog;
use crate::transport::ArtifactRef;

/// Where a user is in the purchase conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowState {
    Idle,
    PlanSelection,
    PlanConfirmation,
    PaymentMethodSelection,
    AwaitingProof,
    AwaitingAdminDecision,
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Idle => "idle",
            WorkflowState::PlanSelection => "plan_selection",
            WorkflowState::PlanConfirmation => "plan_confirmation",
            WorkflowState::PaymentMethodSelection => "payment_method_selection",
            WorkflowState::AwaitingProof => "awaiting_proof",
            WorkflowState::AwaitingAdminDecision => "awaiting_admin_decision",
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowEvent {
    /// Enter (or restart) plan selection.
    Begin,
    PlanChosen { plan_id: String },
    Confirm,
    Cancel,
    Back,
    MethodChosen { method_id: String },
    /// The proof has been recorded and the administrators notified.
    ProofAccepted { proof: ArtifactRef },
    /// Input that means nothing at the current step.
    Unrecognized,
}

/// Working values for one user's conversation.
///
/// The selected plan and method only reach the registry when a proof is
/// submitted; until then they live here and are discarded on cancel.
pub struct FlowMachine {
    catalog: Arc<Catalog>,
    selected_plan: Option<String>,
    payment_method: Option<String>,
    pending_proof: Option<ArtifactRef>,
    rejections: u32,
}

impl FlowMachine {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            selected_plan: None,
            payment_method: None,
            pending_proof: None,
            rejections: 0,
        }
    }

    pub fn selected_plan(&self) -> Option<&str> {
        self.selected_plan.as_deref()
    }

    pub fn payment_method(&self) -> Option<&str> {
        self.payment_method.as_deref()
    }

    pub fn pending_proof(&self) -> Option<&ArtifactRef> {
        self.pending_proof.as_ref()
    }

    /// Count of events refused so far; grows whenever input did not fit the step.
    pub fn rejections(&self) -> u32 {
        self.rejections
    }

    fn reject(&mut self, reason: &str) -> Outcome<State> {
        self.rejections += 1;
        tracing::debug!(reason, "Flow input rejected");
        Handled
    }

    fn discard_working_values(&mut self) {
        self.selected_plan = None;
        self.payment_method = None;
        self.pending_proof = None;
    }
}

#[state_machine(
    initial = "State::idle()",
    state(derive(Debug, Clone, PartialEq, Eq))
)]
impl FlowMachine {
    #[state]
    fn idle(&mut self, event: &FlowEvent) -> Outcome<State> {
        match event {
            FlowEvent::Begin => {
                self.discard_working_values();
                Transition(State::plan_selection())
            }
            _ => self.reject("no flow in progress"),
        }
    }

    #[state(superstate = "in_flow")]
    fn plan_selection(&mut self, event: &FlowEvent) -> Outcome<State> {
        match event {
            FlowEvent::PlanChosen { plan_id } => {
                if self.catalog.plan(plan_id).is_none() {
                    return self.reject("unknown plan");
                }
                self.selected_plan = Some(plan_id.clone());
                tracing::info!(plan = %plan_id, "Plan selected");
                Transition(State::plan_confirmation())
            }
            FlowEvent::Back => {
                self.discard_working_values();
                Transition(State::idle())
            }
            _ => Super,
        }
    }

    #[state(superstate = "in_flow")]
    fn plan_confirmation(&mut self, event: &FlowEvent) -> Outcome<State> {
        match event {
            FlowEvent::Confirm => {
                let still_offered = self
                    .selected_plan
                    .as_deref()
                    .is_some_and(|id| self.catalog.plan(id).is_some());
                if !still_offered {
                    return self.reject("selected plan is no longer offered");
                }
                Transition(State::payment_method_selection())
            }
            FlowEvent::Back => self.back_to_plans(),
            _ => Super,
        }
    }

    #[state(superstate = "in_flow")]
    fn payment_method_selection(&mut self, event: &FlowEvent) -> Outcome<State> {
        match event {
            FlowEvent::MethodChosen { method_id } => {
                if self.catalog.method(method_id).is_none() {
                    return self.reject("unknown payment method");
                }
                self.payment_method = Some(method_id.clone());
                tracing::info!(method = %method_id, "Payment method selected");
                Transition(State::awaiting_proof())
            }
            FlowEvent::Back => self.back_to_plans(),
            _ => Super,
        }
    }

    #[state(superstate = "in_flow")]
    fn awaiting_proof(&mut self, event: &FlowEvent) -> Outcome<State> {
        match event {
            FlowEvent::ProofAccepted { proof } => {
                self.pending_proof = Some(proof.clone());
                Transition(State::awaiting_admin_decision())
            }
            // Cancel is the only way out before the proof is in.
            FlowEvent::Back | FlowEvent::Begin => self.reject("payment details already given"),
            _ => Super,
        }
    }

    /// Only the approval coordinator moves a user on from here, by clearing the session.
    #[state]
    fn awaiting_admin_decision(&mut self, event: &FlowEvent) -> Outcome<State> {
        match event {
            FlowEvent::Unrecognized => self.reject("decision pending"),
            _ => Handled,
        }
    }

    #[superstate]
    fn in_flow(&mut self, event: &FlowEvent) -> Outcome<State> {
        match event {
            FlowEvent::Cancel => {
                self.discard_working_values();
                tracing::info!("Flow cancelled");
                Transition(State::idle())
            }
            FlowEvent::Begin => {
                self.discard_working_values();
                Transition(State::plan_selection())
            }
            _ => self.reject("input does not fit the current step"),
        }
    }
}

impl FlowMachine {
    fn back_to_plans(&mut self) -> Outcome<State> {
        self.discard_working_values();
        Transition(State::plan_selection())
    }
}

impl From<&State> for WorkflowState {
    fn from(state: &State) -> Self {
        match state {
            State::Idle { .. } => WorkflowState::Idle,
            State::PlanSelection { .. } => WorkflowState::PlanSelection,
            State::PlanConfirmation { .. } => WorkflowState::PlanConfirmation,
            State::PaymentMethodSelection { .. } => WorkflowState::PaymentMethodSelection,
            State::AwaitingProof { .. } => WorkflowState::AwaitingProof,
            State::AwaitingAdminDecision { .. } => WorkflowState::AwaitingAdminDecision,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CatalogConfig;
    use proptest::prelude::*;

    fn machine() -> StateMachine<FlowMachine> {
        let defaults = CatalogConfig::default();
        let catalog = Catalog::new(defaults.plans, defaults.payment_methods).unwrap();
        FlowMachine::new(Arc::new(catalog)).state_machine()
    }

    fn current(sm: &StateMachine<FlowMachine>) -> WorkflowState {
        WorkflowState::from(sm.state())
    }

    fn plan(id: &str) -> FlowEvent {
        FlowEvent::PlanChosen {
            plan_id: id.to_string(),
        }
    }

    fn method(id: &str) -> FlowEvent {
        FlowEvent::MethodChosen {
            method_id: id.to_string(),
        }
    }

    fn proof() -> FlowEvent {
        FlowEvent::ProofAccepted {
            proof: ArtifactRef::new("photo-1"),
        }
    }

    #[test]
    fn happy_path_reaches_awaiting_admin_decision() {
        let mut sm = machine();
        assert_eq!(current(&sm), WorkflowState::Idle);

        sm.handle(&FlowEvent::Begin);
        assert_eq!(current(&sm), WorkflowState::PlanSelection);
        sm.handle(&plan("level2"));
        assert_eq!(current(&sm), WorkflowState::PlanConfirmation);
        sm.handle(&FlowEvent::Confirm);
        assert_eq!(current(&sm), WorkflowState::PaymentMethodSelection);
        sm.handle(&method("wave_pay"));
        assert_eq!(current(&sm), WorkflowState::AwaitingProof);
        sm.handle(&proof());
        assert_eq!(current(&sm), WorkflowState::AwaitingAdminDecision);

        assert_eq!(sm.inner().selected_plan(), Some("level2"));
        assert_eq!(sm.inner().payment_method(), Some("wave_pay"));
        assert_eq!(sm.inner().pending_proof(), Some(&ArtifactRef::new("photo-1")));
        assert_eq!(sm.inner().rejections(), 0);
    }

    #[test]
    fn unknown_plan_does_not_advance() {
        let mut sm = machine();
        sm.handle(&FlowEvent::Begin);
        sm.handle(&plan("level9"));

        assert_eq!(current(&sm), WorkflowState::PlanSelection);
        assert_eq!(sm.inner().rejections(), 1);
        assert_eq!(sm.inner().selected_plan(), None);
    }

    #[test]
    fn cancel_at_confirmation_discards_working_values() {
        let mut sm = machine();
        sm.handle(&FlowEvent::Begin);
        sm.handle(&plan("level1"));
        sm.handle(&FlowEvent::Cancel);

        assert_eq!(current(&sm), WorkflowState::Idle);
        assert_eq!(sm.inner().selected_plan(), None);
    }

    #[test]
    fn back_from_method_selection_clears_the_plan() {
        let mut sm = machine();
        sm.handle(&FlowEvent::Begin);
        sm.handle(&plan("level3"));
        sm.handle(&FlowEvent::Confirm);
        sm.handle(&FlowEvent::Back);

        assert_eq!(current(&sm), WorkflowState::PlanSelection);
        assert_eq!(sm.inner().selected_plan(), None);
    }

    #[test]
    fn proof_is_only_accepted_while_awaiting_proof() {
        let mut sm = machine();
        sm.handle(&FlowEvent::Begin);
        sm.handle(&proof());
        assert_eq!(current(&sm), WorkflowState::PlanSelection);
        assert_eq!(sm.inner().pending_proof(), None);
    }

    #[test]
    fn pending_decision_ignores_cancel_and_back() {
        let mut sm = machine();
        for event in [
            FlowEvent::Begin,
            plan("level1"),
            FlowEvent::Confirm,
            method("kbz_pay"),
            proof(),
        ] {
            sm.handle(&event);
        }

        sm.handle(&FlowEvent::Cancel);
        sm.handle(&FlowEvent::Back);
        sm.handle(&FlowEvent::Begin);
        sm.handle(&proof());

        assert_eq!(current(&sm), WorkflowState::AwaitingAdminDecision);
        assert_eq!(sm.inner().selected_plan(), Some("level1"));
    }

    #[test]
    fn awaiting_proof_refuses_back_and_restart() {
        let mut sm = machine();
        for event in [FlowEvent::Begin, plan("level2"), FlowEvent::Confirm, method("wave_pay")] {
            sm.handle(&event);
        }

        sm.handle(&FlowEvent::Back);
        sm.handle(&FlowEvent::Begin);

        assert_eq!(current(&sm), WorkflowState::AwaitingProof);
        assert_eq!(sm.inner().selected_plan(), Some("level2"));
        assert_eq!(sm.inner().payment_method(), Some("wave_pay"));
        assert_eq!(sm.inner().rejections(), 2);

        sm.handle(&FlowEvent::Cancel);
        assert_eq!(current(&sm), WorkflowState::Idle);
        assert_eq!(sm.inner().selected_plan(), None);
    }

    fn any_event() -> impl Strategy<Value = FlowEvent> {
        prop_oneof![
            Just(FlowEvent::Begin),
            Just(FlowEvent::Confirm),
            Just(FlowEvent::Cancel),
            Just(FlowEvent::Back),
            Just(FlowEvent::Unrecognized),
            Just(proof()),
            prop::sample::select(vec!["level1", "level2", "level3", "gold", ""]).prop_map(plan),
            prop::sample::select(vec!["kbz_pay", "wave_pay", "paypal"]).prop_map(method),
        ]
    }

    proptest! {
        #[test]
        fn working_values_match_the_reached_state(events in prop::collection::vec(any_event(), 0..40)) {
            let mut sm = machine();
            for event in &events {
                let before = current(&sm);
                sm.handle(event);

                let state = current(&sm);
                if before == WorkflowState::AwaitingProof {
                    prop_assert!(
                        matches!(
                            state,
                            WorkflowState::AwaitingProof | WorkflowState::AwaitingAdminDecision | WorkflowState::Idle
                        ),
                        "left awaiting_proof for {:?} on {:?}",
                        state,
                        event
                    );
                }
                let flow = sm.inner();
                match state {
                    WorkflowState::Idle | WorkflowState::PlanSelection => {
                        prop_assert!(flow.selected_plan().is_none());
                        prop_assert!(flow.payment_method().is_none());
                    }
                    WorkflowState::PlanConfirmation | WorkflowState::PaymentMethodSelection => {
                        prop_assert!(flow.selected_plan().is_some());
                        prop_assert!(flow.payment_method().is_none());
                    }
                    WorkflowState::AwaitingProof => {
                        prop_assert!(flow.selected_plan().is_some());
                        prop_assert!(flow.payment_method().is_some());
                        prop_assert!(flow.pending_proof().is_none());
                    }
                    WorkflowState::AwaitingAdminDecision => {
                        prop_assert!(flow.pending_proof().is_some());
                    }
                }
            }
        }
    }
}
