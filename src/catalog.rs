//! Plan and payment-method catalogue.
//!
//! Loaded once from configuration and shared read-only. Plans keep their
//! configured order, which is also the order they are offered in.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub price: String,
    pub duration_days: u32,
    #[serde(default)]
    pub features: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: String,
    pub name: String,
    /// Account details shown to the user, e.g. a wallet phone number.
    pub account: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("catalogue has no plans")]
    NoPlans,
    #[error("catalogue has no payment methods")]
    NoPaymentMethods,
    #[error("duplicate {kind} id: {id}")]
    DuplicateId { kind: &'static str, id: String },
    #[error("plan {id} has a zero duration")]
    ZeroDuration { id: String },
    #[error("{kind} id {id:?} must be non-empty and contain no whitespace or ':'")]
    BadId { kind: &'static str, id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    plans: Vec<Plan>,
    methods: Vec<PaymentMethod>,
}

impl Catalog {
    pub fn new(plans: Vec<Plan>, methods: Vec<PaymentMethod>) -> Result<Self, CatalogError> {
        if plans.is_empty() {
            return Err(CatalogError::NoPlans);
        }
        if methods.is_empty() {
            return Err(CatalogError::NoPaymentMethods);
        }
        check_ids("plan", plans.iter().map(|p| p.id.as_str()))?;
        check_ids("payment method", methods.iter().map(|m| m.id.as_str()))?;
        if let Some(plan) = plans.iter().find(|p| p.duration_days == 0) {
            return Err(CatalogError::ZeroDuration {
                id: plan.id.clone(),
            });
        }
        Ok(Self { plans, methods })
    }

    pub fn plans(&self) -> &[Plan] {
        &self.plans
    }

    pub fn methods(&self) -> &[PaymentMethod] {
        &self.methods
    }

    pub fn plan(&self, id: &str) -> Option<&Plan> {
        self.plans.iter().find(|plan| plan.id == id)
    }

    /// Match typed text against plan display names, as the reply keyboard sends them.
    pub fn plan_by_label(&self, text: &str) -> Option<&Plan> {
        let text = text.trim();
        self.plans
            .iter()
            .find(|plan| plan.name.eq_ignore_ascii_case(text))
    }

    pub fn method(&self, id: &str) -> Option<&PaymentMethod> {
        self.methods.iter().find(|method| method.id == id)
    }

    /// Match typed text against method names ("Wave Pay") or their ids ("wave_pay").
    pub fn method_by_label(&self, text: &str) -> Option<&PaymentMethod> {
        let text = text.trim();
        let as_id = text.to_lowercase().replace(' ', "_");
        self.methods
            .iter()
            .find(|method| method.name.eq_ignore_ascii_case(text) || method.id == as_id)
    }
}

fn check_ids<'a>(kind: &'static str, ids: impl Iterator<Item = &'a str>) -> Result<(), CatalogError> {
    let mut seen = HashSet::new();
    for id in ids {
        if id.is_empty() || id.contains(char::is_whitespace) || id.contains(':') {
            return Err(CatalogError::BadId {
                kind,
                id: id.to_string(),
            });
        }
        if !seen.insert(id) {
            return Err(CatalogError::DuplicateId {
                kind,
                id: id.to_string(),
            });
        }
    }
    Ok(())
}
