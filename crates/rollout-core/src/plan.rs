//! Frozen deployment plans.
//!
//! A `DeploymentPlan` is only produced by `PlanBuilder::build` and is
//! read-only from then on. The dispatcher borrows it; nothing mutates it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::action::{ActionSet, DeploymentAction};

pub type SetId = Uuid;
pub type PlanId = Uuid;

/// Where a set of actions is applied. A set has exactly one scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", content = "name", rename_all = "snake_case")]
pub enum TargetScope {
    /// No explicit target: the single server of a standalone installation.
    Standalone,
    /// The domain controller singleton.
    Domain,
    /// Every server currently registered in the named group.
    ServerGroup(String),
}

impl std::fmt::Display for TargetScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standalone => f.write_str("standalone"),
            Self::Domain => f.write_str("domain"),
            Self::ServerGroup(name) => write!(f, "server-group:{name}"),
        }
    }
}

// ---------------------------------------------------------------------------
// DeploymentSetPlan
// ---------------------------------------------------------------------------

/// An ordered batch of actions applied as a unit to one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentSetPlan {
    id: SetId,
    scope: TargetScope,
    rollback: bool,
    actions: ActionSet,
}

impl DeploymentSetPlan {
    pub(crate) fn new(scope: TargetScope, rollback: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            scope,
            rollback,
            actions: ActionSet::default(),
        }
    }

    pub fn id(&self) -> SetId {
        self.id
    }

    pub fn scope(&self) -> &TargetScope {
        &self.scope
    }

    /// Whether a failure reverts the actions already applied to that target.
    pub fn rollback_on_failure(&self) -> bool {
        self.rollback
    }

    pub fn actions(&self) -> &ActionSet {
        &self.actions
    }

    pub(crate) fn actions_mut(&mut self) -> &mut ActionSet {
        &mut self.actions
    }

    pub(crate) fn set_scope(&mut self, scope: TargetScope) {
        self.scope = scope;
    }

    pub(crate) fn set_rollback(&mut self, rollback: bool) {
        self.rollback = rollback;
    }
}

// ---------------------------------------------------------------------------
// DeploymentPlan
// ---------------------------------------------------------------------------

/// Set once the plan has been handed to a dispatcher. Clones share it; it
/// takes no part in equality.
#[derive(Debug, Clone, Default)]
struct DispatchMark(Arc<AtomicBool>);

impl PartialEq for DispatchMark {
    fn eq(&self, _: &Self) -> bool {
        true
    }
}

impl Eq for DispatchMark {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentPlan {
    id: PlanId,
    sets: Vec<DeploymentSetPlan>,
    created_at: DateTime<Utc>,
    #[serde(skip)]
    dispatched: DispatchMark,
}

impl DeploymentPlan {
    pub(crate) fn new(sets: Vec<DeploymentSetPlan>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sets,
            created_at: Utc::now(),
            dispatched: DispatchMark::default(),
        }
    }

    /// Whether this plan (or a clone of it) has been dispatched.
    pub fn is_dispatched(&self) -> bool {
        self.dispatched.0.load(Ordering::SeqCst)
    }

    /// Claim the plan for dispatch. Returns `false` if it was already claimed.
    pub(crate) fn mark_dispatched(&self) -> bool {
        !self.dispatched.0.swap(true, Ordering::SeqCst)
    }

    pub fn id(&self) -> PlanId {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn sets(&self) -> &[DeploymentSetPlan] {
        &self.sets
    }

    pub fn set(&self, id: SetId) -> Option<&DeploymentSetPlan> {
        self.sets.iter().find(|s| s.id == id)
    }

    pub fn action_count(&self) -> usize {
        self.sets.iter().map(|s| s.actions.len()).sum()
    }

    /// Every action in plan order, paired with the set it belongs to.
    pub fn actions(&self) -> impl Iterator<Item = (&DeploymentSetPlan, &DeploymentAction)> {
        self.sets
            .iter()
            .flat_map(|set| set.actions.iter().map(move |a| (set, a)))
    }
}
