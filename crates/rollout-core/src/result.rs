//! Dispatch outcomes and the query surface over them.
//!
//! # Store layout
//!
//! The set-id key space is fixed when dispatch begins: one slot per set, each
//! behind its own `RwLock`. Inside a slot, results are keyed by target and
//! indexed by the action's position in the set:
//!
//! ```text
//! PlanResult
//!   └─ SetSlot (set id)        RwLock
//!        └─ target → [Option<ActionResult>; actions in set]
//! ```
//!
//! Each (set, target) pair has exactly one writer task. Readers clone a slot
//! under its read lock, so a snapshot is always internally consistent. Once
//! the plan is frozen further writes are dropped.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::action::ActionId;
use crate::error::{Result, RolloutError, TargetError};
use crate::fleet::{ApplyPayload, TargetId};
use crate::plan::{DeploymentPlan, PlanId, SetId};

// ---------------------------------------------------------------------------
// ActionResult
// ---------------------------------------------------------------------------

/// What happened when undoing an applied action during rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RollbackOutcome {
    Reverted,
    NotReversible,
    Failed(TargetError),
}

/// Terminal outcome of one action on one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionResult {
    Succeeded(ApplyPayload),
    Failed(TargetError),
    /// Applied, then undone because a later action in the set failed.
    RolledBack {
        payload: ApplyPayload,
        rollback: RollbackOutcome,
    },
    /// Not attempted because an earlier action on this target failed.
    Aborted,
    /// Not attempted because the dispatch was cancelled before the task started.
    Cancelled,
}

impl ActionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn error(&self) -> Option<&TargetError> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Succeeded(_) => "succeeded",
            Self::Failed(_) => "failed",
            Self::RolledBack { .. } => "rolled_back",
            Self::Aborted => "aborted",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus<'a> {
    /// Dispatch for this action on this target has not reported yet.
    Pending,
    Complete(&'a ActionResult),
}

impl<'a> ActionStatus<'a> {
    pub fn result(self) -> Option<&'a ActionResult> {
        match self {
            Self::Pending => None,
            Self::Complete(r) => Some(r),
        }
    }
}

/// Per-target results, indexed by the action's position in its set.
type TargetSlots = BTreeMap<TargetId, Vec<Option<ActionResult>>>;

// ---------------------------------------------------------------------------
// DeploymentSetPlanResult
// ---------------------------------------------------------------------------

/// Point-in-time snapshot of one set's results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentSetPlanResult {
    set_id: SetId,
    action_ids: Vec<ActionId>,
    targets: TargetSlots,
}

impl DeploymentSetPlanResult {
    pub fn set_id(&self) -> SetId {
        self.set_id
    }

    /// Targets this set was resolved to at dispatch time.
    pub fn targets(&self) -> impl Iterator<Item = &TargetId> {
        self.targets.keys()
    }

    pub fn action_result(&self, action: ActionId, target: &TargetId) -> Result<ActionStatus<'_>> {
        let index = self
            .action_ids
            .iter()
            .position(|id| *id == action)
            .ok_or(RolloutError::UnknownAction(action))?;
        let slots = self
            .targets
            .get(target)
            .ok_or_else(|| RolloutError::UnknownTarget(target.to_string()))?;
        Ok(match &slots[index] {
            Some(result) => ActionStatus::Complete(result),
            None => ActionStatus::Pending,
        })
    }

    /// Every action's status on `target`, in plan order.
    pub fn results_for(&self, target: &TargetId) -> Vec<(ActionId, ActionStatus<'_>)> {
        let Some(slots) = self.targets.get(target) else {
            return Vec::new();
        };
        self.action_ids
            .iter()
            .zip(slots)
            .map(|(id, slot)| {
                let status = match slot {
                    Some(r) => ActionStatus::Complete(r),
                    None => ActionStatus::Pending,
                };
                (*id, status)
            })
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.targets.values().flatten().all(Option::is_some)
    }

    pub fn successes(&self) -> usize {
        self.count(ActionResult::is_success)
    }

    pub fn failures(&self) -> usize {
        self.count(ActionResult::is_failure)
    }

    fn count(&self, pred: impl Fn(&ActionResult) -> bool) -> usize {
        self.targets
            .values()
            .flatten()
            .flatten()
            .filter(|r| pred(*r))
            .count()
    }

    fn tally(&self, summary: &mut PlanSummary) {
        for slot in self.targets.values().flatten() {
            match slot {
                None => summary.pending += 1,
                Some(ActionResult::Succeeded(_)) => summary.succeeded += 1,
                Some(ActionResult::Failed(_)) => summary.failed += 1,
                Some(ActionResult::RolledBack { .. }) => summary.rolled_back += 1,
                Some(ActionResult::Aborted) => summary.aborted += 1,
                Some(ActionResult::Cancelled) => summary.cancelled += 1,
            }
        }
    }
}

/// Availability of a set's results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetResultState {
    /// Dispatch for this set has not resolved its targets yet.
    NotStarted,
    Available(DeploymentSetPlanResult),
}

impl SetResultState {
    pub fn available(self) -> Option<DeploymentSetPlanResult> {
        match self {
            Self::NotStarted => None,
            Self::Available(r) => Some(r),
        }
    }
}

// ---------------------------------------------------------------------------
// PlanSummary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub plan_id: PlanId,
    pub complete: bool,
    pub sets_not_started: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub rolled_back: usize,
    pub aborted: usize,
    pub cancelled: usize,
    pub pending: usize,
}

// ---------------------------------------------------------------------------
// PlanResult
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct SetSlot {
    set_id: SetId,
    action_ids: Vec<ActionId>,
    targets: RwLock<Option<TargetSlots>>,
}

impl SetSlot {
    fn read(&self) -> RwLockReadGuard<'_, Option<TargetSlots>> {
        self.targets.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<TargetSlots>> {
        self.targets.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug)]
struct Inner {
    id: PlanId,
    sets: Vec<SetSlot>,
    started_at: DateTime<Utc>,
    completed_at: OnceLock<DateTime<Utc>>,
}

/// Queryable outcome of a dispatched plan.
///
/// Cloning is cheap; every clone observes the same underlying store, so a
/// handle taken mid-flight keeps seeing new results until the plan freezes.
#[derive(Debug, Clone)]
pub struct PlanResult {
    inner: Arc<Inner>,
}

impl PlanResult {
    pub(crate) fn new(plan: &DeploymentPlan) -> Self {
        let sets = plan
            .sets()
            .iter()
            .map(|set| SetSlot {
                set_id: set.id(),
                action_ids: set.actions().ids().collect(),
                targets: RwLock::new(None),
            })
            .collect();
        Self {
            inner: Arc::new(Inner {
                id: plan.id(),
                sets,
                started_at: Utc::now(),
                completed_at: OnceLock::new(),
            }),
        }
    }

    pub fn id(&self) -> PlanId {
        self.inner.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.inner.completed_at.get().copied()
    }

    /// True once every target of every set has reported.
    pub fn is_complete(&self) -> bool {
        self.inner.completed_at.get().is_some()
    }

    pub fn set_ids(&self) -> Vec<SetId> {
        self.inner.sets.iter().map(|s| s.set_id).collect()
    }

    pub fn deployment_set_result(&self, set_id: SetId) -> Result<SetResultState> {
        let slot = self.slot(set_id).ok_or(RolloutError::UnknownSet(set_id))?;
        let guard = slot.read();
        Ok(match guard.as_ref() {
            None => SetResultState::NotStarted,
            Some(targets) => SetResultState::Available(DeploymentSetPlanResult {
                set_id,
                action_ids: slot.action_ids.clone(),
                targets: targets.clone(),
            }),
        })
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary {
            plan_id: self.id(),
            complete: self.is_complete(),
            ..PlanSummary::default()
        };
        for set_id in self.set_ids() {
            match self.deployment_set_result(set_id) {
                Ok(SetResultState::Available(result)) => result.tally(&mut summary),
                Ok(SetResultState::NotStarted) | Err(_) => summary.sets_not_started += 1,
            }
        }
        summary
    }

    // -- dispatcher side ----------------------------------------------------

    fn slot(&self, set_id: SetId) -> Option<&SetSlot> {
        self.inner.sets.iter().find(|s| s.set_id == set_id)
    }

    /// Mark a set started with every (action, target) pending.
    pub(crate) fn start_set(&self, set_id: SetId, targets: &[TargetId]) {
        if self.is_complete() {
            return;
        }
        let Some(slot) = self.slot(set_id) else {
            return;
        };
        let width = slot.action_ids.len();
        let map = targets
            .iter()
            .map(|t| (t.clone(), vec![None; width]))
            .collect();
        *slot.write() = Some(map);
    }

    pub(crate) fn record(&self, set_id: SetId, target: &TargetId, index: usize, result: ActionResult) {
        if self.is_complete() {
            tracing::warn!(plan_id = %self.id(), %set_id, %target, "result recorded after freeze; dropped");
            return;
        }
        let Some(slot) = self.slot(set_id) else {
            return;
        };
        let mut guard = slot.write();
        if let Some(entry) = guard
            .as_mut()
            .and_then(|targets| targets.get_mut(target))
            .and_then(|slots| slots.get_mut(index))
        {
            *entry = Some(result);
        }
    }

    pub(crate) fn freeze(&self) {
        let _ = self.inner.completed_at.set(Utc::now());
    }
}
