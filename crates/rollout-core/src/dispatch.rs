//! Fan-out execution of a frozen plan.
//!
//! ```text
//! dispatch(plan)
//!     │  sync checks: runtime present, plan not dispatched before
//!     ▼
//! supervisor task
//!     │  per set: resolve targets now (group membership is live;
//!     │  domain sets also reach every host controller)
//!     ▼
//! one task per (set, target)   ← bounded by a semaphore (max_in_flight)
//!     │  actions strictly in order, each under the apply timeout
//!     ▼
//! PlanResult                    ← frozen when every task has reported
//! ```
//!
//! A failing target never affects another: each task owns its own (set,
//! target) results and errors are values, not panics or early returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

use crate::action::DeploymentAction;
use crate::config::DispatchConfig;
use crate::error::{Result, RolloutError, TargetError};
use crate::fleet::{ApplyPayload, FleetResolver, TargetApplier, TargetId};
use crate::plan::{DeploymentPlan, DeploymentSetPlan, PlanId, TargetScope};
use crate::result::{ActionResult, PlanResult, RollbackOutcome};

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

pub struct Dispatcher {
    resolver: Arc<dyn FleetResolver>,
    applier: Arc<dyn TargetApplier>,
    config: DispatchConfig,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(
        resolver: Arc<dyn FleetResolver>,
        applier: Arc<dyn TargetApplier>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            resolver,
            applier,
            config,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Start applying `plan` and return immediately.
    ///
    /// Fails only for plan-level problems: no Tokio runtime, a plan that was
    /// already dispatched (by any dispatcher, or through a clone), or an
    /// invalid dispatch config. Target failures are recorded in the returned
    /// handle's [`PlanResult`].
    pub fn dispatch(&self, plan: &DeploymentPlan) -> Result<DispatchHandle> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| RolloutError::NoRuntime)?;
        self.config.validate()?;
        if plan.sets().is_empty() {
            return Err(RolloutError::EmptyPlan);
        }
        // The mark lives on the plan, so a dispatcher keeps no per-plan state.
        if !plan.mark_dispatched() {
            return Err(RolloutError::AlreadyDispatched(plan.id()));
        }

        let result = PlanResult::new(plan);
        let cancelled = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = watch::channel(false);
        let ctx = Arc::new(TaskContext {
            resolver: Arc::clone(&self.resolver),
            applier: Arc::clone(&self.applier),
            timeout: self.config.apply_timeout(),
            slots: Arc::new(Semaphore::new(self.config.max_in_flight)),
            cancelled: Arc::clone(&cancelled),
            result: result.clone(),
        });

        tracing::info!(
            plan_id = %plan.id(),
            sets = plan.sets().len(),
            actions = plan.action_count(),
            "dispatch started"
        );
        runtime.spawn(supervise(ctx, plan.sets().to_vec(), done_tx));

        Ok(DispatchHandle {
            result,
            cancelled,
            done: done_rx,
        })
    }

    /// Dispatch `plan` and wait for every target to report.
    pub async fn run(&self, plan: &DeploymentPlan) -> Result<PlanResult> {
        let mut handle = self.dispatch(plan)?;
        Ok(handle.wait().await)
    }
}

// ---------------------------------------------------------------------------
// DispatchHandle
// ---------------------------------------------------------------------------

/// Handle to an in-flight dispatch.
#[derive(Debug)]
pub struct DispatchHandle {
    result: PlanResult,
    cancelled: Arc<AtomicBool>,
    done: watch::Receiver<bool>,
}

impl DispatchHandle {
    pub fn plan_id(&self) -> PlanId {
        self.result.id()
    }

    /// Live view of the results; usable before completion.
    pub fn result(&self) -> PlanResult {
        self.result.clone()
    }

    /// Skip every task that has not started yet. Tasks already applying
    /// actions run to the end of their sequence.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            tracing::info!(plan_id = %self.plan_id(), "dispatch cancelled");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_complete(&self) -> bool {
        self.result.is_complete()
    }

    /// Wait until the plan result is frozen.
    pub async fn wait(&mut self) -> PlanResult {
        // Err means the supervisor is gone; the result is as final as it gets.
        let _ = self.done.wait_for(|done| *done).await;
        self.result.clone()
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

struct TaskContext {
    resolver: Arc<dyn FleetResolver>,
    applier: Arc<dyn TargetApplier>,
    timeout: Duration,
    slots: Arc<Semaphore>,
    cancelled: Arc<AtomicBool>,
    result: PlanResult,
}

impl TaskContext {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    async fn apply(
        &self,
        target: &TargetId,
        action: &DeploymentAction,
    ) -> std::result::Result<ApplyPayload, TargetError> {
        if !self.resolver.is_registered(target) {
            return Err(TargetError::unknown_target(target));
        }
        match tokio::time::timeout(self.timeout, self.applier.apply(target, action)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(TargetError::timeout(self.timeout)),
        }
    }
}

fn resolve_targets(resolver: &dyn FleetResolver, scope: &TargetScope) -> Vec<TargetId> {
    match scope {
        TargetScope::Standalone => vec![TargetId::Standalone],
        TargetScope::Domain => {
            let mut hosts = resolver.hosts();
            hosts.sort();
            hosts.dedup();
            std::iter::once(TargetId::Domain)
                .chain(hosts.into_iter().map(TargetId::Host))
                .collect()
        }
        TargetScope::ServerGroup(group) => {
            let mut targets: Vec<TargetId> = resolver
                .members_of(group)
                .into_iter()
                .map(TargetId::Server)
                .collect();
            targets.sort();
            targets.dedup();
            targets
        }
    }
}

async fn supervise(ctx: Arc<TaskContext>, sets: Vec<DeploymentSetPlan>, done: watch::Sender<bool>) {
    let plan_id = ctx.result.id();
    let mut tasks = JoinSet::new();
    let mut started = Vec::new();

    for set in sets {
        let targets = resolve_targets(ctx.resolver.as_ref(), set.scope());
        if targets.is_empty() {
            tracing::warn!(%plan_id, set_id = %set.id(), scope = %set.scope(), "no targets resolved for set");
        } else {
            tracing::debug!(%plan_id, set_id = %set.id(), targets = targets.len(), "set resolved");
        }
        ctx.result.start_set(set.id(), &targets);

        let set = Arc::new(set);
        for target in &targets {
            tasks.spawn(run_target(Arc::clone(&ctx), Arc::clone(&set), target.clone()));
        }
        started.push((set, targets));
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            tracing::error!(%plan_id, error = %e, "dispatch task terminated abnormally");
        }
    }

    // A task that died mid-sequence leaves pending slots behind.
    for (set, targets) in &started {
        fail_pending(&ctx.result, set, targets);
    }

    ctx.result.freeze();
    let summary = ctx.result.summary();
    tracing::info!(
        %plan_id,
        succeeded = summary.succeeded,
        failed = summary.failed,
        rolled_back = summary.rolled_back,
        aborted = summary.aborted,
        cancelled = summary.cancelled,
        "dispatch complete"
    );
    let _ = done.send(true);
}

fn fail_pending(result: &PlanResult, set: &DeploymentSetPlan, targets: &[TargetId]) {
    let Ok(state) = result.deployment_set_result(set.id()) else {
        return;
    };
    let Some(snapshot) = state.available() else {
        return;
    };
    for target in targets {
        for (index, (_, status)) in snapshot.results_for(target).into_iter().enumerate() {
            if status.result().is_none() {
                result.record(
                    set.id(),
                    target,
                    index,
                    ActionResult::Failed(TargetError::Rejected {
                        reason: "dispatch task terminated before reporting".into(),
                        cause: None,
                    }),
                );
            }
        }
    }
}

async fn run_target(ctx: Arc<TaskContext>, set: Arc<DeploymentSetPlan>, target: TargetId) {
    let plan_id = ctx.result.id();
    let set_id = set.id();
    let actions: Vec<&DeploymentAction> = set.actions().iter().collect();

    let _permit = match Arc::clone(&ctx.slots).acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            record_all(&ctx.result, &set, &target, 0, ActionResult::Cancelled);
            return;
        }
    };
    if ctx.is_cancelled() {
        tracing::warn!(%plan_id, %set_id, %target, "task skipped: dispatch cancelled");
        record_all(&ctx.result, &set, &target, 0, ActionResult::Cancelled);
        return;
    }

    let rollback = set.rollback_on_failure();
    // With rollback on, successes stay provisional until the sequence ends.
    let mut applied: Vec<(usize, ApplyPayload)> = Vec::new();

    for (index, action) in actions.iter().enumerate() {
        match ctx.apply(&target, action).await {
            Ok(payload) => {
                tracing::debug!(%plan_id, %set_id, %target, action = %action, "applied");
                if !rollback {
                    ctx.result
                        .record(set_id, &target, index, ActionResult::Succeeded(payload.clone()));
                }
                applied.push((index, payload));
            }
            Err(error) => {
                tracing::warn!(%plan_id, %set_id, %target, action = %action, %error, "action failed");
                let gone = matches!(error, TargetError::UnknownTarget { .. });
                let rest = if gone {
                    ActionResult::Failed(TargetError::unknown_target(&target))
                } else {
                    ActionResult::Aborted
                };
                ctx.result
                    .record(set_id, &target, index, ActionResult::Failed(error));
                record_all(&ctx.result, &set, &target, index + 1, rest);

                if rollback {
                    if gone {
                        for (index, payload) in applied {
                            ctx.result
                                .record(set_id, &target, index, ActionResult::Succeeded(payload));
                        }
                    } else {
                        roll_back(&ctx, &set, &target, applied).await;
                    }
                }
                return;
            }
        }
    }

    if rollback {
        for (index, payload) in applied {
            ctx.result
                .record(set_id, &target, index, ActionResult::Succeeded(payload));
        }
    }
}

/// Undo applied actions newest-first. Rollback failures are recorded but
/// never trigger further rollback.
async fn roll_back(
    ctx: &TaskContext,
    set: &DeploymentSetPlan,
    target: &TargetId,
    applied: Vec<(usize, ApplyPayload)>,
) {
    let actions: Vec<&DeploymentAction> = set.actions().iter().collect();
    tracing::warn!(
        plan_id = %ctx.result.id(),
        set_id = %set.id(),
        %target,
        actions = applied.len(),
        "rolling back"
    );
    for (index, payload) in applied.into_iter().rev() {
        let rollback = match actions[index].compensating() {
            None => RollbackOutcome::NotReversible,
            Some(undo) => match ctx.apply(target, &undo).await {
                Ok(_) => RollbackOutcome::Reverted,
                Err(error) => {
                    tracing::warn!(%target, action = %undo, %error, "rollback step failed");
                    RollbackOutcome::Failed(error)
                }
            },
        };
        ctx.result.record(
            set.id(),
            target,
            index,
            ActionResult::RolledBack { payload, rollback },
        );
    }
}

fn record_all(
    result: &PlanResult,
    set: &DeploymentSetPlan,
    target: &TargetId,
    from: usize,
    outcome: ActionResult,
) {
    for index in from..set.actions().len() {
        result.record(set.id(), target, index, outcome.clone());
    }
}
