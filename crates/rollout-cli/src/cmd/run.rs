use crate::output::{print_json, print_table};
use rollout_core::{
    ActionResult, ActionStatus, DeploymentAction, DeploymentPlan, Dispatcher, FleetConfig,
    MemoryFleet, PlanResult, PlanSummary, RollbackOutcome, SetResultState,
};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

#[derive(Serialize)]
struct Report<'a> {
    plan_id: String,
    summary: PlanSummary,
    results: Vec<OutcomeRow<'a>>,
}

#[derive(Serialize)]
struct OutcomeRow<'a> {
    set: usize,
    scope: String,
    target: String,
    action: &'a DeploymentAction,
    /// `None` while pending.
    result: Option<ActionResult>,
}

pub fn run(
    mut fleet: FleetConfig,
    plan_path: &Path,
    timeout_ms: Option<u64>,
    json: bool,
) -> anyhow::Result<()> {
    if let Some(ms) = timeout_ms {
        fleet.dispatch.apply_timeout_ms = ms;
        fleet.dispatch.validate()?;
    }
    let plan = super::build_plan(&fleet, plan_path)?;

    let targets = Arc::new(MemoryFleet::from_config(&fleet));
    let dispatcher = Dispatcher::new(targets.clone(), targets, fleet.dispatch.clone());

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(dispatcher.run(&plan))?;

    let rows = collect_rows(&plan, &result)?;
    let summary = result.summary();

    if json {
        return print_json(&Report {
            plan_id: plan.id().to_string(),
            summary,
            results: rows,
        });
    }

    let table: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            vec![
                row.set.to_string(),
                row.target.clone(),
                row.action.to_string(),
                row.result
                    .as_ref()
                    .map_or("pending", ActionResult::label)
                    .to_string(),
                row.result.as_ref().map_or_else(|| "-".to_string(), detail),
            ]
        })
        .collect();
    print_table(&["SET", "TARGET", "ACTION", "OUTCOME", "DETAIL"], &table);
    println!();
    println!(
        "{} succeeded, {} failed, {} rolled back, {} aborted, {} cancelled",
        summary.succeeded, summary.failed, summary.rolled_back, summary.aborted, summary.cancelled
    );
    Ok(())
}

fn collect_rows<'a>(
    plan: &'a DeploymentPlan,
    result: &PlanResult,
) -> anyhow::Result<Vec<OutcomeRow<'a>>> {
    let mut rows = Vec::new();
    for (n, set) in plan.sets().iter().enumerate() {
        let SetResultState::Available(snapshot) = result.deployment_set_result(set.id())? else {
            continue;
        };
        if snapshot.targets().next().is_none() {
            tracing::warn!(set = n + 1, scope = %set.scope(), "set had no targets");
        }
        for target in snapshot.targets() {
            for (action_id, status) in snapshot.results_for(target) {
                let Some(action) = set.actions().get(action_id) else {
                    continue;
                };
                rows.push(OutcomeRow {
                    set: n + 1,
                    scope: set.scope().to_string(),
                    target: target.to_string(),
                    action,
                    result: match status {
                        ActionStatus::Pending => None,
                        ActionStatus::Complete(r) => Some(r.clone()),
                    },
                });
            }
        }
    }
    Ok(rows)
}

fn detail(result: &ActionResult) -> String {
    match result {
        ActionResult::Succeeded(payload) => payload
            .message
            .clone()
            .unwrap_or_else(|| format!("{} server(s) affected", payload.affected.len())),
        ActionResult::Failed(e) => e.to_string(),
        ActionResult::RolledBack { rollback, .. } => match rollback {
            RollbackOutcome::Reverted => "reverted".to_string(),
            RollbackOutcome::NotReversible => "not reversible".to_string(),
            RollbackOutcome::Failed(e) => format!("rollback failed: {e}"),
        },
        ActionResult::Aborted => "earlier action failed".to_string(),
        ActionResult::Cancelled => "dispatch cancelled".to_string(),
    }
}
