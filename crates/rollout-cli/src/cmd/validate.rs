use crate::output::{print_json, print_table};
use rollout_core::FleetConfig;
use std::path::Path;

pub fn run(fleet: &FleetConfig, plan_path: &Path, json: bool) -> anyhow::Result<()> {
    let plan = super::build_plan(fleet, plan_path)?;

    if json {
        return print_json(&plan);
    }

    println!(
        "plan {}: {} set(s), {} action(s)",
        plan.id(),
        plan.sets().len(),
        plan.action_count()
    );
    for (n, set) in plan.sets().iter().enumerate() {
        println!();
        println!(
            "set {} -> {}{}",
            n + 1,
            set.scope(),
            if set.rollback_on_failure() {
                " (rollback on failure)"
            } else {
                ""
            }
        );
        let rows: Vec<Vec<String>> = set
            .actions()
            .iter()
            .enumerate()
            .map(|(i, action)| {
                vec![
                    (i + 1).to_string(),
                    action.kind().to_string(),
                    action.unit().to_string(),
                    action.replaced().unwrap_or("-").to_string(),
                ]
            })
            .collect();
        print_table(&["#", "KIND", "UNIT", "REPLACES"], &rows);
    }
    Ok(())
}
