pub mod fleet;
pub mod run;
pub mod validate;

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{anyhow, Context};
use rollout_core::{DeploymentPlan, FleetConfig, PlanBuilder, PlanFile};

pub fn load_fleet(path: Option<&Path>) -> anyhow::Result<FleetConfig> {
    let path = path.ok_or_else(|| anyhow!("no fleet file given; pass --fleet or set ROLLOUT_FLEET"))?;
    FleetConfig::load(path).with_context(|| format!("failed to load fleet {}", path.display()))
}

/// Build the plan in `path` against the fleet's existing deployments.
pub fn build_plan(fleet: &FleetConfig, path: &Path) -> anyhow::Result<DeploymentPlan> {
    let file = PlanFile::load(path).with_context(|| format!("failed to load plan {}", path.display()))?;

    let existing: BTreeSet<String> = fleet.deployments.iter().cloned().collect();
    let mut builder = PlanBuilder::new(existing);
    if file.rollback_all {
        builder.with_rollback_all()?;
    }
    for (i, directive) in file.directives.iter().enumerate() {
        builder
            .apply(directive)
            .with_context(|| format!("directive {} ({directive}) rejected", i + 1))?;
    }
    Ok(builder.build()?)
}
