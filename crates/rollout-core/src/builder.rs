//! Order-aware plan construction.
//!
//! `PlanBuilder` accumulates [`DeploymentSetPlan`]s one directive at a time.
//! Its state is a tagged variant rather than a family of builder types:
//!
//! ```text
//! Open ──replace()──▶ AfterReplace ──and_remove_undeployed()──▶ Open
//!   ▲                      │
//!   └── any other directive┘
//! Open | AfterReplace ──build()──▶ Built   (terminal)
//! ```
//!
//! Every directive validates first and mutates second, so a rejected call
//! leaves the builder exactly as it was.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::action::{ContentRef, DeploymentAction};
use crate::directive::Directive;
use crate::error::{Result, RolloutError};
use crate::plan::{DeploymentPlan, DeploymentSetPlan, TargetScope};

// ---------------------------------------------------------------------------
// DeploymentSnapshot
// ---------------------------------------------------------------------------

/// Read-only view of the units that already exist before the plan runs.
pub trait DeploymentSnapshot {
    fn exists(&self, unit: &str) -> bool;
}

impl DeploymentSnapshot for HashSet<String> {
    fn exists(&self, unit: &str) -> bool {
        self.contains(unit)
    }
}

impl DeploymentSnapshot for BTreeSet<String> {
    fn exists(&self, unit: &str) -> bool {
        self.contains(unit)
    }
}

impl DeploymentSnapshot for HashMap<String, bool> {
    fn exists(&self, unit: &str) -> bool {
        self.get(unit).copied().unwrap_or(false)
    }
}

impl DeploymentSnapshot for BTreeMap<String, bool> {
    fn exists(&self, unit: &str) -> bool {
        self.get(unit).copied().unwrap_or(false)
    }
}

impl DeploymentSnapshot for Vec<String> {
    fn exists(&self, unit: &str) -> bool {
        self.iter().any(|u| u == unit)
    }
}

// ---------------------------------------------------------------------------
// PlanBuilder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum BuilderState {
    Open,
    /// The last directive was a replace; `replaced` is the displaced unit.
    AfterReplace { replaced: String },
    Built,
}

pub struct PlanBuilder {
    snapshot: Box<dyn DeploymentSnapshot + Send + Sync>,
    state: BuilderState,
    closed: Vec<DeploymentSetPlan>,
    current: DeploymentSetPlan,
    added: HashSet<String>,
    removed: HashSet<String>,
    rollback_all: bool,
}

impl std::fmt::Debug for PlanBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanBuilder")
            .field("state", &self.state)
            .field("closed", &self.closed.len())
            .field("current", &self.current)
            .finish()
    }
}

impl PlanBuilder {
    /// Start a plan against the given view of existing deployments.
    pub fn new(existing: impl DeploymentSnapshot + Send + Sync + 'static) -> Self {
        Self {
            snapshot: Box::new(existing),
            state: BuilderState::Open,
            closed: Vec::new(),
            current: DeploymentSetPlan::new(TargetScope::Standalone, false),
            added: HashSet::new(),
            removed: HashSet::new(),
            rollback_all: false,
        }
    }

    /// Make the open set, and every set opened afterwards, roll back on failure.
    pub fn with_rollback_all(&mut self) -> Result<&mut Self> {
        self.ensure_not_built()?;
        self.rollback_all = true;
        self.current.set_rollback(true);
        self.state = BuilderState::Open;
        Ok(self)
    }

    /// True when `and_remove_undeployed` is currently legal.
    pub fn can_remove_undeployed(&self) -> bool {
        matches!(self.state, BuilderState::AfterReplace { .. })
    }

    pub fn is_built(&self) -> bool {
        self.state == BuilderState::Built
    }

    // -- action directives --------------------------------------------------

    /// Make `unit` available with the given content.
    pub fn add(&mut self, unit: &str, content: impl Into<ContentRef>) -> Result<&mut Self> {
        self.ensure_not_built()?;
        validate_unit_name(unit)?;
        if self.current.actions().has_pending_install(unit) {
            return Err(RolloutError::invalid_action(
                unit,
                "already pending add or replace in this set",
            ));
        }
        self.added.insert(unit.to_string());
        self.removed.remove(unit);
        self.push(DeploymentAction::add(unit, content.into()));
        Ok(self)
    }

    pub fn remove(&mut self, unit: &str) -> Result<&mut Self> {
        self.ensure_not_built()?;
        self.ensure_known(unit)?;
        self.removed.insert(unit.to_string());
        self.push(DeploymentAction::remove(unit));
        Ok(self)
    }

    /// Stop `unit` without removing its content.
    pub fn undeploy(&mut self, unit: &str) -> Result<&mut Self> {
        self.ensure_not_built()?;
        self.ensure_known(unit)?;
        self.push(DeploymentAction::undeploy(unit));
        Ok(self)
    }

    pub fn redeploy(&mut self, unit: &str) -> Result<&mut Self> {
        self.ensure_not_built()?;
        self.ensure_known(unit)?;
        self.push(DeploymentAction::redeploy(unit));
        Ok(self)
    }

    /// Swap the content behind `unit` without changing its name.
    pub fn full_replace(&mut self, unit: &str, content: impl Into<ContentRef>) -> Result<&mut Self> {
        self.ensure_not_built()?;
        validate_unit_name(unit)?;
        self.added.insert(unit.to_string());
        self.removed.remove(unit);
        self.push(DeploymentAction::full_replace(unit, content.into()));
        Ok(self)
    }

    /// Replace the deployed `unit` in place.
    ///
    /// Follow with [`and_remove_undeployed`](Self::and_remove_undeployed) to
    /// also drop the displaced content.
    pub fn replace(&mut self, unit: &str) -> Result<&mut Self> {
        self.replace_with(unit, unit)
    }

    /// Replace the deployed `replaced` unit with `replacement`.
    pub fn replace_with(&mut self, replacement: &str, replaced: &str) -> Result<&mut Self> {
        self.ensure_not_built()?;
        validate_unit_name(replacement)?;
        let deployed = self.snapshot.exists(replaced) && !self.removed.contains(replaced);
        if !deployed && !self.current.actions().has_added(replaced) {
            return Err(RolloutError::invalid_action(
                replaced,
                "cannot replace a unit that is neither deployed nor added earlier in this set",
            ));
        }
        if replacement != replaced && self.current.actions().has_pending_install(replacement) {
            return Err(RolloutError::invalid_action(
                replacement,
                "already pending add or replace in this set",
            ));
        }
        self.current
            .actions_mut()
            .push(DeploymentAction::replace(replacement, replaced));
        self.added.insert(replacement.to_string());
        self.state = BuilderState::AfterReplace {
            replaced: replaced.to_string(),
        };
        Ok(self)
    }

    /// Remove the unit displaced by the immediately preceding replace.
    pub fn and_remove_undeployed(&mut self) -> Result<&mut Self> {
        let replaced = match &self.state {
            BuilderState::AfterReplace { replaced } => replaced.clone(),
            BuilderState::Built => return Err(RolloutError::PlanAlreadyBuilt),
            BuilderState::Open => {
                return Err(RolloutError::IllegalPlanState(
                    "and_remove_undeployed is only legal immediately after replace".into(),
                ))
            }
        };
        let in_place = self
            .current
            .actions()
            .last()
            .map(|a| a.unit() == replaced)
            .unwrap_or(false);
        if !in_place {
            self.removed.insert(replaced.clone());
        }
        self.push(DeploymentAction::remove(&replaced));
        Ok(self)
    }

    // -- scope directives ---------------------------------------------------

    pub fn to_server_group(&mut self, name: &str) -> Result<&mut Self> {
        if name.trim().is_empty() {
            self.ensure_not_built()?;
            return Err(RolloutError::IllegalPlanState(
                "server group name must not be empty".into(),
            ));
        }
        self.retarget(TargetScope::ServerGroup(name.to_string()))
    }

    pub fn to_domain(&mut self) -> Result<&mut Self> {
        self.retarget(TargetScope::Domain)
    }

    /// Roll back the open set's applied actions on a target when a later one fails.
    pub fn with_rollback(&mut self) -> Result<&mut Self> {
        self.ensure_not_built()?;
        self.current.set_rollback(true);
        self.state = BuilderState::Open;
        Ok(self)
    }

    /// Apply one scripted directive.
    pub fn apply(&mut self, directive: &Directive) -> Result<&mut Self> {
        match directive {
            Directive::Add { unit, content } => self.add(unit, content.as_str()),
            Directive::Remove { unit } => self.remove(unit),
            Directive::Undeploy { unit } => self.undeploy(unit),
            Directive::Replace { unit, with: None } => self.replace(unit),
            Directive::Replace {
                unit,
                with: Some(replacement),
            } => self.replace_with(replacement, unit),
            Directive::AndRemoveUndeployed => self.and_remove_undeployed(),
            Directive::FullReplace { unit, content } => self.full_replace(unit, content.as_str()),
            Directive::Redeploy { unit } => self.redeploy(unit),
            Directive::ToServerGroup { name } => self.to_server_group(name),
            Directive::ToDomain => self.to_domain(),
            Directive::WithRollback => self.with_rollback(),
        }
    }

    /// Freeze the plan and assign its id.
    pub fn build(&mut self) -> Result<DeploymentPlan> {
        self.ensure_not_built()?;
        let mut sets = self.closed.clone();
        if !self.current.actions().is_empty() {
            sets.push(self.current.clone());
        }
        if sets.is_empty() {
            return Err(RolloutError::EmptyPlan);
        }
        self.state = BuilderState::Built;
        self.closed.clear();
        let plan = DeploymentPlan::new(sets);
        tracing::debug!(
            plan_id = %plan.id(),
            sets = plan.sets().len(),
            actions = plan.action_count(),
            "plan built"
        );
        Ok(plan)
    }

    // -- internals ----------------------------------------------------------

    fn ensure_not_built(&self) -> Result<()> {
        if self.state == BuilderState::Built {
            return Err(RolloutError::PlanAlreadyBuilt);
        }
        Ok(())
    }

    fn ensure_known(&self, unit: &str) -> Result<()> {
        if self.removed.contains(unit) {
            return Err(RolloutError::invalid_action(
                unit,
                "already removed earlier in this plan",
            ));
        }
        if !self.snapshot.exists(unit) && !self.added.contains(unit) {
            return Err(RolloutError::invalid_action(
                unit,
                "not deployed and not added earlier in this plan",
            ));
        }
        Ok(())
    }

    fn push(&mut self, action: DeploymentAction) {
        self.current.actions_mut().push(action);
        self.state = BuilderState::Open;
    }

    fn retarget(&mut self, scope: TargetScope) -> Result<&mut Self> {
        self.ensure_not_built()?;
        if self.current.actions().is_empty() {
            let open_scope = self.current.scope();
            let mixes_domain_and_group = matches!(
                (open_scope, &scope),
                (TargetScope::Domain, TargetScope::ServerGroup(_))
                    | (TargetScope::ServerGroup(_), TargetScope::Domain)
            );
            if mixes_domain_and_group {
                return Err(RolloutError::IllegalPlanState(format!(
                    "open set already targets {open_scope}; cannot also target {scope}"
                )));
            }
            self.current.set_scope(scope);
        } else {
            let rollback = self.rollback_all;
            let next = DeploymentSetPlan::new(scope, rollback);
            let finished = std::mem::replace(&mut self.current, next);
            self.closed.push(finished);
        }
        self.state = BuilderState::Open;
        Ok(self)
    }
}

fn validate_unit_name(unit: &str) -> Result<()> {
    if unit.trim().is_empty() {
        return Err(RolloutError::invalid_action(unit, "unit name must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionKind;

    fn snapshot(units: &[&str]) -> BTreeSet<String> {
        units.iter().map(|u| u.to_string()).collect()
    }

    fn kinds_and_units(set: &DeploymentSetPlan) -> Vec<(ActionKind, String)> {
        set.actions()
            .iter()
            .map(|a| (a.kind(), a.unit().to_string()))
            .collect()
    }

    #[test]
    fn actions_keep_issuance_order() {
        let mut b = PlanBuilder::new(snapshot(&["old.war"]));
        b.add("a.war", "c1")
            .unwrap()
            .add("b.war", "c2")
            .unwrap()
            .undeploy("old.war")
            .unwrap()
            .redeploy("a.war")
            .unwrap();
        let plan = b.build().unwrap();
        assert_eq!(plan.sets().len(), 1);
        assert_eq!(
            kinds_and_units(&plan.sets()[0]),
            vec![
                (ActionKind::Add, "a.war".to_string()),
                (ActionKind::Add, "b.war".to_string()),
                (ActionKind::Undeploy, "old.war".to_string()),
                (ActionKind::Redeploy, "a.war".to_string()),
            ]
        );
        assert_eq!(*plan.sets()[0].scope(), TargetScope::Standalone);
    }

    #[test]
    fn duplicate_add_in_same_set_is_invalid() {
        let mut b = PlanBuilder::new(snapshot(&[]));
        b.add("app.war", "c1").unwrap();
        let err = b.add("app.war", "c2").unwrap_err();
        assert!(matches!(err, RolloutError::InvalidAction { .. }));
    }

    #[test]
    fn same_unit_may_be_added_in_another_set() {
        let mut b = PlanBuilder::new(snapshot(&[]));
        b.to_server_group("g1").unwrap().add("app.war", "c1").unwrap();
        b.to_server_group("g2").unwrap().add("app.war", "c1").unwrap();
        let plan = b.build().unwrap();
        assert_eq!(plan.sets().len(), 2);
    }

    #[test]
    fn remove_of_unknown_unit_is_invalid() {
        let mut b = PlanBuilder::new(snapshot(&["other.war"]));
        let err = b.remove("ghost.war").unwrap_err();
        assert!(matches!(err, RolloutError::InvalidAction { ref unit, .. } if unit == "ghost.war"));
        let err = b.undeploy("ghost.war").unwrap_err();
        assert!(matches!(err, RolloutError::InvalidAction { .. }));
    }

    #[test]
    fn remove_of_unit_added_earlier_is_valid() {
        let mut b = PlanBuilder::new(snapshot(&[]));
        b.add("app.war", "c1").unwrap();
        b.to_server_group("main-group").unwrap();
        b.remove("app.war").unwrap();
        assert_eq!(b.build().unwrap().action_count(), 2);
    }

    #[test]
    fn double_remove_is_invalid() {
        let mut b = PlanBuilder::new(snapshot(&["app.war"]));
        b.remove("app.war").unwrap();
        assert!(b.remove("app.war").is_err());
    }

    #[test]
    fn replace_requires_snapshot_or_same_set_add() {
        let mut b = PlanBuilder::new(snapshot(&[]));
        b.add("app.war", "c1").unwrap();
        b.to_server_group("main-group").unwrap();
        let err = b.replace("app.war").unwrap_err();
        assert!(matches!(err, RolloutError::InvalidAction { .. }));
        assert!(!b.can_remove_undeployed());
    }

    #[test]
    fn replace_of_unit_added_in_same_set_is_valid() {
        let mut b = PlanBuilder::new(snapshot(&[]));
        b.add("app-v1.war", "c1")
            .unwrap()
            .replace_with("app-v2.war", "app-v1.war")
            .unwrap();
        assert!(b.can_remove_undeployed());
    }

    #[test]
    fn replace_then_remove_undeployed_yields_two_actions() {
        let mut b = PlanBuilder::new(snapshot(&["app.war"]));
        b.replace("app.war").unwrap().and_remove_undeployed().unwrap();
        let plan = b.build().unwrap();
        let actions: Vec<_> = plan.sets()[0].actions().iter().collect();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].kind(), ActionKind::Replace);
        assert_eq!(actions[0].unit(), "app.war");
        assert_eq!(actions[1].kind(), ActionKind::Remove);
        assert_eq!(Some(actions[1].unit()), actions[0].replaced());
    }

    #[test]
    fn remove_undeployed_targets_displaced_unit() {
        let mut b = PlanBuilder::new(snapshot(&["app-v1.war"]));
        b.replace_with("app-v2.war", "app-v1.war")
            .unwrap()
            .and_remove_undeployed()
            .unwrap();
        let plan = b.build().unwrap();
        let last = plan.sets()[0].actions().last().unwrap();
        assert_eq!(last.kind(), ActionKind::Remove);
        assert_eq!(last.unit(), "app-v1.war");
    }

    #[test]
    fn remove_undeployed_without_replace_is_illegal() {
        let mut b = PlanBuilder::new(snapshot(&["app.war"]));
        let err = b.and_remove_undeployed().unwrap_err();
        assert!(matches!(err, RolloutError::IllegalPlanState(_)));

        // still illegal after an unrelated history
        b.add("x.war", "c").unwrap().to_server_group("g").unwrap();
        let err = b.and_remove_undeployed().unwrap_err();
        assert!(matches!(err, RolloutError::IllegalPlanState(_)));
    }

    #[test]
    fn remove_undeployed_cannot_be_chained_twice() {
        let mut b = PlanBuilder::new(snapshot(&["app.war"]));
        b.replace("app.war").unwrap().and_remove_undeployed().unwrap();
        let err = b.and_remove_undeployed().unwrap_err();
        assert!(matches!(err, RolloutError::IllegalPlanState(_)));
    }

    #[test]
    fn intervening_directive_collapses_replace_state() {
        let mut b = PlanBuilder::new(snapshot(&["app.war"]));
        b.replace("app.war").unwrap().with_rollback().unwrap();
        assert!(b.and_remove_undeployed().is_err());

        let mut b = PlanBuilder::new(snapshot(&["app.war"]));
        b.replace("app.war").unwrap().to_domain().unwrap();
        assert!(b.and_remove_undeployed().is_err());
    }

    #[test]
    fn to_server_group_closes_the_open_set() {
        let mut b = PlanBuilder::new(snapshot(&[]));
        b.to_server_group("main-group")
            .unwrap()
            .add("a.war", "c")
            .unwrap()
            .to_server_group("main-group")
            .unwrap()
            .add("b.war", "c")
            .unwrap();
        let plan = b.build().unwrap();
        assert_eq!(plan.sets().len(), 2);
        for set in plan.sets() {
            assert_eq!(*set.scope(), TargetScope::ServerGroup("main-group".into()));
        }
        assert_ne!(plan.sets()[0].id(), plan.sets()[1].id());
    }

    #[test]
    fn domain_and_group_cannot_share_an_open_set() {
        let mut b = PlanBuilder::new(snapshot(&[]));
        b.to_domain().unwrap();
        let err = b.to_server_group("main-group").unwrap_err();
        assert!(matches!(err, RolloutError::IllegalPlanState(_)));

        let mut b = PlanBuilder::new(snapshot(&[]));
        b.to_server_group("main-group").unwrap();
        assert!(b.to_domain().is_err());
        // same scope again is harmless
        b.to_server_group("main-group").unwrap();
    }

    #[test]
    fn empty_group_set_can_be_retargeted_to_another_group() {
        let mut b = PlanBuilder::new(snapshot(&[]));
        b.to_server_group("g1")
            .unwrap()
            .to_server_group("g2")
            .unwrap()
            .add("a.war", "c")
            .unwrap();
        let plan = b.build().unwrap();
        assert_eq!(plan.sets().len(), 1);
        assert_eq!(plan.sets()[0].scope(), &TargetScope::ServerGroup("g2".into()));
    }

    #[test]
    fn rejected_directive_leaves_builder_untouched() {
        let mut b = PlanBuilder::new(snapshot(&["app.war"]));
        b.replace("app.war").unwrap();
        assert!(b.remove("ghost.war").is_err());
        // still directly after the replace
        assert!(b.can_remove_undeployed());
    }

    #[test]
    fn build_twice_and_mutate_after_build_fail() {
        let mut b = PlanBuilder::new(snapshot(&[]));
        b.add("a.war", "c").unwrap();
        b.build().unwrap();
        assert!(matches!(b.build(), Err(RolloutError::PlanAlreadyBuilt)));
        assert!(matches!(b.add("b.war", "c"), Err(RolloutError::PlanAlreadyBuilt)));
        assert!(matches!(
            b.to_server_group("g"),
            Err(RolloutError::PlanAlreadyBuilt)
        ));
        assert!(matches!(
            b.and_remove_undeployed(),
            Err(RolloutError::PlanAlreadyBuilt)
        ));
    }

    #[test]
    fn empty_plan_is_rejected() {
        let mut b = PlanBuilder::new(snapshot(&[]));
        b.to_server_group("g").unwrap();
        assert!(matches!(b.build(), Err(RolloutError::EmptyPlan)));
        // a failed build does not freeze the builder
        b.add("a.war", "c").unwrap();
        assert!(b.build().is_ok());
    }

    #[test]
    fn rollback_flags() {
        let mut b = PlanBuilder::new(snapshot(&[]));
        b.to_server_group("g1")
            .unwrap()
            .add("a.war", "c")
            .unwrap()
            .with_rollback()
            .unwrap()
            .to_server_group("g2")
            .unwrap()
            .add("b.war", "c")
            .unwrap();
        let plan = b.build().unwrap();
        assert!(plan.sets()[0].rollback_on_failure());
        assert!(!plan.sets()[1].rollback_on_failure());

        let mut b = PlanBuilder::new(snapshot(&[]));
        b.with_rollback_all()
            .unwrap()
            .add("a.war", "c")
            .unwrap()
            .to_domain()
            .unwrap()
            .add("b.war", "c")
            .unwrap();
        let plan = b.build().unwrap();
        assert!(plan.sets().iter().all(|s| s.rollback_on_failure()));
    }

    #[test]
    fn scripted_directives_build_the_same_plan() {
        let directives: Vec<Directive> = serde_yaml::from_str(
            r#"
- { op: to_server_group, name: main-group }
- { op: replace, unit: app.war }
- { op: and_remove_undeployed }
- { op: add, unit: extra.war, content: "sha256:01" }
"#,
        )
        .unwrap();
        let mut b = PlanBuilder::new(vec!["app.war".to_string()]);
        for d in &directives {
            b.apply(d).unwrap();
        }
        let plan = b.build().unwrap();
        assert_eq!(plan.sets().len(), 1);
        assert_eq!(plan.action_count(), 3);
    }

    #[test]
    fn map_snapshot_respects_existence_flag() {
        let mut existing = HashMap::new();
        existing.insert("live.war".to_string(), true);
        existing.insert("gone.war".to_string(), false);
        let mut b = PlanBuilder::new(existing);
        b.remove("live.war").unwrap();
        assert!(b.remove("gone.war").is_err());
    }
}
