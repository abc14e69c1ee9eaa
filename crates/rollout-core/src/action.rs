//! Deployment action data model.
//!
//! A `DeploymentAction` is the atomic unit of a plan: one directive (add,
//! remove, replace, ...) against one named deployment unit. Actions are created
//! only by the [`PlanBuilder`](crate::builder::PlanBuilder) and never change
//! afterwards. An `ActionSet` keeps them in the exact order they were issued.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ActionId = Uuid;

// ---------------------------------------------------------------------------
// ActionKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Make new content available under a unit name.
    Add,
    /// Remove the unit and its content.
    Remove,
    /// Swap a deployed unit for another one.
    Replace,
    /// Swap the content of a unit while keeping its name.
    FullReplace,
    /// Restart an already known unit.
    Redeploy,
    /// Stop the unit but keep its content.
    Undeploy,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Replace => "replace",
            Self::FullReplace => "full_replace",
            Self::Redeploy => "redeploy",
            Self::Undeploy => "undeploy",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ContentRef
// ---------------------------------------------------------------------------

/// Opaque handle to deployment content (a hash, a repository path, ...).
///
/// Transferring the bytes behind it is the applier's business.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentRef(String);

impl ContentRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ContentRef {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ContentRef {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ---------------------------------------------------------------------------
// DeploymentAction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentAction {
    id: ActionId,
    kind: ActionKind,
    unit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    replaced: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<ContentRef>,
}

impl DeploymentAction {
    fn new(kind: ActionKind, unit: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            unit: unit.to_string(),
            replaced: None,
            content: None,
        }
    }

    pub(crate) fn add(unit: &str, content: ContentRef) -> Self {
        Self {
            content: Some(content),
            ..Self::new(ActionKind::Add, unit)
        }
    }

    pub(crate) fn remove(unit: &str) -> Self {
        Self::new(ActionKind::Remove, unit)
    }

    pub(crate) fn undeploy(unit: &str) -> Self {
        Self::new(ActionKind::Undeploy, unit)
    }

    pub(crate) fn redeploy(unit: &str) -> Self {
        Self::new(ActionKind::Redeploy, unit)
    }

    pub(crate) fn replace(replacement: &str, replaced: &str) -> Self {
        Self {
            replaced: Some(replaced.to_string()),
            ..Self::new(ActionKind::Replace, replacement)
        }
    }

    pub(crate) fn full_replace(unit: &str, content: ContentRef) -> Self {
        Self {
            content: Some(content),
            ..Self::new(ActionKind::FullReplace, unit)
        }
    }

    pub fn id(&self) -> ActionId {
        self.id
    }

    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    /// Name of the unit this action deploys, removes or restarts.
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// For `Replace`, the unit being displaced.
    pub fn replaced(&self) -> Option<&str> {
        self.replaced.as_deref()
    }

    pub fn content(&self) -> Option<&ContentRef> {
        self.content.as_ref()
    }

    /// Best-effort undo of this action, used when a set rolls back.
    ///
    /// Returns `None` when the action cannot be reversed (removed content is
    /// gone, a restart has no inverse).
    pub fn compensating(&self) -> Option<DeploymentAction> {
        match self.kind {
            ActionKind::Add => Some(Self::remove(&self.unit)),
            ActionKind::Undeploy => Some(Self::redeploy(&self.unit)),
            ActionKind::Replace => {
                let replaced = self.replaced.as_deref()?;
                Some(Self::replace(replaced, &self.unit))
            }
            ActionKind::Remove | ActionKind::FullReplace | ActionKind::Redeploy => None,
        }
    }
}

impl std::fmt::Display for DeploymentAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.replaced {
            Some(replaced) if replaced != &self.unit => {
                write!(f, "{} {} (replacing {})", self.kind, self.unit, replaced)
            }
            _ => write!(f, "{} {}", self.kind, self.unit),
        }
    }
}

// ---------------------------------------------------------------------------
// ActionSet
// ---------------------------------------------------------------------------

/// Ordered, append-only sequence of actions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ActionSet {
    actions: Vec<DeploymentAction>,
}

impl ActionSet {
    pub(crate) fn push(&mut self, action: DeploymentAction) {
        self.actions.push(action);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DeploymentAction> {
        self.actions.iter()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn get(&self, id: ActionId) -> Option<&DeploymentAction> {
        self.actions.iter().find(|a| a.id == id)
    }

    pub fn last(&self) -> Option<&DeploymentAction> {
        self.actions.last()
    }

    pub fn ids(&self) -> impl Iterator<Item = ActionId> + '_ {
        self.actions.iter().map(|a| a.id)
    }

    /// True if `unit` is the subject of a pending add or replace in this set.
    pub(crate) fn has_pending_install(&self, unit: &str) -> bool {
        self.actions.iter().any(|a| {
            a.unit == unit
                && matches!(
                    a.kind,
                    ActionKind::Add | ActionKind::Replace | ActionKind::FullReplace
                )
        })
    }

    pub(crate) fn has_added(&self, unit: &str) -> bool {
        self.actions
            .iter()
            .any(|a| a.unit == unit && a.kind == ActionKind::Add)
    }
}

impl<'a> IntoIterator for &'a ActionSet {
    type Item = &'a DeploymentAction;
    type IntoIter = std::slice::Iter<'a, DeploymentAction>;

    fn into_iter(self) -> Self::IntoIter {
        self.actions.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_get_distinct_ids() {
        let a = DeploymentAction::remove("app.war");
        let b = DeploymentAction::remove("app.war");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn add_compensates_with_remove() {
        let add = DeploymentAction::add("app.war", "sha256:abc".into());
        let undo = add.compensating().unwrap();
        assert_eq!(undo.kind(), ActionKind::Remove);
        assert_eq!(undo.unit(), "app.war");
    }

    #[test]
    fn replace_compensates_by_swapping_back() {
        let replace = DeploymentAction::replace("app-v2.war", "app-v1.war");
        let undo = replace.compensating().unwrap();
        assert_eq!(undo.kind(), ActionKind::Replace);
        assert_eq!(undo.unit(), "app-v1.war");
        assert_eq!(undo.replaced(), Some("app-v2.war"));
    }

    #[test]
    fn remove_is_not_reversible() {
        assert!(DeploymentAction::remove("app.war").compensating().is_none());
        assert!(DeploymentAction::redeploy("app.war").compensating().is_none());
    }

    #[test]
    fn action_set_preserves_order() {
        let mut set = ActionSet::default();
        set.push(DeploymentAction::add("a.war", "c1".into()));
        set.push(DeploymentAction::remove("b.war"));
        set.push(DeploymentAction::redeploy("c.war"));
        let units: Vec<&str> = set.iter().map(|a| a.unit()).collect();
        assert_eq!(units, vec!["a.war", "b.war", "c.war"]);
        assert!(set.has_pending_install("a.war"));
        assert!(!set.has_pending_install("b.war"));
    }

    #[test]
    fn display_mentions_replaced_unit() {
        let replace = DeploymentAction::replace("app-v2.war", "app-v1.war");
        assert_eq!(replace.to_string(), "replace app-v2.war (replacing app-v1.war)");
        let in_place = DeploymentAction::replace("app.war", "app.war");
        assert_eq!(in_place.to_string(), "replace app.war");
    }
}
