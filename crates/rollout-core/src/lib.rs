//! Staged deployment plans for a fleet of application servers.
//!
//! Build a [`DeploymentPlan`] with [`PlanBuilder`], hand it to a
//! [`Dispatcher`], and query the [`PlanResult`] per set, action and target.

pub mod action;
pub mod builder;
pub mod config;
pub mod directive;
pub mod dispatch;
pub mod error;
pub mod fleet;
pub mod plan;
pub mod result;

pub use action::{ActionId, ActionKind, ActionSet, ContentRef, DeploymentAction};
pub use builder::{DeploymentSnapshot, PlanBuilder};
pub use config::{DispatchConfig, FleetConfig, PlanFile, ServerEntry};
pub use directive::Directive;
pub use dispatch::{DispatchHandle, Dispatcher};
pub use error::{Result, RolloutError, TargetError};
pub use fleet::{ApplyPayload, FleetResolver, MemoryFleet, ServerIdentity, TargetApplier, TargetId};
pub use plan::{DeploymentPlan, DeploymentSetPlan, PlanId, SetId, TargetScope};
pub use result::{
    ActionResult, ActionStatus, DeploymentSetPlanResult, PlanResult, PlanSummary, RollbackOutcome,
    SetResultState,
};
