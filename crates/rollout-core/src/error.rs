use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::fleet::TargetId;

#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("invalid action for '{unit}': {reason}")]
    InvalidAction { unit: String, reason: String },

    #[error("illegal plan state: {0}")]
    IllegalPlanState(String),

    #[error("plan already built: no further directives are accepted")]
    PlanAlreadyBuilt,

    #[error("plan contains no actions")]
    EmptyPlan,

    #[error("unknown deployment set: {0}")]
    UnknownSet(Uuid),

    #[error("unknown action: {0}")]
    UnknownAction(Uuid),

    #[error("unknown target: {0}")]
    UnknownTarget(String),

    #[error("plan {0} has already been dispatched")]
    AlreadyDispatched(Uuid),

    #[error("dispatch requires a running Tokio runtime")]
    NoRuntime,

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl RolloutError {
    pub(crate) fn invalid_action(unit: &str, reason: impl Into<String>) -> Self {
        Self::InvalidAction {
            unit: unit.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RolloutError>;

/// Failure of a single action against a single target.
///
/// These never escape `Dispatcher::dispatch`; they are recorded inside an
/// [`ActionResult`](crate::result::ActionResult) for the caller to inspect.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TargetError {
    #[error("target unreachable: {reason}")]
    Unreachable { reason: String },

    #[error("action rejected: {reason}")]
    Rejected {
        reason: String,
        cause: Option<String>,
    },

    #[error("apply timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("target unknown: {target}")]
    UnknownTarget { target: TargetId },
}

impl TargetError {
    pub fn unreachable(reason: impl Into<String>) -> Self {
        Self::Unreachable {
            reason: reason.into(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
            cause: None,
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self::Timeout {
            after_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn unknown_target(target: &TargetId) -> Self {
        Self::UnknownTarget {
            target: target.clone(),
        }
    }

    pub fn reason(&self) -> String {
        match self {
            Self::Unreachable { reason } | Self::Rejected { reason, .. } => reason.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_error_serializes_tagged() {
        let err = TargetError::Rejected {
            reason: "unit not found".into(),
            cause: Some("missing content".into()),
        };
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["type"], "rejected");
        assert_eq!(value["reason"], "unit not found");
        assert_eq!(value["cause"], "missing content");
    }

    #[test]
    fn timeout_serializes_as_millis() {
        let err = TargetError::timeout(Duration::from_millis(250));
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["type"], "timeout");
        assert_eq!(value["after_ms"], 250);
        assert_eq!(err.to_string(), "apply timed out after 250ms");
    }

    #[test]
    fn oversized_timeout_saturates() {
        let err = TargetError::timeout(Duration::MAX);
        assert_eq!(err, TargetError::Timeout { after_ms: u64::MAX });
    }

    #[test]
    fn unknown_target_names_the_target() {
        let err = TargetError::unknown_target(&TargetId::Domain);
        assert_eq!(err.to_string(), "target unknown: domain");
        assert_eq!(err.reason(), "target unknown: domain");
    }
}
