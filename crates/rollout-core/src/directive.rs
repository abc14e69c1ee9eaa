//! Plan directives in serializable form, for plans written to a file.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Directive {
    Add {
        unit: String,
        content: String,
    },
    Remove {
        unit: String,
    },
    Undeploy {
        unit: String,
    },
    /// Replace `unit`. With `with`, `with` becomes the replacement and `unit`
    /// is the one displaced.
    Replace {
        unit: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        with: Option<String>,
    },
    AndRemoveUndeployed,
    FullReplace {
        unit: String,
        content: String,
    },
    Redeploy {
        unit: String,
    },
    ToServerGroup {
        name: String,
    },
    ToDomain,
    WithRollback,
}

impl std::fmt::Display for Directive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Add { unit, .. } => write!(f, "add {unit}"),
            Self::Remove { unit } => write!(f, "remove {unit}"),
            Self::Undeploy { unit } => write!(f, "undeploy {unit}"),
            Self::Replace { unit, with: None } => write!(f, "replace {unit}"),
            Self::Replace {
                unit,
                with: Some(with),
            } => write!(f, "replace {unit} with {with}"),
            Self::AndRemoveUndeployed => f.write_str("and_remove_undeployed"),
            Self::FullReplace { unit, .. } => write!(f, "full_replace {unit}"),
            Self::Redeploy { unit } => write!(f, "redeploy {unit}"),
            Self::ToServerGroup { name } => write!(f, "to_server_group {name}"),
            Self::ToDomain => f.write_str("to_domain"),
            Self::WithRollback => f.write_str("with_rollback"),
        }
    }
}
