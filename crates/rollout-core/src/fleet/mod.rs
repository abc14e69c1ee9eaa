//! Fleet collaborators consumed by the dispatcher.
//!
//! Membership lookups and remote application are injected through
//! [`FleetResolver`] and [`TargetApplier`] so the dispatcher never reaches for
//! global state. [`MemoryFleet`] implements both for tests and the CLI.

pub mod memory;

use futures::future::BoxFuture;
use serde::{Serialize, Serializer};

use crate::action::DeploymentAction;
use crate::error::TargetError;

pub use memory::MemoryFleet;

// ---------------------------------------------------------------------------
// ServerIdentity / TargetId
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ServerIdentity {
    pub host: String,
    pub name: String,
    pub group: String,
}

impl ServerIdentity {
    pub fn new(host: impl Into<String>, name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            name: name.into(),
            group: group.into(),
        }
    }
}

impl std::fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.name)
    }
}

/// A live endpoint a set of actions is applied to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TargetId {
    /// The single server of a standalone installation.
    Standalone,
    /// The domain controller.
    Domain,
    /// The host controller on the named host.
    Host(String),
    Server(ServerIdentity),
}

impl std::fmt::Display for TargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standalone => f.write_str("standalone"),
            Self::Domain => f.write_str("domain"),
            Self::Host(host) => write!(f, "host/{host}"),
            Self::Server(server) => server.fmt(f),
        }
    }
}

impl Serialize for TargetId {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

// ---------------------------------------------------------------------------
// ApplyPayload
// ---------------------------------------------------------------------------

/// What a target reports back after applying an action successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyPayload {
    /// Servers whose runtime state changed as a consequence of the action.
    pub affected: Vec<ServerIdentity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ApplyPayload {
    pub fn affecting(server: ServerIdentity) -> Self {
        Self {
            affected: vec![server],
            message: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Answers "who is in this server group right now?".
///
/// Queried at dispatch time, never at build time.
pub trait FleetResolver: Send + Sync {
    fn members_of(&self, group: &str) -> Vec<ServerIdentity>;

    /// Hosts whose controllers sit behind the domain controller.
    fn hosts(&self) -> Vec<String>;

    /// Whether the target can still be addressed. Server targets that were
    /// deregistered after resolution return `false`.
    fn is_registered(&self, target: &TargetId) -> bool;
}

/// Applies one action to one target.
///
/// This is the boundary to the transport and content repository. Each call is
/// a single remote round trip and may be cancelled by the dispatcher's timeout.
pub trait TargetApplier: Send + Sync {
    fn apply<'a>(
        &'a self,
        target: &'a TargetId,
        action: &'a DeploymentAction,
    ) -> BoxFuture<'a, Result<ApplyPayload, TargetError>>;
}
