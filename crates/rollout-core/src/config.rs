use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::directive::Directive;
use crate::error::{Result, RolloutError};
use crate::fleet::ServerIdentity;

// ---------------------------------------------------------------------------
// DispatchConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Upper bound for a single remote apply call.
    #[serde(default = "default_apply_timeout_ms")]
    pub apply_timeout_ms: u64,
    /// Maximum number of (set, target) tasks running at once.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_apply_timeout_ms() -> u64 {
    30_000
}

fn default_max_in_flight() -> usize {
    16
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            apply_timeout_ms: default_apply_timeout_ms(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

impl DispatchConfig {
    pub fn apply_timeout(&self) -> Duration {
        Duration::from_millis(self.apply_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.apply_timeout_ms == 0 {
            return Err(RolloutError::InvalidConfig(
                "apply_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.max_in_flight == 0 {
            return Err(RolloutError::InvalidConfig(
                "max_in_flight must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FleetConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEntry {
    pub host: String,
    pub name: String,
    pub group: String,
    #[serde(default = "default_reachable")]
    pub reachable: bool,
}

fn default_reachable() -> bool {
    true
}

impl ServerEntry {
    pub fn identity(&self) -> ServerIdentity {
        ServerIdentity::new(&self.host, &self.name, &self.group)
    }
}

/// Description of a fleet: its servers, the units already deployed, and
/// dispatch tuning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub servers: Vec<ServerEntry>,
    /// Units already deployed across the fleet before any plan runs.
    #[serde(default)]
    pub deployments: Vec<String>,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

impl FleetConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let cfg: FleetConfig = serde_yaml::from_str(&data)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for server in &self.servers {
            if server.host.trim().is_empty()
                || server.name.trim().is_empty()
                || server.group.trim().is_empty()
            {
                return Err(RolloutError::InvalidConfig(format!(
                    "server entry '{}:{}' has an empty host, name or group",
                    server.host, server.name
                )));
            }
            if !seen.insert((server.host.as_str(), server.name.as_str())) {
                return Err(RolloutError::InvalidConfig(format!(
                    "duplicate server '{}:{}'",
                    server.host, server.name
                )));
            }
        }
        self.dispatch.validate()
    }

    pub fn groups(&self) -> Vec<&str> {
        let mut groups: Vec<&str> = self.servers.iter().map(|s| s.group.as_str()).collect();
        groups.sort_unstable();
        groups.dedup();
        groups
    }
}

// ---------------------------------------------------------------------------
// PlanFile
// ---------------------------------------------------------------------------

/// A plan written down as a list of directives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanFile {
    /// Make every set roll back on failure.
    #[serde(default)]
    pub rollback_all: bool,
    pub directives: Vec<Directive>,
}

impl PlanFile {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&data)?)
    }
}
