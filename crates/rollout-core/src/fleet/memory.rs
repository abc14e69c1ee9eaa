//! In-memory fleet used by tests and the `rollout` CLI.
//!
//! Keeps server membership, per-target unit state and an apply journal behind a
//! single `RwLock`. The lock is never held across an `.await`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;

use super::{ApplyPayload, FleetResolver, ServerIdentity, TargetApplier, TargetId};
use crate::action::{ActionKind, DeploymentAction};
use crate::config::FleetConfig;
use crate::error::TargetError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UnitState {
    running: bool,
    /// Content displaced by an in-place replace, kept until removed.
    retained_previous: bool,
}

impl UnitState {
    fn running() -> Self {
        Self {
            running: true,
            retained_previous: false,
        }
    }
}

#[derive(Debug)]
struct ServerState {
    reachable: bool,
    /// Deregister the server once this many further applies have succeeded.
    deregister_after: Option<usize>,
}

/// One applied action, in the order the fleet saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub target: TargetId,
    pub kind: ActionKind,
    pub unit: String,
}

#[derive(Debug)]
struct RejectRule {
    unit: String,
    /// `None` rejects every kind of action on the unit.
    kind: Option<ActionKind>,
    reason: String,
}

impl RejectRule {
    fn matches(&self, action: &DeploymentAction) -> bool {
        self.unit == action.unit() && self.kind.map_or(true, |k| k == action.kind())
    }
}

#[derive(Debug, Default)]
struct FleetState {
    servers: BTreeMap<ServerIdentity, ServerState>,
    hosts_down: BTreeSet<String>,
    baseline: BTreeMap<String, UnitState>,
    units: HashMap<TargetId, BTreeMap<String, UnitState>>,
    rejections: Vec<RejectRule>,
    delays: HashMap<TargetId, Duration>,
    journal: Vec<JournalEntry>,
}

#[derive(Debug, Default)]
pub struct MemoryFleet {
    state: RwLock<FleetState>,
}

impl MemoryFleet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &FleetConfig) -> Self {
        let fleet = Self::new();
        for entry in &config.servers {
            let server = entry.identity();
            fleet.register(server.clone());
            fleet.set_reachable(&server, entry.reachable);
        }
        fleet.seed_deployments(config.deployments.iter().map(String::as_str));
        fleet
    }

    fn read(&self) -> RwLockReadGuard<'_, FleetState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, FleetState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register(&self, server: ServerIdentity) {
        self.write().servers.insert(
            server,
            ServerState {
                reachable: true,
                deregister_after: None,
            },
        );
    }

    pub fn deregister(&self, server: &ServerIdentity) {
        let mut state = self.write();
        state.servers.remove(server);
        state.units.remove(&TargetId::Server(server.clone()));
    }

    pub fn set_reachable(&self, server: &ServerIdentity, reachable: bool) {
        if let Some(s) = self.write().servers.get_mut(server) {
            s.reachable = reachable;
        }
    }

    /// Deregister `server` after `applies` more successful applies against it.
    pub fn deregister_after(&self, server: &ServerIdentity, applies: usize) {
        if let Some(s) = self.write().servers.get_mut(server) {
            s.deregister_after = Some(applies);
        }
    }

    /// Units present on every target before any plan runs.
    pub fn seed_deployments<'a>(&self, units: impl IntoIterator<Item = &'a str>) {
        let mut state = self.write();
        for unit in units {
            state.baseline.insert(unit.to_string(), UnitState::running());
        }
    }

    /// Reject every action touching `unit` with `reason`.
    pub fn reject_unit(&self, unit: &str, reason: &str) {
        self.write().rejections.push(RejectRule {
            unit: unit.to_string(),
            kind: None,
            reason: reason.to_string(),
        });
    }

    /// Reject only `kind` actions on `unit`, e.g. the undo step of a rollback.
    pub fn reject_action(&self, unit: &str, kind: ActionKind, reason: &str) {
        self.write().rejections.push(RejectRule {
            unit: unit.to_string(),
            kind: Some(kind),
            reason: reason.to_string(),
        });
    }

    /// Take the host controller on `host` down or bring it back. Servers on the
    /// host are unaffected.
    pub fn set_host_reachable(&self, host: &str, reachable: bool) {
        let mut state = self.write();
        if reachable {
            state.hosts_down.remove(host);
        } else {
            state.hosts_down.insert(host.to_string());
        }
    }

    /// Delay every apply against `target` by `delay`.
    pub fn set_delay(&self, target: TargetId, delay: Duration) {
        self.write().delays.insert(target, delay);
    }

    pub fn servers(&self) -> Vec<(ServerIdentity, bool)> {
        self.read()
            .servers
            .iter()
            .map(|(id, s)| (id.clone(), s.reachable))
            .collect()
    }

    /// Existing deployments, suitable as a builder snapshot.
    pub fn snapshot(&self) -> BTreeSet<String> {
        self.read().baseline.keys().cloned().collect()
    }

    pub fn journal(&self) -> Vec<JournalEntry> {
        self.read().journal.clone()
    }

    pub fn journal_for(&self, target: &TargetId) -> Vec<JournalEntry> {
        self.read()
            .journal
            .iter()
            .filter(|e| &e.target == target)
            .cloned()
            .collect()
    }

    /// Units currently running on `target`.
    pub fn running_units(&self, target: &TargetId) -> Vec<String> {
        let state = self.read();
        let units = state.units.get(target).unwrap_or(&state.baseline);
        units
            .iter()
            .filter(|(_, u)| u.running)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn has_unit(&self, target: &TargetId, unit: &str) -> bool {
        let state = self.read();
        state
            .units
            .get(target)
            .unwrap_or(&state.baseline)
            .contains_key(unit)
    }

    fn apply_now(
        &self,
        target: &TargetId,
        action: &DeploymentAction,
    ) -> Result<ApplyPayload, TargetError> {
        let mut state = self.write();

        if let TargetId::Server(server) = target {
            match state.servers.get(server) {
                None => return Err(TargetError::unknown_target(target)),
                Some(s) if !s.reachable => {
                    return Err(TargetError::unreachable(format!(
                        "connection to {server} refused"
                    )))
                }
                Some(_) => {}
            }
        }

        if let TargetId::Host(host) = target {
            if !state.servers.keys().any(|s| &s.host == host) {
                return Err(TargetError::unknown_target(target));
            }
            if state.hosts_down.contains(host) {
                return Err(TargetError::unreachable(format!(
                    "host controller on {host} not responding"
                )));
            }
        }

        if let Some(rule) = state.rejections.iter().find(|r| r.matches(action)) {
            return Err(TargetError::rejected(rule.reason.clone()));
        }

        let baseline = state.baseline.clone();
        let units = state.units.entry(target.clone()).or_insert(baseline);
        apply_to_units(units, action)?;

        state.journal.push(JournalEntry {
            target: target.clone(),
            kind: action.kind(),
            unit: action.unit().to_string(),
        });

        let mut deregister = None;
        if let TargetId::Server(server) = target {
            if let Some(s) = state.servers.get_mut(server) {
                if let Some(left) = s.deregister_after.as_mut() {
                    *left = left.saturating_sub(1);
                    if *left == 0 {
                        deregister = Some(server.clone());
                    }
                }
            }
        }
        if let Some(server) = deregister {
            state.servers.remove(&server);
        }

        Ok(payload_for(target, &state))
    }
}

fn apply_to_units(
    units: &mut BTreeMap<String, UnitState>,
    action: &DeploymentAction,
) -> Result<(), TargetError> {
    let unit = action.unit();
    match action.kind() {
        ActionKind::Add => {
            if units.contains_key(unit) {
                return Err(TargetError::rejected(format!("unit {unit} already exists")));
            }
            units.insert(unit.to_string(), UnitState::running());
        }
        ActionKind::Remove => match units.get_mut(unit) {
            None => return Err(TargetError::rejected(format!("unit {unit} not found"))),
            Some(state) if state.retained_previous => state.retained_previous = false,
            Some(_) => {
                units.remove(unit);
            }
        },
        ActionKind::Undeploy => match units.get_mut(unit) {
            Some(state) => state.running = false,
            None => return Err(TargetError::rejected(format!("unit {unit} not found"))),
        },
        ActionKind::Redeploy => match units.get_mut(unit) {
            Some(state) => state.running = true,
            None => return Err(TargetError::rejected(format!("unit {unit} not found"))),
        },
        ActionKind::Replace => {
            let replaced = action.replaced().unwrap_or(unit);
            let Some(old) = units.get_mut(replaced) else {
                return Err(TargetError::rejected(format!(
                    "unit {replaced} to replace not found"
                )));
            };
            if replaced == unit {
                old.running = true;
                old.retained_previous = true;
            } else {
                old.running = false;
                units.insert(unit.to_string(), UnitState::running());
            }
        }
        ActionKind::FullReplace => {
            units.insert(unit.to_string(), UnitState::running());
        }
    }
    Ok(())
}

fn payload_for(target: &TargetId, state: &FleetState) -> ApplyPayload {
    match target {
        TargetId::Server(server) => ApplyPayload::affecting(server.clone()),
        TargetId::Host(host) => ApplyPayload {
            affected: state
                .servers
                .keys()
                .filter(|s| &s.host == host)
                .cloned()
                .collect(),
            message: None,
        },
        TargetId::Domain => ApplyPayload {
            affected: state.servers.keys().cloned().collect(),
            message: None,
        },
        TargetId::Standalone => ApplyPayload::default(),
    }
}

impl FleetResolver for MemoryFleet {
    fn members_of(&self, group: &str) -> Vec<ServerIdentity> {
        self.read()
            .servers
            .keys()
            .filter(|s| s.group == group)
            .cloned()
            .collect()
    }

    fn hosts(&self) -> Vec<String> {
        let state = self.read();
        let hosts: BTreeSet<&String> = state.servers.keys().map(|s| &s.host).collect();
        hosts.into_iter().cloned().collect()
    }

    fn is_registered(&self, target: &TargetId) -> bool {
        match target {
            TargetId::Server(server) => self.read().servers.contains_key(server),
            TargetId::Host(host) => self.read().servers.keys().any(|s| &s.host == host),
            TargetId::Domain | TargetId::Standalone => true,
        }
    }
}

impl TargetApplier for MemoryFleet {
    fn apply<'a>(
        &'a self,
        target: &'a TargetId,
        action: &'a DeploymentAction,
    ) -> BoxFuture<'a, Result<ApplyPayload, TargetError>> {
        async move {
            let delay = self.read().delays.get(target).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.apply_now(target, action)
        }
        .boxed()
    }
}
