#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

const FLEET: &str = r#"
servers:
  - { host: host-a, name: server-one, group: main-group }
  - { host: host-a, name: server-two, group: main-group, reachable: false }
  - { host: host-b, name: server-three, group: main-group }
  - { host: host-b, name: server-four, group: other-group }
deployments: [app.war]
"#;

const HEALTHY_FLEET: &str = r#"
servers:
  - { host: host-a, name: server-one, group: main-group }
  - { host: host-b, name: server-two, group: main-group }
deployments: [app.war]
"#;

const UPGRADE_PLAN: &str = r#"
directives:
  - { op: to_server_group, name: main-group }
  - { op: add, unit: new.war, content: "sha256:0a1b" }
  - { op: replace, unit: app.war }
  - { op: and_remove_undeployed }
"#;

fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

fn rollout(dir: &TempDir, fleet: &str) -> Command {
    let fleet = write(dir, "fleet.yaml", fleet);
    let mut cmd = Command::cargo_bin("rollout").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("ROLLOUT_FLEET")
        .env_remove("RUST_LOG")
        .arg("--fleet")
        .arg(fleet);
    cmd
}

// ---------------------------------------------------------------------------
// rollout fleet
// ---------------------------------------------------------------------------

#[test]
fn fleet_lists_servers_by_group() {
    let dir = TempDir::new().unwrap();
    rollout(&dir, FLEET)
        .arg("fleet")
        .assert()
        .success()
        .stdout(predicate::str::contains("main-group"))
        .stdout(predicate::str::contains("host-a:server-two"))
        .stdout(predicate::str::contains("deployed: app.war"));
}

#[test]
fn fleet_json_groups_servers() {
    let dir = TempDir::new().unwrap();
    let output = rollout(&dir, FLEET)
        .args(["fleet", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let groups = value["groups"].as_array().unwrap();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0]["group"], "main-group");
    assert_eq!(groups[0]["servers"].as_array().unwrap().len(), 3);
    assert_eq!(value["deployments"][0], "app.war");
}

#[test]
fn fleet_file_from_env() {
    let dir = TempDir::new().unwrap();
    let fleet = write(&dir, "fleet.yaml", FLEET);
    Command::cargo_bin("rollout")
        .unwrap()
        .env("ROLLOUT_FLEET", &fleet)
        .arg("fleet")
        .assert()
        .success()
        .stdout(predicate::str::contains("other-group"));
}

#[test]
fn missing_fleet_is_an_error() {
    Command::cargo_bin("rollout")
        .unwrap()
        .env_remove("ROLLOUT_FLEET")
        .arg("fleet")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--fleet"));
}

#[test]
fn duplicate_servers_are_rejected() {
    let dir = TempDir::new().unwrap();
    rollout(
        &dir,
        "servers:\n  - { host: h, name: s, group: g }\n  - { host: h, name: s, group: g }\n",
    )
    .arg("fleet")
    .assert()
    .failure()
    .stderr(predicate::str::contains("duplicate server 'h:s'"));
}

// ---------------------------------------------------------------------------
// rollout validate
// ---------------------------------------------------------------------------

#[test]
fn validate_shows_sets_and_actions() {
    let dir = TempDir::new().unwrap();
    let plan = write(&dir, "plan.yaml", UPGRADE_PLAN);
    rollout(&dir, FLEET)
        .arg("validate")
        .arg(&plan)
        .assert()
        .success()
        .stdout(predicate::str::contains("1 set(s), 3 action(s)"))
        .stdout(predicate::str::contains("server-group:main-group"))
        .stdout(predicate::str::contains("replace"));
}

#[test]
fn validate_json_is_the_plan() {
    let dir = TempDir::new().unwrap();
    let plan = write(&dir, "plan.yaml", UPGRADE_PLAN);
    let output = rollout(&dir, FLEET)
        .arg("validate")
        .arg(&plan)
        .arg("--json")
        .output()
        .unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let sets = value["sets"].as_array().unwrap();
    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0]["scope"]["type"], "server_group");
    assert_eq!(sets[0]["scope"]["name"], "main-group");
    let kinds: Vec<&str> = sets[0]["actions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["kind"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, vec!["add", "replace", "remove"]);
}

#[test]
fn validate_rejects_out_of_order_remove_undeployed() {
    let dir = TempDir::new().unwrap();
    let plan = write(
        &dir,
        "plan.yaml",
        "directives:\n  - { op: add, unit: x.war, content: c }\n  - { op: and_remove_undeployed }\n",
    );
    rollout(&dir, FLEET)
        .arg("validate")
        .arg(&plan)
        .assert()
        .failure()
        .stderr(predicate::str::contains("directive 2"))
        .stderr(predicate::str::contains("illegal plan state"));
}

#[test]
fn validate_rejects_unknown_unit() {
    let dir = TempDir::new().unwrap();
    let plan = write(&dir, "plan.yaml", "directives:\n  - { op: remove, unit: ghost.war }\n");
    rollout(&dir, FLEET)
        .arg("validate")
        .arg(&plan)
        .assert()
        .failure()
        .stderr(predicate::str::contains("ghost.war"));
}

#[test]
fn validate_rejects_empty_plan() {
    let dir = TempDir::new().unwrap();
    let plan = write(&dir, "plan.yaml", "directives: []\n");
    rollout(&dir, FLEET)
        .arg("validate")
        .arg(&plan)
        .assert()
        .failure()
        .stderr(predicate::str::contains("plan contains no actions"));
}

// ---------------------------------------------------------------------------
// rollout run
// ---------------------------------------------------------------------------

#[test]
fn run_reports_partial_failure_and_exits_zero() {
    let dir = TempDir::new().unwrap();
    let plan = write(&dir, "plan.yaml", UPGRADE_PLAN);
    rollout(&dir, FLEET)
        .arg("run")
        .arg(&plan)
        .assert()
        .success()
        .stdout(predicate::str::contains("host-a:server-two"))
        .stdout(predicate::str::contains("target unreachable"))
        .stdout(predicate::str::contains(
            "6 succeeded, 1 failed, 0 rolled back, 2 aborted, 0 cancelled",
        ));
}

#[test]
fn run_json_has_one_row_per_action_and_target() {
    let dir = TempDir::new().unwrap();
    let plan = write(&dir, "plan.yaml", UPGRADE_PLAN);
    let output = rollout(&dir, FLEET)
        .arg("run")
        .arg(&plan)
        .arg("--json")
        .output()
        .unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["summary"]["complete"], true);
    assert_eq!(value["summary"]["succeeded"], 6);
    assert_eq!(value["summary"]["failed"], 1);
    assert_eq!(value["summary"]["pending"], 0);

    let results = value["results"].as_array().unwrap();
    assert_eq!(results.len(), 9);
    let failed: Vec<&serde_json::Value> = results
        .iter()
        .filter(|r| r["result"]["outcome"] == "failed")
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["target"], "host-a:server-two");
    assert_eq!(failed[0]["result"]["type"], "unreachable");
}

#[test]
fn run_with_rollback_reverts_applied_actions() {
    let dir = TempDir::new().unwrap();
    let plan = write(
        &dir,
        "plan.yaml",
        r#"
directives:
  - { op: to_server_group, name: main-group }
  - { op: add, unit: new.war, content: c }
  - { op: add, unit: app.war, content: c }
  - { op: with_rollback }
"#,
    );
    let output = rollout(&dir, HEALTHY_FLEET)
        .arg("run")
        .arg(&plan)
        .arg("--json")
        .output()
        .unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["summary"]["rolled_back"], 2);
    assert_eq!(value["summary"]["failed"], 2);
    for row in value["results"].as_array().unwrap() {
        if row["action"]["unit"] == "new.war" {
            assert_eq!(row["result"]["outcome"], "rolled_back");
            assert_eq!(row["result"]["rollback"]["status"], "reverted");
        }
    }
}

#[test]
fn run_rejects_zero_timeout() {
    let dir = TempDir::new().unwrap();
    let plan = write(&dir, "plan.yaml", UPGRADE_PLAN);
    rollout(&dir, FLEET)
        .args(["run", "--timeout-ms", "0"])
        .arg(&plan)
        .assert()
        .failure()
        .stderr(predicate::str::contains("apply_timeout_ms must be greater than zero"));
}

#[test]
fn run_against_empty_group_succeeds() {
    let dir = TempDir::new().unwrap();
    let plan = write(
        &dir,
        "plan.yaml",
        "directives:\n  - { op: to_server_group, name: nobody }\n  - { op: redeploy, unit: app.war }\n",
    );
    rollout(&dir, FLEET)
        .arg("run")
        .arg(&plan)
        .assert()
        .success()
        .stdout(predicate::str::contains("0 succeeded, 0 failed"));
}
