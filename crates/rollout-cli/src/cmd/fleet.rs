use crate::output::{print_json, print_table};
use rollout_core::FleetConfig;
use serde::Serialize;

#[derive(Serialize)]
struct GroupView<'a> {
    group: &'a str,
    servers: Vec<ServerView<'a>>,
}

#[derive(Serialize)]
struct ServerView<'a> {
    host: &'a str,
    name: &'a str,
    reachable: bool,
}

pub fn run(fleet: &FleetConfig, json: bool) -> anyhow::Result<()> {
    let groups: Vec<GroupView<'_>> = fleet
        .groups()
        .into_iter()
        .map(|group| GroupView {
            group,
            servers: fleet
                .servers
                .iter()
                .filter(|s| s.group == group)
                .map(|s| ServerView {
                    host: &s.host,
                    name: &s.name,
                    reachable: s.reachable,
                })
                .collect(),
        })
        .collect();

    if json {
        return print_json(&serde_json::json!({
            "groups": groups,
            "deployments": fleet.deployments,
        }));
    }

    if groups.is_empty() {
        println!("No servers.");
    } else {
        let rows: Vec<Vec<String>> = groups
            .iter()
            .flat_map(|g| {
                g.servers.iter().map(move |s| {
                    vec![
                        g.group.to_string(),
                        format!("{}:{}", s.host, s.name),
                        if s.reachable { "yes" } else { "no" }.to_string(),
                    ]
                })
            })
            .collect();
        print_table(&["GROUP", "SERVER", "REACHABLE"], &rows);
    }

    if !fleet.deployments.is_empty() {
        println!();
        println!("deployed: {}", fleet.deployments.join(", "));
    }
    Ok(())
}
