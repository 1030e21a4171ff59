use chrono::{DateTime, Utc};
use scalelib::bucket::Bucket;
use scalelib::cluster::{ClusterManager, MachineRequest};
use scalelib::node::{Node, NodeStatus};
use scalelib::resources::{ResourceMap, ResourceValue, Size};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::autoscale::config::ClusterConfig;
use crate::common::error::PbsError;
use crate::pbs::command::run_program;

/// Cluster manager reached through an external program.
///
/// The program is called as `<command...> <verb>`, where the verb is one of `buckets`,
/// `nodes`, `bootup` or `shutdown`. Requests are written to stdin as JSON and the
/// response is read from stdout as JSON.
pub struct ExternalClusterManager {
    command: Vec<String>,
}

/// A node as reported by the `nodes` and `bootup` verbs.
#[derive(Debug, Deserialize)]
struct ClusterNode {
    name: String,
    #[serde(default)]
    node_id: Option<String>,
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default)]
    private_ip: Option<String>,
    #[serde(default)]
    nodearray: String,
    #[serde(default)]
    vm_size: String,
    #[serde(default)]
    placement_group: Option<String>,
    #[serde(default)]
    status: NodeStatus,
    #[serde(default)]
    create_time: Option<DateTime<Utc>>,
    #[serde(default)]
    keep_alive: bool,
    #[serde(default)]
    resources: ResourceMap,
}

impl From<ClusterNode> for Node {
    fn from(value: ClusterNode) -> Self {
        let mut node = Node::new(value.name, normalize_resources(value.resources));
        node.node_id = value.node_id;
        node.hostname = value.hostname;
        node.private_ip = value.private_ip;
        node.nodearray = value.nodearray;
        node.vm_size = value.vm_size;
        node.placement_group = value.placement_group;
        node.status = value.status;
        node.create_time = value.create_time;
        node.keep_alive = value.keep_alive;
        node.managed = true;
        node
    }
}

#[derive(Serialize)]
struct ShutdownRequest<'a> {
    name: &'a str,
    node_id: Option<&'a str>,
}

/// Memory is usually reported as a string such as `"16gb"`.
fn normalize_resources(resources: ResourceMap) -> ResourceMap {
    resources
        .into_iter()
        .map(|(name, value)| {
            let value = match value {
                ResourceValue::Str(text)
                    if text.ends_with(['b', 'B', 'w', 'W'])
                        && text.starts_with(|c: char| c.is_ascii_digit()) =>
                {
                    match text.parse::<Size>() {
                        Ok(size) => ResourceValue::Size(size),
                        Err(_) => ResourceValue::Str(text),
                    }
                }
                other => other,
            };
            (name, value)
        })
        .collect()
}

impl ExternalClusterManager {
    pub fn new(config: &ClusterConfig) -> crate::Result<Self> {
        if config.command.is_empty() {
            return Err(PbsError::ConfigurationError(
                "cluster.command is not set, the autoscaler cannot reach the cluster manager"
                    .to_string(),
            ));
        }
        Ok(ExternalClusterManager {
            command: config.command.clone(),
        })
    }

    fn call<T: DeserializeOwned>(&self, verb: &str, input: Option<Vec<u8>>) -> scalelib::Result<T> {
        let mut arguments: Vec<&str> = self.command.iter().map(|s| s.as_str()).collect();
        arguments.push(verb);
        let output = run_program(&arguments, input.as_deref())
            .map_err(|error| scalelib::Error::ClusterError(format!("{verb}: {error:#}")))?;
        serde_json::from_str(&output).map_err(|error| {
            scalelib::Error::ClusterError(format!("Invalid response to {verb}: {error}"))
        })
    }
}

impl ClusterManager for ExternalClusterManager {
    fn buckets(&self) -> scalelib::Result<Vec<Bucket>> {
        let mut buckets: Vec<Bucket> = self.call("buckets", None)?;
        for bucket in buckets.iter_mut() {
            bucket.resources = normalize_resources(std::mem::take(&mut bucket.resources));
        }
        Ok(buckets)
    }

    fn nodes(&self) -> scalelib::Result<Vec<Node>> {
        let nodes: Vec<ClusterNode> = self.call("nodes", None)?;
        Ok(nodes.into_iter().map(Node::from).collect())
    }

    fn bootup(&mut self, requests: &[MachineRequest]) -> scalelib::Result<Vec<Node>> {
        let input = serde_json::to_vec(requests)?;
        let nodes: Vec<ClusterNode> = self.call("bootup", Some(input))?;
        Ok(nodes.into_iter().map(Node::from).collect())
    }

    fn shutdown(&mut self, nodes: &[&Node]) -> scalelib::Result<Vec<String>> {
        let request: Vec<ShutdownRequest> = nodes
            .iter()
            .map(|node| ShutdownRequest {
                name: &node.name,
                node_id: node.node_id.as_deref(),
            })
            .collect();
        let input = serde_json::to_vec(&request)?;
        self.call("shutdown", Some(input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    /// Writes a fake cluster manager that answers every verb from `<dir>/<verb>.json` and
    /// stores its stdin into `<dir>/<verb>.in`.
    fn fake_manager(dir: &Path) -> ExternalClusterManager {
        let script = dir.join("manager.sh");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\ncat > {dir}/$1.in\ncat {dir}/$1.json\n",
                dir = dir.display()
            ),
        )
        .unwrap();
        ExternalClusterManager::new(&ClusterConfig {
            command: vec!["sh".to_string(), script.display().to_string()],
        })
        .unwrap()
    }

    fn respond(dir: &Path, verb: &str, content: &str) {
        std::fs::write(dir.join(format!("{verb}.json")), content).unwrap();
    }

    #[test]
    fn test_empty_command() {
        assert!(ExternalClusterManager::new(&ClusterConfig::default()).is_err());
    }

    #[test]
    fn test_nodes() {
        let dir = TempDir::with_prefix("pbspro").unwrap();
        respond(
            dir.path(),
            "nodes",
            r#"[{"name": "htc-1", "node_id": "id-1", "hostname": "ip-0A", "private_ip": "10.0.0.10",
                 "nodearray": "htc", "vm_size": "Standard_F4", "status": "Ready",
                 "create_time": "2024-06-01T11:00:00Z",
                 "resources": {"ncpus": 4, "mem": "16gb", "slot_type": "htc"}},
                {"name": "htc-2", "status": "Allocating"}]"#,
        );
        let manager = fake_manager(dir.path());
        let nodes = manager.nodes().unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].hostname.as_deref(), Some("ip-0A"));
        assert_eq!(nodes[0].status, NodeStatus::Ready);
        assert!(nodes[0].managed);
        assert_eq!(nodes[0].resources["mem"].to_string(), "16gb");
        assert_eq!(nodes[0].resources["slot_type"], ResourceValue::from("htc"));
        assert_eq!(nodes[1].status, NodeStatus::Allocating);
        assert!(nodes[1].hostname.is_none());
    }

    #[test]
    fn test_bootup_and_shutdown() {
        let dir = TempDir::with_prefix("pbspro").unwrap();
        respond(dir.path(), "bootup", r#"[{"name": "htc-3", "nodearray": "htc"}]"#);
        respond(dir.path(), "shutdown", r#"["id-1"]"#);
        let mut manager = fake_manager(dir.path());

        let booted = manager
            .bootup(&[MachineRequest {
                nodearray: "htc".to_string(),
                vm_size: "Standard_F4".to_string(),
                count: 1,
                placement_group: None,
            }])
            .unwrap();
        assert_eq!(booted[0].name, "htc-3");
        let request = std::fs::read_to_string(dir.path().join("bootup.in")).unwrap();
        insta::assert_snapshot!(request, @r###"[{"nodearray":"htc","vm_size":"Standard_F4","count":1,"placement_group":null}]"###);

        let mut node = Node::new("htc-1", ResourceMap::default());
        node.node_id = Some("id-1".to_string());
        assert_eq!(manager.shutdown(&[&node]).unwrap(), vec!["id-1"]);
        let request = std::fs::read_to_string(dir.path().join("shutdown.in")).unwrap();
        insta::assert_snapshot!(request, @r###"[{"name":"htc-1","node_id":"id-1"}]"###);
    }

    #[test]
    fn test_invalid_response() {
        let dir = TempDir::with_prefix("pbspro").unwrap();
        respond(dir.path(), "buckets", "not json");
        let manager = fake_manager(dir.path());
        let error = manager.buckets().unwrap_err();
        assert!(matches!(error, scalelib::Error::ClusterError(_)));
    }
}
