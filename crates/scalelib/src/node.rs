use crate::JobName;
use crate::resources::{ResourceMap, ResourceValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Lifecycle state reported by the cluster manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeStatus {
    #[default]
    Unknown,
    Allocating,
    Booting,
    Ready,
    Failed,
    Deallocated,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Unknown => "Unknown",
            NodeStatus::Allocating => "Allocating",
            NodeStatus::Booting => "Booting",
            NodeStatus::Ready => "Ready",
            NodeStatus::Failed => "Failed",
            NodeStatus::Deallocated => "Deallocated",
        }
    }
}

impl FromStr for NodeStatus {
    type Err = std::convert::Infallible;

    /// Unrecognized states map to [`NodeStatus::Unknown`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "allocating" | "acquiring" => NodeStatus::Allocating,
            "booting" | "preparing" | "starting" => NodeStatus::Booting,
            "ready" | "started" => NodeStatus::Ready,
            "failed" => NodeStatus::Failed,
            "deallocated" | "off" | "terminated" => NodeStatus::Deallocated,
            _ => NodeStatus::Unknown,
        })
    }
}

impl From<String> for NodeStatus {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_default()
    }
}

impl From<NodeStatus> for String {
    fn from(value: NodeStatus) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduler side information about a node, refreshed every cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NodeMetadata {
    pub pbs_state: Option<String>,
    pub last_state_change_time: Option<DateTime<Utc>>,
    pub running_job: bool,
    pub comment: Option<String>,
    pub long_job_ids: Vec<String>,
    /// Set when the node was taken offline during the current cycle.
    pub marked_offline: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Node {
    pub name: String,
    pub hostname: Option<String>,
    pub private_ip: Option<String>,
    pub node_id: Option<String>,
    pub nodearray: String,
    pub vm_size: String,
    pub bucket_id: Option<String>,
    pub placement_group: Option<String>,
    pub resources: ResourceMap,
    /// Resources that are left after subtracting consumables of the bound jobs.
    pub available: ResourceMap,
    pub assignments: BTreeSet<JobName>,
    /// Subset of `assignments` that belongs to jobs already running on the node.
    pub running_assignments: BTreeSet<JobName>,
    pub metadata: NodeMetadata,
    pub status: NodeStatus,
    /// False for nodes that were only planned by the demand calculator.
    pub exists: bool,
    /// True when the node is known to the cluster manager.
    pub managed: bool,
    /// True when the node is registered in the scheduler with its node id.
    pub joined: bool,
    pub closed: bool,
    pub keep_alive: bool,
    pub create_time: Option<DateTime<Utc>>,
    pub exclusive_owner: Option<String>,
}

impl Node {
    pub fn new(name: impl Into<String>, resources: ResourceMap) -> Self {
        Node {
            name: name.into(),
            hostname: None,
            private_ip: None,
            node_id: None,
            nodearray: String::new(),
            vm_size: String::new(),
            bucket_id: None,
            placement_group: None,
            available: resources.clone(),
            resources,
            assignments: Default::default(),
            running_assignments: Default::default(),
            metadata: Default::default(),
            status: NodeStatus::Unknown,
            exists: true,
            managed: false,
            joined: false,
            closed: false,
            keep_alive: false,
            create_time: None,
            exclusive_owner: None,
        }
    }

    /// Hostname, or the node name for nodes that have not reported one yet.
    pub fn hostname_or_name(&self) -> &str {
        self.hostname.as_deref().unwrap_or(&self.name)
    }

    pub fn set_resource(&mut self, name: impl Into<String>, value: ResourceValue) {
        let name = name.into();
        self.available.insert(name.clone(), value.clone());
        self.resources.insert(name, value);
    }

    pub fn assign(&mut self, job: impl Into<JobName>) {
        self.assignments.insert(job.into());
    }

    /// Binds a job the scheduler already runs on this node.
    pub fn bind_running(&mut self, job: impl Into<JobName>) {
        let job = job.into();
        self.assignments.insert(job.clone());
        self.running_assignments.insert(job);
        self.metadata.running_job = true;
    }

    pub fn has_assignments(&self) -> bool {
        !self.assignments.is_empty()
    }

    /// Drops assignments that were only predicted by the demand calculator.
    pub fn clear_predicted_assignments(&mut self) {
        let running = &self.running_assignments;
        self.assignments.retain(|job| running.contains(job));
        if self.assignments.is_empty() {
            self.exclusive_owner = None;
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == NodeStatus::Ready
    }

    pub fn is_failed(&self) -> bool {
        self.status == NodeStatus::Failed
    }

    /// Time since which the node is considered idle.
    pub fn idle_since(&self) -> Option<DateTime<Utc>> {
        self.metadata.last_state_change_time.or(self.create_time)
    }

    pub fn pbs_state(&self) -> &str {
        self.metadata.pbs_state.as_deref().unwrap_or("")
    }
}
