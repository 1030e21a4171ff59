use crate::JobName;
use crate::cluster::MachineRequest;
use crate::node::{Node, NodeStatus};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Outcome of one matching pass. Produced once per cycle and consumed right away.
#[derive(Debug)]
pub struct DemandResult {
    /// Existing nodes followed by planned nodes (`exists == false`).
    pub compute_nodes: Vec<Node>,
    pub requests: Vec<MachineRequest>,
    pub matched_jobs: Vec<JobName>,
    pub unmatched_jobs: Vec<JobName>,
}

impl DemandResult {
    pub fn new_nodes(&self) -> impl Iterator<Item = &Node> {
        self.compute_nodes.iter().filter(|node| !node.exists)
    }

    pub fn existing_nodes(&self) -> impl Iterator<Item = &Node> {
        self.compute_nodes.iter().filter(|node| node.exists)
    }

    /// Indices of managed nodes without any assignment that have been idle for at least
    /// `idle_timeout`. Nodes the scheduler reports offline are returned right away.
    pub fn find_unmatched_for(&self, idle_timeout: Duration, now: DateTime<Utc>) -> Vec<usize> {
        self.compute_nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| {
                if !node.exists || !node.managed || node.keep_alive || node.has_assignments() {
                    return false;
                }
                if node.pbs_state().contains("offline") {
                    return true;
                }
                node.idle_since()
                    .is_some_and(|since| elapsed(since, now) >= idle_timeout)
            })
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Indices of managed nodes that did not become ready (or did not join the scheduler)
    /// within `boot_timeout` of their creation.
    pub fn find_booting(&self, boot_timeout: Duration, now: DateTime<Utc>) -> Vec<usize> {
        self.compute_nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| {
                node.exists
                    && node.managed
                    && !node.keep_alive
                    && (node.status != NodeStatus::Ready || !node.joined)
                    && node
                        .create_time
                        .is_some_and(|created| elapsed(created, now) >= boot_timeout)
            })
            .map(|(idx, _)| idx)
            .collect()
    }
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or_default()
}

/// Groups planned nodes by machine type and placement group, keeping the first-seen order.
pub(crate) fn group_requests(nodes: &[Node]) -> Vec<MachineRequest> {
    let mut requests: Vec<MachineRequest> = Vec::new();
    for node in nodes.iter().filter(|node| !node.exists) {
        match requests.iter_mut().find(|r| {
            r.nodearray == node.nodearray
                && r.vm_size == node.vm_size
                && r.placement_group == node.placement_group
        }) {
            Some(request) => request.count += 1,
            None => requests.push(MachineRequest {
                nodearray: node.nodearray.clone(),
                vm_size: node.vm_size.clone(),
                count: 1,
                placement_group: node.placement_group.clone(),
            }),
        }
    }
    requests
}
