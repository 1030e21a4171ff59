use chrono::{DateTime, Utc};
use scalelib::bucket::Bucket;
use scalelib::job::Job;
use scalelib::node::Node;
use std::time::Duration;

use crate::autoscale::config::AutoscaleConfig;
use crate::pbs::queue::Queue;
use crate::pbs::resource::ResourceDefinition;

/// Columns of `azpbs demand` when `output_columns` is not configured.
pub const DEFAULT_DEMAND_COLUMNS: [&str; 14] = [
    "name",
    "hostname",
    "job_ids",
    "exists",
    "required",
    "managed",
    "slots",
    "vm_size",
    "memory",
    "vcpu_count",
    "state",
    "placement_group",
    "create_time_remaining",
    "idle_time_remaining",
];

#[derive(clap::ValueEnum, Clone)]
pub enum Outputs {
    CLI,
    JSON,
    Quiet,
}

/// A node of the demand together with the time it has left before the autoscaler
/// acts on it.
pub struct DemandRow<'a> {
    pub node: &'a Node,
    /// Seconds until the boot timeout, for nodes that have not joined yet.
    pub create_time_remaining: Option<i64>,
    /// Seconds until the idle timeout, for idle nodes.
    pub idle_time_remaining: Option<i64>,
}

fn remaining(since: DateTime<Utc>, timeout: Duration, now: DateTime<Utc>) -> i64 {
    let elapsed = (now - since).num_seconds().max(0);
    (timeout.as_secs() as i64 - elapsed).max(0)
}

impl<'a> DemandRow<'a> {
    pub fn new(node: &'a Node, config: &AutoscaleConfig, now: DateTime<Utc>) -> Self {
        let booting = node.exists && (!node.is_ready() || !node.joined);
        let create_time_remaining = match node.create_time {
            Some(created) if booting => Some(remaining(created, config.boot_timeout, now)),
            _ => None,
        };
        let idle_time_remaining = match node.idle_since() {
            Some(since) if node.exists && !node.has_assignments() => {
                Some(remaining(since, config.idle_timeout, now))
            }
            _ => None,
        };
        DemandRow {
            node,
            create_time_remaining,
            idle_time_remaining,
        }
    }

    /// Value of a column. Unknown column names are looked up among the node resources.
    pub fn column(&self, column: &str) -> String {
        let node = self.node;
        let optional = |value: Option<&str>| value.unwrap_or_default().to_string();
        match column {
            "name" => node.name.clone(),
            "hostname" => optional(node.hostname.as_deref()),
            "node_id" => optional(node.node_id.as_deref()),
            "private_ip" => optional(node.private_ip.as_deref()),
            "nodearray" => node.nodearray.clone(),
            "job_ids" => node
                .assignments
                .iter()
                .map(|job| job.as_str())
                .collect::<Vec<_>>()
                .join(","),
            "running_job_ids" => node
                .running_assignments
                .iter()
                .map(|job| job.as_str())
                .collect::<Vec<_>>()
                .join(","),
            "exists" => node.exists.to_string(),
            "required" => node.has_assignments().to_string(),
            "managed" => node.managed.to_string(),
            "slots" => node
                .available
                .get("ncpus")
                .map(|value| value.to_string())
                .unwrap_or_default(),
            "vm_size" => node.vm_size.clone(),
            "memory" => resource(node, "mem"),
            "vcpu_count" => resource(node, "ncpus"),
            "state" => match node.metadata.pbs_state.as_deref() {
                Some(state) if !state.is_empty() => state.to_string(),
                _ => node.status.to_string(),
            },
            "status" => node.status.to_string(),
            "placement_group" => optional(node.placement_group.as_deref()),
            "create_time_remaining" => self
                .create_time_remaining
                .map(|secs| secs.to_string())
                .unwrap_or_default(),
            "idle_time_remaining" => self
                .idle_time_remaining
                .map(|secs| secs.to_string())
                .unwrap_or_default(),
            other => resource(node, other),
        }
    }
}

fn resource(node: &Node, name: &str) -> String {
    node.resources
        .get(name)
        .map(|value| value.to_string())
        .unwrap_or_default()
}

pub trait Output {
    // Autoscaling
    fn print_demand(&self, rows: &[DemandRow], columns: &[String]);
    fn print_jobs(&self, jobs: &[Job]);
    fn print_buckets(&self, buckets: &[Bucket]);

    // Scheduler
    fn print_queues(&self, queues: &[&Queue]);
    fn print_resources(&self, definitions: &[&ResourceDefinition]);
    fn print_host_states(&self, hostnames: &[String], failed: &[String], state: &str);

    fn print_error(&self, error: anyhow::Error);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::utils::{TestNodeBuilder, test_now};
    use chrono::Duration as ChronoDuration;
    use scalelib::node::NodeStatus;

    #[test]
    fn test_remaining_times() {
        let config = AutoscaleConfig::default();
        let idle = TestNodeBuilder::default()
            .name("ip-0a")
            .resource("ncpus", 4)
            .state_change_time(test_now() - ChronoDuration::seconds(100))
            .build();
        let row = DemandRow::new(&idle, &config, test_now());
        assert_eq!(row.idle_time_remaining, Some(200));
        assert_eq!(row.create_time_remaining, None);
        assert_eq!(row.column("vcpu_count"), "4");
        assert_eq!(row.column("required"), "false");

        let booting = TestNodeBuilder::default()
            .name("htc-1")
            .status(NodeStatus::Booting)
            .create_time(test_now() - ChronoDuration::hours(2))
            .running_job("7")
            .build();
        let row = DemandRow::new(&booting, &config, test_now());
        assert_eq!(row.create_time_remaining, Some(0));
        assert_eq!(row.idle_time_remaining, None);
        assert_eq!(row.column("job_ids"), "7");
        assert_eq!(row.column("unknown_resource"), "");
    }
}
