use crate::bucket::Bucket;
use crate::constraints::{Constraint, HostResource};
use crate::job::{Job, PackingStrategy};
use crate::node::{Node, NodeStatus};
use crate::resources::{ResourceMap, ResourceValue};
use chrono::{DateTime, Duration, TimeZone, Utc};
use derive_builder::Builder;

pub fn resource_map(items: &[(&str, ResourceValue)]) -> ResourceMap {
    items
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

pub fn size(value: &str) -> ResourceValue {
    ResourceValue::Size(value.parse().unwrap())
}

/// Consumable host resource request, e.g. `consume(&[("ncpus", 2.into())])`.
pub fn consume(items: &[(&str, ResourceValue)]) -> Constraint {
    Constraint::HostResources(
        items
            .iter()
            .map(|(name, value)| HostResource::new(*name, value.clone(), true))
            .collect(),
    )
}

pub fn ncpus(count: i64) -> Constraint {
    consume(&[("ncpus", count.into())])
}

pub fn test_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

pub fn seconds_ago(secs: i64) -> DateTime<Utc> {
    test_now() - Duration::seconds(secs)
}

#[derive(Builder, Default, Clone)]
#[builder(pattern = "owned", build_fn(name = "finish"))]
pub struct TestNode {
    #[builder(setter(into))]
    name: String,
    #[builder(default = "\"htc\".to_string()", setter(into))]
    nodearray: String,
    #[builder(default = "\"Standard_F4\".to_string()", setter(into))]
    vm_size: String,
    #[builder(default)]
    resources: Vec<(String, ResourceValue)>,
    #[builder(default, setter(into, strip_option))]
    placement_group: Option<String>,
    #[builder(default = "NodeStatus::Ready")]
    status: NodeStatus,
    #[builder(default = "true")]
    managed: bool,
    #[builder(default = "true")]
    joined: bool,
    #[builder(default)]
    closed: bool,
    #[builder(default)]
    keep_alive: bool,
    #[builder(default, setter(strip_option))]
    create_time: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    state_change_time: Option<DateTime<Utc>>,
    #[builder(default, setter(into, strip_option))]
    pbs_state: Option<String>,
    #[builder(default)]
    running_jobs: Vec<String>,
}

impl TestNodeBuilder {
    pub fn resource<V: Into<ResourceValue>>(mut self, name: &str, value: V) -> Self {
        self.resources
            .get_or_insert_with(Vec::new)
            .push((name.to_string(), value.into()));
        self
    }

    pub fn running_job(mut self, job: &str) -> Self {
        self.running_jobs
            .get_or_insert_with(Vec::new)
            .push(job.to_string());
        self
    }

    pub fn build(self) -> Node {
        let config: TestNode = self.finish().unwrap();
        let resources = config.resources.into_iter().collect();
        let mut node = Node::new(config.name.clone(), resources);
        node.hostname = Some(config.name.clone());
        node.private_ip = Some("10.1.0.4".to_string());
        node.node_id = Some(format!("id-{}", config.name));
        node.nodearray = config.nodearray;
        node.vm_size = config.vm_size;
        node.placement_group = config.placement_group;
        node.status = config.status;
        node.managed = config.managed;
        node.joined = config.joined;
        node.closed = config.closed;
        node.keep_alive = config.keep_alive;
        node.create_time = config.create_time;
        node.metadata.last_state_change_time = config.state_change_time;
        node.metadata.pbs_state = config.pbs_state;
        for job in config.running_jobs {
            node.bind_running(job);
        }
        node
    }
}

#[derive(Builder, Default, Clone)]
#[builder(pattern = "owned", build_fn(name = "finish"))]
pub struct TestBucket {
    #[builder(default = "\"htc\".to_string()", setter(into))]
    nodearray: String,
    #[builder(default = "\"Standard_F4\".to_string()", setter(into))]
    vm_size: String,
    #[builder(default = "100")]
    available_count: u32,
    #[builder(default, setter(into, strip_option))]
    placement_group: Option<String>,
    #[builder(default)]
    resources: Vec<(String, ResourceValue)>,
}

impl TestBucketBuilder {
    pub fn resource<V: Into<ResourceValue>>(mut self, name: &str, value: V) -> Self {
        self.resources
            .get_or_insert_with(Vec::new)
            .push((name.to_string(), value.into()));
        self
    }

    pub fn build(self) -> Bucket {
        let config: TestBucket = self.finish().unwrap();
        Bucket {
            bucket_id: format!(
                "{}-{}-{}",
                config.nodearray,
                config.vm_size,
                config.placement_group.as_deref().unwrap_or("none")
            ),
            nodearray: config.nodearray,
            vm_size: config.vm_size,
            placement_group: config.placement_group,
            available_count: config.available_count,
            resources: config.resources.into_iter().collect(),
        }
    }
}

pub fn test_job(name: &str, node_count: u32, constraints: Vec<Constraint>) -> Job {
    let mut job = Job::new(name, constraints);
    job.node_count = node_count;
    job
}

pub fn scatter_job(name: &str, node_count: u32, constraints: Vec<Constraint>) -> Job {
    let mut job = test_job(name, node_count, constraints);
    job.packing_strategy = PackingStrategy::Scatter;
    job
}
