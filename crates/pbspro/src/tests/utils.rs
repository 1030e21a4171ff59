use chrono::{DateTime, TimeZone, Utc};
use derive_builder::Builder;
use scalelib::Set;
use scalelib::bucket::Bucket;
use scalelib::cluster::{ClusterManager, MachineRequest};
use scalelib::node::{Node, NodeStatus};
use scalelib::resources::ResourceValue;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt::Debug;
use tempfile::TempDir;

use crate::CCNODEID;
use crate::common::parser2::CharParser;
use crate::pbs::command::{CommandError, CommandResult, PbsCommand};
use crate::pbs::parser::{PbsRecord, StateCounts};
use crate::pbs::queue::Queue;
use crate::pbs::resource::{ResourceDefinition, ResourceDefinitions, ResourceType};

pub fn expect_parser_error<T: Debug>(parser: impl CharParser<T>, input: &str) -> String {
    match parser.parse_text(input) {
        Ok(value) => panic!("The parser should have failed, it returned {value:?}"),
        Err(error) => error.to_string(),
    }
}

pub fn test_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

/// Definitions of a typical autoscaled cluster.
pub fn definitions() -> ResourceDefinitions {
    let mut host = ResourceDefinition::new("host", ResourceType::String, "h");
    host.read_only = true;
    let mut vnode = ResourceDefinition::new("vnode", ResourceType::String, "h");
    vnode.read_only = true;
    ResourceDefinitions::new([
        ResourceDefinition::new("ncpus", ResourceType::Long, "nh"),
        ResourceDefinition::new("mem", ResourceType::Size, "nh"),
        ResourceDefinition::new("ngpus", ResourceType::Long, "nh"),
        ResourceDefinition::new("slot_type", ResourceType::String, "h"),
        ResourceDefinition::new(CCNODEID, ResourceType::String, "h"),
        ResourceDefinition::new("group_id", ResourceType::String, "h"),
        ResourceDefinition::new("ungrouped", ResourceType::String, "h"),
        ResourceDefinition::new("licenses", ResourceType::Long, "q"),
        ResourceDefinition::new("walltime", ResourceType::Duration, ""),
        ResourceDefinition::new("nodect", ResourceType::Long, ""),
        ResourceDefinition::new("skipcyclesubhook", ResourceType::Boolean, ""),
        host,
        vnode,
    ])
}

/// The `resources:` line of `sched_config` used by most tests.
pub fn scheduling_resources() -> Set<String> {
    [
        "ncpus",
        "mem",
        "ngpus",
        "slot_type",
        "ungrouped",
        "group_id",
        "licenses",
        "host",
        "vnode",
    ]
    .into_iter()
    .map(|name| name.to_string())
    .collect()
}

pub fn record(obj_type: &str, name: &str, attributes: &[(&str, &str)]) -> PbsRecord {
    let mut record = PbsRecord::new(obj_type, name);
    for (key, value) in attributes {
        record.insert(*key, *value);
    }
    record
}

/// Creates a `sched_priv` directory whose `sched_config` schedules `resources`.
pub fn sched_priv_dir(resources: &str) -> TempDir {
    let dir = TempDir::with_prefix("sched_priv").unwrap();
    std::fs::write(
        dir.path().join("sched_config"),
        format!("# sched_config\nround_robin: False all\nresources: \"{resources}\"\n"),
    )
    .unwrap();
    dir
}

pub fn queue(name: &str, enabled_started: bool) -> Queue {
    Queue {
        name: name.to_string(),
        queue_type: "Execution".to_string(),
        node_group_key: None,
        node_group_enable: false,
        total_jobs: 0,
        state_count: StateCounts::default(),
        resources_default: Default::default(),
        default_chunk: Default::default(),
        resource_state: Default::default(),
        max_run: None,
        max_queued: None,
        enabled: enabled_started,
        started: enabled_started,
    }
}

enum Response {
    Output(String),
    Error(CommandError),
}

impl Response {
    fn reply(&self) -> CommandResult<String> {
        match self {
            Response::Output(output) => Ok(output.clone()),
            Response::Error(CommandError::NotFound(message)) => {
                Err(CommandError::NotFound(message.clone()))
            }
            Response::Error(CommandError::Failed {
                code,
                stderr,
                stdout,
            }) => Err(CommandError::Failed {
                code: *code,
                stderr: stderr.clone(),
                stdout: stdout.clone(),
            }),
            Response::Error(CommandError::Spawn { program, source }) => Err(CommandError::Failed {
                code: -1,
                stderr: format!("{program}: {source}"),
                stdout: String::new(),
            }),
        }
    }
}

/// PBS command line tools serving canned outputs.
///
/// Responses are keyed by the full command line, e.g. `qmgr list node ip-0a` or
/// `pbsnodes -a`. Mutating commands without a registered response succeed, every other
/// unregistered command fails.
#[derive(Default)]
pub struct MockPbs {
    responses: RefCell<BTreeMap<String, Response>>,
    calls: RefCell<Vec<String>>,
}

impl MockPbs {
    pub fn with_qstat(self, args: &str, output: &str) -> Self {
        self.respond(&format!("qstat {args}"), output);
        self
    }

    pub fn with_qmgr(self, args: &str, output: &str) -> Self {
        self.respond(&format!("qmgr {args}"), output);
        self
    }

    pub fn with_pbsnodes(self, args: &str, output: &str) -> Self {
        self.respond(&format!("pbsnodes {args}"), output);
        self
    }

    pub fn with_qmgr_error(self, args: &str, error: CommandError) -> Self {
        self.fail(&format!("qmgr {args}"), error);
        self
    }

    pub fn with_pbsnodes_error(self, args: &str, error: CommandError) -> Self {
        self.fail(&format!("pbsnodes {args}"), error);
        self
    }

    /// Replaces the response of a command, e.g. between two autoscale cycles.
    pub fn respond(&self, command: &str, output: &str) {
        self.responses
            .borrow_mut()
            .insert(command.to_string(), Response::Output(output.to_string()));
    }

    pub fn fail(&self, command: &str, error: CommandError) {
        self.responses
            .borrow_mut()
            .insert(command.to_string(), Response::Error(error));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    /// Commands that would change the state of the cluster, including the failed ones.
    pub fn mutations(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter(|call| is_mutation(call))
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    fn run(&self, program: &str, args: &[&str]) -> CommandResult<String> {
        let command = format!("{program} {}", args.join(" "));
        self.calls.borrow_mut().push(command.clone());
        match self.responses.borrow().get(&command) {
            Some(response) => response.reply(),
            None if is_mutation(&command) => Ok(String::new()),
            None => Err(CommandError::Failed {
                code: 1,
                stderr: format!("unexpected command `{command}`"),
                stdout: String::new(),
            }),
        }
    }
}

fn is_mutation(command: &str) -> bool {
    ["qmgr create ", "qmgr set ", "qmgr delete ", "pbsnodes -o ", "pbsnodes -r "]
        .iter()
        .any(|prefix| command.starts_with(prefix))
}

impl PbsCommand for MockPbs {
    fn qstat(&self, args: &[&str]) -> CommandResult<String> {
        self.run("qstat", args)
    }

    fn qmgr(&self, args: &[&str]) -> CommandResult<String> {
        self.run("qmgr", args)
    }

    fn pbsnodes(&self, args: &[&str]) -> CommandResult<String> {
        self.run("pbsnodes", args)
    }
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
    #[builder(default, setter(custom))]
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
    keep_alive: bool,
    #[builder(default, setter(strip_option))]
    create_time: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    state_change_time: Option<DateTime<Utc>>,
    #[builder(default, setter(into, strip_option))]
    pbs_state: Option<String>,
    #[builder(default, setter(into, strip_option))]
    comment: Option<String>,
    #[builder(default, setter(custom))]
    running_jobs: Vec<String>,
    #[builder(default, setter(into, strip_option))]
    node_id: Option<String>,
    #[builder(default, setter(custom))]
    no_node_id: bool,
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

    /// Node that was never tagged with a node id, e.g. an on-premise host.
    pub fn no_node_id(mut self) -> Self {
        self.no_node_id = Some(true);
        self
    }

    /// Hostname equals the name. Joined nodes carry their node id as `ccnodeid`.
    pub fn build(self) -> Node {
        let config: TestNode = self.finish().unwrap();
        let resources = config.resources.into_iter().collect();
        let mut node = Node::new(config.name.clone(), resources);
        node.hostname = Some(config.name.clone());
        node.private_ip = Some("10.1.0.4".to_string());
        node.node_id = if config.no_node_id {
            None
        } else {
            Some(config.node_id.unwrap_or_else(|| format!("id-{}", config.name)))
        };
        node.nodearray = config.nodearray;
        node.vm_size = config.vm_size;
        node.placement_group = config.placement_group;
        node.status = config.status;
        node.managed = config.managed;
        node.joined = config.joined;
        node.keep_alive = config.keep_alive;
        node.create_time = config.create_time;
        node.metadata.last_state_change_time = config.state_change_time;
        node.metadata.pbs_state = config.pbs_state;
        node.metadata.comment = config.comment;
        if let (true, Some(id)) = (node.joined, node.node_id.clone()) {
            node.set_resource(CCNODEID, ResourceValue::Str(id));
        }
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
    #[builder(default, setter(custom))]
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
        let bucket_id = match &config.placement_group {
            Some(group) => format!("{}-{}-{group}", config.nodearray, config.vm_size),
            None => format!("{}-{}", config.nodearray, config.vm_size),
        };
        Bucket {
            bucket_id,
            nodearray: config.nodearray,
            vm_size: config.vm_size,
            placement_group: config.placement_group,
            available_count: config.available_count,
            resources: config.resources.into_iter().collect(),
        }
    }
}

/// In-memory cluster manager. Booted nodes join the inventory in the `Allocating` state
/// without a hostname, like freshly requested virtual machines.
pub struct FakeClusterManager {
    pub buckets: Vec<Bucket>,
    pub nodes: Vec<Node>,
    pub booted: Vec<String>,
    pub shut_down: Vec<String>,
    pub fail_bootup: bool,
    counter: u32,
}

impl FakeClusterManager {
    pub fn new(buckets: Vec<Bucket>) -> Self {
        FakeClusterManager {
            buckets,
            nodes: Vec::new(),
            booted: Vec::new(),
            shut_down: Vec::new(),
            fail_bootup: false,
            counter: 0,
        }
    }

    pub fn with_nodes(mut self, nodes: Vec<Node>) -> Self {
        self.nodes = nodes;
        self
    }
}

impl ClusterManager for FakeClusterManager {
    fn buckets(&self) -> scalelib::Result<Vec<Bucket>> {
        Ok(self.buckets.clone())
    }

    fn nodes(&self) -> scalelib::Result<Vec<Node>> {
        Ok(self.nodes.clone())
    }

    fn bootup(&mut self, requests: &[MachineRequest]) -> scalelib::Result<Vec<Node>> {
        if self.fail_bootup {
            return Err(scalelib::Error::ClusterError("quota exceeded".to_string()));
        }
        let mut started = Vec::new();
        for request in requests {
            let Some(bucket) = self.buckets.iter_mut().find(|bucket| {
                bucket.nodearray == request.nodearray
                    && bucket.vm_size == request.vm_size
                    && bucket.placement_group == request.placement_group
            }) else {
                return Err(scalelib::Error::ClusterError(format!(
                    "unknown machine type {request:?}"
                )));
            };
            for _ in 0..request.count {
                self.counter += 1;
                let mut node = bucket.new_node(format!("{}-{}", bucket.nodearray, self.counter));
                node.exists = true;
                node.node_id = Some(format!("id-{}", node.name));
                node.status = NodeStatus::Allocating;
                node.create_time = Some(test_now());
                bucket.available_count = bucket.available_count.saturating_sub(1);
                self.booted.push(node.name.clone());
                started.push(node.clone());
                self.nodes.push(node);
            }
        }
        Ok(started)
    }

    fn shutdown(&mut self, nodes: &[&Node]) -> scalelib::Result<Vec<String>> {
        let names: Set<&str> = nodes.iter().map(|node| node.name.as_str()).collect();
        let mut ids = Vec::new();
        self.nodes.retain(|node| {
            if names.contains(node.name.as_str()) {
                ids.push(node.node_id.clone().unwrap_or_else(|| node.name.clone()));
                false
            } else {
                true
            }
        });
        self.shut_down
            .extend(nodes.iter().map(|node| node.name.clone()));
        Ok(ids)
    }
}
