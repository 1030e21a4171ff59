use chrono::{DateTime, Utc};
use regex::Regex;
use scalelib::bucket::Bucket;
use scalelib::node::Node;
use scalelib::resources::ResourceValue;
use scalelib::{Map, Set};
use std::time::Duration;

use crate::CCNODEID;
use crate::autoscale::config::{AutoscaleConfig, PbsproConfig};
use crate::common::error::PbsError;
use crate::pbs::command::{CommandResult, PbsCommand};
use crate::pbs::environment::{PbsEnvironment, read_environment};
use crate::pbs::resource::ResourceDefinitions;

/// Assignment given to nodes an administrator took offline with `azpbs offline`.
pub const KEEP_OFFLINE: &str = "keep_offline";

const COMMENT_OFFLINE: &str = "cyclecloud offline";
const COMMENT_JOINED: &str = "cyclecloud joined";
const COMMENT_RESTORED: &str = "cyclecloud restored";
const COMMENT_KEEP_OFFLINE: &str = "cyclecloud keep offline";

/// Translates autoscaler decisions into scheduler mutations.
///
/// Operations that mutate nodes return the subset that succeeded, either as indices into
/// the given slice or as node names. Failures are logged and retried in the next cycle.
pub trait SchedulerDriver {
    /// Makes sure the `ccnodeid` resource exists.
    fn initialize(&self) -> crate::Result<()>;

    fn read_environment(&self, include_running: bool) -> crate::Result<PbsEnvironment>;

    /// Adds the default resources to nodes and buckets, closes nodes that must not get
    /// new work.
    fn preprocess_nodes(
        &self,
        definitions: &ResourceDefinitions,
        nodes: &mut [Node],
        buckets: &mut [Bucket],
    );

    /// Removes scheduler nodes that do not correspond to a healthy cluster manager node.
    fn validate_nodes(&self, scheduler_nodes: &mut Vec<Node>, cluster_nodes: &[Node]);

    /// Closes down nodes and drains or deletes them. Returns the deleted nodes.
    fn handle_failed_nodes(&self, nodes: &mut [Node], now: DateTime<Utc>) -> Vec<usize>;

    /// Joins nodes to the scheduler. Returns the names of newly joined nodes.
    fn add_nodes_to_cluster(&self, definitions: &ResourceDefinitions, nodes: &[Node])
    -> Vec<String>;

    /// Takes idle nodes offline. Returns the nodes that may be shut down.
    fn handle_draining(&self, nodes: &mut [Node], candidates: &[usize]) -> Vec<usize>;

    /// Like [`SchedulerDriver::handle_draining`], but predicted assignments do not keep
    /// the node.
    fn handle_boot_timeout(&self, nodes: &mut [Node], candidates: &[usize]) -> Vec<usize>;

    /// Removes shut down nodes from the scheduler.
    fn handle_post_delete(&self, nodes: &[&Node]) -> Vec<String>;
}

pub struct PbsDriver<C> {
    pbs: C,
    pbspro: PbsproConfig,
    down_timeout: Duration,
    valid_hostnames: Vec<Regex>,
    read_only: bool,
}

impl<C: PbsCommand> PbsDriver<C> {
    pub fn new(pbs: C, config: &AutoscaleConfig) -> crate::Result<Self> {
        let valid_hostnames = config
            .valid_hostnames
            .iter()
            .map(|expr| Regex::new(expr))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PbsDriver {
            pbs,
            pbspro: config.pbspro.clone(),
            down_timeout: config.down_timeout,
            valid_hostnames,
            read_only: false,
        })
    }

    /// In read only mode the driver still queries the scheduler, but never changes it.
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn pbs(&self) -> &C {
        &self.pbs
    }

    fn qmgr_mut(&self, args: &[&str]) -> CommandResult<()> {
        if self.read_only {
            log::info!("Read only: skipping `qmgr -c \"{}\"`", args.join(" "));
            return Ok(());
        }
        self.pbs.qmgr(args).map(|_| ())
    }

    fn pbsnodes_mut(&self, args: &[&str]) -> CommandResult<()> {
        if self.read_only {
            log::info!("Read only: skipping `pbsnodes {}`", args.join(" "));
            return Ok(());
        }
        self.pbs.pbsnodes(args).map(|_| ())
    }

    /// Sets a comment and takes the hosts offline. The comment keeps them out of the
    /// autoscaler's reach until [`PbsDriver::set_online`] is called.
    pub fn set_offline(&self, hostnames: &[String], comment: Option<&str>) -> Vec<String> {
        let comment = match comment.filter(|c| !c.is_empty()) {
            Some(comment) => format!("{COMMENT_KEEP_OFFLINE}: {comment}"),
            None => COMMENT_KEEP_OFFLINE.to_string(),
        };
        self.set_state("-o", hostnames, &comment)
    }

    pub fn set_online(&self, hostnames: &[String], comment: Option<&str>) -> Vec<String> {
        let comment = match comment.filter(|c| !c.is_empty()) {
            Some(comment) => format!("{COMMENT_RESTORED}: {comment}"),
            None => COMMENT_RESTORED.to_string(),
        };
        self.set_state("-r", hostnames, &comment)
    }

    /// Returns the hostnames that failed.
    fn set_state(&self, flag: &str, hostnames: &[String], comment: &str) -> Vec<String> {
        let mut failed = Vec::new();
        for hostname in hostnames {
            if let Err(error) = self.pbsnodes_mut(&[flag, hostname, "-C", comment]) {
                log::error!("Could not run pbsnodes {flag} on {hostname}: {error}");
                failed.push(hostname.clone());
            }
        }
        failed
    }

    fn is_valid_hostname(&self, hostname: &str) -> bool {
        self.valid_hostnames.is_empty() || self.valid_hostnames.iter().any(|re| re.is_match(hostname))
    }

    fn down_long_enough(&self, node: &Node, now: DateTime<Utc>) -> bool {
        let Some(changed) = node.metadata.last_state_change_time else {
            return false;
        };
        let down_for = (now - changed).to_std().unwrap_or_default();
        if down_for > self.down_timeout {
            return true;
        }
        log::debug!(
            "Down node {} still has {} seconds before setting to offline",
            node.name,
            (self.down_timeout - down_for).as_secs()
        );
        false
    }

    fn drain(&self, nodes: &mut [Node], candidates: &[usize], ignore_assignments: bool) -> Vec<usize> {
        let mut deletable = Vec::new();
        for &idx in candidates {
            let node = &mut nodes[idx];
            let Some(hostname) = node.hostname.clone() else {
                log::info!("Node {} has no hostname. It is safe to delete.", node.name);
                deletable.push(idx);
                continue;
            };
            if !node.managed && !node.resources.contains_key(CCNODEID) {
                log::debug!("Ignoring attempt to drain unmanaged {}", node.name);
                continue;
            }

            if node.pbs_state().contains("offline") {
                if node.has_assignments() && !ignore_assignments {
                    log::info!("Node {} has jobs still running on it.", node.name);
                } else if node.metadata.running_job {
                    log::error!(
                        "Attempt to shutdown and remove {} while running job(s) {:?}",
                        node.name,
                        node.running_assignments
                    );
                } else {
                    deletable.push(idx);
                }
                continue;
            }

            match self.pbs.pbsnodes(&[&hostname]) {
                Ok(_) => {}
                Err(error) if error.is_not_found() => {
                    deletable.push(idx);
                    continue;
                }
                Err(error) => {
                    log::warn!("Unexpected failure while running 'pbsnodes {hostname}' - {error}");
                }
            }
            match self.pbsnodes_mut(&["-o", &hostname, "-C", COMMENT_OFFLINE]) {
                Ok(()) => {
                    node.metadata.marked_offline = true;
                    // pbsnodes -a reports the new state with a delay
                    node.metadata.pbs_state = Some("offline".to_string());
                }
                Err(error) => {
                    if node.private_ip.is_some() {
                        log::error!(
                            "'pbsnodes -o {hostname}' failed and this node will not be scaled down: {error}"
                        );
                    }
                }
            }
        }
        deletable
    }

    /// Joins a single node. Returns false if it already was a member of the cluster.
    fn join_node(
        &self,
        definitions: &ResourceDefinitions,
        node: &Node,
        hostname: &str,
        ccnodeid: &str,
    ) -> crate::Result<bool> {
        match self.pbs.qmgr_parsed(&["list", "node", hostname]) {
            Ok(records) => {
                if let Some(record) = records.first() {
                    if record
                        .get(&format!("resources_available.{CCNODEID}"))
                        .is_some_and(|id| !id.is_empty())
                    {
                        let comment = record.get("comment").unwrap_or_default();
                        let restorable = [COMMENT_OFFLINE, COMMENT_JOINED, COMMENT_RESTORED]
                            .iter()
                            .any(|prefix| comment.starts_with(prefix));
                        if record.get("state").unwrap_or_default().contains("offline") && restorable
                        {
                            log::info!("{hostname} is offline. Setting it back to online");
                            self.pbsnodes_mut(&["-r", hostname, "-C", COMMENT_RESTORED])?;
                        } else {
                            log::debug!("{CCNODEID} is already defined on {hostname}. Skipping");
                        }
                        return Ok(false);
                    }
                }
                log::info!("{hostname} already exists in this cluster. Setting resources.");
            }
            Err(PbsError::CommandError(_)) => {
                log::info!("{hostname} does not exist in this cluster yet. Creating.");
                self.qmgr_mut(&["create", "node", hostname])?;
            }
            Err(error) => return Err(error),
        }

        let mut resources: Vec<(&String, &ResourceValue)> = node.resources.iter().collect();
        resources.sort_unstable_by(|a, b| a.0.cmp(b.0));
        for (name, value) in resources {
            // ccnodeid is set last, a node is fully joined iff it has one
            if name == CCNODEID {
                continue;
            }
            if name == "group_id" && value.as_str() == Some("None") {
                continue;
            }
            let Some(def) = definitions.get(name) else {
                log::debug!("{name} is an unknown PBS resource for node {hostname}. Skipping this resource");
                continue;
            };
            // e.g. host, useful for packing planned nodes but not settable
            if def.read_only {
                continue;
            }
            let value = format_resource_value(value);
            self.qmgr_mut(&["set", "node", hostname, &format!("resources_available.{name}={value}")])?;
        }
        self.qmgr_mut(&[
            "set",
            "node",
            hostname,
            &format!("resources_available.{CCNODEID}={ccnodeid}"),
        ])?;
        self.pbsnodes_mut(&["-r", hostname, "-C", COMMENT_JOINED])?;
        Ok(true)
    }
}

/// PBS sizes do not support decimals and booleans are written as numbers.
fn format_resource_value(value: &ResourceValue) -> String {
    match value {
        ResourceValue::Size(size) => size.to_pbs_string(),
        ResourceValue::Bool(true) => "1".to_string(),
        ResourceValue::Bool(false) => "0".to_string(),
        other => other.to_string(),
    }
}

/// `group_id` and `ungrouped` let jobs select nodes by placement group.
fn default_resources(
    definitions: &ResourceDefinitions,
    placement_group: Option<&str>,
) -> Vec<(&'static str, ResourceValue)> {
    let group_id = placement_group.unwrap_or("_none_");
    let ungrouped = if placement_group.is_some() { "false" } else { "true" };
    [("group_id", group_id), ("ungrouped", ungrouped)]
        .into_iter()
        .map(|(name, raw)| {
            let value = definitions
                .parse_value(name, raw)
                .unwrap_or_else(|_| ResourceValue::from(raw));
            (name, value)
        })
        .collect()
}

impl<C: PbsCommand> SchedulerDriver for PbsDriver<C> {
    fn initialize(&self) -> crate::Result<()> {
        if self.pbs.qmgr(&["list", "resource", CCNODEID]).is_err() {
            log::info!("Creating the {CCNODEID} resource");
            self.qmgr_mut(&["create", "resource", CCNODEID, "type=string,", "flag=h"])?;
        }
        Ok(())
    }

    fn read_environment(&self, include_running: bool) -> crate::Result<PbsEnvironment> {
        read_environment(&self.pbs, &self.pbspro, include_running)
    }

    fn preprocess_nodes(
        &self,
        definitions: &ResourceDefinitions,
        nodes: &mut [Node],
        buckets: &mut [Bucket],
    ) {
        for bucket in buckets.iter_mut() {
            for (name, value) in default_resources(definitions, bucket.placement_group.as_deref()) {
                bucket.resources.entry(name.to_string()).or_insert(value);
            }
        }

        for node in nodes.iter_mut() {
            for (name, value) in default_resources(definitions, node.placement_group.as_deref()) {
                if !node.resources.contains_key(name) {
                    node.set_resource(name, value);
                }
            }
            if node.managed && !node.resources.contains_key(CCNODEID) {
                if let Some(node_id) = node.node_id.clone() {
                    node.set_resource(CCNODEID, ResourceValue::Str(node_id));
                }
            }

            if node.is_failed() {
                node.closed = true;
            }
            if node.hostname.is_none() {
                continue;
            }
            let keep_offline = node
                .metadata
                .comment
                .as_deref()
                .is_some_and(|comment| comment.starts_with(COMMENT_KEEP_OFFLINE));
            if node.joined && keep_offline {
                node.assign(KEEP_OFFLINE);
                node.closed = true;
            }
        }
    }

    fn validate_nodes(&self, scheduler_nodes: &mut Vec<Node>, cluster_nodes: &[Node]) {
        let by_node_id: Map<&str, &Node> = cluster_nodes
            .iter()
            .map(|node| (node.node_id.as_deref().unwrap_or(node.hostname_or_name()), node))
            .collect();

        let mut to_remove = Set::default();
        for snode in scheduler_nodes.iter() {
            let Some(ccnodeid) = snode.node_id.as_deref() else {
                continue;
            };
            let pbs_hostname = snode.hostname_or_name().to_lowercase();

            let remove = match by_node_id.get(ccnodeid) {
                None => {
                    log::warn!(
                        "{pbs_hostname} exists in the cluster but not in the cluster manager. Removing it."
                    );
                    true
                }
                Some(cc_node) if cc_node.is_failed() => {
                    log::warn!(
                        "{pbs_hostname} exists in the cluster but is in a Failed state. Removing it."
                    );
                    true
                }
                Some(cc_node) => {
                    let cc_hostname = cc_node.hostname_or_name().to_lowercase();
                    if cc_hostname == pbs_hostname {
                        false
                    } else {
                        log::warn!(
                            "The scheduler reports that node {} with node id {ccnodeid} has hostname {pbs_hostname}, but the cluster manager reports the hostname as {cc_hostname}",
                            cc_node.name
                        );
                        let state = snode.pbs_state();
                        if !state.contains("busy") && state.contains("down") {
                            log::warn!(
                                "Removing node {pbs_hostname} so that the correct hostname ({cc_hostname}) can join."
                            );
                            true
                        } else {
                            false
                        }
                    }
                }
            };
            if remove {
                self.handle_post_delete(&[snode]);
                to_remove.insert(snode.name.clone());
            }
        }
        scheduler_nodes.retain(|node| !to_remove.contains(&node.name));
    }

    fn handle_failed_nodes(&self, nodes: &mut [Node], now: DateTime<Utc>) -> Vec<usize> {
        let mut to_delete = Vec::new();
        let mut to_drain = Vec::new();

        for (idx, node) in nodes.iter_mut().enumerate() {
            if node.keep_alive || node.is_failed() {
                continue;
            }
            if !node.resources.contains_key(CCNODEID) {
                log::trace!("Attempting to delete {} but {CCNODEID} is not set yet.", node.name);
                continue;
            }
            let state = node.pbs_state().to_string();
            if !state.contains("down") {
                continue;
            }
            node.closed = true;
            if state.contains("state-unknown") {
                log::warn!("Node is in state-unknown - skipping scale down - {}", node.name);
                continue;
            }
            // no private ip means no dns entry, it is safe to remove
            if state.contains("offline") || node.private_ip.is_none() {
                to_delete.push(idx);
            } else if self.down_long_enough(node, now) {
                to_drain.push(idx);
            }
        }

        if !to_drain.is_empty() {
            log::info!("Draining down nodes: {}", node_names(nodes, &to_drain));
            self.handle_draining(nodes, &to_drain);
        }
        if to_delete.is_empty() {
            return Vec::new();
        }
        log::info!("Deleting down,offline nodes: {}", node_names(nodes, &to_delete));
        let refs: Vec<&Node> = to_delete.iter().map(|&idx| &nodes[idx]).collect();
        let deleted: Set<String> = self.handle_post_delete(&refs).into_iter().collect();
        to_delete
            .into_iter()
            .filter(|&idx| deleted.contains(&nodes[idx].name))
            .collect()
    }

    fn add_nodes_to_cluster(
        &self,
        definitions: &ResourceDefinitions,
        nodes: &[Node],
    ) -> Vec<String> {
        if let Err(error) = self.initialize() {
            log::error!("Could not initialize the scheduler: {error}");
        }
        let records = match self.pbs.pbsnodes_parsed(&["-a"]) {
            Ok(records) => records,
            Err(error) => {
                log::error!("Could not list the scheduler nodes, no nodes will join: {error}");
                return Vec::new();
            }
        };
        let mut by_ccnodeid: Map<String, Vec<String>> = Map::default();
        for record in &records {
            if let Some(id) = record.get(&format!("resources_available.{CCNODEID}")) {
                by_ccnodeid
                    .entry(id.to_string())
                    .or_default()
                    .push(record.name.clone());
            }
        }

        let mut joined = Vec::new();
        for node in nodes {
            if !node.exists || node.metadata.marked_offline {
                continue;
            }
            let (Some(hostname), Some(_)) = (node.hostname.as_deref(), node.private_ip.as_deref())
            else {
                continue;
            };
            if node.is_failed() || node.assignments.contains(KEEP_OFFLINE) {
                continue;
            }
            let Some(node_id) = node.node_id.as_deref() else {
                log::error!("{} does not have a nodeid! Skipping", node.name);
                continue;
            };
            if let Some(names) = by_ccnodeid.get(node_id) {
                if let Some(other) = names.iter().find(|name| !name.eq_ignore_ascii_case(hostname)) {
                    log::error!(
                        "Duplicate hostname found for the same node id! {hostname} and {other}. See 'valid_hostnames' in autoscale as a possible workaround."
                    );
                    continue;
                }
            }
            if !self.is_valid_hostname(hostname) {
                log::debug!("{hostname} is not a valid hostname. Skipping");
                continue;
            }
            let Some(ccnodeid) = node.resources.get(CCNODEID).map(|id| id.to_string()) else {
                log::info!(
                    "{} is not managed by the autoscaler, or at least '{CCNODEID}' is not defined. Ignoring",
                    node.name
                );
                continue;
            };

            match self.join_node(definitions, node, hostname, &ccnodeid) {
                Ok(true) => joined.push(node.name.clone()),
                Ok(false) => {}
                Err(error) => log::error!(
                    "Could not fully add {} to cluster: {error}. Will attempt next cycle",
                    node.name
                ),
            }
        }
        joined
    }

    fn handle_draining(&self, nodes: &mut [Node], candidates: &[usize]) -> Vec<usize> {
        self.drain(nodes, candidates, false)
    }

    fn handle_boot_timeout(&self, nodes: &mut [Node], candidates: &[usize]) -> Vec<usize> {
        self.drain(nodes, candidates, true)
    }

    fn handle_post_delete(&self, nodes: &[&Node]) -> Vec<String> {
        let mut deleted = Vec::new();
        for node in nodes {
            let Some(hostname) = node.hostname.as_deref() else {
                deleted.push(node.name.clone());
                continue;
            };
            match self.pbs.qmgr(&["list", "node", hostname]) {
                Ok(_) => {}
                Err(error) if error.is_not_found() || node.is_failed() => {
                    deleted.push(node.name.clone());
                    continue;
                }
                Err(error) => {
                    log::error!("Could not list node with hostname {hostname} - {error}");
                    continue;
                }
            }
            match self.qmgr_mut(&["delete", "node", hostname]) {
                Ok(()) => deleted.push(node.name.clone()),
                Err(error) => log::error!(
                    "Could not remove {} from cluster: {error}. Will retry next cycle.",
                    node.name
                ),
            }
        }
        deleted
    }
}

fn node_names(nodes: &[Node], indices: &[usize]) -> String {
    indices
        .iter()
        .map(|&idx| nodes[idx].name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
