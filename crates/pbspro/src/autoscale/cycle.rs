use chrono::{DateTime, Utc};
use scalelib::cluster::ClusterManager;
use scalelib::demand::{DemandCalculator, DemandConfig, DemandResult};
use scalelib::node::Node;
use scalelib::{Map, Set};

use crate::autoscale::config::AutoscaleConfig;
use crate::autoscale::lock::SingletonLock;
use crate::pbs::driver::SchedulerDriver;
use crate::pbs::environment::PbsEnvironment;

/// Everything one autoscale cycle decided and did.
pub struct CycleReport {
    pub demand: DemandResult,
    /// Nodes that joined the scheduler in this cycle.
    pub joined: Vec<String>,
    /// Nodes returned by the cluster manager as started.
    pub booted: Vec<String>,
    /// Nodes that were shut down.
    pub deleted: Vec<String>,
    pub exit_code: i32,
}

/// Merges the cluster manager inventory with the scheduler's view, matching hostnames
/// case-insensitively. Scheduler nodes without a cluster manager counterpart are unmanaged.
pub fn merge_nodes(cluster_nodes: Vec<Node>, scheduler_nodes: Vec<Node>) -> Vec<Node> {
    let mut by_hostname: Map<String, usize> = Map::default();
    for (idx, node) in scheduler_nodes.iter().enumerate() {
        by_hostname
            .entry(node.hostname_or_name().to_lowercase())
            .or_insert(idx);
    }

    let mut scheduler_nodes: Vec<Option<Node>> = scheduler_nodes.into_iter().map(Some).collect();
    let mut merged = Vec::with_capacity(cluster_nodes.len() + scheduler_nodes.len());
    for mut node in cluster_nodes {
        node.managed = true;
        let scheduler_node = node
            .hostname
            .as_deref()
            .and_then(|hostname| by_hostname.get(&hostname.to_lowercase()))
            .and_then(|&idx| scheduler_nodes[idx].take());
        if let Some(scheduler_node) = scheduler_node {
            apply_scheduler_state(&mut node, scheduler_node);
        }
        merged.push(node);
    }
    merged.extend(scheduler_nodes.into_iter().flatten().map(|mut node| {
        node.managed = false;
        node
    }));
    merged
}

/// The scheduler is authoritative for resources, assignments and node state.
fn apply_scheduler_state(node: &mut Node, scheduler_node: Node) {
    node.resources.extend(scheduler_node.resources);
    let mut available = node.resources.clone();
    available.extend(scheduler_node.available);
    node.available = available;
    node.assignments = scheduler_node.assignments;
    node.running_assignments = scheduler_node.running_assignments;
    node.metadata = scheduler_node.metadata;
    node.joined = scheduler_node.joined;
    node.closed |= scheduler_node.closed;
    node.exclusive_owner = scheduler_node.exclusive_owner;
}

/// Builds the capacity of the cluster and matches every job of `env` against it.
pub fn calculate_demand(
    driver: &dyn SchedulerDriver,
    cluster: &dyn ClusterManager,
    env: &mut PbsEnvironment,
    config: &AutoscaleConfig,
) -> crate::Result<DemandCalculator> {
    let cluster_nodes = cluster.nodes()?;
    let mut buckets = cluster.buckets()?;

    driver.validate_nodes(&mut env.scheduler_nodes, &cluster_nodes);
    let mut nodes = merge_nodes(cluster_nodes, env.scheduler_nodes.clone());
    driver.preprocess_nodes(&env.definitions, &mut nodes, &mut buckets);

    let mut calculator = DemandCalculator::new(
        nodes,
        buckets,
        env.pools.clone(),
        DemandConfig {
            max_unmatched_jobs: config.max_unmatched_jobs,
        },
    );
    calculator.add_jobs(&env.jobs);
    Ok(calculator)
}

/// Runs one reconciliation cycle: joins ready nodes, requests new capacity, drains idle
/// and timed out nodes and shuts down the ones that are safe to remove.
///
/// With `dry_run` nothing is locked, started or stopped. The driver is expected to be in
/// read only mode as well.
pub fn autoscale_pbspro(
    driver: &dyn SchedulerDriver,
    cluster: &mut dyn ClusterManager,
    config: &AutoscaleConfig,
    dry_run: bool,
    now: DateTime<Utc>,
) -> crate::Result<CycleReport> {
    let _lock = match (&config.lock_file, dry_run) {
        (Some(path), false) => Some(SingletonLock::acquire(path)?),
        _ => {
            if dry_run {
                log::warn!("Running pbs autoscaler in dry run mode");
            }
            None
        }
    };
    let mut exit_code = 0;

    driver.initialize()?;
    let mut env = driver.read_environment(false)?;
    let calculator = calculate_demand(driver, cluster, &mut env, config)?;
    let mut demand = calculator.finish();

    driver.handle_failed_nodes(&mut demand.compute_nodes, now);

    let joined = driver.add_nodes_to_cluster(&env.definitions, &demand.compute_nodes);

    let mut booted = Vec::new();
    if !demand.requests.is_empty() {
        if config.start_enabled && !dry_run {
            match cluster.bootup(&demand.requests) {
                Ok(nodes) => {
                    booted = nodes.into_iter().map(|node| node.name).collect();
                    log::info!("Started nodes: {}", booted.join(", "));
                }
                Err(error) => {
                    exit_code = 1;
                    log::error!("Could not start new nodes, will retry on next iteration: {error}");
                }
            }
        } else {
            log::info!(
                "Not starting {} new node(s): start is disabled or this is a dry run",
                demand.new_nodes().count()
            );
        }
    }

    let unmatched = demand.find_unmatched_for(config.idle_timeout, now);
    let timed_out_booting = demand.find_booting(config.boot_timeout, now);

    let mut boot_deletable = Vec::new();
    if !timed_out_booting.is_empty() {
        log::info!(
            "The following nodes have timed out while booting: {}",
            node_names(&demand.compute_nodes, &timed_out_booting)
        );
        for &idx in &timed_out_booting {
            demand.compute_nodes[idx].clear_predicted_assignments();
        }
        boot_deletable = driver.handle_boot_timeout(&mut demand.compute_nodes, &timed_out_booting);
        for &idx in &timed_out_booting {
            demand.compute_nodes[idx].closed = true;
        }
    }

    let mut idle_deletable = Vec::new();
    if !unmatched.is_empty() {
        log::info!(
            "The following nodes have reached the idle_timeout ({}s): {}",
            config.idle_timeout.as_secs(),
            node_names(&demand.compute_nodes, &unmatched)
        );
        idle_deletable = driver.handle_draining(&mut demand.compute_nodes, &unmatched);
    }

    let mut seen = Set::default();
    let mut to_delete = Vec::new();
    for idx in boot_deletable.into_iter().chain(idle_deletable) {
        if !seen.insert(idx) {
            continue;
        }
        let node = &demand.compute_nodes[idx];
        if node.has_assignments() {
            log::warn!("{} has jobs assigned to it so we will take no action.", node.name);
            continue;
        }
        to_delete.push(idx);
    }

    let mut deleted = Vec::new();
    if !to_delete.is_empty() {
        if config.stop_enabled && !dry_run {
            log::info!("Deleting {}", node_names(&demand.compute_nodes, &to_delete));
            let nodes: Vec<&Node> = to_delete.iter().map(|&idx| &demand.compute_nodes[idx]).collect();
            match cluster.shutdown(&nodes) {
                Ok(ids) => {
                    let ids: Set<String> = ids.into_iter().collect();
                    let stopped: Vec<&Node> = nodes
                        .into_iter()
                        .filter(|node| {
                            ids.contains(&node.name)
                                || node.node_id.as_ref().is_some_and(|id| ids.contains(id))
                        })
                        .collect();
                    let removed = driver.handle_post_delete(&stopped);
                    if removed.len() < stopped.len() {
                        exit_code = 1;
                    }
                    deleted = stopped.iter().map(|node| node.name.clone()).collect();
                }
                Err(error) => {
                    exit_code = 1;
                    log::warn!("Deletion failed, will retry on next iteration: {error}");
                }
            }
        } else {
            log::info!(
                "Not deleting {}: stop is disabled or this is a dry run",
                node_names(&demand.compute_nodes, &to_delete)
            );
        }
    }

    Ok(CycleReport {
        demand,
        joined,
        booted,
        deleted,
        exit_code,
    })
}

fn node_names(nodes: &[Node], indices: &[usize]) -> String {
    indices
        .iter()
        .map(|&idx| nodes[idx].name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
