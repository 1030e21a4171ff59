use scalelib::Set;
use scalelib::job::Job;
use scalelib::node::Node;
use scalelib::shared::SharedPools;
use std::collections::BTreeMap;

use crate::autoscale::config::PbsproConfig;
use crate::pbs::command::PbsCommand;
use crate::pbs::jobs::{JobContext, read_jobs};
use crate::pbs::nodes::read_scheduler_nodes;
use crate::pbs::parser::PbsParser;
use crate::pbs::queue::{Queue, read_queues};
use crate::pbs::resource::{ResourceDefinitions, read_resource_definitions};
use crate::pbs::scheduler::{Scheduler, default_scheduler, read_schedulers};

/// Snapshot of the scheduler, read once at the beginning of a cycle.
pub struct PbsEnvironment {
    pub definitions: ResourceDefinitions,
    pub schedulers: Vec<Scheduler>,
    pub queues: BTreeMap<String, Queue>,
    /// Resources of the `resources:` line of the default scheduler's `sched_config`.
    pub resources_for_scheduling: Set<String>,
    pub jobs: Vec<Job>,
    pub scheduler_nodes: Vec<Node>,
    /// Arena with every shared resource record referenced by the schedulers and queues.
    pub pools: SharedPools,
}

impl PbsEnvironment {
    pub fn default_scheduler(&self) -> crate::Result<&Scheduler> {
        default_scheduler(&self.schedulers)
    }
}

pub fn read_environment(
    pbs: &dyn PbsCommand,
    config: &PbsproConfig,
    include_running: bool,
) -> crate::Result<PbsEnvironment> {
    let (definitions, _) = read_resource_definitions(pbs, config)?;
    let mut pools = SharedPools::default();
    let (schedulers, queues, resources_for_scheduling, scheduler_nodes, jobs) = {
        let parser = PbsParser::new(&definitions).with_dyn_res_dir(&config.server_dyn_res_dir);
        let schedulers = read_schedulers(pbs, &parser, &mut pools)?;
        let scheduler = default_scheduler(&schedulers)?;
        let resources_for_scheduling = scheduler.resources_for_scheduling.clone();
        let scheduler_shared = scheduler.resource_state.shared.clone();

        let queues = read_queues(
            pbs,
            &parser,
            &scheduler_shared,
            &mut pools,
            &config.ignore_queues,
        )?;
        let scheduler_nodes = read_scheduler_nodes(pbs, &parser, config)?;
        let jobs = read_jobs(
            pbs,
            &JobContext {
                parser: &parser,
                queues: &queues,
                resources_for_scheduling: &resources_for_scheduling,
                pools: &pools,
                include_running,
            },
        )?;
        (schedulers, queues, resources_for_scheduling, scheduler_nodes, jobs)
    };
    log::debug!(
        "Read {} queues, {} jobs and {} scheduler nodes",
        queues.len(),
        jobs.len(),
        scheduler_nodes.len()
    );

    Ok(PbsEnvironment {
        definitions,
        schedulers,
        queues,
        resources_for_scheduling,
        jobs,
        scheduler_nodes,
        pools,
    })
}
