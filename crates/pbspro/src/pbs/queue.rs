use scalelib::constraints::Constraint;
use scalelib::resources::{ResourceMap, ResourceValue};
use scalelib::shared::{SharedPools, SharedResources};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::common::error::PbsError;
use crate::pbs::command::PbsCommand;
use crate::pbs::parser::{
    Limit, PbsParser, PbsRecord, ResourceState, StateCounts, parse_limit_expression,
    parse_state_counts,
};
use crate::pbs::resource::ResourceDefinitions;

#[derive(Debug, Clone, Serialize)]
pub struct Queue {
    pub name: String,
    pub queue_type: String,
    pub node_group_key: Option<String>,
    pub node_group_enable: bool,
    pub total_jobs: u32,
    pub state_count: StateCounts,
    pub resources_default: ResourceMap,
    pub default_chunk: ResourceMap,
    #[serde(skip)]
    pub resource_state: ResourceState,
    pub max_run: Option<Limit>,
    pub max_queued: Option<Limit>,
    /// False also for queues listed in `pbspro.ignore_queues`.
    pub enabled: bool,
    pub started: bool,
}

impl Queue {
    /// Without a `node_group_key` jobs of this queue are placed into a single placement group.
    pub fn uses_placement(&self) -> bool {
        self.node_group_key.as_deref().is_none_or(str::is_empty)
    }

    pub fn transit(&self) -> u32 {
        self.state_count.transit
    }

    pub fn queued(&self) -> u32 {
        self.state_count.queued
    }

    pub fn held(&self) -> u32 {
        self.state_count.held
    }

    pub fn waiting(&self) -> u32 {
        self.state_count.waiting
    }

    pub fn running(&self) -> u32 {
        self.state_count.running
    }

    pub fn exiting(&self) -> u32 {
        self.state_count.exiting
    }

    pub fn begun(&self) -> u32 {
        self.state_count.begun
    }

    /// Constraints for the queue and server level resources a job requests.
    ///
    /// Consumable requests are split evenly between the `node_count` nodes of the job.
    pub fn get_non_host_constraints(
        &self,
        definitions: &ResourceDefinitions,
        resources: &[(String, ResourceValue)],
        node_count: u32,
        pools: &SharedPools,
    ) -> crate::Result<Vec<Constraint>> {
        let mut constraints = Vec::new();
        for (name, value) in resources {
            match definitions.get(name) {
                Some(def) if !def.is_host() => {}
                _ => continue,
            }
            let ids = match self.resource_state.shared.get(name) {
                Some(ids) if !ids.is_empty() => ids,
                _ => {
                    return Err(PbsError::ConfigurationError(format!(
                        "Undefined resource {name}. Is this a misconfigured server_dyn_res?"
                    )));
                }
            };
            if pools.get(ids[0]).is_consumable() {
                constraints.push(Constraint::SharedConsumable {
                    pools: ids.clone(),
                    amount: value.divide(node_count.max(1) as i64),
                });
            } else {
                constraints.push(Constraint::SharedNonConsumable {
                    pool: ids[0],
                    value: value.clone(),
                });
            }
        }
        Ok(constraints)
    }
}

/// Reads queue names from `qstat -Q`.
pub fn list_queue_names(pbs: &dyn PbsCommand) -> crate::Result<Vec<String>> {
    let output = pbs.qstat(&["-Q"])?;
    Ok(output
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("---"))
        .filter_map(|line| line.split_whitespace().next())
        .map(|name| name.to_string())
        .collect())
}

fn is_true(record: &PbsRecord, key: &str) -> bool {
    record
        .get(key)
        .is_some_and(|value| value.eq_ignore_ascii_case("true"))
}

fn parse_limit(record: &PbsRecord, key: &str) -> crate::Result<Option<Limit>> {
    record.get(key).map(parse_limit_expression).transpose()
}

pub fn parse_queue(
    record: &PbsRecord,
    parser: &PbsParser,
    scheduler_shared: &SharedResources,
    pools: &mut SharedPools,
    ignore_queues: &[String],
) -> crate::Result<Queue> {
    let state_count = match record.get("state_count") {
        Some(expr) => parse_state_counts(expr)?,
        None => StateCounts::default(),
    };
    let total_jobs = record
        .get("total_jobs")
        .unwrap_or("0")
        .parse::<u32>()
        .map_err(|_| {
            PbsError::ResourceParsingError(format!("Invalid total_jobs of {}", record.source()))
        })?;
    let resource_state = parser.parse_resource_state(record, Some(scheduler_shared), pools)?;

    Ok(Queue {
        name: record.name.clone(),
        queue_type: record.get("queue_type").unwrap_or_default().to_string(),
        node_group_key: record.get("node_group_key").map(|key| key.to_string()),
        node_group_enable: is_true(record, "node_group_enable"),
        total_jobs,
        state_count,
        resources_default: parser.parse_resources_default(record)?,
        default_chunk: parser.parse_default_chunk(record)?,
        resource_state,
        max_run: parse_limit(record, "max_run")?,
        max_queued: parse_limit(record, "max_queued")?,
        enabled: is_true(record, "enabled") && !ignore_queues.contains(&record.name),
        started: is_true(record, "started"),
    })
}

/// Reads all queues. Queue level shared resources are stacked on top of `scheduler_shared`.
pub fn read_queues(
    pbs: &dyn PbsCommand,
    parser: &PbsParser,
    scheduler_shared: &SharedResources,
    pools: &mut SharedPools,
    ignore_queues: &[String],
) -> crate::Result<BTreeMap<String, Queue>> {
    let names = list_queue_names(pbs)?;
    if names.is_empty() {
        return Ok(BTreeMap::new());
    }
    let joined = names.join(",");
    let records = pbs.qmgr_parsed(&["list", "queue", &joined])?;

    let mut queues = BTreeMap::new();
    for record in &records {
        let queue = parse_queue(record, parser, scheduler_shared, pools, ignore_queues)?;
        queues.insert(queue.name.clone(), queue);
    }
    Ok(queues)
}
