use regex::Regex;
use scalelib::node::Node;

use crate::CCNODEID;
use crate::autoscale::config::PbsproConfig;
use crate::common::timeutils::parse_pbs_timestamp;
use crate::pbs::command::PbsCommand;
use crate::pbs::parser::{PbsParser, PbsRecord};

/// Converts one `pbsnodes -a` record into a node.
///
/// Only host resources are kept. Consumables already assigned to running jobs are
/// subtracted from `available`.
pub fn parse_scheduler_node(record: &PbsRecord, parser: &PbsParser) -> crate::Result<Node> {
    let hostname = record.name.clone();
    let resources = parser.parse_prefix("resources_available", record, Some(true))?;
    let assigned = parser.parse_resources_assigned(record, Some(true))?;

    let mut node = Node::new(hostname.clone(), resources);
    node.hostname = Some(hostname);
    node.joined = node.resources.contains_key(CCNODEID);
    node.node_id = node
        .resources
        .get(CCNODEID)
        .and_then(|value| value.as_str())
        .filter(|id| !id.is_empty())
        .map(|id| id.to_string());

    let jobs_expr = record.get("jobs").unwrap_or_default();
    let mut state = record.get("state").unwrap_or_default().to_string();
    if state == "free" && !jobs_expr.trim().is_empty() {
        state = "partially-free".to_string();
    }
    node.metadata.pbs_state = Some(state);

    node.metadata.last_state_change_time = match record.get("last_state_change_time") {
        Some(value) => match parse_pbs_timestamp(value) {
            Ok(time) => Some(time),
            Err(error) => {
                log::debug!("Invalid last_state_change_time of {}: {error}", node.name);
                None
            }
        },
        None => None,
    };

    // e.g. `17.pbsserver/0, 17.pbsserver/1, 18[2].pbsserver/0`
    for token in jobs_expr.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let long_id = token.rsplit_once('/').map_or(token, |(id, _)| id);
        let short_id = long_id.split_once('.').map_or(long_id, |(id, _)| id);
        node.bind_running(short_id);
        if !node.metadata.long_job_ids.iter().any(|id| id == long_id) {
            node.metadata.long_job_ids.push(long_id.to_string());
        }
    }

    let mut assigned: Vec<_> = assigned.into_iter().collect();
    assigned.sort_unstable_by(|a, b| a.0.cmp(&b.0));
    for (name, value) in assigned {
        let Some(def) = parser.definitions().get(&name) else {
            continue;
        };
        if !def.is_consumable() {
            continue;
        }
        match node.available.get(&name).and_then(|left| left.minus(&value)) {
            Some(left) => {
                node.available.insert(name, left);
            }
            None => {
                log::warn!(
                    "{name} was not defined under resources_available, but was defined under resources_assigned for {}. Setting available to assigned.",
                    node.name
                );
                node.available.insert(name, value);
            }
        }
    }

    if node.pbs_state().contains("exclusive") {
        node.closed = true;
    }
    node.metadata.comment = record.get("comment").map(|c| c.to_string());
    Ok(node)
}

fn compile_ignore_re(config: &PbsproConfig) -> Option<Regex> {
    let expr = config.ignore_hostnames_re.as_deref()?;
    // match at the beginning of the hostname only
    match Regex::new(&format!("^(?:{expr})")) {
        Ok(re) => Some(re),
        Err(error) => {
            log::error!("Could not parse {expr} as a regular expression: {error}");
            None
        }
    }
}

/// Reads the nodes as the scheduler sees them, including assigned resources and the jobs
/// running on them.
pub fn read_scheduler_nodes(
    pbs: &dyn PbsCommand,
    parser: &PbsParser,
    config: &PbsproConfig,
) -> crate::Result<Vec<Node>> {
    let ignore_re = compile_ignore_re(config);
    let mut ignored = Vec::new();
    let mut nodes = Vec::new();

    for record in pbs.pbsnodes_parsed(&["-a"])? {
        if ignore_re.as_ref().is_some_and(|re| re.is_match(&record.name)) {
            ignored.push(record.name);
            continue;
        }
        let has_ccnodeid = record
            .get(&format!("resources_available.{CCNODEID}"))
            .is_some_and(|id| !id.is_empty());
        if config.ignore_onprem && has_ccnodeid {
            ignored.push(record.name);
            continue;
        }

        let node = parse_scheduler_node(&record, parser)?;
        if !has_ccnodeid {
            log::debug!(
                "'{CCNODEID}' is not defined so {} has not been joined to the cluster by the autoscaler yet or this is not a managed node",
                node.name
            );
        }
        nodes.push(node);
    }

    if !ignored.is_empty() {
        let shown = ignored.iter().take(5).cloned().collect::<Vec<_>>().join(",");
        log::info!(
            "Ignored {} hostnames. {shown}{}",
            ignored.len(),
            if ignored.len() > 5 { "..." } else { "" }
        );
    }
    Ok(nodes)
}
