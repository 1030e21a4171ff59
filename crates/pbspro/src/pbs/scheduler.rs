use scalelib::shared::SharedPools;
use scalelib::{Map, Set};
use serde::Serialize;
use std::path::Path;

use crate::common::error::PbsError;
use crate::pbs::command::PbsCommand;
use crate::pbs::parser::{PbsParser, PbsRecord, ResourceState, parse_resources_from_sched_config};
use crate::pbs::resource::parse_boolean;

const ACTIVE_STATES: [&str; 3] = ["idle", "hot_start", "scheduling"];

#[derive(Debug, Clone, Serialize)]
pub struct Scheduler {
    pub name: String,
    /// Short hostname of `sched_host`.
    pub hostname: String,
    pub state: String,
    pub scheduling: bool,
    pub do_not_span_psets: bool,
    pub only_explicit_psets: bool,
    pub node_group_enable: bool,
    pub node_group_key: Option<String>,
    pub sched_log: String,
    pub sched_priv: String,
    pub pbs_version: String,
    /// Resources listed on the `resources:` line of `sched_config`.
    pub resources_for_scheduling: Set<String>,
    #[serde(skip)]
    pub resource_state: ResourceState,
}

impl Scheduler {
    pub fn is_active(&self) -> bool {
        ACTIVE_STATES.contains(&self.state.to_lowercase().as_str())
    }

    pub fn is_default(&self) -> bool {
        self.name == "default"
    }

    /// Settings the autoscaler relies on that are missing from this scheduler.
    pub fn compatibility_problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for resource in ["ungrouped", "group_id"] {
            if !self.resources_for_scheduling.contains(resource) {
                problems.push(format!(
                    "{resource} is not defined for line 'resources:' in {}/sched_config. Please add this and restart PBS",
                    self.sched_priv
                ));
            }
        }
        match &self.node_group_key {
            Some(key) if !self.node_group_enable => problems.push(format!(
                "node_group_key is set to '{key}' but node_group_enable is false"
            )),
            None if !self.node_group_enable => problems.push(
                "node_group_enable is false, so MPI/parallel jobs may not work if multiple placement groups are created."
                    .to_string(),
            ),
            _ => {}
        }
        if !self.only_explicit_psets {
            problems.push(
                "only_explicit_psets should be set to true in your sched_config if you are using MPI or colocated jobs."
                    .to_string(),
            );
        }
        if !self.do_not_span_psets {
            problems.push(
                "do_not_span_psets should be set to true in your sched_config if you are using MPI or colocated jobs."
                    .to_string(),
            );
        }
        problems
    }
}

fn parse_flag(record: &PbsRecord, key: &str) -> crate::Result<bool> {
    parse_boolean(record.get(key).unwrap_or("false"))
}

/// `record` is a scheduler record already merged with its server's attributes.
pub fn parse_scheduler(
    record: &PbsRecord,
    parser: &PbsParser,
    pools: &mut SharedPools,
) -> crate::Result<Scheduler> {
    let sched_priv = record.require("sched_priv")?.to_string();
    let sched_config = Path::new(&sched_priv).join("sched_config");
    let resources_for_scheduling = parse_resources_from_sched_config(&sched_config)?;
    let sched_host = record.require("sched_host")?;

    let scheduler = Scheduler {
        name: record.name.clone(),
        hostname: sched_host.split('.').next().unwrap_or(sched_host).to_string(),
        state: record.require("state")?.to_string(),
        scheduling: parse_boolean(record.require("scheduling")?)?,
        do_not_span_psets: parse_flag(record, "do_not_span_psets")?,
        only_explicit_psets: parse_flag(record, "only_explicit_psets")?,
        node_group_enable: parse_flag(record, "node_group_enable")?,
        node_group_key: record.get("node_group_key").map(|key| key.to_string()),
        sched_log: record.get("sched_log").unwrap_or_default().to_string(),
        sched_priv,
        pbs_version: record.get("pbs_version").unwrap_or_default().to_string(),
        resources_for_scheduling,
        // a scheduler has no parent shared resources
        resource_state: parser.parse_resource_state(record, None, pools)?,
    };

    if !scheduler.only_explicit_psets {
        log::error!(
            "only_explicit_psets must be set to true. You can change this by running: qmgr -c \"set sched default only_explicit_psets = true\""
        );
    }
    Ok(scheduler)
}

/// Merges server attributes into the scheduler records running on the same host.
/// Keys the scheduler already defines are kept.
pub fn merge_server_records(schedulers: &mut [PbsRecord], servers: &[PbsRecord]) {
    let by_host: Map<&str, &PbsRecord> = servers
        .iter()
        .filter_map(|server| server.get("server_host").map(|host| (host, server)))
        .collect();
    for scheduler in schedulers {
        let Some(server) = scheduler.get("sched_host").and_then(|host| by_host.get(host)) else {
            continue;
        };
        for (key, value) in &server.attributes {
            if !scheduler.attributes.contains_key(key) {
                scheduler.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Reads all schedulers together with the attributes of their servers.
pub fn read_schedulers(
    pbs: &dyn PbsCommand,
    parser: &PbsParser,
    pools: &mut SharedPools,
) -> crate::Result<Vec<Scheduler>> {
    let mut sched_records = pbs.qmgr_parsed(&["list", "sched"])?;
    let server_records = pbs.qmgr_parsed(&["list", "server"])?;
    merge_server_records(&mut sched_records, &server_records);

    sched_records
        .iter()
        .map(|record| parse_scheduler(record, parser, pools))
        .collect()
}

/// The active scheduler named `default`.
pub fn default_scheduler(schedulers: &[Scheduler]) -> crate::Result<&Scheduler> {
    schedulers
        .iter()
        .find(|s| s.is_active() && s.is_default())
        .ok_or_else(|| PbsError::ConfigurationError("No default scheduler found".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::utils::{definitions, record, sched_priv_dir};

    fn sched_record(sched_priv: &str, state: &str) -> PbsRecord {
        record(
            "Sched",
            "default",
            &[
                ("sched_host", "scheduler.internal"),
                ("sched_priv", sched_priv),
                ("sched_log", "/var/spool/pbs/sched_logs"),
                ("scheduling", "True"),
                ("state", state),
                ("only_explicit_psets", "True"),
                ("pbs_version", "20.0.1"),
            ],
        )
    }

    #[test]
    fn test_parse_scheduler() {
        let dir = sched_priv_dir("ncpus, mem, slot_type, group_id, ungrouped");
        let defs = definitions();
        let parser = PbsParser::new(&defs);
        let mut pools = SharedPools::default();
        let rec = sched_record(dir.path().to_str().unwrap(), "Idle");
        let scheduler = parse_scheduler(&rec, &parser, &mut pools).unwrap();
        assert_eq!(scheduler.hostname, "scheduler");
        assert!(scheduler.is_active());
        assert!(scheduler.is_default());
        assert!(scheduler.scheduling);
        assert!(scheduler.only_explicit_psets);
        assert!(!scheduler.do_not_span_psets);
        assert!(scheduler.resources_for_scheduling.contains("group_id"));
        assert_eq!(scheduler.pbs_version, "20.0.1");
    }

    #[test]
    fn test_inactive_scheduler() {
        let dir = sched_priv_dir("ncpus");
        let defs = definitions();
        let parser = PbsParser::new(&defs);
        let mut pools = SharedPools::default();
        let rec = sched_record(dir.path().to_str().unwrap(), "Terminating");
        let scheduler = parse_scheduler(&rec, &parser, &mut pools).unwrap();
        assert!(!scheduler.is_active());
        let schedulers = vec![scheduler];
        let error = default_scheduler(&schedulers).unwrap_err();
        insta::assert_snapshot!(error.to_string(), @"Configuration error: No default scheduler found");
    }

    #[test]
    fn test_compatibility_problems() {
        let dir = sched_priv_dir("ncpus, group_id");
        let defs = definitions();
        let parser = PbsParser::new(&defs);
        let mut pools = SharedPools::default();
        let rec = sched_record(dir.path().to_str().unwrap(), "Idle");
        let mut scheduler = parse_scheduler(&rec, &parser, &mut pools).unwrap();
        scheduler.sched_priv = "/var/spool/pbs/sched_priv".to_string();
        insta::assert_snapshot!(scheduler.compatibility_problems().join("\n"), @r###"
        ungrouped is not defined for line 'resources:' in /var/spool/pbs/sched_priv/sched_config. Please add this and restart PBS
        node_group_enable is false, so MPI/parallel jobs may not work if multiple placement groups are created.
        do_not_span_psets should be set to true in your sched_config if you are using MPI or colocated jobs.
        "###);

        scheduler.resources_for_scheduling.insert("ungrouped".to_string());
        scheduler.node_group_key = Some("group_id".to_string());
        scheduler.node_group_enable = true;
        scheduler.do_not_span_psets = true;
        assert!(scheduler.compatibility_problems().is_empty());
    }

    #[test]
    fn test_merge_server_records() {
        let mut schedulers = vec![record(
            "Sched",
            "default",
            &[("sched_host", "pbs"), ("scheduling", "True")],
        )];
        let servers = vec![
            record(
                "Server",
                "pbs",
                &[
                    ("server_host", "pbs"),
                    ("scheduling", "False"),
                    ("resources_available.licenses", "4"),
                ],
            ),
            record(
                "Server",
                "other",
                &[("server_host", "other"), ("default_queue", "x")],
            ),
        ];
        merge_server_records(&mut schedulers, &servers);
        assert_eq!(schedulers[0].get("scheduling"), Some("True"));
        assert_eq!(schedulers[0].get("resources_available.licenses"), Some("4"));
        assert_eq!(schedulers[0].get("default_queue"), None);
    }
}
