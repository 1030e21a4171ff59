use anyhow::Context;
use chrono::Utc;
use scalelib::cluster::ClusterManager;
use scalelib::demand::DemandResult;

use crate::autoscale::config::AutoscaleConfig;
use crate::autoscale::cycle::{autoscale_pbspro, calculate_demand};
use crate::client::globalsettings::GlobalSettings;
use crate::client::output::outputs::{DEFAULT_DEMAND_COLUMNS, DemandRow};
use crate::cluster::ExternalClusterManager;
use crate::common::cli::{AutoscaleOpts, DemandOpts, HostStateOpts};
use crate::pbs::command::PbsCli;
use crate::pbs::driver::{PbsDriver, SchedulerDriver};
use crate::pbs::environment::PbsEnvironment;

fn driver(config: &AutoscaleConfig, read_only: bool) -> anyhow::Result<PbsDriver<PbsCli>> {
    Ok(PbsDriver::new(PbsCli, config)?.with_read_only(read_only))
}

fn cluster_manager(config: &AutoscaleConfig) -> anyhow::Result<ExternalClusterManager> {
    Ok(ExternalClusterManager::new(&config.cluster)?)
}

fn read_environment(config: &AutoscaleConfig) -> anyhow::Result<PbsEnvironment> {
    driver(config, true)?
        .read_environment(false)
        .context("Could not read the state of the scheduler")
}

/// Columns given on the command line win over the configured ones.
pub fn resolve_columns(config: &AutoscaleConfig, requested: Option<Vec<String>>) -> Vec<String> {
    requested
        .filter(|columns| !columns.is_empty())
        .or_else(|| config.output_columns.clone())
        .unwrap_or_else(|| {
            DEFAULT_DEMAND_COLUMNS
                .iter()
                .map(|column| column.to_string())
                .collect()
        })
}

fn print_demand(gsettings: &GlobalSettings, demand: &DemandResult, columns: &[String]) {
    let now = Utc::now();
    let rows: Vec<DemandRow> = demand
        .compute_nodes
        .iter()
        .map(|node| DemandRow::new(node, gsettings.config(), now))
        .collect();
    gsettings.printer().print_demand(&rows, columns);
}

pub fn command_autoscale(gsettings: &GlobalSettings, opts: AutoscaleOpts) -> anyhow::Result<()> {
    let config = gsettings.config();
    let driver = driver(config, opts.dry_run)?;
    let mut cluster = cluster_manager(config)?;
    let report = autoscale_pbspro(&driver, &mut cluster, config, opts.dry_run, Utc::now())?;

    print_demand(gsettings, &report.demand, &resolve_columns(config, None));
    if !report.joined.is_empty() {
        log::info!("Joined nodes: {}", report.joined.join(", "));
    }
    if report.exit_code != 0 {
        anyhow::bail!("The autoscale cycle did not finish cleanly, see the log for details");
    }
    Ok(())
}

pub fn command_demand(gsettings: &GlobalSettings, opts: DemandOpts) -> anyhow::Result<()> {
    let config = gsettings.config();
    let driver = driver(config, true)?;
    let cluster = cluster_manager(config)?;
    let mut env = driver.read_environment(false)?;
    let demand = calculate_demand(&driver, &cluster, &mut env, config)?.finish();
    print_demand(gsettings, &demand, &resolve_columns(config, opts.output_columns));
    Ok(())
}

pub fn command_jobs(gsettings: &GlobalSettings) -> anyhow::Result<()> {
    let env = read_environment(gsettings.config())?;
    gsettings.printer().print_jobs(&env.jobs);
    Ok(())
}

pub fn command_queues(gsettings: &GlobalSettings) -> anyhow::Result<()> {
    let env = read_environment(gsettings.config())?;
    let queues: Vec<_> = env.queues.values().collect();
    gsettings.printer().print_queues(&queues);
    Ok(())
}

pub fn command_buckets(gsettings: &GlobalSettings) -> anyhow::Result<()> {
    let config = gsettings.config();
    let cluster = cluster_manager(config)?;
    let env = read_environment(config)?;
    let mut buckets = cluster.buckets()?;
    driver(config, true)?.preprocess_nodes(&env.definitions, &mut [], &mut buckets);
    gsettings.printer().print_buckets(&buckets);
    Ok(())
}

pub fn command_resources(gsettings: &GlobalSettings) -> anyhow::Result<()> {
    let env = read_environment(gsettings.config())?;
    gsettings.printer().print_resources(&env.definitions.sorted());
    Ok(())
}

/// Prints every scheduler setting that breaks autoscaling to stderr.
pub fn command_validate(gsettings: &GlobalSettings) -> anyhow::Result<()> {
    let env = read_environment(gsettings.config())?;
    let problems = env.default_scheduler()?.compatibility_problems();
    for problem in &problems {
        eprintln!("{problem}");
    }
    if !problems.is_empty() {
        anyhow::bail!(
            "Found {} problem(s) with the scheduler configuration",
            problems.len()
        );
    }
    log::info!("The scheduler is configured correctly");
    Ok(())
}

pub fn command_offline(gsettings: &GlobalSettings, opts: HostStateOpts) -> anyhow::Result<()> {
    let driver = driver(gsettings.config(), false)?;
    let failed = driver.set_offline(&opts.hostnames, opts.comment.as_deref());
    report_host_states(gsettings, &opts.hostnames, &failed, "offline")
}

pub fn command_online(gsettings: &GlobalSettings, opts: HostStateOpts) -> anyhow::Result<()> {
    let driver = driver(gsettings.config(), false)?;
    let failed = driver.set_online(&opts.hostnames, opts.comment.as_deref());
    report_host_states(gsettings, &opts.hostnames, &failed, "online")
}

fn report_host_states(
    gsettings: &GlobalSettings,
    hostnames: &[String],
    failed: &[String],
    state: &str,
) -> anyhow::Result<()> {
    gsettings
        .printer()
        .print_host_states(hostnames, failed, state);
    if !failed.is_empty() {
        anyhow::bail!("Could not set {} host(s) {state}", failed.len());
    }
    Ok(())
}
