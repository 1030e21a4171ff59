use std::path::PathBuf;

use clap::Parser;
use clap_complete::Shell;

use crate::client::output::outputs::Outputs;

#[derive(clap::ValueEnum, Clone)]
pub enum ColorPolicy {
    /// Use colors if the stdout is detected to be a terminal.
    Auto,
    /// Always use colors.
    Always,
    /// Never use colors.
    Never,
}

// Common CLI options
#[derive(Parser)]
pub struct CommonOpts {
    /// Path to the autoscaler configuration (JSON, or TOML with a `.toml` extension)
    #[arg(
        long,
        short = 'c',
        value_hint = clap::ValueHint::FilePath,
        global = true,
        env = "AZPBS_CONFIG",
        help_heading("GLOBAL OPTIONS")
    )]
    pub config: Option<PathBuf>,

    /// Sets console color policy
    #[arg(
        long,
        default_value_t = ColorPolicy::Auto,
        value_enum,
        global = true,
        help_heading("GLOBAL OPTIONS"),
        hide_short_help(true)
    )]
    pub colors: ColorPolicy,

    /// Sets output formatting
    #[arg(
        long,
        env = "AZPBS_OUTPUT_MODE",
        default_value_t = Outputs::CLI,
        value_enum,
        global = true,
        help_heading("GLOBAL OPTIONS"),
        hide_short_help(true)
    )]
    pub output_mode: Outputs,

    /// Enables more detailed log output
    #[arg(
        long,
        env = "AZPBS_DEBUG",
        global = true,
        help_heading("GLOBAL OPTIONS"),
        hide_short_help(true)
    )]
    pub debug: bool,

    /// Resources that are used for packing, but never written to the scheduler.
    /// Overrides `pbspro.read_only_resources` of the configuration.
    #[arg(
        long,
        value_delimiter(','),
        global = true,
        help_heading("GLOBAL OPTIONS"),
        hide_short_help(true)
    )]
    pub read_only_resources: Option<Vec<String>>,

    /// Queues whose jobs are not autoscaled.
    /// Overrides `pbspro.ignore_queues` of the configuration.
    #[arg(
        long,
        value_delimiter(','),
        global = true,
        help_heading("GLOBAL OPTIONS"),
        hide_short_help(true)
    )]
    pub ignore_queues: Option<Vec<String>>,
}

// Root CLI options
#[derive(Parser)]
#[command(
    name = "azpbs",
    author,
    about,
    version,
    disable_help_subcommand(true),
    help_expected(true)
)]
pub struct RootOptions {
    #[clap(flatten)]
    pub common: CommonOpts,

    #[clap(subcommand)]
    pub subcmd: SubCommand,
}

#[derive(Parser)]
pub enum SubCommand {
    /// Run one autoscale cycle: join ready nodes, start and stop machines
    Autoscale(AutoscaleOpts),
    /// Show the demand without changing the cluster
    Demand(DemandOpts),
    /// List the jobs as the autoscaler sees them
    Jobs,
    /// List the scheduler queues
    Queues,
    /// List the machine types the cluster manager can start
    Buckets,
    /// List the resource definitions of the scheduler
    Resources,
    /// Check that the scheduler is configured for autoscaling
    Validate,
    /// Take nodes offline and keep them out of the autoscaler's reach
    Offline(HostStateOpts),
    /// Bring nodes taken offline with `offline` back
    Online(HostStateOpts),
    /// Generate shell completion script
    GenerateCompletion(GenerateCompletionOpts),
}

#[derive(Parser)]
pub struct AutoscaleOpts {
    /// Compute and print the demand, but do not lock, start, stop or modify anything
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Parser)]
pub struct DemandOpts {
    /// Columns to print, defaults to `output_columns` of the configuration
    #[arg(long, short = 'o', value_delimiter(','))]
    pub output_columns: Option<Vec<String>>,
}

#[derive(Parser)]
pub struct HostStateOpts {
    /// Hostnames of the nodes
    #[arg(long = "hostname", short = 'H', required = true, num_args(1..))]
    pub hostnames: Vec<String>,

    /// Comment appended to the node's state comment
    #[arg(long, short = 'C')]
    pub comment: Option<String>,
}

#[derive(Parser)]
pub struct GenerateCompletionOpts {
    /// Shell flavour for which the completion script should be generated
    #[arg(value_enum)]
    pub shell: Shell,
}
