use std::io;
use std::io::IsTerminal;

use clap::{CommandFactory, FromArgMatches};
use clap_complete::generate;
use cli_table::ColorChoice;

use pbspro::autoscale::config::AutoscaleConfig;
use pbspro::client::commands::{
    command_autoscale, command_buckets, command_demand, command_jobs, command_offline,
    command_online, command_queues, command_resources, command_validate,
};
use pbspro::client::globalsettings::GlobalSettings;
use pbspro::client::output::cli::CliOutput;
use pbspro::client::output::json::JsonOutput;
use pbspro::client::output::outputs::{Output, Outputs};
use pbspro::client::output::quiet::Quiet;
use pbspro::common::cli::{ColorPolicy, CommonOpts, GenerateCompletionOpts, RootOptions, SubCommand};
use pbspro::common::setup::setup_logging;

fn make_printer(opts: &CommonOpts) -> Box<dyn Output> {
    let color_policy = match opts.colors {
        ColorPolicy::Always => ColorChoice::AlwaysAnsi,
        ColorPolicy::Auto => {
            if io::stdout().is_terminal() {
                ColorChoice::Auto
            } else {
                ColorChoice::Never
            }
        }
        ColorPolicy::Never => ColorChoice::Never,
    };

    match opts.output_mode {
        Outputs::CLI => {
            // Set colored public for CLI
            match color_policy {
                ColorChoice::Always | ColorChoice::AlwaysAnsi => {
                    colored::control::set_override(true)
                }
                ColorChoice::Never => colored::control::set_override(false),
                _ => {}
            }

            Box::new(CliOutput::new(color_policy))
        }
        Outputs::JSON => Box::<JsonOutput>::default(),
        Outputs::Quiet => Box::<Quiet>::default(),
    }
}

fn load_config(opts: CommonOpts) -> pbspro::Result<AutoscaleConfig> {
    let mut config = match &opts.config {
        Some(path) => AutoscaleConfig::load(path)?,
        None => {
            log::debug!("No configuration file given, using defaults");
            AutoscaleConfig::default()
        }
    };
    if let Some(resources) = opts.read_only_resources {
        config.pbspro.read_only_resources = resources;
    }
    if let Some(queues) = opts.ignore_queues {
        config.pbspro.ignore_queues = queues;
    }
    Ok(config)
}

fn generate_completion(opts: GenerateCompletionOpts) -> anyhow::Result<()> {
    let generator = opts.shell;

    let mut app = RootOptions::command();
    eprintln!("Generating completion file for {generator}...");
    generate(generator, &mut app, "azpbs".to_string(), &mut io::stdout());
    Ok(())
}

fn main() -> pbspro::Result<()> {
    let matches = RootOptions::command().get_matches();
    let top_opts = match RootOptions::from_arg_matches(&matches) {
        Ok(opts) => opts,
        Err(error) => error.exit(),
    };

    setup_logging(top_opts.common.debug);

    let printer = make_printer(&top_opts.common);
    let config = match load_config(top_opts.common) {
        Ok(config) => config,
        Err(error) => {
            printer.print_error(error.into());
            std::process::exit(1);
        }
    };
    let gsettings = GlobalSettings::new(config, printer);

    let result = match top_opts.subcmd {
        SubCommand::Autoscale(opts) => command_autoscale(&gsettings, opts),
        SubCommand::Demand(opts) => command_demand(&gsettings, opts),
        SubCommand::Jobs => command_jobs(&gsettings),
        SubCommand::Queues => command_queues(&gsettings),
        SubCommand::Buckets => command_buckets(&gsettings),
        SubCommand::Resources => command_resources(&gsettings),
        SubCommand::Validate => command_validate(&gsettings),
        SubCommand::Offline(opts) => command_offline(&gsettings, opts),
        SubCommand::Online(opts) => command_online(&gsettings, opts),
        SubCommand::GenerateCompletion(opts) => generate_completion(opts),
    };

    if let Err(e) = result {
        gsettings.printer().print_error(e);
        std::process::exit(1);
    }

    Ok(())
}
