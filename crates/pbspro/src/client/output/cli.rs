use cli_table::format::{Justify, Separator};
use cli_table::{Cell, CellStruct, Color, ColorChoice, Style, Table, TableStruct, print_stdout};
use colored::Colorize;
use itertools::Itertools;
use scalelib::bucket::Bucket;
use scalelib::job::Job;

use crate::client::output::outputs::{DemandRow, Output};
use crate::pbs::queue::Queue;
use crate::pbs::resource::ResourceDefinition;

pub struct CliOutput {
    color_policy: ColorChoice,
}

impl CliOutput {
    pub fn new(color_policy: ColorChoice) -> CliOutput {
        CliOutput { color_policy }
    }

    fn horizontal_table(rows: Vec<Vec<CellStruct>>, header: Vec<CellStruct>) -> TableStruct {
        rows.table()
            .separator(
                Separator::builder()
                    .title(Some(Default::default()))
                    .column(Some(Default::default()))
                    .build(),
            )
            .title(header)
    }

    fn print_horizontal_table(&self, rows: Vec<Vec<CellStruct>>, header: Vec<CellStruct>) {
        self.print_table(Self::horizontal_table(rows, header));
    }

    fn print_table(&self, table: TableStruct) {
        let table = table.color_choice(self.color_policy);
        if let Err(e) = print_stdout(table) {
            log::error!("Cannot print table to stdout: {e:?}");
        }
    }
}

fn header(names: &[&str]) -> Vec<CellStruct> {
    names.iter().map(|name| name.cell().bold(true)).collect()
}

fn demand_table(rows: &[DemandRow], columns: &[String]) -> TableStruct {
    let body = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|column| {
                    let value = row.column(column);
                    match column.as_str() {
                        "required" if value == "true" => {
                            value.cell().foreground_color(Some(Color::Green))
                        }
                        "exists" if value == "false" => {
                            value.cell().foreground_color(Some(Color::Yellow))
                        }
                        "create_time_remaining" | "idle_time_remaining" | "slots"
                        | "vcpu_count" => value.cell().justify(Justify::Right),
                        _ => value.cell(),
                    }
                })
                .collect()
        })
        .collect();
    let title = columns.iter().map(|column| column.as_str()).collect_vec();
    CliOutput::horizontal_table(body, header(&title))
}

fn jobs_table(jobs: &[Job]) -> TableStruct {
    let rows = jobs
        .iter()
        .map(|job| {
            vec![
                job.name.as_str().cell(),
                job.iterations.cell().justify(Justify::Right),
                job.node_count.cell().justify(Justify::Right),
                job.packing_strategy.to_string().cell(),
                job.colocated.cell(),
                job.constraints.iter().join(" ").cell(),
            ]
        })
        .collect();
    CliOutput::horizontal_table(
        rows,
        header(&[
            "name",
            "iterations",
            "node_count",
            "packing",
            "colocated",
            "constraints",
        ]),
    )
}

impl Output for CliOutput {
    fn print_demand(&self, rows: &[DemandRow], columns: &[String]) {
        self.print_table(demand_table(rows, columns));
    }

    fn print_jobs(&self, jobs: &[Job]) {
        self.print_table(jobs_table(jobs));
    }

    fn print_buckets(&self, buckets: &[Bucket]) {
        let rows = buckets
            .iter()
            .map(|bucket| {
                let resources = bucket
                    .resources
                    .iter()
                    .sorted_unstable_by(|a, b| a.0.cmp(b.0))
                    .map(|(name, value)| format!("{name}={value}"))
                    .join(", ");
                vec![
                    bucket.bucket_id.as_str().cell(),
                    bucket.nodearray.as_str().cell(),
                    bucket.vm_size.as_str().cell(),
                    bucket.placement_group.as_deref().unwrap_or("").cell(),
                    bucket.available_count.cell().justify(Justify::Right),
                    resources.cell(),
                ]
            })
            .collect();
        self.print_horizontal_table(
            rows,
            header(&[
                "bucket_id",
                "nodearray",
                "vm_size",
                "placement_group",
                "available",
                "resources",
            ]),
        );
    }

    fn print_queues(&self, queues: &[&Queue]) {
        let rows = queues
            .iter()
            .map(|queue| {
                let state = if queue.enabled && queue.started {
                    "active".cell().foreground_color(Some(Color::Green))
                } else if queue.enabled {
                    "stopped".cell().foreground_color(Some(Color::Yellow))
                } else {
                    "disabled".cell().foreground_color(Some(Color::Red))
                };
                vec![
                    queue.name.as_str().cell(),
                    queue.queue_type.as_str().cell(),
                    state,
                    queue.node_group_key.as_deref().unwrap_or("").cell(),
                    queue.queued().cell().justify(Justify::Right),
                    queue.running().cell().justify(Justify::Right),
                    queue.held().cell().justify(Justify::Right),
                ]
            })
            .collect();
        self.print_horizontal_table(
            rows,
            header(&[
                "name",
                "type",
                "state",
                "node_group_key",
                "queued",
                "running",
                "held",
            ]),
        );
    }

    fn print_resources(&self, definitions: &[&ResourceDefinition]) {
        let rows = definitions
            .iter()
            .map(|def| {
                vec![
                    def.name.as_str().cell(),
                    def.resource_type.as_str().cell(),
                    def.flag.as_str().cell(),
                    def.is_host().cell(),
                    def.is_consumable().cell(),
                    def.read_only.cell(),
                ]
            })
            .collect();
        self.print_horizontal_table(
            rows,
            header(&["name", "type", "flag", "host", "consumable", "read_only"]),
        );
    }

    fn print_host_states(&self, hostnames: &[String], failed: &[String], state: &str) {
        for hostname in hostnames {
            if failed.contains(hostname) {
                println!("{} {}", hostname, "failed".red());
            } else {
                println!("{} {}", hostname, state.green());
            }
        }
    }

    fn print_error(&self, error: anyhow::Error) {
        eprintln!("{}", format!("{error:?}").red());
    }
}
