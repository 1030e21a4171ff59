use scalelib::bucket::Bucket;
use scalelib::job::Job;
use serde_json::{Map, Value, json};

use crate::client::output::outputs::{DemandRow, Output};
use crate::pbs::queue::Queue;
use crate::pbs::resource::ResourceDefinition;

#[derive(Default)]
pub struct JsonOutput;

impl JsonOutput {
    fn print(&self, data: Value) {
        println!("{data:#}");
    }
}

fn demand_json(rows: &[DemandRow], columns: &[String]) -> Value {
    let nodes = rows
        .iter()
        .map(|row| {
            let record: Map<String, Value> = columns
                .iter()
                .map(|column| (column.clone(), Value::String(row.column(column))))
                .collect();
            Value::Object(record)
        })
        .collect();
    Value::Array(nodes)
}

impl Output for JsonOutput {
    fn print_demand(&self, rows: &[DemandRow], columns: &[String]) {
        self.print(demand_json(rows, columns));
    }

    fn print_jobs(&self, jobs: &[Job]) {
        self.print(json!(jobs));
    }

    fn print_buckets(&self, buckets: &[Bucket]) {
        self.print(json!(buckets));
    }

    fn print_queues(&self, queues: &[&Queue]) {
        self.print(json!(queues));
    }

    fn print_resources(&self, definitions: &[&ResourceDefinition]) {
        self.print(json!(definitions));
    }

    fn print_host_states(&self, hostnames: &[String], failed: &[String], state: &str) {
        let states: Map<String, Value> = hostnames
            .iter()
            .map(|hostname| {
                let value = if failed.contains(hostname) { "failed" } else { state };
                (hostname.clone(), Value::String(value.to_string()))
            })
            .collect();
        self.print(Value::Object(states));
    }

    fn print_error(&self, error: anyhow::Error) {
        self.print(json!({ "error": format!("{error:?}") }));
    }
}
