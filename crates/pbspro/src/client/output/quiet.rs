use scalelib::bucket::Bucket;
use scalelib::job::Job;

use crate::client::output::outputs::{DemandRow, Output};
use crate::pbs::queue::Queue;
use crate::pbs::resource::ResourceDefinition;

/// Prints only the names of the listed objects.
#[derive(Default)]
pub struct Quiet;

impl Output for Quiet {
    fn print_demand(&self, rows: &[DemandRow], _columns: &[String]) {
        for row in rows {
            println!("{}", row.node.name);
        }
    }

    fn print_jobs(&self, jobs: &[Job]) {
        for job in jobs {
            println!("{}", job.name);
        }
    }

    fn print_buckets(&self, buckets: &[Bucket]) {
        for bucket in buckets {
            println!("{} {}", bucket.bucket_id, bucket.available_count);
        }
    }

    fn print_queues(&self, queues: &[&Queue]) {
        for queue in queues {
            println!("{}", queue.name);
        }
    }

    fn print_resources(&self, definitions: &[&ResourceDefinition]) {
        for def in definitions {
            println!("{}", def.name);
        }
    }

    fn print_host_states(&self, _hostnames: &[String], failed: &[String], _state: &str) {
        for hostname in failed {
            println!("{hostname}");
        }
    }

    fn print_error(&self, error: anyhow::Error) {
        eprintln!("{error:?}");
    }
}
