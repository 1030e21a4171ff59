use scalelib::constraints::{Constraint, HostResource};
use scalelib::job::{Job, PackingStrategy};
use scalelib::resources::{ResourceMap, ResourceValue};
use scalelib::shared::SharedPools;
use scalelib::Set;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::common::error::PbsError;
use crate::common::rangeparser::parse_range_size;
use crate::common::selectparser::{Arrangement, Placement, Sharing, parse_place};
use crate::pbs::command::PbsCommand;
use crate::pbs::parser::PbsParser;
use crate::pbs::queue::Queue;
use crate::pbs::resource::parse_boolean;

/// Resource_List entries that describe the request itself rather than a resource.
const NON_CONSTRAINT_RESOURCES: [&str; 4] = ["select", "schedselect", "place", "nodect"];

const STATE_QUEUED: &str = "Q";
const STATE_BEGUN: &str = "B";
const STATE_RUNNING: &str = "R";

/// Everything the job parser needs from the rest of the environment.
pub struct JobContext<'a> {
    pub parser: &'a PbsParser<'a>,
    pub queues: &'a BTreeMap<String, Queue>,
    pub resources_for_scheduling: &'a Set<String>,
    pub pools: &'a SharedPools,
    /// Also return running jobs, bound to the first host of their `exec_host`.
    pub include_running: bool,
}

/// Reads jobs with `qstat -f -t -F json`.
pub fn read_jobs(pbs: &dyn PbsCommand, ctx: &JobContext) -> crate::Result<Vec<Job>> {
    let response = pbs.qstat_json(&["-f", "-t"])?;
    parse_jobs(&response, ctx)
}

/// Orders job ids the way they were submitted (`9.pbs` before `10.pbs`).
fn submission_key(job_id: &str) -> (u64, String) {
    let numeric: String = job_id.chars().take_while(|c| c.is_ascii_digit()).collect();
    (numeric.parse().unwrap_or(u64::MAX), job_id.to_string())
}

/// Malformed jobs are logged and skipped. A misconfigured shared resource fails the whole
/// read, because every job of the queue would be planned against the wrong limits.
pub fn parse_jobs(response: &Value, ctx: &JobContext) -> crate::Result<Vec<Job>> {
    let Some(jobs) = response.get("Jobs").and_then(|jobs| jobs.as_object()) else {
        return Ok(Vec::new());
    };
    let mut entries: Vec<(&String, &Value)> = jobs.iter().collect();
    entries.sort_by_cached_key(|(id, _)| submission_key(id));

    let mut result = Vec::new();
    for (long_id, record) in entries {
        let job_id = long_id.split('.').next().unwrap_or(long_id);
        match parse_job(job_id, record, ctx) {
            Ok(jobs) => result.extend(jobs),
            Err(error @ PbsError::ConfigurationError(_)) => return Err(error),
            Err(error) => log::error!("Could not parse job {job_id}, skipping: {error}"),
        }
    }
    Ok(result)
}

fn json_to_raw(value: &Value) -> Option<String> {
    match value {
        Value::String(value) => Some(value.clone()),
        Value::Number(value) => Some(value.to_string()),
        Value::Bool(true) => Some("True".to_string()),
        Value::Bool(false) => Some("False".to_string()),
        _ => None,
    }
}

fn get_str<'a>(record: &'a Value, key: &str) -> Option<&'a str> {
    record.get(key).and_then(|value| value.as_str())
}

/// Number of array indices left to run. `None` for records that are not array parents.
fn array_iterations(job_id: &str, record: &Value) -> crate::Result<Option<u32>> {
    let is_array = match record.get("array") {
        Some(Value::Bool(value)) => *value,
        Some(Value::String(value)) => parse_boolean(value).unwrap_or(false),
        _ => false,
    };
    if !is_array {
        return Ok(None);
    }
    let Some(indices) = get_str(record, "array_indices_remaining")
        .or_else(|| get_str(record, "array_indices_submitted"))
    else {
        return Err(PbsError::ResourceParsingError(format!(
            "Array job {job_id} has no array indices"
        )));
    };
    if indices == "-" {
        return Ok(Some(0));
    }
    parse_range_size(indices)
        .map(Some)
        .map_err(|error| PbsError::ResourceParsingError(error.to_string()))
}

/// Typed `Resource_List` without the entries handled separately.
fn convert_resource_list(
    parser: &PbsParser,
    resource_list: &serde_json::Map<String, Value>,
) -> crate::Result<BTreeMap<String, ResourceValue>> {
    let mut result = BTreeMap::new();
    for (name, value) in resource_list {
        if matches!(name.as_str(), "select" | "schedselect" | "place") {
            continue;
        }
        let typed = match (parser.definitions().contains(name), value) {
            (false, Value::Number(number)) => match number.as_i64() {
                Some(v) => ResourceValue::Int(v),
                None => ResourceValue::Float(number.as_f64().unwrap_or_default()),
            },
            _ => match json_to_raw(value) {
                Some(raw) => parser.parse_value(name, &raw)?,
                None => continue,
            },
        };
        result.insert(name.clone(), typed);
    }
    Ok(result)
}

fn parse_job(job_id: &str, record: &Value, ctx: &JobContext) -> crate::Result<Vec<Job>> {
    let Some(state) = get_str(record, "job_state") else {
        log::warn!("No job_state defined for job {job_id}. Skipping");
        return Ok(Vec::new());
    };
    if record.get("array_id").is_some() {
        // sub jobs are accounted for by their parent array job
        return Ok(Vec::new());
    }

    let array = array_iterations(job_id, record)?;
    let running = state == STATE_RUNNING && ctx.include_running && array.is_none();
    let pending = match array {
        Some(_) => state == STATE_QUEUED || state == STATE_BEGUN,
        None => state == STATE_QUEUED,
    };
    if !pending && !running {
        return Ok(Vec::new());
    }
    let iterations = match array {
        Some(0) => return Ok(Vec::new()),
        Some(count) => count,
        None => 1,
    };

    // ensure we don't autoscale jobs from disabled or non-started queues
    let Some(queue) = get_str(record, "queue").and_then(|name| ctx.queues.get(name)) else {
        log::warn!("queue was not defined for job {job_id}: ignoring");
        return Ok(Vec::new());
    };
    if !queue.enabled {
        log::debug!("Skipping job {job_id} from disabled queue {}", queue.name);
        return Ok(Vec::new());
    }
    if !queue.started {
        log::debug!("Skipping job {job_id} from non-started queue {}", queue.name);
        return Ok(Vec::new());
    }

    let empty = serde_json::Map::new();
    let resource_list = record
        .get("Resource_List")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    let resources = convert_resource_list(ctx.parser, resource_list)?;
    let placement = match resource_list.get("place").and_then(json_to_raw) {
        Some(place) => {
            parse_place(&place).map_err(|e| PbsError::ResourceParsingError(e.to_string()))?
        }
        None => Placement::default(),
    };
    let schedselect = get_str(record, "schedselect")
        .map(|s| s.to_string())
        .or_else(|| resource_list.get("select").and_then(json_to_raw))
        .unwrap_or_else(|| "1".to_string());
    let chunks = ctx.parser.parse_select(&schedselect)?;

    let executing_hostname = if running {
        get_str(record, "exec_host")
            .and_then(|hosts| hosts.split(['/', '+']).next())
            .map(|host| host.to_string())
    } else {
        None
    };

    let spec = JobSpec {
        job_id,
        iterations,
        resources,
        placement,
        queue,
        executing_hostname,
    };
    spec.build_jobs(&chunks, ctx)
}

struct JobSpec<'a> {
    job_id: &'a str,
    iterations: u32,
    resources: BTreeMap<String, ResourceValue>,
    placement: Placement,
    queue: &'a Queue,
    executing_hostname: Option<String>,
}

impl JobSpec<'_> {
    fn node_count(&self) -> crate::Result<u32> {
        match self.resources.get("nodect") {
            Some(ResourceValue::Int(value)) => to_count(self.job_id, "nodect", (*value).max(0)),
            Some(ResourceValue::Str(value)) => value.trim().parse().map_err(|_| {
                PbsError::ResourceParsingError(format!(
                    "Invalid nodect '{value}' of job {}",
                    self.job_id
                ))
            }),
            _ => Ok(0),
        }
    }

    fn is_colocated(&self, smp: bool) -> bool {
        // htc jobs set ungrouped=true
        let ungrouped = self
            .resources
            .get("ungrouped")
            .map(|value| value.to_string().to_lowercase())
            .unwrap_or_else(|| "false".to_string());
        !smp && self.queue.uses_placement() && ungrouped == "false"
    }

    fn build_jobs(&self, chunks: &[ResourceMap], ctx: &JobContext) -> crate::Result<Vec<Job>> {
        let packing_strategy = match self.placement.arrangement {
            Arrangement::Free | Arrangement::Pack => PackingStrategy::Pack,
            Arrangement::Scatter | Arrangement::VScatter => PackingStrategy::Scatter,
        };
        let smp = self.placement.grouping.as_deref() == Some("host");
        let mut node_count = self.node_count()?;

        let mut iterations = self.iterations;
        let mut smp_multiplier = 1;
        if smp {
            // every chunk lands on a single host
            smp_multiplier = iterations.max(1) as i64 * node_count.max(1) as i64;
            iterations = 1;
            node_count = 1;
        }
        let effective_node_count = node_count.max(1);
        let colocated = self.is_colocated(smp);

        let mut jobs = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.iter().enumerate() {
            let name = if chunks.len() > 1 {
                format!("{}+{}", self.job_id, index)
            } else {
                self.job_id.to_string()
            };
            let chunk_nodes = match chunk.get("select") {
                Some(ResourceValue::Int(count)) => to_count(self.job_id, "select", (*count).max(1))?,
                _ => 1,
            };

            let request = self.chunk_request(chunk, effective_node_count, smp_multiplier);
            let mut constraints = Vec::new();
            if colocated {
                constraints.push(Constraint::InAPlacementGroup);
            }
            match self.placement.sharing {
                Some(Sharing::Excl) => constraints.push(Constraint::Exclusive { task: true }),
                Some(Sharing::ExclHost) => constraints.push(Constraint::Exclusive { task: false }),
                Some(Sharing::Shared) | None => {}
            }

            let job_resources = self.scheduling_resources(request, ctx.resources_for_scheduling);
            constraints.extend(host_constraints(&job_resources, ctx.parser));
            constraints.extend(self.queue.get_non_host_constraints(
                ctx.parser.definitions(),
                &job_resources,
                node_count,
                ctx.pools,
            )?);

            jobs.push(Job {
                name,
                iterations,
                node_count: if smp { 1 } else { chunk_nodes },
                packing_strategy,
                colocated,
                constraints,
                executing_hostname: self.executing_hostname.clone(),
            });
        }
        Ok(jobs)
    }

    /// Job level resources overridden by the chunk, in a stable order.
    fn chunk_request(
        &self,
        chunk: &ResourceMap,
        effective_node_count: u32,
        smp_multiplier: i64,
    ) -> Vec<(String, ResourceValue)> {
        let mut request: Vec<(String, ResourceValue)> = self
            .resources
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        if !chunk.contains_key("ncpus") {
            // Resource_List.ncpus is the total of all nodes
            if let Some((_, ncpus)) = request.iter_mut().find(|(name, _)| name == "ncpus") {
                if let ResourceValue::Int(total) = ncpus {
                    *ncpus = ResourceValue::Int(*total / effective_node_count as i64);
                }
            }
        }

        let mut overrides: Vec<(&String, &ResourceValue)> = chunk.iter().collect();
        overrides.sort_unstable_by(|a, b| a.0.cmp(b.0));
        for (name, value) in overrides {
            let value = if smp_multiplier > 1 {
                value.multiply(smp_multiplier)
            } else {
                value.clone()
            };
            match request.iter_mut().find(|(existing, _)| existing == name) {
                Some((_, slot)) => *slot = value,
                None => request.push((name.clone(), value)),
            }
        }
        request
    }

    fn scheduling_resources(
        &self,
        request: Vec<(String, ResourceValue)>,
        resources_for_scheduling: &Set<String>,
    ) -> Vec<(String, ResourceValue)> {
        request
            .into_iter()
            .filter(|(name, _)| {
                if NON_CONSTRAINT_RESOURCES.contains(&name.as_str()) {
                    return false;
                }
                if resources_for_scheduling.contains(name) {
                    return true;
                }
                if name != "skipcyclesubhook" {
                    log::warn!(
                        "Ignoring resource {name} of job {} as it was not defined in sched_config",
                        self.job_id
                    );
                }
                false
            })
            .collect()
    }
}

fn to_count(job_id: &str, name: &str, value: i64) -> crate::Result<u32> {
    u32::try_from(value).map_err(|_| {
        PbsError::ResourceParsingError(format!("{name}={value} of job {job_id} is out of range"))
    })
}

/// Host resources grouped into constraints. A repeated resource starts a new group so that
/// the later value does not silently replace the earlier one.
fn host_constraints(resources: &[(String, ResourceValue)], parser: &PbsParser) -> Vec<Constraint> {
    let mut groups: Vec<Vec<HostResource>> = vec![Vec::new()];
    for (name, value) in resources {
        let Some(def) = parser.definitions().get(name) else {
            continue;
        };
        if !def.is_host() {
            continue;
        }
        let request = HostResource::new(name.clone(), value.clone(), def.is_consumable());
        match groups.last_mut() {
            Some(group) if !group.iter().any(|r| &r.name == name) => group.push(request),
            _ => groups.push(vec![request]),
        }
    }
    groups
        .into_iter()
        .filter(|group| !group.is_empty())
        .map(Constraint::HostResources)
        .collect()
}
