use scalelib::resources::{ResourceMap, ResourceValue};
use scalelib::shared::{SharedPools, SharedResource, SharedResources};
use scalelib::{Map, Set};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::common::error::PbsError;
use crate::common::selectparser::parse_select_chunks;
use crate::pbs::resource::ResourceDefinitions;

/// One object printed by `qmgr -c "list ..."` or `pbsnodes`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PbsRecord {
    pub obj_type: String,
    pub name: String,
    pub attributes: BTreeMap<String, String>,
}

impl PbsRecord {
    pub fn new(obj_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            obj_type: obj_type.into(),
            name: name.into(),
            attributes: Default::default(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(|v| v.as_str())
    }

    pub fn require(&self, key: &str) -> crate::Result<&str> {
        self.get(key).ok_or_else(|| {
            PbsError::ResourceParsingError(format!(
                "Missing attribute {key} of {}",
                self.source()
            ))
        })
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Label used for shared resources defined by this object, e.g. `queue[workq]`.
    pub fn source(&self) -> String {
        format!("{}[{}]", self.obj_type, self.name)
    }

    /// Attributes with the given prefix, e.g. `resources_available`, without the prefix.
    pub fn with_prefix<'a>(&'a self, prefix: &str) -> impl Iterator<Item = (&'a str, &'a str)> {
        let prefix = format!("{prefix}.");
        self.attributes.iter().filter_map(move |(key, value)| {
            key.strip_prefix(&prefix)
                .map(|name| (name, value.as_str()))
        })
    }
}

/// Parses the key-value listing printed by `qmgr` and `pbsnodes`.
///
/// Records are separated by blank lines. The first line of a record is `type name`
/// (or just `name`) and every following line is `key = value`. Lines ending with a comma
/// continue on the next line.
pub fn parse_key_value(output: &str) -> crate::Result<Vec<PbsRecord>> {
    if output.to_lowercase().starts_with("no active") {
        // e.g. "No Active Nodes, nothing done."
        return Ok(Vec::new());
    }

    let mut records = Vec::new();
    let mut current: Option<PbsRecord> = None;
    let mut continued = String::new();

    for (index, line) in output.lines().enumerate() {
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        if line.ends_with(',') {
            continued.push_str(line);
            continue;
        }
        let line = if continued.is_empty() {
            line.to_string()
        } else {
            let mut joined = std::mem::take(&mut continued);
            joined.push_str(line);
            joined
        };

        if line.is_empty() {
            records.extend(current.take());
            continue;
        }

        match current.as_mut() {
            None => {
                let mut tokens = line.split_whitespace();
                let record = match (tokens.next(), tokens.next(), tokens.next()) {
                    (Some(obj_type), Some(name), None) => PbsRecord::new(obj_type, name),
                    _ => PbsRecord::new("unknown", line.as_str()),
                };
                current = Some(record);
            }
            Some(record) => {
                let Some((key, value)) = line.split_once('=') else {
                    return Err(PbsError::ResourceParsingError(format!(
                        "{line} has no = in it. Line {} of the following:\n{output}",
                        index + 1
                    )));
                };
                record.insert(key.trim(), value.trim());
            }
        }
    }
    records.extend(current);
    Ok(records)
}

/// Job counts per state, from a queue's `state_count` attribute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub transit: u32,
    pub queued: u32,
    pub held: u32,
    pub waiting: u32,
    pub running: u32,
    pub exiting: u32,
    pub begun: u32,
}

/// Parses `Transit:0 Queued:2 Held:0 Waiting:0 Running:1 Exiting:0 Begun:0`.
pub fn parse_state_counts(expr: &str) -> crate::Result<StateCounts> {
    let mut counts = StateCounts::default();
    for token in expr.split_whitespace() {
        let parsed = token
            .split_once(':')
            .and_then(|(key, value)| Some((key, value.parse::<u32>().ok()?)));
        let Some((key, value)) = parsed else {
            return Err(PbsError::ResourceParsingError(format!(
                "Could not parse state count '{token}'"
            )));
        };
        let slot = match key {
            "Transit" => &mut counts.transit,
            "Queued" => &mut counts.queued,
            "Held" => &mut counts.held,
            "Waiting" => &mut counts.waiting,
            "Running" => &mut counts.running,
            "Exiting" => &mut counts.exiting,
            "Begun" => &mut counts.begun,
            _ => {
                return Err(PbsError::ResourceParsingError(format!(
                    "Unknown job state '{key}' in state count '{expr}'"
                )));
            }
        };
        *slot = value;
    }
    Ok(counts)
}

const UNLIMITED: i64 = 1 << 31;
const PBS_ALL: &str = "PBS_ALL";
const PBS_GENERIC: &str = "PBS_GENERIC";

/// Parsed `max_run` style limit, e.g. `[o:PBS_ALL=20], [u:PBS_GENERIC=5]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Limit {
    pub overall: BTreeMap<String, i64>,
    pub user: BTreeMap<String, i64>,
    pub group: BTreeMap<String, i64>,
    pub project: BTreeMap<String, i64>,
}

impl Limit {
    pub fn get_limit(&self, user: Option<&str>, groups: &[&str], project: Option<&str>) -> i64 {
        let mut limit = UNLIMITED;
        if let Some(overall) = self.overall.get(PBS_ALL) {
            limit = limit.min(*overall);
        }

        if !groups.is_empty() {
            let generic = self.group.get(PBS_GENERIC).copied().unwrap_or(0);
            let group_limit: i64 = groups
                .iter()
                .map(|group| self.group.get(*group).copied().unwrap_or(generic))
                .sum();
            limit = limit.min(group_limit);
        }

        let scoped = |scope: &BTreeMap<String, i64>, name: Option<&str>| {
            name.and_then(|name| scope.get(name).or_else(|| scope.get(PBS_GENERIC)))
                .copied()
        };
        if let Some(user_limit) = scoped(&self.user, user) {
            limit = limit.min(user_limit);
        }
        if let Some(project_limit) = scoped(&self.project, project) {
            limit = limit.min(project_limit);
        }
        limit
    }
}

pub fn parse_limit_expression(expr: &str) -> crate::Result<Limit> {
    let mut limit = Limit::default();
    let expr = expr.replace('"', "");

    for token in expr.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        if let Ok(value) = token.parse::<i64>() {
            // `max_run = 20` is the same as `max_run = [o:PBS_ALL=20]`
            limit.overall.insert(PBS_ALL.to_string(), value);
            continue;
        }

        let token = token.replace(['[', ']'], "");
        let invalid = || PbsError::ResourceParsingError(format!("Could not parse limit '{token}'"));
        let (key, value) = token.split_once('=').ok_or_else(invalid)?;
        let value = value.trim().parse::<i64>().map_err(|_| invalid())?;
        let (scope, name) = key.trim().split_once(':').ok_or_else(invalid)?;
        let target = match scope {
            "o" => &mut limit.overall,
            "u" => &mut limit.user,
            "g" => &mut limit.group,
            "p" => &mut limit.project,
            _ => {
                return Err(PbsError::ResourceParsingError(format!(
                    "Unknown scope '{scope}' while parsing limit '{token}'"
                )));
            }
        };
        target.insert(name.to_string(), value);
    }
    Ok(limit)
}

/// Reads the resource names of the `resources:` line of a `sched_config` file.
pub fn parse_resources_from_sched_config(path: &Path) -> crate::Result<Set<String>> {
    let content = std::fs::read_to_string(path).map_err(|error| {
        PbsError::ConfigurationError(format!("Cannot read {}: {error}", path.display()))
    })?;
    parse_resources_line(&content).ok_or_else(|| {
        PbsError::ConfigurationError(format!(
            "Could not find line beginning with 'resources:' in file {}",
            path.display()
        ))
    })
}

fn parse_resources_line(content: &str) -> Option<Set<String>> {
    content.lines().map(str::trim).find_map(|line| {
        let line = line.strip_prefix("resources:")?.replace('"', "");
        Some(
            line.split(',')
                .map(|token| token.trim().to_string())
                .filter(|token| !token.is_empty())
                .collect(),
        )
    })
}

/// Available, assigned and shared resources of a server, scheduler or queue.
#[derive(Debug, Clone, Default)]
pub struct ResourceState {
    pub available: ResourceMap,
    pub assigned: ResourceMap,
    pub shared: SharedResources,
}

/// Converts raw PBS attributes into typed values using the cycle's resource definitions.
pub struct PbsParser<'a> {
    definitions: &'a ResourceDefinitions,
    dyn_res_dir: Option<PathBuf>,
}

impl<'a> PbsParser<'a> {
    pub fn new(definitions: &'a ResourceDefinitions) -> Self {
        Self {
            definitions,
            dyn_res_dir: None,
        }
    }

    /// Files of this directory extend `resources_available` (server_dyn_res scripts).
    pub fn with_dyn_res_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dyn_res_dir = Some(dir.into());
        self
    }

    pub fn definitions(&self) -> &ResourceDefinitions {
        self.definitions
    }

    pub fn parse_value(&self, name: &str, raw: &str) -> crate::Result<ResourceValue> {
        self.definitions.parse_value(name, raw)
    }

    /// Typed `prefix.*` attributes. `filter_is_host` keeps only defined resources of the
    /// given scope.
    pub fn parse_prefix(
        &self,
        prefix: &str,
        record: &PbsRecord,
        filter_is_host: Option<bool>,
    ) -> crate::Result<ResourceMap> {
        let mut resources = ResourceMap::default();
        for (name, raw) in record.with_prefix(prefix) {
            if let Some(is_host) = filter_is_host {
                match self.definitions.get(name) {
                    Some(def) if def.is_host() == is_host => {}
                    _ => continue,
                }
            }
            resources.insert(name.to_string(), self.parse_value(name, raw)?);
        }
        Ok(resources)
    }

    pub fn parse_resources_default(&self, record: &PbsRecord) -> crate::Result<ResourceMap> {
        self.parse_prefix("resources_default", record, None)
    }

    pub fn parse_default_chunk(&self, record: &PbsRecord) -> crate::Result<ResourceMap> {
        self.parse_prefix("default_chunk", record, None)
    }

    pub fn parse_resources_assigned(
        &self,
        record: &PbsRecord,
        filter_is_host: Option<bool>,
    ) -> crate::Result<ResourceMap> {
        self.parse_prefix("resources_assigned", record, filter_is_host)
    }

    /// `resources_available.*` plus one entry per file of the dynamic resource directory.
    pub fn parse_resources_available(
        &self,
        record: &PbsRecord,
        filter_is_host: Option<bool>,
    ) -> crate::Result<ResourceMap> {
        let mut resources = self.parse_prefix("resources_available", record, filter_is_host)?;
        if let Some(dir) = &self.dyn_res_dir {
            for (name, raw) in read_dyn_res_dir(dir)? {
                let value = self.parse_value(&name, &raw)?;
                resources.insert(name, value);
            }
        }
        Ok(resources)
    }

    /// Parses a select expression into one typed map per chunk. Every chunk has a `select`
    /// entry with its count.
    pub fn parse_select(&self, expr: &str) -> crate::Result<Vec<ResourceMap>> {
        let chunks = parse_select_chunks(expr)
            .map_err(|e| PbsError::ResourceParsingError(e.to_string()))?;
        let mut result = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let mut resources = ResourceMap::default();
            resources.insert("select".to_string(), ResourceValue::Int(chunk.count as i64));
            for (name, raw) in chunk.resources {
                if !self.definitions.contains(&name) {
                    log::warn!("Unknown resource {name}: treating as a string.");
                }
                let value = self.parse_value(&name, &raw)?;
                resources.insert(name, value);
            }
            result.push(resources);
        }
        Ok(result)
    }

    /// Builds the resource state of `record`, stacking its shared resources on top of
    /// `parent` (the scheduler level pools when parsing a queue).
    ///
    /// Consumable shared resources are appended after the inherited pools, non consumable
    /// ones replace them.
    pub fn parse_resource_state(
        &self,
        record: &PbsRecord,
        parent: Option<&SharedResources>,
        pools: &mut SharedPools,
    ) -> crate::Result<ResourceState> {
        let source = record.source();
        let available = self.parse_resources_available(record, None)?;
        let assigned = self.parse_resources_assigned(record, None)?;

        let mut shared = parent.cloned().unwrap_or_default();
        let mut names: Vec<&String> = available.keys().collect();
        names.sort_unstable();

        for name in names {
            let Some(def) = self.definitions.get(name) else {
                continue;
            };
            if def.is_host() {
                continue;
            }
            let initial = available[name].clone();
            if def.is_consumable() {
                let used = assigned
                    .get(name)
                    .cloned()
                    .unwrap_or(ResourceValue::Int(0));
                let Some(current) = initial.minus(&used) else {
                    log::error!("Unknown resource {name}. Will not be used for autoscale");
                    continue;
                };
                let id = pools.add(SharedResource::Consumable {
                    name: name.clone(),
                    source: source.clone(),
                    initial,
                    current,
                });
                shared.entry(name.clone()).or_default().push(id);
            } else {
                let id = pools.add(SharedResource::NonConsumable {
                    name: name.clone(),
                    source: source.clone(),
                    value: initial,
                });
                shared.insert(name.clone(), vec![id]);
            }
        }

        Ok(ResourceState {
            available,
            assigned,
            shared,
        })
    }
}

/// Reads `(resource, value)` pairs from a `server_dyn_res` style directory, sorted by name.
/// A missing directory yields nothing.
pub fn read_dyn_res_dir(dir: &Path) -> crate::Result<Vec<(String, String)>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut entries: Map<String, String> = Map::default();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let value = std::fs::read_to_string(entry.path())?;
        entries.insert(name, value.trim().to_string());
    }
    let mut entries: Vec<_> = entries.into_iter().collect();
    entries.sort_unstable();
    Ok(entries)
}
