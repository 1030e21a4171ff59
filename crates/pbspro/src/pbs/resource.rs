use scalelib::resources::{ResourceValue, Size};
use scalelib::{Map, Set};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::autoscale::config::PbsproConfig;
use crate::common::error::PbsError;
use crate::pbs::command::PbsCommand;
use crate::pbs::parser::{PbsRecord, parse_resources_from_sched_config};

const VALID_TRUE: [&str; 8] = ["TRUE", "True", "true", "T", "t", "Y", "y", "1"];
const VALID_FALSE: [&str; 8] = ["FALSE", "False", "false", "F", "f", "N", "n", "0"];

fn parsing_error<T>(message: String) -> crate::Result<T> {
    Err(PbsError::ResourceParsingError(message))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Boolean,
    Duration,
    Float,
    Long,
    Size,
    String,
    StringArray,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Boolean => "boolean",
            ResourceType::Duration => "duration",
            ResourceType::Float => "float",
            ResourceType::Long => "long",
            ResourceType::Size => "size",
            ResourceType::String => "string",
            ResourceType::StringArray => "string_array",
        }
    }

    pub fn parse(&self, raw: &str) -> crate::Result<ResourceValue> {
        match self {
            ResourceType::Boolean => parse_boolean(raw).map(ResourceValue::Bool),
            ResourceType::Duration => parse_duration(raw).map(ResourceValue::Int),
            ResourceType::Float => match raw.trim().parse::<f64>() {
                Ok(value) => Ok(ResourceValue::Float(value)),
                Err(_) => parsing_error(format!("Could not parse '{raw}' as a float")),
            },
            ResourceType::Long => match raw.trim().parse::<i64>() {
                Ok(value) => Ok(ResourceValue::Int(value)),
                Err(_) => parsing_error(format!("Could not parse '{raw}' as an int")),
            },
            ResourceType::Size => raw
                .parse::<Size>()
                .map(ResourceValue::Size)
                .map_err(|e| PbsError::ResourceParsingError(e.to_string())),
            ResourceType::String => Ok(ResourceValue::Str(raw.to_string())),
            ResourceType::StringArray => Ok(ResourceValue::StrArray(
                raw.split(',').map(|item| item.trim().to_string()).collect(),
            )),
        }
    }
}

impl FromStr for ResourceType {
    type Err = PbsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "boolean" => ResourceType::Boolean,
            "duration" => ResourceType::Duration,
            "float" => ResourceType::Float,
            "long" => ResourceType::Long,
            "size" => ResourceType::Size,
            "string" => ResourceType::String,
            "string_array" => ResourceType::StringArray,
            _ => {
                return Err(PbsError::ResourceParsingError(format!(
                    "Unknown resource type '{s}'"
                )));
            }
        })
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn parse_boolean(raw: &str) -> crate::Result<bool> {
    if VALID_TRUE.contains(&raw) {
        Ok(true)
    } else if VALID_FALSE.contains(&raw) {
        Ok(false)
    } else {
        parsing_error(format!(
            "Could not parse '{raw}' as a boolean. Expected one of {} or {}",
            VALID_TRUE.join(","),
            VALID_FALSE.join(",")
        ))
    }
}

/// Parses `[[HH:]MM:]SS[.ms]` or plain seconds.
///
/// Milliseconds round the result up when their first digit is at least 5,
/// so `1.49` is one second and `1.5` two.
pub fn parse_duration(raw: &str) -> crate::Result<i64> {
    if let Ok(seconds) = raw.parse::<i64>() {
        return Ok(seconds);
    }

    let parse_int = |token: &str| -> crate::Result<i64> {
        token
            .parse::<i64>()
            .map_err(|_| PbsError::ResourceParsingError(format!("Could not parse {token} as an int")))
    };

    let mut tokens: Vec<&str> = raw.split(':').collect();
    let last = tokens.pop().unwrap_or_default();
    match last.split_once('.') {
        Some((seconds, fraction)) => tokens.extend([seconds, fraction]),
        None => tokens.extend([last, "0"]),
    }

    if tokens.len() > 4 {
        return parsing_error(format!(
            "Too many fields ({} > 4): Could not parse duration '{raw}': expected [[hours:]minutes:]seconds[.milliseconds]",
            tokens.len()
        ));
    }

    let fraction = tokens[tokens.len() - 1];
    let Some(first_digit) = fraction.get(..1) else {
        return parsing_error(format!("Could not parse duration '{raw}'"));
    };
    let rounded = if parse_int(first_digit)? >= 5 { 1 } else { 0 };

    let mut seconds = parse_int(tokens[tokens.len() - 2])? + rounded;
    if tokens.len() >= 3 {
        seconds += parse_int(tokens[tokens.len() - 3])? * 60;
    }
    if tokens.len() == 4 {
        seconds += parse_int(tokens[0])? * 3600;
    }
    Ok(seconds)
}

/// Definition of a PBS resource as listed by `qmgr -c "list resource"`.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceDefinition {
    pub name: String,
    pub resource_type: ResourceType,
    /// Sorted PBS flag, e.g. `hn` or `q`.
    pub flag: String,
    pub read_only: bool,
}

impl ResourceDefinition {
    pub fn new(name: impl Into<String>, resource_type: ResourceType, flag: &str) -> Self {
        let mut flag: Vec<char> = flag.chars().collect();
        flag.sort_unstable();
        Self {
            name: name.into(),
            resource_type,
            flag: flag.into_iter().collect(),
            read_only: false,
        }
    }

    /// The `m` flag (modifiable by managers) does not change how the resource is consumed.
    pub fn is_consumable(&self) -> bool {
        let simplified = self.flag.replace('m', "");
        matches!(simplified.as_str(), "fh" | "hn" | "q" | "hnq")
    }

    pub fn is_host(&self) -> bool {
        self.flag.contains('h')
    }

    pub fn parse(&self, raw: &str) -> crate::Result<ResourceValue> {
        self.resource_type.parse(raw)
    }
}

/// Resource definitions of the cluster, read once per cycle.
#[derive(Debug, Clone, Default)]
pub struct ResourceDefinitions {
    definitions: Map<String, ResourceDefinition>,
}

impl ResourceDefinitions {
    pub fn new(definitions: impl IntoIterator<Item = ResourceDefinition>) -> Self {
        Self {
            definitions: definitions
                .into_iter()
                .map(|def| (def.name.clone(), def))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ResourceDefinition> {
        self.definitions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    pub fn insert(&mut self, definition: ResourceDefinition) {
        self.definitions.insert(definition.name.clone(), definition);
    }

    pub fn is_host(&self, name: &str) -> bool {
        self.get(name).is_some_and(|def| def.is_host())
    }

    /// Definitions ordered by name.
    pub fn sorted(&self) -> Vec<&ResourceDefinition> {
        let mut definitions: Vec<_> = self.definitions.values().collect();
        definitions.sort_unstable_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// Types `raw` according to the definition of `name`. Unknown resources stay strings.
    pub fn parse_value(&self, name: &str, raw: &str) -> crate::Result<ResourceValue> {
        match self.get(name) {
            Some(def) => def.parse(raw),
            None => Ok(ResourceValue::Str(raw.to_string())),
        }
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

fn definition_from_record(record: &PbsRecord) -> crate::Result<ResourceDefinition> {
    let resource_type = record.get("type").unwrap_or("string").parse()?;
    Ok(ResourceDefinition::new(
        record.name.clone(),
        resource_type,
        record.get("flag").unwrap_or_default(),
    ))
}

/// Reads the resource definitions together with the resources the default scheduler
/// uses for scheduling (the `resources:` line of its `sched_config`).
pub fn read_resource_definitions(
    pbs: &dyn PbsCommand,
    config: &PbsproConfig,
) -> crate::Result<(ResourceDefinitions, Set<String>)> {
    let records = pbs.qmgr_parsed(&["list", "resource"])?;

    let default_sched = pbs.qmgr_parsed(&["list", "sched", "default"])?;
    let Some(sched_priv) = default_sched.first().and_then(|s| s.get("sched_priv")) else {
        return Err(PbsError::ConfigurationError(
            "Could not find sched_priv of the default scheduler".to_string(),
        ));
    };
    let sched_config = Path::new(sched_priv).join("sched_config");
    let sched_resources = parse_resources_from_sched_config(&sched_config)?;

    let known: Set<&str> = records.iter().map(|r| r.name.as_str()).collect();
    let mut missing_records = Vec::new();
    let mut missing: Vec<&String> = sched_resources
        .iter()
        .filter(|name| !known.contains(name.as_str()))
        .collect();
    missing.sort_unstable();
    for name in missing {
        match pbs.qmgr_parsed(&["list", "resource", name]) {
            Ok(found) => missing_records.extend(found),
            Err(error) => {
                log::warn!(
                    "Could not find resource {name} that was defined in {}, Ignoring",
                    sched_config.display()
                );
                log::debug!("{error}");
            }
        }
    }

    let mut definitions = ResourceDefinitions::default();
    for record in records.iter().chain(missing_records.iter()) {
        let mut definition = definition_from_record(record)?;
        definition.read_only = config.read_only_resources.contains(&definition.name);
        definitions.insert(definition);
    }
    Ok((definitions, sched_resources))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_boolean() {
        for raw in VALID_TRUE {
            assert!(parse_boolean(raw).unwrap());
        }
        for raw in VALID_FALSE {
            assert!(!parse_boolean(raw).unwrap());
        }
        assert!(parse_boolean("tRue").is_err());
        assert!(parse_boolean("yes").is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("1").unwrap(), 1);
        assert_eq!(parse_duration("1.49").unwrap(), 1);
        assert_eq!(parse_duration("1.5").unwrap(), 2);
        assert_eq!(parse_duration("1:1.5").unwrap(), 62);
        assert_eq!(parse_duration("01:00:00").unwrap(), 3600);
        assert_eq!(parse_duration("1:02:03.7").unwrap(), 3724);
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration(".5").is_err());
        assert!(parse_duration("1:1:1:1").is_err());
        assert!(parse_duration("1:1:1:1.5").is_err());
        assert!(parse_duration("a:00").is_err());
        assert!(parse_duration("1.").is_err());
    }

    #[test]
    fn test_parse_duration_too_many_fields() {
        let error = parse_duration("1:2:3:4:5").unwrap_err();
        insta::assert_snapshot!(error.to_string(), @"Too many fields (6 > 4): Could not parse duration '1:2:3:4:5': expected [[hours:]minutes:]seconds[.milliseconds]");
    }

    #[test]
    fn test_parse_types() {
        assert_eq!(
            ResourceType::Long.parse("-4").unwrap(),
            ResourceValue::Int(-4)
        );
        assert_eq!(
            ResourceType::Float.parse("1.5").unwrap(),
            ResourceValue::Float(1.5)
        );
        assert_eq!(
            ResourceType::StringArray.parse("a, b ,c").unwrap(),
            ResourceValue::StrArray(vec!["a".into(), "b".into(), "c".into()])
        );
        assert!(ResourceType::Long.parse("1.5").is_err());
        let error = ResourceType::Size.parse("1xb").unwrap_err();
        insta::assert_snapshot!(error.to_string(), @"Could not parse '1xb' as type size (e.g. 1mb)");
    }

    #[test]
    fn test_definition_flags() {
        let consumable = ResourceDefinition::new("ncpus", ResourceType::Long, "nh");
        assert_eq!(consumable.flag, "hn");
        assert!(consumable.is_consumable());
        assert!(consumable.is_host());

        let with_m = ResourceDefinition::new("ngpus", ResourceType::Long, "mhn");
        assert!(with_m.is_consumable());

        let host = ResourceDefinition::new("slot_type", ResourceType::String, "h");
        assert!(!host.is_consumable());
        assert!(host.is_host());

        let queue = ResourceDefinition::new("licenses", ResourceType::Long, "q");
        assert!(queue.is_consumable());
        assert!(!queue.is_host());

        let first_host = ResourceDefinition::new("scratch", ResourceType::Size, "fh");
        assert!(first_host.is_consumable());

        let server = ResourceDefinition::new("site", ResourceType::String, "");
        assert!(!server.is_consumable());
        assert!(!server.is_host());
    }
}
