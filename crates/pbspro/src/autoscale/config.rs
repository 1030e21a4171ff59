use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::common::error::PbsError;
use crate::common::timeutils::deserialize_duration;

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_BOOT_TIMEOUT: Duration = Duration::from_secs(3600);
pub const DEFAULT_DOWN_TIMEOUT: Duration = Duration::from_secs(300);

pub const DEFAULT_LOCK_FILE: &str = "/opt/cycle/pbspro/scalelib.lock";
pub const DEFAULT_SERVER_DYN_RES_DIR: &str = "/opt/cycle/pbspro/server_dyn_res";

/// Autoscaler settings, loaded from a JSON or TOML file. Missing keys take their defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AutoscaleConfig {
    /// Managed nodes without work are drained after being idle for this long.
    #[serde(deserialize_with = "deserialize_duration")]
    pub idle_timeout: Duration,
    /// Nodes that did not become ready and join within this time are drained.
    #[serde(deserialize_with = "deserialize_duration")]
    pub boot_timeout: Duration,
    /// Nodes reported down for this long are taken offline.
    #[serde(deserialize_with = "deserialize_duration")]
    pub down_timeout: Duration,
    pub start_enabled: bool,
    pub stop_enabled: bool,
    pub max_unmatched_jobs: Option<usize>,
    pub lock_file: Option<PathBuf>,
    /// Regular expressions, a node only joins when its hostname matches one of them.
    pub valid_hostnames: Vec<String>,
    pub pbspro: PbsproConfig,
    pub cluster: ClusterConfig,
    pub output_columns: Option<Vec<String>>,
}

impl Default for AutoscaleConfig {
    fn default() -> Self {
        AutoscaleConfig {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            boot_timeout: DEFAULT_BOOT_TIMEOUT,
            down_timeout: DEFAULT_DOWN_TIMEOUT,
            start_enabled: true,
            stop_enabled: true,
            max_unmatched_jobs: None,
            lock_file: Some(PathBuf::from(DEFAULT_LOCK_FILE)),
            valid_hostnames: Vec::new(),
            pbspro: PbsproConfig::default(),
            cluster: ClusterConfig::default(),
            output_columns: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PbsproConfig {
    /// Resources that are used for packing planned nodes, but never written to PBS.
    pub read_only_resources: Vec<String>,
    /// Jobs of these queues are not autoscaled.
    pub ignore_queues: Vec<String>,
    /// Skip every scheduler node that was not joined by the autoscaler.
    pub ignore_onprem: bool,
    pub ignore_hostnames_re: Option<String>,
    pub server_dyn_res_dir: PathBuf,
}

impl Default for PbsproConfig {
    fn default() -> Self {
        PbsproConfig {
            read_only_resources: vec!["host".to_string(), "vnode".to_string()],
            ignore_queues: Vec::new(),
            ignore_onprem: false,
            ignore_hostnames_re: None,
            server_dyn_res_dir: PathBuf::from(DEFAULT_SERVER_DYN_RES_DIR),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterConfig {
    /// Program (and its arguments) implementing the cluster manager protocol.
    pub command: Vec<String>,
}

impl AutoscaleConfig {
    /// Files with a `.toml` extension are parsed as TOML, everything else as JSON.
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|error| {
            PbsError::ConfigurationError(format!(
                "Could not read config file {}: {error}",
                path.display()
            ))
        })?;
        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        let config = if is_toml {
            toml::from_str(&content)?
        } else {
            serde_json::from_str(&content).map_err(|error| {
                PbsError::DeserializationError(format!("{}: {error}", path.display()))
            })?
        };
        Ok(config)
    }
}
