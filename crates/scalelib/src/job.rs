use crate::JobName;
use crate::constraints::Constraint;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackingStrategy {
    /// Fill a node with as many slots as fit before moving on.
    #[default]
    Pack,
    /// At most one slot of an iteration per node.
    Scatter,
}

impl fmt::Display for PackingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackingStrategy::Pack => f.write_str("pack"),
            PackingStrategy::Scatter => f.write_str("scatter"),
        }
    }
}

/// Unit of demand: `iterations` independent copies, each needing `node_count` slots
/// that satisfy all `constraints`.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub name: JobName,
    pub iterations: u32,
    pub node_count: u32,
    pub packing_strategy: PackingStrategy,
    /// All slots have to land in a single placement group.
    pub colocated: bool,
    pub constraints: Vec<Constraint>,
    /// Set for running jobs, the job is bound to this host regardless of capacity.
    pub executing_hostname: Option<String>,
}

impl Job {
    pub fn new(name: impl Into<JobName>, constraints: Vec<Constraint>) -> Self {
        Job {
            name: name.into(),
            iterations: 1,
            node_count: 1,
            packing_strategy: PackingStrategy::Pack,
            colocated: false,
            constraints,
            executing_hostname: None,
        }
    }

    pub fn is_exclusive(&self) -> bool {
        self.constraints
            .iter()
            .any(|c| matches!(c, Constraint::Exclusive { .. }))
    }
}
