use crate::resources::{ResourceMap, ResourceValue};
use crate::shared::{SharedPools, SharedResourceId};
use serde::Serialize;
use std::fmt;

/// A single host level request, e.g. `ncpus=2`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostResource {
    pub name: String,
    pub value: ResourceValue,
    /// Consumable requests are subtracted from the node after a match.
    pub consumable: bool,
}

impl HostResource {
    pub fn new(name: impl Into<String>, value: ResourceValue, consumable: bool) -> Self {
        Self {
            name: name.into(),
            value,
            consumable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Constraint {
    /// The node has to belong to a placement group.
    InAPlacementGroup,
    /// No other job may share the node. `task` distinguishes exclusive vnodes (`excl`)
    /// from a whole exclusive host (`exclhost`).
    Exclusive { task: bool },
    /// Ordered set of host resource requests.
    HostResources(Vec<HostResource>),
    /// Request against stacked shared pools, every pool is decremented.
    SharedConsumable {
        pools: Vec<SharedResourceId>,
        amount: ResourceValue,
    },
    SharedNonConsumable {
        pool: SharedResourceId,
        value: ResourceValue,
    },
}

impl Constraint {
    /// Checks the constraint against a node's remaining resources and applies consumption.
    /// `available` and `pools` are scratch copies, the caller discards them on failure.
    pub(crate) fn apply(
        &self,
        placement_group: Option<&str>,
        available: &mut ResourceMap,
        pools: &mut SharedPools,
    ) -> bool {
        match self {
            Constraint::InAPlacementGroup => placement_group.is_some(),
            // Exclusivity is a property of the node selection, see `DemandCalculator`.
            Constraint::Exclusive { .. } => true,
            Constraint::HostResources(resources) => {
                for request in resources {
                    let Some(offered) = available.get(&request.name) else {
                        return false;
                    };
                    if !offered.satisfies(&request.value) {
                        return false;
                    }
                    if request.consumable && request.value.is_numeric() {
                        match offered.minus(&request.value) {
                            Some(left) => {
                                available.insert(request.name.clone(), left);
                            }
                            None => return false,
                        }
                    }
                }
                true
            }
            Constraint::SharedConsumable { pools: ids, amount } => pools.try_consume(ids, amount),
            Constraint::SharedNonConsumable { pool, value } => pools.satisfies(*pool, value),
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::InAPlacementGroup => f.write_str("in-a-placement-group"),
            Constraint::Exclusive { task: true } => f.write_str("exclusive-task"),
            Constraint::Exclusive { task: false } => f.write_str("exclusive"),
            Constraint::HostResources(resources) => {
                let items: Vec<_> = resources
                    .iter()
                    .map(|r| format!("{}={}", r.name, r.value))
                    .collect();
                write!(f, "{{{}}}", items.join(", "))
            }
            Constraint::SharedConsumable { pools, amount } => {
                write!(f, "shared({} pools) >= {}", pools.len(), amount)
            }
            Constraint::SharedNonConsumable { pool, value } => {
                write!(f, "shared(pool {pool}) == {value}")
            }
        }
    }
}
