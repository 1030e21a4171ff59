use crate::common::Map;
use crate::resources::ResourceValue;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SharedResourceId(u32);

impl SharedResourceId {
    pub fn as_num(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SharedResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A queue or server level resource that spans multiple jobs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SharedResource {
    /// Decremented as jobs are matched (e.g. a license count).
    Consumable {
        name: String,
        source: String,
        initial: ResourceValue,
        current: ResourceValue,
    },
    /// Fixed value every matched job has to be compatible with.
    NonConsumable {
        name: String,
        source: String,
        value: ResourceValue,
    },
}

impl SharedResource {
    pub fn name(&self) -> &str {
        match self {
            SharedResource::Consumable { name, .. } | SharedResource::NonConsumable { name, .. } => {
                name
            }
        }
    }

    pub fn source(&self) -> &str {
        match self {
            SharedResource::Consumable { source, .. }
            | SharedResource::NonConsumable { source, .. } => source,
        }
    }

    pub fn is_consumable(&self) -> bool {
        matches!(self, SharedResource::Consumable { .. })
    }
}

/// Shared resources addressable per resource name, in precedence order.
///
/// Entries are ids into [`SharedPools`], so a child level (queue) that inherits from its
/// parent (server) refers to the very same pools and sees every decrement.
pub type SharedResources = Map<String, Vec<SharedResourceId>>;

/// Arena owning every shared resource record of a cycle.
#[derive(Debug, Clone, Default)]
pub struct SharedPools {
    resources: Vec<SharedResource>,
}

impl SharedPools {
    pub fn add(&mut self, resource: SharedResource) -> SharedResourceId {
        let id = SharedResourceId(self.resources.len() as u32);
        self.resources.push(resource);
        id
    }

    pub fn get(&self, id: SharedResourceId) -> &SharedResource {
        &self.resources[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SharedResourceId, &SharedResource)> {
        self.resources
            .iter()
            .enumerate()
            .map(|(i, r)| (SharedResourceId(i as u32), r))
    }

    /// Decrements all given consumable pools by `amount`.
    /// Nothing is changed if any pool would become negative.
    pub fn try_consume(&mut self, ids: &[SharedResourceId], amount: &ResourceValue) -> bool {
        let mut updated = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get(*id) {
                SharedResource::Consumable { current, .. } => match current.minus(amount) {
                    Some(value) if !value.is_negative() => updated.push((*id, value)),
                    _ => return false,
                },
                SharedResource::NonConsumable { .. } => return false,
            }
        }
        for (id, value) in updated {
            if let SharedResource::Consumable { current, .. } = &mut self.resources[id.0 as usize] {
                *current = value;
            }
        }
        true
    }

    pub fn satisfies(&self, id: SharedResourceId, required: &ResourceValue) -> bool {
        match self.get(id) {
            SharedResource::NonConsumable { value, .. } => value.satisfies(required),
            SharedResource::Consumable { current, .. } => current.satisfies(required),
        }
    }
}
