use crate::node::Node;
use crate::resources::ResourceMap;
use serde::{Deserialize, Serialize};

/// A machine type the cluster manager is able to provision, together with its remaining quota.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bucket {
    pub bucket_id: String,
    pub nodearray: String,
    pub vm_size: String,
    #[serde(default)]
    pub placement_group: Option<String>,
    pub available_count: u32,
    #[serde(default)]
    pub resources: ResourceMap,
}

impl Bucket {
    /// Creates a node that does not exist yet and would be provisioned from this bucket.
    pub fn new_node(&self, name: String) -> Node {
        let mut node = Node::new(name, self.resources.clone());
        node.nodearray = self.nodearray.clone();
        node.vm_size = self.vm_size.clone();
        node.bucket_id = Some(self.bucket_id.clone());
        node.placement_group = self.placement_group.clone();
        node.exists = false;
        node.managed = true;
        node
    }
}
