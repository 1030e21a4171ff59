use crate::bucket::Bucket;
use crate::node::Node;
use serde::{Deserialize, Serialize};

/// Request for `count` new machines of one type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MachineRequest {
    pub nodearray: String,
    pub vm_size: String,
    pub count: u32,
    #[serde(default)]
    pub placement_group: Option<String>,
}

/// Provisioning backend.
///
/// `nodes` returns the whole inventory, including machines that are still booting.
pub trait ClusterManager {
    fn buckets(&self) -> crate::Result<Vec<Bucket>>;

    fn nodes(&self) -> crate::Result<Vec<Node>>;

    /// Returns the nodes that were created.
    fn bootup(&mut self, requests: &[MachineRequest]) -> crate::Result<Vec<Node>>;

    /// Returns ids of nodes that were shut down.
    fn shutdown(&mut self, nodes: &[&Node]) -> crate::Result<Vec<String>>;
}
