pub mod autoscale;
pub mod client;
pub mod cluster;
pub mod common;
pub mod pbs;

#[cfg(test)]
pub(crate) mod tests;

pub type Error = crate::common::error::PbsError;
pub type Result<T> = std::result::Result<T, Error>;

/// Resource the autoscaler sets last when a node joins; its presence marks a fully joined node.
pub const CCNODEID: &str = "ccnodeid";
