pub mod bucket;
pub mod cluster;
pub mod common;
pub mod constraints;
pub mod demand;
pub mod job;
pub mod node;
pub mod resources;
pub mod shared;

#[cfg(test)]
pub(crate) mod tests;

pub use crate::common::{Map, Set};

pub type Error = common::error::ScaleError;
pub type Result<T> = std::result::Result<T, Error>;

/// Name of a job as it is reported by the scheduler (e.g. `15` or `15+1`).
pub type JobName = String;
