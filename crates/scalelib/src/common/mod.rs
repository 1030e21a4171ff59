pub(crate) mod data_structures;
pub(crate) mod error;

pub use data_structures::{Map, Set, sorted_entries};
